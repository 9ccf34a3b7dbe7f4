//! Routing decisions and parsing of classifier replies.
//!
//! The classifier answers with `{"type": ..., ...}`:
//!
//! | `type` | decision |
//! |---|---|
//! | `routing` | [`RoutingDecision::Routing`], target in `routing` (object or JSON string) |
//! | `clarification`, `agent_inquiry`, `invalid_query` | [`RoutingDecision::Clarification`] |
//! | `confirmation` | [`RoutingDecision::Confirmation`] |
//! | `rejected` | [`RoutingDecision::Rejected`] |

use serde::Serialize;
use serde_json::{Map, Value};

use opnflow_core::SessionId;

use crate::error::RouterError;

/// Extracted parameters, by name.
pub type Params = Map<String, Value>;

/// What the classifier decided to do with a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RoutingDecision {
    /// Proceed to the named agent.
    Routing {
        agent: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        subagent: Option<String>,
        params: Params,
    },
    /// Ask the user for more detail.
    Clarification {
        question: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<SessionId>,
        /// Parameters already extracted this turn.
        #[serde(skip_serializing_if = "Map::is_empty")]
        params: Params,
    },
    /// Ask the user to confirm a target before dispatching.
    Confirmation {
        question: String,
        agent: Option<String>,
        subagent: Option<String>,
        params: Params,
    },
    /// The query cannot be served.
    Rejected { reason: String, confidence: f64 },
}

impl RoutingDecision {
    /// Whether this decision pauses for user input.
    pub fn awaits_user(&self) -> bool {
        matches!(self, Self::Clarification { .. } | Self::Confirmation { .. })
    }

    /// Prompt shown to the user for pause points.
    pub fn prompt(&self) -> Option<&str> {
        match self {
            Self::Clarification { question, .. } | Self::Confirmation { question, .. } => {
                Some(question)
            }
            _ => None,
        }
    }

    /// Parse a classifier reply.
    ///
    /// `session` is the caller's session, used when the reply carries none.
    pub fn from_reply(reply: &Value, session: Option<&SessionId>) -> Result<Self, RouterError> {
        let kind = reply
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| RouterError::Classification("Classifier reply has no type".into()))?;
        let response = reply
            .get("response")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match kind {
            "routing" => {
                let target = routing_target(reply)?;
                let (agent, subagent, params) = split_target(target);
                let agent = agent.ok_or_else(|| {
                    RouterError::Classification("No agent specified in routing".into())
                })?;
                Ok(Self::Routing {
                    agent,
                    subagent,
                    params,
                })
            }
            "clarification" | "agent_inquiry" | "invalid_query" => {
                let session = reply
                    .get("session_id")
                    .and_then(Value::as_str)
                    .map(SessionId::from)
                    .or_else(|| session.cloned());
                let params = reply
                    .get("params")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                Ok(Self::Clarification {
                    question: response,
                    session,
                    params,
                })
            }
            "confirmation" => {
                let (agent, subagent, params) = match routing_target(reply) {
                    Ok(target) => split_target(target),
                    Err(_) => (None, None, Params::new()),
                };
                Ok(Self::Confirmation {
                    question: response,
                    agent,
                    subagent,
                    params,
                })
            }
            "rejected" => {
                let reason = reply
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or(response);
                let confidence = reply
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                Ok(Self::Rejected { reason, confidence })
            }
            other => Err(RouterError::Classification(format!(
                "Unexpected response type: {other}"
            ))),
        }
    }
}

/// The `routing` field, which older classifiers send as a JSON string.
fn routing_target(reply: &Value) -> Result<Params, RouterError> {
    match reply.get("routing") {
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(raw)) => serde_json::from_str::<Params>(raw)
            .map_err(|e| RouterError::Classification(format!("Malformed routing data: {e}"))),
        _ => Err(RouterError::Classification("Missing routing data".into())),
    }
}

/// Separate agent and subagent from the extracted parameters.
fn split_target(mut target: Params) -> (Option<String>, Option<String>, Params) {
    let take_name = |target: &mut Params, key: &str| {
        target
            .remove(key)
            .and_then(|v| v.as_str().map(str::trim).map(str::to_owned))
            .filter(|s| !s.is_empty())
    };
    let agent = take_name(&mut target, "agent");
    let subagent = take_name(&mut target, "subagent");

    let mut params = match target.remove("params") {
        Some(Value::Object(nested)) => nested,
        _ => Params::new(),
    };
    for (key, value) in target {
        params.entry(key).or_insert(value);
    }
    if let Some(agent) = &agent {
        params.insert("agent_name".into(), Value::String(agent.clone()));
    }
    params.insert(
        "subagent_name".into(),
        Value::String(subagent.clone().unwrap_or_default()),
    );
    (agent, subagent, params)
}
