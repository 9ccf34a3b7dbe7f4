//! Intent classification.
//!
//! Classification itself (embedding search, language model) runs in an
//! external routing service; this module only talks to it.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use opnflow_core::SessionId;

use crate::decision::RoutingDecision;
use crate::error::RouterError;

/// Turns a free-text query into a routing decision.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(
        &self,
        query: &str,
        session: Option<&SessionId>,
    ) -> Result<RoutingDecision, RouterError>;
}

/// Classifier backed by the routing service's HTTP API.
pub struct HttpClassifier {
    inner: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpClassifier {
    /// Create a client POSTing to `url`.
    pub fn new(url: &str, timeout: Duration) -> Self {
        Self {
            inner: reqwest::Client::new(),
            url: url.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl IntentClassifier for HttpClassifier {
    async fn classify(
        &self,
        query: &str,
        session: Option<&SessionId>,
    ) -> Result<RoutingDecision, RouterError> {
        let mut body = json!({ "query": query });
        if let Some(session) = session {
            body["session_id"] = Value::String(session.to_string());
        }
        debug!(url = %self.url, "Classifying query");

        let response = self
            .inner
            .post(&self.url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RouterError::Classification(format!("Routing service unreachable: {e}")))?;

        if !response.status().is_success() {
            return Err(RouterError::Classification(format!(
                "Routing service returned HTTP {}",
                response.status()
            )));
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|e| RouterError::Classification(format!("Invalid routing reply: {e}")))?;
        RoutingDecision::from_reply(&reply, session)
    }
}
