//! The request router: one query in, one result envelope out.
//!
//! Each query drives its conversation session through
//!
//! ```text
//! AwaitingQuery -> Classifying -> { AwaitingClarification, AwaitingConfirmation, Routed, Rejected }
//! ```
//!
//! Pause points return `AWAITING_USER_INPUT` and keep the session. A routed
//! query resolves files, builds the payload and dispatches once; every
//! check that can fail runs before the remote call.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{error, info, info_span, warn, Instrument, Span};

use opnflow_core::SessionId;

use crate::classifier::IntentClassifier;
use crate::decision::{Params, RoutingDecision};
use crate::dispatch::Dispatcher;
use crate::error::{RouteStep, RouterError};
use crate::payload::{build_payload, ResolvedFiles};
use crate::registry::{AgentRegistration, AgentRegistry};
use crate::resolver::FileResolver;
use crate::session::{merge_params, RouteState, SessionStore};

/// An incoming query.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteRequest {
    pub query: String,

    #[serde(default)]
    pub session_id: Option<SessionId>,

    /// Caller context; `base_path` overrides the registration's search root.
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl RouteRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: None,
            context: Map::new(),
        }
    }

    pub fn with_session(mut self, session_id: SessionId) -> Self {
        self.session_id = Some(session_id);
        self
    }

    fn base_path(&self) -> Option<PathBuf> {
        self.context
            .get("base_path")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
    }
}

/// Overall result of one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeStatus {
    Success,
    Failed,
    AwaitingUserInput,
}

/// Result envelope returned for every query.
#[derive(Debug, Clone, Serialize)]
pub struct RouteEnvelope {
    pub status: EnvelopeStatus,
    pub routing_decision: Option<RoutingDecision>,
    pub file_resolution: Option<ResolvedFiles>,
    pub execution_result: Option<Value>,
    /// Prompt for the user at pause points.
    pub message: Option<String>,
    pub session_id: Option<SessionId>,
    pub errors: Vec<String>,
}

impl RouteEnvelope {
    fn new(session_id: SessionId) -> Self {
        Self {
            status: EnvelopeStatus::Failed,
            routing_decision: None,
            file_resolution: None,
            execution_result: None,
            message: None,
            session_id: Some(session_id),
            errors: Vec::new(),
        }
    }

    fn fail(&mut self, err: &RouterError) {
        self.status = EnvelopeStatus::Failed;
        self.errors.push(err.tagged());
    }

    fn pause(&mut self, decision: RoutingDecision) {
        self.status = EnvelopeStatus::AwaitingUserInput;
        self.message = decision.prompt().map(str::to_owned);
        self.routing_decision = Some(decision);
    }
}

/// Routes queries to registered agents.
pub struct RequestRouter {
    registry: Arc<AgentRegistry>,
    classifier: Arc<dyn IntentClassifier>,
    dispatcher: Arc<dyn Dispatcher>,
    sessions: Arc<SessionStore>,
    default_timeout: Duration,
    span: Span,
}

impl RequestRouter {
    pub fn new(
        registry: Arc<AgentRegistry>,
        classifier: Arc<dyn IntentClassifier>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        Self {
            registry,
            classifier,
            dispatcher,
            sessions: Arc::new(SessionStore::new()),
            default_timeout: Duration::from_secs(300),
            span: info_span!("router"),
        }
    }

    /// Builder method to share a session store.
    pub fn with_sessions(mut self, sessions: Arc<SessionStore>) -> Self {
        self.sessions = sessions;
        self
    }

    /// Builder method to set the dispatch timeout for registrations without one.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Builder method to attach a parent logging context.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Handle one query. Never fails: errors are reported in the envelope.
    pub async fn handle(&self, request: RouteRequest) -> RouteEnvelope {
        let anonymous = request.session_id.is_none();
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(SessionId::generate);
        let span = info_span!(parent: &self.span, "query", session = %session_id);
        self.route(request, session_id, anonymous)
            .instrument(span)
            .await
    }

    async fn route(
        &self,
        request: RouteRequest,
        session_id: SessionId,
        anonymous: bool,
    ) -> RouteEnvelope {
        let mut envelope = RouteEnvelope::new(session_id.clone());
        let remembered = self.sessions.begin_turn(&session_id).await;

        let decision = match self
            .classifier
            .classify(&request.query, Some(&session_id))
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                error!(error = %e, "Classification failed");
                envelope.fail(&e);
                self.abandon_turn(&session_id, anonymous).await;
                return envelope;
            }
        };
        info!(awaits_user = decision.awaits_user(), "Query classified");

        match decision {
            RoutingDecision::Clarification { ref params, .. } => {
                let session = self
                    .sessions
                    .record_pause(&session_id, RouteState::AwaitingClarification, params)
                    .await;
                info!(clarifications = session.clarification_count, "Awaiting clarification");
                envelope.pause(decision);
            }
            RoutingDecision::Confirmation { ref params, .. } => {
                let session = self
                    .sessions
                    .record_pause(&session_id, RouteState::AwaitingConfirmation, params)
                    .await;
                info!(clarifications = session.clarification_count, "Awaiting confirmation");
                envelope.pause(decision);
            }
            RoutingDecision::Rejected { ref reason, confidence } => {
                warn!(reason = %reason, confidence, "Query rejected");
                let err = RouterError::Classification(format!(
                    "Request rejected: {reason} (confidence {confidence:.2})"
                ));
                envelope.fail(&err);
                envelope.routing_decision = Some(decision);
                self.sessions
                    .update(&session_id, |s| s.state = RouteState::Rejected)
                    .await;
                self.sessions.finish(&session_id).await;
            }
            RoutingDecision::Routing {
                agent,
                subagent,
                params,
            } => {
                let params = merge_params(remembered.params, params);
                envelope.routing_decision = Some(RoutingDecision::Routing {
                    agent: agent.clone(),
                    subagent: subagent.clone(),
                    params: params.clone(),
                });

                match self
                    .execute(&agent, subagent.as_deref(), &params, &request, &mut envelope)
                    .await
                {
                    Ok(result) => {
                        envelope.status = EnvelopeStatus::Success;
                        envelope.execution_result = Some(result);
                        self.sessions
                            .update(&session_id, |s| s.state = RouteState::Routed)
                            .await;
                        self.sessions.finish(&session_id).await;
                    }
                    Err(e) => {
                        error!(step = %e.step(), error = %e, "Routing failed");
                        if e.step() == RouteStep::Dispatch {
                            envelope.execution_result =
                                Some(json!({ "status": "FAILED", "errors": [e.to_string()] }));
                        }
                        envelope.fail(&e);
                        self.abandon_turn(&session_id, anonymous).await;
                    }
                }
            }
        }

        envelope
    }

    /// Resolve, build and dispatch. Every local check runs before the call.
    async fn execute(
        &self,
        agent: &str,
        subagent: Option<&str>,
        params: &Params,
        request: &RouteRequest,
        envelope: &mut RouteEnvelope,
    ) -> Result<Value, RouterError> {
        let registration = self.registry.lookup(agent, subagent)?;
        let endpoint = registration
            .endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| {
                RouterError::Registration(format!(
                    "Agent '{}' does not have an endpoint configured",
                    registration.display_name()
                ))
            })?;

        let missing = missing_params(&registration.required_params, params);
        if !missing.is_empty() {
            return Err(RouterError::Classification(format!(
                "Missing required parameters: {}",
                missing.join(", ")
            )));
        }

        let resolved = if registration.file_resolution.enabled {
            let resolved = self.resolve_files(registration, params, request).await;
            envelope.file_resolution = resolved.as_ref().ok().cloned();
            let resolved = resolved?;
            let required: Vec<String> = registration
                .file_resolution
                .patterns
                .keys()
                .filter(|t| !registration.file_resolution.optional.contains(t))
                .cloned()
                .collect();
            FileResolver::validate_resolved_files(&resolved, &required)?;
            resolved
        } else {
            ResolvedFiles::new()
        };

        let payload = build_payload(&registration.payload_mapping, params, &resolved)?;
        let timeout = registration.timeout_or(self.default_timeout);
        info!(
            agent = %registration.display_name(),
            endpoint = %endpoint,
            timeout_secs = timeout.as_secs(),
            "Dispatching to agent"
        );
        self.dispatcher.dispatch(endpoint, &payload, timeout).await
    }

    async fn resolve_files(
        &self,
        registration: &AgentRegistration,
        params: &Params,
        request: &RouteRequest,
    ) -> Result<ResolvedFiles, RouterError> {
        let config = &registration.file_resolution;
        let missing = missing_params(&config.required_params, params);
        if !missing.is_empty() {
            return Err(RouterError::FileResolution(format!(
                "Missing parameters for file resolution: {}",
                missing.join(", ")
            )));
        }

        let base_path = request
            .base_path()
            .or_else(|| config.base_path.clone())
            .ok_or_else(|| {
                RouterError::FileResolution("No base path configured for file resolution".into())
            })?;

        let patterns = config.patterns.clone();
        let params = params.clone();
        tokio::task::spawn_blocking(move || {
            FileResolver::new(&base_path)?.resolve_files(&params, &patterns)
        })
        .await
        .map_err(|e| RouterError::FileResolution(format!("File resolution aborted: {e}")))?
    }

    /// Leave the session as it was before a failed turn.
    async fn abandon_turn(&self, session_id: &SessionId, anonymous: bool) {
        if anonymous {
            self.sessions.finish(session_id).await;
        } else {
            self.sessions
                .update(session_id, |s| s.state = RouteState::AwaitingQuery)
                .await;
        }
    }
}

/// Required parameters that are absent, null or blank.
fn missing_params<'a>(required: &'a [String], params: &Params) -> Vec<&'a str> {
    required
        .iter()
        .filter(|name| match params.get(name.as_str()) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        })
        .map(String::as_str)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Classifier replaying canned replies in order.
    struct ScriptedClassifier {
        replies: Mutex<Vec<Value>>,
    }

    impl ScriptedClassifier {
        fn new(replies: Vec<Value>) -> Arc<Self> {
            let mut replies = replies;
            replies.reverse();
            Arc::new(Self {
                replies: Mutex::new(replies),
            })
        }
    }

    #[async_trait]
    impl IntentClassifier for ScriptedClassifier {
        async fn classify(
            &self,
            _query: &str,
            session: Option<&SessionId>,
        ) -> Result<RoutingDecision, RouterError> {
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| json!({"type": "invalid_query", "response": "?"}));
            RoutingDecision::from_reply(&reply, session)
        }
    }

    /// Dispatcher recording calls instead of sending them.
    #[derive(Default)]
    struct RecordingDispatcher {
        calls: AtomicU32,
        last: Mutex<Option<(String, Map<String, Value>, Duration)>>,
        fail: bool,
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        async fn dispatch(
            &self,
            endpoint: &str,
            payload: &Map<String, Value>,
            timeout: Duration,
        ) -> Result<Value, RouterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some((endpoint.to_string(), payload.clone(), timeout));
            if self.fail {
                return Err(RouterError::Dispatch("Agent returned HTTP 502: bad gateway".into()));
            }
            Ok(json!({"status": "SUCCESS"}))
        }
    }

    fn registry(base_path: Option<&std::path::Path>) -> Arc<AgentRegistry> {
        let raw = json!({
            "agents": [{
                "name": "Open Negotiation AI Agent",
                "subagent": "Document Creation Agent",
                "endpoint": "http://pipeline/run-workflow",
                "timeout": 600,
                "payload_mapping": {
                    "excel_path": "resolved:excel",
                    "merged_output_folder": "/out/{client_name} W{wave_number}",
                    "enable_parallel_processing": true
                },
                "required_params": ["client_name", "wave_number"],
                "file_resolution": {
                    "enabled": true,
                    "base_path": base_path,
                    "patterns": {"excel": "{client_name} W{wave_number}*.xlsx"},
                    "required_params": ["client_name", "wave_number"]
                }
            }]
        });
        Arc::new(AgentRegistry::from_json_str(&raw.to_string()).unwrap())
    }

    fn routing(client: &str, wave: &str) -> Value {
        json!({
            "type": "routing",
            "routing": {
                "agent": "Open Negotiation AI Agent",
                "subagent": "Document Creation Agent",
                "client_name": client,
                "wave_number": wave,
            }
        })
    }

    fn router(
        classifier: Arc<ScriptedClassifier>,
        dispatcher: Arc<RecordingDispatcher>,
        base_path: Option<&std::path::Path>,
    ) -> RequestRouter {
        RequestRouter::new(registry(base_path), classifier, dispatcher)
    }

    #[tokio::test]
    async fn test_clarification_never_dispatches() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let classifier = ScriptedClassifier::new(vec![
            json!({"type": "clarification", "response": "Which client and wave?"}),
        ]);
        let router = router(classifier, dispatcher.clone(), None);

        let envelope = router.handle(RouteRequest::new("make the documents")).await;

        assert_eq!(envelope.status, EnvelopeStatus::AwaitingUserInput);
        assert_eq!(envelope.message.as_deref(), Some("Which client and wave?"));
        assert!(envelope.errors.is_empty());
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);

        let session = router
            .sessions()
            .get(envelope.session_id.as_ref().unwrap())
            .await
            .unwrap();
        assert_eq!(session.state, RouteState::AwaitingClarification);
        assert_eq!(session.clarification_count, 1);
    }

    #[tokio::test]
    async fn test_multi_turn_routes_and_dispatches() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("CEP W6 OPNNEG TEMPLATE.xlsx"), b"x").unwrap();

        let dispatcher = Arc::new(RecordingDispatcher::default());
        let classifier = ScriptedClassifier::new(vec![
            json!({"type": "clarification", "response": "Which wave?", "params": {"client_name": "CEP"}}),
            routing("", "6"),
        ]);
        let router = router(classifier, dispatcher.clone(), Some(dir.path()));

        let first = router.handle(RouteRequest::new("CEP documents")).await;
        assert_eq!(first.status, EnvelopeStatus::AwaitingUserInput);
        let session_id = first.session_id.unwrap();

        let second = router
            .handle(RouteRequest::new("wave 6").with_session(session_id.clone()))
            .await;

        assert_eq!(second.status, EnvelopeStatus::Success, "{:?}", second.errors);
        assert_eq!(second.execution_result, Some(json!({"status": "SUCCESS"})));
        let expected = dir.path().canonicalize().unwrap().join("CEP W6 OPNNEG TEMPLATE.xlsx");
        assert_eq!(
            second.file_resolution.as_ref().unwrap()["excel"],
            Some(expected.clone())
        );

        let (endpoint, payload, timeout) = dispatcher.last.lock().unwrap().clone().unwrap();
        assert_eq!(endpoint, "http://pipeline/run-workflow");
        assert_eq!(timeout, Duration::from_secs(600));
        assert_eq!(payload["excel_path"], expected.display().to_string());
        assert_eq!(payload["merged_output_folder"], "/out/CEP W6");
        assert_eq!(payload["enable_parallel_processing"], true);

        // Routed sessions are cleared.
        assert!(router.sessions().get(&session_id).await.is_none());
    }

    #[tokio::test]
    async fn test_unresolved_file_fails_before_dispatch() {
        let dir = TempDir::new().unwrap();
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let classifier = ScriptedClassifier::new(vec![routing("CEP", "6")]);
        let router = router(classifier, dispatcher.clone(), Some(dir.path()));

        let envelope = router.handle(RouteRequest::new("CEP wave 6")).await;

        assert_eq!(envelope.status, EnvelopeStatus::Failed);
        assert_eq!(
            envelope.errors,
            vec!["[file_resolution] Could not resolve required files: excel"]
        );
        assert_eq!(envelope.file_resolution.unwrap()["excel"], None);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_params_fail_before_dispatch() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let classifier = ScriptedClassifier::new(vec![routing("CEP", "")]);
        let router = router(classifier, dispatcher.clone(), None);

        let envelope = router.handle(RouteRequest::new("CEP docs")).await;

        assert_eq!(envelope.status, EnvelopeStatus::Failed);
        assert_eq!(
            envelope.errors,
            vec!["[classification] Missing required parameters: wave_number"]
        );
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_context_base_path_overrides_registration() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("CEP W6.xlsx"), b"x").unwrap();

        let dispatcher = Arc::new(RecordingDispatcher::default());
        let classifier = ScriptedClassifier::new(vec![routing("CEP", "6")]);
        let router = router(
            classifier,
            dispatcher.clone(),
            Some(std::path::Path::new("/nonexistent")),
        );

        let mut request = RouteRequest::new("CEP wave 6");
        request
            .context
            .insert("base_path".into(), json!(dir.path().display().to_string()));
        let envelope = router.handle(request).await;

        assert_eq!(envelope.status, EnvelopeStatus::Success, "{:?}", envelope.errors);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_agent_is_registration_failure() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let classifier = ScriptedClassifier::new(vec![json!({
            "type": "routing",
            "routing": {"agent": "Billing Agent"}
        })]);
        let router = router(classifier, dispatcher.clone(), None);

        let envelope = router.handle(RouteRequest::new("pay invoices")).await;

        assert_eq!(envelope.status, EnvelopeStatus::Failed);
        assert_eq!(
            envelope.errors,
            vec!["[registration] Agent not registered: Billing Agent"]
        );
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
        assert_eq!(router.sessions().len().await, 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_is_structured() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("CEP W6.xlsx"), b"x").unwrap();
        let dispatcher = Arc::new(RecordingDispatcher {
            fail: true,
            ..Default::default()
        });
        let classifier = ScriptedClassifier::new(vec![routing("CEP", "6")]);
        let router = router(classifier, dispatcher.clone(), Some(dir.path()));

        let envelope = router.handle(RouteRequest::new("CEP wave 6")).await;

        assert_eq!(envelope.status, EnvelopeStatus::Failed);
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            envelope.execution_result,
            Some(json!({"status": "FAILED", "errors": ["Agent returned HTTP 502: bad gateway"]}))
        );
        assert_eq!(
            envelope.errors,
            vec!["[dispatch] Agent returned HTTP 502: bad gateway"]
        );
    }

    #[tokio::test]
    async fn test_rejection_fails_without_dispatch() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let classifier = ScriptedClassifier::new(vec![
            json!({"type": "rejected", "reason": "out of scope", "confidence": 0.2}),
        ]);
        let router = router(classifier, dispatcher.clone(), None);

        let envelope = router.handle(RouteRequest::new("weather?")).await;

        assert_eq!(envelope.status, EnvelopeStatus::Failed);
        assert_eq!(
            envelope.errors,
            vec!["[classification] Request rejected: out of scope (confidence 0.20)"]
        );
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_envelope_serialization() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let classifier = ScriptedClassifier::new(vec![
            json!({"type": "confirmation", "response": "Run CEP W6?"}),
        ]);
        let router = router(classifier, dispatcher, None);

        let envelope = router.handle(RouteRequest::new("CEP W6")).await;
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["status"], "AWAITING_USER_INPUT");
        assert_eq!(json["routing_decision"]["type"], "confirmation");
        assert_eq!(json["message"], "Run CEP W6?");
        assert!(json["execution_result"].is_null());
        assert_eq!(json["errors"], json!([]));
    }
}
