//! opnflow Router Library
//!
//! Turns free-text requests into calls on registered automations:
//!
//! 1. classify the query, pausing for clarification or confirmation
//! 2. look up the agent registration
//! 3. resolve input files from the extracted parameters
//! 4. build the payload from the registration's mapping
//! 5. dispatch once and wrap the result in a [`RouteEnvelope`]

pub mod classifier;
pub mod config;
pub mod decision;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod payload;
pub mod registry;
pub mod resolver;
pub mod router;
pub mod session;
pub mod state;

pub use classifier::{HttpClassifier, IntentClassifier};
pub use config::RouterConfig;
pub use decision::{Params, RoutingDecision};
pub use dispatch::{normalize_response, Dispatcher, HttpDispatcher};
pub use error::{RouteStep, RouterError};
pub use payload::{build_payload, render_template, ResolvedFiles, TemplateError};
pub use registry::{AgentRegistration, AgentRegistry, FileResolutionConfig};
pub use resolver::{FileInfo, FileResolver};
pub use router::{EnvelopeStatus, RequestRouter, RouteEnvelope, RouteRequest};
pub use session::{ConversationSession, RouteState, SessionStore};
pub use state::AppState;
