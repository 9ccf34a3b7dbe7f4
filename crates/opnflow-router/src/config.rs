//! Router configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Settings for the router service.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// HTTP listen address.
    pub bind_addr: String,

    /// JSON file holding the agent registrations.
    pub registry_path: PathBuf,

    /// Routing service endpoint used for intent classification.
    pub classifier_url: String,

    /// Timeout for one classification call.
    pub classifier_timeout: Duration,

    /// Dispatch timeout for registrations that set none.
    pub default_dispatch_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8001".to_string(),
            registry_path: PathBuf::from("agents.json"),
            classifier_url: "http://127.0.0.1:8002/route".to_string(),
            classifier_timeout: Duration::from_secs(30),
            default_dispatch_timeout: Duration::from_secs(300),
        }
    }
}
