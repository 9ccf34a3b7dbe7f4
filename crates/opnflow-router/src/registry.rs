//! Agent registrations: how to reach each automation.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RouterError;

/// Declarative record describing how to dispatch to one automation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subagent: Option<String>,

    #[serde(default)]
    pub description: String,

    /// URL the built payload is POSTed to.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Payload key to a literal, a `{param}` template or `resolved:<type>`.
    #[serde(default)]
    pub payload_mapping: Map<String, Value>,

    /// Call timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Parameters the classifier must have extracted.
    #[serde(default)]
    pub required_params: Vec<String>,

    #[serde(default)]
    pub file_resolution: FileResolutionConfig,
}

impl AgentRegistration {
    /// Call timeout, falling back to `default` when unset or zero.
    pub fn timeout_or(&self, default: Duration) -> Duration {
        match self.timeout {
            Some(secs) if secs > 0 => Duration::from_secs(secs),
            _ => default,
        }
    }

    /// `name` or `name/subagent`, for logs and messages.
    pub fn display_name(&self) -> String {
        match &self.subagent {
            Some(sub) => format!("{}/{}", self.name, sub),
            None => self.name.clone(),
        }
    }
}

/// Where and how to look for input files before dispatching.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileResolutionConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Directory searched; a request may override it.
    #[serde(default)]
    pub base_path: Option<PathBuf>,

    /// File type to glob pattern, e.g. `"excel": "{client_name} W{wave_number}*.xlsx"`.
    #[serde(default)]
    pub patterns: BTreeMap<String, String>,

    /// Parameters substituted into the patterns.
    #[serde(default)]
    pub required_params: Vec<String>,

    /// File types allowed to stay unresolved.
    #[serde(default)]
    pub optional: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    agents: Vec<AgentRegistration>,
}

/// Read-only set of agent registrations.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: Vec<AgentRegistration>,
}

impl AgentRegistry {
    /// Build a registry, rejecting duplicate `(name, subagent)` pairs.
    pub fn new(agents: Vec<AgentRegistration>) -> Result<Self, RouterError> {
        let mut seen = HashSet::new();
        for agent in &agents {
            if agent.name.trim().is_empty() {
                return Err(RouterError::Registry("agent with empty name".to_string()));
            }
            if !seen.insert((agent.name.as_str(), agent.subagent.as_deref())) {
                return Err(RouterError::Registry(format!(
                    "duplicate registration for '{}'",
                    agent.display_name()
                )));
            }
        }
        Ok(Self { agents })
    }

    /// Load `{"agents": [...]}` from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, RouterError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RouterError::Registry(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, RouterError> {
        let file: RegistryFile =
            serde_json::from_str(raw).map_err(|e| RouterError::Registry(e.to_string()))?;
        Self::new(file.agents)
    }

    /// Exact lookup on name, and on subagent when one is given.
    ///
    /// Without a subagent the first registration under `name` wins.
    pub fn lookup(
        &self,
        name: &str,
        subagent: Option<&str>,
    ) -> Result<&AgentRegistration, RouterError> {
        self.agents
            .iter()
            .find(|a| {
                a.name == name
                    && subagent.map_or(true, |sub| a.subagent.as_deref() == Some(sub))
            })
            .ok_or_else(|| {
                let target = match subagent {
                    Some(sub) => format!("{name}/{sub}"),
                    None => name.to_string(),
                };
                RouterError::Registration(format!("Agent not registered: {target}"))
            })
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn agents(&self) -> &[AgentRegistration] {
        &self.agents
    }
}
