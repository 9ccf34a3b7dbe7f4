//! Payload construction from declarative mappings.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::decision::Params;
use crate::error::RouterError;

/// Prefix of mapping values that pull from the resolved-file map.
pub const RESOLVED_PREFIX: &str = "resolved:";

/// Resolved files by type; `None` for an optional file that did not match.
pub type ResolvedFiles = BTreeMap<String, Option<PathBuf>>;

/// Why a `{param}` template could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown parameter '{0}'")]
    MissingParam(String),

    #[error("unbalanced braces in '{0}'")]
    Malformed(String),
}

/// Substitute `{name}` placeholders from `params`. `{{` and `}}` are
/// literal braces.
pub fn render_template(template: &str, params: &Params) -> Result<String, TemplateError> {
    render_with(template, params, str::to_owned)
}

/// Like [`render_template`], passing each substituted value through
/// `escape` first.
pub(crate) fn render_with<E>(
    template: &str,
    params: &Params,
    escape: E,
) -> Result<String, TemplateError>
where
    E: Fn(&str) -> String,
{
    let malformed = || TemplateError::Malformed(template.to_string());
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => return Err(malformed()),
                        Some(ch) => name.push(ch),
                    }
                }
                let name = name.trim();
                let value = params
                    .get(name)
                    .and_then(param_text)
                    .ok_or_else(|| TemplateError::MissingParam(name.to_string()))?;
                out.push_str(&escape(&value));
            }
            '}' => return Err(malformed()),
            other => out.push(other),
        }
    }
    Ok(out)
}

/// Text form of a parameter value; `null` counts as missing.
fn param_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Build the outbound payload for one dispatch.
///
/// Each mapping value resolves in priority order:
/// 1. non-string values pass through unchanged
/// 2. `resolved:<type>` takes the path resolved for `<type>`
/// 3. strings with `{param}` placeholders are rendered from `params`
/// 4. other strings are literals
///
/// An empty mapping sends the parameters themselves.
pub fn build_payload(
    mapping: &Map<String, Value>,
    params: &Params,
    resolved: &ResolvedFiles,
) -> Result<Map<String, Value>, RouterError> {
    if mapping.is_empty() {
        return Ok(params.clone());
    }

    let mut payload = Map::new();
    for (key, rule) in mapping {
        let value = match rule {
            Value::String(s) => {
                if let Some(file_type) = s.strip_prefix(RESOLVED_PREFIX) {
                    match resolved.get(file_type.trim()) {
                        Some(Some(path)) => Value::String(path.display().to_string()),
                        Some(None) => Value::Null,
                        None => {
                            return Err(RouterError::PayloadConstruction {
                                key: key.clone(),
                                reason: format!("no file resolved for type '{}'", file_type.trim()),
                            })
                        }
                    }
                } else if s.contains('{') {
                    let rendered = render_template(s, params).map_err(|e| {
                        RouterError::PayloadConstruction {
                            key: key.clone(),
                            reason: e.to_string(),
                        }
                    })?;
                    Value::String(rendered)
                } else {
                    rule.clone()
                }
            }
            other => other.clone(),
        };
        payload.insert(key.clone(), value);
    }
    Ok(payload)
}
