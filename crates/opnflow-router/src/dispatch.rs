//! Outbound calls to agent endpoints.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Number, Value};
use tracing::{debug, error};

use crate::error::RouterError;

/// Sends a built payload to an agent endpoint.
///
/// Implementations never retry; a failed call is reported once.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        endpoint: &str,
        payload: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, RouterError>;
}

/// Dispatcher POSTing JSON over HTTP.
pub struct HttpDispatcher {
    inner: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new() -> Self {
        Self {
            inner: reqwest::Client::new(),
        }
    }
}

impl Default for HttpDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Dispatcher for HttpDispatcher {
    async fn dispatch(
        &self,
        endpoint: &str,
        payload: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value, RouterError> {
        debug!(endpoint = %endpoint, timeout_secs = timeout.as_secs(), "Dispatching");

        let response = self
            .inner
            .post(endpoint)
            .json(payload)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                error!(endpoint = %endpoint, error = %e, "Agent call failed");
                if e.is_timeout() {
                    RouterError::Dispatch(format!(
                        "Agent call timed out after {}s",
                        timeout.as_secs_f64()
                    ))
                } else {
                    RouterError::Dispatch(format!("HTTP error: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            error!(endpoint = %endpoint, %status, "Agent returned an error status");
            return Err(RouterError::Dispatch(format!(
                "Agent returned HTTP {}: {}",
                status.as_u16(),
                snippet.trim()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| RouterError::Dispatch(format!("Invalid agent response: {e}")))?;
        Ok(normalize_response(body))
    }
}

/// Convert a response to plain scalars: integral floats that fit in `i64`
/// become integers and non-finite numbers become `null`, recursively.
pub fn normalize_response(value: Value) -> Value {
    match value {
        Value::Number(n) => normalize_number(n),
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_response).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, normalize_response(v)))
                .collect(),
        ),
        other => other,
    }
}

fn normalize_number(n: Number) -> Value {
    if !n.is_f64() {
        return Value::Number(n);
    }
    let Some(f) = n.as_f64().filter(|f| f.is_finite()) else {
        return Value::Null;
    };
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        return Value::from(f as i64);
    }
    Value::Number(n)
}
