use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::sync::transport::TransportError;

/// Bot configuration as the panel edits it: field name to string value.
pub type ConfigMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct StatusResponse {
    pub running: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct OutputResponse {
    #[serde(default)]
    pub output: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct InputRequest<'a> {
    pub input: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct InputAck {
    #[serde(default)]
    pub status: Option<String>,
}

impl InputAck {
    pub fn accepted() -> Self {
        Self {
            status: Some("ok".to_string()),
        }
    }

    /// The server answers 2xx with `not_running` when no bot process takes the line.
    pub fn is_not_running(&self) -> bool {
        self.status.as_deref() == Some("not_running")
    }
}

/// Remote control endpoints of the bot server.
#[async_trait]
pub trait BotApi: Send + Sync {
    /// Raw config document; shape is checked by [`config_from_json`].
    async fn get_config(&self) -> Result<Value, TransportError>;

    async fn save_config(&self, config: &ConfigMap) -> Result<(), TransportError>;

    async fn get_status(&self) -> Result<StatusResponse, TransportError>;

    async fn start(&self) -> Result<(), TransportError>;

    async fn stop(&self) -> Result<(), TransportError>;

    async fn get_output(&self) -> Result<OutputResponse, TransportError>;

    async fn send_input(&self, input: &str) -> Result<InputAck, TransportError>;
}

/// Coerces a config document into a [`ConfigMap`].
///
/// Scalars are stringified and `null` becomes an empty value. Nested values are
/// kept as their JSON text. Returns `None` when the document is not an object.
pub fn config_from_json(value: Value) -> Option<ConfigMap> {
    let Value::Object(fields) = value else {
        return None;
    };
    Some(
        fields
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s,
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect(),
    )
}

/// Best-effort extraction of an `error` message from a response body.
pub fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .get("error")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|msg| !msg.is_empty())
        .map(str::to_string)
}
