use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Which side of the connection produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Client,
    Server,
}

/// A floor/unit scoped telemetry message, in either direction.
///
/// `floor` and `unit` are mandatory on the wire; everything else is optional.
/// Extra fields of a server push are kept in `extra` so consumers can read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryMessage {
    pub floor: String,
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Client-generated correlation token, for logs only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<Origin>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TelemetryMessage {
    pub fn new(floor: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            floor: floor.into(),
            unit: unit.into(),
            timestamp: None,
            message_id: None,
            origin: None,
            extra: Map::new(),
        }
    }

    /// Messages without an explicit origin come from the server.
    pub fn is_server_origin(&self) -> bool {
        !matches!(self.origin, Some(Origin::Client))
    }

    /// Numeric metric values pushed by the server under `metrics`, keyed by metric title.
    pub fn metric_values(&self) -> Vec<(String, f64)> {
        match self.extra.get("metrics") {
            Some(Value::Object(metrics)) => metrics
                .iter()
                .filter_map(|(title, value)| value.as_f64().map(|v| (title.clone(), v)))
                .collect(),
            _ => Vec::new(),
        }
    }
}
