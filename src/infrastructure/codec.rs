//! Wire codec for the telemetry protocol.
//!
//! Frames are JSON text. Outbound commands get a send-time `timestamp`
//! (ms since epoch) and a fresh `messageId`; inbound frames are only
//! surfaced when they carry both `floor` and `unit`.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::value_objects::telemetry_message::{Origin, TelemetryMessage};

/// Fields an inbound frame must carry to be forwarded.
pub const MANDATORY_FIELDS: [&str; 2] = ["floor", "unit"];

const MESSAGE_ID_SUFFIX_LEN: usize = 9;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Frame is not a JSON object")]
    NotAnObject,

    #[error("Frame is missing mandatory field '{0}'")]
    MissingField(&'static str),
}

/// Commands the client can put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundCommand {
    /// Floor/unit filter selection.
    FilterUpdate { floor: String, unit: String },
    /// Confirmation of a floor/unit selection.
    Confirmation { floor: String, unit: String },
    /// Device control request.
    DeviceControl {
        asset: String,
        status: String,
        value: Option<String>,
    },
    /// Liveness frame sent by the heartbeat.
    Heartbeat,
}

impl OutboundCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundCommand::FilterUpdate { .. } => "filter_update",
            OutboundCommand::Confirmation { .. } => "confirm",
            OutboundCommand::DeviceControl { .. } => "device_control",
            OutboundCommand::Heartbeat => "ping",
        }
    }
}

/// An encoded outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub text: String,
    /// `None` for heartbeats, which carry no correlation token.
    pub message_id: Option<String>,
}

/// Encode `command` stamped with the current time and a new message id.
pub fn encode(command: &OutboundCommand) -> EncodedFrame {
    let timestamp = chrono::Utc::now().timestamp_millis();
    let message_id = match command {
        OutboundCommand::Heartbeat => None,
        _ => Some(generate_message_id(timestamp)),
    };
    encode_at(command, timestamp, message_id)
}

/// Encode `command` with an explicit timestamp and message id.
pub fn encode_at(command: &OutboundCommand, timestamp: i64, message_id: Option<String>) -> EncodedFrame {
    let mut body = match command {
        OutboundCommand::FilterUpdate { floor, unit } => json!({
            "floor": floor,
            "unit": unit,
        }),
        OutboundCommand::Confirmation { floor, unit } => json!({
            "type": "confirm",
            "floor": floor,
            "unit": unit,
        }),
        OutboundCommand::DeviceControl { asset, status, value } => {
            let mut body = json!({
                "type": "device_control",
                "asset": asset,
                "status": status,
            });
            if let Some(value) = value {
                body["value"] = json!(value);
            }
            body
        }
        OutboundCommand::Heartbeat => json!({ "type": "ping" }),
    };

    body["timestamp"] = json!(timestamp);
    if let Some(id) = &message_id {
        body["messageId"] = json!(id);
    }

    EncodedFrame {
        text: body.to_string(),
        message_id,
    }
}

/// Encode a full message as-is (envelope fields included when present).
pub fn encode_message(message: &TelemetryMessage) -> String {
    // Serializing a struct of strings, numbers and a JSON map cannot fail.
    serde_json::to_string(message).unwrap_or_default()
}

/// Decode an inbound frame, with the reason it was rejected.
pub fn try_decode(frame: &str) -> Result<TelemetryMessage, CodecError> {
    let value: Value =
        serde_json::from_str(frame).map_err(|e| CodecError::Malformed(e.to_string()))?;

    let Value::Object(mut object) = value else {
        return Err(CodecError::NotAnObject);
    };
    let floor = take_string(&mut object, "floor").ok_or(CodecError::MissingField("floor"))?;
    let unit = take_string(&mut object, "unit").ok_or(CodecError::MissingField("unit"))?;

    // Envelope fields of an unexpected type stay in `extra`.
    let timestamp = take_if(&mut object, "timestamp", lenient_timestamp);
    let message_id = take_if(&mut object, "messageId", |v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let origin = take_if(&mut object, "origin", |v| {
        serde_json::from_value::<Origin>(v.clone()).ok()
    });

    Ok(TelemetryMessage {
        floor,
        unit,
        timestamp,
        message_id,
        origin,
        extra: object,
    })
}

fn take_string(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    match object.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            object.insert(key.to_string(), other);
            None
        }
        None => None,
    }
}

/// Remove `key` when `convert` accepts its value; otherwise leave it in place.
fn take_if<T>(
    object: &mut Map<String, Value>,
    key: &str,
    convert: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    let converted = object.get(key).and_then(convert)?;
    object.remove(key);
    Some(converted)
}

/// Milliseconds from an integer, a float (truncated) or a numeric string.
fn lenient_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
            })
        }
        _ => None,
    }
}

/// Decode an inbound frame. Rejected frames are logged and dropped, never raised.
pub fn decode(frame: &str) -> Option<TelemetryMessage> {
    match try_decode(frame) {
        Ok(message) => Some(message),
        Err(CodecError::Malformed(reason)) => {
            warn!("Dropping malformed frame ({}): {}", reason, frame);
            None
        }
        Err(e) => {
            debug!("Dropping frame: {}", e);
            None
        }
    }
}

/// Correlation token: send time plus a random suffix. Not globally unique.
pub fn generate_message_id(timestamp: i64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(MESSAGE_ID_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{}-{}", timestamp, suffix)
}
