//! Wire message model and JSON codec for the ws-wrapper protocol.
//!
//! This crate owns the wire representation shared by the `ws-wrapper` engine
//! and the `wsw` CLI. Messages travel as compact JSON objects whose one-letter
//! keys keep frames small:
//!
//! | key   | present on              | meaning                                  |
//! |-------|-------------------------|------------------------------------------|
//! | `e`   | emit, request           | event name                               |
//! | `c`   | emit, request           | channel name (absent for default scope)  |
//! | `d`   | emit, request, resolve  | argument array / resolved payload        |
//! | `i`   | request, resolve, reject| positive request id                      |
//! | `err` | reject                  | rejection payload                        |
//! | `_`   | reject                  | `1` when `err` is an error object        |
//!
//! There is no type tag. The decoder classifies a frame purely by which of
//! `e`, `i` and `err` are present.

use serde::Serialize;
use serde_json::{Map, Value};

/// Request identifier. Positive, assigned by the requesting side.
pub type RequestId = u64;

/// Error key carrying the human-readable message of an error payload.
pub const ERROR_MESSAGE: &str = "message";

/// Error key carrying the grepable code of a typed error.
pub const ERROR_CODE: &str = "code";

/// Error returned by [`decode_message`]. This is the "malformed message"
/// condition: receivers drop such frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The text is not valid JSON.
    #[error("failed to parse message json: {0}")]
    Json(#[from] serde_json::Error),
    /// The text is JSON but not an object.
    #[error("message is not a JSON object")]
    NotAnObject,
    /// A known key is present with the wrong type.
    #[error("invalid `{field}` field: {reason}")]
    InvalidField { field: &'static str, reason: &'static str },
    /// The object matches none of the four message shapes.
    #[error("message matches no known shape")]
    UnknownShape,
}

// =============================================================================
// ERROR PAYLOADS
// =============================================================================

/// Grepable error code for typed errors that cross the wire.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

/// Which error fields a peer serializes when rejecting with an error object.
///
/// Browser peers historically send every own property (including `stack`),
/// server peers only `message`. Both decode the same way.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorFields {
    /// Serialize `message` only.
    #[default]
    MessageOnly,
    /// Serialize `message` plus every extra field.
    All,
}

/// An error object carried by a reject frame.
#[derive(Debug, Clone, Default, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ErrorPayload {
    pub message: String,
    /// Extra fields beyond `message`, e.g. `code` or `stack`.
    pub fields: Map<String, Value>,
}

impl ErrorPayload {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), fields: Map::new() }
    }

    /// Build a payload from a typed error, recording its code.
    pub fn from_error(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::new(err.to_string()).with_field(ERROR_CODE, err.error_code())
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != ERROR_MESSAGE {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// The `code` field, if one was recorded.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.fields.get(ERROR_CODE).and_then(Value::as_str)
    }

    fn to_value(&self, policy: ErrorFields) -> Value {
        let mut out = Map::new();
        out.insert(ERROR_MESSAGE.into(), Value::String(self.message.clone()));
        if policy == ErrorFields::All {
            for (k, v) in &self.fields {
                out.insert(k.clone(), v.clone());
            }
        }
        Value::Object(out)
    }

    fn from_object(mut obj: Map<String, Value>) -> Self {
        let message = match obj.remove(ERROR_MESSAGE) {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Self { message, fields: obj }
    }
}

/// Payload of a reject frame.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Rejection {
    /// An error object (`_` marker set on the wire).
    #[error("{0}")]
    Error(ErrorPayload),
    /// Arbitrary data. `Value::Null` stands for "no reason given".
    #[error("{0}")]
    Value(Value),
}

impl Rejection {
    /// Reject with a plain error carrying only a message.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload::new(message))
    }

    #[must_use]
    pub fn is_error_instance(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Message of an error rejection; `None` for data rejections.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Error(payload) => Some(&payload.message),
            Self::Value(_) => None,
        }
    }
}

impl From<ErrorPayload> for Rejection {
    fn from(payload: ErrorPayload) -> Self {
        Self::Error(payload)
    }
}

// =============================================================================
// MESSAGE
// =============================================================================

/// A single message on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Fire-and-forget event.
    Emit { event: String, channel: Option<String>, data: Vec<Value> },
    /// Event expecting exactly one resolve or reject carrying `id`.
    Request { event: String, channel: Option<String>, data: Vec<Value>, id: RequestId },
    /// Success reply. `None` means no payload (as opposed to `null`).
    Resolve { id: RequestId, data: Option<Value> },
    /// Failure reply.
    Reject { id: RequestId, error: Rejection },
}

impl Message {
    /// Request id for request, resolve and reject messages.
    #[must_use]
    pub fn id(&self) -> Option<RequestId> {
        match self {
            Self::Emit { .. } => None,
            Self::Request { id, .. } | Self::Resolve { id, .. } | Self::Reject { id, .. } => Some(*id),
        }
    }

    /// Event name for emit and request messages.
    #[must_use]
    pub fn event(&self) -> Option<&str> {
        match self {
            Self::Emit { event, .. } | Self::Request { event, .. } => Some(event),
            Self::Resolve { .. } | Self::Reject { .. } => None,
        }
    }

    /// Short lowercase kind name, used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Emit { .. } => "emit",
            Self::Request { .. } => "request",
            Self::Resolve { .. } => "resolve",
            Self::Reject { .. } => "reject",
        }
    }
}

// =============================================================================
// ENCODE
// =============================================================================

#[derive(Serialize)]
#[serde(untagged)]
enum WirePayload<'a> {
    Args(&'a [Value]),
    Value(&'a Value),
}

#[derive(Serialize, Default)]
struct WireMessage<'a> {
    #[serde(rename = "e", skip_serializing_if = "Option::is_none")]
    event: Option<&'a str>,
    #[serde(rename = "c", skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    #[serde(rename = "d", skip_serializing_if = "Option::is_none")]
    data: Option<WirePayload<'a>>,
    #[serde(rename = "i", skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
    #[serde(rename = "err", skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
    #[serde(rename = "_", skip_serializing_if = "Option::is_none")]
    error_marker: Option<u8>,
}

fn args_payload(data: &[Value]) -> Option<WirePayload<'_>> {
    if data.is_empty() { None } else { Some(WirePayload::Args(data)) }
}

fn channel_field(channel: Option<&String>) -> Option<&str> {
    channel.map(String::as_str).filter(|c| !c.is_empty())
}

/// Encode a message into its JSON wire text.
#[must_use]
pub fn encode_message(message: &Message, error_fields: ErrorFields) -> String {
    let wire = match message {
        Message::Emit { event, channel, data } => WireMessage {
            event: Some(event),
            channel: channel_field(channel.as_ref()),
            data: args_payload(data),
            ..WireMessage::default()
        },
        Message::Request { event, channel, data, id } => WireMessage {
            event: Some(event),
            channel: channel_field(channel.as_ref()),
            data: args_payload(data),
            id: Some(*id),
            ..WireMessage::default()
        },
        Message::Resolve { id, data } => WireMessage {
            data: data.as_ref().map(WirePayload::Value),
            id: Some(*id),
            ..WireMessage::default()
        },
        Message::Reject { id, error } => {
            let (error, error_marker) = match error {
                Rejection::Error(payload) => (payload.to_value(error_fields), Some(1)),
                Rejection::Value(value) => (value.clone(), None),
            };
            WireMessage { id: Some(*id), error: Some(error), error_marker, ..WireMessage::default() }
        }
    };

    // Serializing string-keyed maps and JSON values cannot fail.
    serde_json::to_string(&wire).unwrap_or_default()
}

// =============================================================================
// DECODE
// =============================================================================

/// Decode JSON wire text into a message.
///
/// # Errors
///
/// Returns [`CodecError`] when the text is not JSON, not an object, has a
/// known key with the wrong type, or matches none of the message shapes.
pub fn decode_message(text: &str) -> Result<Message, CodecError> {
    let Value::Object(mut obj) = serde_json::from_str::<Value>(text)? else {
        return Err(CodecError::NotAnObject);
    };

    let event = take_event(&mut obj)?;
    let id = take_id(&mut obj)?;

    match (event, id) {
        (Some(event), id) => {
            let channel = take_channel(&mut obj)?;
            let data = take_args(&mut obj)?;
            Ok(match id {
                None => Message::Emit { event, channel, data },
                Some(id) => Message::Request { event, channel, data, id },
            })
        }
        (None, Some(id)) => match obj.remove("err") {
            Some(error) => {
                let marked = obj.get("_").is_some_and(is_truthy);
                Ok(Message::Reject { id, error: rejection_from_wire(error, marked) })
            }
            None => Ok(Message::Resolve { id, data: obj.remove("d") }),
        },
        (None, None) => Err(CodecError::UnknownShape),
    }
}

fn take_event(obj: &mut Map<String, Value>) -> Result<Option<String>, CodecError> {
    match obj.remove("e") {
        None => Ok(None),
        Some(Value::String(event)) => Ok(Some(event)),
        Some(_) => Err(CodecError::InvalidField { field: "e", reason: "expected string" }),
    }
}

fn take_id(obj: &mut Map<String, Value>) -> Result<Option<RequestId>, CodecError> {
    let Some(raw) = obj.remove("i") else {
        return Ok(None);
    };
    match raw.as_u64() {
        Some(id) if id > 0 => Ok(Some(id)),
        _ => Err(CodecError::InvalidField { field: "i", reason: "expected positive integer" }),
    }
}

/// An empty name is kept as-is; no channel can carry it, so a request on it
/// is answered as an unknown channel.
fn take_channel(obj: &mut Map<String, Value>) -> Result<Option<String>, CodecError> {
    match obj.remove("c") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(channel)) => Ok(Some(channel)),
        Some(_) => Err(CodecError::InvalidField { field: "c", reason: "expected string" }),
    }
}

fn take_args(obj: &mut Map<String, Value>) -> Result<Vec<Value>, CodecError> {
    match obj.remove("d") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(args)) => Ok(args),
        Some(_) => Err(CodecError::InvalidField { field: "d", reason: "expected argument array" }),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn rejection_from_wire(error: Value, marked: bool) -> Rejection {
    match error {
        Value::Object(obj) if marked => Rejection::Error(ErrorPayload::from_object(obj)),
        other => Rejection::Value(other),
    }
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
