use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{FrameError, Result};

/// The only protocol version accepted on the wire.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i64 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i64 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i64 = -32603;

/// Marker for the `"jsonrpc": "2.0"` member.
///
/// Serializes to the literal version string and refuses anything else.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Version;

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(JSONRPC_VERSION)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let version = String::deserialize(deserializer)?;
        if version == JSONRPC_VERSION {
            Ok(Version)
        } else {
            Err(serde::de::Error::custom(format!(
                "unsupported jsonrpc version '{version}'"
            )))
        }
    }
}

/// Request identifier: a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<i32> for RequestId {
    fn from(id: i32) -> Self {
        RequestId::Number(i64::from(id))
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

/// Keeps an explicit `null` as `Some(Value::Null)`; only an absent member is `None`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

fn structured_params(params: Option<&Value>) -> Result<()> {
    match params {
        None | Some(Value::Null) | Some(Value::Object(_)) | Some(Value::Array(_)) => Ok(()),
        Some(_) => Err(FrameError::malformed(
            "\"params\" must be an object or an array",
        )),
    }
}

/// A request that expects a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: Version,
    pub id: RequestId,
    pub method: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub params: Option<Value>,
}

/// A one-way message without an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: Version,
    pub method: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub params: Option<Value>,
}

/// A successful response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: Version,
    pub id: RequestId,
    pub result: Value,
}

/// The `error` member of an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
}

/// An error response. `id` is `null` when the peer could not read the request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub jsonrpc: Version,
    pub id: Option<RequestId>,
    pub error: ErrorObject,
}

/// Any JSON-RPC envelope carried by the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
    Error(ErrorResponse),
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Request,
    Notification,
    Response,
    Error,
}

impl Message {
    /// Build a request.
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Request(Request {
            jsonrpc: Version,
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    /// Build a notification.
    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Notification(Notification {
            jsonrpc: Version,
            method: method.into(),
            params,
        })
    }

    /// Build a successful response.
    pub fn response(id: impl Into<RequestId>, result: Value) -> Self {
        Message::Response(Response {
            jsonrpc: Version,
            id: id.into(),
            result,
        })
    }

    /// Build an error response.
    pub fn error(
        id: Option<RequestId>,
        code: i64,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Message::Error(ErrorResponse {
            jsonrpc: Version,
            id,
            error: ErrorObject {
                code,
                message: message.into(),
                data,
            },
        })
    }

    /// The request id, if this envelope carries one.
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Message::Request(req) => Some(&req.id),
            Message::Response(resp) => Some(&resp.id),
            Message::Error(err) => err.id.as_ref(),
            Message::Notification(_) => None,
        }
    }

    /// The method name for requests and notifications.
    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(req) => Some(&req.method),
            Message::Notification(note) => Some(&note.method),
            _ => None,
        }
    }

    /// Short variant name, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Notification(_) => "notification",
            Message::Response(_) => "response",
            Message::Error(_) => "error",
        }
    }

    /// Check the rules that decoding enforces but construction cannot.
    ///
    /// Run before encoding so nothing goes on the wire that the other side
    /// would reject as malformed.
    pub fn validate(&self) -> Result<()> {
        match self {
            Message::Request(req) => structured_params(req.params.as_ref()),
            Message::Notification(note) => structured_params(note.params.as_ref()),
            Message::Response(_) | Message::Error(_) => Ok(()),
        }
    }

    /// Validate a parsed JSON value against the four envelope shapes.
    pub fn from_value(value: Value) -> Result<Self> {
        let shape = match &value {
            Value::Object(map) => classify(map)?,
            _ => return Err(FrameError::malformed("expected a JSON object")),
        };

        let message = match shape {
            Shape::Request => serde_json::from_value(value).map(Message::Request),
            Shape::Notification => serde_json::from_value(value).map(Message::Notification),
            Shape::Response => serde_json::from_value(value).map(Message::Response),
            Shape::Error => serde_json::from_value(value).map(Message::Error),
        };
        message.map_err(|err| FrameError::malformed(err.to_string()))
    }
}

fn classify(map: &Map<String, Value>) -> Result<Shape> {
    match map.get("jsonrpc") {
        Some(Value::String(v)) if v == JSONRPC_VERSION => {}
        Some(other) => {
            return Err(FrameError::malformed(format!(
                "unsupported jsonrpc version {other}"
            )))
        }
        None => return Err(FrameError::malformed("missing \"jsonrpc\" member")),
    }

    if map.contains_key("method") {
        structured_params(map.get("params"))?;
        return Ok(if map.contains_key("id") {
            Shape::Request
        } else {
            Shape::Notification
        });
    }

    if !map.contains_key("id") {
        return Err(FrameError::malformed(
            "envelope has neither \"method\" nor \"id\"",
        ));
    }

    match (map.contains_key("result"), map.contains_key("error")) {
        (true, false) => Ok(Shape::Response),
        (false, true) => Ok(Shape::Error),
        (true, true) => Err(FrameError::malformed(
            "response carries both \"result\" and \"error\"",
        )),
        (false, false) => Err(FrameError::malformed(
            "response carries neither \"result\" nor \"error\"",
        )),
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Message::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Message::Request(req)
    }
}

impl From<Notification> for Message {
    fn from(note: Notification) -> Self {
        Message::Notification(note)
    }
}

impl From<Response> for Message {
    fn from(resp: Response) -> Self {
        Message::Response(resp)
    }
}

impl From<ErrorResponse> for Message {
    fn from(err: ErrorResponse) -> Self {
        Message::Error(err)
    }
}
