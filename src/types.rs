//! Rust struct definitions that ser/de to/from JSON-RPC messages.
//!
//! The `Response` shape here deviates from the letter of the JSON-RPC 2.0 spec
//! on purpose: this implementation always emits *both* the `result` and
//! `error` members, with the unused one as JSON null.  Most peers tolerate
//! that, and when parsing we accept either shape (one member present, or
//! both).
use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Re-export the enums that encode protocol constants.
///
/// No need to re-invent this wheel: the error code table and the `"2.0"`
/// version marker are exactly what we would declare ourselves.
pub use jsonrpsee_types::{error::ErrorCode, params::TwoPointZero};
pub use serde_json::Value as JsonValue;

/// Request Id
///
/// Only the shapes this client generates.  The server side never parses into
/// this type; it echoes whatever scalar the request carried (see
/// [`Response::id`]).
#[derive(Debug, PartialEq, Clone, Hash, Eq, Deserialize, Serialize, PartialOrd, Ord)]
#[serde(untagged)]
pub enum Id {
    /// Null
    Null,
    /// Numeric id
    Number(u64),
    /// String id
    Str(String),
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Id::Null => write!(f, "null"),
            Id::Number(num) => write!(f, "{}", num),
            Id::Str(string) => write!(f, "{}", string),
        }
    }
}

/// Render a wire-level response id as the string key used in the client's
/// pending-request map.
///
/// Matches [`Id`]'s `Display` output for the id shapes the client generates,
/// so a reply keyed by `1` finds the slot installed for `Id::Number(1)`.
pub fn id_key(id: &JsonValue) -> String {
    match id {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Serializable [JSON-RPC request object](https://www.jsonrpc.org/specification#request-object).
///
/// `params` is constrained by this implementation to a positional array;
/// by-name params are not supported.  `id` is always present because
/// notifications are not supported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// JSON-RPC version.
    pub jsonrpc: TwoPointZero,
    /// Name of the method to be invoked.
    pub method: String,
    /// Positional parameter values of the request.
    pub params: JsonValue,
    /// Request ID
    pub id: Id,
}

impl Request {
    /// Create a serializable JSON-RPC method call.
    pub fn new(id: Id, method: impl Into<String>, params: JsonValue) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC response object as defined in the [spec](https://www.jsonrpc.org/specification#response_object),
/// with the both-members quirk described in the module docs.
///
/// `id` is kept as a raw [`JsonValue`] so the server can echo any scalar id
/// verbatim, including ids this implementation would never generate itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// JSON-RPC version.
    pub jsonrpc: TwoPointZero,
    /// Success payload; JSON null on error responses.
    #[serde(default)]
    pub result: JsonValue,
    /// Error payload; JSON null on success responses.
    #[serde(default)]
    pub error: Option<ErrorDetails>,
    /// Request ID, echoed from the request, or null if it could not be
    /// determined.
    #[serde(default)]
    pub id: JsonValue,
}

impl Response {
    /// Create a successful response.
    pub fn success(id: JsonValue, result: JsonValue) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            result,
            error: None,
            id,
        }
    }

    /// Create an error response.
    pub fn error(id: JsonValue, error: ErrorDetails) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            result: JsonValue::Null,
            error: Some(error),
            id,
        }
    }
}

/// [JSON-RPC failed response error details](https://www.jsonrpc.org/specification#error_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Code
    pub code: ErrorCode,
    /// Message
    pub message: String,
    /// Optional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl ErrorDetails {
    pub fn new(code: ErrorCode, message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self {
            code,
            message: message.into(),
            data: data.into(),
        }
    }

    pub fn parse_error(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::ParseError, message, data)
    }
    pub fn invalid_request(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message, data)
    }
    pub fn method_not_found(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::MethodNotFound, message, data)
    }
    pub fn invalid_params(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::InvalidParams, message, data)
    }
    pub fn internal_error(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::InternalError, message, data)
    }
    pub fn server_error(code: i32, message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::ServerError(code), message, data)
    }
}
