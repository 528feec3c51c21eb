use thiserror::Error;

use crate::types::ErrorDetails;

pub type Result<T, E = RpcError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Error parsing JSON")]
    ParseJson { source: serde_json::Error, json: String },
    #[error("Error serializing request {type_name} to JSON")]
    SerRequest {
        source: serde_json::Error,
        type_name: &'static str,
    },
    #[error("Error serializing response {type_name} to JSON")]
    SerResponse {
        source: serde_json::Error,
        type_name: &'static str,
    },
    #[error("Invalid parameter '{param}': {reason}")]
    InvalidParams { param: String, reason: String },
    #[error("Method call failed with error {}: {}", error.code.code(), error.message)]
    Rpc { error: ErrorDetails },
    #[error("{message}")]
    Internal { message: String },
    #[error("Transport error")]
    Transport {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
    #[error("Operation canceled because the connection closed before a response was received")]
    ConnectionClosed,
    #[error("No endpoints resolved for '{spec}'")]
    AddressUnresolvable { spec: String },
    #[error("Unable to bind any listening endpoint")]
    Bind { source: std::io::Error },
    #[error("HTTP exchange failed: {reason}")]
    Http { reason: String },
    #[error("Timed out reading {phase}")]
    Timeout { phase: &'static str },
}

impl RpcError {
    /// Marshalling failure for a named argument; the server maps this to
    /// wire code -32602.
    pub fn invalid_params(param: impl Into<String>, reason: impl Into<String>) -> Self {
        RpcError::InvalidParams {
            param: param.into(),
            reason: reason.into(),
        }
    }

    /// A handler-raised RPC error.  The (code, message, data) triple is
    /// propagated to the remote peer verbatim.
    pub fn rpc(code: i32, message: impl Into<String>, data: impl Into<Option<crate::JsonValue>>) -> Self {
        RpcError::Rpc {
            error: ErrorDetails::new(code.into(), message, data),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        RpcError::Internal {
            message: message.into(),
        }
    }

    pub fn transport(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        RpcError::Transport {
            source: Box::new(source),
        }
    }
}

/// Any error a handler can fail with must be representable on the wire as a
/// JSON-RPC error object.
///
/// Note that this is sent to the remote peer, so everything that isn't an
/// explicit RPC error or a marshalling failure is masked behind the generic
/// -32000 message.  The real failure is for the logs only.
impl From<RpcError> for ErrorDetails {
    fn from(val: RpcError) -> Self {
        match val {
            RpcError::ParseJson { .. } => ErrorDetails::parse_error("Invalid JSON", None),
            RpcError::InvalidParams { param, reason } => {
                ErrorDetails::invalid_params(format!("Invalid parameter '{param}': {reason}"), None)
            }
            RpcError::Rpc { error } => error,
            RpcError::SerRequest { .. }
            | RpcError::SerResponse { .. }
            | RpcError::Internal { .. }
            | RpcError::Transport { .. }
            | RpcError::ConnectionClosed
            | RpcError::AddressUnresolvable { .. }
            | RpcError::Bind { .. }
            | RpcError::Http { .. }
            | RpcError::Timeout { .. } => {
                ErrorDetails::server_error(-32000, "Error: Unknown error occurred", None)
            }
        }
    }
}

/// Try to make something useful from a panic payload for logging purposes
///
/// Informed by tokio's internal `panic_payload_as_str` which only bothers
/// with `String` and `&'static str` panics.
pub(crate) fn panic_err_to_string(err: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = err.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        format!("Panic of type {}", std::any::type_name_of_val(&*err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ErrorCode;
    use serde_json::json;

    #[test]
    fn invalid_params_maps_to_32602_and_names_the_argument() {
        let err = RpcError::invalid_params("a", "expected int, got string");
        let details: ErrorDetails = err.into();
        assert_eq!(details.code, ErrorCode::InvalidParams);
        assert!(details.message.contains("'a'"));
        assert!(details.message.contains("expected int"));
    }

    #[test]
    fn rpc_errors_propagate_verbatim() {
        let err = RpcError::rpc(-32042, "custom failure", json!({"k": 1}));
        let details: ErrorDetails = err.into();
        assert_eq!(details.code.code(), -32042);
        assert_eq!(details.message, "custom failure");
        assert_eq!(details.data, Some(json!({"k": 1})));
    }

    #[test]
    fn everything_else_is_masked() {
        for err in [
            RpcError::internal("secret database password is hunter2"),
            RpcError::ConnectionClosed,
            RpcError::Timeout { phase: "response body" },
        ] {
            let details: ErrorDetails = err.into();
            assert_eq!(details.code.code(), -32000);
            assert_eq!(details.message, "Error: Unknown error occurred");
        }
    }

    #[test]
    fn panic_payload_formatting() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_err_to_string(payload), "boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new("boom".to_string());
        assert_eq!(panic_err_to_string(payload), "boom");
    }
}
