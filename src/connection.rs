//! The per-connection server engine: reads one request per line, validates
//! it against the protocol rules, dispatches to the registered handler, and
//! writes exactly one framed reply.
//!
//! Handler failures of any stripe are recovered here and turned into error
//! responses; only transport failures terminate the connection.
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde_json::{Value as JsonValue, json};

use crate::error::panic_err_to_string;
use crate::router::Router;
use crate::transport::Peer;
use crate::types::{ErrorDetails, Response};
use crate::{Result, RpcError};

/// Service a single connection until the peer disconnects, sends an empty
/// line, or the transport fails.
///
/// Requests are processed strictly sequentially: each handler is awaited
/// before the next line is read, so replies go out in arrival order.
pub(crate) async fn drive(router: Router, mut peer: Peer) -> Result<()> {
    loop {
        let line = match peer.receive_message().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!("peer closed the connection");
                return Ok(());
            }
            Err(e) => {
                tracing::error!(error = %e, "error receiving request");
                return Err(e);
            }
        };

        if line.is_empty() {
            tracing::debug!("empty line received, closing connection");
            return Ok(());
        }

        let response = process_line(&router, &line).await;
        let text = serde_json::to_string(&response).map_err(|e| RpcError::SerResponse {
            source: e,
            type_name: std::any::type_name::<Response>(),
        })?;
        peer.send_message(text).await?;
    }
}

/// Validate one request line and produce the one response it earns.
///
/// The validation order is part of the protocol contract: parse, then id,
/// then version, then method.  A request that fails an early step is
/// reported against that step even if later steps would also fail.
async fn process_line(router: &Router, line: &str) -> Response {
    let request: JsonValue = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            tracing::debug!(error = %e, "request was not valid JSON");
            return Response::error(
                JsonValue::Null,
                ErrorDetails::parse_error("Invalid JSON", None),
            );
        }
    };

    // The id is echoed verbatim in everything from here on
    let id = match request.get("id") {
        Some(id) => id.clone(),
        None => {
            return Response::error(
                JsonValue::Null,
                ErrorDetails::invalid_request("No id specified", None),
            );
        }
    };

    if request.get("jsonrpc").and_then(JsonValue::as_str) != Some("2.0") {
        return Response::error(id, ErrorDetails::invalid_request("JSON 2.0 required", None));
    }

    let method = match request.get("method").and_then(JsonValue::as_str) {
        Some(method) => method,
        None => {
            return Response::error(id, ErrorDetails::invalid_request("No method requested", None));
        }
    };

    let handler = match router.lookup(method) {
        Some(handler) => handler,
        None => {
            return Response::error(
                id,
                ErrorDetails::method_not_found(
                    "Method not found",
                    json!(format!("{method} is not a registered method.")),
                ),
            );
        }
    };

    let params = request.get("params").cloned().unwrap_or(JsonValue::Null);

    // Handlers are arbitrary user code; a panic must not take the
    // connection down with it.
    match AssertUnwindSafe(handler.call(params)).catch_unwind().await {
        Ok(Ok(result)) => Response::success(id, result),
        Ok(Err(e)) => {
            if !matches!(e, RpcError::InvalidParams { .. } | RpcError::Rpc { .. }) {
                tracing::error!(method, error = %e, "method handler failed");
            }
            Response::error(id, e.into())
        }
        Err(panic) => {
            tracing::error!(method, panic = %panic_err_to_string(panic), "method handler panicked");
            Response::error(
                id,
                ErrorDetails::server_error(-32000, "Error: Unknown error occurred", None),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc_method;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn test_router() -> Router {
        let router = Router::new();
        router.register("echo", |params: JsonValue| async move { Ok(params) });
        router.register("add", rpc_method!((a: i64, b: i64) -> i64 { a + b }));
        router.register(
            "explode",
            rpc_method!(() -> Result<JsonValue> {
                Err(RpcError::internal("wires crossed"))
            }),
        );
        router
    }

    async fn process(line: &str) -> JsonValue {
        let router = test_router();
        let response = process_line(&router, line).await;
        serde_json::to_value(&response).unwrap()
    }

    #[tokio::test]
    async fn well_formed_request_gets_result() {
        let reply = process(r#"{"jsonrpc":"2.0","method":"add","params":[40,2],"id":9}"#).await;
        assert_eq!(reply["result"], json!(42));
        assert_eq!(reply["error"], JsonValue::Null);
        assert_eq!(reply["id"], json!(9));
    }

    #[tokio::test]
    async fn invalid_json_is_32700_with_null_id() {
        let reply = process(r#"{field: 2, "field: 3}"#).await;
        assert_eq!(reply["error"]["code"], json!(-32700));
        assert_eq!(reply["error"]["message"], "Invalid JSON");
        assert_eq!(reply["id"], JsonValue::Null);
    }

    #[tokio::test]
    async fn missing_id_is_32600_with_null_id() {
        let reply = process(r#"{"jsonrpc":"2.0","method":"echo","params":[]}"#).await;
        assert_eq!(reply["error"]["code"], json!(-32600));
        assert_eq!(reply["error"]["message"], "No id specified");
        assert_eq!(reply["id"], JsonValue::Null);
    }

    #[tokio::test]
    async fn wrong_version_is_32600_with_request_id() {
        let reply = process(r#"{"jsonrpc":"1.0","method":"echo","params":[],"id":3}"#).await;
        assert_eq!(reply["error"]["code"], json!(-32600));
        assert_eq!(reply["error"]["message"], "JSON 2.0 required");
        assert_eq!(reply["id"], json!(3));

        // Absent version fails the same way
        let reply = process(r#"{"method":"echo","params":[],"id":4}"#).await;
        assert_eq!(reply["error"]["message"], "JSON 2.0 required");
    }

    #[tokio::test]
    async fn missing_method_is_32600_with_request_id() {
        let reply = process(r#"{"jsonrpc":"2.0","params":[],"id":5}"#).await;
        assert_eq!(reply["error"]["code"], json!(-32600));
        assert_eq!(reply["error"]["message"], "No method requested");
        assert_eq!(reply["id"], json!(5));
    }

    #[tokio::test]
    async fn unknown_method_is_32601_with_data() {
        let reply = process(r#"{"jsonrpc":"2.0","method":"phantomRpc","params":[],"id":7}"#).await;
        assert_eq!(reply["error"]["code"], json!(-32601));
        assert_eq!(reply["error"]["message"], "Method not found");
        assert_eq!(reply["error"]["data"], "phantomRpc is not a registered method.");
        assert_eq!(reply["id"], json!(7));
    }

    #[tokio::test]
    async fn bad_params_are_32602_naming_the_argument() {
        let reply = process(r#"{"jsonrpc":"2.0","method":"add","params":["abc",1],"id":8}"#).await;
        assert_eq!(reply["error"]["code"], json!(-32602));
        let message = reply["error"]["message"].as_str().unwrap();
        assert!(message.contains("'a'"), "message should name the parameter: {message}");
    }

    #[tokio::test]
    async fn absent_params_fail_arity_not_the_ladder() {
        let reply = process(r#"{"jsonrpc":"2.0","method":"add","id":10}"#).await;
        assert_eq!(reply["error"]["code"], json!(-32602));
    }

    #[tokio::test]
    async fn handler_failures_are_masked_to_32000() {
        let reply = process(r#"{"jsonrpc":"2.0","method":"explode","params":[],"id":11}"#).await;
        assert_eq!(reply["error"]["code"], json!(-32000));
        assert_eq!(reply["error"]["message"], "Error: Unknown error occurred");
        // Nothing about crossed wires reaches the peer
        assert!(!reply.to_string().contains("wires"));
    }

    #[tokio::test]
    async fn handler_panics_are_masked_to_32000() {
        async fn kaboom(_params: JsonValue) -> crate::Result<JsonValue> {
            panic!("blew a fuse")
        }

        let router = test_router();
        router.register("kaboom", kaboom);

        let response = process_line(
            &router,
            r#"{"jsonrpc":"2.0","method":"kaboom","params":[],"id":12}"#,
        )
        .await;
        let reply = serde_json::to_value(&response).unwrap();
        assert_eq!(reply["error"]["code"], json!(-32000));
        assert_eq!(reply["error"]["message"], "Error: Unknown error occurred");
    }

    #[tokio::test]
    async fn connection_survives_handler_failure() {
        use crate::testing;
        use crate::transport::Transport as _;

        let (mut client, server) = testing::channel_pair();
        let task = tokio::spawn(drive(test_router(), Peer::new(server)));

        client
            .send_message(r#"{"jsonrpc":"2.0","method":"explode","params":[],"id":1}"#.to_string())
            .await
            .unwrap();
        let reply: JsonValue =
            serde_json::from_str(&client.receive_message().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["error"]["code"], json!(-32000));

        // Same connection, next request succeeds
        client
            .send_message(r#"{"jsonrpc":"2.0","method":"add","params":[1,2],"id":2}"#.to_string())
            .await
            .unwrap();
        let reply: JsonValue =
            serde_json::from_str(&client.receive_message().await.unwrap().unwrap()).unwrap();
        assert_eq!(reply["result"], json!(3));
        assert_eq!(reply["id"], json!(2));

        // Empty line closes the connection cleanly
        client.send_message(String::new()).await.unwrap();
        assert_matches!(task.await.unwrap(), Ok(()));
    }
}
