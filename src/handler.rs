//! The code that runs in response to a method call is a "handler".
//!
//! All handlers implement [`Handler`], though most are not written by hand:
//! any async closure from a params array to a JSON result is a handler via
//! the blanket impl, and the [`rpc_method!`](crate::rpc_method) macro builds
//! such a closure from a typed signature, wiring the marshalling layer in
//! between.
use std::future::Future;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::{Result, RpcError, marshal};

/// A handler for JSON-RPC methods.
///
/// Consumes the request's params JSON and yields either a result JSON value
/// or a typed failure.  How the failure is reported to the remote peer is
/// the server engine's business (see the error taxonomy in
/// [`RpcError`]).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, params: JsonValue) -> Result<JsonValue>;
}

/// Any async function or closure of the right shape is a handler.
#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(JsonValue) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue>> + Send + 'static,
{
    async fn call(&self, params: JsonValue) -> Result<JsonValue> {
        (self)(params).await
    }
}

/// Unpack a params value into exactly `arity` positional elements.
///
/// Exposed for the [`rpc_method!`](crate::rpc_method) expansion; not
/// intended to be called directly.
#[doc(hidden)]
pub fn positional(params: JsonValue, arity: usize) -> Result<Vec<JsonValue>> {
    match params {
        JsonValue::Array(items) if items.len() == arity => Ok(items),
        JsonValue::Array(items) => Err(RpcError::invalid_params(
            "params",
            format!("expected {arity} positional parameters, got {}", items.len()),
        )),
        other => Err(RpcError::invalid_params(
            "params",
            format!(
                "positional parameter array required, got {}",
                marshal::kind_of(&other)
            ),
        )),
    }
}

/// Bind a typed handler body to the JSON-accepting [`Handler`] shape.
///
/// Given named positional parameters with their types and an optional
/// return type, the expansion verifies the params array arity, marshals
/// each element into its declared slot (failures name the parameter), runs
/// the body, and marshals the return value back to JSON:
///
/// ```
/// use linerpc::{Router, rpc_method};
///
/// let router = Router::new();
/// router.register("rpc", rpc_method!((a: i64, b: i64) -> String {
///     format!("a: {a}, b: {b}")
/// }));
/// ```
///
/// A `-> Result<T>` return lets the body fail with any
/// [`RpcError`](crate::RpcError); without an arrow the body is expected to
/// produce a raw [`JsonValue`](crate::JsonValue).  Bodies may `.await`.
#[macro_export]
macro_rules! rpc_method {
    ( ( $($arg:ident : $ty:ty),* $(,)? ) -> Result<$ret:ty> $body:block ) => {
        move |__params: $crate::JsonValue| async move {
            const __PARAM_NAMES: &[&str] = &[$(stringify!($arg)),*];
            let __args = $crate::handler::positional(__params, __PARAM_NAMES.len())?;
            #[allow(unused_mut, unused_variables)]
            let mut __slot = 0usize;
            $(
                let $arg: $ty =
                    $crate::FromParam::from_param(stringify!($arg), &__args[__slot])?;
                __slot += 1;
            )*
            let _ = (__args, __slot);
            let __out: $crate::Result<$ret> = $body;
            __out.map($crate::ToParam::to_param)
        }
    };
    ( ( $($arg:ident : $ty:ty),* $(,)? ) -> $ret:ty $body:block ) => {
        move |__params: $crate::JsonValue| async move {
            const __PARAM_NAMES: &[&str] = &[$(stringify!($arg)),*];
            let __args = $crate::handler::positional(__params, __PARAM_NAMES.len())?;
            #[allow(unused_mut, unused_variables)]
            let mut __slot = 0usize;
            $(
                let $arg: $ty =
                    $crate::FromParam::from_param(stringify!($arg), &__args[__slot])?;
                __slot += 1;
            )*
            let _ = (__args, __slot);
            let __out: $ret = $body;
            ::std::result::Result::Ok($crate::ToParam::to_param(__out))
        }
    };
    ( ( $($arg:ident : $ty:ty),* $(,)? ) $body:block ) => {
        $crate::rpc_method!( ( $($arg : $ty),* ) -> $crate::JsonValue $body )
    };
}
