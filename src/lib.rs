//! A JSON-RPC 2.0 client/server framework over pluggable byte-stream
//! transports.
//!
//! The server reads one request per CR LF terminated line from each
//! connection, dispatches it through a method registry, and writes one
//! framed reply; the client correlates in-flight requests with responses by
//! id.  A one-shot HTTP/1.0 client transport carries single calls for peers
//! that speak HTTP rather than raw streams.
//!
//! Typed handlers are declared with [`rpc_method!`], which marshals the
//! positional params array into native argument types (and the return value
//! back to JSON) via the [`FromParam`]/[`ToParam`] traits in [`marshal`].
//!
//! A deliberate wire quirk carried for compatibility: `u64` values travel
//! as their signed bit pattern, so `u64::MAX` appears as `-1` on the wire
//! and round-trips between peers applying the same rule.  See
//! [`marshal::U64String`] for the lossless alternative.

/// Re-export the exact async-trait macro we use, for compatibility
#[doc(hidden)]
pub use async_trait::async_trait;

/// Macro support; not a public API.
#[doc(hidden)]
pub use serde_json;

mod client;
mod connection;
mod error;
pub mod handler;
mod http;
pub mod marshal;
mod router;
mod server;
#[cfg(test)]
pub mod testing;
mod transport;
mod types;

pub use client::{CallResponse, Client};
pub use error::{Result, RpcError};
pub use handler::Handler;
pub use http::{HttpClient, HttpClientConfig, HttpMethod};
pub use marshal::{FromParam, ToParam, U64String};
pub use router::Router;
pub use server::{IntoListenAddrs, ListenAddr, Server, ServerConfig};
pub use transport::{CrlfCodec, CrlfCodecError, DEFAULT_MAX_FRAME_BYTES, Peer, Transport};
pub use types::{ErrorCode, ErrorDetails, Id, JsonValue, Request, Response, TwoPointZero};
