//! Helpers for testing the JSON RPC implementation.
//!
//! This module is only compiled when `test` is enabled
use tokio::io::duplex;
use tokio_util::codec::Framed;

use crate::{CrlfCodec, Transport};

/// Initialize tracing with a subscriber and some reasonable defaults
/// suitable for enabling log output in tests.
///
/// This is idempotent; it can be called from multiple tests in multiple
/// threads but will only initialize tracing once.
pub fn init_test_logging() {
    use std::sync::OnceLock;

    const DEFAULT_LOG_FILTER: &str = "debug";
    static INIT_LOGGING: OnceLock<()> = OnceLock::new();

    INIT_LOGGING.get_or_init(|| {
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
            .with_test_writer()
            .try_init()
            .unwrap()
    });
}

/// Create a pair of connected [`Transport`] implementations, suitable for
/// hooking up a client and a server without a real socket.
///
/// Return value is a tuple, `(client_transport, server_transport)`.
pub fn channel_pair() -> (impl Transport, impl Transport) {
    // A pair of connected in-memory pipes serves as the byte stream, framed
    // with the same codec the TCP binding uses
    let (client, server) = duplex(64 * 1024);

    let client_transport = Framed::new(client, CrlfCodec::new());
    let server_transport = Framed::new(server, CrlfCodec::new());

    (client_transport, server_transport)
}
