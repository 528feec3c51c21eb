//! The TCP-facing server: resolves and binds listening endpoints, accepts
//! connections, and runs the engine over each of them.
use std::net::SocketAddr;

use tokio::net::{TcpListener, lookup_host};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::connection;
use crate::handler::Handler;
use crate::router::Router;
use crate::transport::{CrlfCodec, DEFAULT_MAX_FRAME_BYTES, Peer, Transport};
use crate::{Result, RpcError};

/// Knobs for the server.  The defaults are the protocol limits.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum accepted request line length.  Lines beyond this fail the
    /// connection rather than producing an error reply.
    pub max_request_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_request_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// A listening endpoint in one of the accepted input shapes.
#[derive(Debug, Clone)]
pub enum ListenAddr {
    /// A `"host:port"` string, resolved at bind time.
    Spec(String),
    /// A `(host, port)` pair, resolved at bind time.
    HostPort(String, u16),
    /// Already resolved; used as-is.
    Resolved(SocketAddr),
}

/// Conversion of the caller's address inputs into a list of endpoints to
/// resolve and bind.
pub trait IntoListenAddrs {
    fn into_listen_addrs(self) -> Vec<ListenAddr>;
}

impl IntoListenAddrs for ListenAddr {
    fn into_listen_addrs(self) -> Vec<ListenAddr> {
        vec![self]
    }
}

impl IntoListenAddrs for &str {
    fn into_listen_addrs(self) -> Vec<ListenAddr> {
        vec![ListenAddr::Spec(self.to_string())]
    }
}

impl IntoListenAddrs for String {
    fn into_listen_addrs(self) -> Vec<ListenAddr> {
        vec![ListenAddr::Spec(self)]
    }
}

impl IntoListenAddrs for (&str, u16) {
    fn into_listen_addrs(self) -> Vec<ListenAddr> {
        vec![ListenAddr::HostPort(self.0.to_string(), self.1)]
    }
}

impl IntoListenAddrs for (String, u16) {
    fn into_listen_addrs(self) -> Vec<ListenAddr> {
        vec![ListenAddr::HostPort(self.0, self.1)]
    }
}

impl IntoListenAddrs for SocketAddr {
    fn into_listen_addrs(self) -> Vec<ListenAddr> {
        vec![ListenAddr::Resolved(self)]
    }
}

impl<T: IntoListenAddrs> IntoListenAddrs for Vec<T> {
    fn into_listen_addrs(self) -> Vec<ListenAddr> {
        self.into_iter().flat_map(IntoListenAddrs::into_listen_addrs).collect()
    }
}

impl<T: IntoListenAddrs, const N: usize> IntoListenAddrs for [T; N] {
    fn into_listen_addrs(self) -> Vec<ListenAddr> {
        self.into_iter().flat_map(IntoListenAddrs::into_listen_addrs).collect()
    }
}

/// A JSON-RPC server bound to one or more stream endpoints.
///
/// ```no_run
/// # async fn example() -> linerpc::Result<()> {
/// use linerpc::{Server, rpc_method};
///
/// let mut server = Server::bind("localhost:9090").await?;
/// server.register("echo", rpc_method!((message: String) -> String { message }));
/// server.start();
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Server {
    router: Router,
    config: ServerConfig,
    /// Bound but not yet accepting; drained by [`Server::start`].
    listeners: Vec<TcpListener>,
    local_addrs: Vec<SocketAddr>,
    /// Cancelling this terminates accept loops and connection tasks.
    close_token: CancellationToken,
    /// Child of `close_token`; cancelling only stops accepting.
    accept_token: CancellationToken,
}

impl Server {
    /// Resolve `addrs` and bind a listener on every resolved endpoint.
    ///
    /// Each input may resolve to several endpoints (`localhost` typically
    /// yields both loopbacks) and all of them are bound.  Nothing resolving
    /// at all is [`RpcError::AddressUnresolvable`]; nothing binding at all
    /// is [`RpcError::Bind`].  Partial bind success is accepted and logged.
    pub async fn bind(addrs: impl IntoListenAddrs) -> Result<Self> {
        Self::bind_with_config(addrs, ServerConfig::default()).await
    }

    pub async fn bind_with_config(addrs: impl IntoListenAddrs, config: ServerConfig) -> Result<Self> {
        let inputs = addrs.into_listen_addrs();
        let description = inputs
            .iter()
            .map(|addr| match addr {
                ListenAddr::Spec(spec) => spec.clone(),
                ListenAddr::HostPort(host, port) => format!("{host}:{port}"),
                ListenAddr::Resolved(resolved) => resolved.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ");

        let mut endpoints = Vec::new();
        for input in inputs {
            match input {
                ListenAddr::Resolved(resolved) => endpoints.push(resolved),
                ListenAddr::Spec(spec) => match lookup_host(spec.as_str()).await {
                    Ok(resolved) => endpoints.extend(resolved),
                    Err(e) => tracing::warn!(spec = %spec, error = %e, "listen address did not resolve"),
                },
                ListenAddr::HostPort(host, port) => match lookup_host((host.as_str(), port)).await {
                    Ok(resolved) => endpoints.extend(resolved),
                    Err(e) => tracing::warn!(host = %host, port, error = %e, "listen address did not resolve"),
                },
            }
        }

        if endpoints.is_empty() {
            return Err(RpcError::AddressUnresolvable { spec: description });
        }

        let mut listeners = Vec::new();
        let mut local_addrs = Vec::new();
        let mut last_error = None;
        for endpoint in endpoints {
            match TcpListener::bind(endpoint).await {
                Ok(listener) => {
                    let local = listener.local_addr().unwrap_or(endpoint);
                    tracing::debug!(addr = %local, "listening");
                    local_addrs.push(local);
                    listeners.push(listener);
                }
                Err(e) => {
                    tracing::warn!(addr = %endpoint, error = %e, "failed to bind endpoint");
                    last_error = Some(e);
                }
            }
        }

        if listeners.is_empty() {
            return Err(RpcError::Bind {
                source: last_error.unwrap_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no endpoints to bind")
                }),
            });
        }

        let close_token = CancellationToken::new();
        let accept_token = close_token.child_token();
        Ok(Server {
            router: Router::new(),
            config,
            listeners,
            local_addrs,
            close_token,
            accept_token,
        })
    }

    /// Register a handler under a method name.  May be called before or
    /// after [`Server::start`]; last registration wins.
    pub fn register<H>(&self, method: impl Into<String>, handler: H)
    where
        H: Handler + 'static,
    {
        self.router.register(method, handler);
    }

    /// The method registry, for bulk operations such as
    /// [`clear`](Router::clear).
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The endpoints actually bound, with ephemeral ports filled in.
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Spawn one accept loop per bound listener.
    pub fn start(&mut self) {
        for listener in self.listeners.drain(..) {
            let router = self.router.clone();
            let accept_token = self.accept_token.clone();
            let close_token = self.close_token.clone();
            let max_request_bytes = self.config.max_request_bytes;
            let span = tracing::info_span!("listener", addr = %listener.local_addr().map(|a| a.to_string()).unwrap_or_default());
            tokio::spawn(
                accept_loop(listener, router, accept_token, close_token, max_request_bytes)
                    .instrument(span),
            );
        }
    }

    /// Stop accepting new connections.  Connections already established
    /// keep running until they close on their own.
    pub fn stop(&self) {
        self.accept_token.cancel();
    }

    /// Stop accepting and terminate every live connection task.
    pub fn close(&self) {
        self.close_token.cancel();
    }

    /// Run the engine over an already-connected transport, with this
    /// server's registry.  This is how non-TCP transports (or tests over
    /// in-memory pipes) plug in.
    pub fn serve_connection(&self, transport: impl Transport) -> tokio::task::JoinHandle<Result<()>> {
        let router = self.router.clone();
        let span = transport.span();
        let peer = Peer::new(transport);
        tokio::spawn(connection::drive(router, peer).instrument(span))
    }
}

async fn accept_loop(
    listener: TcpListener,
    router: Router,
    accept_token: CancellationToken,
    close_token: CancellationToken,
    max_request_bytes: usize,
) {
    loop {
        tokio::select! {
            _ = accept_token.cancelled() => {
                tracing::debug!("listener shut down");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, remote)) => {
                        tracing::debug!(remote = %remote, "accepted connection");
                        let router = router.clone();
                        let close_token = close_token.clone();
                        let transport = Framed::new(stream, CrlfCodec::new_with_max_length(max_request_bytes));
                        let peer = Peer::new(transport);
                        let span = tracing::info_span!("connection", remote = %remote);
                        tokio::spawn(
                            async move {
                                tokio::select! {
                                    _ = close_token.cancelled() => {
                                        tracing::debug!("connection task cancelled by server close");
                                    }
                                    result = connection::drive(router, peer) => {
                                        if let Err(e) = result {
                                            tracing::error!(error = %e, "connection terminated with error");
                                        }
                                    }
                                }
                            }
                            .instrument(span),
                        );
                    }
                    Err(e) => {
                        // Transient accept errors (EMFILE and friends) should
                        // not kill the listener
                        tracing::warn!(error = %e, "error accepting connection");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_addr_input_shapes() {
        assert_matches::assert_matches!(
            "localhost:9090".into_listen_addrs().as_slice(),
            [ListenAddr::Spec(spec)] if spec == "localhost:9090"
        );
        assert_matches::assert_matches!(
            ("localhost", 9090).into_listen_addrs().as_slice(),
            [ListenAddr::HostPort(host, 9090)] if host == "localhost"
        );

        let resolved: SocketAddr = "127.0.0.1:9090".parse().unwrap();
        assert_matches::assert_matches!(
            resolved.into_listen_addrs().as_slice(),
            [ListenAddr::Resolved(addr)] if *addr == resolved
        );

        let many = vec!["a:1".to_string(), "b:2".to_string()].into_listen_addrs();
        assert_eq!(many.len(), 2);
    }

    #[tokio::test]
    async fn bind_ephemeral_reports_local_addr() {
        let server = Server::bind(("127.0.0.1", 0)).await.unwrap();
        let addrs = server.local_addrs();
        assert_eq!(addrs.len(), 1);
        assert_ne!(addrs[0].port(), 0);
    }

    #[tokio::test]
    async fn unresolvable_address_is_fatal() {
        let result = Server::bind("definitely-not-a-real-host.invalid:9090").await;
        assert_matches::assert_matches!(result, Err(RpcError::AddressUnresolvable { spec })
            if spec.contains("definitely-not-a-real-host.invalid"));
    }
}
