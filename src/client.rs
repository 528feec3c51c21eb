//! The client core: outbound request identification, the pending-response
//! map, and the per-connection event loop that demultiplexes replies by id.
//!
//! One spawned event loop owns the transport and `select!`s between
//! caller-submitted outbound requests and inbound reply lines, so nothing
//! ever holds a lock across a read.  Completion slots are oneshot channels
//! keyed by the request id rendered as a string; the loop resolves them as
//! replies arrive and drains them when the connection dies.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value as JsonValue;
use tokio::net::{TcpStream, lookup_host};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::transport::{CrlfCodec, Peer, Transport};
use crate::types::{ErrorDetails, Id, Request, Response, id_key};
use crate::{Result, RpcError};

/// The size of the mpsc channel that feeds outbound requests to a
/// connection's event loop.  Beyond this many queued-but-unsent requests,
/// callers are backpressured.
const CONNECTION_CHANNEL_BOUNDS: usize = 16;

/// The reply to a call, uniform over success and error so callers can
/// inspect it without control flow.
///
/// `error` is true iff the reply carried a non-null `error` member, in
/// which case `result` is the error object; otherwise `result` is the
/// success value.
#[derive(Debug, Clone)]
pub struct CallResponse {
    pub error: bool,
    pub result: JsonValue,
}

impl CallResponse {
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Shortcut for callers that do want control flow: an error reply
    /// becomes [`RpcError::Rpc`] with the decoded error object.
    pub fn into_result(self) -> Result<JsonValue> {
        if self.error {
            let error = serde_json::from_value(self.result)
                .unwrap_or_else(|_| ErrorDetails::internal_error("malformed error object", None));
            Err(RpcError::Rpc { error })
        } else {
            Ok(self.result)
        }
    }
}

impl From<Response> for CallResponse {
    fn from(response: Response) -> Self {
        match response.error {
            Some(details) => CallResponse {
                error: true,
                result: serde_json::to_value(&details).unwrap_or(JsonValue::Null),
            },
            None => CallResponse {
                error: false,
                result: response.result,
            },
        }
    }
}

/// One outbound request on its way to the event loop, with the completion
/// slot the caller is waiting on.
struct OutboundCall {
    method: String,
    key: String,
    message: String,
    response_tx: oneshot::Sender<Result<CallResponse>>,
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Result<CallResponse>>>>>;

/// A JSON-RPC client over a line-framed stream transport.
///
/// Cheap to clone; all clones share the connection, the id counter, and the
/// pending map.
#[derive(Clone, Debug)]
pub struct Client {
    outbound_tx: mpsc::Sender<OutboundCall>,
    next_id: Arc<AtomicU64>,
    pending: PendingMap,
    cancel: CancellationToken,
}

impl Client {
    /// Resolve `host` and open a TCP connection, then start the event loop.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let addrs = lookup_host((host, port))
            .await
            .map_err(|_| RpcError::AddressUnresolvable {
                spec: format!("{host}:{port}"),
            })?;

        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    return Ok(Self::from_transport(Framed::new(stream, CrlfCodec::new())));
                }
                Err(e) => {
                    tracing::debug!(addr = %addr, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(RpcError::Transport {
            source: Box::new(last_error.unwrap_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "no resolved addresses")
            })),
        })
    }

    /// Start a client over an already-connected transport.
    pub fn from_transport(transport: impl Transport) -> Self {
        let span = transport.span();
        let peer = Peer::new(transport);
        let (outbound_tx, outbound_rx) = mpsc::channel(CONNECTION_CHANNEL_BOUNDS);
        let pending: PendingMap = Default::default();
        let cancel = CancellationToken::new();

        let event_loop = EventLoop {
            peer,
            pending: pending.clone(),
            outbound: outbound_rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(event_loop.run().instrument(span));

        Client {
            outbound_tx,
            next_id: Arc::new(AtomicU64::new(1)),
            pending,
            cancel,
        }
    }

    /// Invoke `method` with positional `params`, awaiting the reply.
    ///
    /// Request ids are allocated from a strictly increasing counter; the
    /// reply is matched back by id, so replies may arrive in any order.
    pub async fn call(&self, method: &str, params: JsonValue) -> Result<CallResponse> {
        let id = Id::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = Request::new(id.clone(), method, params);
        let message = serde_json::to_string(&request).map_err(|e| RpcError::SerRequest {
            source: e,
            type_name: std::any::type_name::<Request>(),
        })?;
        self.dispatch(method, id.to_string(), message).await
    }

    /// Like [`call`](Client::call), but the caller supplies the serialized
    /// message verbatim.  Meant for fault injection in tests; if the
    /// message elicits a reply the loop cannot correlate (or none at all),
    /// the returned future only resolves when the connection closes, so
    /// callers typically wrap this in a deadline.
    pub async fn raw_call(&self, method: &str, message: String) -> Result<CallResponse> {
        let id = Id::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.dispatch(method, id.to_string(), message).await
    }

    async fn dispatch(&self, method: &str, key: String, message: String) -> Result<CallResponse> {
        let (response_tx, response_rx) = oneshot::channel();
        let call = OutboundCall {
            method: method.to_string(),
            key,
            message,
            response_tx,
        };
        if self.outbound_tx.send(call).await.is_err() {
            // The event loop is gone, so the connection must be closed
            return Err(RpcError::ConnectionClosed);
        }

        match response_rx.await {
            Ok(result) => result,
            Err(_) => {
                // The loop drains pending slots before exiting, so a dropped
                // sender should not happen outside of a panic in the loop
                tracing::error!("BUG: completion slot dropped before the event loop resolved it");
                Err(RpcError::ConnectionClosed)
            }
        }
    }

    /// Number of calls still waiting for a reply.
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Close the connection.  Every outstanding call fails with
    /// [`RpcError::ConnectionClosed`].
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

struct EventLoop {
    peer: Peer,
    pending: PendingMap,
    outbound: mpsc::Receiver<OutboundCall>,
    cancel: CancellationToken,
}

impl EventLoop {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("client connection closed by request");
                    break;
                }
                call = self.outbound.recv() => {
                    match call {
                        Some(call) => self.handle_outbound(call).await,
                        None => {
                            tracing::debug!("all client handles dropped");
                            break;
                        }
                    }
                }
                received = self.peer.receive_message() => {
                    match received {
                        Ok(Some(line)) => self.handle_inbound(line),
                        Ok(None) => {
                            tracing::debug!("server closed the connection");
                            break;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "transport error reading responses");
                            break;
                        }
                    }
                }
            }
        }

        // Whatever is still pending is never going to complete, and neither
        // is anything queued behind the loop
        let mut pending = self.pending.lock().unwrap();
        for (_, response_tx) in pending.drain() {
            // Send fails if the caller already gave up; that's fine
            let _ = response_tx.send(Err(RpcError::ConnectionClosed));
        }
        self.outbound.close();
        while let Ok(call) = self.outbound.try_recv() {
            let _ = call.response_tx.send(Err(RpcError::ConnectionClosed));
        }
    }

    /// Write one outbound request and install its completion slot.
    ///
    /// The slot goes in only after a successful write; since this loop is
    /// also the only reader, no reply can race past the installation.
    async fn handle_outbound(&mut self, call: OutboundCall) {
        match self.peer.send_message(call.message).await {
            Ok(()) => {
                self.pending.lock().unwrap().insert(call.key, call.response_tx);
            }
            Err(e) => {
                tracing::error!(method = %call.method, error = %e, "error sending request");
                let _ = call.response_tx.send(Err(e));
            }
        }
    }

    /// Match one inbound reply line to its completion slot.
    fn handle_inbound(&mut self, line: String) {
        let response: Response = match serde_json::from_str(&line) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(error = %e, "dropping unparseable response line");
                return;
            }
        };

        let key = id_key(&response.id);
        match self.pending.lock().unwrap().remove(&key) {
            Some(response_tx) => {
                // Send fails only if the caller stopped waiting
                let _ = response_tx.send(Ok(CallResponse::from(response)));
            }
            None => {
                tracing::warn!(id = %key, "dropping response for unknown request id");
            }
        }
    }
}
