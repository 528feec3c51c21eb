//! In this crate, a "transport" abstracts how JSON-RPC messages are sent and
//! received.  At this level a transport is simply a source and sink of
//! complete message strings; the wire framing (one JSON document per CR LF
//! terminated line) is provided by [`CrlfCodec`] for any byte stream, and
//! the TCP binding plugs an accepted socket in via
//! [`Framed`](tokio_util::codec::Framed).
//!
//! There is no HTTP framework in sight here on purpose: the server engine
//! and the client core presume an already-established connection and only
//! ever see lines.  The one-shot HTTP client lives in its own module and
//! does not come through this trait.
use std::future::Future;
use std::pin::Pin;

use bytes::{BufMut, BytesMut};
use futures::{FutureExt, SinkExt, StreamExt, TryFutureExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::{Result, RpcError};

/// Maximum accepted line length: one request or response per line, 128 KiB.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 128 * 1024;

/// A transport is a source and sink of JSON-RPC message strings.
///
/// Implementations do not parse messages; they move opaque lines.  Closing a
/// transport is dropping it.
pub trait Transport: Send + Sized + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Construct a [`tracing::Span`] with useful metadata about the
    /// transport, entered by the loop that services it.
    fn span(&self) -> tracing::Span;

    /// Send one message to the remote peer.  Should not complete until the
    /// message has been handed off to the transport layer.
    fn send_message(&mut self, message: String) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

    /// Receive one message from the remote peer.
    ///
    /// Must be cancellation-safe: the service loops poll this inside
    /// `select!`.  Returns `Ok(None)` once the transport is closed.
    fn receive_message(&mut self)
    -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;
}

/// Error produced by [`CrlfCodec`].
#[derive(Debug, Error)]
pub enum CrlfCodecError {
    #[error("max line length exceeded")]
    MaxLineLengthExceeded,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Frames one UTF-8 message per CR LF terminated line.
///
/// Decoding tolerates a bare LF terminator from sloppy peers; encoding
/// always writes CR LF.  A line longer than `max_length` is a hard error
/// that fails the connection; no discard-and-resync recovery is attempted.
/// EOF in the middle of a line is also an error rather than an implicit
/// final frame.
#[derive(Debug, Clone)]
pub struct CrlfCodec {
    max_length: usize,
    /// Position up to which the buffer has already been scanned for a
    /// terminator, so decode doesn't rescan on every new chunk.
    next_index: usize,
}

impl CrlfCodec {
    pub fn new() -> Self {
        Self::new_with_max_length(DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn new_with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
        }
    }
}

impl Default for CrlfCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for CrlfCodec {
    type Item = String;
    type Error = CrlfCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, CrlfCodecError> {
        if let Some(offset) = buf[self.next_index..].iter().position(|b| *b == b'\n') {
            let end = self.next_index + offset;
            if end > self.max_length {
                return Err(CrlfCodecError::MaxLineLengthExceeded);
            }
            self.next_index = 0;
            let mut line = buf.split_to(end + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            let line = std::str::from_utf8(&line)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?
                .to_string();
            Ok(Some(line))
        } else if buf.len() > self.max_length {
            Err(CrlfCodecError::MaxLineLengthExceeded)
        } else {
            self.next_index = buf.len();
            Ok(None)
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, CrlfCodecError> {
        match self.decode(buf)? {
            Some(line) => Ok(Some(line)),
            None if buf.is_empty() => Ok(None),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed in the middle of a line",
            )
            .into()),
        }
    }
}

impl Encoder<String> for CrlfCodec {
    type Error = CrlfCodecError;

    fn encode(&mut self, message: String, buf: &mut BytesMut) -> Result<(), CrlfCodecError> {
        buf.reserve(message.len() + 2);
        buf.put(message.as_bytes());
        buf.put_slice(b"\r\n");
        Ok(())
    }
}

/// Implementation of [`Transport`] for any [`tokio::io::AsyncRead`] +
/// [`tokio::io::AsyncWrite`] framed with the CR LF codec.
///
/// This covers the real TCP binding and the in-memory duplex pipes the
/// tests run over.
impl<Io> Transport for Framed<Io, CrlfCodec>
where
    Io: Send + Unpin + AsyncRead + AsyncWrite + 'static,
{
    type Error = CrlfCodecError;

    fn span(&self) -> tracing::Span {
        tracing::debug_span!("Framed<Io, CrlfCodec>", Io = std::any::type_name::<Io>())
    }

    fn send_message(&mut self, message: String) -> impl Future<Output = Result<(), Self::Error>> + Send + '_ {
        self.send(message)
    }

    fn receive_message(
        &mut self,
    ) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_ {
        // NOTE: `receive_message` must be cancel safe.  `StreamExt::next`
        // doesn't take ownership of the stream, so dropping the returned
        // future loses nothing.
        self.next()
            .map(|opt_result: Option<Result<_, CrlfCodecError>>| opt_result.transpose())
    }
}

/// Internal dyn-compatible wrapper trait around [`Transport`] to erase the
/// types and allow dynamic dispatch.
trait BoxedTransport: Send + 'static {
    fn boxed_span(&self) -> tracing::Span;
    fn boxed_send_message(
        &mut self,
        message: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
    fn boxed_receive_message(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + '_>>;
}

impl<T> BoxedTransport for T
where
    T: Transport + 'static,
{
    fn boxed_span(&self) -> tracing::Span {
        <Self as Transport>::span(self)
    }

    fn boxed_send_message(
        &mut self,
        message: String,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        <Self as Transport>::send_message(self, message)
            .map_err(|e| RpcError::Transport { source: Box::new(e) })
            .boxed()
    }

    fn boxed_receive_message(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + '_>> {
        <Self as Transport>::receive_message(self)
            .map_err(|e| RpcError::Transport { source: Box::new(e) })
            .boxed()
    }
}

/// Type-erased wrapper around a [`Transport`], owned exclusively by the loop
/// that services the connection (the server engine or the client event
/// loop).  Standardizes transport failures to [`RpcError::Transport`].
pub struct Peer {
    transport: Box<dyn BoxedTransport>,
}

impl Peer {
    pub fn new(transport: impl Transport) -> Self {
        Self {
            transport: Box::new(transport),
        }
    }

    pub fn span(&self) -> tracing::Span {
        self.transport.boxed_span()
    }

    /// Send a raw message string to the remote peer.
    pub async fn send_message(&mut self, message: String) -> Result<()> {
        self.transport.boxed_send_message(message).await
    }

    /// Receive a message from the remote peer, without attempting to parse
    /// it.  Returns `None` once the underlying transport reports closure.
    pub async fn receive_message(&mut self) -> Result<Option<String>> {
        self.transport.boxed_receive_message().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use assert_matches::assert_matches;

    #[test]
    fn codec_decodes_crlf_lines() {
        let mut codec = CrlfCodec::new();
        let mut buf = BytesMut::from(&b"{\"a\":1}\r\n{\"b\":2}\r\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some("{\"a\":1}".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("{\"b\":2}".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn codec_tolerates_bare_lf() {
        let mut codec = CrlfCodec::new();
        let mut buf = BytesMut::from(&b"hello\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("hello".to_string()));
    }

    #[test]
    fn codec_decodes_empty_line() {
        let mut codec = CrlfCodec::new();
        let mut buf = BytesMut::from(&b"\r\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(String::new()));
    }

    #[test]
    fn codec_encodes_with_crlf() {
        let mut codec = CrlfCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("{\"a\":1}".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"{\"a\":1}\r\n");
    }

    #[test]
    fn codec_rejects_over_length_lines() {
        let mut codec = CrlfCodec::new_with_max_length(16);

        // Unterminated and already too long
        let mut buf = BytesMut::from(&b"x".repeat(32)[..]);
        assert_matches!(codec.decode(&mut buf), Err(CrlfCodecError::MaxLineLengthExceeded));

        // Terminated, but the line itself exceeds the cap
        let mut codec = CrlfCodec::new_with_max_length(16);
        let mut long = b"y".repeat(32);
        long.extend_from_slice(b"\r\n");
        let mut buf = BytesMut::from(&long[..]);
        assert_matches!(codec.decode(&mut buf), Err(CrlfCodecError::MaxLineLengthExceeded));
    }

    #[test]
    fn codec_rejects_eof_mid_line() {
        let mut codec = CrlfCodec::new();
        let mut buf = BytesMut::from(&b"partial line without terminator"[..]);
        assert_matches!(codec.decode_eof(&mut buf), Err(CrlfCodecError::Io(_)));

        let mut empty = BytesMut::new();
        assert_eq!(codec.decode_eof(&mut empty).unwrap(), None);
    }

    #[tokio::test]
    async fn peer_round_trip_over_duplex() {
        let (client_transport, server_transport) = testing::channel_pair();
        let mut client = Peer::new(client_transport);
        let mut server = Peer::new(server_transport);

        client.send_message("ping from client".to_string()).await.unwrap();
        let received = server.receive_message().await.unwrap();
        assert_eq!(received.as_deref(), Some("ping from client"));

        server.send_message("pong from server".to_string()).await.unwrap();
        let received = client.receive_message().await.unwrap();
        assert_eq!(received.as_deref(), Some("pong from server"));
    }

    #[tokio::test]
    async fn peer_reports_closure() {
        let (client_transport, server_transport) = testing::channel_pair();
        let mut server = Peer::new(server_transport);

        drop(client_transport);
        assert_eq!(server.receive_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn over_length_line_is_a_transport_error() {
        let (client_transport, server_transport) = testing::channel_pair();
        let mut client = Peer::new(client_transport);
        let mut server = Peer::new(server_transport);

        let oversized = "x".repeat(DEFAULT_MAX_FRAME_BYTES + 100);
        let send = tokio::spawn(async move { client.send_message(oversized).await });

        let err = server.receive_message().await.unwrap_err();
        assert_matches!(err, RpcError::Transport { source }
            if source.to_string().contains("max line length exceeded"));

        send.abort();
    }
}
