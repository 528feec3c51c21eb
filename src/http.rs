//! One-shot HTTP/1.0 client transport: each call opens a fresh connection,
//! POSTs a single JSON-RPC request, and reads a single JSON-RPC response
//! from the body.  The connection closes after the exchange.
//!
//! The reads are deliberately pedestrian: headers are accumulated up to a
//! hard cap and handed to `httparse`, the body is pulled in fixed-size
//! blocks, and each phase runs under its own deadline.  There is no
//! keep-alive, no chunked encoding, no redirects; HTTP here is an envelope,
//! not a feature.
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use serde_json::Value as JsonValue;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::client::CallResponse;
use crate::types::{Id, Request, Response};
use crate::{Result, RpcError};

/// Body bytes are read in blocks of this size.
const BODY_CHUNK_BYTES: usize = 4096;

/// HTTP request method used for the call.
///
/// POST is the default; GET remains selectable for peers that expect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    Get,
    #[default]
    Post,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// Limits and timeouts for the HTTP exchange.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub method: HttpMethod,
    /// Deadline for receiving the complete response header block.
    pub header_read_timeout: Duration,
    /// Deadline for receiving the complete response body.
    pub body_read_timeout: Duration,
    /// Hard cap on the response header block.
    pub max_header_bytes: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            method: HttpMethod::Post,
            header_read_timeout: Duration::from_secs(120),
            body_read_timeout: Duration::from_secs(12),
            max_header_bytes: 8 * 1024,
        }
    }
}

/// A JSON-RPC client that carries each call in a one-shot HTTP/1.0 request.
pub struct HttpClient {
    host: String,
    port: u16,
    config: HttpClientConfig,
    next_id: AtomicU64,
}

impl HttpClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_config(host, port, HttpClientConfig::default())
    }

    pub fn with_config(host: impl Into<String>, port: u16, config: HttpClientConfig) -> Self {
        Self {
            host: host.into(),
            port,
            config,
            next_id: AtomicU64::new(1),
        }
    }

    /// Change the HTTP request method for subsequent calls.
    pub fn set_method(&mut self, method: HttpMethod) {
        self.config.method = method;
    }

    /// Invoke `method` with positional `params` over a fresh connection.
    ///
    /// Any header or body parse failure, size overrun, timeout, or peer
    /// disconnect fails the call; the connection is dropped either way.
    pub async fn call(&self, method: &str, params: JsonValue) -> Result<CallResponse> {
        let id = Id::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let request = Request::new(id, method, params);
        let body = serde_json::to_string(&request).map_err(|e| RpcError::SerRequest {
            source: e,
            type_name: std::any::type_name::<Request>(),
        })?;

        let mut stream = TcpStream::connect((self.host.as_str(), self.port))
            .await
            .map_err(RpcError::transport)?;

        let request_bytes = format!(
            "{} / HTTP/1.0\r\nDate: {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            self.config.method.as_str(),
            httpdate::fmt_http_date(SystemTime::now()),
            body.len(),
            body,
        );
        stream
            .write_all(request_bytes.as_bytes())
            .await
            .map_err(RpcError::transport)?;

        let (content_length, body_prefix) = self.read_head(&mut stream).await?;
        let body = self.read_body(&mut stream, content_length, body_prefix).await?;

        let response: Response = serde_json::from_slice(&body).map_err(|e| RpcError::Http {
            reason: format!("response body was not a JSON-RPC response: {e}"),
        })?;
        Ok(CallResponse::from(response))
    }

    /// Read and validate the response head.  Returns the declared content
    /// length and any body bytes that arrived with the final header chunk.
    async fn read_head(&self, stream: &mut TcpStream) -> Result<(usize, Vec<u8>)> {
        let max_header_bytes = self.config.max_header_bytes;
        let read = async move {
            let mut buf: Vec<u8> = Vec::with_capacity(1024);
            let mut chunk = [0u8; 1024];
            let end = loop {
                if let Some(pos) = find_header_end(&buf) {
                    break pos;
                }
                if buf.len() >= max_header_bytes {
                    return Err(RpcError::Http {
                        reason: format!("response headers exceed {max_header_bytes} bytes"),
                    });
                }
                let n = stream.read(&mut chunk).await.map_err(RpcError::transport)?;
                if n == 0 {
                    return Err(RpcError::Http {
                        reason: "connection closed before headers completed".to_string(),
                    });
                }
                buf.extend_from_slice(&chunk[..n]);
            };
            Ok((buf, end))
        };
        let (buf, end) = tokio::time::timeout(self.config.header_read_timeout, read)
            .await
            .map_err(|_| RpcError::Timeout {
                phase: "response headers",
            })??;

        let mut headers = [httparse::EMPTY_HEADER; 32];
        let mut parsed = httparse::Response::new(&mut headers);
        let header_len = match parsed.parse(&buf[..end]) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) => {
                return Err(RpcError::Http {
                    reason: "truncated response headers".to_string(),
                });
            }
            Err(e) => {
                return Err(RpcError::Http {
                    reason: format!("malformed response headers: {e}"),
                });
            }
        };

        if parsed.code != Some(200) {
            return Err(RpcError::Http {
                reason: format!("unexpected status {}", parsed.code.unwrap_or(0)),
            });
        }

        let mut json_content_type = false;
        let mut content_length = None;
        for header in parsed.headers.iter() {
            if header.name.eq_ignore_ascii_case("content-type") {
                let value = std::str::from_utf8(header.value).unwrap_or("");
                json_content_type = value
                    .trim()
                    .to_ascii_lowercase()
                    .starts_with("application/json");
            } else if header.name.eq_ignore_ascii_case("content-length") {
                content_length = std::str::from_utf8(header.value)
                    .ok()
                    .and_then(|value| value.trim().parse::<usize>().ok());
            }
        }

        if !json_content_type {
            return Err(RpcError::Http {
                reason: "response Content-Type is not application/json".to_string(),
            });
        }
        let content_length = content_length.ok_or_else(|| RpcError::Http {
            reason: "missing or invalid Content-Length".to_string(),
        })?;

        Ok((content_length, buf[header_len..].to_vec()))
    }

    /// Read the body to `content_length` bytes, continuing from whatever
    /// arrived alongside the headers.
    async fn read_body(
        &self,
        stream: &mut TcpStream,
        content_length: usize,
        mut buf: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let read = async move {
            let mut chunk = [0u8; BODY_CHUNK_BYTES];
            while buf.len() < content_length {
                let n = stream.read(&mut chunk).await.map_err(RpcError::transport)?;
                if n == 0 {
                    return Err(RpcError::Http {
                        reason: format!(
                            "connection closed after {} of {content_length} body bytes",
                            buf.len()
                        ),
                    });
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            buf.truncate(content_length);
            Ok(buf)
        };
        tokio::time::timeout(self.config.body_read_timeout, read)
            .await
            .map_err(|_| RpcError::Timeout { phase: "response body" })?
    }
}

/// Offset just past the CR LF CR LF header terminator, if present.
fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_strings() {
        assert_eq!(HttpMethod::Post.as_str(), "POST");
        assert_eq!(HttpMethod::Get.as_str(), "GET");
        assert_eq!(HttpMethod::default(), HttpMethod::Post);
    }

    #[test]
    fn config_defaults_match_protocol_limits() {
        let config = HttpClientConfig::default();
        assert_eq!(config.method, HttpMethod::Post);
        assert_eq!(config.header_read_timeout, Duration::from_secs(120));
        assert_eq!(config.body_read_timeout, Duration::from_secs(12));
        assert_eq!(config.max_header_bytes, 8 * 1024);
    }

    #[test]
    fn header_terminator_search() {
        assert_eq!(find_header_end(b"HTTP/1.0 200 OK\r\n\r\nbody"), Some(19));
        assert_eq!(find_header_end(b"HTTP/1.0 200 OK\r\n"), None);
        assert_eq!(find_header_end(b""), None);
    }
}
