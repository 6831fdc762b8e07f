//! Streaming transport abstraction for the downloader.
//!
//! The downloader drives transfers through two seams, modelled after the
//! secure-transport capability the agent is deployed against:
//!
//! - [`StreamingClient`]: opens a streaming GET and hands back response
//!   headers once available.
//! - [`ByteStream`]: chunked reads with an end-of-message flag and a
//!   non-blocking readiness probe, plus the I/O-source token the caller's
//!   event loop multiplexes on.
//!
//! This abstraction allows for dependency injection and easier testing by
//! enabling scripted transports in tests. The default implementation is
//! [`ReqwestStreamingClient`], built on `reqwest::blocking`.

mod http_client;

pub use http_client::{ReqwestClientFactory, ReqwestStreamingClient};

#[cfg(test)]
pub use http_client::tests::{
    MockClientFactory, MockStreamingClient, RecordedRequest, StreamScript,
};

use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

/// Errors raised while opening a stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request was sent but the server rejected it with a non-success
    /// HTTP status.
    #[error("request rejected with HTTP status {0}")]
    Status(u16),

    /// The request could not be sent or the response never arrived.
    #[error("transport I/O error ({errno}): {message}")]
    Io { errno: i32, message: String },
}

/// Error raised by an open stream during reads or readiness probes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("stream error ({errno}): {message}")]
pub struct StreamError {
    pub errno: i32,
    pub message: String,
}

impl StreamError {
    pub fn new(errno: i32, message: impl Into<String>) -> Self {
        Self {
            errno,
            message: message.into(),
        }
    }
}

/// Token identifying the I/O source backing an open stream.
///
/// Stable for the stream's lifetime and unique among live streams; the
/// registry exposes these through `sockets()` and accepts them back in
/// `serve()`, so the external event loop only ever needs a routing key.
/// Transports that own real file descriptors surface them through the same
/// token space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketHandle(u64);

/// Global counter backing [`SocketHandle`] allocation.
static SOCKET_COUNTER: AtomicU64 = AtomicU64::new(1);

impl SocketHandle {
    pub(crate) fn next() -> Self {
        Self(SOCKET_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Transport-security parameters, passed through opaquely to the client
/// implementation. Handshake logic is the transport's concern, not the
/// downloader's.
#[derive(Debug, Clone, Default)]
pub enum TransportSecurity {
    /// Plain transport, or TLS against the platform trust store.
    #[default]
    NoSec,
    /// Pre-shared-key credentials.
    PreSharedKey { identity: Vec<u8>, key: Vec<u8> },
    /// Client-certificate credentials.
    Certificate {
        client_cert: Vec<u8>,
        private_key: Vec<u8>,
    },
}

/// A GET request to be opened as a stream.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: url::Url,
    /// Extra request headers, e.g. `If-Match` and `Range`.
    pub headers: Vec<(String, String)>,
}

/// Result of a single stream read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Bytes placed into the caller's buffer.
    pub bytes_read: usize,
    /// True when the message is complete; no further reads will yield data.
    pub finished: bool,
}

/// An open response stream.
pub trait ByteStream {
    /// Response headers, in received order. The driver matches names
    /// case-insensitively.
    fn headers(&self) -> &[(String, String)];

    /// Reads the next chunk of the response body into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, StreamError>;

    /// True when another read would yield data without blocking.
    fn ready_without_blocking(&mut self) -> Result<bool, StreamError>;

    /// The I/O-source token for event-loop multiplexing.
    fn socket(&self) -> SocketHandle;
}

/// Opens streaming GET requests.
pub trait StreamingClient {
    /// Sends `request` and returns once response headers are available.
    ///
    /// Non-success HTTP statuses are reported as
    /// [`TransportError::Status`]; the caller decides their meaning.
    fn open(&mut self, request: HttpRequest) -> Result<Box<dyn ByteStream>, TransportError>;
}

/// Creates one [`StreamingClient`] per transfer.
pub trait ClientFactory {
    fn create_client(
        &self,
        security: &TransportSecurity,
    ) -> Result<Box<dyn StreamingClient>, TransportError>;
}
