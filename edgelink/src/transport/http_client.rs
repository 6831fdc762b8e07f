//! Default streaming client over `reqwest::blocking`.

use std::io::Read;
use std::time::Duration;

use super::{
    ByteStream, ClientFactory, HttpRequest, ReadOutcome, SocketHandle, StreamError,
    StreamingClient, TransportError, TransportSecurity,
};

/// Default timeout for HTTP requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// [`ClientFactory`] producing [`ReqwestStreamingClient`] instances.
#[derive(Debug)]
pub struct ReqwestClientFactory {
    timeout: Duration,
}

impl ReqwestClientFactory {
    /// Creates a factory with the default request timeout.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Creates a factory with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ReqwestClientFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory for ReqwestClientFactory {
    fn create_client(
        &self,
        security: &TransportSecurity,
    ) -> Result<Box<dyn StreamingClient>, TransportError> {
        Ok(Box::new(ReqwestStreamingClient::new(
            security,
            self.timeout,
        )?))
    }
}

/// Streaming client over `reqwest::blocking`.
///
/// TLS is delegated to rustls with the platform trust store. Pre-shared-key
/// transport security requires a transport stack that supports it; this
/// client only honors [`TransportSecurity::NoSec`] and
/// [`TransportSecurity::Certificate`] deployments whose trust is already
/// configured at the platform level.
#[derive(Debug)]
pub struct ReqwestStreamingClient {
    client: reqwest::blocking::Client,
}

impl ReqwestStreamingClient {
    /// Builds the underlying blocking client.
    ///
    /// No `Accept-Encoding` is ever sent (the crate enables no compression
    /// features), so response byte offsets always refer to the identity
    /// encoding, which byte-exact range resumption requires.
    pub fn new(
        _security: &TransportSecurity,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Io {
                errno: libc::EIO,
                message: format!("failed to create HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }
}

impl StreamingClient for ReqwestStreamingClient {
    fn open(&mut self, request: HttpRequest) -> Result<Box<dyn ByteStream>, TransportError> {
        let mut builder = self.client.get(request.url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().map_err(|e| TransportError::Io {
            errno: libc::EIO,
            message: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        Ok(Box::new(ReqwestStream {
            headers,
            socket: SocketHandle::next(),
            response,
        }))
    }
}

struct ReqwestStream {
    headers: Vec<(String, String)>,
    socket: SocketHandle,
    response: reqwest::blocking::Response,
}

impl ByteStream for ReqwestStream {
    fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, StreamError> {
        let bytes_read = self.response.read(buf).map_err(|e| {
            StreamError::new(e.raw_os_error().unwrap_or(libc::EIO), e.to_string())
        })?;
        Ok(ReadOutcome {
            bytes_read,
            // The body is identity-encoded, so EOF is message completion.
            finished: bytes_read == 0,
        })
    }

    fn ready_without_blocking(&mut self) -> Result<bool, StreamError> {
        // The blocking response cannot be probed without consuming data;
        // each readiness event performs one read.
        Ok(false)
    }

    fn socket(&self) -> SocketHandle {
        self.socket
    }
}
