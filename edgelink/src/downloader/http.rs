//! HTTP transfer driver.
//!
//! Drives one download over a streaming HTTP client: builds the
//! conditional/range request, reconciles the response's `Content-Range` and
//! `ETag` headers against the transfer's offsets, and feeds newly received
//! bytes to the consumer callback.
//!
//! # Offset reconciliation
//!
//! Two offsets advance independently:
//!
//! - `bytes_downloaded`: current offset in the remote resource stream;
//! - `bytes_written`: current offset delivered to the consumer.
//!
//! They may differ: when we request `Range: bytes=1200-` but the server
//! responds with `Content-Range: bytes 1024-...` because it insists on
//! regular block boundaries, the 176 bytes in between arrive on the wire
//! but must not be delivered again. The packet handler forwards only the
//! bytes past `bytes_written` and lets `bytes_downloaded` catch up.

use tracing::{debug, error, info, warn};
use url::Url;

use super::{BlockHandler, DownloadConfig, Downloader, FinishHandler, TransferId};
use crate::error::{DownloadError, DownloadResult};
use crate::sched::JobHandle;
use crate::transport::{
    ByteStream, ClientFactory, HttpRequest, SocketHandle, StreamingClient, TransportError,
};

/// Opaque version identifier of a remote resource, as carried by the HTTP
/// `ETag` header. Detects that a paused download's target changed before
/// resuming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTag {
    value: Vec<u8>,
}

impl EntityTag {
    /// Maximum payload length in bytes.
    pub const MAX_SIZE: usize = 255;

    /// Creates a tag from its unquoted payload.
    pub fn new(value: impl Into<Vec<u8>>) -> Result<Self, DownloadError> {
        let value = value.into();
        if value.len() > Self::MAX_SIZE {
            return Err(DownloadError::TooLongEntityTag { size: value.len() });
        }
        Ok(Self { value })
    }

    /// The unquoted payload.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// The quoted form sent in `If-Match` headers.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", String::from_utf8_lossy(&self.value))
    }

    /// Reads a tag from response-header text: a quoted string whose payload
    /// is at most [`Self::MAX_SIZE`] bytes. Returns `None` for anything
    /// else; malformed quoting means "no tag available" rather than an
    /// error, for leniency towards legacy servers.
    pub fn from_header(text: &str) -> Option<Self> {
        let bytes = text.as_bytes();
        if bytes.len() < 2
            || bytes.len() > Self::MAX_SIZE + 2
            || bytes[0] != b'"'
            || bytes[bytes.len() - 1] != b'"'
        {
            return None;
        }
        Some(Self {
            value: bytes[1..bytes.len() - 1].to_vec(),
        })
    }

    /// Byte-exact comparison against response-header text, including the
    /// surrounding quotes.
    pub fn matches_header(&self, text: &str) -> bool {
        let bytes = text.as_bytes();
        bytes.len() == self.value.len() + 2
            && bytes[0] == b'"'
            && bytes[bytes.len() - 1] == b'"'
            && &bytes[1..bytes.len() - 1] == self.value.as_slice()
    }
}

/// Extracts the start byte from a `Content-Range` header of the form
/// `bytes <start>-<end>/<total-or-*>`. When the total is numeric it must
/// agree with the end byte (`end == total - 1`).
fn content_range_start(text: &str) -> Option<u64> {
    let rest = text.strip_prefix("bytes")?;
    if !rest.starts_with(|c: char| c.is_ascii_whitespace()) {
        return None;
    }
    let (range_part, total_part) = rest.trim_start().split_once('/')?;
    let (start_text, end_text) = range_part.split_once('-')?;
    let start = start_text.trim().parse::<u64>().ok()?;
    let end = end_text.trim().parse::<u64>().ok()?;
    if total_part == "*" {
        return Some(start);
    }
    let total = total_part.trim().parse::<u64>().ok()?;
    (total > 0 && end == total - 1).then_some(start)
}

/// State of one HTTP transfer.
///
/// Every owned resource is an `Option`, so teardown (plain drop) is safe at
/// any point of the lifecycle, including a constructor that failed after
/// acquiring only some of them.
pub struct HttpTransfer {
    id: TransferId,
    client: Box<dyn StreamingClient>,
    /// Parsed eagerly at construction; consumed when the request is sent.
    url: Option<Url>,
    stream: Option<Box<dyn ByteStream>>,
    /// The scheduled send-request job; at most one outstanding.
    pending_job: Option<JobHandle>,
    etag: Option<EntityTag>,
    /// Current offset in the remote resource stream.
    bytes_downloaded: u64,
    /// Current offset delivered to the consumer.
    bytes_written: u64,
    on_next_block: BlockHandler,
    on_finished: Option<FinishHandler>,
}

impl HttpTransfer {
    pub(crate) fn new(
        id: TransferId,
        url: Url,
        factory: &dyn ClientFactory,
        config: DownloadConfig,
    ) -> Result<Self, DownloadError> {
        let client = factory
            .create_client(&config.security)
            .map_err(|err| match err {
                TransportError::Status(status) => DownloadError::failed(i32::from(status)),
                TransportError::Io { errno, .. } => DownloadError::failed(errno),
            })?;

        Ok(Self {
            id,
            client,
            url: Some(url),
            stream: None,
            pending_job: None,
            etag: config.etag,
            bytes_downloaded: 0,
            bytes_written: config.start_offset,
            on_next_block: config.on_next_block,
            on_finished: Some(config.on_finished),
        })
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    /// Local offset delivered to the consumer so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Remote stream offset consumed so far.
    pub fn bytes_downloaded(&self) -> u64 {
        self.bytes_downloaded
    }

    pub(crate) fn socket(&self) -> Option<SocketHandle> {
        self.stream.as_ref().map(|stream| stream.socket())
    }

    pub(crate) fn set_pending_job(&mut self, handle: JobHandle) {
        self.pending_job = Some(handle);
    }

    pub(crate) fn take_pending_job(&mut self) -> Option<JobHandle> {
        self.pending_job.take()
    }

    /// Invokes the completion callback and releases the transfer.
    pub(crate) fn finish(mut self, result: DownloadResult) {
        if let Some(on_finished) = self.on_finished.take() {
            on_finished(result);
        }
    }

    /// Opens the streaming GET and reconciles the response headers.
    fn open_stream(&mut self) -> Result<(), DownloadError> {
        let url = match self.url.take() {
            Some(url) => url,
            None => return Err(DownloadError::failed(libc::EINVAL)),
        };

        let mut headers = Vec::new();
        if let Some(etag) = &self.etag {
            headers.push(("If-Match".to_string(), etag.quoted()));
        }
        if self.bytes_written > 0 {
            headers.push(("Range".to_string(), format!("bytes={}-", self.bytes_written)));
        }

        let stream = self
            .client
            .open(HttpRequest { url, headers })
            .map_err(|err| match err {
                // Precondition Failed: the resource changed under us and
                // resumption is unsafe.
                TransportError::Status(412) => {
                    error!(id = %self.id, "server reported precondition failed");
                    DownloadError::Expired {
                        errno: libc::ECONNABORTED,
                    }
                }
                TransportError::Status(status) => {
                    error!(id = %self.id, status, "request rejected");
                    DownloadError::failed(i32::from(status))
                }
                TransportError::Io { errno, message } => {
                    error!(id = %self.id, errno, %message, "could not send HTTP request");
                    DownloadError::failed(errno)
                }
            })?;

        for (name, value) in stream.headers() {
            if name.eq_ignore_ascii_case("Content-Range") {
                let start = match content_range_start(value) {
                    // The server must not skip past data we already have.
                    Some(start) if start <= self.bytes_written => start,
                    _ => {
                        error!(
                            id = %self.id,
                            content_range = %value,
                            "could not resume: invalid Content-Range"
                        );
                        return Err(DownloadError::failed(libc::EINVAL));
                    }
                };
                self.bytes_downloaded = start;
            } else if name.eq_ignore_ascii_case("ETag") {
                match &self.etag {
                    Some(held) => {
                        if !held.matches_header(value) {
                            error!(id = %self.id, "entity tag does not match");
                            return Err(DownloadError::Expired {
                                errno: libc::ECONNABORTED,
                            });
                        }
                    }
                    None => match EntityTag::from_header(value) {
                        Some(tag) => self.etag = Some(tag),
                        None => {
                            warn!(id = %self.id, etag = %value, "ignoring malformed entity tag")
                        }
                    },
                }
            }
        }

        self.stream = Some(stream);
        Ok(())
    }

    /// Drains the stream without blocking: keeps reading as long as the
    /// stream reports more data ready. Returns the terminal outcome once
    /// the transfer finishes or fails, `None` while it stays live.
    pub(crate) fn handle_packet(&mut self, buf: &mut [u8]) -> Option<DownloadResult> {
        loop {
            let stream = self.stream.as_mut()?;
            let outcome = match stream.read(buf) {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(id = %self.id, errno = err.errno, "stream read failed");
                    return Some(Err(DownloadError::failed(err.errno)));
                }
            };

            let bytes_read = outcome.bytes_read;
            if bytes_read > 0 {
                debug_assert!(self.bytes_downloaded <= self.bytes_written);
                let stream_end = self.bytes_downloaded + bytes_read as u64;
                if stream_end > self.bytes_written {
                    // Only the bytes past bytes_written are new; they sit at
                    // the tail of what was just read.
                    let fresh = (stream_end - self.bytes_written) as usize;
                    let block = &buf[bytes_read - fresh..bytes_read];
                    if let Err(err) = (self.on_next_block)(block, self.etag.as_ref()) {
                        return Some(Err(DownloadError::failed(err.errno)));
                    }
                    self.bytes_written += fresh as u64;
                }
                self.bytes_downloaded = stream_end;
            }

            if outcome.finished {
                info!(id = %self.id, "HTTP transfer finished");
                return Some(Ok(()));
            }

            match stream.ready_without_blocking() {
                Ok(true) => {}
                Ok(false) => return None,
                Err(err) => {
                    error!(id = %self.id, errno = err.errno, "readiness probe failed");
                    return Some(Err(DownloadError::failed(libc::EIO)));
                }
            }
        }
    }
}

impl std::fmt::Debug for HttpTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransfer")
            .field("id", &self.id)
            .field("bytes_downloaded", &self.bytes_downloaded)
            .field("bytes_written", &self.bytes_written)
            .field("streaming", &self.stream.is_some())
            .finish()
    }
}

/// Scheduled once per transfer: sends the initial (or resuming) request.
///
/// Re-resolves the transfer by identifier; the transfer may have been
/// aborted since the job was scheduled, in which case this is a silent
/// no-op rather than an error.
pub(crate) fn send_request(dl: &mut Downloader, id: TransferId) {
    let Some(mut ctx) = dl.take_context(id) else {
        debug!(id = %id, "download expired before the request was sent");
        return;
    };

    let outcome = match &mut ctx {
        super::TransferCtx::Http(transfer) => {
            // The job is running; its handle is spent.
            transfer.pending_job = None;
            transfer.open_stream()
        }
    };

    match outcome {
        Ok(()) => dl.restore_context(id, ctx),
        Err(err) => dl.finish_transfer(ctx, Err(err)),
    }
}
