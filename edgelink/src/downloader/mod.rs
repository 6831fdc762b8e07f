//! Resumable block-oriented downloader.
//!
//! The [`Downloader`] registry owns every active transfer context, assigns
//! transfer identifiers, and multiplexes the transfers' I/O sources for the
//! caller's event loop. Transport drivers (currently HTTP) implement the
//! per-transfer state machine; see [`http`].
//!
//! # Event loop integration
//!
//! The registry never blocks. The external event loop is expected to
//! alternate between:
//!
//! 1. waiting for readiness on [`Downloader::sockets`], bounded by
//!    [`Downloader::next_job_in`],
//! 2. routing readiness events through [`Downloader::serve`], and
//! 3. draining due jobs with [`Downloader::run_due_jobs`].
//!
//! # Cancellation safety
//!
//! Scheduled jobs capture a [`TransferId`], never a context reference, and
//! re-resolve it when they run. Aborting a transfer removes it from the
//! registry, so a job firing afterwards observes "not found" and exits
//! silently. Identifiers are not reused while any transfer is live.

pub mod http;

pub use http::{EntityTag, HttpTransfer};

use std::collections::HashMap;
use std::time::Duration;

use tracing::{debug, info, warn};
use url::Url;

use crate::error::{DownloadError, DownloadResult};
use crate::sched::Scheduler;
use crate::transport::{ClientFactory, ReqwestClientFactory, SocketHandle, TransportSecurity};

/// Identifier of an active transfer, unique among live transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(u32);

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failure reported by the byte-consumer callback, with an errno-equivalent
/// detail code the transfer is aborted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockError {
    pub errno: i32,
}

impl BlockError {
    pub fn new(errno: i32) -> Self {
        Self { errno }
    }
}

/// Byte-consumer callback: receives each new contiguous block exactly once,
/// together with the entity tag known at the time (absent until the first
/// response carrying one).
pub type BlockHandler = Box<dyn FnMut(&[u8], Option<&EntityTag>) -> Result<(), BlockError>>;

/// Completion callback: invoked exactly once per started transfer, before
/// the transfer's resources are released.
pub type FinishHandler = Box<dyn FnOnce(DownloadResult)>;

/// Input to [`Downloader::start_transfer`].
pub struct DownloadConfig {
    /// Download URL; its scheme selects the transport driver.
    pub url: String,
    /// Byte offset to resume from; 0 starts from the beginning.
    pub start_offset: u64,
    /// Entity tag recorded when the transfer was previously interrupted.
    pub etag: Option<EntityTag>,
    /// Transport-security parameters, passed through to the transport.
    pub security: TransportSecurity,
    pub on_next_block: BlockHandler,
    pub on_finished: FinishHandler,
}

/// Tuning knobs for a [`Downloader`].
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    /// Size of the shared read buffer all transfers stream through.
    pub in_buffer_size: usize,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            in_buffer_size: 4096,
        }
    }
}

/// An active transfer, variant over transport kind.
pub enum TransferCtx {
    Http(HttpTransfer),
}

impl TransferCtx {
    pub fn id(&self) -> TransferId {
        match self {
            Self::Http(transfer) => transfer.id(),
        }
    }

    /// The I/O-source token of the transfer's open stream, if any.
    pub fn socket(&self) -> Option<SocketHandle> {
        match self {
            Self::Http(transfer) => transfer.socket(),
        }
    }

    /// Local offset delivered to the consumer so far; the offset to resume
    /// from if the transfer is interrupted.
    pub fn bytes_written(&self) -> u64 {
        match self {
            Self::Http(transfer) => transfer.bytes_written(),
        }
    }

    /// Remote stream offset consumed so far.
    pub fn bytes_downloaded(&self) -> u64 {
        match self {
            Self::Http(transfer) => transfer.bytes_downloaded(),
        }
    }

    fn handle_packet(&mut self, buf: &mut [u8]) -> Option<DownloadResult> {
        match self {
            Self::Http(transfer) => transfer.handle_packet(buf),
        }
    }
}

/// Registry of active transfers.
///
/// Exclusively owns every transfer context; all teardown goes through
/// [`Downloader::abort_transfer`] (or the drivers' internal abort paths),
/// which reports the terminal reason through the completion callback
/// exactly once and releases every owned resource.
pub struct Downloader {
    contexts: HashMap<TransferId, TransferCtx>,
    sched: Scheduler<Downloader>,
    client_factory: Box<dyn ClientFactory>,
    /// Shared scratch buffer, lent to one packet handler at a time.
    in_buffer: Vec<u8>,
    next_id: u32,
}

impl Downloader {
    /// Creates a downloader backed by the default reqwest transport.
    pub fn new() -> Self {
        Self::with_client_factory(Box::new(ReqwestClientFactory::new()))
    }

    /// Creates a downloader with a custom transport factory.
    pub fn with_client_factory(client_factory: Box<dyn ClientFactory>) -> Self {
        Self::with_config(client_factory, DownloaderConfig::default())
    }

    /// Creates a downloader with custom tuning.
    pub fn with_config(client_factory: Box<dyn ClientFactory>, config: DownloaderConfig) -> Self {
        Self {
            contexts: HashMap::new(),
            sched: Scheduler::new(),
            client_factory,
            in_buffer: vec![0; config.in_buffer_size.max(1)],
            next_id: 0,
        }
    }

    /// Starts a new transfer.
    ///
    /// The URL is validated eagerly: a parse failure or an unsupported
    /// scheme is returned immediately and nothing is scheduled. On success
    /// the initial request is scheduled for immediate execution and the
    /// transfer's identifier is returned.
    pub fn start_transfer(&mut self, config: DownloadConfig) -> Result<TransferId, DownloadError> {
        let url = Url::parse(&config.url)
            .map_err(|e| DownloadError::invalid_url(&config.url, e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(DownloadError::UnsupportedProtocol {
                    protocol: other.to_string(),
                })
            }
        }

        let id = self.next_transfer_id();
        let transfer = HttpTransfer::new(id, url, self.client_factory.as_ref(), config)?;
        self.contexts.insert(id, TransferCtx::Http(transfer));

        let handle = self
            .sched
            .schedule_now(Box::new(move |dl: &mut Downloader| http::send_request(dl, id)));
        if let Some(TransferCtx::Http(transfer)) = self.contexts.get_mut(&id) {
            transfer.set_pending_job(handle);
        }

        debug!(id = %id, "transfer started");
        Ok(id)
    }

    /// Looks up an active transfer.
    ///
    /// Returns `None` for identifiers whose transfer already finished or
    /// was aborted; scheduled jobs rely on this to exit silently instead of
    /// acting on a torn-down transfer.
    pub fn find(&self, id: TransferId) -> Option<&TransferCtx> {
        self.contexts.get(&id)
    }

    /// I/O-source tokens of every transfer with an open stream, for the
    /// caller's multiplexed wait.
    pub fn sockets(&self) -> Vec<SocketHandle> {
        self.contexts
            .values()
            .filter_map(|ctx| ctx.socket())
            .collect()
    }

    /// Routes a readiness event to the owning transfer's packet handler.
    ///
    /// Unknown sockets are ignored; the event loop may race against an
    /// abort.
    pub fn serve(&mut self, socket: SocketHandle) {
        let id = self
            .contexts
            .iter()
            .find_map(|(id, ctx)| (ctx.socket() == Some(socket)).then_some(*id));
        let Some(id) = id else {
            debug!(?socket, "readiness event for unknown socket");
            return;
        };
        self.handle_packet(id);
    }

    /// Aborts a transfer: reports `reason` through its completion callback
    /// (exactly once) and releases every resource it owns. Aborting an
    /// unknown identifier is a no-op.
    pub fn abort_transfer(&mut self, id: TransferId, reason: DownloadResult) {
        match self.contexts.remove(&id) {
            Some(ctx) => self.finish_transfer(ctx, reason),
            None => debug!(id = %id, "abort requested for unknown transfer"),
        }
    }

    /// Number of active transfers.
    pub fn active_transfers(&self) -> usize {
        self.contexts.len()
    }

    /// Time until the next scheduled job is due; bounds the event loop's
    /// wait step.
    pub fn next_job_in(&self) -> Option<Duration> {
        self.sched.time_to_next()
    }

    /// Runs every currently-due scheduled job.
    pub fn run_due_jobs(&mut self) {
        for job in self.sched.take_due() {
            job(self);
        }
    }

    fn handle_packet(&mut self, id: TransferId) {
        // The context is detached while its handler runs, so callbacks
        // observe a registry without it and lookups fail safely.
        let Some(mut ctx) = self.contexts.remove(&id) else {
            return;
        };
        match ctx.handle_packet(&mut self.in_buffer) {
            None => {
                self.contexts.insert(id, ctx);
            }
            Some(result) => self.finish_transfer(ctx, result),
        }
    }

    fn next_transfer_id(&mut self) -> TransferId {
        // 0 is reserved; identifiers are never reused while live.
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id == 0 {
                continue;
            }
            let id = TransferId(self.next_id);
            if !self.contexts.contains_key(&id) {
                return id;
            }
        }
    }

    pub(crate) fn take_context(&mut self, id: TransferId) -> Option<TransferCtx> {
        self.contexts.remove(&id)
    }

    pub(crate) fn restore_context(&mut self, id: TransferId, ctx: TransferCtx) {
        self.contexts.insert(id, ctx);
    }

    pub(crate) fn finish_transfer(&mut self, ctx: TransferCtx, result: DownloadResult) {
        match ctx {
            TransferCtx::Http(mut transfer) => {
                if let Some(handle) = transfer.take_pending_job() {
                    self.sched.cancel(handle);
                }
                match &result {
                    Ok(()) => info!(id = %transfer.id(), "transfer finished"),
                    Err(err) => warn!(id = %transfer.id(), error = %err, "transfer aborted"),
                }
                transfer.finish(result);
            }
        }
    }
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Downloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloader")
            .field("active_transfers", &self.contexts.len())
            .field("sched", &self.sched)
            .finish()
    }
}
