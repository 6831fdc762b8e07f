//! Core of an LwM2M device-management agent: a resumable block-oriented
//! downloader and the Security object's transactional data store.
//!
//! # Downloader
//!
//! [`Downloader`] owns the set of active transfers. Each transfer streams
//! its resource through a transport driver (HTTP today), resuming
//! byte-exactly after interruptions via `Range` requests guarded by
//! entity-tag validation. The registry exposes the transfers' I/O sources
//! and the scheduler's next deadline so a single-threaded event loop can
//! multiplex everything without blocking:
//!
//! ```ignore
//! use edgelink::{DownloadConfig, Downloader, TransportSecurity};
//!
//! let mut downloader = Downloader::new();
//! let id = downloader.start_transfer(DownloadConfig {
//!     url: "https://updates.example.com/firmware.bin".to_string(),
//!     start_offset: 0,
//!     etag: None,
//!     security: TransportSecurity::NoSec,
//!     on_next_block: Box::new(|block, _etag| {
//!         // persist the block
//!         Ok(())
//!     }),
//!     on_finished: Box::new(|result| println!("done: {:?}", result)),
//! })?;
//!
//! loop {
//!     downloader.run_due_jobs();
//!     for socket in downloader.sockets() {
//!         downloader.serve(socket);
//!     }
//!     if downloader.find(id).is_none() {
//!         break; // finished or aborted
//!     }
//! }
//! ```
//!
//! # Security object
//!
//! [`SecurityObject`] keeps the per-server credential instances. Remote
//! writes mutate it field-by-field between
//! [`SecurityObject::transaction_begin`] and a closing
//! [`SecurityObject::transaction_commit`] /
//! [`SecurityObject::transaction_rollback`]; consistency (uniqueness of
//! short server IDs, a single bootstrap instance, credential completeness)
//! is enforced by [`SecurityObject::transaction_validate`] over the
//! complete proposed state, and rollback restores the exact pre-transaction
//! contents.

pub mod downloader;
pub mod error;
pub mod sched;
pub mod security;
pub mod transport;

pub use downloader::{
    BlockError, BlockHandler, DownloadConfig, Downloader, DownloaderConfig, EntityTag,
    FinishHandler, TransferCtx, TransferId,
};
pub use error::{DownloadError, DownloadResult, ObjectError};
pub use sched::{JobHandle, Scheduler};
pub use security::{
    SecurityInstance, SecurityObject, SmsSecurityMode, Ssid, UdpSecurityMode,
};
pub use transport::{
    ByteStream, ClientFactory, HttpRequest, ReadOutcome, ReqwestClientFactory,
    ReqwestStreamingClient, SocketHandle, StreamError, StreamingClient, TransportError,
    TransportSecurity,
};
