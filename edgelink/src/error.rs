//! Error types for the device-management core.

use thiserror::Error;

/// Terminal outcome of a download, as reported through the completion
/// callback. `Ok(())` means the transfer finished cleanly.
pub type DownloadResult = Result<(), DownloadError>;

/// Errors produced by the downloader.
///
/// The core never retries on its own; retry policy is a caller concern.
/// Every failing transfer reports exactly one of these through its
/// completion callback and releases all of its resources.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /// The download URL could not be parsed.
    #[error("invalid URL `{input}`: {reason}")]
    InvalidUrl { input: String, reason: String },

    /// The URL scheme does not select any available transport.
    #[error("unsupported protocol `{protocol}`")]
    UnsupportedProtocol { protocol: String },

    /// An entity tag longer than [`EntityTag::MAX_SIZE`] bytes was supplied.
    ///
    /// [`EntityTag::MAX_SIZE`]: crate::downloader::EntityTag::MAX_SIZE
    #[error("entity tag of {size} bytes exceeds the 255-byte limit")]
    TooLongEntityTag { size: usize },

    /// Generic transport or I/O failure, with an errno-equivalent detail
    /// code (an `errno` value, or the raw HTTP status for rejected
    /// requests).
    #[error("download failed (detail code {errno})")]
    Failed { errno: i32 },

    /// The resumption precondition no longer holds: the remote resource
    /// changed since the transfer was started (entity tag mismatch or an
    /// HTTP 412 response). The caller must restart from scratch rather
    /// than resume.
    #[error("download expired (detail code {errno})")]
    Expired { errno: i32 },
}

impl DownloadError {
    pub fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn failed(errno: i32) -> Self {
        Self::Failed { errno }
    }

    /// True for errors that make byte-exact resumption unsafe.
    pub fn is_expired(&self) -> bool {
        matches!(self, Self::Expired { .. })
    }
}

/// Errors produced by object-level operations (validation, transactions).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ObjectError {
    /// Validation failure caused by the remote party's request; the object
    /// state is unchanged.
    #[error("bad request")]
    BadRequest,

    /// Allocation failure or invariant breach; distinct from bad input so
    /// callers can choose not to retry.
    #[error("internal error")]
    Internal,
}
