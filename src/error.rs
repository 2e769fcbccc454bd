//! The single error type shared across every component of this crate.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type TpkResult<T> = Result<T, TpkError>;

/// Every failure kind a `TilePackage` accessor operation can surface.
#[derive(Debug, Error)]
pub enum TpkError {
    /// The archive has no valid (ZIP64) end-of-central-directory record.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// A tile's declared compression tag isn't one this crate can decode.
    #[error("unsupported tile compression tag: {0}")]
    UnsupportedCompression(String),

    /// The byte source observed an ETag different from the one it was opened/retried with.
    #[error("archive ETag changed (previous: {previous:?}, observed: {observed:?})")]
    EtagMismatch {
        /// ETag the caller had cached, if any.
        previous: Option<String>,
        /// ETag newly observed on the byte source.
        observed: Option<String>,
    },

    /// The subdivider was invoked with a target tile that isn't a descendant of the parent tile.
    #[error("target tile ({tz}, {tx}, {ty}) is not contained in parent ({pz}, {px}, {py})")]
    ContainmentViolation {
        /// Parent zoom.
        pz: u8,
        /// Parent column.
        px: u64,
        /// Parent row.
        py: u64,
        /// Target zoom.
        tz: u8,
        /// Target column.
        tx: u64,
        /// Target row.
        ty: u64,
    },

    /// Any read failure from the underlying byte source (I/O, HTTP transport, etc).
    #[error("transport error: {0}")]
    Transport(String),

    /// A `root.json`/`iteminfo.json`/`metadata.json` document didn't parse or didn't have an
    /// expected field.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// `esriinfo/iteminfo.xml` failed to parse as a well-formed element tree.
    #[error("XML error: {0}")]
    Xml(String),

    /// A filename or text field inside the archive wasn't valid UTF-8.
    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// An I/O error from a local file source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A malformed or unsupported URL was supplied to the HTTP backend.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The MVT protobuf payload being decoded or re-encoded was malformed.
    #[error("malformed MVT payload: {0}")]
    MalformedMvt(String),

    /// A named file or resource does not exist in the archive's file table.
    #[error("file not found in archive: {0}")]
    FileNotFound(String),

    #[cfg(feature = "http")]
    /// An error surfaced by the `reqwest` HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TpkError {
    /// `true` for [`TpkError::EtagMismatch`] — the only kind the retry policy in
    /// [`crate::facade::PackageFacade`] recovers from automatically.
    #[must_use]
    pub fn is_etag_mismatch(&self) -> bool {
        matches!(self, TpkError::EtagMismatch { .. })
    }
}
