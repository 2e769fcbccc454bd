//! Random-access byte range reader contract (spec.md §4.A).

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TpkResult;

/// The result of a single [`ByteSource::read`] call.
#[derive(Debug, Clone)]
pub struct RangeRead {
    /// The bytes in `[offset, offset+length)`.
    pub bytes: Bytes,
    /// Strong ETag of the underlying resource, if the backend can observe one.
    pub etag: Option<String>,
    /// Passthrough `Cache-Control` header, for callers that want to honor it.
    pub cache_control: Option<String>,
    /// Passthrough `Expires` header, for callers that want to honor it.
    pub expires: Option<String>,
}

/// A random-access byte range source over a local file or a remote archive.
///
/// Implementations must tolerate overlapping concurrent reads (spec.md §5):
/// a `ByteSource` is shared behind an `Arc` by [`crate::facade::PackageFacade`]
/// and the cache layer, and many tile requests may be in flight at once.
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Total size of the archive in bytes.
    async fn size(&self) -> TpkResult<u64>;

    /// Reads `length` bytes starting at `offset`.
    ///
    /// If the caller previously observed an ETag for this source and the
    /// backend's current ETag differs, implementations MUST fail with
    /// [`crate::error::TpkError::EtagMismatch`] rather than silently serving
    /// data from the new archive generation.
    async fn read(&self, offset: u64, length: u64) -> TpkResult<RangeRead>;

    /// The ETag currently associated with this source, if known without a read.
    /// Returns `None` until at least one `read` (or, for HTTP, the initial
    /// probe) has observed one.
    fn known_etag(&self) -> Option<String>;
}
