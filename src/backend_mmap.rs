//! Local-file [`ByteSource`], memory-mapped.

use std::path::Path;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use fmmap::tokio::{AsyncMmapFile, AsyncMmapFileExt as _, AsyncOptions};

use crate::byte_source::{ByteSource, RangeRead};
use crate::error::{TpkError, TpkResult};

/// A [`ByteSource`] backed by a memory-mapped local file.
///
/// Local files are trusted not to mutate mid-session, so `known_etag` is
/// always `None` and reads never raise `EtagMismatch`.
pub struct MmapByteSource {
    file: AsyncMmapFile,
}

impl MmapByteSource {
    /// Opens `path` for random-access reads.
    pub async fn open<P: AsRef<Path>>(path: P) -> TpkResult<Self> {
        let file = AsyncMmapFile::open_with_options(path, AsyncOptions::new().read(true))
            .await
            .map_err(|e| TpkError::Io(std::io::Error::other(e.to_string())))?;
        Ok(Self { file })
    }
}

#[async_trait]
impl ByteSource for MmapByteSource {
    async fn size(&self) -> TpkResult<u64> {
        Ok(self.file.len() as u64)
    }

    async fn read(&self, offset: u64, length: u64) -> TpkResult<RangeRead> {
        let end = offset
            .checked_add(length)
            .ok_or_else(|| TpkError::Transport("read range overflow".to_string()))?;
        if end > self.file.len() as u64 {
            return Err(TpkError::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )));
        }
        let reader = self
            .file
            .reader(offset as usize)
            .map_err(|e| TpkError::Io(std::io::Error::other(e.to_string())))?;
        let bytes: Bytes = reader.copy_to_bytes(length as usize);
        Ok(RangeRead {
            bytes,
            etag: None,
            cache_control: None,
            expires: None,
        })
    }

    fn known_etag(&self) -> Option<String> {
        None
    }
}
