//! ZIP / ZIP64 central directory parsing (spec.md §4.B).
//!
//! Grounded on the hand-rolled ZIP central-directory reader in
//! `other_examples/d042f456_dacort-s3sh__src-archive-zip.rs.rs`: EOCD search,
//! central directory file header field layout, and ZIP64 extra-field
//! handling. Unlike that reader we never decompress archive-level entries —
//! TilePackage producers store everything uncompressed (spec.md §4.B), so
//! the only thing we extract per entry is where its payload bytes begin.

use std::collections::HashMap;

use bytes::{Buf, Bytes};

use crate::byte_source::ByteSource;
use crate::error::{TpkError, TpkResult};

const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const CENTRAL_DIR_SIGNATURE: u32 = 0x0201_4b50;
const ZIP64_EXTRA_TAG: u16 = 0x0001;
const TAIL_SCAN_SIZE: u64 = 98;
const CLASSIC_EOCD_SIZE: usize = 22;
const LOCAL_HEADER_FIXED_SIZE: u64 = 30;
const CENTRAL_HEADER_FIXED_SIZE: usize = 46;
const SENTINEL_32: u32 = 0xFFFF_FFFF;

/// One file's location within the archive, resolved to its payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileEntry {
    /// Stored byte length of the file's payload.
    pub size: u64,
    /// Absolute archive offset of the file's first payload byte (i.e. past
    /// the local file header and its name/extra fields).
    pub payload_offset: u64,
}

/// The parsed ZIP/ZIP64 central directory: every archive member's path and location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveIndex {
    files: HashMap<String, FileEntry>,
}

impl ArchiveIndex {
    /// Looks up a file by its archive-relative path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    /// Iterates over every `(path, entry)` pair in the archive.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FileEntry)> {
        self.files.iter()
    }

    /// Number of files in the archive.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// `true` if the archive's central directory has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Locates the end-of-central-directory record (classic or ZIP64) and
    /// parses every entry in the central directory it points to.
    pub async fn read(source: &dyn ByteSource) -> TpkResult<Self> {
        let archive_size = source.size().await?;
        let tail_len = TAIL_SCAN_SIZE.min(archive_size);
        let tail_start = archive_size - tail_len;
        let tail = source.read(tail_start, tail_len).await?.bytes;

        let (cd_offset, cd_size) = Self::locate_central_directory(&tail)?;

        if cd_offset
            .checked_add(cd_size)
            .is_none_or(|end| end > archive_size)
        {
            return Err(TpkError::MalformedArchive(format!(
                "central directory [{cd_offset}, +{cd_size}) extends past archive size {archive_size}"
            )));
        }

        let cd_bytes = source.read(cd_offset, cd_size).await?.bytes;
        let files = Self::parse_central_directory(&cd_bytes)?;

        Ok(Self { files })
    }

    fn locate_central_directory(tail: &[u8]) -> TpkResult<(u64, u64)> {
        if tail.len() >= 4 && u32::from_le_bytes(tail[0..4].try_into().unwrap()) == ZIP64_EOCD_SIGNATURE {
            if tail.len() < 56 {
                return Err(TpkError::MalformedArchive(
                    "ZIP64 end-of-central-directory record is truncated".into(),
                ));
            }
            let mut record = &tail[..];
            record.advance(32);
            let _entry_count = record.get_u64_le();
            let cd_size = record.get_u64_le();
            let cd_offset = record.get_u64_le();
            return Ok((cd_offset, cd_size));
        }

        if tail.len() < CLASSIC_EOCD_SIZE {
            return Err(TpkError::MalformedArchive(
                "archive too small for an end-of-central-directory record".into(),
            ));
        }
        let window = &tail[tail.len() - CLASSIC_EOCD_SIZE..];
        if u32::from_le_bytes(window[0..4].try_into().unwrap()) != EOCD_SIGNATURE {
            return Err(TpkError::MalformedArchive(
                "no ZIP or ZIP64 end-of-central-directory signature found".into(),
            ));
        }
        let mut record = window;
        record.advance(10);
        let _entry_count = record.get_u16_le();
        let cd_size = u64::from(record.get_u32_le());
        let cd_offset = u64::from(record.get_u32_le());
        Ok((cd_offset, cd_size))
    }

    fn parse_central_directory(mut data: &[u8]) -> TpkResult<HashMap<String, FileEntry>> {
        let mut files = HashMap::new();

        while data.len() >= CENTRAL_HEADER_FIXED_SIZE {
            let mut header = Bytes::copy_from_slice(&data[..CENTRAL_HEADER_FIXED_SIZE]);
            if header.get_u32_le() != CENTRAL_DIR_SIGNATURE {
                return Err(TpkError::MalformedArchive(
                    "central directory file header has a bad signature".into(),
                ));
            }

            header.advance(16); // version made by/needed, flags, method, mod time/date, crc32
            let mut compressed_size = u64::from(header.get_u32_le());
            header.advance(4); // uncompressed size
            let name_len = usize::from(header.get_u16_le());
            let extra_len = usize::from(header.get_u16_le());
            let comment_len = usize::from(header.get_u16_le());
            header.advance(8); // disk start, internal attrs, external attrs
            let mut relative_offset = u64::from(header.get_u32_le());

            let name_start = CENTRAL_HEADER_FIXED_SIZE;
            let extra_start = name_start + name_len;
            let comment_start = extra_start + extra_len;
            let entry_end = comment_start + comment_len;
            if data.len() < entry_end {
                return Err(TpkError::MalformedArchive(
                    "central directory file header is truncated".into(),
                ));
            }

            let name = std::str::from_utf8(&data[name_start..extra_start])
                .map_err(TpkError::Utf8)?
                .to_string();
            let extra = &data[extra_start..comment_start];

            if compressed_size == u64::from(SENTINEL_32) || relative_offset == u64::from(SENTINEL_32)
            {
                if let Some((zip64_size, zip64_offset)) =
                    Self::parse_zip64_extra(extra, compressed_size, relative_offset)
                {
                    if let Some(size) = zip64_size {
                        compressed_size = size;
                    }
                    if let Some(offset) = zip64_offset {
                        relative_offset = offset;
                    }
                }
            }

            let payload_offset = relative_offset + LOCAL_HEADER_FIXED_SIZE + name_len as u64;
            files.insert(
                name,
                FileEntry {
                    size: compressed_size,
                    payload_offset,
                },
            );

            data = &data[entry_end..];
        }

        Ok(files)
    }

    /// Parses a ZIP64 extended-info extra field (tag `0x0001`), returning
    /// `(size_override, offset_override)` in that order, each present only
    /// if the corresponding classic field carried the `0xffffffff` sentinel.
    fn parse_zip64_extra(
        mut extra: &[u8],
        compressed_size: u64,
        relative_offset: u64,
    ) -> Option<(Option<u64>, Option<u64>)> {
        while extra.len() >= 4 {
            let tag = u16::from_le_bytes([extra[0], extra[1]]);
            let block_len = u16::from_le_bytes([extra[2], extra[3]]) as usize;
            if extra.len() < 4 + block_len {
                return None;
            }
            let mut block = &extra[4..4 + block_len];
            if tag == ZIP64_EXTRA_TAG {
                let mut size = None;
                let mut offset = None;
                if compressed_size == u64::from(SENTINEL_32) && block.len() >= 8 {
                    size = Some(block.get_u64_le());
                }
                if relative_offset == u64::from(SENTINEL_32) && block.len() >= 8 {
                    offset = Some(block.get_u64_le());
                }
                return Some((size, offset));
            }
            extra = &extra[4 + block_len..];
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend_mmap::MmapByteSource;
    use std::io::Write;

    fn crc32(_data: &[u8]) -> u32 {
        0
    }

    /// Builds a minimal stored-only ZIP archive with the given `(name, bytes)` entries.
    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();

        for (name, bytes) in entries {
            let local_header_offset = out.len() as u32;
            out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes()); // version needed
            out.extend_from_slice(&0u16.to_le_bytes()); // flags
            out.extend_from_slice(&0u16.to_le_bytes()); // method: stored
            out.extend_from_slice(&0u16.to_le_bytes()); // mod time
            out.extend_from_slice(&0u16.to_le_bytes()); // mod date
            out.extend_from_slice(&crc32(bytes).to_le_bytes());
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes()); // compressed size
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes()); // uncompressed size
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes()); // extra len
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(bytes);

            central.extend_from_slice(&CENTRAL_DIR_SIGNATURE.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes()); // version made by
            central.extend_from_slice(&20u16.to_le_bytes()); // version needed
            central.extend_from_slice(&0u16.to_le_bytes()); // flags
            central.extend_from_slice(&0u16.to_le_bytes()); // method
            central.extend_from_slice(&0u16.to_le_bytes()); // mod time
            central.extend_from_slice(&0u16.to_le_bytes()); // mod date
            central.extend_from_slice(&crc32(bytes).to_le_bytes());
            central.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            central.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            central.extend_from_slice(&(name.len() as u16).to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes()); // extra len
            central.extend_from_slice(&0u16.to_le_bytes()); // comment len
            central.extend_from_slice(&0u16.to_le_bytes()); // disk start
            central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            central.extend_from_slice(&0u32.to_le_bytes()); // external attrs
            central.extend_from_slice(&local_header_offset.to_le_bytes());
            central.extend_from_slice(name.as_bytes());
        }

        let cd_offset = out.len() as u32;
        let cd_size = central.len() as u32;
        out.extend_from_slice(&central);

        out.extend_from_slice(&EOCD_SIGNATURE.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
        out.extend_from_slice(&cd_size.to_le_bytes());
        out.extend_from_slice(&cd_offset.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // comment len

        out
    }

    #[tokio::test]
    async fn parses_classic_central_directory() {
        let zip = build_zip(&[("root.json", b"{}"), ("a/b.bin", b"0123456789")]);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&zip).unwrap();
        let source = MmapByteSource::open(file.path()).await.unwrap();

        let index = ArchiveIndex::read(&source).await.unwrap();
        assert_eq!(index.len(), 2);

        let entry = index.get("root.json").unwrap();
        assert_eq!(entry.size, 2);
        let payload = source
            .read(entry.payload_offset, entry.size)
            .await
            .unwrap();
        assert_eq!(&payload.bytes[..], b"{}");

        let entry = index.get("a/b.bin").unwrap();
        let payload = source
            .read(entry.payload_offset, entry.size)
            .await
            .unwrap();
        assert_eq!(&payload.bytes[..], b"0123456789");
    }

    #[test]
    fn rejects_archive_with_no_eocd() {
        let data = vec![0u8; 10];
        let err = ArchiveIndex::locate_central_directory(&data).unwrap_err();
        assert!(matches!(err, TpkError::MalformedArchive(_)));
    }
}
