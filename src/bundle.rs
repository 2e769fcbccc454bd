//! Bundle directory decoding (spec.md §4.D, §6).
//!
//! A bundle packs a 128×128 block of tiles at one zoom level: a 64-byte
//! opaque header, then a 131 072-byte index of 128×128 little-endian 8-byte
//! entries (5-byte offset + 3-byte size), then the raw tile payloads.

use crate::error::{TpkError, TpkResult};

/// Tiles per side of a bundle block.
pub const BUNDLE_DIM: u64 = 128;
const BUNDLE_HEADER_SIZE: u64 = 64;
const INDEX_ENTRY_SIZE: u64 = 8;
const INDEX_SIZE: u64 = BUNDLE_DIM * BUNDLE_DIM * INDEX_ENTRY_SIZE;

/// One tile's location within its bundle's payload region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleEntry {
    /// Byte offset of the tile, relative to the bundle *file's own start*
    /// (not past its header+index) — a tile immediately after the index
    /// carries offset `BundleDirectory::payload_region_start()`, never `0`.
    pub offset: u64,
    /// Tile's stored byte length.
    pub size: u64,
}

/// The decoded 128×128 offset/size table of one bundle file.
///
/// Entries are kept as `Option<BundleEntry>`: an all-zero or `size == 0`
/// slot is retained as `None` rather than dropped, so callers/diagnostics
/// can distinguish "absent" from "never decoded" (spec.md §9 Open Question 1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleDirectory {
    entries: Vec<Option<BundleEntry>>,
}

impl BundleDirectory {
    /// Total on-disk size of a bundle's header + index, before tile payloads begin.
    #[must_use]
    pub const fn payload_region_start() -> u64 {
        BUNDLE_HEADER_SIZE + INDEX_SIZE
    }

    /// Decodes a bundle directory from its raw file bytes (header + index + payloads).
    pub fn decode(bundle_bytes: &[u8]) -> TpkResult<Self> {
        let start = Self::payload_region_start() as usize;
        if bundle_bytes.len() < start {
            return Err(TpkError::MalformedArchive(format!(
                "bundle file is {} bytes, shorter than the {start}-byte header+index",
                bundle_bytes.len()
            )));
        }
        let index_bytes = &bundle_bytes[BUNDLE_HEADER_SIZE as usize..start];

        let mut entries = Vec::with_capacity((BUNDLE_DIM * BUNDLE_DIM) as usize);
        for chunk in index_bytes.chunks_exact(INDEX_ENTRY_SIZE as usize) {
            let mut offset_bytes = [0u8; 8];
            offset_bytes[..5].copy_from_slice(&chunk[0..5]);
            let offset = u64::from_le_bytes(offset_bytes);

            let mut size_bytes = [0u8; 8];
            size_bytes[..3].copy_from_slice(&chunk[5..8]);
            let size = u64::from_le_bytes(size_bytes);

            entries.push((size > 0).then_some(BundleEntry { offset, size }));
        }

        Ok(Self { entries })
    }

    /// Looks up the entry for tile `(row, col)` within this bundle's 128×128 block,
    /// where `row`/`col` are the tile's coordinates modulo 128.
    #[must_use]
    pub fn get(&self, row: u64, col: u64) -> Option<BundleEntry> {
        let index = (BUNDLE_DIM * (row % BUNDLE_DIM) + (col % BUNDLE_DIM)) as usize;
        self.entries.get(index).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bundle(entries: &[(u64, u64, u64)]) -> Vec<u8> {
        let mut bytes = vec![0u8; BundleDirectory::payload_region_start() as usize];
        for &(row, col, size) in entries {
            let index = (BUNDLE_DIM * row + col) as usize;
            let entry_start = (BUNDLE_HEADER_SIZE + index as u64 * INDEX_ENTRY_SIZE) as usize;
            let offset = 1000u64 + index as u64;
            bytes[entry_start..entry_start + 5].copy_from_slice(&offset.to_le_bytes()[..5]);
            bytes[entry_start + 5..entry_start + 8].copy_from_slice(&size.to_le_bytes()[..3]);
        }
        bytes
    }

    #[test]
    fn decodes_present_and_absent_entries() {
        let bytes = make_bundle(&[(3, 7, 256)]);
        let dir = BundleDirectory::decode(&bytes).unwrap();

        let entry = dir.get(3, 7).unwrap();
        assert_eq!(entry.size, 256);
        assert_eq!(entry.offset, 1000 + (128 * 3 + 7));

        assert!(dir.get(0, 0).is_none());
    }

    #[test]
    fn rejects_truncated_bundle() {
        let bytes = vec![0u8; 10];
        assert!(BundleDirectory::decode(&bytes).is_err());
    }
}
