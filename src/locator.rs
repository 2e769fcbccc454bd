//! Maps a `(z, x, y)` tile coordinate to its bundle file and, once that
//! bundle's directory is known, to the tile's decompressed bytes (spec.md §4.E).

use bytes::Bytes;

use crate::bundle::{BundleDirectory, BUNDLE_DIM};
use crate::byte_source::ByteSource;
use crate::decompress;
use crate::header::Header;

/// A fetched and decompressed tile, plus any passthrough caching headers (spec.md §4.A, §4.E).
#[derive(Debug, Clone)]
pub struct TileBytes {
    /// Decompressed tile payload.
    pub bytes: Bytes,
    /// Passthrough `Cache-Control`, if the byte source reported one.
    pub cache_control: Option<String>,
    /// Passthrough `Expires`, if the byte source reported one.
    pub expires: Option<String>,
}

/// The 128-aligned block origin `floor(coord / 128) * 128`.
#[must_use]
pub fn block_origin(coord: u64) -> u64 {
    (coord / BUNDLE_DIM) * BUNDLE_DIM
}

/// Builds the archive-relative bundle path for `(z, x, y)` under `prefix`
/// (`"tile"` for TPKX, `"p12/tile"` for VTPK): `{prefix}/L{zz}/R{row}C{col}.bundle`,
/// with `row`/`col` the 128-aligned origins of `y`/`x` in lowercase hex,
/// zero-padded to 4 digits, and `zz` the zoom zero-padded to 2 digits.
#[must_use]
pub fn bundle_path(prefix: &str, z: u8, x: u64, y: u64) -> String {
    let row = block_origin(y);
    let col = block_origin(x);
    format!("{prefix}/L{z:02}/R{row:04x}C{col:04x}.bundle")
}

/// Reads and decompresses the tile at `(z, x, y)` given its bundle's already-decoded
/// directory and the bundle file's archive-relative payload offset (the archive
/// `FileEntry.payload_offset`, i.e. the bundle file's first byte, not past its
/// header+index — a tile's `entry.offset` is already relative to that, spec.md
/// §4.D/§4.E). Returns `None` if the directory has no entry for this coordinate
/// (spec.md §4.D "absent").
pub async fn read_tile(
    header: &Header,
    source: &dyn ByteSource,
    directory: &BundleDirectory,
    bundle_file_payload_offset: u64,
    x: u64,
    y: u64,
) -> crate::error::TpkResult<Option<TileBytes>> {
    let Some(entry) = directory.get(y, x) else {
        return Ok(None);
    };

    let slab = source
        .read(bundle_file_payload_offset + entry.offset, entry.size)
        .await?;
    let decompressed = decompress::decompress(header.tile_compression().clone(), &slab.bytes).await?;

    Ok(Some(TileBytes {
        bytes: Bytes::from(decompressed),
        cache_control: slab.cache_control,
        expires: slab.expires,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_origin_floors_to_128() {
        assert_eq!(block_origin(0), 0);
        assert_eq!(block_origin(127), 0);
        assert_eq!(block_origin(128), 128);
        assert_eq!(block_origin(300), 256);
    }

    #[test]
    fn bundle_path_matches_esri_layout() {
        assert_eq!(bundle_path("tile", 5, 3, 7), "tile/L05/R0000C0000.bundle");
        assert_eq!(
            bundle_path("p12/tile", 12, 300, 9000),
            "p12/tile/L12/R2300C0100.bundle"
        );
    }
}
