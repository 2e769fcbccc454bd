//! Tile payload decompression (spec.md §6 "Decompression", §4.E).

use tokio::io::AsyncReadExt;

use crate::error::{TpkError, TpkResult};
use crate::header::Compression;

/// Decompresses `bytes` per `tag`. `None` is a cheap passthrough copy;
/// `Gzip` drives an async gzip decoder. Any other tag is
/// [`TpkError::UnsupportedCompression`].
pub async fn decompress(tag: Compression, bytes: &[u8]) -> TpkResult<Vec<u8>> {
    match tag {
        Compression::None => Ok(bytes.to_vec()),
        Compression::Gzip => {
            let mut out = Vec::with_capacity(bytes.len() * 2);
            async_compression::tokio::bufread::GzipDecoder::new(bytes)
                .read_to_end(&mut out)
                .await
                .map_err(TpkError::Io)?;
            Ok(out)
        }
        Compression::Unknown(tag) => Err(TpkError::UnsupportedCompression(tag)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn none_is_passthrough() {
        let out = decompress(Compression::None, b"hello").await.unwrap();
        assert_eq!(out, b"hello");
    }

    #[tokio::test]
    async fn gzip_round_trips() {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(b"hello, tiles").unwrap();
        let compressed = encoder.finish().unwrap();

        let out = decompress(Compression::Gzip, &compressed).await.unwrap();
        assert_eq!(out, b"hello, tiles");
    }

    #[tokio::test]
    async fn unknown_tag_is_unsupported() {
        let err = decompress(Compression::Unknown("brotli".into()), b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, TpkError::UnsupportedCompression(_)));
    }
}
