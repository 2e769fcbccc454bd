//! Glues the archive reader, header builder, bundle locator, coverage map,
//! MVT subdivider, and cache into the crate's public entry point (spec.md §4.I).

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;

use crate::archive_index::ArchiveIndex;
use crate::bundle::BundleDirectory;
use crate::byte_source::ByteSource;
use crate::cache::Cache;
use crate::cancellation::CancellationHandle;
use crate::config::PackageOptions;
use crate::error::{TpkError, TpkResult};
use crate::header::{Header, HeaderBuilder, PackageKind};
use crate::locator::{self, TileBytes};
use crate::mvt::{subdivide, SubdivideOptions};

#[cfg(feature = "http")]
use crate::backend_http::HttpByteSource;
#[cfg(feature = "mmap")]
use crate::backend_mmap::MmapByteSource;

/// The read-only accessor for one open TilePackage archive.
///
/// Holds a shared [`ByteSource`] and a private [`Cache`] keyed on
/// `archive_key` — an opaque identifier (the path or URL the archive was
/// opened with) that lets the same cache back multiple concurrently open
/// archives without cross-contamination.
pub struct PackageFacade {
    source: Arc<dyn ByteSource>,
    archive_key: String,
    options: PackageOptions,
    cache: Cache,
}

impl PackageFacade {
    /// Wraps an already-constructed [`ByteSource`] under `archive_key`.
    #[must_use]
    pub fn new(source: Arc<dyn ByteSource>, archive_key: impl Into<String>, options: PackageOptions) -> Self {
        Self {
            source,
            archive_key: archive_key.into(),
            cache: Cache::new(options.max_cache_entries),
            options,
        }
    }

    /// Opens a local `.tpkx`/`.vtpk` file, memory-mapped.
    #[cfg(feature = "mmap")]
    pub async fn open_mmap(path: impl AsRef<std::path::Path>, options: PackageOptions) -> TpkResult<Self> {
        let path = path.as_ref();
        let archive_key = path.to_string_lossy().into_owned();
        let source = MmapByteSource::open(path).await?;
        Ok(Self::new(Arc::new(source), archive_key, options))
    }

    /// Opens a remote archive over HTTP(S) range requests.
    #[cfg(feature = "http")]
    pub fn open_http(url: impl Into<String>, options: PackageOptions) -> TpkResult<Self> {
        let url = url.into();
        let source = HttpByteSource::new(reqwest::Client::new(), url.clone())?;
        Ok(Self::new(Arc::new(source), url, options))
    }

    /// Retries the wrapped operation exactly once after invalidating the
    /// header slot if it failed with `EtagMismatch` (spec.md §4.I retry policy).
    async fn with_etag_retry<T, F, Fut>(&self, op: F) -> TpkResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = TpkResult<T>>,
    {
        match op().await {
            Err(e) if e.is_etag_mismatch() => {
                self.cache.invalidate_header(&self.archive_key).await;
                op().await
            }
            other => other,
        }
    }

    async fn load_header(&self) -> TpkResult<Arc<Header>> {
        self.cache
            .get_header(&self.archive_key, || async {
                let index = ArchiveIndex::read(self.source.as_ref()).await?;
                HeaderBuilder::build(self.source.as_ref(), &index, &self.archive_key, self.options.coverage_check).await
            })
            .await
    }

    /// Returns the archive's descriptor, building it on first use and sharing
    /// it with every other caller until an ETag mismatch evicts it.
    pub async fn get_header(&self, _cancel: Option<&CancellationHandle>) -> TpkResult<Arc<Header>> {
        self.with_etag_retry(|| self.load_header()).await
    }

    /// Looks up the tile at `(z, x, y)`, descending to a cached or freshly
    /// decoded ancestor and running the overzoom subdivider when the exact
    /// tile is absent from an indexed VTPK pyramid (spec.md §4.I `getZxy`).
    pub async fn get_zxy(
        &self,
        z: u8,
        x: u64,
        y: u64,
        cancel: Option<&CancellationHandle>,
    ) -> TpkResult<Option<TileBytes>> {
        self.with_etag_retry(|| self.get_zxy_once(z, x, y, cancel)).await
    }

    async fn get_zxy_once(
        &self,
        z: u8,
        x: u64,
        y: u64,
        cancel: Option<&CancellationHandle>,
    ) -> TpkResult<Option<TileBytes>> {
        if cancel.is_some_and(CancellationHandle::is_cancelled) {
            return Ok(None);
        }

        let header = self.load_header().await?;
        let zoom_range = header.zoom_range();
        if z < zoom_range.min_zoom || z > zoom_range.max_zoom {
            return Ok(None);
        }

        if let Some(tile) = self.direct_tile(&header, z, x, y).await? {
            return Ok(Some(tile));
        }

        if header.package_kind() != PackageKind::Vtpk {
            return Ok(None);
        }
        let Some(coverage) = header.coverage() else {
            return Ok(None);
        };
        let Some((pz, px, py)) = coverage.find_ancestor(z, x, y, zoom_range.min_zoom) else {
            return Ok(None);
        };

        let dz = z - pz;
        if dz > self.options.max_dz {
            return Ok(None);
        }

        if let Some(cached) = self.cache.get_subdivided_tile(&self.archive_key, z, x, y).await {
            return Ok(Some(TileBytes {
                bytes: cached,
                cache_control: None,
                expires: None,
            }));
        }

        if cancel.is_some_and(CancellationHandle::is_cancelled) {
            return Ok(None);
        }

        let Some(parent) = self.direct_tile(&header, pz, px, py).await? else {
            return Ok(None);
        };

        let subdivided = subdivide(&parent.bytes, pz, px, py, z, x, y, &SubdivideOptions::default())?;
        let subdivided = Bytes::from(subdivided);
        self.cache
            .insert_subdivided_tile(&self.archive_key, z, x, y, subdivided.clone())
            .await;

        Ok(Some(TileBytes {
            bytes: subdivided,
            cache_control: parent.cache_control,
            expires: parent.expires,
        }))
    }

    /// Reads the bundle holding `(z, x, y)` and the tile inside it, if both
    /// the bundle file and the tile's directory slot exist.
    async fn direct_tile(&self, header: &Header, z: u8, x: u64, y: u64) -> TpkResult<Option<TileBytes>> {
        let path = locator::bundle_path(header.bundle_prefix(), z, x, y);
        let Some(bundle_entry) = header.files().get(&path).copied() else {
            return Ok(None);
        };

        let index_len = BundleDirectory::payload_region_start();
        let source = &self.source;
        let directory = self
            .cache
            .get_directory(&self.archive_key, header.etag(), &path, || async move {
                let slab = source.read(bundle_entry.payload_offset, index_len).await?;
                BundleDirectory::decode(&slab.bytes)
            })
            .await?;

        locator::read_tile(header, self.source.as_ref(), &directory, bundle_entry.payload_offset, x, y).await
    }

    /// Returns the raw bytes of an arbitrary archive member (style JSON,
    /// sprite sheets, glyph ranges, ...), via the resource cache.
    pub async fn get_resource(&self, path: &str, _cancel: Option<&CancellationHandle>) -> TpkResult<Bytes> {
        self.with_etag_retry(|| self.get_resource_once(path)).await
    }

    async fn get_resource_once(&self, path: &str) -> TpkResult<Bytes> {
        let header = self.load_header().await?;
        let entry = *header
            .files()
            .get(path)
            .ok_or_else(|| TpkError::FileNotFound(path.to_string()))?;
        let source = &self.source;
        self.cache
            .get_resource(&self.archive_key, header.etag(), path, || async move {
                Ok(source.read(entry.payload_offset, entry.size).await?.bytes)
            })
            .await
    }

    /// Decodes `p12/metadata.json` and augments it with the package's display
    /// name (spec.md §4.I `getMetadata`). VTPK only.
    pub async fn get_metadata(&self, _cancel: Option<&CancellationHandle>) -> TpkResult<serde_json::Value> {
        self.with_etag_retry(|| self.get_metadata_once()).await
    }

    async fn get_metadata_once(&self) -> TpkResult<serde_json::Value> {
        let header = self.load_header().await?;
        let entry = header
            .metadata_range()
            .ok_or_else(|| TpkError::FileNotFound("p12/metadata.json".to_string()))?;
        let bytes = self.source.read(entry.payload_offset, entry.size).await?.bytes;
        let mut metadata: serde_json::Value = serde_json::from_slice(&bytes)?;
        if let (Some(obj), Some(name)) = (metadata.as_object_mut(), header.display_name()) {
            obj.insert("name".to_string(), serde_json::Value::String(name.to_string()));
        }
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a minimal stored-only ZIP archive, mirroring the fixture helper
    /// in `archive_index`'s own tests.
    fn build_test_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut central = Vec::new();
        const CENTRAL_DIR_SIGNATURE: u32 = 0x0201_4b50;
        const EOCD_SIGNATURE: u32 = 0x0605_4b50;

        for (name, bytes) in entries {
            let local_header_offset = out.len() as u32;
            out.extend_from_slice(&0x0403_4b50u32.to_le_bytes());
            out.extend_from_slice(&20u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(&(name.len() as u16).to_le_bytes());
            out.extend_from_slice(&0u16.to_le_bytes());
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(bytes);

            central.extend_from_slice(&CENTRAL_DIR_SIGNATURE.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&20u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u32.to_le_bytes());
            central.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            central.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            central.extend_from_slice(&(name.len() as u16).to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes());
            central.extend_from_slice(&0u32.to_le_bytes());
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
        out.extend_from_slice(&0u16.to_le_bytes());
        out
    }

    /// Esri bundles store the index entry's offset relative to the *bundle
    /// file's own start*, not past its header+index — so a tile immediately
    /// following the index carries offset `payload_region_start()`, never `0`.
    fn make_bundle_with_one_tile(row: u64, col: u64, payload: &[u8]) -> Vec<u8> {
        let header_and_index = BundleDirectory::payload_region_start();
        let mut bytes = vec![0u8; header_and_index as usize];
        let index = (128 * row + col) as usize;
        let entry_start = 64 + index * 8;
        let offset = header_and_index;
        bytes[entry_start..entry_start + 5].copy_from_slice(&offset.to_le_bytes()[..5]);
        let size = payload.len() as u64;
        bytes[entry_start + 5..entry_start + 8].copy_from_slice(&size.to_le_bytes()[..3]);
        bytes.extend_from_slice(payload);
        bytes
    }

    #[tokio::test]
    async fn direct_hit_returns_decompressed_tile_bytes() {
        let root = br#"{"tileInfo":{"minZoom":0,"maxZoom":5,"spatialReference":{"latestWkid":3857}},"resourceInfo":{"tileCompression":"none"}}"#;
        let bundle = make_bundle_with_one_tile(7, 3, b"tilepixels");
        let zip = build_test_zip(&[
            ("root.json", root.as_slice()),
            ("iteminfo.json", b"{}"),
            ("tile/L05/R0000C0000.bundle", &bundle),
        ]);

        let facade = PackageFacade::new(
            Arc::new(InMemoryByteSource::new(zip)),
            "test.tpkx",
            PackageOptions::default(),
        );

        let header = facade.get_header(None).await.unwrap();
        assert_eq!(header.package_kind(), PackageKind::Tpkx);

        let tile = facade.get_zxy(5, 3, 7, None).await.unwrap().unwrap();
        assert_eq!(&tile.bytes[..], b"tilepixels");

        assert!(facade.get_zxy(5, 300, 300, None).await.unwrap().is_none());
        assert!(facade.get_zxy(99, 0, 0, None).await.unwrap().is_none());
    }

    /// A byte source over an in-memory buffer, for facade-level fixtures that
    /// don't need real file I/O.
    struct InMemoryByteSource {
        bytes: Bytes,
    }

    impl InMemoryByteSource {
        fn new(bytes: Vec<u8>) -> Self {
            Self { bytes: Bytes::from(bytes) }
        }
    }

    #[async_trait::async_trait]
    impl ByteSource for InMemoryByteSource {
        async fn size(&self) -> TpkResult<u64> {
            Ok(self.bytes.len() as u64)
        }

        async fn read(&self, offset: u64, length: u64) -> TpkResult<crate::byte_source::RangeRead> {
            let start = offset as usize;
            let end = start + length as usize;
            Ok(crate::byte_source::RangeRead {
                bytes: self.bytes.slice(start..end),
                etag: None,
                cache_control: None,
                expires: None,
            })
        }

        fn known_etag(&self) -> Option<String> {
            None
        }
    }
}
