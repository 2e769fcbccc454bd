//! Read-only accessor for Esri TilePackage archives (raster TPKX, vector VTPK):
//! an indexed ZIP/ZIP64 reader, a sparse-pyramid overzoom/subdivision engine
//! for vector tiles, and a shared-promise cache with ETag-based invalidation.

mod archive_index;
mod bundle;
mod byte_source;
mod cache;
mod cancellation;
mod config;
mod coverage;
mod decompress;
mod error;
mod facade;
mod header;
mod locator;
mod mvt;

#[cfg(feature = "mmap")]
mod backend_mmap;
#[cfg(feature = "http")]
mod backend_http;

pub use archive_index::{ArchiveIndex, FileEntry};
pub use bundle::{BundleDirectory, BundleEntry};
pub use byte_source::{ByteSource, RangeRead};
#[cfg(feature = "http")]
pub use backend_http::HttpByteSource;
#[cfg(feature = "mmap")]
pub use backend_mmap::MmapByteSource;
pub use cancellation::CancellationHandle;
pub use config::PackageOptions;
pub use coverage::CoverageMap;
pub use error::{TpkError, TpkResult};
pub use facade::PackageFacade;
pub use header::{Bounds, Compression, Header, PackageKind, TileType, XmlNode, ZoomRange};
pub use locator::{block_origin, bundle_path, TileBytes};
pub use mvt::{subdivide, Feature, GeomType, Layer, SubdivideOptions, VectorTile, Value as MvtValue};
