//! Typed package descriptor and the builder that assembles it from the
//! archive's JSON/XML documents (spec.md §3, §4.C).

use std::collections::HashMap;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::Value;

use crate::archive_index::{ArchiveIndex, FileEntry};
use crate::byte_source::ByteSource;
use crate::coverage::CoverageMap;
use crate::error::{TpkError, TpkResult};

/// Raster (`TPKX`) or vector (`VTPK`) TilePackage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageKind {
    /// Full raster pyramid.
    Tpkx,
    /// MVT pyramid, optionally sparse.
    Vtpk,
}

/// Tile payload compression tag, as declared by `resourceInfo.tileCompression`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compression {
    /// Tile bytes are stored as-is.
    None,
    /// Tile bytes are gzip-compressed.
    Gzip,
    /// Any other tag; decoding fails with [`TpkError::UnsupportedCompression`].
    Unknown(String),
}

impl Compression {
    fn from_tag(tag: &str) -> Self {
        match tag {
            "none" => Compression::None,
            "gzip" => Compression::Gzip,
            other => Compression::Unknown(other.to_string()),
        }
    }
}

/// The declared tile payload format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TileType {
    /// Mapbox Vector Tile protobuf.
    Mvt,
    /// A raster image format, named by its `tileInfo.format` string (e.g. `"PNG"`, `"JPEG"`).
    Raster(String),
}

/// An `esriinfo/iteminfo.xml` element, flattened into a nested mapping
/// (spec.md §4.C: "text content collapses single-text-child elements into
/// their string").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    /// An element whose only child was text.
    Text(String),
    /// An element with child elements, keyed by tag name. Repeated sibling
    /// tags keep only the last occurrence, matching a plain nested-mapping
    /// collapse.
    Children(HashMap<String, XmlNode>),
}

/// Inclusive zoom range `[min_zoom, max_zoom]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoomRange {
    /// Lowest zoom level present in the pyramid.
    pub min_zoom: u8,
    /// Highest zoom level present in the pyramid.
    pub max_zoom: u8,
}

/// Geographic extent `[min_lon, min_lat, max_lon, max_lat]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    /// Western edge, in degrees.
    pub min_lon: f64,
    /// Southern edge, in degrees.
    pub min_lat: f64,
    /// Eastern edge, in degrees.
    pub max_lon: f64,
    /// Northern edge, in degrees.
    pub max_lat: f64,
}

/// The immutable, fully-resolved package descriptor (spec.md §3 `Header`).
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub(crate) kind: PackageKind,
    pub(crate) display_name: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) attribution: Option<String>,
    pub(crate) version: Option<String>,
    pub(crate) spatial_reference: Option<i64>,
    pub(crate) tile_compression: Compression,
    pub(crate) tile_type: TileType,
    pub(crate) tile_pixel_size: Option<u32>,
    pub(crate) zoom_range: ZoomRange,
    pub(crate) bounds: Option<Bounds>,
    pub(crate) files: HashMap<String, FileEntry>,
    pub(crate) coverage: Option<CoverageMap>,
    pub(crate) etag: Option<String>,
    pub(crate) metadata_range: Option<FileEntry>,
}

impl Header {
    /// `Tpkx` or `Vtpk`.
    #[must_use]
    pub fn package_kind(&self) -> PackageKind {
        self.kind
    }

    /// Human-readable package title, if the descriptor carried one.
    #[must_use]
    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    /// Package description text, if present.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Attribution text, if present.
    #[must_use]
    pub fn attribution(&self) -> Option<&str> {
        self.attribution.as_deref()
    }

    /// Package version string, if present.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// `tileInfo.spatialReference.latestWkid`, if resolvable.
    #[must_use]
    pub fn spatial_reference(&self) -> Option<i64> {
        self.spatial_reference
    }

    /// The compression tag tile payloads are stored under.
    #[must_use]
    pub fn tile_compression(&self) -> &Compression {
        &self.tile_compression
    }

    /// Declared tile payload media type.
    #[must_use]
    pub fn tile_type(&self) -> &TileType {
        &self.tile_type
    }

    /// Tile edge length in pixels, if declared.
    #[must_use]
    pub fn tile_pixel_size(&self) -> Option<u32> {
        self.tile_pixel_size
    }

    /// Inclusive zoom bounds.
    #[must_use]
    pub fn zoom_range(&self) -> ZoomRange {
        self.zoom_range
    }

    /// Geographic bounds, if declared.
    #[must_use]
    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    /// The archive's full file table.
    #[must_use]
    pub fn files(&self) -> &HashMap<String, FileEntry> {
        &self.files
    }

    /// The sparse-pyramid coverage map, if this is an indexed VTPK and
    /// coverage checking was enabled when the header was built.
    #[must_use]
    pub fn coverage(&self) -> Option<&CoverageMap> {
        self.coverage.as_ref()
    }

    /// The ETag the archive carried when this header was built, if the
    /// byte source exposes one.
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// `p12/metadata.json`'s archive location, if the archive carries one.
    #[must_use]
    pub fn metadata_range(&self) -> Option<FileEntry> {
        self.metadata_range
    }

    /// Path prefix tile bundles live under for this package kind (spec.md §4.E).
    #[must_use]
    pub fn bundle_prefix(&self) -> &'static str {
        match self.kind {
            PackageKind::Tpkx => "tile",
            PackageKind::Vtpk => "p12/tile",
        }
    }

    /// A minimal header for cache/facade tests that don't care about its field values.
    #[cfg(test)]
    pub(crate) fn test_fixture() -> Self {
        Self {
            kind: PackageKind::Tpkx,
            display_name: None,
            description: None,
            attribution: None,
            version: None,
            spatial_reference: None,
            tile_compression: Compression::None,
            tile_type: TileType::Raster("PNG".to_string()),
            tile_pixel_size: None,
            zoom_range: ZoomRange {
                min_zoom: 0,
                max_zoom: 0,
            },
            bounds: None,
            files: HashMap::new(),
            coverage: None,
            etag: None,
            metadata_range: None,
        }
    }
}

/// Assembles a [`Header`] from a package's root/iteminfo/metadata documents.
pub struct HeaderBuilder;

impl HeaderBuilder {
    /// Builds a [`Header`] by reading `archive_key`'s extension to choose
    /// between the TPKX and VTPK document layouts, then parsing those
    /// documents out of `index`/`source` (spec.md §4.C).
    pub async fn build(
        source: &dyn ByteSource,
        index: &ArchiveIndex,
        archive_key: &str,
        coverage_check: bool,
    ) -> TpkResult<Header> {
        let is_tpkx = archive_key
            .rsplit('.')
            .next()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("tpkx"));

        let root_path = if is_tpkx { "root.json" } else { "p12/root.json" };
        let root = Self::read_json(source, index, root_path).await?;

        let iteminfo = if is_tpkx {
            Self::read_json_opt(source, index, "iteminfo.json").await?
        } else {
            None
        };

        let tile_info = root.get("tileInfo").cloned().unwrap_or(Value::Null);

        let kind = if tile_info.get("format").is_some() {
            PackageKind::Vtpk
        } else {
            PackageKind::Tpkx
        };

        let tile_compression = root
            .get("resourceInfo")
            .and_then(|r| r.get("tileCompression"))
            .and_then(Value::as_str)
            .map_or(Compression::None, Compression::from_tag);

        let tile_type = match tile_info.get("format").and_then(Value::as_str) {
            Some(fmt) if fmt.eq_ignore_ascii_case("pbf") => TileType::Mvt,
            Some(fmt) => TileType::Raster(fmt.to_string()),
            None => TileType::Mvt,
        };

        let tile_pixel_size = tile_info
            .get("rows")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok());

        let zoom_range = Self::zoom_range(&root)?;
        let bounds = Self::bounds(&root);

        let display_name = iteminfo
            .as_ref()
            .and_then(|v| v.get("title"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                root.get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
        let description = iteminfo
            .as_ref()
            .and_then(|v| v.get("description"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let mut attribution = iteminfo
            .as_ref()
            .and_then(|v| v.get("accessInformation"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let version = root
            .get("currentVersion")
            .and_then(|v| {
                v.as_str()
                    .map(str::to_string)
                    .or_else(|| v.as_f64().map(|n| n.to_string()))
            });

        let spatial_reference = tile_info
            .get("spatialReference")
            .and_then(|sr| sr.get("latestWkid").or_else(|| sr.get("wkid")))
            .and_then(Value::as_i64);

        let mut metadata_range = None;
        if !is_tpkx {
            if let Some(xml) = Self::read_text_opt(source, index, "esriinfo/iteminfo.xml").await? {
                let parsed = parse_xml_tree(&xml)?;
                if attribution.is_none() {
                    attribution = xml_text_at(&parsed, &["accessInformation"]);
                }
            }
            metadata_range = index.get("p12/metadata.json").copied();
        }

        let coverage = if !is_tpkx && coverage_check {
            if let Some(tilemap) = Self::read_json_opt(source, index, "p12/tilemap/root.json").await? {
                let index_node = tilemap.get("index").ok_or_else(|| {
                    TpkError::MalformedArchive("p12/tilemap/root.json missing \"index\" field".into())
                })?;
                Some(CoverageMap::from_tilemap_index(index_node)?)
            } else {
                None
            }
        } else {
            None
        };

        Ok(Header {
            kind,
            display_name,
            description,
            attribution,
            version,
            spatial_reference,
            tile_compression,
            tile_type,
            tile_pixel_size,
            zoom_range,
            bounds,
            files: index.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            coverage,
            etag: source.known_etag(),
            metadata_range,
        })
    }

    fn zoom_range(root: &Value) -> TpkResult<ZoomRange> {
        let tile_info = root.get("tileInfo");
        let min_zoom = tile_info
            .and_then(|t| t.get("minZoom").or_else(|| t.get("minLOD")))
            .and_then(Value::as_u64)
            .or_else(|| {
                root.get("minZoom")
                    .or_else(|| root.get("minLOD"))
                    .and_then(Value::as_u64)
            });
        let max_zoom = tile_info
            .and_then(|t| t.get("maxZoom").or_else(|| t.get("maxLOD")))
            .and_then(Value::as_u64)
            .or_else(|| {
                root.get("maxZoom")
                    .or_else(|| root.get("maxLOD"))
                    .and_then(Value::as_u64)
            });
        let (min_zoom, max_zoom) = match (min_zoom, max_zoom) {
            (Some(min), Some(max)) => (min, max),
            _ => {
                return Err(TpkError::MalformedArchive(
                    "root.json has no minZoom/maxZoom or minLOD/maxLOD pair".into(),
                ))
            }
        };
        Ok(ZoomRange {
            min_zoom: u8::try_from(min_zoom).unwrap_or(u8::MAX),
            max_zoom: u8::try_from(max_zoom).unwrap_or(u8::MAX),
        })
    }

    fn bounds(root: &Value) -> Option<Bounds> {
        let extent = root.get("extent")?;
        let min_lon = extent.get("xmin").and_then(Value::as_f64)?;
        let min_lat = extent.get("ymin").and_then(Value::as_f64)?;
        let max_lon = extent.get("xmax").and_then(Value::as_f64)?;
        let max_lat = extent.get("ymax").and_then(Value::as_f64)?;
        if ![min_lon, min_lat, max_lon, max_lat].iter().all(|v| v.is_finite()) {
            return None;
        }
        Some(Bounds {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        })
    }

    async fn read_bytes(source: &dyn ByteSource, entry: FileEntry) -> TpkResult<Vec<u8>> {
        Ok(source.read(entry.payload_offset, entry.size).await?.bytes.to_vec())
    }

    async fn read_json(source: &dyn ByteSource, index: &ArchiveIndex, path: &str) -> TpkResult<Value> {
        let entry = index
            .get(path)
            .ok_or_else(|| TpkError::FileNotFound(path.to_string()))?;
        let bytes = Self::read_bytes(source, *entry).await?;
        serde_json::from_slice(&bytes).map_err(TpkError::Json)
    }

    async fn read_json_opt(
        source: &dyn ByteSource,
        index: &ArchiveIndex,
        path: &str,
    ) -> TpkResult<Option<Value>> {
        match index.get(path) {
            None => Ok(None),
            Some(entry) => {
                let bytes = Self::read_bytes(source, *entry).await?;
                serde_json::from_slice(&bytes).map(Some).map_err(TpkError::Json)
            }
        }
    }

    async fn read_text_opt(
        source: &dyn ByteSource,
        index: &ArchiveIndex,
        path: &str,
    ) -> TpkResult<Option<String>> {
        match index.get(path) {
            None => Ok(None),
            Some(entry) => {
                let bytes = Self::read_bytes(source, *entry).await?;
                Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
            }
        }
    }
}

/// Parses an XML document into the nested-mapping [`XmlNode`] tree described
/// in spec.md §4.C.
fn parse_xml_tree(xml: &str) -> TpkResult<XmlNode> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut stack: Vec<(String, HashMap<String, XmlNode>, String)> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event().map_err(|e| TpkError::Xml(e.to_string()))? {
            Event::Start(tag) => {
                let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
                stack.push((name, HashMap::new(), String::new()));
            }
            Event::Empty(tag) => {
                let name = String::from_utf8_lossy(tag.name().as_ref()).into_owned();
                if let Some((_, children, _)) = stack.last_mut() {
                    children.insert(name, XmlNode::Text(String::new()));
                } else {
                    root = Some(XmlNode::Children(HashMap::new()));
                }
            }
            Event::Text(text) => {
                if let Some((_, _, buf)) = stack.last_mut() {
                    buf.push_str(&text.unescape().map_err(|e| TpkError::Xml(e.to_string()))?);
                }
            }
            Event::End(_) => {
                let Some((name, children, text)) = stack.pop() else {
                    continue;
                };
                let node = if children.is_empty() {
                    XmlNode::Text(text)
                } else {
                    XmlNode::Children(children)
                };
                match stack.last_mut() {
                    Some((_, parent_children, _)) => {
                        parent_children.insert(name, node);
                    }
                    None => root = Some(node),
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or_else(|| TpkError::Xml("document has no root element".into()))
}

/// Walks a dotted `path` of element names through a parsed [`XmlNode`] tree
/// and returns its text content if every step resolves.
fn xml_text_at(node: &XmlNode, path: &[&str]) -> Option<String> {
    match (node, path) {
        (XmlNode::Text(text), []) => Some(text.clone()),
        (XmlNode::Children(children), [head, rest @ ..]) => {
            xml_text_at(children.get(*head)?, rest)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compression_tag_round_trips() {
        assert_eq!(Compression::from_tag("none"), Compression::None);
        assert_eq!(Compression::from_tag("gzip"), Compression::Gzip);
        assert_eq!(
            Compression::from_tag("brotli"),
            Compression::Unknown("brotli".into())
        );
    }

    #[test]
    fn parses_nested_xml_into_text_collapsed_tree() {
        let xml = r#"<ESRI_ItemInformation><accessInformation>Esri, Inc.</accessInformation></ESRI_ItemInformation>"#;
        let tree = parse_xml_tree(xml).unwrap();
        assert_eq!(
            xml_text_at(&tree, &["accessInformation"]),
            Some("Esri, Inc.".to_string())
        );
        assert_eq!(xml_text_at(&tree, &["missing"]), None);
    }
}
