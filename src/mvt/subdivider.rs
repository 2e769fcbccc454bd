//! Overzoom: synthesizes a descendant tile by scaling and clipping an
//! ancestor MVT tile's features into the descendant's coordinate frame
//! (spec.md §4.G).
//!
//! Sub-division operates in the *target* tile's frame so downstream
//! rendering sees the same extent/buffer a natively encoded tile would, and
//! because scaling by a power of two in tile-local integer space is exact —
//! no cumulative error when jumping multiple levels at once (spec.md §4.G
//! rationale).

use log::warn;

use crate::error::{TpkError, TpkResult};

use super::clip::{clip_line, clip_points, clip_polygon};
use super::geometry::GeomType;
use super::tile::{Feature, Layer, VectorTile};

/// Tuning knobs for one subdivision call.
#[derive(Debug, Clone)]
pub struct SubdivideOptions {
    /// Extra tile-extent units kept beyond `[0, extent]` on each axis, so
    /// geometry crossing the target tile's edge still renders without gaps.
    pub buffer: i64,
    /// If set, only layers whose name passes this predicate are subdivided;
    /// others are dropped entirely.
    pub include_layers: Option<fn(&str) -> bool>,
    /// Zoom delta beyond which a diagnostic is logged (not fatal); the hard
    /// `maxDz` cutoff is enforced by the caller, not here (spec.md §4.G).
    pub max_dz_warn: u8,
}

impl Default for SubdivideOptions {
    fn default() -> Self {
        Self {
            buffer: 128,
            include_layers: None,
            max_dz_warn: 4,
        }
    }
}

/// Synthesizes the tile at `(tz, tx, ty)` from its ancestor `(pz, px, py)`'s already-decoded
/// MVT bytes. Returns the input unchanged if `dz = tz - pz <= 0` (spec.md §4.G, testable
/// property 3) — there is nothing to scale down to, so containment is not checked.
pub fn subdivide(
    parent_bytes: &[u8],
    pz: u8,
    px: u64,
    py: u64,
    tz: u8,
    tx: u64,
    ty: u64,
    options: &SubdivideOptions,
) -> TpkResult<Vec<u8>> {
    if tz <= pz {
        // dz <= 0: nothing to scale down to, return the ancestor unchanged.
        // Containment is only a meaningful check once the target is a
        // genuine descendant (dz > 0).
        return Ok(parent_bytes.to_vec());
    }

    let dz = tz - pz;
    let scale = 1i64 << dz;
    if (tx >> dz, ty >> dz) != (px, py) {
        return Err(TpkError::ContainmentViolation {
            pz,
            px,
            py,
            tz,
            tx,
            ty,
        });
    }

    if dz > options.max_dz_warn {
        warn!("subdividing across dz={dz} (pz={pz} -> tz={tz}), beyond max_dz_warn={}", options.max_dz_warn);
    }

    let parent = VectorTile::decode(parent_bytes)?;
    let offset_x = tx as i64 - px as i64 * scale;
    let offset_y = ty as i64 - py as i64 * scale;

    let mut layers = Vec::with_capacity(parent.layers.len());
    for layer in parent.layers {
        if let Some(include) = options.include_layers {
            if !include(&layer.name) {
                continue;
            }
        }

        let extent = i64::from(layer.extent);
        if extent != 4096 {
            warn!("layer {:?} has extent {extent} (expected 4096); honoring it anyway", layer.name);
        }
        let offset = (offset_x * extent, offset_y * extent);
        let lo = -options.buffer;
        let hi = extent + options.buffer;

        let features = layer
            .features
            .into_iter()
            .filter_map(|f| subdivide_feature(f, scale, offset, lo, hi))
            .collect::<Vec<_>>();

        if !features.is_empty() {
            layers.push(Layer {
                name: layer.name,
                version: layer.version,
                extent: layer.extent,
                features,
            });
        }
    }

    Ok(VectorTile { layers }.encode())
}

fn subdivide_feature(
    feature: Feature,
    scale: i64,
    offset: (i64, i64),
    lo: i64,
    hi: i64,
) -> Option<Feature> {
    let transformed: Vec<Vec<(i64, i64)>> = feature
        .geometry
        .into_iter()
        .map(|path| {
            path.into_iter()
                .map(|(x, y)| (x * scale - offset.0, y * scale - offset.1))
                .collect()
        })
        .collect();

    let clipped = match feature.geom_type {
        GeomType::Point => {
            let all_points: Vec<(i64, i64)> = transformed.into_iter().flatten().collect();
            let kept = clip_points(&all_points, lo, hi);
            if kept.is_empty() {
                Vec::new()
            } else {
                vec![kept]
            }
        }
        GeomType::LineString => clip_line(&transformed, lo, hi),
        GeomType::Polygon => clip_polygon(&transformed, lo, hi),
        GeomType::Unknown => Vec::new(),
    };

    if clipped.is_empty() {
        return None;
    }

    Some(Feature {
        id: feature.id,
        properties: feature.properties,
        geom_type: feature.geom_type,
        geometry: clipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvt::geometry::Value;

    fn sample_tile() -> VectorTile {
        VectorTile {
            layers: vec![Layer {
                name: "water".to_string(),
                version: 2,
                extent: 4096,
                features: vec![Feature {
                    id: Some(1),
                    properties: vec![("kind".to_string(), Value::String("ocean".to_string()))],
                    geom_type: GeomType::Polygon,
                    geometry: vec![vec![(0, 0), (4096, 0), (4096, 4096), (0, 4096), (0, 0)]],
                }],
            }],
        }
    }

    #[test]
    fn dz_zero_returns_input_unchanged() {
        let bytes = sample_tile().encode();
        let out = subdivide(&bytes, 5, 3, 7, 5, 3, 7, &SubdivideOptions::default()).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn dz_negative_returns_input_unchanged() {
        let bytes = sample_tile().encode();
        let out = subdivide(&bytes, 5, 3, 7, 4, 1, 3, &SubdivideOptions::default()).unwrap();
        assert_eq!(out, bytes);
    }

    #[test]
    fn containment_violation_when_target_not_descendant() {
        let bytes = sample_tile().encode();
        let err = subdivide(&bytes, 5, 3, 7, 6, 0, 0, &SubdivideOptions::default()).unwrap_err();
        assert!(matches!(err, TpkError::ContainmentViolation { .. }));
    }

    #[test]
    fn subdividing_a_full_cover_polygon_yields_full_cover_child() {
        let bytes = sample_tile().encode();
        let out = subdivide(&bytes, 5, 3, 7, 6, 6, 14, &SubdivideOptions::default()).unwrap();
        let tile = VectorTile::decode(&out).unwrap();
        assert_eq!(tile.layers.len(), 1);
        let feature = &tile.layers[0].features[0];
        assert_eq!(feature.properties, vec![("kind".to_string(), Value::String("ocean".to_string()))]);
        assert_eq!(feature.geometry[0].first(), feature.geometry[0].last());
    }
}
