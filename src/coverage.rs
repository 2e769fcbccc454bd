//! Sparse-pyramid coverage map and ancestor search (spec.md §4.F, §9).
//!
//! The source tilemap is an ad-hoc nested JSON mapping; per spec.md §9 we
//! prefer a dense per-level structure instead of per-node hashing. Each zoom
//! level is a flat `HashSet` of `(x, y)` pairs known present, which answers
//! "does (z,x,y) have value 1?" without walking a tree at lookup time.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use crate::error::{TpkError, TpkResult};

/// Per-level "tile exists here" index, expanded from a TilePackage tilemap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoverageMap {
    present: HashMap<u8, HashSet<(u64, u64)>>,
}

impl CoverageMap {
    /// `true` if a real tile is recorded at exactly `(z, x, y)`.
    #[must_use]
    pub fn contains(&self, z: u8, x: u64, y: u64) -> bool {
        self.present
            .get(&z)
            .is_some_and(|level| level.contains(&(x, y)))
    }

    /// Walks ancestors `(z-1, x>>1, y>>1), (z-2, ...), ...` down to `min_zoom`
    /// and returns the first whose coverage is exactly present. `None` if no
    /// ancestor down to `min_zoom` carries a tile.
    #[must_use]
    pub fn find_ancestor(&self, z: u8, x: u64, y: u64, min_zoom: u8) -> Option<(u8, u64, u64)> {
        let mut pz = z;
        let mut px = x;
        let mut py = y;
        while pz > min_zoom {
            pz -= 1;
            px >>= 1;
            py >>= 1;
            if self.contains(pz, px, py) {
                return Some((pz, px, py));
            }
        }
        None
    }

    /// Expands a parsed `p12/tilemap/root.json` document's top-level `index`
    /// field into a [`CoverageMap`] (spec.md §4.C). The implicit root is
    /// `(0, 0, 0)` and always carries the `"blob"` sentinel, which this
    /// expansion does not itself record as a tile (only leaf scalar `1`
    /// nodes are); non-scalar nodes name four children in NW,NE,SW,SE order
    /// to recurse into at depth `z+1`.
    pub fn from_tilemap_index(index: &Value) -> TpkResult<Self> {
        let mut map = Self::default();
        let mut frontier = vec![(0u8, 0u64, 0u64, index)];

        while let Some((z, x, y, node)) = frontier.pop() {
            match node {
                Value::Number(n) if n.as_i64() == Some(1) => {
                    map.present.entry(z).or_default().insert((x, y));
                }
                Value::Number(_) | Value::String(_) => {
                    // "blob" sentinel or any other leaf scalar besides 1: not a tile.
                }
                Value::Object(children) => {
                    for (key, child) in children {
                        let (cx, cy) = match key.as_str() {
                            "NW" => (x * 2, y * 2),
                            "NE" => (x * 2 + 1, y * 2),
                            "SW" => (x * 2, y * 2 + 1),
                            "SE" => (x * 2 + 1, y * 2 + 1),
                            other => {
                                return Err(TpkError::MalformedArchive(format!(
                                    "unexpected tilemap quadtree key {other:?}"
                                )));
                            }
                        };
                        frontier.push((z + 1, cx, cy, child));
                    }
                }
                Value::Array(_) | Value::Bool(_) | Value::Null => {
                    return Err(TpkError::MalformedArchive(
                        "tilemap index node has an unexpected JSON shape".into(),
                    ));
                }
            }
        }

        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn expands_nested_quadrants_to_flat_levels() {
        let index = json!({
            "NW": 1,
            "NE": {
                "NW": 1,
                "NE": 0,
                "SW": 0,
                "SE": 0
            },
            "SW": 0,
            "SE": 0
        });

        let map = CoverageMap::from_tilemap_index(&index).unwrap();
        assert!(map.contains(1, 0, 0));
        assert!(map.contains(2, 2, 0));
        assert!(!map.contains(1, 1, 1));
        assert!(!map.contains(2, 3, 0));
    }

    #[test]
    fn ancestor_search_stops_at_min_zoom() {
        let mut map = CoverageMap::default();
        map.present.entry(4).or_default().insert((2, 3));

        assert_eq!(map.find_ancestor(5, 4, 6, 0), Some((4, 2, 3)));
        assert_eq!(map.find_ancestor(5, 4, 6, 5), None);
        assert_eq!(map.find_ancestor(99, 0, 0, 0), None);
    }

    #[test]
    fn rejects_unknown_quadtree_key() {
        let index = json!({ "NW": 1, "NE": 0, "SW": 0, "NORTH": 0 });
        assert!(CoverageMap::from_tilemap_index(&index).is_err());
    }
}
