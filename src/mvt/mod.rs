//! Mapbox Vector Tile decode/re-encode and overzoom subdivision (spec.md §4.G).

mod clip;
mod geometry;
mod subdivider;
mod tile;

pub use geometry::{GeomType, Value};
pub use subdivider::{subdivide, SubdivideOptions};
pub use tile::{Feature, Layer, VectorTile};
