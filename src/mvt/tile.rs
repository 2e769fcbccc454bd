//! Layer/Feature/Tile containers and the full-message MVT codec built atop
//! [`super::geometry`]'s protobuf primitives.

use crate::error::{TpkError, TpkResult};

use super::geometry::{
    decode_geometry, encode_geometry, write_bytes_field, write_tag, write_varint_field, Field,
    GeomType, ProtoReader, Value,
};

const TILE_LAYER_FIELD: u32 = 3;
const LAYER_NAME_FIELD: u32 = 1;
const LAYER_FEATURES_FIELD: u32 = 2;
const LAYER_KEYS_FIELD: u32 = 3;
const LAYER_VALUES_FIELD: u32 = 4;
const LAYER_EXTENT_FIELD: u32 = 5;
const LAYER_VERSION_FIELD: u32 = 15;
const FEATURE_ID_FIELD: u32 = 1;
const FEATURE_TAGS_FIELD: u32 = 2;
const FEATURE_TYPE_FIELD: u32 = 3;
const FEATURE_GEOMETRY_FIELD: u32 = 4;
const VALUE_STRING_FIELD: u32 = 1;
const VALUE_FLOAT_FIELD: u32 = 2;
const VALUE_DOUBLE_FIELD: u32 = 3;
const VALUE_INT_FIELD: u32 = 4;
const VALUE_UINT_FIELD: u32 = 5;
const VALUE_SINT_FIELD: u32 = 6;
const VALUE_BOOL_FIELD: u32 = 7;

const DEFAULT_EXTENT: u32 = 4096;
const DEFAULT_VERSION: u32 = 1;

/// One decoded feature, with tag indices already resolved to materialized
/// `(key, value)` property pairs (spec.md §9 "a language-neutral design
/// exposes an encoder API that takes features directly; no inheritance
/// required").
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Optional stable feature id, passed through verbatim.
    pub id: Option<u64>,
    /// Resolved properties, passed through verbatim by the subdivider.
    pub properties: Vec<(String, Value)>,
    /// Geometry type.
    pub geom_type: GeomType,
    /// Decoded absolute tile-local integer coordinates, one inner `Vec` per path/ring.
    pub geometry: Vec<Vec<(i64, i64)>>,
}

/// One decoded layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Layer name.
    pub name: String,
    /// Layer version (MVT spec field 15).
    pub version: u32,
    /// Coordinate extent features are encoded against.
    pub extent: u32,
    /// This layer's features.
    pub features: Vec<Feature>,
}

/// A fully decoded Mapbox Vector Tile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorTile {
    /// The tile's layers, in archive order.
    pub layers: Vec<Layer>,
}

impl VectorTile {
    /// Decodes a whole MVT message.
    pub fn decode(bytes: &[u8]) -> TpkResult<Self> {
        let mut reader = ProtoReader::new(bytes);
        let mut layers = Vec::new();

        while let Some((field_number, field)) = reader.next_field()? {
            if field_number == TILE_LAYER_FIELD {
                layers.push(Layer::decode(field.as_bytes()?)?);
            }
        }

        Ok(Self { layers })
    }

    /// Re-encodes a whole MVT message.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for layer in &self.layers {
            write_bytes_field(&mut out, TILE_LAYER_FIELD, &layer.encode());
        }
        out
    }
}

impl Layer {
    fn decode(bytes: &[u8]) -> TpkResult<Self> {
        let mut reader = ProtoReader::new(bytes);
        let mut name = None;
        let mut extent = DEFAULT_EXTENT;
        let mut version = DEFAULT_VERSION;
        let mut keys: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        let mut raw_features: Vec<(Option<u64>, Vec<u32>, GeomType, Vec<u32>)> = Vec::new();

        while let Some((field_number, field)) = reader.next_field()? {
            match field_number {
                f if f == LAYER_NAME_FIELD => {
                    name = Some(
                        std::str::from_utf8(field.as_bytes()?)
                            .map_err(TpkError::Utf8)?
                            .to_string(),
                    );
                }
                f if f == LAYER_EXTENT_FIELD => extent = u32::try_from(field.as_varint()?).unwrap_or(extent),
                f if f == LAYER_VERSION_FIELD => {
                    version = u32::try_from(field.as_varint()?).unwrap_or(version);
                }
                f if f == LAYER_KEYS_FIELD => {
                    keys.push(
                        std::str::from_utf8(field.as_bytes()?)
                            .map_err(TpkError::Utf8)?
                            .to_string(),
                    );
                }
                f if f == LAYER_VALUES_FIELD => values.push(decode_value(field.as_bytes()?)?),
                f if f == LAYER_FEATURES_FIELD => {
                    raw_features.push(decode_raw_feature(field.as_bytes()?)?);
                }
                _ => {}
            }
        }

        let name = name.ok_or_else(|| TpkError::MalformedMvt("layer missing a name".into()))?;

        let features = raw_features
            .into_iter()
            .map(|(id, tags, geom_type, commands)| {
                let properties = resolve_tags(&tags, &keys, &values)?;
                let geometry = decode_geometry(&commands, geom_type)?;
                Ok(Feature {
                    id,
                    properties,
                    geom_type,
                    geometry,
                })
            })
            .collect::<TpkResult<Vec<_>>>()?;

        Ok(Layer {
            name,
            version,
            extent,
            features,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut keys: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        let mut key_index = std::collections::HashMap::new();
        let mut value_index: Vec<(Value, u32)> = Vec::new();

        let mut encoded_features = Vec::with_capacity(self.features.len());
        for feature in &self.features {
            let mut tags = Vec::with_capacity(feature.properties.len() * 2);
            for (key, value) in &feature.properties {
                let key_idx = *key_index.entry(key.clone()).or_insert_with(|| {
                    keys.push(key.clone());
                    (keys.len() - 1) as u32
                });
                let value_idx = value_index
                    .iter()
                    .find(|(v, _)| v == value)
                    .map(|(_, idx)| *idx)
                    .unwrap_or_else(|| {
                        let idx = values.len() as u32;
                        values.push(value.clone());
                        value_index.push((value.clone(), idx));
                        idx
                    });
                tags.push(key_idx);
                tags.push(value_idx);
            }
            let commands = encode_geometry(&feature.geometry, feature.geom_type);
            encoded_features.push(encode_raw_feature(feature.id, &tags, feature.geom_type, &commands));
        }

        let mut out = Vec::new();
        write_bytes_field(&mut out, LAYER_NAME_FIELD, self.name.as_bytes());
        for feature in &encoded_features {
            write_bytes_field(&mut out, LAYER_FEATURES_FIELD, feature);
        }
        for key in &keys {
            write_bytes_field(&mut out, LAYER_KEYS_FIELD, key.as_bytes());
        }
        for value in &values {
            write_bytes_field(&mut out, LAYER_VALUES_FIELD, &encode_value(value));
        }
        write_varint_field(&mut out, LAYER_EXTENT_FIELD, u64::from(self.extent));
        write_varint_field(&mut out, LAYER_VERSION_FIELD, u64::from(self.version));
        out
    }
}

fn decode_raw_feature(bytes: &[u8]) -> TpkResult<(Option<u64>, Vec<u32>, GeomType, Vec<u32>)> {
    let mut reader = ProtoReader::new(bytes);
    let mut id = None;
    let mut tags = Vec::new();
    let mut geom_type = GeomType::Unknown;
    let mut commands = Vec::new();

    while let Some((field_number, field)) = reader.next_field()? {
        match field_number {
            f if f == FEATURE_ID_FIELD => id = Some(field.as_varint()?),
            f if f == FEATURE_TAGS_FIELD => {
                decode_packed_varints(field.as_bytes()?, &mut tags)?;
            }
            f if f == FEATURE_TYPE_FIELD => geom_type = GeomType::from_tag(field.as_varint()?),
            f if f == FEATURE_GEOMETRY_FIELD => {
                decode_packed_varints(field.as_bytes()?, &mut commands)?;
            }
            _ => {}
        }
    }

    Ok((id, tags, geom_type, commands))
}

fn encode_raw_feature(id: Option<u64>, tags: &[u32], geom_type: GeomType, commands: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    if let Some(id) = id {
        write_varint_field(&mut out, FEATURE_ID_FIELD, id);
    }
    write_bytes_field(&mut out, FEATURE_TAGS_FIELD, &encode_packed_varints(tags));
    write_varint_field(&mut out, FEATURE_TYPE_FIELD, geom_type.to_tag());
    write_bytes_field(&mut out, FEATURE_GEOMETRY_FIELD, &encode_packed_varints(commands));
    out
}

fn decode_packed_varints(bytes: &[u8], out: &mut Vec<u32>) -> TpkResult<()> {
    use varint_rs::VarintReader;
    let mut cursor = std::io::Cursor::new(bytes);
    loop {
        if (cursor.position() as usize) >= cursor.get_ref().len() {
            break;
        }
        let v = cursor
            .read_u32_varint()
            .map_err(|e| TpkError::MalformedMvt(e.to_string()))?;
        out.push(v);
    }
    Ok(())
}

fn encode_packed_varints(values: &[u32]) -> Vec<u8> {
    use varint_rs::VarintWriter;
    let mut out = Vec::new();
    for &v in values {
        out.write_u32_varint(v).expect("Vec<u8> write is infallible");
    }
    out
}

fn decode_value(bytes: &[u8]) -> TpkResult<Value> {
    let mut reader = ProtoReader::new(bytes);
    while let Some((field_number, field)) = reader.next_field()? {
        match field_number {
            f if f == VALUE_STRING_FIELD => {
                return Ok(Value::String(
                    std::str::from_utf8(field.as_bytes()?)
                        .map_err(TpkError::Utf8)?
                        .to_string(),
                ))
            }
            f if f == VALUE_FLOAT_FIELD => {
                if let Field::Fixed32(bits) = field {
                    return Ok(Value::Float(f32::from_bits(bits)));
                }
            }
            f if f == VALUE_DOUBLE_FIELD => {
                if let Field::Fixed64(bits) = field {
                    return Ok(Value::Double(f64::from_bits(bits)));
                }
            }
            f if f == VALUE_INT_FIELD => return Ok(Value::Int(field.as_varint()? as i64)),
            f if f == VALUE_UINT_FIELD => return Ok(Value::UInt(field.as_varint()?)),
            f if f == VALUE_SINT_FIELD => {
                let raw = field.as_varint()?;
                let decoded = (raw >> 1) as i64 ^ -((raw & 1) as i64);
                return Ok(Value::Int(decoded));
            }
            f if f == VALUE_BOOL_FIELD => return Ok(Value::Bool(field.as_varint()? != 0)),
            _ => {}
        }
    }
    Err(TpkError::MalformedMvt("Value message had no recognized field".into()))
}

fn encode_value(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    match value {
        Value::String(s) => write_bytes_field(&mut out, VALUE_STRING_FIELD, s.as_bytes()),
        Value::Float(f) => {
            write_tag(&mut out, VALUE_FLOAT_FIELD, 5);
            out.extend_from_slice(&f.to_bits().to_le_bytes());
        }
        Value::Double(d) => {
            write_tag(&mut out, VALUE_DOUBLE_FIELD, 1);
            out.extend_from_slice(&d.to_bits().to_le_bytes());
        }
        Value::Int(i) => write_varint_field(&mut out, VALUE_INT_FIELD, *i as u64),
        Value::UInt(u) => write_varint_field(&mut out, VALUE_UINT_FIELD, *u),
        Value::Bool(b) => write_varint_field(&mut out, VALUE_BOOL_FIELD, u64::from(*b)),
    }
    out
}

fn resolve_tags(tags: &[u32], keys: &[String], values: &[Value]) -> TpkResult<Vec<(String, Value)>> {
    if tags.len() % 2 != 0 {
        return Err(TpkError::MalformedMvt("feature tags array has odd length".into()));
    }
    tags.chunks_exact(2)
        .map(|pair| {
            let key = keys
                .get(pair[0] as usize)
                .ok_or_else(|| TpkError::MalformedMvt("feature tag key index out of range".into()))?;
            let value = values
                .get(pair[1] as usize)
                .ok_or_else(|| TpkError::MalformedMvt("feature tag value index out of range".into()))?;
            Ok((key.clone(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_layer() -> Layer {
        Layer {
            name: "roads".to_string(),
            version: 2,
            extent: 4096,
            features: vec![Feature {
                id: Some(7),
                properties: vec![
                    ("class".to_string(), Value::String("primary".to_string())),
                    ("lanes".to_string(), Value::UInt(4)),
                ],
                geom_type: GeomType::LineString,
                geometry: vec![vec![(0, 0), (100, 0), (100, 100)]],
            }],
        }
    }

    #[test]
    fn layer_round_trips_through_bytes() {
        let layer = sample_layer();
        let decoded = Layer::decode(&layer.encode()).unwrap();
        assert_eq!(decoded, layer);
    }

    #[test]
    fn whole_tile_round_trips() {
        let tile = VectorTile {
            layers: vec![sample_layer()],
        };
        let decoded = VectorTile::decode(&tile.encode()).unwrap();
        assert_eq!(decoded, tile);
    }
}
