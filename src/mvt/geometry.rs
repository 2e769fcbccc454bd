//! Protobuf primitives, zigzag coding, and MVT command-stream geometry
//! decode/encode (spec.md §4.G, GLOSSARY "MVT").
//!
//! The wire format is grounded on the field layout documented by
//! `versatiles_geometry::vector_tile` in the pack's `versatiles-org-versatiles-rs`
//! example, but the codec itself is built on this crate's own `varint-rs` +
//! `bytes` dependencies rather than pulling in that crate's `versatiles_core`.

use std::io::Cursor;

use bytes::Buf;
use varint_rs::{VarintReader, VarintWriter};

use crate::error::{TpkError, TpkResult};

const MOVE_TO: u32 = 1;
const LINE_TO: u32 = 2;
const CLOSE_PATH: u32 = 7;

/// Wire-format field accessor over a single protobuf message's bytes.
pub(super) struct ProtoReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

/// One decoded `(field_number, wire_type)` tag plus its raw payload.
pub(super) enum Field<'a> {
    Varint(u64),
    LengthDelimited(&'a [u8]),
    Fixed32(u32),
    Fixed64(u64),
}

impl<'a> ProtoReader<'a> {
    pub(super) fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
        }
    }

    fn has_remaining(&self) -> bool {
        (self.cursor.position() as usize) < self.cursor.get_ref().len()
    }

    /// Reads the next `(field_number, field)` pair, or `None` at end of input.
    pub(super) fn next_field(&mut self) -> TpkResult<Option<(u32, Field<'a>)>> {
        if !self.has_remaining() {
            return Ok(None);
        }
        let tag = self
            .cursor
            .read_u64_varint()
            .map_err(|e| TpkError::MalformedMvt(e.to_string()))?;
        let field_number = u32::try_from(tag >> 3)
            .map_err(|_| TpkError::MalformedMvt("field number overflow".into()))?;
        let wire_type = tag & 0x7;

        let field = match wire_type {
            0 => Field::Varint(
                self.cursor
                    .read_u64_varint()
                    .map_err(|e| TpkError::MalformedMvt(e.to_string()))?,
            ),
            1 => {
                let mut buf = [0u8; 8];
                Buf::copy_to_slice(&mut self.cursor, &mut buf);
                Field::Fixed64(u64::from_le_bytes(buf))
            }
            2 => {
                let len = self
                    .cursor
                    .read_usize_varint()
                    .map_err(|e| TpkError::MalformedMvt(e.to_string()))?;
                let start = self.cursor.position() as usize;
                let end = start
                    .checked_add(len)
                    .filter(|&e| e <= self.cursor.get_ref().len())
                    .ok_or_else(|| TpkError::MalformedMvt("length-delimited field overruns message".into()))?;
                let slice = &self.cursor.get_ref()[start..end];
                self.cursor.set_position(end as u64);
                Field::LengthDelimited(slice)
            }
            5 => {
                let mut buf = [0u8; 4];
                Buf::copy_to_slice(&mut self.cursor, &mut buf);
                Field::Fixed32(u32::from_le_bytes(buf))
            }
            other => {
                return Err(TpkError::MalformedMvt(format!(
                    "unsupported protobuf wire type {other}"
                )))
            }
        };

        Ok(Some((field_number, field)))
    }
}

impl Field<'_> {
    pub(super) fn as_varint(&self) -> TpkResult<u64> {
        match self {
            Field::Varint(v) => Ok(*v),
            _ => Err(TpkError::MalformedMvt("expected varint field".into())),
        }
    }

    pub(super) fn as_bytes(&self) -> TpkResult<&[u8]> {
        match self {
            Field::LengthDelimited(b) => Ok(b),
            _ => Err(TpkError::MalformedMvt("expected length-delimited field".into())),
        }
    }
}

/// Appends a protobuf tag (`field_number << 3 | wire_type`) as a varint.
pub(super) fn write_tag(out: &mut Vec<u8>, field_number: u32, wire_type: u8) {
    let tag = (u64::from(field_number) << 3) | u64::from(wire_type);
    out.write_u64_varint(tag).expect("Vec<u8> write is infallible");
}

/// Appends a varint-encoded field.
pub(super) fn write_varint_field(out: &mut Vec<u8>, field_number: u32, value: u64) {
    write_tag(out, field_number, 0);
    out.write_u64_varint(value).expect("Vec<u8> write is infallible");
}

/// Appends a length-delimited field (strings, embedded messages, packed repeated fields).
pub(super) fn write_bytes_field(out: &mut Vec<u8>, field_number: u32, bytes: &[u8]) {
    write_tag(out, field_number, 2);
    out.write_usize_varint(bytes.len())
        .expect("Vec<u8> write is infallible");
    out.extend_from_slice(bytes);
}

fn zigzag_encode(value: i64) -> u32 {
    ((value << 1) ^ (value >> 63)) as u32
}

fn zigzag_decode(value: u32) -> i64 {
    i64::from((value >> 1) as i32) ^ -(i64::from(value & 1))
}

/// A feature's geometry type, per the MVT `GeomType` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeomType {
    /// No geometry type was declared.
    Unknown,
    /// One or more points.
    Point,
    /// One or more paths.
    LineString,
    /// One or more rings, outer rings signed positive area, holes negative.
    Polygon,
}

impl GeomType {
    pub(super) fn from_tag(tag: u64) -> Self {
        match tag {
            1 => GeomType::Point,
            2 => GeomType::LineString,
            3 => GeomType::Polygon,
            _ => GeomType::Unknown,
        }
    }

    pub(super) fn to_tag(self) -> u64 {
        match self {
            GeomType::Unknown => 0,
            GeomType::Point => 1,
            GeomType::LineString => 2,
            GeomType::Polygon => 3,
        }
    }
}

/// A decoded attribute value (MVT `Value` oneof).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `string_value`.
    String(String),
    /// `float_value`.
    Float(f32),
    /// `double_value`.
    Double(f64),
    /// `int_value` / `sint_value`.
    Int(i64),
    /// `uint_value`.
    UInt(u64),
    /// `bool_value`.
    Bool(bool),
}

/// Decodes a feature's command-stream `geometry` field (spec.md §4.G, GLOSSARY) into
/// a list of paths, each a list of absolute `(x, y)` tile-local integer coordinates.
///
/// For [`GeomType::Point`] the single path holds every decoded point (MVT encodes
/// a multipoint feature as one `MoveTo` command with `count` parameter pairs).
/// For [`GeomType::LineString`]/[`GeomType::Polygon`] each `MoveTo` starts a new path.
pub(super) fn decode_geometry(commands: &[u32], geom_type: GeomType) -> TpkResult<Vec<Vec<(i64, i64)>>> {
    let mut paths = Vec::new();
    let mut current: Vec<(i64, i64)> = Vec::new();
    let mut cursor_x: i64 = 0;
    let mut cursor_y: i64 = 0;
    let mut i = 0;

    while i < commands.len() {
        let command_integer = commands[i];
        i += 1;
        let id = command_integer & 0x7;
        let count = (command_integer >> 3) as usize;

        match id {
            cmd if cmd == MOVE_TO => {
                if geom_type != GeomType::Point && !current.is_empty() {
                    paths.push(std::mem::take(&mut current));
                }
                for _ in 0..count {
                    if i + 2 > commands.len() {
                        return Err(TpkError::MalformedMvt("MoveTo ran out of parameters".into()));
                    }
                    cursor_x += zigzag_decode(commands[i]);
                    cursor_y += zigzag_decode(commands[i + 1]);
                    i += 2;
                    current.push((cursor_x, cursor_y));
                }
            }
            cmd if cmd == LINE_TO => {
                for _ in 0..count {
                    if i + 2 > commands.len() {
                        return Err(TpkError::MalformedMvt("LineTo ran out of parameters".into()));
                    }
                    cursor_x += zigzag_decode(commands[i]);
                    cursor_y += zigzag_decode(commands[i + 1]);
                    i += 2;
                    current.push((cursor_x, cursor_y));
                }
            }
            cmd if cmd == CLOSE_PATH => {
                if let Some(&first) = current.first() {
                    if current.last() != Some(&first) {
                        current.push(first);
                    }
                }
            }
            other => {
                return Err(TpkError::MalformedMvt(format!(
                    "unsupported geometry command id {other}"
                )))
            }
        }
    }

    if !current.is_empty() {
        paths.push(current);
    }

    Ok(paths)
}

/// Re-encodes decoded paths back into an MVT command stream, inverse of [`decode_geometry`].
/// Closed polygon rings (first point equal to last) emit `ClosePath` and drop the duplicate point.
pub(super) fn encode_geometry(paths: &[Vec<(i64, i64)>], geom_type: GeomType) -> Vec<u32> {
    let mut out = Vec::new();
    let mut cursor_x: i64 = 0;
    let mut cursor_y: i64 = 0;

    if geom_type == GeomType::Point {
        let total_points: usize = paths.iter().map(Vec::len).sum();
        if total_points == 0 {
            return out;
        }
        out.push(MOVE_TO | ((total_points as u32) << 3));
        for path in paths {
            for &(x, y) in path {
                out.push(zigzag_encode(x - cursor_x));
                out.push(zigzag_encode(y - cursor_y));
                cursor_x = x;
                cursor_y = y;
            }
        }
        return out;
    }

    for path in paths {
        let is_polygon = geom_type == GeomType::Polygon;
        let closed = is_polygon && path.len() > 1 && path.first() == path.last();
        let line_points = if closed { &path[..path.len() - 1] } else { &path[..] };
        if line_points.is_empty() {
            continue;
        }

        out.push((MOVE_TO as u32) | (1 << 3));
        out.push(zigzag_encode(line_points[0].0 - cursor_x));
        out.push(zigzag_encode(line_points[0].1 - cursor_y));
        cursor_x = line_points[0].0;
        cursor_y = line_points[0].1;

        let remaining = line_points.len() - 1;
        if remaining > 0 {
            out.push((LINE_TO as u32) | ((remaining as u32) << 3));
            for &(x, y) in &line_points[1..] {
                out.push(zigzag_encode(x - cursor_x));
                out.push(zigzag_encode(y - cursor_y));
                cursor_x = x;
                cursor_y = y;
            }
        }

        if closed {
            out.push((CLOSE_PATH as u32) | (1 << 3));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zigzag_round_trips() {
        for v in [-5_i64, -1, 0, 1, 5, 1000, -1000] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
    }

    #[test]
    fn line_string_round_trips_through_commands() {
        let paths = vec![vec![(0, 0), (10, 0), (10, 10)]];
        let commands = encode_geometry(&paths, GeomType::LineString);
        let decoded = decode_geometry(&commands, GeomType::LineString).unwrap();
        assert_eq!(decoded, paths);
    }

    #[test]
    fn polygon_ring_closes_on_decode_and_round_trips() {
        let open_ring = vec![vec![(0, 0), (4, 0), (4, 4), (0, 4)]];
        let commands = encode_geometry(&open_ring, GeomType::Polygon);
        let decoded = decode_geometry(&commands, GeomType::Polygon).unwrap();
        assert_eq!(decoded[0].first(), decoded[0].last());
        assert_eq!(decoded[0].len(), 5);
    }

    #[test]
    fn multipoint_round_trips() {
        let paths = vec![vec![(1, 1), (2, 2), (3, 3)]];
        let commands = encode_geometry(&paths, GeomType::Point);
        let decoded = decode_geometry(&commands, GeomType::Point).unwrap();
        assert_eq!(decoded, paths);
    }
}
