use std::io::Write;

use assert_cmd::Command;
use predicates::prelude::*;

fn tilepkg() -> Command {
    Command::cargo_bin("tilepkg").unwrap()
}

const CENTRAL_DIR_SIGNATURE: u32 = 0x0201_4b50;
const EOCD_SIGNATURE: u32 = 0x0605_4b50;

/// Builds a minimal stored-only ZIP archive, mirroring the fixture helpers
/// used by the library's own unit tests.
fn build_test_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut central = Vec::new();

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

/// Esri bundles store the index entry's offset relative to the bundle file's
/// own start, not past its header+index — a tile right after the index
/// carries offset `HEADER_LEN`, never `0`.
fn make_bundle_with_one_tile(row: u64, col: u64, payload: &[u8]) -> Vec<u8> {
    const HEADER_LEN: usize = 64 + 128 * 128 * 8;
    let mut bytes = vec![0u8; HEADER_LEN];
    let index = (128 * row + col) as usize;
    let entry_start = 64 + index * 8;
    bytes[entry_start..entry_start + 5].copy_from_slice(&(HEADER_LEN as u64).to_le_bytes()[..5]);
    let size = payload.len() as u64;
    bytes[entry_start + 5..entry_start + 8].copy_from_slice(&size.to_le_bytes()[..3]);
    bytes.extend_from_slice(payload);
    bytes
}

/// Writes a minimal single-tile TPKX fixture, returning the open tempfile
/// (kept alive so its path stays valid for the duration of the test).
fn sample_tpkx() -> tempfile::TempPath {
    let root = br#"{"tileInfo":{"minZoom":0,"maxZoom":5,"spatialReference":{"latestWkid":3857}},"resourceInfo":{"tileCompression":"none"}}"#;
    let bundle = make_bundle_with_one_tile(7, 3, b"tilepixels");
    let zip = build_test_zip(&[
        ("root.json", root.as_slice()),
        ("iteminfo.json", br#"{"title":"Sample Raster"}"#),
        ("tile/L05/R0000C0000.bundle", &bundle),
    ]);

    let mut file = tempfile::Builder::new().suffix(".tpkx").tempfile().unwrap();
    file.write_all(&zip).unwrap();
    file.into_temp_path()
}

#[test]
fn show_tpkx() {
    let fixture = sample_tpkx();
    tilepkg()
        .args(["show", fixture.to_str().unwrap()])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("package type: tpkx")
                .and(predicate::str::contains("tile compression: none"))
                .and(predicate::str::contains("min zoom: 0"))
                .and(predicate::str::contains("max zoom: 5"))
                .and(predicate::str::contains("name: Sample Raster")),
        );
}

#[test]
fn tile_direct_hit_writes_raw_bytes_to_stdout() {
    let fixture = sample_tpkx();
    tilepkg()
        .args(["tile", fixture.to_str().unwrap(), "5", "3", "7"])
        .assert()
        .success()
        .stdout(predicate::eq(&b"tilepixels"[..]));
}

#[test]
fn tile_absent_fails() {
    let fixture = sample_tpkx();
    tilepkg()
        .args(["tile", fixture.to_str().unwrap(), "99", "0", "0"])
        .assert()
        .failure();
}

#[test]
fn show_missing_file() {
    tilepkg()
        .args(["show", "nonexistent.tpkx"])
        .assert()
        .failure();
}

#[test]
fn no_args_shows_help() {
    tilepkg().assert().failure().stderr(predicate::str::contains("Usage:"));
}
