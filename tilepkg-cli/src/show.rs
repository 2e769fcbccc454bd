//! `show` subcommand: prints an archive's header and metadata.

use clap::Parser;
use tilepkg::{Compression, PackageKind, PackageOptions, TileType};

#[derive(Parser, Debug)]
#[command(about = "Inspect a local or remote archive's header and metadata")]
pub struct Args {
    /// Path to a `.tpkx`/`.vtpk` archive (local file or `http(s)://` URL)
    #[arg(value_name = "PATH")]
    path: String,
}

fn format_package_kind(kind: PackageKind) -> &'static str {
    match kind {
        PackageKind::Tpkx => "tpkx",
        PackageKind::Vtpk => "vtpk",
    }
}

fn format_tile_type(tile_type: &TileType) -> String {
    match tile_type {
        TileType::Mvt => "mvt".to_string(),
        TileType::Raster(format) => format.to_lowercase(),
    }
}

fn format_compression(compression: &Compression) -> String {
    match compression {
        Compression::None => "none".to_string(),
        Compression::Gzip => "gzip".to_string(),
        Compression::Unknown(tag) => tag.clone(),
    }
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let facade = super::open(&args.path, PackageOptions::default()).await?;
    let header = facade.get_header(None).await?;

    println!("package type: {}", format_package_kind(header.package_kind()));
    println!("tile type: {}", format_tile_type(header.tile_type()));
    println!("tile compression: {}", format_compression(header.tile_compression()));

    let zoom_range = header.zoom_range();
    println!("min zoom: {}", zoom_range.min_zoom);
    println!("max zoom: {}", zoom_range.max_zoom);

    if let Some(bounds) = header.bounds() {
        println!(
            "bounds: (long: {:.6}, lat: {:.6}) (long: {:.6}, lat: {:.6})",
            bounds.min_lon, bounds.min_lat, bounds.max_lon, bounds.max_lat
        );
    }
    if let Some(wkid) = header.spatial_reference() {
        println!("spatial reference: {wkid}");
    }
    if let Some(name) = header.display_name() {
        println!("name: {name}");
    }
    if let Some(description) = header.description() {
        println!("description: {description}");
    }
    if let Some(attribution) = header.attribution() {
        println!("attribution: {attribution}");
    }
    if let Some(etag) = header.etag() {
        println!("etag: {etag}");
    }
    println!("file count: {}", header.files().len());
    println!("coverage indexed: {}", header.coverage().is_some());

    if header.package_kind() == PackageKind::Vtpk {
        match facade.get_metadata(None).await {
            Ok(metadata) => {
                if let serde_json::Value::Object(obj) = metadata {
                    for (key, value) in obj {
                        let value_str = match value {
                            serde_json::Value::String(s) => s,
                            serde_json::Value::Object(_) | serde_json::Value::Array(_) => {
                                "<object...>".to_string()
                            }
                            other => other.to_string(),
                        };
                        println!("{key} {value_str}");
                    }
                }
            }
            Err(err) => println!("metadata unavailable: {err}"),
        }
    }

    Ok(())
}
