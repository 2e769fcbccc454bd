//! `tile` subcommand: fetches one `(z, x, y)` tile and writes its bytes out.

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use tilepkg::PackageOptions;

#[derive(Parser, Debug)]
#[command(about = "Fetch one tile, synthesizing it from an ancestor if the pyramid is sparse")]
pub struct Args {
    /// Path to a `.tpkx`/`.vtpk` archive (local file or `http(s)://` URL)
    #[arg(value_name = "PATH")]
    path: String,
    /// Zoom level
    z: u8,
    /// Column
    x: u64,
    /// Row
    y: u64,
    /// Write the tile bytes here instead of stdout
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let facade = super::open(&args.path, PackageOptions::default()).await?;

    match facade.get_zxy(args.z, args.x, args.y, None).await? {
        Some(tile) => {
            match args.out {
                Some(path) => std::fs::write(path, &tile.bytes)?,
                None => std::io::stdout().write_all(&tile.bytes)?,
            }
            Ok(())
        }
        None => Err(format!("tile ({}, {}, {}) is absent", args.z, args.x, args.y).into()),
    }
}
