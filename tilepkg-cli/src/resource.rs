//! `resource` subcommand: fetches a named archive member (style, sprite, glyph range, ...).

use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use tilepkg::PackageOptions;

#[derive(Parser, Debug)]
#[command(about = "Fetch a named resource (style JSON, sprite sheet, glyph range, ...)")]
pub struct Args {
    /// Path to a `.tpkx`/`.vtpk` archive (local file or `http(s)://` URL)
    #[arg(value_name = "PATH")]
    path: String,
    /// Archive-relative resource path, e.g. `p12/resources/styles/root.json`
    resource_path: String,
    /// Write the resource bytes here instead of stdout
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let facade = super::open(&args.path, PackageOptions::default()).await?;
    let bytes = facade.get_resource(&args.resource_path, None).await?;

    match args.out {
        Some(path) => std::fs::write(path, &bytes)?,
        None => std::io::stdout().write_all(&bytes)?,
    }
    Ok(())
}
