mod resource;
mod show;
mod tile;

use clap::{Parser, Subcommand};
use tilepkg::{PackageFacade, PackageOptions, TpkResult};

#[derive(Parser, Debug)]
#[command(name = "tilepkg")]
#[command(about = "TilePackage (TPKX/VTPK) CLI tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect a local or remote archive's header and metadata
    Show(show::Args),
    /// Fetch one tile
    Tile(tile::Args),
    /// Fetch a named resource
    Resource(resource::Args),
}

/// Opens `path` as either an `http(s)://` archive or a local file, matching the
/// scheme-sniffing every subcommand needs before it can talk to `PackageFacade`.
async fn open(path: &str, options: PackageOptions) -> TpkResult<PackageFacade> {
    if path.starts_with("http://") || path.starts_with("https://") {
        PackageFacade::open_http(path, options)
    } else {
        PackageFacade::open_mmap(path, options).await
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger from RUST_LOG environment variable
    // Example: RUST_LOG=debug tilepkg show ...
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Show(args) => show::run(args).await,
        Commands::Tile(args) => tile::run(args).await,
        Commands::Resource(args) => resource::run(args).await,
    }
}
