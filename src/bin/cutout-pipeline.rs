//! Cutout pipeline CLI
//!
//! Refines, composites and exports segmentation cutouts from the command line.

#[cfg(feature = "cli")]
use cutout_pipeline::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Rebuild with --features cli");
    std::process::exit(1);
}
