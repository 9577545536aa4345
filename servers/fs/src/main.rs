// parley-fs
// Filesystem tool server spoken over stdio, confined to one root directory

mod guard;
mod server;
mod tools;

use anyhow::Context;
use std::path::PathBuf;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use crate::tools::FsTools;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let root = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    let tools = FsTools::new(&root)
        .with_context(|| format!("Cannot serve root {}", root.display()))?;
    tracing::info!("Serving {}", tools.root().display());

    server::serve(
        &tools,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await
}
