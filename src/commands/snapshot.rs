use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rpicamd::{client::CameraClient, config::Config};
use tracing::info;

/// Fetch one JPEG from the running daemon into `output`, or stdout
pub fn snapshot(config: &Config, output: Option<PathBuf>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    let client = CameraClient::with_port(config.server.port);
    let jpeg = runtime.block_on(client.fetch_image())?;
    info!("Fetched {} byte image from {}", jpeg.len(), client.addr());

    match output {
        Some(path) => {
            std::fs::write(&path, &jpeg)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {} bytes to {}", jpeg.len(), path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&jpeg)?;
            stdout.flush()?;
        }
    }
    Ok(())
}
