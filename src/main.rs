//! tidesync - watch local directories and stream every change to a
//! tidesyncd server, resuming partial uploads across restarts.

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tidesync::cli::{init_tracing, shutdown_signal, ClientOpts};
use tidesync::client::Client;

fn main() -> Result<()> {
    let opts = ClientOpts::parse();
    init_tracing(opts.verbose);
    let cfg = opts.into_config()?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    rt.block_on(async move {
        let client = Client::new(cfg)?;
        let shutdown = CancellationToken::new();
        tokio::spawn(shutdown_signal(shutdown.clone()));

        let result = client.run(shutdown).await;
        match &result {
            Ok(()) => info!("tidesync stopped"),
            Err(e) => error!(error = %e, "tidesync exiting with error"),
        }
        result
    })
}
