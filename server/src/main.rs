use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{Context, Result};
use sslc_server::{ServiceConfig, SslcService};

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    // Optional JSON config file as the only argument, environment otherwise
    let config = match std::env::args().nth(1) {
        Some(path) => ServiceConfig::from_file(&path)?,
        None => ServiceConfig::from_env(),
    };
    tracing::info!("Starting SSLC service with {:?}", config);

    let service = SslcService::new(config).context("Failed to create service")?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Received interrupt, shutting down");
        flag.store(false, Ordering::SeqCst);
    })
    .context("Failed to install signal handler")?;

    service.run_with_shutdown(running).context("Service error")?;
    Ok(())
}
