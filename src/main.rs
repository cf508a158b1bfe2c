//! Demo binary: a small chat server and client built on `muxframe`.

mod cli;
mod demo;

use std::{
    error::Error,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use clap::Parser;
use tokio::runtime::Runtime;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    let cli = cli::Cli::parse();
    // Applications embedding the library install their own subscriber.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&cli.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Backend calls and signal handling; the endpoints run their own I/O
    // threads and are ticked from this one.
    let runtime = Runtime::new()?;
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    runtime.spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        flag.store(false, Ordering::Release);
    });

    match &cli.command {
        cli::Command::Serve(args) => {
            if let Some(addr) = args.metrics_addr {
                install_metrics(&runtime, addr)?;
            }
            demo::serve(args, runtime.handle(), &running)
        }
        cli::Command::Connect(args) => demo::connect(args, &running),
    }
}

#[cfg(feature = "metrics")]
fn install_metrics(runtime: &Runtime, addr: std::net::SocketAddr) -> Result<(), Box<dyn Error>> {
    let _guard = runtime.enter();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!(%addr, "serving metrics");
    Ok(())
}

#[cfg(not(feature = "metrics"))]
fn install_metrics(_runtime: &Runtime, addr: std::net::SocketAddr) -> Result<(), Box<dyn Error>> {
    tracing::warn!(%addr, "built without the metrics feature; exporter not started");
    Ok(())
}
