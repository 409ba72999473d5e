//! Printer process entry point. Grounded in
//! `Distribuidopy/printer_server.py`'s `serve()`.

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use printmutex::config::PrinterArgs;
use printmutex::printer::PrinterService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = PrinterArgs::parse();

    let bind_addr = format!("0.0.0.0:{}", args.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "printer listening");

    let printer = Arc::new(PrinterService::new(args.print_delay_ms_min, args.print_delay_ms_max));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let serve = tokio::spawn(async move { printer.serve(listener, shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    let _ = shutdown_tx.send(true);
    serve.await??;
    Ok(())
}
