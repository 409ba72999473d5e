//! Peer process entry point: hosts a `PeerTransport` (mutex coordinator +
//! RPC server/stubs) and, unless disabled, an automatic request generator.
//! Grounded in the teacher's `src/bin/boson_mutex/mod.rs` wiring and
//! `printing_client.py`'s `main()`.

use std::net::SocketAddr;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use printmutex::config::{PeerAddressBook, PeerArgs};
use printmutex::transport::PeerTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = PeerArgs::parse();

    anyhow::ensure!(args.id > 0, "--id must be greater than 0");
    let peers = PeerAddressBook::parse(&args.clients, args.id)?;
    let printer_addr: SocketAddr = args
        .printer
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid --printer address {:?}: {e}", args.printer))?;

    let bind_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;
    let listener = TcpListener::bind(bind_addr).await?;
    info!(id = args.id, %bind_addr, peers = peers.len(), "peer listening");

    let transport = PeerTransport::new(args.id, peers, printer_addr);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(transport.clone().serve(listener, shutdown_rx.clone()));

    let generator = if args.no_generator {
        None
    } else {
        Some(tokio::spawn(printmutex::generator::run(
            transport.clone(),
            (args.request_interval_ms_min, args.request_interval_ms_max),
            shutdown_rx,
        )))
    };

    tokio::signal::ctrl_c().await?;
    info!(id = args.id, "received shutdown signal");
    let _ = shutdown_tx.send(true);

    server.await??;
    if let Some(generator) = generator {
        generator.await?;
    }
    Ok(())
}
