//! The shared "dumb" printer: a stateless external resource that accepts any
//! print job and has no part in the coordination protocol itself.
//!
//! Stateless with respect to coordination: it accepts any well-formed
//! `PrintRequest` and prints it, holding only a running job count for the
//! confirmation message — grounded directly in
//! `Distribuidopy/printer_server.py`'s `PrinterServiceImpl`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::wire::{read_frame, write_frame, Envelope, PrintResponse};

pub struct PrinterService {
    print_count: AtomicU64,
    delay_ms: (u64, u64),
}

impl PrinterService {
    pub fn new(delay_ms_min: u64, delay_ms_max: u64) -> Self {
        Self {
            print_count: AtomicU64::new(0),
            delay_ms: (delay_ms_min, delay_ms_max.max(delay_ms_min)),
        }
    }

    /// Peers hold pooled, persistent connections to the printer (see
    /// `transport.rs`'s `return_connection`), so each accepted connection
    /// must be served on its own task: a connection held open by the first
    /// peer to print must never stall the accept loop for everyone else.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("printer shutting down");
                        return Ok(());
                    }
                }
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!("failed to accept printer connection: {err}");
                            continue;
                        }
                    };
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = this.handle_connection(stream).await {
                            warn!(%remote, "printer connection ended: {err}");
                        }
                    });
                }
            }
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> anyhow::Result<()> {
        loop {
            let envelope = match read_frame(&mut stream).await {
                Ok(envelope) => envelope,
                Err(_) => return Ok(()),
            };
            let Envelope::SendToPrinter(request) = envelope else {
                warn!("ignoring unexpected message on printer connection: {envelope:?}");
                continue;
            };

            let count = self.print_count.fetch_add(1, Ordering::SeqCst) + 1;
            info!(
                client_id = request.client_id,
                timestamp = request.lamport_timestamp,
                request_number = request.request_number,
                message = %request.message_content,
                "printing job #{count}"
            );

            let delay_ms = {
                let (min, max) = self.delay_ms;
                if max > min {
                    rand::thread_rng().gen_range(min..max)
                } else {
                    min
                }
            };
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            info!("job #{count} complete");

            let response = PrintResponse {
                success: true,
                confirmation_message: format!("job #{count} printed successfully"),
                lamport_timestamp: request.lamport_timestamp,
            };
            write_frame(&mut stream, &Envelope::SendToPrinterOk(response)).await?;
        }
    }
}
