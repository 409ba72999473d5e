//! Automatic print request generator, grounded in `printing_client.py`'s
//! `run_automatic_requests`. Peripheral to the mutual-exclusion core: a
//! failed print is logged and the loop continues, it never aborts the peer
//! process.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use tokio::sync::watch;
use tracing::warn;

use crate::transport::PeerTransport;

const MESSAGES: &[&str] = &[
    "Monthly sales report",
    "Confidential document - Project X",
    "Pending task list",
    "Weekly meeting minutes",
    "2025 business proposal",
    "Q4 performance review",
    "Service agreement",
    "Operating cost spreadsheet",
];

/// Loops `sleep(random interval) -> request_to_print(random message)` until
/// `shutdown` is signalled. `interval_ms` is `(min, max)` in milliseconds.
pub async fn run(
    transport: Arc<PeerTransport>,
    interval_ms: (u64, u64),
    mut shutdown: watch::Receiver<bool>,
) {
    let (min_ms, max_ms) = interval_ms;
    loop {
        let delay_ms = if max_ms > min_ms {
            rand::thread_rng().gen_range(min_ms..max_ms)
        } else {
            min_ms
        };
        let delay = Duration::from_millis(delay_ms);
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = tokio::time::sleep(delay) => {
                if *shutdown.borrow() {
                    return;
                }
                let message = MESSAGES.choose(&mut rand::thread_rng()).unwrap();
                if let Err(err) = transport.request_to_print(*message).await {
                    warn!("automatic print request failed: {err}");
                }
            }
        }
    }
}
