//! `PeerTransport`: the RPC server and outbound stubs a peer uses to talk to
//! every other peer and to the printer.
//!
//! Outbound connections are pooled in an LRU cache keyed by address, the
//! same strategy the teacher's `net/session.rs` `TcpControl` uses to avoid
//! opening a fresh connection per call — generalized here from a
//! fire-and-forget sender into a request/response stub. A connection is
//! only ever held by one in-flight call at a time: it is taken out of the
//! cache before the RPC and put back only on success, so no lock is ever
//! held across the blocking network round trip.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use lru::LruCache;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex as TokioMutex};
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::clock::LamportClock;
use crate::config::PeerAddressBook;
use crate::mutex::Coordinator;
use crate::wire::{
    read_frame, write_frame, AccessRelease, AccessRequest, Empty, Envelope, PeerId, PrintRequest,
    PrintResponse,
};

const MAX_POOLED_CONNECTIONS: usize = 256;

/// Per-call deadline for peer RPCs.
pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(5);
/// Per-call deadline for the printer RPC.
pub const DEFAULT_PRINT_DEADLINE: Duration = Duration::from_secs(10);

pub struct PeerTransport {
    id: PeerId,
    clock: Arc<LamportClock>,
    coordinator: Arc<Coordinator>,
    peers: PeerAddressBook,
    printer_addr: SocketAddr,
    connections: TokioMutex<LruCache<SocketAddr, TcpStream>>,
    request_deadline: Duration,
    print_deadline: Duration,
}

impl PeerTransport {
    pub fn new(id: PeerId, peers: PeerAddressBook, printer_addr: SocketAddr) -> Arc<Self> {
        let clock = Arc::new(LamportClock::new());
        let coordinator = Arc::new(Coordinator::new(id, peers.len(), Arc::clone(&clock)));
        Arc::new(Self {
            id,
            clock,
            coordinator,
            peers,
            printer_addr,
            connections: TokioMutex::new(LruCache::new(
                NonZeroUsize::new(MAX_POOLED_CONNECTIONS).unwrap(),
            )),
            request_deadline: DEFAULT_REQUEST_DEADLINE,
            print_deadline: DEFAULT_PRINT_DEADLINE,
        })
    }

    pub fn clock(&self) -> &LamportClock {
        &self.clock
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Accepts inbound peer connections until `shutdown` is signalled. Each
    /// connection is served by its own task; in-flight deferred handlers may
    /// be abandoned on shutdown (acceptable for this scope).
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(id = self.id, "peer server shutting down");
                        return Ok(());
                    }
                }
                accepted = listener.accept() => {
                    let (stream, remote) = match accepted {
                        Ok(pair) => pair,
                        Err(err) => {
                            warn!("failed to accept peer connection: {err}");
                            continue;
                        }
                    };
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = this.handle_connection(stream).await {
                            warn!(%remote, "peer connection ended: {err}");
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
                Err(_) => return Ok(()), // peer closed the connection; not an error
            };
            let reply = match envelope {
                Envelope::RequestAccess(req) => {
                    let resp = self.coordinator.on_request(req).await;
                    Envelope::RequestAccessOk(resp)
                }
                Envelope::ReleaseAccess(rel) => {
                    self.coordinator.on_release(rel);
                    Envelope::ReleaseAccessOk(Empty)
                }
                other => {
                    warn!("ignoring unexpected message on peer connection: {other:?}");
                    continue;
                }
            };
            write_frame(&mut stream, &reply).await?;
        }
    }

    async fn take_connection(&self, addr: SocketAddr) -> anyhow::Result<TcpStream> {
        if let Some(stream) = self.connections.lock().await.pop(&addr) {
            return Ok(stream);
        }
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn return_connection(&self, addr: SocketAddr, stream: TcpStream) {
        self.connections.lock().await.put(addr, stream);
    }

    async fn call(
        &self,
        addr: SocketAddr,
        request: Envelope,
        deadline: Duration,
    ) -> anyhow::Result<Envelope> {
        let outcome = tokio::time::timeout(deadline, async {
            let mut stream = self.take_connection(addr).await?;
            write_frame(&mut stream, &request).await?;
            let response = read_frame(&mut stream).await?;
            self.return_connection(addr, stream).await;
            anyhow::Ok(response)
        })
        .await;
        match outcome {
            Ok(result) => result,
            Err(_) => anyhow::bail!("call to {addr} timed out after {deadline:?}"),
        }
    }

    /// RELEASED -> WANTED -> HELD. Broadcasts `AccessRequest` to every peer
    /// concurrently (§4.3) and returns only once every reply has resolved —
    /// success, error, or timeout are each counted as one reply (§4.2's
    /// documented liveness-over-safety compromise, see DESIGN.md).
    pub async fn acquire(self: &Arc<Self>) -> anyhow::Result<()> {
        let (timestamp, request_number) = self.coordinator.begin_request()?;

        let mut calls = JoinSet::new();
        for (peer_id, addr) in self.peers.iter() {
            let this = Arc::clone(self);
            let request = Envelope::RequestAccess(AccessRequest {
                client_id: self.id,
                lamport_timestamp: timestamp,
                request_number,
            });
            calls.spawn(async move {
                let result = this.call(addr, request, this.request_deadline).await;
                (peer_id, result)
            });
        }

        while let Some(joined) = calls.join_next().await {
            match joined {
                Ok((peer_id, Ok(Envelope::RequestAccessOk(resp)))) => {
                    self.clock.update(resp.lamport_timestamp);
                    let _ = peer_id;
                }
                Ok((peer_id, Ok(other))) => {
                    warn!(peer_id, "unexpected reply variant to RequestAccess: {other:?}");
                }
                Ok((peer_id, Err(err))) => {
                    warn!(peer_id, "RequestAccess to peer failed, counting as received: {err}");
                }
                Err(join_err) => {
                    warn!("RequestAccess task panicked: {join_err}");
                }
            }
            self.coordinator.record_reply();
        }

        self.coordinator.enter_held();
        Ok(())
    }

    /// HELD -> RELEASED. Fires deferred replies synchronously inside
    /// `begin_release`, then broadcasts `AccessRelease` best-effort: a
    /// failed or slow peer does not block this peer from finishing its
    /// release.
    pub async fn release(self: &Arc<Self>) -> anyhow::Result<()> {
        let (timestamp, request_number) = self.coordinator.begin_release()?;

        let mut calls = JoinSet::new();
        for (peer_id, addr) in self.peers.iter() {
            let this = Arc::clone(self);
            let release = Envelope::ReleaseAccess(AccessRelease {
                client_id: self.id,
                lamport_timestamp: timestamp,
                request_number,
            });
            calls.spawn(async move {
                let result = this.call(addr, release, this.request_deadline).await;
                (peer_id, result)
            });
        }
        while let Some(joined) = calls.join_next().await {
            if let Ok((peer_id, Err(err))) = joined {
                warn!(peer_id, "ReleaseAccess to peer failed (logged, non-fatal): {err}");
            }
        }
        Ok(())
    }

    /// Sends one `SendToPrinter` call. Must be invoked while this peer is
    /// HELD — the critical-section boundary encloses the printer I/O.
    pub async fn print_document(self: &Arc<Self>, message: impl Into<String>) -> anyhow::Result<PrintResponse> {
        let timestamp = self.clock.tick();
        let request_number = self.coordinator.request_number();
        let request = Envelope::SendToPrinter(PrintRequest {
            client_id: self.id,
            message_content: message.into(),
            lamport_timestamp: timestamp,
            request_number,
        });
        match self.call(self.printer_addr, request, self.print_deadline).await? {
            Envelope::SendToPrinterOk(response) => {
                self.clock.update(response.lamport_timestamp);
                Ok(response)
            }
            other => anyhow::bail!("unexpected response from printer: {other:?}"),
        }
    }

    /// Full flow: acquire, print, release. The release always runs, even
    /// if printing failed: the critical section is released normally either way.
    pub async fn request_to_print(self: &Arc<Self>, message: impl Into<String>) -> anyhow::Result<PrintResponse> {
        self.acquire().await?;
        let print_result = self.print_document(message).await;
        if let Err(ref err) = print_result {
            warn!("print request failed: {err}");
        }
        self.release().await?;
        print_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_number_tracks_the_coordinator() {
        let peers = PeerAddressBook::parse("", 1).unwrap();
        let transport = PeerTransport::new(1, peers, "127.0.0.1:50051".parse().unwrap());
        assert_eq!(transport.coordinator().request_number(), 0);
        transport.coordinator().begin_request().unwrap();
        assert_eq!(transport.coordinator().request_number(), 1);
    }
}
