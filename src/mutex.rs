//! The Ricart–Agrawala distributed mutual-exclusion state machine
//! (Ricart & Agrawala, "An Optimal Algorithm for Mutual Exclusion in
//! Computer Networks", CACM 1981).
//!
//! `Coordinator` owns exactly the per-peer state the algorithm needs: the
//! current `MutexState`, the outstanding request's timestamp/sequence
//! number, the pending-reply counter, and the FIFO queue of deferred
//! replies. It performs no network I/O itself — `transport.rs` drives the
//! actual RPCs and calls back into this type's handlers, mirroring how the
//! teacher's `Processor` in `lamport_mutex.rs` is handed a `causal_net` to
//! send through rather than opening sockets itself.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::clock::{LamportClock, Timestamp};
use crate::wire::{AccessRelease, AccessRequest, AccessResponse, PeerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutexState {
    Released,
    Wanted,
    Held,
}

#[derive(Debug)]
struct Inner {
    state: MutexState,
    my_request_timestamp: Timestamp,
    request_number: u64,
    deferred: VecDeque<(PeerId, oneshot::Sender<()>)>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: MutexState::Released,
            my_request_timestamp: 0,
            request_number: 0,
            deferred: VecDeque::new(),
        }
    }
}

enum Decision {
    ReplyNow,
    Defer,
}

#[derive(Debug)]
pub struct Coordinator {
    id: PeerId,
    peer_count: usize,
    clock: Arc<LamportClock>,
    inner: StdMutex<Inner>,
    pending_replies: StdMutex<usize>,
}

impl Coordinator {
    pub fn new(id: PeerId, peer_count: usize, clock: Arc<LamportClock>) -> Self {
        Self {
            id,
            peer_count,
            clock,
            inner: StdMutex::new(Inner::default()),
            pending_replies: StdMutex::new(0),
        }
    }

    pub fn state(&self) -> MutexState {
        self.inner.lock().unwrap().state
    }

    pub fn pending_replies(&self) -> usize {
        *self.pending_replies.lock().unwrap()
    }

    /// The sequence number of the most recent (or in-flight) request this
    /// peer has made — used to stamp `PrintRequest` while HELD.
    pub fn request_number(&self) -> u64 {
        self.inner.lock().unwrap().request_number
    }

    /// RELEASED -> WANTED. Returns the timestamp and request number the
    /// caller must broadcast in `AccessRequest`.
    pub fn begin_request(&self) -> anyhow::Result<(Timestamp, u64)> {
        let mut inner = self.inner.lock().unwrap();
        anyhow::ensure!(
            inner.state == MutexState::Released,
            "acquire() called while in state {:?}",
            inner.state
        );
        let ts = self.clock.tick();
        inner.state = MutexState::Wanted;
        inner.my_request_timestamp = ts;
        inner.request_number += 1;
        let request_number = inner.request_number;
        drop(inner);
        *self.pending_replies.lock().unwrap() = self.peer_count;
        Ok((ts, request_number))
    }

    /// Called once per resolved outbound `RequestAccess` call, whether it
    /// succeeded, errored, or timed out — each counts as "a reply was
    /// received" so a stuck peer cannot block this one forever.
    pub fn record_reply(&self) -> usize {
        let mut pending = self.pending_replies.lock().unwrap();
        *pending = pending.saturating_sub(1);
        *pending
    }

    /// WANTED -> HELD, once the caller has observed every reply.
    pub fn enter_held(&self) {
        let mut inner = self.inner.lock().unwrap();
        debug_assert_eq!(inner.state, MutexState::Wanted);
        inner.state = MutexState::Held;
    }

    /// HELD -> RELEASED. Fires every deferred reply before returning, so
    /// that a subsequent `acquire()`'s broadcast never races a reply this
    /// peer still owed from the previous critical section.
    pub fn begin_release(&self) -> anyhow::Result<(Timestamp, u64)> {
        let mut inner = self.inner.lock().unwrap();
        anyhow::ensure!(
            inner.state == MutexState::Held,
            "release() called while in state {:?}",
            inner.state
        );
        inner.state = MutexState::Released;
        let ts = self.clock.tick();
        let request_number = inner.request_number;
        let deferred = std::mem::take(&mut inner.deferred);
        drop(inner);

        for (peer_id, sender) in deferred {
            if sender.send(()).is_err() {
                warn!(peer_id, "deferred reply receiver dropped before release fired it");
            }
        }
        Ok((ts, request_number))
    }

    /// Inbound `RequestAccess` handler. `clock.update` is unconditionally
    /// the first action, before any decision is made from `req`'s fields.
    pub async fn on_request(&self, req: AccessRequest) -> AccessResponse {
        let updated = self.clock.update(req.lamport_timestamp);

        let decision = {
            let inner = self.inner.lock().unwrap();
            match inner.state {
                MutexState::Held => Decision::Defer,
                MutexState::Wanted => {
                    let mine = (inner.my_request_timestamp, self.id);
                    let theirs = (req.lamport_timestamp, req.client_id);
                    if has_priority(mine, theirs) {
                        Decision::Defer
                    } else {
                        Decision::ReplyNow
                    }
                }
                MutexState::Released => Decision::ReplyNow,
            }
        };

        match decision {
            Decision::ReplyNow => AccessResponse {
                access_granted: true,
                lamport_timestamp: updated,
            },
            Decision::Defer => {
                debug!(client_id = req.client_id, "deferring access reply");
                let (sender, receiver) = oneshot::channel();
                self.inner
                    .lock()
                    .unwrap()
                    .deferred
                    .push_back((req.client_id, sender));
                // released without holding any lock
                let _ = receiver.await;
                let ts = self.clock.tick();
                debug!(client_id = req.client_id, "granting deferred access reply");
                AccessResponse {
                    access_granted: true,
                    lamport_timestamp: ts,
                }
            }
        }
    }

    /// Inbound `ReleaseAccess` handler: advances the clock only. Reply
    /// accounting is driven entirely by `AccessResponse`, not this message —
    /// strict Ricart-Agrawala doesn't strictly need a release broadcast at
    /// all, but it is kept here for clock advancement and observability.
    pub fn on_release(&self, rel: AccessRelease) {
        self.clock.update(rel.lamport_timestamp);
        debug!(
            client_id = rel.client_id,
            request_number = rel.request_number,
            "peer released the resource"
        );
    }
}

/// Strict total order over `(timestamp, id)` pairs, breaking Lamport
/// timestamp ties by peer id. `a` has priority over `b` iff it would defer
/// to `b` being granted first.
pub fn has_priority(a: (Timestamp, PeerId), b: (Timestamp, PeerId)) -> bool {
    a.0 < b.0 || (a.0 == b.0 && a.1 < b.1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(id: PeerId, peer_count: usize) -> Coordinator {
        Coordinator::new(id, peer_count, Arc::new(LamportClock::new()))
    }

    #[test]
    fn priority_by_timestamp() {
        assert!(has_priority((5, 1), (10, 2)));
        assert!(!has_priority((10, 1), (5, 2)));
    }

    #[test]
    fn priority_tie_break_by_id() {
        assert!(has_priority((5, 1), (5, 2)));
        assert!(!has_priority((5, 2), (5, 1)));
    }

    #[test]
    fn priority_is_false_on_equal_inputs() {
        assert!(!has_priority((5, 1), (5, 1)));
    }

    #[test]
    fn begin_request_transitions_released_to_wanted() {
        let c = coordinator(1, 2);
        assert_eq!(c.state(), MutexState::Released);
        let (ts, req_num) = c.begin_request().unwrap();
        assert_eq!(ts, 1);
        assert_eq!(req_num, 1);
        assert_eq!(c.state(), MutexState::Wanted);
        assert_eq!(c.pending_replies(), 2);
    }

    #[test]
    fn begin_request_rejects_concurrent_requests() {
        let c = coordinator(1, 2);
        c.begin_request().unwrap();
        assert!(c.begin_request().is_err());
    }

    #[test]
    fn release_rejects_when_not_held() {
        let c = coordinator(1, 2);
        assert!(c.begin_release().is_err());
    }

    #[test]
    fn full_acquire_release_cycle() {
        let c = coordinator(1, 2);
        c.begin_request().unwrap();
        assert_eq!(c.record_reply(), 1);
        assert_eq!(c.record_reply(), 0);
        c.enter_held();
        assert_eq!(c.state(), MutexState::Held);
        let (release_ts, _) = c.begin_release().unwrap();
        assert!(release_ts > 0);
        assert_eq!(c.state(), MutexState::Released);
    }

    // After release, every deferred signal must fire exactly once and the
    // queue must be left empty.
    #[tokio::test]
    async fn release_drains_every_deferred_reply() {
        let clock = Arc::new(LamportClock::new());
        let c = Arc::new(Coordinator::new(1, 2, clock));
        c.begin_request().unwrap();
        c.enter_held();

        let c2 = Arc::clone(&c);
        let deferred_a = tokio::spawn(async move {
            c2.on_request(AccessRequest {
                client_id: 2,
                lamport_timestamp: 1,
                request_number: 1,
            })
            .await
        });
        let c3 = Arc::clone(&c);
        let deferred_b = tokio::spawn(async move {
            c3.on_request(AccessRequest {
                client_id: 3,
                lamport_timestamp: 1,
                request_number: 1,
            })
            .await
        });

        // give both handlers a chance to register themselves as deferred
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        c.begin_release().unwrap();

        let resp_a = deferred_a.await.unwrap();
        let resp_b = deferred_b.await.unwrap();
        assert!(resp_a.access_granted);
        assert!(resp_b.access_granted);
        assert_eq!(c.inner.lock().unwrap().deferred.len(), 0);
    }

    // A peer currently HELD always defers an incoming request.
    #[tokio::test]
    async fn held_peer_defers_every_request() {
        let clock = Arc::new(LamportClock::new());
        let c = Arc::new(Coordinator::new(1, 1, clock));
        c.begin_request().unwrap();
        c.enter_held();

        let c2 = Arc::clone(&c);
        let handler = tokio::spawn(async move {
            c2.on_request(AccessRequest {
                client_id: 9,
                lamport_timestamp: 100,
                request_number: 1,
            })
            .await
        });
        tokio::task::yield_now().await;
        assert_eq!(c.inner.lock().unwrap().deferred.len(), 1);

        c.begin_release().unwrap();
        let resp = handler.await.unwrap();
        assert!(resp.access_granted);
    }

    // A peer currently RELEASED always replies immediately.
    #[tokio::test]
    async fn released_peer_replies_immediately() {
        let clock = Arc::new(LamportClock::new());
        let c = Coordinator::new(1, 1, clock);
        let resp = c
            .on_request(AccessRequest {
                client_id: 2,
                lamport_timestamp: 5,
                request_number: 1,
            })
            .await;
        assert!(resp.access_granted);
        assert_eq!(c.inner.lock().unwrap().deferred.len(), 0);
    }

    // WANTED with lower priority than the incoming request replies right away.
    #[tokio::test]
    async fn wanted_lower_priority_replies_immediately() {
        let clock = Arc::new(LamportClock::new());
        let c = Coordinator::new(2, 1, clock);
        // local becomes WANTED at timestamp 5 with id 2
        c.clock.tick();
        c.clock.tick();
        c.clock.tick();
        c.clock.tick();
        let (ts, _) = c.begin_request().unwrap();
        assert_eq!(ts, 5);
        // incoming request has timestamp 1, id 1: strictly higher priority than ours
        let resp = c
            .on_request(AccessRequest {
                client_id: 1,
                lamport_timestamp: 1,
                request_number: 1,
            })
            .await;
        assert!(resp.access_granted);
        assert_eq!(c.inner.lock().unwrap().deferred.len(), 0);
    }

    // WANTED with higher priority than the incoming request defers.
    #[tokio::test]
    async fn wanted_higher_priority_defers() {
        let clock = Arc::new(LamportClock::new());
        let c = Arc::new(Coordinator::new(1, 1, clock));
        let (ts, _) = c.begin_request().unwrap();
        assert_eq!(ts, 1);
        let c2 = Arc::clone(&c);
        let handler = tokio::spawn(async move {
            c2.on_request(AccessRequest {
                client_id: 2,
                lamport_timestamp: 50,
                request_number: 1,
            })
            .await
        });
        tokio::task::yield_now().await;
        assert_eq!(c.inner.lock().unwrap().deferred.len(), 1);
        c.enter_held();
        c.begin_release().unwrap();
        let resp = handler.await.unwrap();
        assert!(resp.access_granted);
    }
}
