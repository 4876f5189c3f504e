//! Aggregation of one logical store operation over several peers.
//!
//! A DHT put is fan-out: after routing, the same entries go to up to `R`
//! peers concurrently. [`PutFuture`] tracks the per-peer RPCs through a
//! completion channel into one aggregator task; there is no shared
//! mutable state beyond the result map the aggregator owns the writes
//! to. Cancellation is a watch flag every per-peer task selects on.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use stash_core::{Key160, Key480};
use stash_net::PeerAddress;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::builder::PutBuilder;
use crate::client::StorageClient;

/// What the routing step that preceded the operation produced. Routing
/// itself lives outside this crate; the aggregate only keeps the result
/// so callers can inspect which peers were contacted.
#[derive(Debug, Clone)]
pub struct RoutingOutcome {
    target: Key160,
    peers: Vec<PeerAddress>,
}

impl RoutingOutcome {
    /// Wraps a completed routing result.
    pub fn new(target: Key160, peers: Vec<PeerAddress>) -> Self {
        Self { target, peers }
    }

    /// The location key the routing converged on.
    pub fn target(&self) -> Key160 {
        self.target
    }

    /// The peers selected to hold the data.
    pub fn peers(&self) -> &[PeerAddress] {
        &self.peers
    }
}

/// Aggregate state of a fan-out operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    /// Per-peer RPCs still outstanding
    Pending,
    /// At least `min` peers acknowledged
    Ok,
    /// Fewer than `min` peers acknowledged
    Failed,
}

#[derive(Default)]
struct AggregateInner {
    /// Version-free keys each successful peer acknowledged
    acks: HashMap<Key160, Vec<Key480>>,
    /// Peers that failed, timed out, or were cancelled
    failures: usize,
}

/// Tracks a PUT fanned out over several peers.
pub struct PutFuture {
    min: usize,
    routing: RoutingOutcome,
    state_rx: watch::Receiver<FutureState>,
    cancel_tx: watch::Sender<bool>,
    inner: Arc<Mutex<AggregateInner>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PutFuture {
    /// Issues one RPC per routed peer and aggregates their completions.
    pub(crate) fn spawn(
        client: StorageClient,
        routing: RoutingOutcome,
        builder: PutBuilder,
        min: usize,
    ) -> Self {
        let peers = routing.peers().to_vec();
        let (result_tx, mut result_rx) = mpsc::channel::<(PeerAddress, Option<Vec<Key480>>)>(
            peers.len().max(1),
        );
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(FutureState::Pending);
        let inner = Arc::new(Mutex::new(AggregateInner::default()));

        let mut tasks = Vec::with_capacity(peers.len() + 1);
        for peer in peers {
            let client = client.clone();
            let builder = builder.clone();
            let result_tx = result_tx.clone();
            let mut cancel_rx = cancel_rx.clone();
            tasks.push(tokio::spawn(async move {
                let acks = tokio::select! {
                    result = client.put(&peer, &builder) => match result {
                        Ok(put) => Some(put.acknowledged()),
                        Err(err) => {
                            debug!(%peer, %err, "per-peer put failed");
                            None
                        }
                    },
                    // Dropping the RPC future aborts the exchange.
                    _ = cancel_rx.changed() => {
                        debug!(%peer, "per-peer put cancelled");
                        None
                    }
                };
                let _ = result_tx.send((peer, acks)).await;
            }));
        }
        drop(result_tx);

        let aggregate = inner.clone();
        tasks.push(tokio::spawn(async move {
            // The channel closes once every per-peer task reported.
            while let Some((peer, acks)) = result_rx.recv().await {
                let mut inner = aggregate.lock();
                match acks {
                    Some(keys) => {
                        inner.acks.insert(peer.id, keys);
                    }
                    None => inner.failures += 1,
                }
            }
            let successes = aggregate.lock().acks.len();
            let state = if successes >= min {
                FutureState::Ok
            } else {
                FutureState::Failed
            };
            debug!(successes, min, ?state, "put fan-out settled");
            let _ = state_tx.send(state);
        }));

        Self {
            min,
            routing,
            state_rx,
            cancel_tx,
            inner,
            tasks: Mutex::new(tasks),
        }
    }

    /// The configured success threshold.
    pub fn min(&self) -> usize {
        self.min
    }

    /// The routing result that chose the peers.
    pub fn routing(&self) -> &RoutingOutcome {
        &self.routing
    }

    /// Current state without waiting.
    pub fn state(&self) -> FutureState {
        *self.state_rx.borrow()
    }

    /// Waits for the terminal state.
    pub async fn done(&self) -> FutureState {
        let mut rx = self.state_rx.clone();
        // Ok(_) and Err(_) (aggregator gone) both leave the last published
        // state in `rx`, so read it back after waiting either way.
        let _ = rx.wait_for(|state| *state != FutureState::Pending).await;
        let state = *rx.borrow();
        state
    }

    /// Whether at least `min` peers acknowledged. Meaningful once the
    /// future settled.
    pub fn min_reached(&self) -> bool {
        self.inner.lock().acks.len() >= self.min
    }

    /// Number of peers that failed, timed out, or were cancelled so far.
    pub fn failures(&self) -> usize {
        self.inner.lock().failures
    }

    /// Per-peer acknowledged keys, for callers that evaluate the raw
    /// fan-out themselves.
    pub fn raw_acknowledged(&self) -> HashMap<Key160, Vec<Key480>> {
        self.inner.lock().acks.clone()
    }

    /// The distinct keys acknowledged by at least one peer.
    pub fn acknowledged(&self) -> Vec<Key480> {
        let inner = self.inner.lock();
        let mut keys: Vec<Key480> = inner.acks.values().flatten().copied().collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Cancels every still-pending per-peer RPC. Idempotent; a no-op
    /// after the future settled.
    pub fn shutdown(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Waits until every per-peer RPC completed or acted on its
    /// cancellation. Unlike [`done`](Self::done), this covers the tail
    /// of requests beyond the `min` threshold.
    pub async fn join(&self) {
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl Drop for PutFuture {
    fn drop(&mut self) {
        self.shutdown();
    }
}
