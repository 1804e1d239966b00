//! Fetch worker pool.
//!
//! A fixed set of tokio tasks share one multi-consumer work queue. Each
//! worker owns a [`ClientSlot`], takes one unit at a time, runs it through the
//! [`RetryPolicy`] and emits exactly one [`FetchResult`] for it. Workers never
//! talk to each other.

use std::sync::Arc;

use async_channel::Receiver;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::client::ClientFactory;
use crate::error::{IngestError, RetryError};
use crate::keyspace::KeyspaceUnit;
use crate::retry::{ClientSlot, RetryPolicy};

/// Outcome of one logical fetch.
#[derive(Debug)]
pub struct FetchResult {
    pub unit: KeyspaceUnit,
    pub outcome: Result<String, RetryError>,
}

/// Handles to a running set of fetch workers.
pub struct FetchWorkerPool {
    handles: Vec<JoinHandle<u64>>,
}

impl FetchWorkerPool {
    /// Start `workers` tasks pulling from `work_rx` and pushing to `result_tx`.
    ///
    /// The pool keeps no copy of either queue end: when the last worker
    /// exits the result queue closes.
    pub fn spawn<F: ClientFactory>(
        workers: usize,
        factory: Arc<F>,
        policy: RetryPolicy,
        work_rx: Receiver<KeyspaceUnit>,
        result_tx: mpsc::Sender<FetchResult>,
    ) -> Self {
        let handles = (0..workers)
            .map(|id| {
                let slot = ClientSlot::new(factory.clone());
                tokio::spawn(run_worker(
                    id,
                    slot,
                    policy.clone(),
                    work_rx.clone(),
                    result_tx.clone(),
                ))
            })
            .collect();
        Self { handles }
    }

    /// Wait for every worker and return the total units processed.
    pub async fn join(self) -> Result<u64, IngestError> {
        let mut processed = 0;
        for handle in self.handles {
            processed += handle.await?;
        }
        Ok(processed)
    }
}

async fn run_worker<F: ClientFactory>(
    id: usize,
    mut slot: ClientSlot<F>,
    policy: RetryPolicy,
    work_rx: Receiver<KeyspaceUnit>,
    result_tx: mpsc::Sender<FetchResult>,
) -> u64 {
    let mut processed = 0u64;

    while let Ok(unit) = work_rx.recv().await {
        let outcome = policy.fetch(&mut slot, unit).await;
        processed += 1;
        if result_tx.send(FetchResult { unit, outcome }).await.is_err() {
            debug!(worker = id, processed, "Result queue closed, worker stopping");
            return processed;
        }
    }

    debug!(worker = id, processed, clients_built = slot.builds(), "Work queue drained, worker stopping");
    processed
}
