//! Dispatcher: matches submitted subtasks to polling satellites.
//!
//! One bounded FIFO queue per handler name, created lazily. A pending map
//! holds, per subtask id, the single-use result slot and (once a satellite
//! has claimed the item) the symmetric key of that exchange.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use futures::future::select_all;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::types::{Subtask, SubtaskResult};
use crate::cipher::SymmetricKey;
use crate::config::DispatcherConfig;
use crate::error::DispatchError;

/// Outbound queue for one handler. Pollers share the receiver.
#[derive(Clone)]
struct HandlerQueue {
    tx: mpsc::Sender<Subtask>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Subtask>>>,
}

impl HandlerQueue {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

/// Bookkeeping for one in-flight subtask.
struct PendingEntry {
    result_tx: oneshot::Sender<SubtaskResult>,
    /// Set when a satellite claims the item.
    key: Option<SymmetricKey>,
    handler: String,
}

/// The task broker.
pub struct Dispatcher {
    config: DispatcherConfig,
    queues: Mutex<HashMap<String, HandlerQueue>>,
    pending: RwLock<HashMap<u64, PendingEntry>>,
    next_id: AtomicU64,
}

/// Removes the pending entry when `submit` returns or is dropped.
struct PendingGuard<'a> {
    dispatcher: &'a Dispatcher,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.dispatcher.remove_pending(self.id);
    }
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            config,
            queues: Mutex::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(rand::thread_rng().gen_range(1..1u64 << 40)),
        }
    }

    fn ensure_queue(&self, handler: &str) -> HandlerQueue {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        queues
            .entry(handler.to_string())
            .or_insert_with(|| HandlerQueue::new(self.config.queue_capacity))
            .clone()
    }

    fn register_pending(&self, handler: &str, result_tx: oneshot::Sender<SubtaskResult>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                PendingEntry {
                    result_tx,
                    key: None,
                    handler: handler.to_string(),
                },
            );
        id
    }

    fn remove_pending(&self, id: u64) -> Option<PendingEntry> {
        self.pending
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
    }

    /// Submit a subtask and wait for its result.
    ///
    /// Fails with [`DispatchError::Timeout`] if the handler queue does not
    /// accept the item within the push timeout, or if no result arrives
    /// within the result timeout after hand-off. No pending entry survives
    /// either failure.
    pub async fn submit(&self, mut subtask: Subtask) -> Result<SubtaskResult, DispatchError> {
        let queue = self.ensure_queue(&subtask.handler);
        let kind = subtask.kind;

        // The entry exists before the item is visible to any poller.
        let (result_tx, result_rx) = oneshot::channel();
        let id = self.register_pending(&subtask.handler, result_tx);
        subtask.id = id;
        let _guard = PendingGuard {
            dispatcher: self,
            id,
        };

        let push_timeout = self.config.push_timeout.for_kind(kind);
        match tokio::time::timeout(push_timeout, queue.tx.send(subtask)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                return Err(DispatchError::Transport("handler queue closed".to_string()));
            }
            Err(_) => {
                debug!(task_id = id, kind = %kind, "Push timeout");
                return Err(DispatchError::Timeout(push_timeout));
            }
        }

        let result_timeout = self.config.result_timeout.for_kind(kind);
        match tokio::time::timeout(result_timeout, result_rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) | Err(_) => {
                debug!(task_id = id, kind = %kind, "Result timeout");
                Err(DispatchError::Timeout(result_timeout))
            }
        }
    }

    /// Wait for the first subtask available on any of `accepts`.
    ///
    /// `key` is the exchange key the caller will use; it is bound to the
    /// returned subtask's pending entry. Items whose submitter already gave
    /// up are discarded here and never handed out: that loss is
    /// intentional. Returns [`DispatchError::NoNewTasks`] once the pull
    /// timeout elapses.
    pub async fn poll(
        &self,
        accepts: &[String],
        key: SymmetricKey,
    ) -> Result<Subtask, DispatchError> {
        let deadline = Instant::now() + self.config.pull_timeout;
        let queues: Vec<HandlerQueue> = accepts.iter().map(|h| self.ensure_queue(h)).collect();

        if queues.is_empty() {
            tokio::time::sleep_until(deadline).await;
            return Err(DispatchError::NoNewTasks);
        }

        loop {
            let subtask = match tokio::time::timeout_at(deadline, first_ready(&queues)).await {
                Ok(Some(subtask)) => subtask,
                Ok(None) | Err(_) => return Err(DispatchError::NoNewTasks),
            };

            if self.claim(subtask.id, &key) {
                return Ok(subtask);
            }
            warn!(task_id = subtask.id, handler = %subtask.handler, "Discarding stale subtask");
        }
    }

    /// Bind the exchange key to a live entry. False if the submitter is gone.
    fn claim(&self, id: u64, key: &SymmetricKey) -> bool {
        let mut pending = self.pending.write().unwrap_or_else(PoisonError::into_inner);
        match pending.get_mut(&id) {
            Some(entry) => {
                entry.key = Some(key.clone());
                true
            }
            None => false,
        }
    }

    /// Exchange key of a claimed subtask, if its submitter is still waiting.
    pub fn key_for(&self, id: u64) -> Option<SymmetricKey> {
        self.pending
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .and_then(|entry| entry.key.clone())
    }

    /// Hand a result to the waiting submitter, exactly once.
    ///
    /// Returns [`DispatchError::Vanished`] if the id is unknown or expired.
    pub fn deliver(&self, id: u64, result: SubtaskResult) -> Result<(), DispatchError> {
        let entry = self.remove_pending(id).ok_or(DispatchError::Vanished)?;
        debug!(task_id = id, handler = %entry.handler, "Delivering result");
        entry
            .result_tx
            .send(result)
            .map_err(|_| DispatchError::Vanished)
    }

    /// Whether a pending entry exists for `id`.
    pub fn is_pending(&self, id: u64) -> bool {
        self.pending
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Number of subtasks currently awaiting a result.
    pub fn pending_count(&self) -> usize {
        self.pending
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

/// Receive from whichever queue yields first.
async fn first_ready(queues: &[HandlerQueue]) -> Option<Subtask> {
    let waits = queues.iter().map(|q| {
        Box::pin(async move {
            let mut rx = q.rx.lock().await;
            rx.recv().await
        })
    });
    let (item, _, _) = select_all(waits).await;
    item
}
