use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use trakhound_core::ServiceError;

type Job = Box<dyn FnOnce() + Send + 'static>;

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

// ---------------------------------------------------------------------------
// WriteLanes: per-table FIFO execution
// ---------------------------------------------------------------------------

/// Per-table FIFO lanes for blocking store work.
///
/// Jobs submitted for the same table run one after another in submission
/// order; lanes for different tables run independently. Each job runs on
/// tokio's blocking pool so the caller's task never blocks on the store.
///
/// Must be used from within a tokio runtime.
pub struct WriteLanes {
    lanes: Mutex<HashMap<String, mpsc::UnboundedSender<Job>>>,
    cancel: CancellationToken,
}

impl WriteLanes {
    pub fn new() -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Queue `job` on the lane for `table`.
    ///
    /// The job is enqueued before this returns; the returned future resolves
    /// with the job's result.
    pub fn submit<T, F>(
        &self,
        table: &str,
        job: F,
    ) -> impl Future<Output = Result<T, ServiceError>> + Send + use<T, F>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let boxed: Job = Box::new(move || {
            let _ = tx.send(job());
        });

        if self.cancel.is_cancelled() {
            debug!("write lanes shut down, dropping job for {}", table);
        } else {
            let mut lanes = guard(&self.lanes);
            let sender = lanes
                .entry(table.to_string())
                .or_insert_with(|| self.spawn_lane(table));
            if let Err(mpsc::error::SendError(job)) = sender.send(boxed) {
                // The lane task is gone; start a fresh one.
                let fresh = self.spawn_lane(table);
                let _ = fresh.send(job);
                *sender = fresh;
            }
        }

        async move {
            match rx.await {
                Ok(result) => result,
                Err(_) => Err(ServiceError::Internal("write lane closed".into())),
            }
        }
    }

    fn spawn_lane(&self, table: &str) -> mpsc::UnboundedSender<Job> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let cancel = self.cancel.clone();
        let table = table.to_string();

        tokio::spawn(async move {
            debug!("write lane {} started", table);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    job = rx.recv() => {
                        let Some(job) = job else { break };
                        if let Err(e) = tokio::task::spawn_blocking(job).await {
                            error!("write lane {} job failed: {}", table, e);
                        }
                    }
                }
            }
            debug!("write lane {} stopped", table);
        });

        tx
    }

    /// Retire the lane for `table`. Jobs already queued still run; the lane
    /// task exits once they are done. A later submit starts a new lane.
    pub fn close(&self, table: &str) {
        if guard(&self.lanes).remove(table).is_some() {
            debug!("write lane {} closed", table);
        }
    }

    /// Number of open lanes.
    pub fn lane_count(&self) -> usize {
        guard(&self.lanes).len()
    }

    /// Stop all lanes. Queued jobs that have not started are dropped and
    /// their futures resolve to `Internal`.
    pub fn shutdown(&self) {
        info!("write lanes shutting down");
        self.cancel.cancel();
        guard(&self.lanes).clear();
    }
}

impl Default for WriteLanes {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WriteLanes {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Supersede: latest-issued-wins operation slots
// ---------------------------------------------------------------------------

/// A claim on an operation slot, returned by [`Supersede::begin`].
#[derive(Debug, Clone)]
pub struct Ticket {
    key: String,
    generation: u64,
    token: CancellationToken,
}

impl Ticket {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancelled once a newer ticket is issued for the same key, or the slot
    /// is cancelled.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Operation slots keyed by identity where only the most recently issued
/// operation may take effect.
///
/// Cancellation is cooperative: an older operation's token is cancelled, and
/// it is up to that operation to stop waiting and discard its result.
pub struct Supersede {
    slots: Mutex<HashMap<String, (u64, CancellationToken)>>,
    next: AtomicU64,
}

impl Supersede {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next: AtomicU64::new(1),
        }
    }

    /// Issue a new ticket for `key`, cancelling the previous one.
    pub fn begin(&self, key: &str) -> Ticket {
        let generation = self.next.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();

        let previous = guard(&self.slots).insert(key.to_string(), (generation, token.clone()));
        if let Some((old, old_token)) = previous {
            debug!("{}: generation {} superseded by {}", key, old, generation);
            old_token.cancel();
        }

        Ticket {
            key: key.to_string(),
            generation,
            token,
        }
    }

    /// Whether `ticket` is the most recently issued ticket for its key and
    /// has not been cancelled.
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        guard(&self.slots)
            .get(&ticket.key)
            .is_some_and(|(g, _)| *g == ticket.generation)
    }

    /// Release the slot if `ticket` still holds it.
    pub fn finish(&self, ticket: &Ticket) {
        let mut slots = guard(&self.slots);
        if slots.get(&ticket.key).is_some_and(|(g, _)| *g == ticket.generation) {
            slots.remove(&ticket.key);
        }
    }

    /// Cancel whatever holds `key`. Returns false if the slot was free.
    pub fn cancel(&self, key: &str) -> bool {
        match guard(&self.slots).remove(key) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

impl Default for Supersede {
    fn default() -> Self {
        Self::new()
    }
}
