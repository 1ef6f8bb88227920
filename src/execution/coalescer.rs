//! Request Coalescer — one outbound `get` per tick.
//!
//! Missing paths registered before the next flush accumulate in a single
//! pending batch. Flushing moves the batch in flight; paths already in
//! flight are not requested again and their requesters wait on the batch
//! that carries them.
//!
//! ```text
//! request() ──► Pending { paths, waiters }
//!                   │ take_pending()
//!                   ▼
//!               InFlight { paths, waiters } ── complete(id, result) ──► waiters
//! ```

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::model::Path;
use crate::{Error, Result};

type Waiter = oneshot::Sender<Result<()>>;

#[derive(Default)]
struct Pending {
    paths: Vec<Path>,
    seen: HashSet<Path>,
    waiters: Vec<Waiter>,
}

struct InFlight {
    paths: HashSet<Path>,
    waiters: Vec<Waiter>,
}

#[derive(Default)]
struct State {
    pending: Pending,
    in_flight: HashMap<u64, InFlight>,
    next_id: u64,
}

/// A batch taken for dispatch.
#[derive(Debug)]
pub(crate) struct Batch {
    pub id: u64,
    pub paths: Vec<Path>,
}

/// The receivers a requester waits on: at most one per batch.
#[derive(Debug)]
pub(crate) struct Ticket(Vec<oneshot::Receiver<Result<()>>>);

impl Ticket {
    pub async fn wait(self) -> Result<()> {
        for rx in self.0 {
            rx.await.map_err(|_| Error::RequestDropped)??;
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct Coalescer {
    state: Mutex<State>,
}

impl Coalescer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in `paths`. Nothing is sent until the next flush.
    pub fn request(&self, paths: &[Path]) -> Ticket {
        let mut state = self.state.lock();
        let mut receivers = Vec::new();
        let mut joined: HashSet<u64> = HashSet::new();
        let mut needs_pending = false;

        for path in paths {
            let carrier = state
                .in_flight
                .iter()
                .find(|(_, batch)| batch.paths.contains(path))
                .map(|(id, _)| *id);
            match carrier {
                Some(id) => {
                    if joined.insert(id) {
                        let (tx, rx) = oneshot::channel();
                        if let Some(batch) = state.in_flight.get_mut(&id) {
                            batch.waiters.push(tx);
                        }
                        receivers.push(rx);
                    }
                }
                None => {
                    needs_pending = true;
                    let pending = &mut state.pending;
                    if pending.seen.insert(path.clone()) {
                        pending.paths.push(path.clone());
                    }
                }
            }
        }

        if needs_pending {
            let (tx, rx) = oneshot::channel();
            state.pending.waiters.push(tx);
            receivers.push(rx);
        }
        if !joined.is_empty() {
            tracing::trace!(batches = joined.len(), "joined in-flight batches");
        }
        Ticket(receivers)
    }

    /// Move the pending batch in flight. `None` when nothing is pending.
    pub fn take_pending(&self) -> Option<Batch> {
        let mut state = self.state.lock();
        if state.pending.paths.is_empty() {
            return None;
        }
        let Pending { paths, seen, waiters } = std::mem::take(&mut state.pending);
        let id = state.next_id;
        state.next_id += 1;
        state.in_flight.insert(id, InFlight { paths: seen, waiters });
        Some(Batch { id, paths })
    }

    /// Deliver the outcome of batch `id` to everyone waiting on it.
    pub fn complete(&self, id: u64, result: Result<()>) {
        let Some(batch) = self.state.lock().in_flight.remove(&id) else {
            tracing::warn!(batch = id, "completed an unknown batch");
            return;
        };
        for tx in batch.waiters {
            let _ = tx.send(result.clone());
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.state.lock().in_flight.len()
    }
}
