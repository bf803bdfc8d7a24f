//! Single-flight coordination for token refresh.
//!
//! At most one refresh exchange is outstanding at any time. The first request
//! to hit a 401 becomes the leader and performs the exchange; every request
//! that fails while it is running queues behind it and is released with the
//! leader's outcome.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::debug;

use super::ApiError;

/// New access token on success, shared failure otherwise.
pub type RefreshOutcome = Result<String, Arc<ApiError>>;

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    // Bumped per leader and on reset so a stale guard cannot settle a newer refresh.
    generation: u64,
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

/// Owns the in-flight flag and the pending request queue.
#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

/// Role handed out by `RefreshCoordinator::begin`.
pub enum RefreshTicket<'a> {
    /// Caller must perform the refresh and complete the guard.
    Leader(RefreshGuard<'a>),
    /// A refresh is already running; await its outcome.
    Follower(RefreshWaiter),
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        // State is a flag and a Vec; both stay consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check-and-set in one critical section: become the leader or join the queue.
    pub fn begin(&self) -> RefreshTicket<'_> {
        let mut state = self.lock();
        if state.in_flight {
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            debug!(queued = state.waiters.len(), "Refresh in flight, queueing request");
            RefreshTicket::Follower(RefreshWaiter { rx })
        } else {
            state.in_flight = true;
            state.generation += 1;
            debug!(generation = state.generation, "Starting token refresh");
            RefreshTicket::Leader(RefreshGuard {
                coordinator: self,
                generation: state.generation,
                settled: false,
            })
        }
    }

    /// Clear the flag and release every queued request with `outcome`.
    /// Draining and clearing happen under the same lock so no request can
    /// queue behind a refresh that has already settled.
    fn settle(&self, generation: u64, outcome: RefreshOutcome) -> usize {
        let waiters = {
            let mut state = self.lock();
            if state.generation != generation {
                return 0;
            }
            state.in_flight = false;
            std::mem::take(&mut state.waiters)
        };
        let released = waiters.len();
        for waiter in waiters {
            // A waiter whose caller went away is fine to skip.
            let _ = waiter.send(outcome.clone());
        }
        released
    }

    pub fn is_in_flight(&self) -> bool {
        self.lock().in_flight
    }

    /// Number of requests queued behind the in-flight refresh.
    pub fn pending(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Drop all state. Queued requests observe `RefreshAborted`.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.in_flight = false;
        state.generation += 1;
        state.waiters.clear();
    }
}

/// Held by the leader for the duration of the refresh exchange.
///
/// Dropping it without calling `complete` (the leader's future was cancelled)
/// releases the queue with `RefreshAborted` and clears the flag.
pub struct RefreshGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    generation: u64,
    settled: bool,
}

impl RefreshGuard<'_> {
    /// Release the queue with the refresh outcome. Returns how many requests were waiting.
    pub fn complete(mut self, outcome: RefreshOutcome) -> usize {
        self.settled = true;
        self.coordinator.settle(self.generation, outcome)
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            debug!("Refresh leader dropped before completing");
            self.coordinator
                .settle(self.generation, Err(Arc::new(ApiError::RefreshAborted)));
        }
    }
}

/// Queued request waiting on someone else's refresh.
pub struct RefreshWaiter {
    rx: oneshot::Receiver<RefreshOutcome>,
}

impl RefreshWaiter {
    pub async fn wait(self) -> RefreshOutcome {
        self.rx
            .await
            .unwrap_or_else(|_| Err(Arc::new(ApiError::RefreshAborted)))
    }
}
