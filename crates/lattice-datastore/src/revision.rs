//! Transaction-id allocation and revision selection.
//!
//! Revisions are the committed transaction ids. The allocator hands out
//! monotonically increasing ids, but an id only becomes eligible as the
//! current revision once every id at or below it has resolved (committed or
//! aborted). Advancing the head past an unresolved id would let a reader
//! observe a revision whose snapshot later grows when that transaction
//! commits; holding the head back keeps equal revisions denoting identical
//! snapshots.
//!
//! `fuzzed_revision` trades freshness for cache reuse: within a configured
//! window of the last commit it picks among recently committed revisions,
//! converging back to the head once the window has elapsed with no writes.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

use lattice_types::Revision;

/// Upper bound on remembered recent commits. Entries also age out of the
/// fuzz window by time; the cap keeps the deque bounded for processes that
/// commit continuously without ever asking for a fuzzed revision.
const MAX_RECENT_COMMITS: usize = 1024;

struct AllocatorState {
    /// Highest id handed out so far.
    next: u64,
    /// Highest id in the fully resolved prefix that committed.
    head: u64,
    /// Allocated ids that have neither committed nor aborted.
    outstanding: BTreeSet<u64>,
    /// Committed ids above an unresolved smaller id, waiting to become head.
    deferred: BTreeSet<u64>,
    /// Recently committed heads, for fuzzed revision selection.
    recent: VecDeque<(Instant, Revision)>,
    last_commit: Option<Instant>,
}

/// Process-wide transaction-id allocator.
///
/// Cloning shares the underlying state; every datastore handle over the same
/// backend must share one allocator.
#[derive(Clone)]
pub struct TxnIdAllocator {
    state: Arc<Mutex<AllocatorState>>,
}

impl TxnIdAllocator {
    /// An allocator whose head starts at `head`, typically the highest
    /// revision recovered from persisted rows.
    pub fn starting_at(head: Revision) -> Self {
        Self {
            state: Arc::new(Mutex::new(AllocatorState {
                next: head.0,
                head: head.0,
                outstanding: BTreeSet::new(),
                deferred: BTreeSet::new(),
                recent: VecDeque::new(),
                last_commit: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AllocatorState> {
        // Mutex poisoning only follows a panic while holding the lock;
        // propagating the panic is the only sensible continuation.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Allocate the next transaction id. The caller must later resolve it
    /// through [`Self::resolve_committed`] or [`Self::resolve_aborted`].
    pub fn allocate(&self) -> Revision {
        let mut state = self.lock();
        state.next += 1;
        let id = state.next;
        state.outstanding.insert(id);
        Revision(id)
    }

    /// Record that `id` committed.
    pub fn resolve_committed(&self, id: Revision) {
        self.resolve(id, true);
    }

    /// Record that `id` aborted without committing.
    pub fn resolve_aborted(&self, id: Revision) {
        self.resolve(id, false);
    }

    fn resolve(&self, id: Revision, committed: bool) {
        let mut state = self.lock();
        state.outstanding.remove(&id.0);
        if committed {
            state.deferred.insert(id.0);
        }

        // The resolved prefix ends just below the smallest outstanding id.
        let frontier = match state.outstanding.iter().next() {
            Some(&smallest) => smallest - 1,
            None => state.next,
        };
        let now = Instant::now();
        while let Some(&candidate) = state.deferred.iter().next() {
            if candidate > frontier {
                break;
            }
            state.deferred.remove(&candidate);
            if candidate > state.head {
                state.head = candidate;
                state.recent.push_back((now, Revision(candidate)));
                state.last_commit = Some(now);
            }
        }
        while state.recent.len() > MAX_RECENT_COMMITS {
            state.recent.pop_front();
        }
        debug!(id = id.0, committed, head = state.head, "transaction resolved");
    }

    /// The most recent fully resolved committed revision.
    pub fn sync_revision(&self) -> Revision {
        Revision(self.lock().head)
    }

    #[cfg(test)]
    fn recent_len(&self) -> usize {
        self.lock().recent.len()
    }

    /// A revision at most `window` older than the head, chosen to let
    /// concurrent readers agree on a revision and share cached results.
    pub fn fuzzed_revision(&self, window: Duration) -> Revision {
        let mut state = self.lock();
        let now = Instant::now();
        while let Some(&(at, _)) = state.recent.front() {
            if now.duration_since(at) <= window {
                break;
            }
            state.recent.pop_front();
        }

        let sync = Revision(state.head);
        let elapsed = match state.last_commit {
            Some(at) => now.duration_since(at),
            None => return sync,
        };
        let candidates: Vec<Revision> = state.recent.iter().map(|&(_, rev)| rev).collect();
        drop(state);

        let roll = rand::thread_rng().gen::<usize>();
        select_fuzzed(sync, &candidates, elapsed, window, roll)
    }
}

/// Pick the fuzzed revision from the candidate commits inside the window.
///
/// Quiescence converges to the head: once `window` has elapsed since the
/// last commit, the head is returned unconditionally.
fn select_fuzzed(
    sync: Revision,
    candidates: &[Revision],
    elapsed: Duration,
    window: Duration,
    roll: usize,
) -> Revision {
    if elapsed >= window || candidates.is_empty() {
        return sync;
    }
    candidates[roll % candidates.len()]
}
