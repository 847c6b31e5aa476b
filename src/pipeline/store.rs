//! Package store shared by the builder and the loader workers.
//!
//! An append-only list of packages, a read cursor and a completion flag, all
//! behind one mutex. The builder only appends; workers only advance the
//! cursor. Every critical section is O(1): matrices are read outside the lock.

use crate::pipeline::types::Package;
use rand::Rng;
use rand::seq::SliceRandom;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Outcome of a claim attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    Ready(Arc<Package>),
    /// Nothing to claim yet; the builder is still producing.
    Pending,
    /// Cursor reached the end of a complete store.
    Exhausted,
    /// The builder died before completing the store.
    Aborted(String),
}

#[derive(Debug, Default)]
struct StoreState {
    packages: Vec<Arc<Package>>,
    cursor: usize,
    complete: bool,
    aborted: Option<String>,
}

impl StoreState {
    fn claim(&mut self) -> Claim {
        if let Some(package) = self.packages.get(self.cursor) {
            self.cursor += 1;
            return Claim::Ready(Arc::clone(package));
        }
        if let Some(reason) = &self.aborted {
            Claim::Aborted(reason.clone())
        } else if self.complete {
            Claim::Exhausted
        } else {
            Claim::Pending
        }
    }
}

#[derive(Debug, Default)]
pub struct PackageStore {
    state: Mutex<StoreState>,
    available: Condvar,
}

impl PackageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a package, assigning its index. Returns the index.
    pub fn push(&self, mut package: Package) -> usize {
        let index = {
            let mut state = self.lock();
            let index = state.packages.len();
            package.index = index;
            state.packages.push(Arc::new(package));
            index
        };
        self.available.notify_one();
        index
    }

    /// Append the final package, if any, and mark the store complete in the
    /// same critical section.
    pub fn finish(&self, last: Option<Package>) {
        {
            let mut state = self.lock();
            if let Some(mut package) = last {
                package.index = state.packages.len();
                state.packages.push(Arc::new(package));
            }
            state.complete = true;
        }
        self.available.notify_all();
    }

    /// Mark the store as never going to complete.
    pub fn abort(&self, reason: impl Into<String>) {
        self.lock().aborted = Some(reason.into());
        self.available.notify_all();
    }

    pub fn try_claim(&self) -> Claim {
        self.lock().claim()
    }

    /// Claim the next package, waiting while the builder catches up.
    ///
    /// Re-checks at least every `poll` and returns [`Claim::Pending`] once
    /// `cancel` is raised.
    pub fn claim_wait(&self, poll: Duration, cancel: &AtomicBool) -> Claim {
        let mut state = self.lock();
        loop {
            match state.claim() {
                Claim::Pending => {}
                other => return other,
            }
            if cancel.load(Ordering::Acquire) {
                return Claim::Pending;
            }
            state = self
                .available
                .wait_timeout(state, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Move the cursor back to the first package.
    pub fn rewind(&self) {
        self.lock().cursor = 0;
    }

    /// Shuffle package order in place.
    ///
    /// Refused, returning `false`, while the store is incomplete.
    pub fn shuffle<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        let mut state = self.lock();
        if !state.complete {
            return false;
        }
        state.packages.shuffle(rng);
        true
    }

    /// Drop every package and start a new generation.
    pub fn clear(&self) {
        *self.lock() = StoreState::default();
    }

    /// Wake every waiting worker so it can observe a cancel flag.
    pub fn wake_all(&self) {
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.lock().packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().packages.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.lock().complete
    }

    pub fn cursor(&self) -> usize {
        self.lock().cursor
    }

    /// Build indices of the stored packages in current order.
    pub fn package_order(&self) -> Vec<usize> {
        self.lock().packages.iter().map(|p| p.index).collect()
    }

    pub fn packages(&self) -> Vec<Arc<Package>> {
        self.lock().packages.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ScpEntry;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;
    use std::thread;

    fn package(id: &str) -> Package {
        Package {
            index: usize::MAX,
            features: vec![ScpEntry::new(id, "x.ark", 0)],
            labels: vec![vec![0]],
            lattices: None,
        }
    }

    fn fill(store: &PackageStore, n: usize) {
        for i in 0..n {
            store.push(package(&format!("u{}", i)));
        }
        store.finish(None);
    }

    #[test]
    fn test_push_assigns_indices() {
        let store = PackageStore::new();
        assert_eq!(store.push(package("a")), 0);
        assert_eq!(store.push(package("b")), 1);
        store.finish(Some(package("c")));
        assert_eq!(store.package_order(), vec![0, 1, 2]);
        assert!(store.is_complete());
    }

    #[test]
    fn test_claim_states() {
        let store = PackageStore::new();
        assert_eq!(store.try_claim(), Claim::Pending);

        store.push(package("a"));
        match store.try_claim() {
            Claim::Ready(p) => assert_eq!(p.index, 0),
            other => panic!("expected Ready, got {:?}", other),
        }
        assert_eq!(store.try_claim(), Claim::Pending);

        store.finish(None);
        assert_eq!(store.try_claim(), Claim::Exhausted);
        assert_eq!(store.cursor(), 1);
    }

    #[test]
    fn test_rewind_replays_store() {
        let store = PackageStore::new();
        fill(&store, 2);
        while let Claim::Ready(_) = store.try_claim() {}
        store.rewind();
        assert!(matches!(store.try_claim(), Claim::Ready(p) if p.index == 0));
    }

    #[test]
    fn test_claim_wait_wakes_on_push() {
        let store = Arc::new(PackageStore::new());
        let cancel = Arc::new(AtomicBool::new(false));

        let waiter = {
            let store = store.clone();
            let cancel = cancel.clone();
            thread::spawn(move || store.claim_wait(Duration::from_secs(5), &cancel))
        };
        thread::sleep(Duration::from_millis(20));
        store.push(package("late"));

        assert!(matches!(waiter.join().unwrap(), Claim::Ready(_)));
    }

    #[test]
    fn test_claim_wait_returns_on_cancel() {
        let store = PackageStore::new();
        let cancel = AtomicBool::new(true);
        assert_eq!(
            store.claim_wait(Duration::from_millis(1), &cancel),
            Claim::Pending
        );
    }

    #[test]
    fn test_abort_reaches_waiters() {
        let store = PackageStore::new();
        store.abort("builder panicked");
        assert_eq!(
            store.claim_wait(Duration::from_millis(1), &AtomicBool::new(false)),
            Claim::Aborted("builder panicked".to_string())
        );
    }

    #[test]
    fn test_concurrent_claims_are_exclusive() {
        let store = Arc::new(PackageStore::new());
        fill(&store, 200);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    let mut claimed = Vec::new();
                    while let Claim::Ready(p) = store.try_claim() {
                        claimed.push(p.index);
                    }
                    claimed
                })
            })
            .collect();

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }
        assert_eq!(all.len(), 200);
        assert_eq!(all.iter().collect::<HashSet<_>>().len(), 200);
    }

    #[test]
    fn test_shuffle_refused_while_incomplete() {
        let store = PackageStore::new();
        for i in 0..10 {
            store.push(package(&format!("u{}", i)));
        }
        let mut rng = StdRng::seed_from_u64(1);
        assert!(!store.shuffle(&mut rng));
        assert_eq!(store.package_order(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_shuffle_permutes_complete_store() {
        let store = PackageStore::new();
        fill(&store, 32);
        let mut rng = StdRng::seed_from_u64(7);
        assert!(store.shuffle(&mut rng));

        let order = store.package_order();
        assert_ne!(order, (0..32).collect::<Vec<_>>());
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn test_clear_starts_new_generation() {
        let store = PackageStore::new();
        fill(&store, 3);
        store.clear();
        assert!(store.is_empty());
        assert!(!store.is_complete());
        assert_eq!(store.try_claim(), Claim::Pending);
    }
}
