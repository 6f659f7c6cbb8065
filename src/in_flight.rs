use futures::future::{BoxFuture, FutureExt, Shared};
use log::{debug, error};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::metrics;

/// Outcome shared by every caller waiting on the same in-flight update.
pub type SharedOutcome = Result<(), Arc<anyhow::Error>>;

type InFlightFuture = Shared<BoxFuture<'static, SharedOutcome>>;
type Entries<K> = Arc<Mutex<HashMap<K, InFlightFuture>>>;

/// Coalesces concurrent work by key.
///
/// The first caller for a key spawns the work onto the runtime and records it;
/// later callers with the same key await that same work instead of starting
/// their own. The record is dropped when the work settles, before any caller
/// observes the outcome, so the next call for the key starts fresh.
///
/// Work is spawned, not polled by the callers: dropping every waiter (for
/// example when a poll timer is stopped) does not cancel it.
pub struct InFlight<K> {
    component: &'static str,
    entries: Entries<K>,
}

impl<K> InFlight<K>
where
    K: Eq + Hash + Clone + Debug + Send + 'static,
{
    pub fn new(component: &'static str) -> Self {
        Self {
            component,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Runs `work` unless work for `key` is already in flight, in which case
    /// waits for that one. Either way resolves with the outcome of the single
    /// execution.
    pub async fn run_exclusive<F>(&self, key: K, work: F) -> SharedOutcome
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let in_flight = {
            let mut entries = lock(&self.entries);
            match entries.get(&key) {
                Some(existing) => {
                    debug!("{}: joining in-flight update for {:?}", self.component, key);
                    metrics::increment_coalesced_request(self.component);
                    existing.clone()
                }
                None => {
                    let guard = SettleGuard {
                        entries: Arc::clone(&self.entries),
                        key: Some(key.clone()),
                    };
                    let handle = tokio::spawn(async move {
                        let outcome = work.await.map_err(Arc::new);
                        drop(guard);
                        outcome
                    });
                    let component = self.component;
                    let shared = async move {
                        match handle.await {
                            Ok(outcome) => outcome,
                            Err(join_error) => {
                                error!("{}: in-flight update did not finish: {}", component, join_error);
                                Err(Arc::new(anyhow::anyhow!(
                                    "in-flight update did not finish: {}",
                                    join_error
                                )))
                            }
                        }
                    }
                    .boxed()
                    .shared();
                    entries.insert(key, shared.clone());
                    shared
                }
            }
        };

        in_flight.await
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        lock(&self.entries).contains_key(key)
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }
}

/// Removes the in-flight record when the spawned work ends, including by panic.
struct SettleGuard<K: Eq + Hash> {
    entries: Entries<K>,
    key: Option<K>,
}

impl<K: Eq + Hash> Drop for SettleGuard<K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            lock(&self.entries).remove(&key);
        }
    }
}

fn lock<K>(entries: &Entries<K>) -> MutexGuard<'_, HashMap<K, InFlightFuture>> {
    entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
