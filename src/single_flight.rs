//! Single-flight execution keyed by an arbitrary identity.
//!
//! The first caller for a key spawns the operation on its own task and
//! registers a shared handle to its result; every later caller for the same
//! key awaits that handle instead of starting a second operation. The entry
//! is removed by the task itself once the operation finishes, whether it
//! succeeded or failed, so a failure is never replayed to a later caller.
//!
//! Dropping a caller's future only stops that caller from waiting. The
//! spawned operation keeps running and still delivers its result to the
//! remaining waiters.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinError;

type SharedResult<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// How a call to [`SingleFlight::run`] was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flight {
    /// This call started the operation.
    Led,
    /// This call joined an operation already in flight.
    Joined,
}

pub struct SingleFlight<K, T, E> {
    in_flight: Arc<Mutex<HashMap<K, SharedResult<T, E>>>>,
}

impl<K, T, E> SingleFlight<K, T, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `operation` for `key`, or join the run already in flight.
    ///
    /// `operation` is only invoked when this call leads.
    pub async fn run<F, Fut>(&self, key: K, operation: F) -> (Result<T, E>, Flight)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (shared, flight) = {
            let mut in_flight = lock(&self.in_flight);

            if let Some(existing) = in_flight.get(&key) {
                (existing.clone(), Flight::Joined)
            } else {
                let fut = operation();
                let table = Arc::clone(&self.in_flight);
                let task_key = key.clone();

                // The lock is still held here, so the task cannot remove the
                // entry before it has been inserted.
                let handle = tokio::spawn(async move {
                    let _entry = EntryGuard {
                        table,
                        key: task_key,
                    };
                    fut.await
                });

                let shared = async move { handle.await.unwrap_or_else(|e| Err(E::from(e))) }
                    .boxed()
                    .shared();
                in_flight.insert(key, shared.clone());
                (shared, Flight::Led)
            }
        };

        (shared.await, flight)
    }

    /// Whether an operation for `key` is currently running.
    pub fn is_in_flight(&self, key: &K) -> bool {
        lock(&self.in_flight).contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

impl<K, T, E> Default for SingleFlight<K, T, E>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the table entry when the task ends, including by panic.
struct EntryGuard<K: Eq + Hash, V> {
    table: Arc<Mutex<HashMap<K, V>>>,
    key: K,
}

impl<K: Eq + Hash, V> Drop for EntryGuard<K, V> {
    fn drop(&mut self) {
        lock(&self.table).remove(&self.key);
    }
}

fn lock<K, V>(map: &Mutex<HashMap<K, V>>) -> MutexGuard<'_, HashMap<K, V>> {
    // Nothing panics while holding the lock; recover the map if it ever does.
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
