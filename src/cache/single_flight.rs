//! Per-key coalescing of concurrent work
//!
//! The first caller for a key spawns the work on its own task; callers that
//! arrive while it is running subscribe to the same result instead of
//! starting a second copy. The work runs to completion even if every caller
//! goes away.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::watch;

/// How a caller obtained its result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Started the work
    Leader,
    /// Joined work started by another caller
    Follower,
}

/// The work for a key ended without producing a value (it panicked or was aborted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("in-flight work ended without a result")]
pub struct FlightAbandoned;

type Flights<K, V> = DashMap<K, watch::Receiver<Option<V>>>;

/// Registry of in-flight work keyed by `K`
pub struct SingleFlight<K, V> {
    flights: Arc<Flights<K, V>>,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
        }
    }

    /// Run `work` for `key`, or wait for the copy already running.
    ///
    /// `work` is only polled if this caller becomes the leader.
    pub async fn run<F>(&self, key: K, work: F) -> Result<(V, Role), FlightAbandoned>
    where
        F: Future<Output = V> + Send + 'static,
    {
        let (mut rx, role) = match self.flights.entry(key.clone()) {
            Entry::Occupied(entry) => (entry.get().clone(), Role::Follower),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                entry.insert(rx.clone());

                let guard = FlightGuard {
                    flights: Arc::clone(&self.flights),
                    key,
                };
                tokio::spawn(async move {
                    let value = work.await;
                    let _ = tx.send(Some(value));
                    drop(guard);
                });

                (rx, Role::Leader)
            }
        };

        let value = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| FlightAbandoned)?
            .clone()
            .ok_or(FlightAbandoned)?;
        Ok((value, role))
    }

    /// Number of keys with work in progress
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the registry entry when the work finishes or unwinds.
struct FlightGuard<K: Eq + Hash, V> {
    flights: Arc<Flights<K, V>>,
    key: K,
}

impl<K: Eq + Hash, V> Drop for FlightGuard<K, V> {
    fn drop(&mut self) {
        self.flights.remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_single_caller_leads() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        let (value, role) = flights.run("a", async { 7 }).await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(role, Role::Leader);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let flights: Arc<SingleFlight<String, usize>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let release = Arc::new(Notify::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = Arc::clone(&flights);
            let runs = Arc::clone(&runs);
            let release = Arc::clone(&release);
            handles.push(tokio::spawn(async move {
                flights
                    .run("key".to_string(), async move {
                        release.notified().await;
                        runs.fetch_add(1, Ordering::SeqCst) + 100
                    })
                    .await
                    .unwrap()
            }));
        }

        while flights.in_flight() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Give every caller time to join before releasing the leader.
        tokio::time::sleep(Duration::from_millis(50)).await;
        release.notify_one();

        let mut leaders = 0;
        for handle in handles {
            let (value, role) = handle.await.unwrap();
            assert_eq!(value, 100);
            if role == Role::Leader {
                leaders += 1;
            }
        }
        assert_eq!(leaders, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let flights: SingleFlight<u8, u8> = SingleFlight::new();
        let (a, b) = tokio::join!(flights.run(1, async { 1 }), flights.run(2, async { 2 }));
        assert_eq!(a.unwrap(), (1, Role::Leader));
        assert_eq!(b.unwrap(), (2, Role::Leader));
    }

    async fn explode() -> u8 {
        panic!("work failed")
    }

    #[tokio::test]
    async fn test_panicking_work_is_abandoned_and_cleared() {
        let flights: SingleFlight<u8, u8> = SingleFlight::new();
        let result = flights.run(1, explode()).await;
        assert_eq!(result, Err(FlightAbandoned));
        assert_eq!(flights.in_flight(), 0);

        let (value, role) = flights.run(1, async { 3 }).await.unwrap();
        assert_eq!((value, role), (3, Role::Leader));
    }

    #[tokio::test]
    async fn test_work_survives_dropped_caller() {
        let flights: SingleFlight<u8, u8> = SingleFlight::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let done = Arc::clone(&finished);
        let call = flights.run(1, async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            done.fetch_add(1, Ordering::SeqCst);
            1
        });
        let _ = tokio::time::timeout(Duration::from_millis(1), call).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(flights.in_flight(), 0);
    }
}
