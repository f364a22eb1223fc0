//! Suppresses duplicate concurrent work for the same key (§4.8).
//!
//! `do_call(key, fut)`: if a call for `key` is already in flight, the caller
//! awaits its completion and receives the same result. Otherwise a new call
//! record is installed, the future runs with the map unlocked, the result
//! is broadcast to every waiter, and the record is removed — removal
//! happens only after the future resolves, so callers that arrive after
//! completion start a fresh call rather than replaying a cached one. This
//! is suppression, not memoization.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;

use tokio::sync::broadcast;

/// One suppressed-duplication group, keyed by `K`. `V` and `E` must be
/// `Clone` because every waiter in a burst receives its own copy of the
/// single result.
pub struct SingleFlight<K, V, E> {
    calls: Mutex<HashMap<K, broadcast::Sender<Result<V, E>>>>,
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: std::hash::Hash + Eq,
{
    fn default() -> Self {
        SingleFlight {
            calls: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `make_fut()` at most once per concurrently-overlapping burst of
    /// calls sharing `key`. `make_fut` is only invoked by the caller that
    /// wins the race to install the call record; everyone else just waits.
    pub async fn do_call<F, Fut>(&self, key: K, make_fut: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let mut joined_rx = None;
        {
            let mut calls = self.calls.lock().expect("singleflight map poisoned");
            if let Some(tx) = calls.get(&key) {
                joined_rx = Some(tx.subscribe());
            } else {
                let (tx, _rx) = broadcast::channel(1);
                calls.insert(key.clone(), tx);
            }
        }

        if let Some(mut rx) = joined_rx {
            return match rx.recv().await {
                Ok(result) => result,
                Err(_) => {
                    // The leader dropped its sender without a send, which
                    // can only happen if it panicked mid-flight. Fall back
                    // to running the work ourselves rather than hanging.
                    make_fut().await
                }
            };
        }

        let result = make_fut().await;

        let tx = {
            let mut calls = self.calls.lock().expect("singleflight map poisoned");
            calls.remove(&key)
        };
        if let Some(tx) = tx {
            // No receivers is a normal outcome (no one was actually
            // waiting), so a send error here is not a bug.
            let _ = tx.send(result.clone());
        }
        result
    }

    pub fn in_flight_count(&self) -> usize {
        self.calls.lock().expect("singleflight map poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_callers_share_one_execution() {
        let sf: Arc<SingleFlight<String, u64, String>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..64 {
            let sf = sf.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                sf.do_call("k".to_string(), || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<u64, String>(7)
                    }
                })
                .await
            }));
        }

        let mut results = Vec::new();
        for h in handles {
            results.push(h.await.unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| *r == Ok(7)));
    }

    #[tokio::test]
    async fn sequential_calls_after_completion_rerun_the_work() {
        let sf: SingleFlight<String, u64, String> = SingleFlight::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            sf.do_call("k".to_string(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<u64, String>(1)
            })
            .await
            .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(sf.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_do_not_suppress_each_other() {
        let sf: SingleFlight<String, u64, String> = SingleFlight::new();
        let a = sf.do_call("a".to_string(), || async { Ok::<u64, String>(1) });
        let b = sf.do_call("b".to_string(), || async { Ok::<u64, String>(2) });
        assert_eq!((a.await, b.await), (Ok(1), Ok(2)));
    }
}
