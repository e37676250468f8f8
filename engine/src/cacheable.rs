//! Memoized async values.
//!
//! A [`Cacheable`] runs its producer once and hands every caller the same
//! result. Callers that arrive while the producer is running share the
//! in-flight future instead of starting another one. Successes are kept for
//! the lifetime of the value; a failure is delivered to everyone waiting on
//! that attempt and then forgotten, so the next call tries again.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, FutureExt, Shared};

type Producer<T, E> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

enum Slot<T, E> {
    Empty,
    Pending {
        attempt: u64,
        future: Shared<BoxFuture<'static, Result<T, E>>>,
    },
    Ready(T),
}

struct State<T, E> {
    slot: Slot<T, E>,
    attempts: u64,
}

pub struct Cacheable<T, E> {
    producer: Producer<T, E>,
    state: Mutex<State<T, E>>,
}

impl<T, E> Cacheable<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new<F, Fut>(producer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            producer: Arc::new(move || producer().boxed()),
            state: Mutex::new(State {
                slot: Slot::Empty,
                attempts: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State<T, E>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve the value, running the producer only if nothing is cached or
    /// in flight.
    pub async fn get_value(&self) -> Result<T, E> {
        let (attempt, future) = {
            let mut state = self.lock();
            match &state.slot {
                Slot::Ready(value) => return Ok(value.clone()),
                Slot::Pending { attempt, future } => (*attempt, future.clone()),
                Slot::Empty => {
                    state.attempts += 1;
                    let attempt = state.attempts;
                    let future = (self.producer)().shared();
                    state.slot = Slot::Pending {
                        attempt,
                        future: future.clone(),
                    };
                    (attempt, future)
                }
            }
        };

        let result = future.await;

        let mut state = self.lock();
        if matches!(&state.slot, Slot::Pending { attempt: current, .. } if *current == attempt) {
            state.slot = match &result {
                Ok(value) => Slot::Ready(value.clone()),
                Err(_) => Slot::Empty,
            };
        }
        result
    }

    /// Drop the cached value. An in-flight attempt still completes for its
    /// waiters but is no longer stored.
    pub fn invalidate(&self) {
        self.lock().slot = Slot::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn counting<T: Clone + Send + Sync + 'static>(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
        result: impl Fn(usize) -> Result<T, String> + Send + Sync + 'static,
    ) -> Cacheable<T, String> {
        let calls = Arc::clone(calls);
        let result = Arc::new(result);
        Cacheable::new(move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let result = Arc::clone(&result);
            async move {
                tokio::time::sleep(delay).await;
                result(n)
            }
        })
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_producer_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(counting(&calls, Duration::from_millis(30), |n| {
            Ok(format!("v{n}"))
        }));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.get_value().await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "v1");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_is_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting(&calls, Duration::ZERO, |n| Ok(n));

        assert_eq!(cache.get_value().await.unwrap(), 1);
        assert_eq!(cache.get_value().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_is_shared_then_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(counting(&calls, Duration::from_millis(20), |n| {
            if n == 1 {
                Err("engine missing".to_string())
            } else {
                Ok(n)
            }
        }));

        let a = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.get_value().await }
        });
        let b = tokio::spawn({
            let cache = Arc::clone(&cache);
            async move { cache.get_value().await }
        });
        assert_eq!(a.await.unwrap(), Err("engine missing".to_string()));
        assert_eq!(b.await.unwrap(), Err("engine missing".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert_eq!(cache.get_value().await, Ok(2));
        assert_eq!(cache.get_value().await, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_a_new_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting(&calls, Duration::ZERO, |n| Ok(n));

        assert_eq!(cache.get_value().await.unwrap(), 1);
        cache.invalidate();
        assert_eq!(cache.get_value().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn dropped_caller_does_not_restart_producer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting(&calls, Duration::from_millis(30), |n| Ok(n));

        let first = tokio::time::timeout(Duration::from_millis(5), cache.get_value()).await;
        assert!(first.is_err());

        assert_eq!(cache.get_value().await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
