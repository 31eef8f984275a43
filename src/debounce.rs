//! Per-key debouncing.
//!
//! Each key has at most one pending timer. A new event for the key aborts the
//! pending timer and starts a fresh one; the action only runs once the key has
//! been quiet for the whole window.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

struct Pending {
    generation: u64,
    task: JoinHandle<()>,
}

pub struct Debouncer<K> {
    window: Duration,
    pending: Arc<Mutex<HashMap<K, Pending>>>,
    generation: AtomicU64,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// (Re)start the timer for `key`; `action` runs if no newer event for the
    /// same key arrives within the window.
    pub fn schedule<F, Fut>(&self, key: K, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let pending = self.pending.clone();
        let window = self.window;
        let timer_key = key.clone();

        // Hold the map lock while spawning so the timer cannot claim its slot
        // before it is inserted.
        let mut map = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        let task = tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let claimed = {
                let mut map = pending.lock().unwrap_or_else(PoisonError::into_inner);
                match map.get(&timer_key) {
                    Some(p) if p.generation == generation => {
                        map.remove(&timer_key);
                        true
                    }
                    _ => false,
                }
            };
            if claimed {
                action().await;
            }
        });

        if let Some(previous) = map.insert(key, Pending { generation, task }) {
            previous.task.abort();
        }
    }

    /// Drop the pending timer for `key`. Returns false if none was pending.
    pub fn cancel(&self, key: &K) -> bool {
        let removed = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        match removed {
            Some(p) => {
                p.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        let map = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        for p in map.values() {
            p.task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_action(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_for_one_key_fires_once_after_quiet_period() {
        let debouncer = Debouncer::new(Duration::from_millis(500));
        let fired = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            debouncer.schedule("msg-1", counter_action(&fired));
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn keys_are_independent() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let fired = Arc::new(AtomicUsize::new(0));

        debouncer.schedule("a", counter_action(&fired));
        debouncer.schedule("b", counter_action(&fired));
        assert_eq!(debouncer.pending_count(), 2);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let fired = Arc::new(AtomicUsize::new(0));

        debouncer.schedule(7u32, counter_action(&fired));
        assert!(debouncer.cancel(&7));
        assert!(!debouncer.cancel(&7));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn key_can_fire_again_after_settling() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let fired = Arc::new(AtomicUsize::new(0));

        debouncer.schedule("k", counter_action(&fired));
        tokio::time::sleep(Duration::from_millis(150)).await;
        debouncer.schedule("k", counter_action(&fired));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
