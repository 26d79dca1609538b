//! Keyed scheduler for one-shot and repeating callbacks.
//!
//! Every timer lives under a caller-chosen string key and there is at most
//! one live timer per key: arming a key cancels whatever was armed under it
//! before. Callbacks run as tokio tasks. A failing or panicking callback is
//! logged and its slot is always released.
//!
//! ```ignore
//! let timers = TimerRegistry::new(Duration::from_secs(1));
//! timers.schedule_once("s1:self-destruct", Duration::from_secs(300), || async { Ok(()) });
//! let handle = timers.schedule_repeating("s1:countdown", || async { Ok(TickOutcome::Continue) });
//! handle.cancel();
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use tokio::task::AbortHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::error::Result;

/// What a repeating callback wants after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    Done,
}

struct Slot {
    generation: u64,
    abort: AbortHandle,
}

#[derive(Default)]
struct Slots {
    next_generation: u64,
    entries: HashMap<String, Slot>,
}

/// Shared keyed timer registry. Cloning is cheap and clones share slots.
#[derive(Clone)]
pub struct TimerRegistry {
    slots: Arc<Mutex<Slots>>,
    tick: Duration,
}

impl TimerRegistry {
    /// Create a registry whose repeating timers fire every `tick`.
    pub fn new(tick: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots::default())),
            tick,
        }
    }

    /// Arm `callback` to run once after `delay`, replacing any timer under `key`.
    pub fn schedule_once<F, Fut>(&self, key: impl Into<String>, delay: Duration, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let key = key.into();
        let registry = self.clone();
        let task_key = key.clone();

        let previous = {
            let mut slots = self.lock();
            slots.next_generation += 1;
            let generation = slots.next_generation;

            let task = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                // The slot is free as soon as the timer fires.
                if !registry.release(&task_key, generation) {
                    return;
                }
                let outcome = AssertUnwindSafe(async move { callback().await })
                    .catch_unwind()
                    .await;
                match outcome {
                    Ok(Ok(())) => debug!(key = %task_key, "timer fired"),
                    Ok(Err(err)) => warn!(key = %task_key, error = %err, "timer callback failed"),
                    Err(_) => error!(key = %task_key, "timer callback panicked"),
                }
            });

            slots.entries.insert(
                key.clone(),
                Slot {
                    generation,
                    abort: task.abort_handle(),
                },
            )
        };

        if let Some(prev) = previous {
            prev.abort.abort();
        }
        debug!(key = %key, delay_ms = delay.as_millis() as u64, "armed one-shot timer");
    }

    /// Arm `callback` to run every tick until cancelled or it returns
    /// [`TickOutcome::Done`]. The first call happens one tick from now.
    pub fn schedule_repeating<F, Fut>(&self, key: impl Into<String>, mut callback: F) -> TimerHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<TickOutcome>> + Send + 'static,
    {
        let key = key.into();
        let tick = self.tick;

        let (generation, previous) = {
            let mut slots = self.lock();
            slots.next_generation += 1;
            let generation = slots.next_generation;

            let guard = SlotGuard {
                registry: self.clone(),
                key: key.clone(),
                generation,
            };
            let task = tokio::spawn(async move {
                let guard = guard;
                let mut interval = tokio::time::interval_at(Instant::now() + tick, tick);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    interval.tick().await;
                    let outcome = AssertUnwindSafe(async { callback().await })
                        .catch_unwind()
                        .await;
                    match outcome {
                        Ok(Ok(TickOutcome::Continue)) => {}
                        Ok(Ok(TickOutcome::Done)) => break,
                        Ok(Err(err)) => {
                            warn!(key = %guard.key, error = %err, "repeating timer callback failed")
                        }
                        Err(_) => {
                            error!(key = %guard.key, "repeating timer callback panicked");
                            break;
                        }
                    }
                }
            });

            let previous = slots.entries.insert(
                key.clone(),
                Slot {
                    generation,
                    abort: task.abort_handle(),
                },
            );
            (generation, previous)
        };

        if let Some(prev) = previous {
            prev.abort.abort();
        }
        debug!(key = %key, tick_ms = tick.as_millis() as u64, "armed repeating timer");

        TimerHandle {
            registry: self.clone(),
            key,
            generation,
        }
    }

    /// Cancel the timer under `key`. Unknown or already-fired keys are a no-op.
    pub fn cancel(&self, key: &str) {
        let removed = self.lock().entries.remove(key);
        if let Some(slot) = removed {
            slot.abort.abort();
            debug!(key = %key, "cancelled timer");
        }
    }

    /// Cancel every timer whose key starts with `prefix`.
    pub fn cancel_prefix(&self, prefix: &str) -> usize {
        let removed: Vec<(String, Slot)> = {
            let mut slots = self.lock();
            let keys: Vec<String> = slots
                .entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|k| slots.entries.remove(&k).map(|slot| (k, slot)))
                .collect()
        };
        for (key, slot) in &removed {
            slot.abort.abort();
            debug!(key = %key, "cancelled timer");
        }
        removed.len()
    }

    pub fn is_armed(&self, key: &str) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Number of live timers.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop the slot for `key` if it still belongs to `generation`.
    fn release(&self, key: &str, generation: u64) -> bool {
        let mut slots = self.lock();
        match slots.entries.get(key) {
            Some(slot) if slot.generation == generation => {
                slots.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // Slot bookkeeping stays consistent even if a holder panicked.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

/// Releases a repeating timer's slot when its task ends for any reason.
struct SlotGuard {
    registry: TimerRegistry,
    key: String,
    generation: u64,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.registry.release(&self.key, self.generation);
    }
}

/// Cancellation handle for one repeating timer.
///
/// Cancelling a handle never affects a newer timer armed under the same key.
#[derive(Clone)]
pub struct TimerHandle {
    registry: TimerRegistry,
    key: String,
    generation: u64,
}

impl TimerHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Whether this handle's timer is still armed.
    pub fn is_active(&self) -> bool {
        self.registry
            .lock()
            .entries
            .get(&self.key)
            .is_some_and(|slot| slot.generation == self.generation)
    }

    pub fn cancel(&self) {
        let removed = {
            let mut slots = self.registry.lock();
            match slots.entries.get(&self.key) {
                Some(slot) if slot.generation == self.generation => slots.entries.remove(&self.key),
                _ => None,
            }
        };
        if let Some(slot) = removed {
            slot.abort.abort();
        }
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[tokio::test(start_paused = true)]
    async fn once_fires_after_delay_and_releases_slot() {
        let timers = TimerRegistry::default();
        let fired = counter();
        let f = fired.clone();
        timers.schedule_once("k", Duration::from_secs(10), move || async move {
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert!(timers.is_armed("k"));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timers.is_armed("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_previous_timer() {
        let timers = TimerRegistry::default();
        let fired = counter();
        for _ in 0..5 {
            let f = fired.clone();
            timers.schedule_once("k", Duration::from_secs(10), move || async move {
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
        assert_eq!(timers.len(), 1);
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent() {
        let timers = TimerRegistry::default();
        let fired = counter();
        let f = fired.clone();
        timers.schedule_once("k", Duration::from_secs(1), move || async move {
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        timers.cancel("k");
        timers.cancel("k");
        timers.cancel("never-armed");
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_callback_releases_slot() {
        let timers = TimerRegistry::default();
        timers.schedule_once("err", Duration::from_secs(1), || async {
            Err(CoreError::Unauthorized("boom".into()))
        });
        timers.schedule_once("panic", Duration::from_secs(1), || async {
            if true {
                panic!("callback exploded");
            }
            Ok(())
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(timers.is_empty());

        // The registry still works afterwards.
        let fired = counter();
        let f = fired.clone();
        timers.schedule_once("ok", Duration::from_secs(1), move || async move {
            f.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_runs_until_done() {
        let timers = TimerRegistry::default();
        let ticks = counter();
        let t = ticks.clone();
        let handle = timers.schedule_repeating("countdown", move || {
            let t = t.clone();
            async move {
                let n = t.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(if n == 3 { TickOutcome::Done } else { TickOutcome::Continue })
            }
        });
        assert!(handle.is_active());

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(!timers.is_armed("countdown"));
        assert!(!handle.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_keeps_ticking_after_error() {
        let timers = TimerRegistry::default();
        let ticks = counter();
        let t = ticks.clone();
        let handle = timers.schedule_repeating("flaky", move || {
            let t = t.clone();
            async move {
                let n = t.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    Err(CoreError::Unauthorized("transient".into()))
                } else {
                    Ok(TickOutcome::Continue)
                }
            }
        });
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        handle.cancel();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_handle_does_not_cancel_newer_timer() {
        let timers = TimerRegistry::default();
        let old = timers.schedule_repeating("k", || async { Ok(TickOutcome::Continue) });
        let new = timers.schedule_repeating("k", || async { Ok(TickOutcome::Continue) });
        assert!(!old.is_active());
        old.cancel();
        assert!(new.is_active());
        assert!(timers.is_armed("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prefix_only_touches_matching_keys() {
        let timers = TimerRegistry::default();
        timers.schedule_once("a:1", Duration::from_secs(60), || async { Ok(()) });
        timers.schedule_once("a:2", Duration::from_secs(60), || async { Ok(()) });
        timers.schedule_once("b:1", Duration::from_secs(60), || async { Ok(()) });
        assert_eq!(timers.cancel_prefix("a:"), 2);
        assert!(timers.is_armed("b:1"));
        assert_eq!(timers.len(), 1);
    }
}
