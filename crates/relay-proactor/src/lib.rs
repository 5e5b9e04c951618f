// SPDX-License-Identifier: Apache-2.0

//! I/O proactor pool (spec §4.2, "ProactorPool").
//!
//! Owns `now ∈ [min, max]` single-threaded executors, each bound to one OS
//! thread and one `tokio` completion mechanism. `acquire()` round-robins
//! over the live range `[0, now)` and returns a strong [`ExecutorHandle`]
//! so the caller's connection setup is safe even if a shrink races it
//! (spec §4.2). A background autoscaler samples
//! [`relay_monitor::SystemMonitor::system_load_average`] every
//! `update_interval` and grows or shrinks `now` by one slot at a time.
//!
//! Size changes serialize under one `parking_lot::Mutex`, matching spec
//! §4.2 ("Growth and shrinkage are serialised under a single lock") and the
//! teacher's convention of `parking_lot` for short, uncontended critical
//! sections (`crates/channel`, `crates/engine`).

mod executor;

pub mod error;

pub use error::PoolError;
pub use executor::{Executor, ExecutorHandle};

use relay_logging::{log_error, log_info};
use relay_monitor::SystemMonitor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const TARGET: &str = "relay_proactor";

/// Load thresholds the autoscaler compares `system_load_average` against
/// (spec §4.2).
const GROW_THRESHOLD: f64 = 0.6;
const SHRINK_THRESHOLD: f64 = 0.3;

struct Slot {
    executor: ExecutorHandle,
    join: JoinHandle<()>,
}

struct PoolState {
    slots: Vec<Option<Slot>>,
    min: usize,
    max: usize,
}

/// A dynamically sized pool of single-threaded I/O executors.
pub struct ProactorPool {
    state: parking_lot::Mutex<PoolState>,
    now: AtomicUsize,
    cursor: AtomicUsize,
    monitor: Arc<SystemMonitor>,
}

/// Handle to the background autoscaler task.
pub struct AutoscalerHandle {
    cancel: CancellationToken,
    join: Option<tokio::task::JoinHandle<()>>,
}

impl AutoscalerHandle {
    /// Stops the autoscaler and waits for its task to exit.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl ProactorPool {
    /// Launches `min` executors and returns a pool bounded by `[min, max]`.
    /// `max < min` is clamped up to `min`.
    pub fn start(min: usize, max: usize, monitor: Arc<SystemMonitor>) -> Result<Arc<Self>, PoolError> {
        let min = min.max(1);
        let max = max.max(min);
        let mut slots = Vec::with_capacity(max);
        for index in 0..min {
            let spawned = Executor::spawn(index)?;
            slots.push(Some(Slot {
                executor: spawned.executor,
                join: spawned.join,
            }));
        }
        slots.resize_with(max, || None);

        log_info!(TARGET, "started proactor pool: now={min} min={min} max={max}");

        Ok(Arc::new(Self {
            state: parking_lot::Mutex::new(PoolState { slots, min, max }),
            now: AtomicUsize::new(min),
            cursor: AtomicUsize::new(0),
            monitor,
        }))
    }

    /// Returns the next executor via round-robin over `[0, now)`. Never
    /// blocks. The returned `Arc` keeps that executor's thread alive for
    /// as long as the caller holds it, regardless of later shrinkage.
    pub fn acquire(&self) -> Result<ExecutorHandle, PoolError> {
        let now = self.now.load(Ordering::Acquire);
        if now == 0 {
            return Err(PoolError::Empty);
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % now;
        let state = self.state.lock();
        match state.slots.get(idx).and_then(|s| s.as_ref()) {
            Some(slot) => Ok(Arc::clone(&slot.executor)),
            // A concurrent shrink can remove a slot between our `now` read
            // and the lock; retry from the top once with a fresh `now`.
            None => {
                drop(state);
                let now = self.now.load(Ordering::Acquire);
                if now == 0 {
                    return Err(PoolError::Empty);
                }
                let idx = idx % now;
                let state = self.state.lock();
                state
                    .slots
                    .get(idx)
                    .and_then(|s| s.as_ref())
                    .map(|slot| Arc::clone(&slot.executor))
                    .ok_or(PoolError::Empty)
            }
        }
    }

    /// Current number of live executors.
    #[must_use]
    pub fn now(&self) -> usize {
        self.now.load(Ordering::Acquire)
    }

    /// Starts the background autoscaler, sampling every `update_interval`.
    pub fn start_autoscaler(self: &Arc<Self>, update_interval: Duration) -> AutoscalerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let pool = Arc::clone(self);
        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(update_interval) => {
                        pool.autoscale_tick();
                    }
                }
            }
        });
        AutoscalerHandle {
            cancel,
            join: Some(join),
        }
    }

    fn autoscale_tick(&self) {
        let load = self.monitor.system_load_average();
        let now = self.now();
        if load > GROW_THRESHOLD {
            self.grow();
        } else if load < SHRINK_THRESHOLD && now > self.state.lock().min {
            self.shrink();
        }
    }

    /// Grows `now` by one, spawning a new executor at slot `now` before
    /// advancing the counter so `acquire()` never observes an empty slot
    /// within the live range.
    pub fn grow(&self) {
        let mut state = self.state.lock();
        let now = self.now.load(Ordering::Acquire);
        if now >= state.max {
            return;
        }
        match Executor::spawn(now) {
            Ok(spawned) => {
                state.slots[now] = Some(Slot {
                    executor: spawned.executor,
                    join: spawned.join,
                });
                self.now.store(now + 1, Ordering::Release);
                log_info!(TARGET, "grew proactor pool to {}", now + 1);
            }
            Err(err) => {
                log_error!(TARGET, "failed to grow proactor pool: {err}");
            }
        }
    }

    /// Shrinks `now` by one. Decrements `now` first so `acquire()` stops
    /// handing out the departing slot immediately (spec §4.2's recommended
    /// "shrink-phase marks the slot as draining and refuses new
    /// acquisitions"), then waits for every connection pinned to this
    /// executor to actually finish before stopping its runtime - the
    /// drain-before-stop policy the spec recommends over the source's
    /// unconditional stop-and-join (see `DESIGN.md`'s note on this Open
    /// Question). This only works because the acceptor (C7) holds a clone
    /// of the [`ExecutorHandle`] it acquired for the whole life of the
    /// connection, not just through setup - the one-off setup task itself
    /// finishes almost immediately, so a strong-count check keyed on that
    /// alone would fire while the session's reader/writer tasks are still
    /// running on this executor.
    pub fn shrink(&self) {
        let mut state = self.state.lock();
        let now = self.now.load(Ordering::Acquire);
        if now <= state.min {
            return;
        }
        let slot_idx = now - 1;
        self.now.store(slot_idx, Ordering::Release);
        if let Some(slot) = state.slots[slot_idx].take() {
            // Draining and the join both block, so do this off the caller's
            // thread; fire-and-forget is fine for the periodic autoscaler
            // tick, and `shutdown()` unconditionally reaps every slot on
            // its own before returning.
            let _ = std::thread::Builder::new()
                .name(format!("relay-io-{slot_idx}-reap"))
                .spawn(move || {
                    while Arc::strong_count(&slot.executor) > 1 {
                        std::thread::sleep(Duration::from_millis(50));
                    }
                    slot.executor.request_stop();
                    let _ = slot.join.join();
                });
        }
        log_info!(TARGET, "draining proactor pool slot {slot_idx}, now={slot_idx}");
    }

    /// Stops every live executor and joins every owned OS thread.
    /// Idempotent: a second call observes `now == 0` and returns at once.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        let now = self.now.swap(0, Ordering::AcqRel);
        for slot in state.slots.iter_mut().take(now).filter_map(Option::take) {
            slot.executor.request_stop();
            if let Err(err) = slot.join.join() {
                log_error!(TARGET, "executor thread panicked during shutdown: {err:?}");
            }
        }
        log_info!(TARGET, "proactor pool shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_round_robins_across_live_executors() {
        let monitor = Arc::new(SystemMonitor::new());
        let pool = ProactorPool::start(2, 2, monitor).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        assert_ne!(a.index(), b.index());
        assert_eq!(a.index(), c.index());
        pool.shutdown();
    }

    #[tokio::test]
    async fn now_respects_min_and_max_bounds() {
        let monitor = Arc::new(SystemMonitor::new());
        let pool = ProactorPool::start(1, 3, monitor).unwrap();
        assert_eq!(pool.now(), 1);
        pool.grow();
        assert_eq!(pool.now(), 2);
        pool.grow();
        assert_eq!(pool.now(), 3);
        // Already at max: grow is a no-op.
        pool.grow();
        assert_eq!(pool.now(), 3);
        pool.shutdown();
    }

    #[tokio::test]
    async fn shrink_never_goes_below_min() {
        let monitor = Arc::new(SystemMonitor::new());
        let pool = ProactorPool::start(2, 4, monitor).unwrap();
        pool.shrink();
        assert_eq!(pool.now(), 2);
        pool.shutdown();
    }

    #[tokio::test]
    async fn acquired_executor_survives_shrink() {
        let monitor = Arc::new(SystemMonitor::new());
        let pool = ProactorPool::start(1, 2, monitor).unwrap();
        pool.grow();
        assert_eq!(pool.now(), 2);
        let handle = pool.acquire().unwrap();
        pool.shrink();
        assert_eq!(pool.now(), 1);
        // The handle we already hold is still a valid, usable executor.
        let (tx, rx) = tokio::sync::oneshot::channel();
        handle.spawn_task(async move {
            let _ = tx.send(());
        });
        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("spawned task should still run on the draining executor")
            .unwrap();
        pool.shutdown();
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let monitor = Arc::new(SystemMonitor::new());
        let pool = ProactorPool::start(2, 2, monitor).unwrap();
        pool.shutdown();
        pool.shutdown();
        assert_eq!(pool.now(), 0);
    }
}
