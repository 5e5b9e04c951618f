// SPDX-License-Identifier: Apache-2.0

//! Host load sampling (spec §4.1, "SystemMonitor").
//!
//! A single background task samples CPU, memory, and connection-count
//! pressure every `update_interval` and publishes atomic scalars that the
//! proactor pool (C2) and worker pool (C5) autoscalers read without
//! blocking. Grounded on the teacher's dedicated-thread-per-task shape
//! (`crates/controller/src/thread_task.rs`), reduced here to a single
//! lightweight `tokio` task since sampling is cheap and doesn't need its
//! own OS thread or completion queue.

use relay_logging::log_warn;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sysinfo::System;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TARGET: &str = "relay_monitor";
const RING_CAPACITY: usize = 10;

/// Weights applied to each pressure signal by [`SystemMonitor::load_average`].
/// Not required to sum to 1.0 (spec §4.1) — callers compare against
/// thresholds, not absolute magnitudes.
#[derive(Debug, Clone, Copy)]
pub struct LoadWeights {
    /// Weight on `cpu_usage`.
    pub cpu: f64,
    /// Weight on `memory_pressure`.
    pub memory: f64,
    /// Weight on thread pressure (`active_threads / (2*ncpu)`).
    pub thread: f64,
    /// Weight on `io_pressure`.
    pub io: f64,
}

impl Default for LoadWeights {
    fn default() -> Self {
        Self {
            cpu: 0.1,
            memory: 0.5,
            thread: 0.5,
            io: 0.1,
        }
    }
}

fn store_f32(cell: &AtomicU32, value: f32) {
    cell.store(value.to_bits(), Ordering::Relaxed);
}

fn load_f32(cell: &AtomicU32) -> f32 {
    f32::from_bits(cell.load(Ordering::Relaxed))
}

/// Samples host load and exposes it as atomic scalars in `[0, 1]`.
///
/// `active_connections` and `active_threads` are fed by the acceptor (C7)
/// and worker pool (C5) respectively, since this crate has no visibility
/// into either; [`SystemMonitor::set_active_connections`] and
/// [`SystemMonitor::set_active_threads`] update them.
pub struct SystemMonitor {
    cpu_usage: AtomicU32,
    memory_pressure: AtomicU32,
    active_connections: AtomicUsize,
    active_threads: AtomicUsize,
    io_saturation: usize,
    weights: LoadWeights,
    cpu_history: Mutex<VecDeque<f32>>,
    memory_history: Mutex<VecDeque<f32>>,
    running: std::sync::atomic::AtomicBool,
    last_counter_warning: AtomicU64,
}

/// Handle to the background sampling task, stopped by dropping or calling
/// [`MonitorHandle::stop`].
pub struct MonitorHandle {
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stops the sampler and waits for its task to exit. Idempotent.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl SystemMonitor {
    /// Creates a monitor with the default io-saturation constant (20,000
    /// connections ≡ 1.0) and default weights.
    #[must_use]
    pub fn new() -> Self {
        Self::with_io_saturation(20_000)
    }

    /// Creates a monitor with a custom io-saturation constant.
    #[must_use]
    pub fn with_io_saturation(io_saturation: usize) -> Self {
        Self {
            cpu_usage: AtomicU32::new(0),
            memory_pressure: AtomicU32::new(0),
            active_connections: AtomicUsize::new(0),
            active_threads: AtomicUsize::new(0),
            io_saturation: io_saturation.max(1),
            weights: LoadWeights::default(),
            cpu_history: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            memory_history: Mutex::new(VecDeque::with_capacity(RING_CAPACITY)),
            running: std::sync::atomic::AtomicBool::new(false),
            last_counter_warning: AtomicU64::new(0),
        }
    }

    /// Logs a platform-counter failure at warning, rate-limited to once per
    /// minute per spec §4.1.
    fn warn_counter_failure(&self, message: &str) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let last = self.last_counter_warning.load(Ordering::Relaxed);
        if now.saturating_sub(last) >= 60
            && self
                .last_counter_warning
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            log_warn!(TARGET, "{}", message);
        }
    }

    /// Starts the background sampler. Idempotent: calling `start` again
    /// while already running is a no-op that returns `None`.
    pub fn start(self: &std::sync::Arc<Self>, update_interval: Duration) -> Option<MonitorHandle> {
        if self
            .running
            .compare_exchange(
                false,
                true,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return None;
        }
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let this = std::sync::Arc::clone(self);
        let join = tokio::spawn(async move {
            let mut sys = System::new();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(update_interval) => {
                        this.sample(&mut sys);
                    }
                }
            }
            this.running.store(false, Ordering::SeqCst);
        });
        Some(MonitorHandle {
            cancel,
            join: Some(join),
        })
    }

    fn sample(&self, sys: &mut System) {
        sys.refresh_cpu_usage();
        let cpu = (sys.global_cpu_usage() / 100.0).clamp(0.0, 1.0);
        sys.refresh_memory();
        let total = sys.total_memory();
        let mem = if total == 0 {
            self.warn_counter_failure("memory counters unavailable; reporting 0 pressure");
            0.0
        } else {
            (sys.used_memory() as f64 / total as f64) as f32
        };
        store_f32(&self.cpu_usage, cpu);
        store_f32(&self.memory_pressure, mem.clamp(0.0, 1.0));
        push_ring(&self.cpu_history, cpu);
        push_ring(&self.memory_history, mem);
    }

    /// Fraction of wall time the host was not idle, `[0, 1]`. Zero before
    /// the first sample completes.
    #[must_use]
    pub fn cpu_usage(&self) -> f32 {
        load_f32(&self.cpu_usage)
    }

    /// Used-memory over total-memory, `[0, 1]`.
    #[must_use]
    pub fn memory_pressure(&self) -> f32 {
        load_f32(&self.memory_pressure)
    }

    /// `active_connections / io_saturation`, clamped to `1.0`.
    #[must_use]
    pub fn io_pressure(&self) -> f64 {
        let connections = self.active_connections.load(Ordering::Relaxed) as f64;
        (connections / self.io_saturation as f64).min(1.0)
    }

    /// `active_threads / (2 * hardware_concurrency)`.
    #[must_use]
    pub fn thread_pressure(&self) -> f64 {
        let ncpu = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1) as f64;
        let threads = self.active_threads.load(Ordering::Relaxed) as f64;
        threads / (2.0 * ncpu)
    }

    /// Weighted sum of the four pressure signals (spec §4.1). Not
    /// normalized; callers compare it against thresholds.
    #[must_use]
    pub fn system_load_average(&self) -> f64 {
        self.weights.cpu * self.cpu_usage() as f64
            + self.weights.memory * self.memory_pressure() as f64
            + self.weights.thread * self.thread_pressure()
            + self.weights.io * self.io_pressure()
    }

    /// Records the current number of live sessions, fed by the acceptor.
    pub fn set_active_connections(&self, count: usize) {
        self.active_connections.store(count, Ordering::Relaxed);
    }

    /// Records the current number of live worker/executor threads, fed by
    /// the pools.
    pub fn set_active_threads(&self, count: usize) {
        self.active_threads.store(count, Ordering::Relaxed);
    }

    /// The trailing ring buffer of up to the last 10 CPU samples, oldest
    /// first, for callers that want smoothing rather than the latest raw
    /// value returned by [`SystemMonitor::cpu_usage`].
    #[must_use]
    pub fn cpu_history(&self) -> Vec<f32> {
        self.cpu_history.lock().expect("lock poisoned").iter().copied().collect()
    }

    /// The trailing ring buffer of up to the last 10 memory samples.
    #[must_use]
    pub fn memory_history(&self) -> Vec<f32> {
        self.memory_history
            .lock()
            .expect("lock poisoned")
            .iter()
            .copied()
            .collect()
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn push_ring(ring: &Mutex<VecDeque<f32>>, value: f32) {
    let mut guard = ring.lock().expect("lock poisoned");
    if guard.len() == RING_CAPACITY {
        let _ = guard.pop_front();
    }
    guard.push_back(value);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_pressure_clamps_to_one() {
        let monitor = SystemMonitor::with_io_saturation(10);
        monitor.set_active_connections(25);
        assert_eq!(monitor.io_pressure(), 1.0);
    }

    #[test]
    fn io_pressure_scales_linearly_below_saturation() {
        let monitor = SystemMonitor::with_io_saturation(100);
        monitor.set_active_connections(25);
        assert!((monitor.io_pressure() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn thread_pressure_uses_double_ncpu_denominator() {
        let monitor = SystemMonitor::new();
        let ncpu = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(1) as f64;
        monitor.set_active_threads(ncpu as usize);
        assert!((monitor.thread_pressure() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn first_sample_state_is_zero() {
        let monitor = SystemMonitor::new();
        assert_eq!(monitor.cpu_usage(), 0.0);
        assert_eq!(monitor.memory_pressure(), 0.0);
    }

    #[test]
    fn load_average_combines_weighted_signals() {
        let monitor = SystemMonitor::with_io_saturation(100);
        monitor.set_active_connections(100);
        // cpu/mem are 0 pre-sample; only io and thread contribute here.
        let expected = monitor.weights.io * 1.0;
        assert!((monitor.system_load_average() - expected).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_idempotent() {
        let monitor = std::sync::Arc::new(SystemMonitor::new());
        let first = monitor.start(Duration::from_millis(10));
        assert!(first.is_some());
        let second = monitor.start(Duration::from_millis(10));
        assert!(second.is_none());
        if let Some(mut handle) = first {
            handle.stop().await;
        }
    }
}
