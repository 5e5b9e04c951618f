// SPDX-License-Identifier: Apache-2.0

//! A single executor: one OS thread, one single-threaded Tokio runtime
//! (= "one system-level completion mechanism" per spec §3).
//!
//! Grounded on the teacher's dedicated-thread task runner
//! (`crates/controller/src/thread_task.rs::spawn_thread_local_task`):
//! a `thread::Builder` spawn that builds a `current_thread` runtime and
//! drives it with `block_on`, paired with a `CancellationToken` for
//! shutdown. Unlike the teacher's one-shot task, an `Executor` stays alive
//! to accept further `spawn` calls from any thread via its
//! `tokio::runtime::Handle`, which is how the acceptor (C7) hands a
//! session's reader/writer tasks to whichever executor `acquire()` picked.

use crate::error::PoolError;
use std::future::Future;
use std::sync::mpsc as std_mpsc;
use std::thread;
use tokio::runtime::{Builder as RtBuilder, Handle};
use tokio_util::sync::CancellationToken;

/// One live executor: an index into the pool, a handle for spawning tasks
/// onto its thread, and a cancellation token that stops its event loop.
///
/// Holds the "liveness pin" spec §3 describes: as long as any
/// `Arc<Executor>` (an `ExecutorHandle`) is held, the executor's runtime
/// `Handle` remains usable for spawning; [`ProactorPool`](crate::ProactorPool)
/// cancels the token during shrink, which is what actually stops the loop.
pub struct Executor {
    index: usize,
    handle: Handle,
    cancel: CancellationToken,
}

/// A strong reference to a live executor. Cloning keeps the executor's
/// thread and runtime alive for the clone's lifetime, which is how
/// `acquire()` stays safe across a concurrent shrink (spec §4.2).
pub type ExecutorHandle = std::sync::Arc<Executor>;

pub(crate) struct SpawnedExecutor {
    pub executor: ExecutorHandle,
    pub join: thread::JoinHandle<()>,
}

impl Executor {
    /// Spawns a new OS thread running a single-threaded Tokio runtime,
    /// blocks (on the calling thread) only long enough to receive the new
    /// runtime's `Handle` back over a std channel, then returns.
    pub(crate) fn spawn(index: usize) -> Result<SpawnedExecutor, PoolError> {
        let cancel = CancellationToken::new();
        let cancel_for_thread = cancel.clone();
        let (tx, rx) = std_mpsc::channel();
        let thread_name = format!("relay-io-{index}");

        let join = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let rt = match RtBuilder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt,
                    Err(err) => {
                        let _ = tx.send(Err(PoolError::RuntimeBuildError(err)));
                        return;
                    }
                };
                let handle = rt.handle().clone();
                if tx.send(Ok(handle)).is_err() {
                    return;
                }
                rt.block_on(cancel_for_thread.cancelled());
            })
            .map_err(|source| PoolError::ThreadSpawnError {
                thread_name: thread_name.clone(),
                source,
            })?;

        let handle = rx.recv().map_err(|_| PoolError::StartupHandshakeLost)??;

        Ok(SpawnedExecutor {
            executor: std::sync::Arc::new(Executor {
                index,
                handle,
                cancel,
            }),
            join,
        })
    }

    /// The slot index this executor currently occupies.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Spawns `future` onto this executor's runtime from any thread.
    pub fn spawn_task<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _join = self.handle.spawn(future);
    }

    /// A clone of the underlying runtime handle, for callers that need to
    /// spawn with a join handle they hold onto themselves.
    #[must_use]
    pub fn runtime_handle(&self) -> Handle {
        self.handle.clone()
    }

    pub(crate) fn request_stop(&self) {
        self.cancel.cancel();
    }
}
