// SPDX-License-Identifier: Apache-2.0

//! Errors for the proactor pool crate.

/// Errors from starting, acquiring from, or shutting down a [`crate::ProactorPool`].
#[derive(thiserror::Error, Debug)]
pub enum PoolError {
    /// Failed to spawn the OS thread backing a new executor.
    #[error("failed to spawn executor thread '{thread_name}': {source}")]
    ThreadSpawnError {
        /// Name of the thread we attempted to spawn.
        thread_name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to build the single-threaded Tokio runtime on the new thread.
    #[error("failed to build executor runtime: {0}")]
    RuntimeBuildError(#[source] std::io::Error),

    /// The executor's startup handshake channel disconnected before the
    /// runtime handle was sent back, implying the thread panicked early.
    #[error("executor thread exited before completing startup")]
    StartupHandshakeLost,

    /// `acquire()` was called on a pool with zero live executors.
    #[error("no live executors in the pool")]
    Empty,
}
