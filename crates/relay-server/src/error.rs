// SPDX-License-Identifier: Apache-2.0

//! Startup errors (spec §7, "Startup" — "bind failure, invalid configuration;
//! policy: log at fatal, exit non-zero").

/// Failures that can occur while bringing a [`crate::Server`] up. None of
/// these are retried by the server itself; the caller logs and exits.
#[derive(thiserror::Error, Debug)]
pub enum StartupError {
    /// The listener failed to bind.
    #[error(transparent)]
    Bind(#[from] relay_acceptor::AcceptorError),
    /// The proactor pool failed to spawn its minimum executors.
    #[error(transparent)]
    Proactor(#[from] relay_proactor::PoolError),
    /// `start()` was called on a server that is already running.
    #[error("server is already running")]
    AlreadyRunning,
}
