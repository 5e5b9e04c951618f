// SPDX-License-Identifier: Apache-2.0

//! Errors for the acceptor crate (spec §7, "Startup" and "Transport").

/// Errors from binding the listener. Startup failures per spec §7 are
/// fatal: the caller logs at fatal and exits non-zero.
#[derive(thiserror::Error, Debug)]
pub enum AcceptorError {
    /// Failed to bind the listening endpoint.
    #[error("failed to bind {addr}: {source}")]
    BindError {
        /// The address we attempted to bind.
        addr: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },
}
