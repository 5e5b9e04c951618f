// SPDX-License-Identifier: Apache-2.0

//! Errors surfaced by session operations.

/// Errors [`crate::Session::send`] can return. Per spec §8 P2, a closed
/// session's `send` is a silent no-op, not an error - so `Closed` isn't a
/// variant here.
#[derive(thiserror::Error, Debug)]
pub enum SendError {
    /// The bounded outbound queue is at capacity.
    #[error("session outbound queue is full")]
    Backpressure,
}
