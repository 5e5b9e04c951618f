// SPDX-License-Identifier: Apache-2.0

//! The per-connection session state machine (spec §3-§4.4): framing a
//! socket's reads through [`relay_wire`], serializing writes through a
//! bounded queue, and guaranteeing exactly-once teardown.
//!
//! - [`Session`] - one accepted client connection.
//! - [`SessionTable`] - the sharded `session-id -> Session` map (C7's
//!   acceptor owns one).
//! - [`DecodedMessage`] / [`OutboundMessage`] - the records that cross the
//!   session <-> worker-pool boundary.

pub mod error;
mod id;
mod message;
mod session;
mod table;

pub use error::SendError;
pub use id::SessionId;
pub use message::{Deregister, DecodedMessage, MessageSink, OutboundMessage};
pub use session::{Session, SessionHandle, SessionTasks, DEFAULT_OUTBOUND_CAPACITY};
pub use table::{SessionTable, DEFAULT_SHARDS};
