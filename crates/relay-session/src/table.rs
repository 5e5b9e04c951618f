// SPDX-License-Identifier: Apache-2.0

//! Sharded session table (spec §3, "Session table").
//!
//! `S` independently locked shards; only the shard an id hashes into is
//! locked for insert/remove/lookup, so concurrent sessions in different
//! shards never contend.

use crate::id::SessionId;
use crate::message::Deregister;
use crate::session::SessionHandle;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default shard count (spec §6, `session_table.shards`).
pub const DEFAULT_SHARDS: usize = 1024;

struct Shard {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

/// A sharded `session-id -> Session` map plus a live-connection counter.
pub struct SessionTable {
    shards: Vec<Shard>,
    connections: AtomicUsize,
}

impl SessionTable {
    /// Creates a table with `shard_count` shards (at least 1).
    #[must_use]
    pub fn new(shard_count: usize) -> Self {
        let shard_count = shard_count.max(1);
        let shards = (0..shard_count)
            .map(|_| Shard {
                sessions: RwLock::new(HashMap::new()),
            })
            .collect();
        Self {
            shards,
            connections: AtomicUsize::new(0),
        }
    }

    /// Inserts `session`, incrementing the live-connection counter (spec
    /// §4.7, "`connections` counter increments on insert").
    pub fn insert(&self, session: SessionHandle) {
        let shard = &self.shards[session.id().shard_index(self.shards.len())];
        shard.sessions.write().insert(session.id(), session);
        self.connections.fetch_add(1, Ordering::AcqRel);
    }

    /// Removes the session identified by `id`, if present, decrementing
    /// the counter exactly once per successful removal.
    pub fn remove(&self, id: SessionId) {
        let shard = &self.shards[id.shard_index(self.shards.len())];
        if shard.sessions.write().remove(&id).is_some() {
            self.connections.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Looks up a session by id.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<SessionHandle> {
        let shard = &self.shards[id.shard_index(self.shards.len())];
        shard.sessions.read().get(&id).cloned()
    }

    /// Current live-connection count.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::Acquire)
    }

    /// Number of shards backing this table.
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Closes every currently live session (spec §5, "set shutdown flag on
    /// ... each Session"). Each session's own `close()` deregisters itself
    /// through the `Deregister` backref, so shards are snapshotted into a
    /// `Vec` first rather than closed while holding the shard's write lock.
    pub fn close_all(&self) {
        for shard in &self.shards {
            let sessions: Vec<SessionHandle> = shard.sessions.read().values().cloned().collect();
            for session in sessions {
                session.close();
            }
        }
    }
}

impl Deregister for SessionTable {
    fn deregister(&self, id: SessionId) {
        self.remove(id);
    }
}
