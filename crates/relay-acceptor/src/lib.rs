// SPDX-License-Identifier: Apache-2.0

//! TCP listener and connection-accept loop (spec §4.7, "Acceptor").
//!
//! Binds one IPv4 `any:port` endpoint, then loops: accept a connection,
//! pick an executor from the [`relay_proactor::ProactorPool`] via
//! `acquire()`, construct a [`relay_session::Session`] pinned to that
//! executor, insert it into the sharded [`relay_session::SessionTable`],
//! and start it. A non-transient accept error is logged and retried after
//! a short backoff rather than killing the loop (spec §4.7).
//!
//! Grounded on the teacher's dedicated-thread task shape
//! (`crates/controller/src/thread_task.rs`) for the handle/cancel pattern,
//! and on `original_source/CServer.cpp::startAccept` for the accept-loop
//! shape itself (accept, pick an io_context, construct+register+start a
//! session, loop) - the Rust port replaces the source's raw
//! `io_context&` selection and unguarded `sessionMap` insert with
//! `ProactorPool::acquire()` and `SessionTable::insert()`.

pub mod error;

pub use error::AcceptorError;

use relay_logging::{log_error, log_info};
use relay_monitor::SystemMonitor;
use relay_proactor::ProactorPool;
use relay_session::{Deregister, MessageSink, Session, SessionTable};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const TARGET: &str = "relay_acceptor";

/// Backoff after a non-transient accept error before retrying (spec §4.7,
/// "retry after a short backoff").
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// How often the accept loop resyncs the system monitor's connection count
/// with the session table, since removals happen asynchronously on a
/// session's own reader/writer tasks rather than inside this loop.
const MONITOR_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Owns the bound listening socket. Does not itself own the proactor pool,
/// session table, worker pool, or monitor - those are passed to
/// [`Acceptor::run`] so this crate has no dependency on `relay-worker`.
pub struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
}

/// Handle to the background accept loop, stopped by dropping or calling
/// [`AcceptorHandle::stop`].
pub struct AcceptorHandle {
    cancel: CancellationToken,
    join: Option<tokio::task::JoinHandle<()>>,
}

impl AcceptorHandle {
    /// Signals the accept loop to stop and waits for it to exit. Idempotent.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Acceptor {
    /// Binds an IPv4 listening endpoint on `host:port`. `host` is
    /// informational per spec §6 (`self_server.host`); the socket always
    /// binds `0.0.0.0` equivalent behavior when `host` is `0.0.0.0`.
    pub async fn bind(host: &str, port: u16) -> Result<Self, AcceptorError> {
        let addr = format!("{host}:{port}");
        let listener =
            TcpListener::bind(&addr)
                .await
                .map_err(|source| AcceptorError::BindError {
                    addr: addr.clone(),
                    source,
                })?;
        let local_addr = listener.local_addr().map_err(|source| AcceptorError::BindError {
            addr,
            source,
        })?;
        log_info!(TARGET, "listening on {local_addr}");
        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// The address actually bound, useful when `port` was `0`.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the accept loop on a spawned task: accept, acquire an executor,
    /// build and start a session, insert it into `table`. Returns a handle
    /// that stops the loop without affecting already-accepted sessions.
    pub fn run(
        self,
        pool: Arc<ProactorPool>,
        table: Arc<SessionTable>,
        sink: Arc<dyn MessageSink>,
        monitor: Arc<SystemMonitor>,
        max_body: u64,
    ) -> AcceptorHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            accept_loop(self.listener, pool, table, sink, monitor, max_body, token).await;
        });
        AcceptorHandle {
            cancel,
            join: Some(join),
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    pool: Arc<ProactorPool>,
    table: Arc<SessionTable>,
    sink: Arc<dyn MessageSink>,
    monitor: Arc<SystemMonitor>,
    max_body: u64,
    cancel: CancellationToken,
) {
    let mut sync_interval = tokio::time::interval(MONITOR_SYNC_INTERVAL);
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = sync_interval.tick() => {
                monitor.set_active_connections(table.connections());
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        accept_one(stream, peer_addr, &pool, &table, &sink, &monitor, max_body);
                    }
                    Err(err) => {
                        log_error!(TARGET, "accept error: {err}");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
        }
    }
    log_info!(TARGET, "acceptor stopped");
}

fn accept_one(
    stream: tokio::net::TcpStream,
    peer_addr: SocketAddr,
    pool: &Arc<ProactorPool>,
    table: &Arc<SessionTable>,
    sink: &Arc<dyn MessageSink>,
    monitor: &Arc<SystemMonitor>,
    max_body: u64,
) {
    let executor = match pool.acquire() {
        Ok(executor) => executor,
        Err(err) => {
            log_error!(TARGET, "no executor available to accept {peer_addr}: {err}");
            return;
        }
    };
    let std_stream = match stream.into_std() {
        Ok(std_stream) => std_stream,
        Err(err) => {
            log_error!(TARGET, "failed to prepare socket from {peer_addr} for handoff: {err}");
            return;
        }
    };
    let table = Arc::clone(table);
    let sink = Arc::clone(sink);
    let monitor = Arc::clone(monitor);
    // Cloned into the spawned task below and held until the session's
    // reader and writer tasks have both exited. `executor` (the binding
    // above) only lives for this function's own synchronous scope, which
    // is why `ProactorPool::shrink`'s reaper must not treat a dropped
    // `acquire()` handle as "this connection is done" - the connection
    // outlives the call that set it up.
    let executor_for_task = Arc::clone(&executor);

    // Re-registering the socket from inside the target executor's task
    // binds it to that executor's own reactor, which is what pins a
    // session's reader/writer tasks to one executor (spec §5, "Socket
    // tasks ... are pinned to one executor").
    executor.spawn_task(async move {
        let stream = match tokio::net::TcpStream::from_std(std_stream) {
            Ok(stream) => stream,
            Err(err) => {
                log_error!(TARGET, "failed to register socket from {peer_addr} on executor: {err}");
                return;
            }
        };
        let as_deregister: Arc<dyn Deregister> = Arc::clone(&table);
        let (session, outbound_rx) = Session::new(Arc::downgrade(&as_deregister), max_body);
        log_info!(TARGET, "accepted {peer_addr} as session {}", session.id());
        table.insert(Arc::clone(&session));
        monitor.set_active_connections(table.connections());
        let tasks = session.start(stream, outbound_rx, sink);
        // Keep our `ExecutorHandle` alive until both reader and writer
        // have exited, so the pool's shrink reaper (which waits on this
        // handle's strong count) never stops the executor's runtime out
        // from under a session still running on it.
        tasks.join().await;
        drop(executor_for_task);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use relay_dispatcher::DispatcherBuilder;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn accepted_connection_is_registered_and_echoes() {
        let acceptor = Acceptor::bind("127.0.0.1", 0).await.unwrap();
        let addr = acceptor.local_addr();

        let monitor = Arc::new(SystemMonitor::new());
        let pool = ProactorPool::start(1, 1, Arc::clone(&monitor)).unwrap();
        let table = Arc::new(SessionTable::new(4));

        let echoed = Arc::new(AtomicU32::new(0));
        let echoed_clone = Arc::clone(&echoed);
        let mut builder = DispatcherBuilder::new();
        builder.register(1001, move |session, _id, _payload| {
            echoed_clone.fetch_add(1, Ordering::SeqCst);
            let _ = session.send(1001, Bytes::from_static(b"pong"));
        });
        let dispatcher = Arc::new(builder.build());
        let worker_pool = relay_worker::WorkerPool::start(1, 1, dispatcher, Arc::clone(&monitor));
        let sink: Arc<dyn MessageSink> = Arc::clone(&worker_pool);

        let mut handle = acceptor.run(
            Arc::clone(&pool),
            Arc::clone(&table),
            sink,
            Arc::clone(&monitor),
            relay_wire::DEFAULT_MAX_BODY,
        );

        let mut client = TcpStream::connect(addr).await.unwrap();
        relay_wire::write_frame(&mut client, 1001, b"ping").await.unwrap();
        let reply = relay_wire::read_frame(&mut client, relay_wire::DEFAULT_MAX_BODY)
            .await
            .unwrap();
        assert_eq!(reply.id, 1001);
        assert_eq!(reply.payload, b"pong");

        let mut attempts = 0;
        while table.connections() == 0 {
            attempts += 1;
            assert!(attempts < 100, "session was never inserted into the table");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(echoed.load(Ordering::SeqCst), 1);

        handle.stop().await;
        worker_pool.shutdown();
        pool.shutdown();
    }

    #[tokio::test]
    async fn binding_port_zero_reports_the_assigned_port() {
        let acceptor = Acceptor::bind("127.0.0.1", 0).await.unwrap();
        assert_ne!(acceptor.local_addr().port(), 0);
    }
}
