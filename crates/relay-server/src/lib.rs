// SPDX-License-Identifier: Apache-2.0

//! The server aggregate (spec §9, "Global singletons... replace with an
//! explicit `Server` aggregate that owns one `ProactorPool`, one
//! `WorkerPool`, one `SystemMonitor`").
//!
//! `Server` owns every subsystem by `Arc` and wires them together on
//! [`Server::start`]: one [`relay_monitor::SystemMonitor`], one
//! [`relay_proactor::ProactorPool`], one [`relay_worker::WorkerPool`], one
//! immutable [`relay_dispatcher::Dispatcher`], one
//! [`relay_session::SessionTable`], and one [`relay_acceptor::Acceptor`].
//! [`Server::shutdown`] runs the ordered teardown from spec §5
//! ("Cancellation & timeouts": stop acceptor, set shutdown flag on the
//! worker pool and every session, wait for the message queue to drain,
//! stop executors, join all OS threads).
//!
//! Grounded on the teacher's `otap-df-controller` crate
//! (`crates/controller/src/lib.rs`), which plays the same role: an explicit
//! aggregate owning pipeline subsystems by `Arc`, replacing process-global
//! singletons, with `start`/`shutdown` lifecycle methods.

pub mod error;

pub use error::StartupError;

use bytes::Bytes;
use parking_lot::Mutex;
use relay_acceptor::{Acceptor, AcceptorHandle};
use relay_config::Config;
use relay_dispatcher::DispatcherBuilder;
use relay_logging::{log_info, log_warn};
use relay_monitor::{MonitorHandle, SystemMonitor};
use relay_proactor::{AutoscalerHandle as ProactorAutoscalerHandle, ProactorPool};
use relay_session::{MessageSink, SessionHandle, SessionTable};
use relay_worker::{AutoscalerHandle as WorkerAutoscalerHandle, WorkerPool};
use std::sync::Arc;
use std::time::Duration;

const TARGET: &str = "relay_server";

struct Running {
    local_addr: std::net::SocketAddr,
    monitor_handle: MonitorHandle,
    proactor: Arc<ProactorPool>,
    proactor_autoscaler: ProactorAutoscalerHandle,
    worker_pool: Arc<WorkerPool>,
    worker_autoscaler: WorkerAutoscalerHandle,
    table: Arc<SessionTable>,
    acceptor_handle: AcceptorHandle,
}

/// Owns the whole of one running server. Cheap to construct; subsystems are
/// only spawned by [`Server::start`].
pub struct Server {
    config: Config,
    builder: Mutex<Option<DispatcherBuilder>>,
    running: Mutex<Option<Running>>,
}

impl Server {
    /// Creates a server from a validated configuration. No subsystem is
    /// started yet.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            builder: Mutex::new(Some(DispatcherBuilder::new())),
            running: Mutex::new(None),
        }
    }

    /// Registers a handler for `id`. Must be called before [`Server::start`]
    /// (spec §4.6: "Registration happens at startup, before `start()`; the
    /// table is immutable thereafter"). A registration attempted after
    /// `start()` is logged at warning and ignored.
    pub fn register_handler(
        &self,
        id: u16,
        handler: impl Fn(SessionHandle, u16, Bytes) + Send + Sync + 'static,
    ) {
        match self.builder.lock().as_mut() {
            Some(builder) => builder.register(id, handler),
            None => {
                log_warn!(
                    TARGET,
                    "ignoring registration for message id {id}: dispatcher is already built"
                );
            }
        }
    }

    /// Binds the listener and launches every subsystem: the system monitor,
    /// the proactor pool, the worker pool (and both autoscalers), and the
    /// acceptor. Returns once the listener is bound and the accept loop is
    /// running; never blocks waiting for connections.
    pub async fn start(&self) -> Result<(), StartupError> {
        if self.running.lock().is_some() {
            return Err(StartupError::AlreadyRunning);
        }

        let dispatcher = Arc::new(self.builder.lock().take().unwrap_or_default().build());

        let acceptor =
            Acceptor::bind(&self.config.self_server.host, self.config.self_server.port).await?;
        let local_addr = acceptor.local_addr();

        let monitor_interval = Duration::from_millis(self.config.monitor.update_interval_ms);
        let monitor = Arc::new(SystemMonitor::new());

        // Subsystems that can still fail (the proactor pool spawning its
        // minimum executors) are brought up before the monitor's background
        // sampler starts, so a failed `start()` never leaves a detached
        // sampling task behind.
        let (io_min, io_max) = self.config.io_pool_bounds();
        let proactor = ProactorPool::start(io_min, io_max, Arc::clone(&monitor))?;

        let (worker_min, worker_max) = self.config.worker_pool_bounds();
        let worker_pool = WorkerPool::start(
            worker_min,
            worker_max,
            Arc::clone(&dispatcher),
            Arc::clone(&monitor),
        );

        let monitor_handle = monitor
            .start(monitor_interval)
            .expect("freshly constructed monitor is never already running");
        let proactor_autoscaler = proactor.start_autoscaler(monitor_interval);
        let worker_autoscaler = worker_pool.start_autoscaler(monitor_interval);

        let table = Arc::new(SessionTable::new(self.config.session_table.shards));
        let max_body = u64::from(self.config.limits.max_body_bytes());

        let sink: Arc<dyn MessageSink> = Arc::clone(&worker_pool);
        let acceptor_handle = acceptor.run(
            Arc::clone(&proactor),
            Arc::clone(&table),
            sink,
            Arc::clone(&monitor),
            max_body,
        );

        log_info!(
            TARGET,
            "server started: io_pool=[{io_min},{io_max}] worker_pool=[{worker_min},{worker_max}]"
        );

        *self.running.lock() = Some(Running {
            local_addr,
            monitor_handle,
            proactor,
            proactor_autoscaler,
            worker_pool,
            worker_autoscaler,
            table,
            acceptor_handle,
        });
        Ok(())
    }

    /// Runs the ordered teardown from spec §5: stop the acceptor, stop both
    /// autoscalers, close every live session, drain and join the worker
    /// pool, stop and join every proactor executor, then stop the system
    /// monitor. A no-op if the server was never started.
    pub async fn shutdown(&self) {
        let Some(mut running) = self.running.lock().take() else {
            return;
        };

        running.acceptor_handle.stop().await;
        running.proactor_autoscaler.stop().await;
        running.worker_autoscaler.stop().await;

        running.table.close_all();
        running.worker_pool.shutdown();
        running.proactor.shutdown();
        running.monitor_handle.stop().await;

        log_info!(TARGET, "server shut down");
    }

    /// Live session count, for health checks and tests (spec §8, P-series
    /// tests). `0` if the server has not started or has shut down.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.running
            .lock()
            .as_ref()
            .map_or(0, |running| running.table.connections())
    }

    /// The address actually bound, useful when the configured port was `0`.
    /// `None` before [`Server::start`] succeeds or after [`Server::shutdown`].
    #[must_use]
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.running.lock().as_ref().map(|running| running.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_wire::DEFAULT_MAX_BODY;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::net::TcpStream;

    fn test_config(port: u16) -> Config {
        let yaml = format!(
            "self_server:\n  host: 127.0.0.1\n  port: {port}\npool:\n  io:\n    min: 1\n    max: 1\n  worker:\n    min: 1\n    max: 1\nsession_table:\n  shards: 4\nmonitor:\n  update_interval_ms: 50\n"
        );
        Config::from_yaml_str(&yaml, "<test>").unwrap()
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let server = Server::new(test_config(0));
        server.start().await.unwrap();
        assert!(matches!(server.start().await, Err(StartupError::AlreadyRunning)));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn connections_is_zero_before_start_and_after_shutdown() {
        let server = Server::new(test_config(0));
        assert_eq!(server.connections(), 0);
        server.start().await.unwrap();
        server.shutdown().await;
        assert_eq!(server.connections(), 0);
    }

    #[tokio::test]
    async fn registered_handler_echoes_over_a_real_connection() {
        let server = Server::new(test_config(0));
        let echoed = Arc::new(AtomicU32::new(0));
        let echoed_clone = Arc::clone(&echoed);
        server.register_handler(1001, move |session, _id, _payload| {
            echoed_clone.fetch_add(1, Ordering::SeqCst);
            let _ = session.send(1001, Bytes::from_static(b"pong"));
        });
        server.start().await.unwrap();
        let addr = server.local_addr().expect("just started");

        let mut client = TcpStream::connect(addr).await.unwrap();
        relay_wire::write_frame(&mut client, 1001, b"ping").await.unwrap();
        let reply = relay_wire::read_frame(&mut client, DEFAULT_MAX_BODY).await.unwrap();
        assert_eq!(reply.id, 1001);
        assert_eq!(reply.payload, b"pong");
        assert_eq!(echoed.load(Ordering::SeqCst), 1);

        server.shutdown().await;
    }
}
