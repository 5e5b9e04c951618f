// SPDX-License-Identifier: Apache-2.0

//! The per-connection state machine (spec §4.4, "Session").

use crate::error::SendError;
use crate::id::SessionId;
use crate::message::{Deregister, DecodedMessage, MessageSink, OutboundMessage};
use bytes::Bytes;
use relay_channel::outbound;
use relay_logging::{log_error, log_info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Notify;

const TARGET: &str = "relay_session";

/// Default capacity of a session's bounded outbound write queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// A strong reference to a live session; the type moved through
/// [`DecodedMessage`] and handed to handlers via the dispatcher.
pub type SessionHandle = Arc<Session>;

/// One accepted client connection: identity, the bounded outbound queue,
/// and the one-way `closed` flag (spec §4.4, "State machine: `Running ->
/// Closed`, one-way").
pub struct Session {
    id: SessionId,
    deregister: Weak<dyn Deregister>,
    outbound_tx: parking_lot::Mutex<Option<outbound::Sender<OutboundMessage>>>,
    closed: AtomicBool,
    shutdown: Notify,
    max_body: u64,
}

impl Session {
    /// Creates a new session and its outbound channel. The returned
    /// [`outbound::Receiver`] is moved into the writer task by
    /// [`Session::start`].
    #[must_use]
    pub fn new(
        deregister: Weak<dyn Deregister>,
        max_body: u64,
    ) -> (SessionHandle, outbound::Receiver<OutboundMessage>) {
        Self::with_capacity(deregister, max_body, DEFAULT_OUTBOUND_CAPACITY)
    }

    /// Like [`Session::new`] with an explicit outbound queue capacity.
    #[must_use]
    pub fn with_capacity(
        deregister: Weak<dyn Deregister>,
        max_body: u64,
        outbound_capacity: usize,
    ) -> (SessionHandle, outbound::Receiver<OutboundMessage>) {
        let (tx, rx) = outbound::channel(outbound_capacity);
        let session = Arc::new(Session {
            id: SessionId::generate(),
            deregister,
            outbound_tx: parking_lot::Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
            max_body,
        });
        (session, rx)
    }

    /// This session's identity.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// True once [`Session::close`] has taken effect.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Builds and enqueues an outbound frame. Never blocks; a full queue
    /// surfaces [`SendError::Backpressure`]. A no-op, per spec §8 P2, once
    /// the session has closed.
    pub fn send(&self, id: u16, payload: Bytes) -> Result<(), SendError> {
        let framed = relay_wire::encode_frame(id, &payload);
        self.send_raw(id, payload.len() as i64, Bytes::from(framed))
    }

    /// Enqueues an already-framed outbound buffer directly, for callers
    /// that built the wire bytes themselves.
    pub fn send_raw(&self, id: u16, length: i64, framed_buffer: Bytes) -> Result<(), SendError> {
        let guard = self.outbound_tx.lock();
        let Some(tx) = guard.as_ref() else {
            // Session already closed: a silent no-op (spec §8 P2).
            return Ok(());
        };
        match tx.try_send(OutboundMessage {
            id,
            length,
            framed_buffer,
        }) {
            Ok(()) => Ok(()),
            Err(relay_channel::error::SendError::Full(_)) => Err(SendError::Backpressure),
            Err(relay_channel::error::SendError::Closed(_)) => Ok(()),
        }
    }

    /// Compare-and-swaps the closed flag; effectful exactly once (spec
    /// §4.4, "Teardown ordering invariant"). Safe to call from the reader
    /// task, the writer task, an external shutdown sequence, or a handler.
    pub fn close(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        // Drop the sender so the writer's `recv()` observes channel-closed
        // and exits once it has drained what's already queued.
        self.outbound_tx.lock().take();
        // Wake a reader parked in `read_frame` so it notices closure
        // promptly instead of waiting for the peer.
        self.shutdown.notify_waiters();
        if let Some(server) = self.deregister.upgrade() {
            server.deregister(self.id);
        }
        log_info!(TARGET, "session {} closed", self.id);
    }

    /// Splits `socket`, then spawns the reader and writer tasks on the
    /// current Tokio runtime - the executor the caller already acquired
    /// from the proactor pool and is running on (spec §4.4, "launches
    /// reader task and writer task on this session's executor").
    ///
    /// Returns a [`SessionTasks`] the caller can await to find out when both
    /// tasks have actually exited - not just when `close()` was first called,
    /// since the writer keeps draining queued messages for a while after
    /// that. A caller that's pinning the executor alive for this connection
    /// (spec §4.2's "liveness pin") should hold its `ExecutorHandle` until
    /// this resolves, not just until `start` returns.
    pub fn start(
        self: &SessionHandle,
        socket: TcpStream,
        outbound_rx: outbound::Receiver<OutboundMessage>,
        sink: Arc<dyn MessageSink>,
    ) -> SessionTasks {
        let _ = socket.set_nodelay(true);
        let (read_half, write_half) = socket.into_split();
        let reader_session = Arc::clone(self);
        let writer_session = Arc::clone(self);
        SessionTasks {
            reader: tokio::spawn(run_reader(reader_session, read_half, sink)),
            writer: tokio::spawn(run_writer(writer_session, write_half, outbound_rx)),
        }
    }
}

/// Handles to a session's reader and writer tasks, returned by
/// [`Session::start`].
pub struct SessionTasks {
    reader: tokio::task::JoinHandle<()>,
    writer: tokio::task::JoinHandle<()>,
}

impl SessionTasks {
    /// Waits for both the reader and writer tasks to exit. A panic in
    /// either is logged rather than propagated - the session is already
    /// torn down by the time either task returns.
    pub async fn join(self) {
        if let Err(err) = self.reader.await {
            log_error!(TARGET, "session reader task panicked: {err:?}");
        }
        if let Err(err) = self.writer.await {
            log_error!(TARGET, "session writer task panicked: {err:?}");
        }
    }
}

async fn run_reader(
    session: SessionHandle,
    mut read_half: tokio::net::tcp::OwnedReadHalf,
    sink: Arc<dyn MessageSink>,
) {
    loop {
        let outcome = tokio::select! {
            biased;
            () = session.shutdown.notified() => None,
            result = relay_wire::read_frame(&mut read_half, session.max_body) => Some(result),
        };
        let Some(result) = outcome else {
            break;
        };
        match result {
            Ok(frame) => {
                sink.post(DecodedMessage {
                    id: frame.id,
                    length: frame.length as i64,
                    payload: Bytes::from(frame.payload),
                    session: Arc::clone(&session),
                });
            }
            Err(err) => {
                if err.is_clean_disconnect() {
                    log_info!(TARGET, "session {} disconnected: {err}", session.id);
                } else {
                    log_error!(TARGET, "session {} read error: {err}", session.id);
                }
                break;
            }
        }
    }
    session.close();
}

async fn run_writer(
    session: SessionHandle,
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    mut rx: outbound::Receiver<OutboundMessage>,
) {
    loop {
        match rx.recv().await {
            Ok(message) => {
                if let Err(err) = write_half.write_all(&message.framed_buffer).await {
                    log_error!(TARGET, "session {} write error: {err}", session.id);
                    session.close();
                    return;
                }
            }
            Err(_closed) => break,
        }
    }
    // Best-effort drain of whatever queued after the close signal.
    while let Ok(message) = rx.try_recv() {
        let _ = write_half.write_all(&message.framed_buffer).await;
    }
    session.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Deregister, DecodedMessage, MessageSink};
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    struct NullDeregister;
    impl Deregister for NullDeregister {
        fn deregister(&self, _id: SessionId) {}
    }

    struct CapturingSink {
        messages: Mutex<Vec<DecodedMessage>>,
    }

    impl MessageSink for CapturingSink {
        fn post(&self, message: DecodedMessage) {
            self.messages.lock().unwrap().push(message);
        }
    }

    fn dangling_deregister() -> Weak<dyn Deregister> {
        let strong: Arc<dyn Deregister> = Arc::new(NullDeregister);
        Arc::downgrade(&strong)
    }

    #[tokio::test]
    async fn send_after_close_is_a_silent_no_op() {
        let (session, _rx) = Session::new(dangling_deregister(), 1024);
        session.close();
        assert!(session.send(1, Bytes::from_static(b"x")).is_ok());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (session, _rx) = Session::new(dangling_deregister(), 1024);
        session.close();
        session.close();
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn full_outbound_queue_surfaces_backpressure() {
        let (session, _rx) = Session::with_capacity(dangling_deregister(), 1024, 1);
        session.send(1, Bytes::from_static(b"a")).unwrap();
        let result = session.send(1, Bytes::from_static(b"b"));
        assert!(matches!(result, Err(SendError::Backpressure)));
    }

    #[tokio::test]
    async fn echo_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let sink = Arc::new(CapturingSink {
            messages: Mutex::new(Vec::new()),
        });

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            relay_wire::write_frame(&mut stream, 1001, b"ping")
                .await
                .unwrap();
            relay_wire::read_frame(&mut stream, relay_wire::DEFAULT_MAX_BODY)
                .await
                .unwrap()
        });

        let (socket, _) = listener.accept().await.unwrap();
        let (session, rx) = Session::new(dangling_deregister(), relay_wire::DEFAULT_MAX_BODY);
        let _tasks = session.start(socket, rx, sink.clone());

        // Wait for the reader to post the decoded frame, then echo it back.
        let mut attempts = 0;
        loop {
            if !sink.messages.lock().unwrap().is_empty() {
                break;
            }
            attempts += 1;
            assert!(attempts < 100, "timed out waiting for decoded message");
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let decoded = sink.messages.lock().unwrap().remove(0);
        assert_eq!(decoded.id, 1001);
        assert_eq!(&decoded.payload[..], b"ping");
        decoded.session.send(1001, Bytes::from_static(b"pong")).unwrap();

        let reply = client.await.unwrap();
        assert_eq!(reply.id, 1001);
        assert_eq!(reply.payload, b"pong");
    }
}
