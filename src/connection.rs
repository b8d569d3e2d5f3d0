//! The coordinator: owns the transport, runs the reader/forwarder/keepalive
//! tasks, and exposes the `recv`/`send`/`close`/`ping`/`pong` handle
//! applications hold.
//!
//! Grounded on soketto's `Connection` (single mutexed writer, `Mode`-aware
//! masking) for the handle shape, and on `sync.client.ClientProtocol` /
//! `legacy.server` for the keepalive-ping and closing-handshake sequencing
//! (ported from blocking threads to cooperative tokio tasks).

use crate::assembler::{Assembler, Message};
use crate::close;
use crate::config::{Side, WebSocketConfig};
use crate::error::{Result, WsError};
use crate::extension::Extension;
use crate::frame::{Frame, OpCode};
use crate::state::{ConnectionState, StateCell};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct KeepaliveCounters {
    sent: AtomicU64,
    acked: AtomicU64,
}

impl KeepaliveCounters {
    fn new() -> Self {
        Self {
            sent: AtomicU64::new(0),
            acked: AtomicU64::new(0),
        }
    }
}

/// Everything the reader, forwarder, keepalive, and public-facing halves
/// all need shared access to. Kept separate from `Connection` so tasks can
/// hold an `Arc<Core<S>>` without holding the `Assembler` or the receive
/// channel too.
struct Core<S> {
    write_half: Mutex<WriteHalf<S>>,
    extensions: Mutex<Vec<Box<dyn Extension>>>,
    state: StateCell,
    side: Side,
    max_size: Option<u64>,
    /// Recorded once, by whichever path (graceful close or failure) first
    /// drives the connection to `Closed`; consulted by `recv`/`send` to
    /// report `ConnectionClosedOk`/`ConnectionClosedError` afterward.
    close_outcome: Mutex<Option<(Option<u16>, String)>>,
}

impl<S> Core<S> {
    async fn record_close_outcome(&self, code: Option<u16>, reason: String) {
        let mut outcome = self.close_outcome.lock().await;
        if outcome.is_none() {
            *outcome = Some((code, reason));
        }
    }

    async fn closed_error(&self) -> WsError {
        let outcome = self.close_outcome.lock().await;
        match &*outcome {
            Some((Some(code), reason)) if matches!(code, 1000 | 1001) => {
                WsError::ConnectionClosedOk {
                    code: *code,
                    reason: reason.clone(),
                }
            }
            Some((code, reason)) => WsError::ConnectionClosedError {
                code: *code,
                reason: reason.clone(),
            },
            None => WsError::Eof,
        }
    }
}

impl<S> Core<S>
where
    S: AsyncWrite + Unpin,
{
    async fn write_frame(&self, frame: Frame) -> Result<()> {
        let mut writer = self.write_half.lock().await;
        let mut extensions = self.extensions.lock().await;
        frame
            .write(&mut *writer, self.side.is_client(), &mut extensions)
            .await
    }

    async fn shutdown(&self) {
        let mut writer = self.write_half.lock().await;
        let _ = writer.shutdown().await;
    }
}

/// A handshake-complete WebSocket connection. One reader task keeps the
/// socket drained into the [`Assembler`]; one forwarder task turns
/// assembled messages into a bounded channel `recv` pulls from; an
/// optional keepalive task pings on `ping_interval` and fails the
/// connection if `ping_timeout` elapses unanswered.
pub struct Connection<S> {
    core: Arc<Core<S>>,
    assembler: Arc<Assembler>,
    recv_rx: Mutex<mpsc::Receiver<std::result::Result<Message, WsError>>>,
    reader_task: JoinHandle<()>,
    forwarder_task: JoinHandle<()>,
    keepalive_task: Option<JoinHandle<()>>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Take ownership of an already-upgraded transport and start serving
    /// it. `extensions` must already reflect the outcome of negotiation,
    /// in negotiated (encode) order.
    ///
    /// Public so a caller that has already performed (or faked, in tests)
    /// the opening handshake by some other means can still get a
    /// `Connection`; [`crate::server::accept`] and [`crate::client::connect`]
    /// are the usual entry points and call this after negotiating.
    pub fn spawn(
        stream: S,
        side: Side,
        config: &WebSocketConfig,
        extensions: Vec<Box<dyn Extension>>,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);

        let core = Arc::new(Core {
            write_half: Mutex::new(write_half),
            extensions: Mutex::new(extensions),
            state: StateCell::new(),
            side,
            max_size: config.max_size,
            close_outcome: Mutex::new(None),
        });
        core.state.advance_to(ConnectionState::Open);

        let assembler = Arc::new(Assembler::new());
        let keepalive = Arc::new(KeepaliveCounters::new());
        let (tx, rx) = mpsc::channel(config.max_queue.unwrap_or(32).max(1));

        let reader_task = tokio::spawn(read_loop(
            core.clone(),
            assembler.clone(),
            keepalive.clone(),
            read_half,
        ));
        let forwarder_task = tokio::spawn(forward_loop(assembler.clone(), tx));
        let keepalive_task = config.ping_interval.map(|interval| {
            tokio::spawn(keepalive_loop(
                core.clone(),
                assembler.clone(),
                keepalive,
                interval,
                config.ping_timeout,
            ))
        });

        Connection {
            core,
            assembler,
            recv_rx: Mutex::new(rx),
            reader_task,
            forwarder_task,
            keepalive_task,
        }
    }

    /// Current position in the connection state lattice.
    pub fn state(&self) -> ConnectionState {
        self.core.state.get()
    }

    /// Send a complete application message. Fails once the connection has
    /// left `Open` (e.g. a close handshake is already underway).
    pub async fn send(&self, message: Message) -> Result<()> {
        if self.core.state.is_closed() {
            return Err(self.core.closed_error().await);
        }
        if !self.core.state.allows_data_frame() {
            return Err(WsError::InvalidState(
                "cannot send a data frame outside the Open state".into(),
            ));
        }
        let frame = match message {
            Message::Text(s) => Frame::text(s),
            Message::Binary(b) => Frame::binary(b),
        };
        self.core.write_frame(frame).await
    }

    /// Receive the next complete message, in FIFO order. Returns
    /// `Err(ConnectionClosedOk | ConnectionClosedError)` once the peer's
    /// closing handshake has completed; returns `Err` for any other
    /// terminal protocol failure.
    pub async fn recv(&self) -> Result<Message> {
        let mut rx = self.recv_rx.lock().await;
        match rx.recv().await {
            Some(Ok(message)) => Ok(message),
            Some(Err(WsError::Eof)) | None => Err(self.core.closed_error().await),
            Some(Err(err)) => Err(err),
        }
    }

    /// Send an unsolicited ping with `data` as the application payload
    /// (distinct from the keepalive task's own nonces).
    pub async fn ping(&self, data: Vec<u8>) -> Result<()> {
        if !self.core.state.allows_control_frame() {
            return Err(WsError::InvalidState(
                "cannot send a control frame outside Open/Closing".into(),
            ));
        }
        self.core.write_frame(Frame::ping(data)).await
    }

    /// Send an unsolicited pong (a unidirectional heartbeat, RFC 6455
    /// §5.5.3) with `data` as the application payload.
    pub async fn pong(&self, data: Vec<u8>) -> Result<()> {
        if !self.core.state.allows_control_frame() {
            return Err(WsError::InvalidState(
                "cannot send a control frame outside Open/Closing".into(),
            ));
        }
        self.core.write_frame(Frame::pong(data)).await
    }

    /// Initiate (or complete) the closing handshake with `code`/`reason`.
    /// Idempotent: a connection that is already `Closing` or `Closed` just
    /// waits for the reader task to finish tearing down.
    pub async fn close(&self, code: u16, reason: &str) -> Result<()> {
        let was_open = self.core.state.get() == ConnectionState::Open;
        self.core.state.advance_to(ConnectionState::Closing);
        self.core
            .record_close_outcome(Some(code), reason.to_string())
            .await;
        if was_open {
            let frame = Frame::close(code, reason)?;
            self.core.write_frame(frame).await?;
        }
        Ok(())
    }
}

impl<S> Drop for Connection<S> {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.forwarder_task.abort();
        if let Some(task) = &self.keepalive_task {
            task.abort();
        }
    }
}

/// Whether `opcode` may legally appear given the connection's current
/// state (RFC 6455 forbids new data frames once closing has begun, but
/// still permits control frames until the socket is fully torn down).
fn legal_for_state(state: &StateCell, opcode: OpCode) -> bool {
    if opcode.is_control() {
        state.allows_control_frame()
    } else {
        state.allows_data_frame()
    }
}

/// Best-effort fail-the-connection sequence: send a close frame carrying
/// `code` if one was given and the wire permits it, shut down the
/// transport, and unblock the assembler so `recv` observes the failure.
async fn fail<S>(core: &Core<S>, assembler: &Assembler, code: Option<u16>)
where
    S: AsyncWrite + Unpin,
{
    core.record_close_outcome(code, String::new()).await;
    if core.state.get() != ConnectionState::Closed {
        core.state.advance_to(ConnectionState::Closing);
        if let Some(code) = code {
            if let Ok(frame) = Frame::close(code, "") {
                let _ = core.write_frame(frame).await;
            }
        }
        core.shutdown().await;
        core.state.advance_to(ConnectionState::Closed);
    }
    assembler.close().await;
}

async fn read_loop<S>(
    core: Arc<Core<S>>,
    assembler: Arc<Assembler>,
    keepalive: Arc<KeepaliveCounters>,
    mut read_half: ReadHalf<S>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let expect_mask = core.side.is_server();

    loop {
        let read_result = {
            let mut extensions = core.extensions.lock().await;
            Frame::read(&mut read_half, expect_mask, core.max_size, &mut extensions).await
        };

        let frame = match read_result {
            Ok(frame) => frame,
            Err(err) => {
                debug!(error = %err, "failing connection after frame read error");
                fail(&core, &assembler, err.close_code()).await;
                return;
            }
        };

        if !legal_for_state(&core.state, frame.opcode) {
            fail(&core, &assembler, Some(1002)).await;
            return;
        }

        match frame.opcode {
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                if assembler.put(frame).await.is_err() {
                    return;
                }
            }
            OpCode::Ping => {
                if core.write_frame(Frame::pong(frame.data)).await.is_err() {
                    return;
                }
            }
            OpCode::Pong => {
                if frame.data.len() == 8 {
                    let nonce = u64::from_be_bytes(frame.data.try_into().unwrap());
                    keepalive.acked.fetch_max(nonce, Ordering::SeqCst);
                }
                // Unmatched or application-originated pongs are ignored.
            }
            OpCode::Close => {
                let (code, reason) = close::parse(&frame.data).unwrap_or((1005, String::new()));
                let we_initiated = core.state.get() == ConnectionState::Closing;
                core.state.advance_to(ConnectionState::Closing);

                if !we_initiated {
                    let echo_code = if code == 1005 { 1000 } else { code };
                    if let Ok(echo) = Frame::close(echo_code, "") {
                        let _ = core.write_frame(echo).await;
                    }
                }
                core.shutdown().await;
                core.state.advance_to(ConnectionState::Closed);

                if !matches!(code, 1000 | 1001) {
                    warn!(code, "peer closed with a non-normal status");
                }
                core.record_close_outcome(Some(code), reason).await;
                assembler.close().await;
                return;
            }
        }
    }
}

async fn forward_loop(
    assembler: Arc<Assembler>,
    tx: mpsc::Sender<std::result::Result<Message, WsError>>,
) {
    loop {
        match assembler.get(None).await {
            Ok(Some(message)) => {
                if tx.send(Ok(message)).await.is_err() {
                    return;
                }
            }
            Ok(None) => continue,
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
        }
    }
}

async fn keepalive_loop<S>(
    core: Arc<Core<S>>,
    assembler: Arc<Assembler>,
    keepalive: Arc<KeepaliveCounters>,
    interval: std::time::Duration,
    timeout: Option<std::time::Duration>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        tokio::time::sleep(interval).await;
        if core.state.is_closed() {
            return;
        }

        let nonce = keepalive.sent.fetch_add(1, Ordering::SeqCst) + 1;
        if core
            .write_frame(Frame::ping(nonce.to_be_bytes().to_vec()))
            .await
            .is_err()
        {
            return;
        }

        if let Some(timeout) = timeout {
            tokio::time::sleep(timeout).await;
            if core.state.is_closed() {
                return;
            }
            if keepalive.acked.load(Ordering::SeqCst) < nonce {
                warn!("keepalive pong not received in time, failing connection");
                fail(&core, &assembler, Some(1011)).await;
                return;
            }
        }
    }
}
