//! The connection driver (§4.4, C8): owns the IO state machine, the read
//! pump, and the frame flusher, and wires their events into the close
//! handshake and disconnect sequence.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::close::{CloseInfo, StatusCode};
use crate::codec::{Generator, Parser};
use crate::endpoint::Endpoint;
use crate::error::{DriverError, Result};
use crate::executor::Executor;
use crate::extensions::{ExtensionChain, FrameCompletion};
use crate::flusher::{BatchMode, FrameFlusher};
use crate::frame::{OpCode, WsFrame};
use crate::id::ConnectionId;
use crate::pool::BufferPool;
use crate::policy::{Policy, MIN_BUFFER_SIZE};
use crate::read_pump::{ReadPump, ReadPumpReactor, SuspendHandle};
use crate::state::{ConnectionState, IoStateMachine};

/// What happens once a CLOSE frame this driver sent has been handed off (or
/// has failed to be) to the transport (§9 "Callback composition").
///
/// Deliberately a plain tagged enum rather than nested closures over `self`:
/// the driver interprets it, nothing captures a cycle back into the driver.
enum CloseContinuation {
    /// Shut down the transport, fully or output-side only.
    Disconnect { output_only: bool },
    /// Signal the state machine that our own close was sent, then (if
    /// present) run a further continuation.
    LocalClose {
        close_info: CloseInfo,
        next: Option<Box<CloseContinuation>>,
    },
}

/// Truncates `reason` to at most 123 bytes (RFC 6455's CLOSE reason limit),
/// respecting UTF-8 character boundaries.
fn truncate_reason(mut reason: String) -> String {
    if reason.len() <= 123 {
        return reason;
    }
    let mut end = 123;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason.truncate(end);
    reason
}

fn decode_close_frame<F: WsFrame>(frame: &F) -> CloseInfo {
    let payload = frame.payload();
    if payload.len() < 2 {
        return CloseInfo::new(StatusCode::NO_CODE, None);
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8(payload[2..].to_vec()).ok();
    CloseInfo::new(StatusCode(code), reason)
}

struct Inner<F: WsFrame, E, G, X> {
    id: ConnectionId,
    policy: Policy,
    endpoint: Arc<E>,
    state: Arc<IoStateMachine>,
    flusher: FrameFlusher<F, E, G>,
    extensions: Arc<X>,
    executor: Executor,
    close_sent: AtomicBool,
    disconnect_started: AtomicBool,
    /// Re-enters the read pump after a deferred frame completion (§4.4).
    /// Installed once in `ConnectionDriver::new`, after the pump itself
    /// exists; absent only during the brief window of construction before
    /// that.
    resume_pump: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl<F, E, G, X> Inner<F, E, G, X>
where
    F: WsFrame,
    E: Endpoint,
    G: Generator<F> + Send + 'static,
    X: ExtensionChain<F>,
{
    /// Handles a parsed frame (§4.4 `on_frame`): CLOSE frames are
    /// intercepted here to drive the state machine directly; everything
    /// else is handed to the extension chain's incoming direction.
    ///
    /// Completion may happen synchronously (inside `incoming_frame`, before
    /// it returns) or later, from another task entirely, if the chain defers
    /// it. A single-shot flag is swapped at both of those points; whichever
    /// swap observes the other one already having happened is the genuine
    /// second completer. When that's the async callback, the read pump is
    /// already parked on its own return from `run` (the parser answered
    /// `false` up through this same race and reported `ParseOutcome::Stop`),
    /// so the callback is responsible for re-spawning it.
    fn dispatch_frame(self: &Arc<Self>, frame: F) -> bool {
        if frame.opcode() == OpCode::Close {
            let close_info = decode_close_frame(&frame);
            self.state.on_close_remote(close_info);
            return true;
        }
        let done = Arc::new(AtomicBool::new(false));
        let cb: Box<dyn FrameCompletion<F>> = Box::new(IncomingFrameCompletion {
            inner: self.clone(),
            done: done.clone(),
        });
        self.extensions.incoming_frame(frame, cb);
        done.swap(true, Ordering::AcqRel)
    }

    /// Installed once, after the read pump is constructed (§4.4). Re-spawns
    /// `pump.run()` on the executor; a no-op during the brief window before
    /// it's installed, which can only be reached if a chain defers
    /// completion for a prefill frame parsed before `open()` spawns anything.
    fn resume_read_pump(&self) {
        if let Some(resume) = self.resume_pump.lock().as_deref() {
            resume();
        }
    }

    /// Enqueues a CLOSE frame, gated so at most one is ever sent (§8
    /// invariant 5). Returns `false` without enqueuing anything if a CLOSE
    /// frame was already sent.
    ///
    /// `signal_local_close` wraps the given `then` continuation in
    /// `LocalClose`, which signals `on_close_local` once the frame's
    /// completion runs; set it to `false` when the state machine has
    /// already reached its terminal state through another path (the
    /// best-effort close attempted after an abnormal close) and only the
    /// teardown action in `then` is still needed.
    fn send_close_frame(
        self: &Arc<Self>,
        close_info: CloseInfo,
        signal_local_close: bool,
        then: Option<CloseContinuation>,
    ) -> bool {
        if self.close_sent.swap(true, Ordering::AcqRel) {
            return false;
        }
        let frame = close_info.to_frame();
        let continuation = if signal_local_close {
            CloseContinuation::LocalClose {
                close_info,
                next: then.map(Box::new),
            }
        } else {
            then.unwrap_or(CloseContinuation::Disconnect { output_only: false })
        };
        let cb: Box<dyn FrameCompletion<F>> = Box::new(ContinuationCompletion {
            inner: self.clone(),
            continuation,
        });
        self.extensions.outgoing_frame(frame, cb, BatchMode::Off, &self.flusher);
        true
    }

    fn run_continuation(self: &Arc<Self>, continuation: CloseContinuation) {
        let inner = self.clone();
        self.executor.spawn_task(async move {
            inner.run_continuation_async(continuation).await;
        });
    }

    fn run_continuation_async<'a>(
        &'a self,
        continuation: CloseContinuation,
    ) -> std::pin::Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        // Boxed because `LocalClose` may nest a `Disconnect`, which would
        // otherwise make this async fn's state an infinitely-sized type.
        Box::pin(async move {
            match continuation {
                CloseContinuation::Disconnect { output_only } => {
                    if output_only {
                        self.shutdown_output_only().await;
                    } else {
                        self.disconnect().await;
                    }
                }
                CloseContinuation::LocalClose { close_info, next } => {
                    if let Some(next) = next {
                        self.run_continuation_async(*next).await;
                    }
                    self.state.on_close_local(close_info);
                }
            }
        })
    }

    async fn shutdown_output_only(&self) {
        if let Err(error) = self.endpoint.shutdown_output().await {
            tracing::debug!(%error, id = %self.id, "shutdown_output failed");
        }
    }

    /// Tears the transport down for good: closes the flusher, shuts down
    /// output, closes the endpoint, then reports disconnection to the state
    /// machine. Idempotent — only the first caller actually touches the
    /// endpoint.
    async fn disconnect(&self) {
        if self.disconnect_started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.flusher.close();
        if let Err(error) = self.endpoint.shutdown_output().await {
            tracing::debug!(%error, id = %self.id, "shutdown_output failed during disconnect");
        }
        if let Err(error) = self.endpoint.close().await {
            tracing::warn!(%error, id = %self.id, "endpoint close failed");
        }
        self.state.on_disconnected();
    }

    /// Reacts to an IO state transition (§4.4 "State-change reactions").
    /// Invoked from the state machine's listener via a `Weak` upgrade, so
    /// this never forms a reference cycle with the state machine itself.
    fn react_to_state_change(self: &Arc<Self>, new_state: ConnectionState) {
        match new_state {
            ConnectionState::Closing => {
                if self.state.was_remote_close_initiated() {
                    let reply = self.state.close_info().unwrap_or_else(CloseInfo::empty);
                    self.send_close_frame(reply, true, Some(CloseContinuation::Disconnect { output_only: true }));
                }
            }
            ConnectionState::Closed => {
                if self.state.was_abnormal_close() {
                    let ci = CloseInfo::new(StatusCode::SHUTDOWN, Some("abnormal close".to_owned()));
                    let sent = self.send_close_frame(ci, false, Some(CloseContinuation::Disconnect { output_only: false }));
                    if !sent {
                        let inner = self.clone();
                        self.executor.spawn_task(async move { inner.disconnect().await });
                    }
                } else {
                    let inner = self.clone();
                    self.executor.spawn_task(async move { inner.disconnect().await });
                }
            }
            ConnectionState::Connecting | ConnectionState::Open => {}
        }
    }
}

struct ContinuationCompletion<F: WsFrame, E, G, X> {
    inner: Arc<Inner<F, E, G, X>>,
    continuation: CloseContinuation,
}

impl<F, E, G, X> FrameCompletion<F> for ContinuationCompletion<F, E, G, X>
where
    F: WsFrame,
    E: Endpoint,
    G: Generator<F> + Send + 'static,
    X: ExtensionChain<F>,
{
    fn succeed(self: Box<Self>) {
        let this = *self;
        this.inner.run_continuation(this.continuation);
    }

    fn fail(self: Box<Self>, error: DriverError) {
        tracing::debug!(%error, "close frame send failed, tearing down anyway");
        let this = *self;
        this.inner.run_continuation(this.continuation);
    }
}

/// The completion handed to `ExtensionChain::incoming_frame`. See
/// `Inner::dispatch_frame` for the one-shot race this and that method
/// together implement.
struct IncomingFrameCompletion<F: WsFrame, E, G, X> {
    inner: Arc<Inner<F, E, G, X>>,
    done: Arc<AtomicBool>,
}

impl<F, E, G, X> IncomingFrameCompletion<F, E, G, X>
where
    F: WsFrame,
    E: Endpoint,
    G: Generator<F> + Send + 'static,
    X: ExtensionChain<F>,
{
    fn finish(self) {
        if self.done.swap(true, Ordering::AcqRel) {
            self.inner.resume_read_pump();
        }
    }
}

impl<F, E, G, X> FrameCompletion<F> for IncomingFrameCompletion<F, E, G, X>
where
    F: WsFrame,
    E: Endpoint,
    G: Generator<F> + Send + 'static,
    X: ExtensionChain<F>,
{
    fn succeed(self: Box<Self>) {
        let this = *self;
        this.finish();
    }

    fn fail(self: Box<Self>, error: DriverError) {
        tracing::debug!(%error, "incoming frame handling failed");
        let this = *self;
        this.finish();
    }
}

struct ReadReactor<F: WsFrame, E, G, X> {
    inner: Arc<Inner<F, E, G, X>>,
}

impl<F, E, G, X> ReadPumpReactor<F> for ReadReactor<F, E, G, X>
where
    F: WsFrame,
    E: Endpoint,
    G: Generator<F> + Send + 'static,
    X: ExtensionChain<F>,
{
    fn on_frame(&self, frame: F) -> bool {
        self.inner.dispatch_frame(frame)
    }

    fn on_parse_error(&self, error: DriverError) {
        let close_info = CloseInfo::new(error.close_status(), Some(error.to_string()));
        self.inner.send_close_frame(close_info, true, None);
    }

    fn on_io_failure(&self, error: DriverError) {
        self.inner.state.on_read_failure(&error);
    }
}

/// Owns a single WebSocket connection end to end: the state machine, the
/// read pump, and the frame flusher, wired to a concrete [`Endpoint`],
/// [`Parser`], [`Generator`], and [`ExtensionChain`].
///
/// Cheap to clone (an `Arc` handle internally is not exposed, but the
/// session-facing methods all take `&self`, so callers typically hold this
/// behind their own `Arc`).
pub struct ConnectionDriver<F, E, P, G, X, B>
where
    F: WsFrame,
    E: Endpoint,
    P: Parser<F>,
    G: Generator<F> + Send + 'static,
    X: ExtensionChain<F>,
    B: BufferPool,
{
    inner: Arc<Inner<F, E, G, X>>,
    pump: Arc<ReadPump<F, E, P, B, ReadReactor<F, E, G, X>>>,
}

impl<F, E, P, G, X, B> ConnectionDriver<F, E, P, G, X, B>
where
    F: WsFrame,
    E: Endpoint,
    P: Parser<F>,
    G: Generator<F> + Send + 'static,
    X: ExtensionChain<F>,
    B: BufferPool,
{
    #[must_use]
    pub fn new(
        id: ConnectionId,
        policy: Policy,
        endpoint: Arc<E>,
        pool: Arc<B>,
        parser: P,
        generator: G,
        extensions: Arc<X>,
        executor: Executor,
    ) -> Self {
        let input_buffer_size = policy.input_buffer_size_bytes();
        let output_buffer_size = policy.output_buffer_size_bytes();

        let flusher = FrameFlusher::new(endpoint.clone(), generator, output_buffer_size, executor.clone());
        let state = Arc::new(IoStateMachine::new());

        let inner = Arc::new(Inner {
            id,
            policy,
            endpoint: endpoint.clone(),
            state: state.clone(),
            flusher,
            extensions,
            executor,
            close_sent: AtomicBool::new(false),
            disconnect_started: AtomicBool::new(false),
            resume_pump: Mutex::new(None),
        });

        let write_failure_inner = inner.clone();
        inner.flusher.set_on_write_failure(move |error| {
            if write_failure_inner.state.connection_state() == ConnectionState::Closed {
                tracing::debug!(%error, "write failure after close, suppressing");
                return;
            }
            write_failure_inner.state.on_write_failure(&error);
        });

        let listener_inner = Arc::downgrade(&inner);
        state.add_listener(move |new_state| {
            if let Some(inner) = listener_inner.upgrade() {
                inner.react_to_state_change(new_state);
            }
        });

        let reactor = Arc::new(ReadReactor { inner: inner.clone() });
        let pump = Arc::new(ReadPump::new(endpoint, pool, parser, reactor, input_buffer_size));

        let resume_pump = pump.clone();
        let resume_executor = inner.executor.clone();
        *inner.resume_pump.lock() = Some(Box::new(move || {
            let pump = resume_pump.clone();
            resume_executor.spawn_task(async move {
                pump.run().await;
            });
        }));

        Self { inner, pump }
    }

    /// Transitions CONNECTING→OPEN, parses any prefill bytes, and spawns the
    /// read-pump task. Must be called exactly once.
    pub fn open(&self, prefill: Option<BytesMut>) {
        self.inner.state.on_opened();
        if let Some(prefill) = prefill {
            self.pump.consume_prefill(prefill);
        }
        let pump = self.pump.clone();
        self.inner.executor.spawn_task(async move {
            pump.run().await;
        });
    }

    /// Initiates a normal local close (status 1000, no reason). Idempotent.
    pub fn close(&self) {
        self.close_with(StatusCode::NORMAL, None);
    }

    /// Initiates a local close with the given status and optional reason.
    /// Idempotent — only the first call (across this and [`Self::close`])
    /// enqueues a CLOSE frame.
    pub fn close_with(&self, status: StatusCode, reason: Option<String>) {
        let close_info = CloseInfo::new(status, reason.map(truncate_reason));
        self.inner.send_close_frame(close_info, true, None);
    }

    /// Forces transport teardown without a close handshake. Idempotent.
    pub fn disconnect(&self) {
        let inner = self.inner.clone();
        self.inner.executor.spawn_task(async move {
            inner.disconnect().await;
        });
    }

    /// Routes an outbound frame through the extension chain into the flusher.
    pub fn outgoing_frame(&self, frame: F, cb: Box<dyn FrameCompletion<F>>, mode: BatchMode) {
        self.inner.extensions.outgoing_frame(frame, cb, mode, &self.inner.flusher);
    }

    /// Invoked by the parser (via the read pump) when a frame is complete.
    /// Returns `true` if handling completed synchronously.
    pub fn on_frame(&self, frame: F) -> bool {
        self.inner.dispatch_frame(frame)
    }

    #[must_use]
    pub fn suspend(&self) -> SuspendHandle {
        self.pump.suspend()
    }

    pub fn resume(&self) {
        self.pump.resume();
    }

    /// Validates `size >= MIN_BUFFER_SIZE` before forwarding to the pump.
    pub fn set_input_buffer_size(&self, size: usize) -> Result<()> {
        if size < MIN_BUFFER_SIZE {
            return Err(DriverError::invalid_argument("input buffer below MIN_BUFFER_SIZE"));
        }
        self.pump.set_input_buffer_size(size);
        Ok(())
    }

    pub fn set_max_idle_timeout(&self, timeout: Option<std::time::Duration>) {
        self.inner.endpoint.set_idle_timeout(timeout);
    }

    /// The transport's idle timer fired. Absorbed once the connection is
    /// already closed; otherwise initiates a *normal* close with status
    /// 1001 (§9 open question — idle timeout is not abnormal).
    pub fn on_idle_timeout(&self) {
        if self.inner.state.connection_state() == ConnectionState::Closed {
            return;
        }
        tracing::warn!(id = %self.inner.id, "idle timeout");
        self.close_with(StatusCode::SHUTDOWN, Some("Idle Timeout".to_owned()));
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.state.connection_state() == ConnectionState::Open
    }

    #[must_use]
    pub fn get_policy(&self) -> &Policy {
        &self.inner.policy
    }

    #[must_use]
    pub fn get_remote_address(&self) -> SocketAddr {
        self.inner.endpoint.remote_addr()
    }

    #[must_use]
    pub fn get_id(&self) -> &ConnectionId {
        &self.inner.id
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.state.connection_state()
    }
}
