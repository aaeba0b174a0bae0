//! The read pump (§4.2, C6): drains the transport through the parser,
//! honouring suspension and re-arming read-readiness on zero-fill.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::codec::{ParseOutcome, Parser};
use crate::endpoint::Endpoint;
use crate::error::DriverError;
use crate::frame::WsFrame;
use crate::pool::{BufferPool, PooledBuffer};

/// The driver's reaction surface for frames and failures surfaced by the
/// pump. Kept narrow and separate from [`crate::endpoint::Endpoint`] so the
/// pump never needs to know how the driver turns these into close frames.
pub trait ReadPumpReactor<F: WsFrame>: Send + Sync + 'static {
    /// Dispatch a fully parsed frame, mirroring `ConnectionDriver::on_frame`'s
    /// sync/async completion convention (§4.4): `true` if the extension chain
    /// completed synchronously and the pump may keep delivering frames from
    /// the same `parse` call.
    fn on_frame(&self, frame: F) -> bool;

    /// The parser raised an error: a protocol violation, a codec close
    /// exception, or anything else the parser's contract allows. The driver
    /// always answers with a local close carrying `error.close_status()`,
    /// never a raw disconnect (§4.2 error policy).
    fn on_parse_error(&self, error: DriverError);

    /// `fill` failed, or the transport reached EOF. The driver routes this
    /// to the IO state machine's `on_read_failure`.
    fn on_io_failure(&self, error: DriverError);
}

/// A resumable handle returned by [`ReadPump::suspend`]. `resume` is
/// idempotent and safe to call from any thread (§4.2).
#[derive(Clone)]
pub struct SuspendHandle {
    suspended: Arc<AtomicBool>,
    notify: Arc<tokio::sync::Notify>,
}

impl SuspendHandle {
    pub fn resume(&self) {
        if self.suspended.swap(false, Ordering::AcqRel) {
            self.notify.notify_one();
        }
    }
}

/// Drains a single connection's transport through its parser.
///
/// Owns the lazily-acquired network buffer and the suspend flag; everything
/// else (policy, extension chain, flusher) is reached through the
/// [`ReadPumpReactor`] the driver installs.
pub struct ReadPump<F, E, P, B, R>
where
    F: WsFrame,
    E: Endpoint,
    P: Parser<F>,
    B: BufferPool,
    R: ReadPumpReactor<F>,
{
    endpoint: Arc<E>,
    pool: Arc<B>,
    parser: Mutex<P>,
    reactor: Arc<R>,
    input_buffer_size: AtomicUsize,
    suspended: Arc<AtomicBool>,
    resume_notify: Arc<tokio::sync::Notify>,
    _marker: std::marker::PhantomData<fn(F)>,
}

impl<F, E, P, B, R> ReadPump<F, E, P, B, R>
where
    F: WsFrame,
    E: Endpoint,
    P: Parser<F>,
    B: BufferPool,
    R: ReadPumpReactor<F>,
{
    pub fn new(endpoint: Arc<E>, pool: Arc<B>, parser: P, reactor: Arc<R>, input_buffer_size: usize) -> Self {
        Self {
            endpoint,
            pool,
            parser: Mutex::new(parser),
            reactor,
            input_buffer_size: AtomicUsize::new(input_buffer_size),
            suspended: Arc::new(AtomicBool::new(false)),
            resume_notify: Arc::new(tokio::sync::Notify::new()),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn set_input_buffer_size(&self, size: usize) {
        self.input_buffer_size.store(size, Ordering::Relaxed);
    }

    /// Sets the suspend flag and returns a handle to clear it again. Calling
    /// this repeatedly before a resume is harmless: the flag is idempotent.
    #[must_use]
    pub fn suspend(&self) -> SuspendHandle {
        self.suspended.store(true, Ordering::Release);
        SuspendHandle {
            suspended: self.suspended.clone(),
            notify: self.resume_notify.clone(),
        }
    }

    pub fn resume(&self) {
        SuspendHandle {
            suspended: self.suspended.clone(),
            notify: self.resume_notify.clone(),
        }
        .resume();
    }

    /// Parses bytes the upgrade layer already consumed from the transport,
    /// before any `fill` call (§4.2 Prefill). A no-op for an empty buffer.
    pub fn consume_prefill(&self, mut prefill: BytesMut) {
        if prefill.is_empty() {
            return;
        }
        let result = {
            let mut parser = self.parser.lock();
            parser.parse(&mut prefill, &mut |frame| self.reactor.on_frame(frame))
        };
        if let Err(error) = result {
            warn!(%error, "read pump: prefill parse failed");
            self.reactor.on_parse_error(error);
        }
    }

    /// Runs the pump loop until the transport is exhausted, the parser
    /// requests a stop, or an unrecoverable error occurs. Meant to be spawned
    /// as the connection's read-pump task; returns when the connection no
    /// longer needs to be read from for now (the caller re-enters it via
    /// `resume` or a deferred frame completion, per §4.2).
    pub async fn run(&self) {
        let mut network_buffer: Option<PooledBuffer<'_>> = None;

        loop {
            if self.suspended.load(Ordering::Acquire) {
                trace!("read pump: suspended");
                self.resume_notify.notified().await;
                continue;
            }

            if network_buffer.is_none() {
                let size = self.input_buffer_size.load(Ordering::Relaxed);
                network_buffer = Some(PooledBuffer::acquire(&*self.pool, size, false));
            }
            let buffer = network_buffer.as_mut().expect("just populated");

            let fill_result = self.endpoint.fill(buffer.get_mut()).await;
            let n = match fill_result {
                Ok(n) => n,
                Err(error) => {
                    network_buffer.take();
                    warn!(%error, "read pump: fill failed");
                    self.reactor.on_io_failure(error);
                    return;
                }
            };

            if n == 0 && self.endpoint.is_eof() {
                network_buffer.take();
                debug!("read pump: transport reached EOF");
                self.reactor.on_io_failure(DriverError::io("transport reached EOF"));
                return;
            }

            if n == 0 {
                network_buffer.take();
                self.endpoint.fill_interested();
                trace!("read pump: zero-fill, read-readiness re-armed");
                continue;
            }

            let outcome = {
                let mut parser = self.parser.lock();
                parser.parse(buffer.get_mut(), &mut |frame| self.reactor.on_frame(frame))
            };
            match outcome {
                Ok(ParseOutcome::Continue) => {}
                Ok(ParseOutcome::Stop) => {
                    trace!("read pump: parser requested stop");
                    return;
                }
                Err(error) => {
                    network_buffer.take();
                    warn!(%error, "read pump: parser error");
                    self.reactor.on_parse_error(error);
                    return;
                }
            }
        }
    }
}
