//! The frame flusher (§4.3, C7): the single-writer outbound pipeline that
//! batches frames into transport-sized writes and resolves per-frame
//! callbacks in enqueue order.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::codec::Generator;
use crate::endpoint::Endpoint;
use crate::error::DriverError;
use crate::executor::Executor;
use crate::extensions::{FrameCompletion, FrameSink};
use crate::frame::WsFrame;

/// A hint about whether a frame may be coalesced with its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Defer the flush decision to the flusher's own heuristics.
    Auto,
    /// Permit coalescing with adjacent `On`/`Auto` frames.
    On,
    /// Force a flush after this frame.
    Off,
}

/// `{IDLE, FLUSHING, FAILED, CLOSED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlusherState {
    Idle,
    Flushing,
    Failed,
    Closed,
}

struct Entry<F> {
    frame: F,
    cb: Box<dyn FrameCompletion<F>>,
    mode: BatchMode,
}

struct Core<F: WsFrame> {
    queue: VecDeque<Entry<F>>,
    state: FlusherState,
}

/// A small, fixed bound on how many frames are aggregated into one output
/// buffer per flush turn (§4.3 — "typically 8").
const BATCH_LIMIT: usize = 8;

struct Shared<F: WsFrame, E, G> {
    core: Mutex<Core<F>>,
    generator: Mutex<G>,
    endpoint: Arc<E>,
    output_buffer_size: usize,
    executor: Executor,
    on_write_failure: Mutex<Option<Box<dyn Fn(DriverError) + Send + Sync>>>,
}

/// Queues `(frame, callback, batch_mode)` triples and drives a single
/// in-flight flush turn at a time.
///
/// Cloning a `FrameFlusher` is cheap (it is a handle around a shared,
/// reference-counted core) so it can be handed to the extension chain as a
/// [`FrameSink`] and to the connection driver simultaneously.
pub struct FrameFlusher<F: WsFrame, E, G> {
    shared: Arc<Shared<F, E, G>>,
}

impl<F: WsFrame, E, G> Clone for FrameFlusher<F, E, G> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<F, E, G> FrameFlusher<F, E, G>
where
    F: WsFrame,
    E: Endpoint,
    G: Generator<F> + Send + 'static,
{
    #[must_use]
    pub fn new(endpoint: Arc<E>, generator: G, output_buffer_size: usize, executor: Executor) -> Self {
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core {
                    queue: VecDeque::new(),
                    state: FlusherState::Idle,
                }),
                generator: Mutex::new(generator),
                endpoint,
                output_buffer_size,
                executor,
                on_write_failure: Mutex::new(None),
            }),
        }
    }

    /// Registers the callback the driver uses to learn about write failures
    /// (§4.3 "Failure → state-machine coupling"). Called once, at
    /// construction time, before the flusher is shared with other tasks.
    pub fn set_on_write_failure<H>(&self, handler: H)
    where
        H: Fn(DriverError) + Send + Sync + 'static,
    {
        *self.shared.on_write_failure.lock() = Some(Box::new(handler));
    }

    pub fn enqueue(&self, frame: F, cb: Box<dyn FrameCompletion<F>>, mode: BatchMode) {
        let should_spawn = {
            let mut core = self.shared.core.lock();
            match core.state {
                FlusherState::Failed | FlusherState::Closed => {
                    drop(core);
                    cb.fail(DriverError::closed());
                    return;
                }
                FlusherState::Idle => {
                    core.state = FlusherState::Flushing;
                    core.queue.push_back(Entry { frame, cb, mode });
                    true
                }
                FlusherState::Flushing => {
                    core.queue.push_back(Entry { frame, cb, mode });
                    false
                }
            }
        };
        if should_spawn {
            let shared = self.shared.clone();
            self.shared.executor.spawn_task(async move {
                run_flush_loop(shared).await;
            });
        }
    }

    /// Closes the flusher: every pending entry is failed with a canonical
    /// "flusher closed" error, and subsequent enqueues are rejected
    /// immediately. Idempotent.
    pub fn close(&self) {
        let pending = {
            let mut core = self.shared.core.lock();
            if matches!(core.state, FlusherState::Closed | FlusherState::Failed) {
                return;
            }
            core.state = FlusherState::Closed;
            std::mem::take(&mut core.queue)
        };
        for entry in pending {
            entry.cb.fail(DriverError::closed());
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(
            self.shared.core.lock().state,
            FlusherState::Closed | FlusherState::Failed
        )
    }
}

impl<F, E, G> FrameSink<F> for FrameFlusher<F, E, G>
where
    F: WsFrame,
    E: Endpoint,
    G: Generator<F> + Send + 'static,
{
    fn enqueue(&self, frame: F, cb: Box<dyn FrameCompletion<F>>, mode: BatchMode) {
        FrameFlusher::enqueue(self, frame, cb, mode);
    }
}

async fn run_flush_loop<F, E, G>(shared: Arc<Shared<F, E, G>>)
where
    F: WsFrame,
    E: Endpoint,
    G: Generator<F>,
{
    loop {
        let batch = {
            let mut core = shared.core.lock();
            if core.queue.is_empty() {
                core.state = FlusherState::Idle;
                return;
            }
            let mut generator = shared.generator.lock();
            take_batch(&mut core.queue, shared.output_buffer_size, &mut generator)
        };

        let mut buf = Vec::with_capacity(shared.output_buffer_size.max(batch.bytes.len()));
        buf.extend_from_slice(&batch.bytes);

        match shared.endpoint.flush(&buf).await {
            Ok(()) => {
                for entry in batch.entries {
                    entry.cb.succeed();
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "frame flush failed, draining flusher");
                fail_batch_and_drain(&shared, batch.entries, err);
                return;
            }
        }
    }
}

struct Batch<F> {
    entries: SmallVec<[Entry<F>; BATCH_LIMIT]>,
    bytes: Vec<u8>,
}

/// Pulls up to [`BATCH_LIMIT`] entries off the front of `queue`, subject to
/// the output-buffer capacity and each entry's [`BatchMode`] (§4.3). Batches
/// never exceed `BATCH_LIMIT`, so the entries live inline on the stack
/// rather than spilling to a heap `Vec` in the common case.
fn take_batch<F, G>(queue: &mut VecDeque<Entry<F>>, output_buffer_size: usize, generator: &mut G) -> Batch<F>
where
    F: WsFrame,
    G: Generator<F>,
{
    let mut entries = SmallVec::new();
    let mut bytes = Vec::new();

    while let Some(front) = queue.front() {
        let header = generator.generate_header_bytes(&front.frame);
        let encoded_len = header.len() + front.frame.payload_len();

        // Always take at least one frame, even if it alone overflows the
        // configured output buffer -- a lone huge frame must still be sent.
        if !entries.is_empty() && bytes.len() + encoded_len > output_buffer_size {
            break;
        }

        let entry = queue.pop_front().unwrap_or_else(|| unreachable!("front() just matched"));
        bytes.extend_from_slice(&header);
        bytes.extend_from_slice(entry.frame.payload());
        let mode = entry.mode;
        entries.push(entry);

        if mode == BatchMode::Off || entries.len() >= BATCH_LIMIT {
            break;
        }
    }

    Batch { entries, bytes }
}

fn fail_batch_and_drain<F, E, G>(shared: &Arc<Shared<F, E, G>>, batch: SmallVec<[Entry<F>; BATCH_LIMIT]>, err: DriverError)
where
    F: WsFrame,
{
    let remaining = {
        let mut core = shared.core.lock();
        core.state = FlusherState::Failed;
        std::mem::take(&mut core.queue)
    };
    for entry in batch {
        entry.cb.fail(DriverError::io(err.to_string()));
    }
    for entry in remaining {
        entry.cb.fail(DriverError::io(err.to_string()));
    }
    if let Some(handler) = shared.on_write_failure.lock().as_ref() {
        handler(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{BasicFrame, OpCode};
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    struct RecordingEndpoint {
        written_bytes: AtomicUsize,
        write_count: AtomicUsize,
        fail_next: AtomicBool,
    }

    impl RecordingEndpoint {
        fn new() -> Self {
            Self {
                written_bytes: AtomicUsize::new(0),
                write_count: AtomicUsize::new(0),
                fail_next: AtomicBool::new(false),
            }
        }
    }

    impl Endpoint for RecordingEndpoint {
        async fn fill(&self, _buffer: &mut bytes::BytesMut) -> crate::error::Result<usize> {
            Ok(0)
        }
        fn is_eof(&self) -> bool {
            false
        }
        async fn flush(&self, data: &[u8]) -> crate::error::Result<()> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(DriverError::io(std::io::Error::other("boom")));
            }
            self.written_bytes.fetch_add(data.len(), Ordering::SeqCst);
            self.write_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn shutdown_output(&self) -> crate::error::Result<()> {
            Ok(())
        }
        async fn close(&self) -> crate::error::Result<()> {
            Ok(())
        }
        fn set_idle_timeout(&self, _timeout: Option<Duration>) {}
        fn local_addr(&self) -> SocketAddr {
            "127.0.0.1:1".parse().unwrap()
        }
        fn remote_addr(&self) -> SocketAddr {
            "127.0.0.1:2".parse().unwrap()
        }
    }

    struct NoopGenerator;
    impl Generator<BasicFrame> for NoopGenerator {
        fn generate_header_bytes(&mut self, frame: &BasicFrame) -> Vec<u8> {
            // Minimal unmasked header: opcode byte + 1-byte length.
            let opcode_byte = match frame.opcode() {
                OpCode::Continuation => 0x00,
                OpCode::Text => 0x01,
                OpCode::Binary => 0x02,
                OpCode::Close => 0x08,
                OpCode::Ping => 0x09,
                OpCode::Pong => 0x0a,
            };
            vec![0x80 | opcode_byte, frame.payload_len() as u8]
        }
        fn max_header_length(&self) -> usize {
            14
        }
    }

    fn noop_cb() -> Box<dyn FrameCompletion<BasicFrame>> {
        Box::new(crate::extensions::FnCompletion::new(|| {}, |_e| {}))
    }

    #[tokio::test]
    async fn callbacks_fire_exactly_once_in_enqueue_order() {
        let endpoint = Arc::new(RecordingEndpoint::new());
        let flusher = FrameFlusher::new(endpoint.clone(), NoopGenerator, 1024, Executor::new());

        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5u8 {
            let order = order.clone();
            let cb = crate::extensions::FnCompletion::new(
                move || order.lock().push(i),
                |_e| panic!("unexpected failure"),
            );
            flusher.enqueue(BasicFrame::binary(vec![i]), Box::new(cb), BatchMode::Auto);
        }

        // Give the spawned flush task a chance to run.
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(endpoint.write_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn write_failure_fails_pending_entries_and_future_enqueues() {
        let endpoint = Arc::new(RecordingEndpoint::new());
        endpoint.fail_next.store(true, Ordering::SeqCst);
        let flusher = FrameFlusher::new(endpoint, NoopGenerator, 1024, Executor::new());

        let failed = Arc::new(AtomicUsize::new(0));
        let failed2 = failed.clone();
        let cb = crate::extensions::FnCompletion::new(
            || panic!("unexpected success"),
            move |_e| {
                failed2.fetch_add(1, Ordering::SeqCst);
            },
        );
        flusher.enqueue(BasicFrame::text("hi"), Box::new(cb), BatchMode::Off);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(failed.load(Ordering::SeqCst), 1);
        assert!(flusher.is_closed());

        flusher.enqueue(BasicFrame::text("too late"), noop_cb(), BatchMode::Off);
    }

    #[tokio::test]
    async fn off_mode_does_not_wait_for_more_frames() {
        let endpoint = Arc::new(RecordingEndpoint::new());
        let flusher = FrameFlusher::new(endpoint.clone(), NoopGenerator, 1024, Executor::new());
        flusher.enqueue(BasicFrame::text("only me"), noop_cb(), BatchMode::Off);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(endpoint.write_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn close_fails_pending_entries_and_rejects_future_enqueues() {
        let endpoint = Arc::new(RecordingEndpoint::new());
        let flusher = FrameFlusher::new(endpoint, NoopGenerator, 1024, Executor::new());

        let failed = Arc::new(AtomicUsize::new(0));
        let failed2 = failed.clone();
        flusher.close();
        let cb = crate::extensions::FnCompletion::new(
            || panic!("unexpected success"),
            move |_e| {
                failed2.fetch_add(1, Ordering::SeqCst);
            },
        );
        flusher.enqueue(BasicFrame::text("nope"), Box::new(cb), BatchMode::Auto);
        assert_eq!(failed.load(Ordering::SeqCst), 1);
    }
}
