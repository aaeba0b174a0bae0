//! Extension stack contract (§6, C3): an ordered bidirectional pipeline that
//! may transform, split, merge, or drop frames, and which owns the decision
//! of when a frame's processing is actually complete.

use crate::flusher::BatchMode;
use crate::frame::WsFrame;

/// Completion signal for a single frame passed through the chain.
///
/// Exactly one of `succeed`/`fail` must be invoked, and it may happen either
/// before `incoming_frame`/`outgoing_frame` returns (synchronous) or later,
/// from another task (asynchronous) — see §4.4's frame-completion
/// synchronization note.
pub trait FrameCompletion<F: WsFrame>: Send {
    fn succeed(self: Box<Self>);
    fn fail(self: Box<Self>, error: crate::error::DriverError);
}

/// A completion that just runs a closure; sufficient for most call sites.
pub struct FnCompletion<F, FnOk, FnErr> {
    on_ok: FnOk,
    on_err: FnErr,
    _marker: std::marker::PhantomData<fn(F)>,
}

impl<F, FnOk, FnErr> FnCompletion<F, FnOk, FnErr>
where
    FnOk: FnOnce() + Send,
    FnErr: FnOnce(crate::error::DriverError) + Send,
{
    pub fn new(on_ok: FnOk, on_err: FnErr) -> Self {
        Self {
            on_ok,
            on_err,
            _marker: std::marker::PhantomData,
        }
    }
}

impl<F, FnOk, FnErr> FrameCompletion<F> for FnCompletion<F, FnOk, FnErr>
where
    F: WsFrame,
    FnOk: FnOnce() + Send,
    FnErr: FnOnce(crate::error::DriverError) + Send,
{
    fn succeed(self: Box<Self>) {
        (self.on_ok)();
    }

    fn fail(self: Box<Self>, error: crate::error::DriverError) {
        (self.on_err)(error);
    }
}

/// The next stage an outgoing frame is handed to once the chain is done
/// transforming it — in practice, the [`crate::flusher::FrameFlusher`].
///
/// Modeling this as a narrow trait (rather than giving the chain a
/// concrete `&FrameFlusher`) keeps the extension-chain contract decoupled
/// from the flusher's implementation, matching how the chain is specified
/// only through its own contract in §6.
pub trait FrameSink<F: WsFrame>: Send + Sync {
    fn enqueue(&self, frame: F, cb: Box<dyn FrameCompletion<F>>, mode: BatchMode);
}

/// `set_policy`, `configure(parser|generator)`, `incoming_frame`, `outgoing_frame`.
pub trait ExtensionChain<F: WsFrame>: Send + Sync + 'static {
    /// Process an inbound frame. Returns `true` if completion happened
    /// synchronously (the caller may treat `cb` as already consumed and
    /// proceed immediately); `false` if completion will happen later via `cb`.
    fn incoming_frame(&self, frame: F, cb: Box<dyn FrameCompletion<F>>) -> bool;

    /// Process an outbound frame, then hand the (possibly transformed,
    /// split, or merged) result to `sink`.
    fn outgoing_frame(
        &self,
        frame: F,
        cb: Box<dyn FrameCompletion<F>>,
        mode: BatchMode,
        sink: &dyn FrameSink<F>,
    );
}

/// The empty chain: every frame passes through untouched, completion is
/// always synchronous. Useful as a default and in tests.
#[derive(Debug, Default)]
pub struct IdentityChain;

impl<F: WsFrame> ExtensionChain<F> for IdentityChain {
    fn incoming_frame(&self, _frame: F, cb: Box<dyn FrameCompletion<F>>) -> bool {
        cb.succeed();
        true
    }

    fn outgoing_frame(
        &self,
        frame: F,
        cb: Box<dyn FrameCompletion<F>>,
        mode: BatchMode,
        sink: &dyn FrameSink<F>,
    ) {
        sink.enqueue(frame, cb, mode);
    }
}
