//! A core WebSocket connection driver: the lifecycle state machine, read
//! pump, and frame flusher that sit between a byte-oriented duplex
//! transport and a higher-level session, once the HTTP upgrade has already
//! happened.
//!
//! # Scope
//!
//! This crate does not negotiate the HTTP upgrade, does not implement RFC
//! 6455 framing itself, and does not ship an extension (e.g.
//! permessage-deflate) implementation. It is generic over all of those
//! through small trait contracts:
//!
//! - [`Endpoint`] — the non-blocking duplex transport.
//! - [`Parser`] / [`Generator`] — the byte⇄frame codec.
//! - [`ExtensionChain`] — the bidirectional frame middleware stack.
//! - [`BufferPool`] — network buffer allocation.
//!
//! [`ConnectionDriver`] owns the pieces that *are* in scope — [`IoStateMachine`],
//! [`ReadPump`], [`FrameFlusher`] — and wires them to whichever concrete
//! implementations of the above a caller brings.
//!
//! # Error handling
//!
//! [`DriverError`] is a single layered error type: a private `Kind`
//! distinguishes the failure category, and an optional boxed cause
//! (`rama_error::BoxError`) is reachable through [`std::error::Error::source`]
//! without committing the public API to the cause's concrete type.
//!
//! # Lifecycle, in one paragraph
//!
//! A connection starts in `CONNECTING`. [`ConnectionDriver::open`] moves it
//! to `OPEN`, drains any prefill bytes, and spawns the read-pump task.
//! Either side may initiate a close; the driver ensures at most one CLOSE
//! frame is ever sent and that the transport's output is shut down before
//! it is fully closed. An abnormal termination (I/O failure, idle timeout's
//! peer never replying) skips straight to `CLOSED` and attempts one
//! best-effort CLOSE frame before tearing the transport down.

mod close;
mod codec;
mod driver;
mod endpoint;
mod error;
mod executor;
mod extensions;
mod flusher;
mod frame;
mod id;
mod policy;
mod pool;
mod read_pump;
mod state;

pub use close::{CloseInfo, StatusCode};
pub use codec::{Generator, ParseOutcome, Parser};
pub use driver::ConnectionDriver;
pub use endpoint::Endpoint;
pub use error::{DriverError, Result};
pub use executor::Executor;
pub use extensions::{ExtensionChain, FnCompletion, FrameCompletion, FrameSink, IdentityChain};
pub use flusher::{BatchMode, FrameFlusher};
pub use frame::{BasicFrame, OpCode, WsFrame};
pub use id::ConnectionId;
pub use policy::{Behavior, Policy, MIN_BUFFER_SIZE};
pub use pool::{BufferPool, HeapBufferPool, PooledBuffer};
pub use read_pump::{ReadPump, ReadPumpReactor, SuspendHandle};
pub use state::{ConnectionState, IoStateMachine};
