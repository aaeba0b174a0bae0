//! The duplex transport contract (§6, C4): non-blocking fill/flush, output
//! shutdown, full close, idle-timeout signal, read-readiness notification.

use std::net::SocketAddr;

use bytes::BytesMut;

use crate::error::Result;

/// A non-blocking duplex transport endpoint.
///
/// Implementations are expected to be cheap to clone or otherwise shareable
/// across the read pump and flusher (e.g. `Arc<Mutex<TcpStream>>`, or a
/// split reader/writer pair) — this trait only specifies the operations,
/// not the concurrency strategy of a particular transport.
///
/// The driver holds its endpoint behind a concrete type parameter rather
/// than `dyn Endpoint`, so these methods are plain `async fn`s in the
/// trait (stable since 1.75) rather than requiring a boxing adapter.
pub trait Endpoint: Send + Sync + 'static {
    /// Read available bytes into `buffer`. Returns `Ok(n)` with `n >= 0`
    /// bytes appended, or a negative-EOF is represented as `Ok(0)` combined
    /// with [`Endpoint::is_eof`] becoming true after the call (mirrors a
    /// non-blocking `fill` that distinguishes "no bytes right now" from
    /// "the peer is gone" only via a side channel, since Rust's
    /// `AsyncRead::read` already folds EOF into `Ok(0)`).
    async fn fill(&self, buffer: &mut BytesMut) -> Result<usize>;

    /// True once `fill` has observed EOF on this endpoint.
    fn is_eof(&self) -> bool;

    /// Registers interest in the next readability notification, following a
    /// `fill` call that returned zero bytes without reaching EOF. For a
    /// `tokio`-native transport this can be a no-op (awaiting `fill` again
    /// already re-arms readiness under the hood); it exists so the read
    /// pump's "zero-fill always precedes a fill-interest registration"
    /// invariant (§8) is independently observable in tests.
    fn fill_interested(&self) {}

    /// Write `data` to the transport and wait until the kernel has accepted
    /// all of it. Returns `Ok(())` only when every byte was handed off.
    async fn flush(&self, data: &[u8]) -> Result<()>;

    /// Half-close the write side only (e.g. TCP `shutdown(Write)`, or a TLS
    /// `close_notify`), leaving reads possible until the peer closes too.
    async fn shutdown_output(&self) -> Result<()>;

    /// Fully tear down the transport.
    async fn close(&self) -> Result<()>;

    /// Forward a new idle timeout to the transport's own timer.
    fn set_idle_timeout(&self, timeout: Option<std::time::Duration>);

    fn local_addr(&self) -> SocketAddr;
    fn remote_addr(&self) -> SocketAddr;
}
