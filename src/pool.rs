//! Buffer pool contract (§6, C1) and the RAII wrapper that guarantees each
//! acquired buffer is released exactly once.

use bytes::BytesMut;

/// `acquire(size, direct) -> buffer`, `release(buffer)`.
///
/// Implementations need not make `release` idempotent: the driver guarantees
/// each acquired buffer flows through exactly one `release` call (the same
/// discipline `rama-http-core`'s `Buffered<I>` applies to its own read buffer).
pub trait BufferPool: Send + Sync + 'static {
    fn acquire(&self, size: usize, direct: bool) -> BytesMut;
    fn release(&self, buffer: BytesMut);
}

/// A pool backed by plain heap allocation. Sufficient for tests and for
/// callers who don't need cross-connection buffer reuse.
#[derive(Debug, Default)]
pub struct HeapBufferPool;

impl BufferPool for HeapBufferPool {
    fn acquire(&self, size: usize, _direct: bool) -> BytesMut {
        BytesMut::with_capacity(size)
    }

    fn release(&self, _buffer: BytesMut) {}
}

/// Owns a buffer acquired from a [`BufferPool`] and releases it back on drop
/// (or early, via [`PooledBuffer::release`]) — at most once, matching the
/// "network buffer" lifecycle in §3.
pub struct PooledBuffer<'p> {
    pool: &'p dyn BufferPool,
    buffer: Option<BytesMut>,
}

impl<'p> PooledBuffer<'p> {
    #[must_use]
    pub fn acquire(pool: &'p dyn BufferPool, size: usize, direct: bool) -> Self {
        Self {
            pool,
            buffer: Some(pool.acquire(size, direct)),
        }
    }

    #[must_use]
    pub fn get_mut(&mut self) -> &mut BytesMut {
        self.buffer
            .as_mut()
            .expect("PooledBuffer used after release")
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.buffer.is_none()
    }

    /// Releases the buffer back to the pool now, rather than on drop.
    pub fn release(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            self.pool.release(buffer);
        }
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
