//! Task dispatch abstraction (§5): wraps either a plain `tokio::spawn` or a
//! graceful-shutdown-aware spawn, so the driver does not need to know which
//! one a particular deployment uses.

use tokio_graceful::ShutdownGuard;

/// Spawns the read pump, the flusher's flush-turn tasks, and any
/// frame-completion resumption work.
#[derive(Default, Clone)]
pub struct Executor {
    guard: Option<ShutdownGuard>,
}

impl Executor {
    #[must_use]
    pub fn new() -> Self {
        Self { guard: None }
    }

    /// Tasks spawned through this executor are awaited gracefully when the
    /// given shutdown guard is triggered.
    #[must_use]
    pub fn graceful(guard: ShutdownGuard) -> Self {
        Self { guard: Some(guard) }
    }

    pub fn spawn_task<Fut>(&self, future: Fut) -> tokio::task::JoinHandle<Fut::Output>
    where
        Fut: Future<Output: Send + 'static> + Send + 'static,
    {
        match &self.guard {
            Some(guard) => guard.spawn_task(future),
            None => tokio::spawn(future),
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("graceful", &self.guard.is_some())
            .finish()
    }
}
