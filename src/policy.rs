//! Connection policy: the read-only configuration record of §3.

use std::time::Duration;

/// The maximum frame-header length the generator may produce. Buffers must
/// be at least this large so a single header is never split across fills.
pub const MIN_BUFFER_SIZE: usize = 14;

const DEFAULT_INPUT_BUFFER_SIZE: usize = 8 * 1024;
const DEFAULT_OUTPUT_BUFFER_SIZE: usize = 8 * 1024;
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Which side of the handshake this connection plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Client,
    Server,
}

/// Read-only configuration for a connection, built once via the `with_*`
/// builder methods and handed to the driver at construction time.
#[derive(Debug, Clone)]
pub struct Policy {
    behavior: Behavior,
    input_buffer_size: usize,
    output_buffer_size: usize,
    idle_timeout: Duration,
    max_message_size: Option<usize>,
    max_frame_size: Option<usize>,
}

impl Policy {
    #[must_use]
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            input_buffer_size: DEFAULT_INPUT_BUFFER_SIZE,
            output_buffer_size: DEFAULT_OUTPUT_BUFFER_SIZE,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_message_size: None,
            max_frame_size: None,
        }
    }

    #[must_use]
    pub fn client() -> Self {
        Self::new(Behavior::Client)
    }

    #[must_use]
    pub fn server() -> Self {
        Self::new(Behavior::Server)
    }

    /// # Panics
    ///
    /// Panics if `size < MIN_BUFFER_SIZE`. Use
    /// [`crate::driver::ConnectionDriver::set_input_buffer_size`] for a
    /// fallible, post-construction equivalent.
    #[must_use]
    pub fn input_buffer_size(mut self, size: usize) -> Self {
        assert!(size >= MIN_BUFFER_SIZE, "input buffer below MIN_BUFFER_SIZE");
        self.input_buffer_size = size;
        self
    }

    #[must_use]
    pub fn output_buffer_size(mut self, size: usize) -> Self {
        assert!(size >= MIN_BUFFER_SIZE, "output buffer below MIN_BUFFER_SIZE");
        self.output_buffer_size = size;
        self
    }

    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = Some(size);
        self
    }

    #[must_use]
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    #[must_use]
    pub fn behavior(&self) -> Behavior {
        self.behavior
    }

    #[must_use]
    pub fn input_buffer_size_bytes(&self) -> usize {
        self.input_buffer_size
    }

    #[must_use]
    pub fn output_buffer_size_bytes(&self) -> usize {
        self.output_buffer_size
    }

    #[must_use]
    pub fn idle_timeout_duration(&self) -> Duration {
        self.idle_timeout
    }

    #[must_use]
    pub fn max_message_size_bytes(&self) -> Option<usize> {
        self.max_message_size
    }

    #[must_use]
    pub fn max_frame_size_bytes(&self) -> Option<usize> {
        self.max_frame_size
    }
}

impl Default for Policy {
    fn default() -> Self {
        Self::server()
    }
}
