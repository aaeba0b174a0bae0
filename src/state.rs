//! The IO state machine (§4.1, C5): the authoritative connection state.

use parking_lot::Mutex;

use crate::close::{CloseInfo, StatusCode};
use crate::error::DriverError;

/// `{CONNECTING, OPEN, CLOSING, CLOSED}`, monotone along this order (skipping
/// `CLOSING` is permitted on abnormal paths).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

struct Inner {
    state: ConnectionState,
    close_info: Option<CloseInfo>,
    local_close_initiated: bool,
    remote_close_initiated: bool,
    abnormal: bool,
    io_failure: Option<String>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: ConnectionState::Connecting,
            close_info: None,
            local_close_initiated: false,
            remote_close_initiated: false,
            abnormal: false,
            io_failure: None,
        }
    }
}

type Listener = std::sync::Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Authoritative connection lifecycle state, with listener notification.
///
/// The internal lock (`parking_lot::Mutex`, matching the workspace's choice
/// elsewhere for short, uncontended critical sections) only ever guards the
/// mutation of `Inner`; listener closures are invoked after it is released,
/// so a listener that calls back into another event method observes the
/// already-updated state rather than deadlocking on a held lock (§4.1).
pub struct IoStateMachine {
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<Listener>>,
}

impl IoStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Registers a listener, invoked (in registration order) exactly once
    /// per state transition, with the new state.
    pub fn add_listener<L>(&self, listener: L)
    where
        L: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.listeners.lock().push(std::sync::Arc::new(listener));
    }

    fn notify(&self, new_state: ConnectionState) {
        // Snapshot the listener list and drop the lock before invoking any
        // callback, so a listener that re-enters this state machine (e.g.
        // to initiate another close) never has to acquire a lock we're
        // still holding.
        let snapshot: Vec<Listener> = self.listeners.lock().clone();
        for listener in &snapshot {
            listener(new_state);
        }
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    #[must_use]
    pub fn close_info(&self) -> Option<CloseInfo> {
        self.inner.lock().close_info.clone()
    }

    #[must_use]
    pub fn was_abnormal_close(&self) -> bool {
        self.inner.lock().abnormal
    }

    #[must_use]
    pub fn was_remote_close_initiated(&self) -> bool {
        self.inner.lock().remote_close_initiated
    }

    pub fn on_opened(&self) {
        let transitioned = {
            let mut guard = self.inner.lock();
            if guard.state == ConnectionState::Connecting {
                guard.state = ConnectionState::Open;
                true
            } else {
                false
            }
        };
        if transitioned {
            self.notify(ConnectionState::Open);
        }
    }

    pub fn on_close_local(&self, close_info: CloseInfo) {
        self.on_close(close_info, true);
    }

    pub fn on_close_remote(&self, close_info: CloseInfo) {
        self.on_close(close_info, false);
    }

    fn on_close(&self, close_info: CloseInfo, local: bool) {
        let notification = {
            let mut guard = self.inner.lock();
            if !matches!(guard.state, ConnectionState::Open | ConnectionState::Closing) {
                return;
            }
            if local {
                guard.local_close_initiated = true;
            } else {
                guard.remote_close_initiated = true;
            }
            if guard.close_info.is_none() {
                guard.close_info = Some(close_info);
            }
            match guard.state {
                ConnectionState::Open => {
                    guard.state = ConnectionState::Closing;
                    Some(ConnectionState::Closing)
                }
                ConnectionState::Closing
                    if guard.local_close_initiated && guard.remote_close_initiated =>
                {
                    guard.state = ConnectionState::Closed;
                    Some(ConnectionState::Closed)
                }
                _ => None,
            }
        };
        if let Some(new_state) = notification {
            self.notify(new_state);
        }
    }

    pub fn on_abnormal_close(&self, close_info: CloseInfo) {
        let transitioned = {
            let mut guard = self.inner.lock();
            if guard.state == ConnectionState::Closed {
                return;
            }
            if guard.close_info.is_none() {
                guard.close_info = Some(close_info);
            }
            guard.abnormal = true;
            guard.state = ConnectionState::Closed;
            true
        };
        if transitioned {
            self.notify(ConnectionState::Closed);
        }
    }

    pub fn on_read_failure(&self, error: &DriverError) {
        self.on_io_failure(error);
    }

    pub fn on_write_failure(&self, error: &DriverError) {
        self.on_io_failure(error);
    }

    fn on_io_failure(&self, error: &DriverError) {
        {
            let mut guard = self.inner.lock();
            if guard.state == ConnectionState::Closed {
                return;
            }
            guard.io_failure = Some(error.to_string());
        }
        let status = error.close_status();
        let close_info = CloseInfo::new(status, Some(error.to_string()));
        self.on_abnormal_close(close_info);
    }

    pub fn on_disconnected(&self) {
        let transitioned = {
            let mut guard = self.inner.lock();
            if guard.state == ConnectionState::Closed {
                false
            } else {
                guard.state = ConnectionState::Closed;
                true
            }
        };
        if transitioned {
            self.notify(ConnectionState::Closed);
        }
    }
}

impl Default for IoStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
