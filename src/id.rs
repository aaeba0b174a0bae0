//! Human-readable connection identity.

use std::fmt;
use std::net::SocketAddr;

/// `lip:lport->rip:rport`, immutable after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    #[must_use]
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self(format!("{local}->{remote}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
