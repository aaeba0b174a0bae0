//! Frame parser and generator contracts (§6, C2).

use bytes::BytesMut;

use crate::frame::WsFrame;

/// Outcome of a single `Parser::parse` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The parser consumed what it could and wants more bytes.
    Continue,
    /// The parser wants the pump to stop delivering, e.g. because a frame
    /// handler deferred completion. The pump resumes it explicitly.
    Stop,
}

/// Incremental, restartable frame parser.
///
/// `parse` synchronously invokes `on_frame` for each complete frame found in
/// `buffer`, draining consumed bytes as it goes.
pub trait Parser<F: WsFrame>: Send + 'static {
    fn parse(
        &mut self,
        buffer: &mut BytesMut,
        on_frame: &mut dyn FnMut(F) -> bool,
    ) -> crate::error::Result<ParseOutcome>;
}

/// Frame generator: produces wire bytes for a frame's header; payload bytes
/// are taken directly from the frame.
pub trait Generator<F: WsFrame>: Send + 'static {
    fn generate_header_bytes(&mut self, frame: &F) -> Vec<u8>;
    fn max_header_length(&self) -> usize;
}
