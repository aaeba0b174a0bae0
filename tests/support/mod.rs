//! Shared mock collaborators for the end-to-end scenario tests in
//! `tests/scenarios.rs`: a scriptable [`Endpoint`], a couple of small
//! [`Parser`]s, a matching [`Generator`], and a frame-recording
//! [`ExtensionChain`].

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;

use ws_core::{
    BasicFrame, BatchMode, DriverError, Endpoint, ExtensionChain, FrameCompletion, FrameSink, Generator, OpCode,
    ParseOutcome, Parser, Result, WsFrame,
};

/// One scripted outcome for a single `Endpoint::fill` call.
pub enum Step {
    Data(&'static [u8]),
    Zero,
    Eof,
    Err,
}

/// A non-blocking transport whose `fill`/`flush` behaviour is scripted ahead
/// of time. Once the script is exhausted, `fill` blocks for the rest of the
/// test rather than spuriously reporting EOF or zero bytes.
pub struct MockEndpoint {
    steps: Mutex<VecDeque<Step>>,
    eof: AtomicBool,
    pub write_count: AtomicUsize,
    pub shutdown_output_calls: AtomicUsize,
    pub close_calls: AtomicUsize,
    pub last_write: Mutex<Vec<u8>>,
    pub fail_next_flush: AtomicBool,
}

impl MockEndpoint {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            eof: AtomicBool::new(false),
            write_count: AtomicUsize::new(0),
            shutdown_output_calls: AtomicUsize::new(0),
            close_calls: AtomicUsize::new(0),
            last_write: Mutex::new(Vec::new()),
            fail_next_flush: AtomicBool::new(false),
        }
    }

    /// A transport that never produces a byte of input within a test's
    /// lifetime -- useful when a scenario only cares about the write side.
    pub fn idle() -> Self {
        Self::new(Vec::new())
    }
}

impl Endpoint for MockEndpoint {
    async fn fill(&self, buffer: &mut BytesMut) -> Result<usize> {
        let step = self.steps.lock().pop_front();
        match step {
            Some(Step::Data(bytes)) => {
                buffer.extend_from_slice(bytes);
                Ok(bytes.len())
            }
            Some(Step::Zero) => Ok(0),
            Some(Step::Eof) => {
                self.eof.store(true, Ordering::SeqCst);
                Ok(0)
            }
            Some(Step::Err) => Err(DriverError::io(std::io::Error::other("boom"))),
            None => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(0)
            }
        }
    }

    fn is_eof(&self) -> bool {
        self.eof.load(Ordering::SeqCst)
    }

    async fn flush(&self, data: &[u8]) -> Result<()> {
        if self.fail_next_flush.swap(false, Ordering::SeqCst) {
            return Err(DriverError::io(std::io::Error::other("write failed")));
        }
        self.write_count.fetch_add(1, Ordering::SeqCst);
        *self.last_write.lock() = data.to_vec();
        Ok(())
    }

    async fn shutdown_output(&self) -> Result<()> {
        self.shutdown_output_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
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

/// Minimal unmasked header: opcode byte + one length byte, same shape used
/// by the in-crate unit tests.
pub struct NoopGenerator;

impl Generator<BasicFrame> for NoopGenerator {
    fn generate_header_bytes(&mut self, frame: &BasicFrame) -> Vec<u8> {
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

/// Splits incoming bytes on a `0x00` delimiter into text frames. Restartable:
/// a delimiter that hasn't arrived yet just leaves its prefix in the buffer
/// for the next call.
pub struct DelimitedTextParser;

impl Parser<BasicFrame> for DelimitedTextParser {
    fn parse(&mut self, buffer: &mut BytesMut, on_frame: &mut dyn FnMut(BasicFrame) -> bool) -> Result<ParseOutcome> {
        while let Some(pos) = buffer.iter().position(|&b| b == 0) {
            let chunk = buffer.split_to(pos);
            buffer.advance(1);
            on_frame(BasicFrame::text(String::from_utf8_lossy(&chunk).into_owned()));
        }
        Ok(ParseOutcome::Continue)
    }
}

/// Always raises a protocol error, regardless of what arrived.
pub struct FailingParser;

impl Parser<BasicFrame> for FailingParser {
    fn parse(&mut self, _buffer: &mut BytesMut, _on_frame: &mut dyn FnMut(BasicFrame) -> bool) -> Result<ParseOutcome> {
        Err(DriverError::protocol("reserved bit set"))
    }
}

/// A parser that never produces a frame or an error; used when a scenario's
/// endpoint never yields real application bytes.
pub struct NeverParser;

impl Parser<BasicFrame> for NeverParser {
    fn parse(&mut self, _buffer: &mut BytesMut, _on_frame: &mut dyn FnMut(BasicFrame) -> bool) -> Result<ParseOutcome> {
        Ok(ParseOutcome::Continue)
    }
}

/// An extension chain that just records every inbound frame's payload as
/// text and otherwise behaves like [`ws_core::IdentityChain`].
#[derive(Default)]
pub struct RecordingChain {
    pub frames: Mutex<Vec<String>>,
}

impl ExtensionChain<BasicFrame> for RecordingChain {
    fn incoming_frame(&self, frame: BasicFrame, cb: Box<dyn FrameCompletion<BasicFrame>>) -> bool {
        self.frames.lock().push(String::from_utf8_lossy(frame.payload()).into_owned());
        cb.succeed();
        true
    }

    fn outgoing_frame(
        &self,
        frame: BasicFrame,
        cb: Box<dyn FrameCompletion<BasicFrame>>,
        mode: BatchMode,
        sink: &dyn FrameSink<BasicFrame>,
    ) {
        sink.enqueue(frame, cb, mode);
    }
}

/// Builds the raw payload of a CLOSE frame a peer would have sent, as the
/// parser would hand it to `ConnectionDriver::on_frame`.
pub fn close_frame_from_peer(code: u16, reason: &str) -> BasicFrame {
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    BasicFrame::new(OpCode::Close, true, payload)
}
