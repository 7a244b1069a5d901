//! Buffered reader/writer convenience on top of [`SerialTransport`].
//!
//! For callers that want a byte queue instead of implementing
//! [`Protocol`](crate::core::Protocol) themselves: [`open_streams`] wires
//! an internal protocol to a new transport and hands back a
//! [`StreamReader`] / [`StreamWriter`] pair.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};

use crate::core::{Device, DeviceError, Protocol, Reactor, TransportError};
use crate::transport::{SerialTransport, TransportConfig};

/// Open a transport over `device` and return a buffered stream pair.
pub fn open_streams(
    reactor: Rc<dyn Reactor>,
    device: Box<dyn Device>,
    config: TransportConfig,
) -> Result<(StreamReader, StreamWriter), TransportError> {
    let state = Rc::new(RefCell::new(StreamState::default()));
    let protocol = Rc::new(StreamProtocol {
        state: Rc::clone(&state),
    });
    let transport = SerialTransport::new(reactor, protocol, device, config)?;
    Ok((StreamReader { state }, StreamWriter { transport }))
}

#[derive(Debug, Default)]
struct StreamState {
    received: BytesMut,
    closed: bool,
    error: Option<DeviceError>,
}

/// Internal protocol feeding the reader's byte queue.
#[derive(Debug)]
struct StreamProtocol {
    state: Rc<RefCell<StreamState>>,
}

impl Protocol for StreamProtocol {
    fn connection_made(&self, _transport: Rc<SerialTransport>) {}

    fn data_received(&self, data: &[u8]) {
        self.state.borrow_mut().received.extend_from_slice(data);
    }

    fn connection_lost(&self, error: Option<DeviceError>) {
        let mut state = self.state.borrow_mut();
        state.closed = true;
        state.error = error;
    }
}

/// Pull side of a stream pair: a byte queue filled by the transport.
#[derive(Debug)]
pub struct StreamReader {
    state: Rc<RefCell<StreamState>>,
}

impl StreamReader {
    /// Take up to `max` buffered bytes.
    ///
    /// Returns `Ok(None)` when nothing is buffered right now; once the
    /// transport is gone, buffered data is still drained first, then a
    /// stored fatal error (if any) is returned.
    pub fn try_read(&self, max: usize) -> Result<Option<Bytes>, DeviceError> {
        let mut state = self.state.borrow_mut();
        if !state.received.is_empty() {
            let n = state.received.len().min(max);
            return Ok(Some(state.received.split_to(n).freeze()));
        }
        if let Some(err) = &state.error {
            return Err(err.clone());
        }
        Ok(None)
    }

    /// Take one full line (terminator included), if one is buffered.
    pub fn try_read_line(&self) -> Option<Bytes> {
        let mut state = self.state.borrow_mut();
        let pos = state.received.iter().position(|&b| b == b'\n')?;
        Some(state.received.split_to(pos + 1).freeze())
    }

    /// Number of buffered bytes.
    pub fn buffered(&self) -> usize {
        self.state.borrow().received.len()
    }

    /// Whether the transport has terminated.
    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Whether the stream has ended cleanly with no bytes left.
    pub fn at_eof(&self) -> bool {
        let state = self.state.borrow();
        state.closed && state.received.is_empty() && state.error.is_none()
    }
}

/// Push side of a stream pair: thin handle over the transport.
#[derive(Debug)]
pub struct StreamWriter {
    transport: Rc<SerialTransport>,
}

impl StreamWriter {
    /// Queue `data` for transmission.
    pub fn write(&self, data: impl Into<Bytes>) {
        self.transport.write(data);
    }

    /// Exact number of buffered, not-yet-transferred bytes.
    pub fn buffered(&self) -> usize {
        self.transport.write_buffer_size()
    }

    /// Close gracefully after the backlog drains.
    pub fn close(&self) {
        self.transport.close();
    }

    /// Close immediately, discarding the backlog.
    pub fn abort(&self) {
        self.transport.abort();
    }

    /// Whether the transport is closing or closed.
    pub fn is_closing(&self) -> bool {
        self.transport.is_closing()
    }

    /// The transport behind this writer.
    pub fn transport(&self) -> &Rc<SerialTransport> {
        &self.transport
    }
}
