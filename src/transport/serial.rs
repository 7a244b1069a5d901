//! The serial transport itself.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, trace};

use crate::core::constants::{DEFAULT_MAX_OUT_WAITING, DEFAULT_POLL_INTERVAL, MAX_READ_CHUNK};
use crate::core::{
    CallbackError, Device, DeviceError, ErrorReport, Protocol, Reactor, TransportError,
};
use crate::transport::buffer::WriteBuffer;
use crate::transport::lifecycle::{FlowState, Lifecycle};
use crate::transport::readiness::{build_strategy, ReadinessMode, ReadinessStrategy};

/// Tuning options for a [`SerialTransport`].
///
/// The defaults match the crate constants; every knob can be overridden
/// through the builder methods.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    high_water: Option<usize>,
    low_water: Option<usize>,
    max_read_chunk: usize,
    poll_interval: Duration,
    max_out_waiting: usize,
    readiness: ReadinessMode,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            high_water: None,
            low_water: None,
            max_read_chunk: MAX_READ_CHUNK,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_out_waiting: DEFAULT_MAX_OUT_WAITING,
            readiness: ReadinessMode::Auto,
        }
    }

    /// Set the high watermark for write flow control.
    pub fn high_water(mut self, limit: usize) -> Self {
        self.high_water = Some(limit);
        self
    }

    /// Set the low watermark for write flow control.
    pub fn low_water(mut self, limit: usize) -> Self {
        self.low_water = Some(limit);
        self
    }

    /// Set the maximum bytes read per read-ready callback.
    pub fn max_read_chunk(mut self, size: usize) -> Self {
        self.max_read_chunk = size;
        self
    }

    /// Set the period of the timer-polling readiness strategy.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the outbound queue-depth ceiling used by the polling write
    /// predicate.
    pub fn max_out_waiting(mut self, ceiling: usize) -> Self {
        self.max_out_waiting = ceiling;
        self
    }

    /// Select the readiness strategy.
    pub fn readiness(mut self, mode: ReadinessMode) -> Self {
        self.readiness = mode;
        self
    }
}

/// A transport adapting a non-blocking serial device to a callback-driven
/// protocol on a cooperative event loop.
///
/// The transport owns the device exclusively, buffers outbound chunks,
/// applies watermark-based backpressure to the producing protocol, and
/// sequences a graceful or immediate shutdown against in-flight writes.
/// All of its state lives on the reactor thread; public operations and
/// readiness callbacks may freely interleave but never run concurrently.
///
/// Constructing a transport schedules two deferred callbacks, in order:
/// `connection_made` on the protocol, then the start of read monitoring.
/// A protocol therefore always observes `connection_made` before any
/// `data_received`.
pub struct SerialTransport {
    reactor: Rc<dyn Reactor>,
    protocol: RefCell<Option<Rc<dyn Protocol>>>,
    device: RefCell<Option<Box<dyn Device>>>,
    state: Cell<Lifecycle>,
    flow: Cell<FlowState>,
    buffer: RefCell<WriteBuffer>,
    readiness: Rc<dyn ReadinessStrategy>,
    read_scratch: RefCell<Vec<u8>>,
    weak_self: Weak<SerialTransport>,
}

impl SerialTransport {
    /// Create a transport over `device`, driving `protocol` on `reactor`.
    ///
    /// Fails only on an invalid watermark configuration.
    pub fn new(
        reactor: Rc<dyn Reactor>,
        protocol: Rc<dyn Protocol>,
        device: Box<dyn Device>,
        config: TransportConfig,
    ) -> Result<Rc<Self>, TransportError> {
        let mut buffer = WriteBuffer::new();
        buffer.set_watermarks(config.high_water, config.low_water)?;
        let handle = device.wait_handle();

        let transport = Rc::new_cyclic(|weak: &Weak<SerialTransport>| {
            let readiness = build_strategy(
                config.readiness,
                Rc::clone(&reactor),
                weak.clone(),
                handle,
                config.poll_interval,
                config.max_out_waiting,
            );
            Self {
                reactor,
                protocol: RefCell::new(Some(protocol)),
                device: RefCell::new(Some(device)),
                state: Cell::new(Lifecycle::Open),
                flow: Cell::new(FlowState::Flowing),
                buffer: RefCell::new(buffer),
                readiness,
                read_scratch: RefCell::new(vec![0u8; config.max_read_chunk]),
                weak_self: weak.clone(),
            }
        });

        let startup = Rc::clone(&transport);
        transport
            .reactor
            .call_soon(Box::new(move || startup.notify_connection_made()));
        let arm = Rc::downgrade(&transport);
        transport.reactor.call_soon(Box::new(move || {
            if let Some(transport) = arm.upgrade() {
                transport.readiness.ensure_reader();
            }
        }));

        Ok(transport)
    }

    // -------------------------------------------------------------------------
    // Public operations
    // -------------------------------------------------------------------------

    /// Queue `data` for transmission.
    ///
    /// Never blocks. When the buffer is empty the chunk is offered to the
    /// device immediately; otherwise it is appended behind the pending
    /// backlog. Writes made once the transport is closing are silently
    /// dropped.
    pub fn write(&self, data: impl Into<Bytes>) {
        if !self.state.get().accepts_writes() {
            trace!("write ignored, transport is closing");
            return;
        }
        let chunk: Bytes = data.into();
        if self.buffer.borrow().is_empty() {
            self.transfer(chunk);
        } else {
            self.buffer.borrow_mut().push(chunk);
            self.maybe_pause_protocol();
        }
    }

    /// Close the transport gracefully.
    ///
    /// Idempotent. Inbound delivery stops immediately; buffered output
    /// keeps draining, and `connection_lost(None)` fires once the backlog
    /// has been written out.
    pub fn close(&self) {
        if self.state.get().is_closing() {
            return;
        }
        debug!("closing serial transport");
        self.state.set(Lifecycle::Closing);
        self.readiness.remove_reader();
        if self.buffer.borrow().is_empty() {
            self.finalize(None);
        }
    }

    /// Close the transport immediately.
    ///
    /// Idempotent. Buffered-but-unsent data is discarded and
    /// `connection_lost(None)` fires without waiting for a drain.
    pub fn abort(&self) {
        self.abort_with(None);
    }

    /// Stop delivering inbound data to the protocol.
    pub fn pause_reading(&self) {
        self.readiness.remove_reader();
    }

    /// Resume delivering inbound data to the protocol.
    pub fn resume_reading(&self) {
        self.readiness.ensure_reader();
    }

    /// Configure the flow-control watermarks.
    ///
    /// Missing values are derived (`high = 4 * low`, `low = high / 4`,
    /// 64 KiB when both are missing). Rejects `high < low` without
    /// touching the previous configuration or any buffered data.
    pub fn set_write_buffer_limits(
        &self,
        high: Option<usize>,
        low: Option<usize>,
    ) -> Result<(), TransportError> {
        self.buffer.borrow_mut().set_watermarks(high, low)?;
        self.maybe_pause_protocol();
        Ok(())
    }

    /// Exact number of buffered, not-yet-transferred bytes.
    ///
    /// The buffer is unbounded; the result may exceed the high watermark,
    /// which is only consulted at mutation points.
    pub fn write_buffer_size(&self) -> usize {
        self.buffer.borrow().total_bytes()
    }

    /// Current `(high, low)` watermark pair.
    pub fn write_buffer_limits(&self) -> (usize, usize) {
        let buffer = self.buffer.borrow();
        (buffer.high_water(), buffer.low_water())
    }

    /// Discard all buffered output without closing the transport.
    ///
    /// Stops write monitoring and un-pauses the producer if the dropped
    /// backlog was what paused it. During a graceful close, discarding the
    /// backlog completes the close.
    pub fn flush(&self) {
        if self.state.get() == Lifecycle::Closed {
            return;
        }
        self.readiness.remove_writer();
        self.buffer.borrow_mut().clear();
        if self.state.get() == Lifecycle::Closing {
            self.finalize(None);
            return;
        }
        self.maybe_resume_protocol();
    }

    /// Whether the transport is closing or closed.
    pub fn is_closing(&self) -> bool {
        self.state.get().is_closing()
    }

    /// Serial channels have no end-of-file concept.
    pub fn can_write_eof(&self) -> bool {
        false
    }

    /// Always fails: serial channels cannot signal end-of-file.
    pub fn write_eof(&self) -> Result<(), TransportError> {
        Err(TransportError::EofUnsupported)
    }

    /// The protocol currently addressed by this transport.
    pub fn protocol(&self) -> Option<Rc<dyn Protocol>> {
        self.protocol.borrow().clone()
    }

    /// Replace the addressed protocol. Callbacks are not buffered across
    /// the swap. No-op once the transport is closed.
    pub fn set_protocol(&self, protocol: Rc<dyn Protocol>) {
        if self.state.get() == Lifecycle::Closed {
            return;
        }
        *self.protocol.borrow_mut() = Some(protocol);
    }

    /// Access the underlying device, if it has not been released yet.
    ///
    /// The device stays exclusively owned by the transport; access is
    /// scoped to the closure.
    pub fn with_device<T>(&self, f: impl FnOnce(&mut dyn Device) -> T) -> Option<T> {
        self.device.borrow_mut().as_mut().map(|device| f(device.as_mut()))
    }

    /// The reactor this transport runs on.
    pub fn reactor(&self) -> Rc<dyn Reactor> {
        Rc::clone(&self.reactor)
    }

    // -------------------------------------------------------------------------
    // Readiness handlers
    // -------------------------------------------------------------------------

    /// The device signalled read readiness: pull one chunk and deliver it.
    pub(crate) fn handle_read_ready(&self) {
        if !self.state.get().delivers_reads() {
            return;
        }
        let result = {
            let mut device = self.device.borrow_mut();
            let Some(device) = device.as_mut() else {
                return;
            };
            let mut scratch = self.read_scratch.borrow_mut();
            device.read(&mut scratch)
        };
        match result {
            Ok(0) => {}
            Ok(n) => {
                if let Some(protocol) = self.protocol() {
                    let scratch = self.read_scratch.borrow();
                    protocol.data_received(&scratch[..n]);
                }
            }
            Err(err) if err.is_transient() => {}
            Err(err) => self.fatal_error(err, "fatal read error on serial transport"),
        }
    }

    /// The device signalled write readiness: drain the buffered backlog.
    pub(crate) fn handle_write_ready(&self) {
        if !self.state.get().drains_writes() {
            return;
        }
        let Some(chunk) = self.buffer.borrow_mut().take_all() else {
            self.readiness.remove_writer();
            return;
        };
        self.transfer(chunk);
        self.maybe_resume_protocol();
    }

    /// Offer one chunk to the device.
    ///
    /// Transient failures and partial writes requeue the unconsumed bytes
    /// and keep write monitoring armed; a full write while closing with an
    /// empty buffer completes the graceful close.
    fn transfer(&self, chunk: Bytes) {
        let result = match self.device.borrow_mut().as_mut() {
            Some(device) => device.write(&chunk),
            None => return,
        };
        match result {
            Ok(n) if n == chunk.len() => {
                trace!(bytes = n, "chunk fully written");
                if self.buffer.borrow().is_empty() {
                    if self.state.get() == Lifecycle::Closing {
                        self.finalize(None);
                    } else {
                        self.readiness.remove_writer();
                    }
                }
                return;
            }
            Ok(n) => self.buffer.borrow_mut().push(chunk.slice(n..)),
            Err(err) if err.is_transient() => self.buffer.borrow_mut().push(chunk),
            Err(err) => {
                self.fatal_error(err, "fatal write error on serial transport");
                return;
            }
        }
        self.maybe_pause_protocol();
        self.readiness.ensure_writer();
    }

    // -------------------------------------------------------------------------
    // Flow control
    // -------------------------------------------------------------------------

    /// Ask the protocol to pause once the buffered total crosses the high
    /// watermark. Edge-triggered: fires at most once per pause episode.
    fn maybe_pause_protocol(&self) {
        if self.state.get() == Lifecycle::Closed {
            return;
        }
        if self.flow.get() == FlowState::Paused || !self.buffer.borrow().exceeds_high_water() {
            return;
        }
        self.flow.set(FlowState::Paused);
        if let Some(protocol) = self.protocol() {
            if let Err(err) = protocol.pause_writing() {
                self.report_callback_failure("protocol pause_writing() failed", err, &protocol);
            }
        }
    }

    /// Ask a paused protocol to resume once the buffered total has drained
    /// to the low watermark.
    fn maybe_resume_protocol(&self) {
        if self.state.get() == Lifecycle::Closed {
            return;
        }
        if self.flow.get() == FlowState::Flowing || !self.buffer.borrow().at_or_below_low_water() {
            return;
        }
        self.flow.set(FlowState::Flowing);
        if let Some(protocol) = self.protocol() {
            if let Err(err) = protocol.resume_writing() {
                self.report_callback_failure("protocol resume_writing() failed", err, &protocol);
            }
        }
    }

    fn report_callback_failure(
        &self,
        message: &str,
        err: CallbackError,
        protocol: &Rc<dyn Protocol>,
    ) {
        self.reactor.report_error(ErrorReport {
            message: message.to_string(),
            error: TransportError::Callback(err),
            transport: format!("{self:?}"),
            protocol: format!("{protocol:?}"),
        });
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Report a fatal device error on the reactor's error channel, then
    /// abort carrying the error.
    pub(crate) fn fatal_error(&self, err: DeviceError, message: &str) {
        error!(error = %err, "{message}");
        self.reactor.report_error(ErrorReport {
            message: message.to_string(),
            error: TransportError::Device(err.clone()),
            transport: format!("{self:?}"),
            protocol: self
                .protocol()
                .map(|protocol| format!("{protocol:?}"))
                .unwrap_or_else(|| "<none>".to_string()),
        });
        self.abort_with(Some(err));
    }

    fn abort_with(&self, error: Option<DeviceError>) {
        if self.state.get() == Lifecycle::Closed {
            return;
        }
        self.buffer.borrow_mut().clear();
        self.finalize(error);
    }

    /// Commit the transition into `Closed` and schedule the shutdown
    /// sequence. Runs at most once; later calls are no-ops.
    fn finalize(&self, error: Option<DeviceError>) {
        if self.state.get() == Lifecycle::Closed {
            return;
        }
        self.state.set(Lifecycle::Closed);
        self.readiness.remove_reader();
        self.readiness.remove_writer();
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        // Deferred so shutdown never reenters the protocol from inside a
        // readiness callback or public operation.
        self.reactor
            .call_soon(Box::new(move || this.run_shutdown(error)));
    }

    /// First half of shutdown: hand the device to a worker for the
    /// best-effort flush, then continue on the reactor.
    fn run_shutdown(&self, error: Option<DeviceError>) {
        let Some(device) = self.device.borrow_mut().take() else {
            return;
        };
        let slot: Arc<Mutex<Option<Box<dyn Device>>>> = Arc::new(Mutex::new(Some(device)));
        let worker_slot = Arc::clone(&slot);
        let Some(this) = self.weak_self.upgrade() else {
            return;
        };
        self.reactor.dispatch_blocking(
            Box::new(move || {
                // A hot-unplugged device fails to flush; shutdown proceeds.
                if let Ok(mut guard) = worker_slot.lock() {
                    if let Some(device) = guard.as_mut() {
                        let _ = device.flush();
                    }
                }
            }),
            Box::new(move || this.complete_shutdown(slot, error)),
        );
    }

    /// Second half of shutdown: notify the protocol, then release the
    /// device off-reactor and drop the protocol reference.
    fn complete_shutdown(
        &self,
        slot: Arc<Mutex<Option<Box<dyn Device>>>>,
        error: Option<DeviceError>,
    ) {
        debug!("serial transport closed");
        let protocol = self.protocol.borrow_mut().take();
        if let Some(protocol) = protocol {
            protocol.connection_lost(error);
        }
        self.buffer.borrow_mut().clear();
        self.reactor.dispatch_blocking(
            Box::new(move || {
                if let Ok(mut guard) = slot.lock() {
                    if let Some(mut device) = guard.take() {
                        let _ = device.close();
                    }
                }
            }),
            Box::new(|| {}),
        );
    }

    fn notify_connection_made(self: &Rc<Self>) {
        if let Some(protocol) = self.protocol() {
            protocol.connection_made(Rc::clone(self));
        }
    }

    // -------------------------------------------------------------------------
    // Strategy probes
    // -------------------------------------------------------------------------

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.state.get()
    }

    pub(crate) fn bytes_to_read(&self) -> Result<usize, DeviceError> {
        match self.device.borrow_mut().as_mut() {
            Some(device) => device.bytes_to_read(),
            None => Ok(0),
        }
    }

    pub(crate) fn bytes_to_write(&self) -> Result<usize, DeviceError> {
        match self.device.borrow_mut().as_mut() {
            Some(device) => device.bytes_to_write(),
            None => Ok(0),
        }
    }
}

impl fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialTransport")
            .field("state", &self.state.get())
            .field("flow", &self.flow.get())
            .field("buffered", &self.buffer.borrow().total_bytes())
            .finish()
    }
}
