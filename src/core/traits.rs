//! Capability traits consumed and driven by the transport.
//!
//! Three collaborators meet at the transport boundary:
//!
//! - [`Device`]: the non-blocking byte channel (the serial port itself)
//! - [`Protocol`]: the user code driven through the connection callbacks
//! - [`Reactor`]: the single-threaded event loop hosting the transport

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::core::error::{CallbackError, DeviceError, ErrorReport};
use crate::transport::SerialTransport;

/// Identifier of a waitable OS handle usable for readiness registration.
///
/// On platforms with descriptor-based readiness this wraps the raw file
/// descriptor. A device that cannot produce one forces the transport onto
/// the timer-polling readiness strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitHandle(pub u64);

/// Identifier of a pending timer scheduled via [`Reactor::call_later`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// A non-blocking byte-oriented communication device.
///
/// All I/O methods must never block the caller: `read` and `write` either
/// transfer immediately available bytes or fail with a transient error
/// kind. `flush` is the exception; it may block on driver buffers and is
/// only ever invoked from an off-reactor worker during shutdown.
///
/// `Send` is required so the shutdown sequence can hand the device to a
/// worker for the final flush and release.
pub trait Device: Send {
    /// Read up to `buf.len()` bytes. Returns the number of bytes read;
    /// zero means no data is currently available.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError>;

    /// Write as many bytes of `data` as the device currently accepts and
    /// return that count.
    fn write(&mut self, data: &[u8]) -> Result<usize, DeviceError>;

    /// Block until the device's internal output buffer has drained.
    ///
    /// Only called off the reactor thread.
    fn flush(&mut self) -> Result<(), DeviceError>;

    /// Release the device.
    fn close(&mut self) -> Result<(), DeviceError>;

    /// Number of bytes currently queued for reading.
    fn bytes_to_read(&mut self) -> Result<usize, DeviceError>;

    /// Number of bytes currently queued for transmission.
    fn bytes_to_write(&mut self) -> Result<usize, DeviceError>;

    /// Waitable handle for readiness registration, when the platform can
    /// deliver descriptor readiness for this device class.
    fn wait_handle(&self) -> Option<WaitHandle>;
}

/// Connection callbacks driven by the transport.
///
/// Methods take `&self`: a protocol lives behind an `Rc` shared between
/// the transport and the application, and is free to call back into the
/// transport (for example `write` or `close` from inside
/// [`data_received`](Protocol::data_received)). Implementations keep
/// their mutable state in `Cell`/`RefCell` fields.
///
/// Callback ordering is guaranteed: `connection_made` strictly before any
/// `data_received`, and `connection_lost` exactly once, last.
pub trait Protocol: fmt::Debug {
    /// The transport is ready; the protocol may start writing.
    fn connection_made(&self, transport: Rc<SerialTransport>);

    /// Bytes arrived from the device.
    fn data_received(&self, data: &[u8]);

    /// The transport is gone. `error` carries the fatal device error when
    /// the loss was not a requested shutdown.
    fn connection_lost(&self, error: Option<DeviceError>);

    /// The write buffer crossed the high watermark; stop producing.
    fn pause_writing(&self) -> Result<(), CallbackError> {
        Ok(())
    }

    /// The write buffer drained to the low watermark; producing may resume.
    fn resume_writing(&self) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// The single-threaded cooperative event loop hosting the transport.
///
/// The transport consumes this surface and nothing else: deferred FIFO
/// callbacks, cancellable timers, per-direction readiness registration,
/// off-reactor dispatch of blocking work, and a structured error channel.
///
/// At most one reader and one writer callback are registered per handle at
/// a time; once `remove_reader`/`remove_writer` returns, the revoked
/// callback must not fire again.
pub trait Reactor {
    /// Enqueue `callback` to run on the next loop iteration. Callbacks
    /// run in FIFO order.
    fn call_soon(&self, callback: Box<dyn FnOnce()>);

    /// Schedule `callback` to run once after `delay`.
    fn call_later(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId;

    /// Cancel a pending timer. Cancelling an already-fired timer is a
    /// no-op.
    fn cancel_timer(&self, timer: TimerId);

    /// Invoke `callback` whenever `handle` is ready for reading.
    fn add_reader(&self, handle: WaitHandle, callback: Box<dyn Fn()>);

    /// Revoke the read-readiness callback for `handle`.
    fn remove_reader(&self, handle: WaitHandle);

    /// Invoke `callback` whenever `handle` is ready for writing.
    fn add_writer(&self, handle: WaitHandle, callback: Box<dyn Fn()>);

    /// Revoke the write-readiness callback for `handle`.
    fn remove_writer(&self, handle: WaitHandle);

    /// Run `work` on an off-reactor worker, then enqueue `done` on the
    /// reactor once `work` has completed.
    fn dispatch_blocking(&self, work: Box<dyn FnOnce() + Send>, done: Box<dyn FnOnce()>);

    /// Deliver a structured failure report to the loop's error channel.
    fn report_error(&self, report: ErrorReport);
}
