//! Serial port device backend.
//!
//! Adapts a system serial port (via the `serialport` crate) to the
//! [`Device`] capability: zero-timeout non-blocking reads and writes,
//! queue-depth probes, and a waitable handle on platforms that can deliver
//! descriptor readiness for serial ports (posix). Elsewhere no handle is
//! offered and the transport falls back to timer polling.

use std::fmt;
use std::io::{Read, Write};
#[cfg(unix)]
use std::os::fd::AsRawFd;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::debug;

use crate::core::{Device, DeviceError, WaitHandle};

#[cfg(unix)]
type NativePort = serialport::TTYPort;
#[cfg(windows)]
type NativePort = serialport::COMPort;

/// A system serial port usable as a transport [`Device`].
pub struct SystemSerial {
    port: NativePort,
}

impl fmt::Debug for SystemSerial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemSerial")
            .field("port", &self.port.name())
            .finish()
    }
}

impl SystemSerial {
    /// Open `path` at `baud_rate` with 8N1 framing, no flow control, and a
    /// zero timeout so reads and writes never block.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, DeviceError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::ZERO)
            .open_native()
            .map_err(map_serial_err)?;
        debug!(path, baud_rate, "opened serial port");
        Ok(Self { port })
    }

    /// Wrap an already-configured native port.
    ///
    /// The port must have a zero timeout; a blocking port would stall the
    /// reactor thread.
    pub fn from_port(port: NativePort) -> Self {
        Self { port }
    }
}

impl Device for SystemSerial {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            // Zero-timeout ports report an empty queue as a timeout.
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(DeviceError::from_io(err)),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        match self.port.write(data) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                Err(DeviceError::WouldBlock)
            }
            Err(err) => Err(DeviceError::from_io(err)),
        }
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.port.flush().map_err(DeviceError::from_io)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        // The OS handle is released when the port drops.
        Ok(())
    }

    fn bytes_to_read(&mut self) -> Result<usize, DeviceError> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(map_serial_err)
    }

    fn bytes_to_write(&mut self) -> Result<usize, DeviceError> {
        self.port
            .bytes_to_write()
            .map(|n| n as usize)
            .map_err(map_serial_err)
    }

    #[cfg(unix)]
    fn wait_handle(&self) -> Option<WaitHandle> {
        Some(WaitHandle(self.port.as_raw_fd() as u64))
    }

    #[cfg(not(unix))]
    fn wait_handle(&self) -> Option<WaitHandle> {
        None
    }
}

fn map_serial_err(err: serialport::Error) -> DeviceError {
    match err.kind() {
        serialport::ErrorKind::NoDevice => DeviceError::Disconnected(err.to_string()),
        serialport::ErrorKind::Io(kind) => {
            DeviceError::from_io(std::io::Error::new(kind, err.to_string()))
        }
        _ => DeviceError::Io(err.to_string()),
    }
}
