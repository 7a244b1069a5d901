//! # EVSERIAL
//!
//! **Ev**ent-driven **Serial** transport.
//!
//! EVSERIAL adapts a byte-oriented, non-blocking serial device to the
//! callback-driven transport contract of a cooperative, single-threaded
//! event loop. It provides:
//!
//! - **Readiness-driven I/O**: descriptor registration where the platform
//!   supports it, timer polling where it does not
//! - **Flow control**: watermark-based backpressure signalled to the
//!   producing protocol
//! - **Lifecycle**: graceful close that drains buffered output, immediate
//!   abort that discards it, and an exactly-once shutdown notification
//! - **Zero locking**: all transport state lives on the reactor thread
//!
//! ## Feature Flags
//!
//! - `serialport` (default): system serial-port device backend
//!
//! ## Modules
//!
//! - [`core`]: capability traits, error types, and constants
//! - [`transport`]: the transport engine
//! - [`streams`]: buffered reader/writer convenience
//! - [`device`]: serial-port backend (requires `serialport` feature)
//!
//! ## Example Usage
//!
//! ```rust
//! use std::rc::Rc;
//! use evserial::prelude::*;
//!
//! #[derive(Debug, Default)]
//! struct Greeter;
//!
//! impl Protocol for Greeter {
//!     fn connection_made(&self, transport: Rc<SerialTransport>) {
//!         transport.write(&b"Hello, World!\n"[..]);
//!     }
//!
//!     fn data_received(&self, data: &[u8]) {
//!         println!("received {} bytes", data.len());
//!     }
//!
//!     fn connection_lost(&self, error: Option<DeviceError>) {
//!         println!("port closed ({error:?})");
//!     }
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core capability traits and types (always included)
pub mod core;

// Transport engine (always included)
pub mod transport;

// Buffered stream convenience
pub mod streams;

// Serial-port device backend (feature-gated)
#[cfg(feature = "serialport")]
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
pub mod device;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    // Transport types
    pub use crate::transport::{
        FlowState, Lifecycle, ReadinessMode, SerialTransport, TransportConfig, WriteBuffer,
    };

    // Stream convenience
    pub use crate::streams::{open_streams, StreamReader, StreamWriter};

    // Device backend (when enabled)
    #[cfg(feature = "serialport")]
    pub use crate::device::SystemSerial;
}

// Re-export commonly used items at crate root
pub use crate::core::{
    CallbackError, Device, DeviceError, ErrorReport, Protocol, Reactor, TimerId, TransportError,
    WaitHandle,
};
pub use crate::transport::{ReadinessMode, SerialTransport, TransportConfig};
