//! Transport layer.
//!
//! This module adapts a non-blocking serial [`Device`](crate::core::Device)
//! to the callback-driven transport contract of a cooperative event loop:
//!
//! - **Transport root**: [`SerialTransport`] with its read/write handlers
//! - **Write buffering & flow control**: [`WriteBuffer`] plus watermark
//!   signaling
//! - **Lifecycle**: [`Lifecycle`] / [`FlowState`] state machines
//! - **Readiness detection**: interrupt-driven and timer-polling
//!   strategies behind [`ReadinessMode`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             Protocol                    │  callbacks (user code)
//! ├─────────────────────────────────────────┤
//! │          SerialTransport                │  ← this module
//! │   buffering, flow control, lifecycle    │
//! ├─────────────────────────────────────────┤
//! │    Readiness strategy  │  Reactor       │  event loop services
//! ├─────────────────────────────────────────┤
//! │             Device                      │  non-blocking serial port
//! └─────────────────────────────────────────┘
//! ```

mod buffer;
mod lifecycle;
mod readiness;
mod serial;

pub use buffer::WriteBuffer;
pub use lifecycle::{FlowState, Lifecycle};
pub use readiness::ReadinessMode;
pub use serial::{SerialTransport, TransportConfig};
