//! Transport constants.
//!
//! Default values for chunk sizing, flow-control watermarks, and the
//! timer-polling readiness strategy. All of them can be overridden per
//! transport through [`TransportConfig`](crate::transport::TransportConfig).

use std::time::Duration;

// =============================================================================
// READ PATH
// =============================================================================

/// Maximum number of bytes pulled from the device per read-ready callback.
pub const MAX_READ_CHUNK: usize = 1024;

// =============================================================================
// FLOW CONTROL
// =============================================================================

/// Default high watermark for the write buffer (64 KiB).
///
/// Once the buffered total strictly exceeds this, the protocol is asked to
/// `pause_writing`.
pub const DEFAULT_HIGH_WATER: usize = 64 * 1024;

/// Divisor applied to the high watermark when no low watermark is given.
pub const LOW_WATER_DIVISOR: usize = 4;

/// Multiplier applied to the low watermark when no high watermark is given.
pub const HIGH_WATER_MULTIPLIER: usize = 4;

// =============================================================================
// TIMER-POLLING READINESS
// =============================================================================

/// Period of the polling readiness strategy.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_micros(500);

/// Ceiling on the device's outbound queue depth below which the polling
/// strategy considers the device writable.
pub const DEFAULT_MAX_OUT_WAITING: usize = 1024;
