//! Core traits, types, and constants.
//!
//! This module defines the capability boundaries the transport is built
//! against (device, protocol, reactor) together with the error taxonomy
//! and default tuning constants. It has no I/O of its own.

pub mod constants;
mod error;
mod traits;

pub use error::*;
pub use traits::*;
