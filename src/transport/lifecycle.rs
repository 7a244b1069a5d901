//! Lifecycle and flow-control state for the serial transport.
//!
//! Two small state machines replace the flag soup a transport tends to
//! accumulate. Their transition tables:
//!
//! ```text
//! Lifecycle:  Open ──close()──────────────▶ Closing ──buffer drained──▶ Closed
//!              │                                                         ▲
//!              └──abort() / fatal error────────────────────────────────┘
//!
//! FlowState:  Flowing ──buffered > high──▶ Paused
//!             Paused  ──buffered <= low──▶ Flowing
//! ```
//!
//! `FlowState` is only meaningful before `Closed`; the shutdown path never
//! emits pause/resume signals.

/// Lifecycle phase of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Fully operational: reads delivered, writes accepted.
    Open,
    /// Graceful shutdown requested: reads stopped, writes dropped, the
    /// buffered backlog still drains.
    Closing,
    /// Terminal: the shutdown sequence has been committed.
    Closed,
}

impl Lifecycle {
    /// Whether shutdown has been requested or completed.
    pub fn is_closing(self) -> bool {
        !matches!(self, Self::Open)
    }

    /// Whether the transport still accepts `write` calls.
    pub fn accepts_writes(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether inbound data may still be delivered to the protocol.
    pub fn delivers_reads(self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether the write side may still drain buffered output.
    pub fn drains_writes(self) -> bool {
        !matches!(self, Self::Closed)
    }
}

/// Producer flow-control phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// The producer may write freely.
    Flowing,
    /// The producer has been asked to pause until the buffer drains.
    Paused,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_predicates() {
        assert!(!Lifecycle::Open.is_closing());
        assert!(Lifecycle::Closing.is_closing());
        assert!(Lifecycle::Closed.is_closing());

        assert!(Lifecycle::Open.accepts_writes());
        assert!(!Lifecycle::Closing.accepts_writes());
        assert!(!Lifecycle::Closed.accepts_writes());

        assert!(Lifecycle::Open.delivers_reads());
        assert!(!Lifecycle::Closing.delivers_reads());

        // Draining continues through Closing and stops only at Closed.
        assert!(Lifecycle::Open.drains_writes());
        assert!(Lifecycle::Closing.drains_writes());
        assert!(!Lifecycle::Closed.drains_writes());
    }
}
