//! Write buffer and flow-control watermarks.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};

use crate::core::constants::{DEFAULT_HIGH_WATER, HIGH_WATER_MULTIPLIER, LOW_WATER_DIVISOR};
use crate::core::TransportError;

/// Ordered queue of byte chunks awaiting transmission.
///
/// Insertion order is transmission order. The running byte total is the
/// sole input to the pause/resume decision; it is compared against the
/// watermarks only at mutation points, so it may legitimately sit above
/// the high watermark between checks.
#[derive(Debug)]
pub struct WriteBuffer {
    chunks: VecDeque<Bytes>,
    total: usize,
    high_water: usize,
    low_water: usize,
}

impl Default for WriteBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBuffer {
    /// Create an empty buffer with the default watermarks.
    pub fn new() -> Self {
        Self {
            chunks: VecDeque::new(),
            total: 0,
            high_water: DEFAULT_HIGH_WATER,
            low_water: DEFAULT_HIGH_WATER / LOW_WATER_DIVISOR,
        }
    }

    /// Append a chunk at the tail.
    pub fn push(&mut self, chunk: Bytes) {
        self.total += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Take the entire buffered content as one chunk, leaving the buffer
    /// empty. A sole chunk is handed back directly to avoid a copy.
    pub fn take_all(&mut self) -> Option<Bytes> {
        let joined = match self.chunks.len() {
            0 => return None,
            1 => self.chunks.pop_front()?,
            _ => {
                let mut joined = BytesMut::with_capacity(self.total);
                for chunk in self.chunks.drain(..) {
                    joined.extend_from_slice(&chunk);
                }
                joined.freeze()
            }
        };
        self.total = 0;
        Some(joined)
    }

    /// Drop all buffered chunks.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.total = 0;
    }

    /// Exact sum of buffered chunk lengths.
    pub fn total_bytes(&self) -> usize {
        self.total
    }

    /// Whether nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Current high watermark.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Current low watermark.
    pub fn low_water(&self) -> usize {
        self.low_water
    }

    /// Whether the buffered total has crossed the pause threshold.
    pub fn exceeds_high_water(&self) -> bool {
        self.total > self.high_water
    }

    /// Whether the buffered total has fallen to the resume threshold.
    pub fn at_or_below_low_water(&self) -> bool {
        self.total <= self.low_water
    }

    /// Reconfigure the watermarks. Missing values are derived from the
    /// given one; already-buffered data is never dropped. On rejection the
    /// previous watermarks stay in effect.
    pub fn set_watermarks(
        &mut self,
        high: Option<usize>,
        low: Option<usize>,
    ) -> Result<(), TransportError> {
        let (high, low) = resolve_watermarks(high, low)?;
        self.high_water = high;
        self.low_water = low;
        Ok(())
    }
}

/// Apply the watermark defaulting rules and validate the pair.
///
/// An unspecified high watermark defaults to four times the low one (or
/// 64 KiB when both are unspecified); an unspecified low watermark
/// defaults to a quarter of the high one.
fn resolve_watermarks(
    high: Option<usize>,
    low: Option<usize>,
) -> Result<(usize, usize), TransportError> {
    let high = match (high, low) {
        (Some(high), _) => high,
        (None, Some(low)) => low.saturating_mul(HIGH_WATER_MULTIPLIER),
        (None, None) => DEFAULT_HIGH_WATER,
    };
    let low = low.unwrap_or(high / LOW_WATER_DIVISOR);
    if high < low {
        return Err(TransportError::InvalidWatermarks { high, low });
    }
    Ok((high, low))
}
