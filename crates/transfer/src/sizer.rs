use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CHUNK_ALIGNMENT, TransferError};

const MIB: f64 = 1024.0 * 1024.0;

/// Bounds and thresholds for [`ChunkSizer`].
///
/// All lengths are in bytes and must be multiples of `alignment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkSizerConfig {
    pub alignment: u64,
    /// Length of the first chunk.
    pub baseline: u64,
    pub min: u64,
    pub max: u64,
    /// Throughput (bytes/s) above which chunks grow.
    pub fast_threshold_bps: f64,
    /// Throughput (bytes/s) below which chunks shrink.
    pub slow_threshold_bps: f64,
    pub growth_factor: f64,
}

impl Default for ChunkSizerConfig {
    fn default() -> Self {
        Self {
            alignment: CHUNK_ALIGNMENT,
            baseline: 16 * CHUNK_ALIGNMENT,
            min: 3 * CHUNK_ALIGNMENT,
            max: 192 * CHUNK_ALIGNMENT,
            fast_threshold_bps: 5.0 * MIB,
            slow_threshold_bps: MIB,
            growth_factor: 1.5,
        }
    }
}

impl ChunkSizerConfig {
    /// Checks alignment and ordering constraints.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.alignment == 0 {
            return Err(TransferError::InvalidConfig("alignment must be non-zero".into()));
        }
        for (name, value) in [("baseline", self.baseline), ("min", self.min), ("max", self.max)] {
            if value == 0 || value % self.alignment != 0 {
                return Err(TransferError::InvalidConfig(format!(
                    "{name} ({value}) must be a non-zero multiple of {}",
                    self.alignment
                )));
            }
        }
        if !(self.min <= self.baseline && self.baseline <= self.max) {
            return Err(TransferError::InvalidConfig(format!(
                "expected min <= baseline <= max, got {} / {} / {}",
                self.min, self.baseline, self.max
            )));
        }
        if self.growth_factor.is_nan() || self.growth_factor <= 1.0 {
            return Err(TransferError::InvalidConfig(
                "growth_factor must be greater than 1".into(),
            ));
        }
        if self.slow_threshold_bps > self.fast_threshold_bps {
            return Err(TransferError::InvalidConfig(
                "slow threshold exceeds fast threshold".into(),
            ));
        }
        Ok(())
    }
}

/// Proposes chunk lengths, adapting to observed throughput.
///
/// Pure policy: callers feed it byte counts and elapsed times.
#[derive(Debug, Clone)]
pub struct ChunkSizer {
    config: ChunkSizerConfig,
    current: u64,
}

impl ChunkSizer {
    pub fn new(config: ChunkSizerConfig) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            current: config.baseline,
            config,
        })
    }

    /// The length the next full chunk would have.
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Length of the next chunk given `remaining` bytes.
    ///
    /// Never exceeds `remaining`, so the last chunk is exactly the remainder.
    pub fn next_len(&self, remaining: u64) -> u64 {
        self.current.min(remaining)
    }

    /// Feeds one completed non-final chunk and returns the adjusted length.
    pub fn record(&mut self, bytes: u64, elapsed: Duration) -> u64 {
        if bytes == 0 {
            return self.current;
        }

        let secs = elapsed.as_secs_f64();
        let bps = if secs > 0.0 {
            bytes as f64 / secs
        } else {
            f64::INFINITY
        };

        let next = if bps > self.config.fast_threshold_bps {
            let grown = self.align_down(self.current as f64 * self.config.growth_factor);
            grown.max(self.current + self.config.alignment).min(self.config.max)
        } else if bps < self.config.slow_threshold_bps {
            let shrunk = self.align_down(self.current as f64 / self.config.growth_factor);
            shrunk.max(self.config.min)
        } else {
            self.current
        };

        if next != self.current {
            debug!(
                from = self.current,
                to = next,
                bytes_per_sec = format_args!("{bps:.0}"),
                "chunk size adjusted"
            );
            self.current = next;
        }
        self.current
    }

    fn align_down(&self, len: f64) -> u64 {
        let a = self.config.alignment;
        (len as u64) / a * a
    }
}
