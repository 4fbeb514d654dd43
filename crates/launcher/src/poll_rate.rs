//! Poll interval
//!
//! The interval is read once per polling cycle and may be changed from any
//! thread in between. A new value takes effect after the current wait.

use common::{Error, Result};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tracing::debug;

/// Shortest allowed interval in seconds
pub const MIN_POLL_RATE: u8 = 1;
/// Longest allowed interval in seconds
pub const MAX_POLL_RATE: u8 = 120;
/// Interval used when none is set, or when 0 is passed
pub const DEFAULT_POLL_RATE: u8 = 2;

/// Seconds between registry scans
#[derive(Debug)]
pub struct PollRateRegulator {
    seconds: RwLock<u8>,
}

impl Default for PollRateRegulator {
    fn default() -> Self {
        Self {
            seconds: RwLock::new(DEFAULT_POLL_RATE),
        }
    }
}

impl PollRateRegulator {
    /// Create a regulator with `seconds` already validated
    pub fn new(seconds: u8) -> Result<Self> {
        let regulator = Self::default();
        regulator.set(seconds)?;
        Ok(regulator)
    }

    /// Current interval in seconds
    pub fn get(&self) -> u8 {
        // A u8 is always valid, even behind a poisoned lock
        *self.seconds.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(u64::from(self.get()))
    }

    /// Set the interval, returning the value stored
    ///
    /// `0` resets to [`DEFAULT_POLL_RATE`]. Values outside
    /// [`MIN_POLL_RATE`]..=[`MAX_POLL_RATE`] are rejected and leave the
    /// current interval unchanged.
    pub fn set(&self, seconds: u8) -> Result<u8> {
        let seconds = match seconds {
            0 => DEFAULT_POLL_RATE,
            MIN_POLL_RATE..=MAX_POLL_RATE => seconds,
            _ => return Err(Error::InvalidPollRate(seconds)),
        };

        *self.seconds.write().unwrap_or_else(PoisonError::into_inner) = seconds;
        debug!("Poll rate set to {}s", seconds);
        Ok(seconds)
    }
}
