//! A monotonic [`embedded_time::Clock`] backed by [`std::time::Instant`].
//!
//! The transfer engine and scheduler only ever consume `embedded_time`
//! abstractions, so on a hosted build the only platform-specific piece is
//! this adapter: it never leaps and never goes backwards, satisfying §5's
//! "computed from a monotonic microsecond clock that MUST NOT leap".

use embedded_time::clock::Error as ClockError;
use embedded_time::fraction::Fraction;
use embedded_time::{Clock, Instant};
use std::time::Instant as StdInstant;

#[derive(Clone, Copy)]
pub struct MonotonicClock {
    epoch: StdInstant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: StdInstant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    type T = u64;
    const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

    fn try_now(&self) -> Result<Instant<Self>, ClockError> {
        let micros = self.epoch.elapsed().as_micros();
        Ok(Instant::new(micros as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_non_decreasing() {
        let clock = MonotonicClock::new();
        let a = clock.try_now().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let b = clock.try_now().unwrap();
        assert!(b >= a);
    }
}
