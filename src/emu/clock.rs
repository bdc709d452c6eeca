use std::time::Duration;

use tokio::{
    runtime::{Builder, Runtime},
    time::{interval, Interval},
};

use super::{EmuError, EmuResult};

/// A fixed-rate clock. Each call to [`Clock::tick`] blocks until the next period starts.
pub struct Clock {
    rt: Runtime,
    interval: Interval,
}

impl Clock {
    /// Creates a clock ticking `clock_rate_hz` times per second.
    ///
    /// # Errors
    ///
    /// This function will return an error if the rate does not give a positive, finite period,
    /// or if the Tokio runtime fails to initialize.
    pub fn new(clock_rate_hz: f64) -> EmuResult<Self> {
        let period = Duration::try_from_secs_f64(clock_rate_hz.recip())
            .ok()
            .filter(|period| !period.is_zero())
            .ok_or(EmuError::InvalidClockRate(clock_rate_hz))?;
        let rt = Builder::new_current_thread().enable_time().build()?;
        let clock = rt.block_on(async { interval(period) });
        Ok(Self {
            rt,
            interval: clock,
        })
    }

    pub fn tick(&mut self) {
        let Self { rt, interval } = self;
        // snap!
        rt.block_on(interval.tick());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_clock_paces_ticks() {
        let mut clock = Clock::new(200.0).unwrap();
        let start = Instant::now();
        // first tick completes immediately
        for _ in 0..5 {
            clock.tick();
        }
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_clock_rejects_bad_rates() {
        for rate in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert!(matches!(Clock::new(rate), Err(EmuError::InvalidClockRate(_))));
        }
    }
}
