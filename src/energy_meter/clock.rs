use std::sync::Once;

use nix::sys::time::TimeSpec;
use nix::time::{clock_gettime, ClockId};

use super::error::Result;
use super::types::Timestamp;

static CLOCK_FAILURE: Once = Once::new();

fn micros(ts: TimeSpec) -> Timestamp {
    ts.tv_sec() as Timestamp * 1_000_000 + ts.tv_nsec() as Timestamp / 1_000
}

/*
* @brief Read the monotonic clock.
* @return Microseconds since an arbitrary, fixed point in the past
* @note Sample timestamps and burst timing use this clock, a failure fails the tick.
*/
pub fn try_now_us() -> Result<Timestamp> {
    Ok(micros(clock_gettime(ClockId::CLOCK_MONOTONIC)?))
}

/// Monotonic time for channel `set` stamps, 0 if the clock can't be read.
pub fn now_us() -> Timestamp {
    or_zero(try_now_us())
}

fn or_zero(time: Result<Timestamp>) -> Timestamp {
    match time {
        Ok(time) => time,
        Err(e) => {
            CLOCK_FAILURE.call_once(|| log::error!("Monotonic clock unavailable: {}", e));
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy_meter::error::Error;
    use nix::errno::Errno;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_monotonic_advances() {
        let a = try_now_us().unwrap();
        thread::sleep(Duration::from_millis(2));
        let b = now_us();
        assert!(b - a >= 2_000);
    }

    #[test]
    fn test_micros() {
        assert_eq!(micros(TimeSpec::new(3, 250_999)), 3_000_250);
    }

    #[test]
    fn test_clock_failure_stamps_zero() {
        assert_eq!(or_zero(Err(Error::Sys(Errno::EINVAL))), 0);
        assert_eq!(or_zero(Err(Error::Sys(Errno::EINVAL))), 0);
        assert_eq!(or_zero(Ok(42)), 42);
    }
}
