//! Time sources for window arithmetic.
//!
//! Admission decisions read time exclusively through [`Clock`] so tests can pin and advance
//! window boundaries with [`MockClock`] instead of sleeping.

// self
use crate::_prelude::*;

/// Capability used by limiters and the request gate to observe and advance time.
pub trait Clock
where
	Self: Debug + Send + Sync,
{
	/// Returns the current instant.
	fn now(&self) -> OffsetDateTime;

	/// Advances time by `duration`.
	///
	/// [`SystemClock`] blocks the calling thread; [`MockClock`] moves its logical timestamp.
	fn sleep(&self, duration: Duration);
}

/// Wall-clock time in UTC.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}

	fn sleep(&self, duration: Duration) {
		if let Ok(duration) = std::time::Duration::try_from(duration) {
			std::thread::sleep(duration);
		}
	}
}

/// Manually driven clock for deterministic tests.
#[derive(Debug)]
pub struct MockClock(Mutex<OffsetDateTime>);
impl MockClock {
	/// Creates a clock frozen at `start`.
	pub fn new(start: OffsetDateTime) -> Self {
		Self(Mutex::new(start))
	}

	/// Moves the clock forward (or backward, for negative durations) by `duration`.
	pub fn advance(&self, duration: Duration) {
		*self.0.lock() += duration;
	}

	/// Pins the clock to `instant`.
	pub fn set(&self, instant: OffsetDateTime) {
		*self.0.lock() = instant;
	}
}
impl Default for MockClock {
	fn default() -> Self {
		Self::new(OffsetDateTime::UNIX_EPOCH)
	}
}
impl Clock for MockClock {
	fn now(&self) -> OffsetDateTime {
		*self.0.lock()
	}

	fn sleep(&self, duration: Duration) {
		self.advance(duration);
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn mock_clock_sleep_advances_logical_time() {
		let start = macros::datetime!(2025-11-10 12:00 UTC);
		let clock = MockClock::new(start);

		clock.sleep(Duration::seconds(5));

		assert_eq!(clock.now(), start + Duration::seconds(5));

		clock.set(start);

		assert_eq!(clock.now(), start);
	}

	#[test]
	fn system_clock_ignores_negative_sleep() {
		let clock = SystemClock;
		let before = clock.now();

		clock.sleep(Duration::seconds(-10));

		assert!(clock.now() >= before);
	}
}
