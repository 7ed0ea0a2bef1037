//! Client-side rate limiting: the admission protocol, fixed-window configuration, and the
//! backends that count admissions per window.
//!
//! A [`Limiter`] answers "may this call proceed now?" with a [`Decision`] and never waits.
//! [`FixedWindowLimiter`] implements the protocol on top of any [`FixedWindowBackend`]:
//! [`MemoryBackend`] for a single process, or `CoordinatedBackend` (feature `redis`) when
//! several processes share one budget.

pub mod backend;
#[cfg(feature = "redis")] pub mod coordinated;
pub mod fixed_window;
pub mod memory;

pub use backend::*;
#[cfg(feature = "redis")] pub use coordinated::*;
pub use fixed_window::*;
pub use memory::*;

// self
use crate::_prelude::*;

/// Boxed future returned by [`Limiter::allow`].
pub type LimiterFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Non-blocking admission contract consulted before every outbound call.
pub trait Limiter
where
	Self: Send + Sync,
{
	/// Consumes one permit for `key` if the current window has budget left.
	///
	/// Backend failures are returned as errors and must not be read as refusals.
	fn allow<'a>(&'a self, key: &'a str) -> LimiterFuture<'a, Decision>;
}

/// Admission verdict plus the window metadata callers need to schedule a retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decision {
	/// Whether the call may proceed.
	pub allowed: bool,
	/// Permits left in the current window after this call; zero when blocked.
	pub remaining: u64,
	/// End of the current window.
	pub reset_at: OffsetDateTime,
	/// Time from the decision until `reset_at`; only set when blocked.
	pub retry_after: Option<Duration>,
	/// Reserved for algorithms that block beyond the window; fixed windows leave it unset.
	pub blocked_until: Option<OffsetDateTime>,
}
impl Decision {
	/// Builds an admitting decision.
	pub fn allow(remaining: u64, reset_at: OffsetDateTime) -> Self {
		Self { allowed: true, remaining, reset_at, retry_after: None, blocked_until: None }
	}

	/// Builds a refusing decision observed at `now`.
	pub fn block(reset_at: OffsetDateTime, now: OffsetDateTime) -> Self {
		let retry_after = reset_at - now;

		Self {
			allowed: false,
			remaining: 0,
			reset_at,
			retry_after: Some(if retry_after.is_negative() { Duration::ZERO } else { retry_after }),
			blocked_until: None,
		}
	}
}

/// Fixed-window limiter settings.
///
/// Values are normalized when a limiter is built: a non-positive `window` becomes one minute,
/// a window longer than [`FixedWindowConfig::MAX_WINDOW`] is capped to it, and a non-positive
/// `limit` becomes 60.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWindowConfig {
	/// Window length, serialized as milliseconds.
	#[serde(rename = "window_ms", with = "duration_millis")]
	pub window: Duration,
	/// Maximum admissions per window.
	pub limit: i64,
	/// Namespace prepended to every key.
	#[serde(default)]
	pub key_prefix: String,
}
impl FixedWindowConfig {
	/// Window used when the configured one is not positive.
	pub const DEFAULT_WINDOW: Duration = Duration::MINUTE;
	/// Limit used when the configured one is not positive.
	pub const DEFAULT_LIMIT: i64 = 60;
	/// Longest window a limiter will use; window ends must stay representable instants.
	pub const MAX_WINDOW: Duration = Duration::days(366);

	/// Creates a config with an empty key prefix.
	pub fn new(window: Duration, limit: i64) -> Self {
		Self { window, limit, key_prefix: String::new() }
	}

	/// Sets the key namespace.
	pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.key_prefix = prefix.into();

		self
	}

	/// Returns a copy with defaults substituted for non-positive values and the window capped at
	/// [`Self::MAX_WINDOW`].
	pub fn normalized(&self) -> Self {
		Self {
			window: if self.window.is_positive() {
				self.window.min(Self::MAX_WINDOW)
			} else {
				Self::DEFAULT_WINDOW
			},
			limit: if self.limit > 0 { self.limit } else { Self::DEFAULT_LIMIT },
			key_prefix: self.key_prefix.clone(),
		}
	}
}
impl Default for FixedWindowConfig {
	fn default() -> Self {
		Self::new(Self::DEFAULT_WINDOW, Self::DEFAULT_LIMIT)
	}
}

/// Boundaries of the window containing a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowBounds {
	/// Window start in Unix epoch milliseconds; used as the bucket key suffix.
	pub start_ms: i64,
	/// Window length in milliseconds.
	pub window_ms: i64,
}
impl WindowBounds {
	/// Computes `floor(now / window) * window` in epoch milliseconds.
	pub fn containing(now: OffsetDateTime, window: Duration) -> Self {
		let window_ms = window_millis(window);
		let now_ms = epoch_millis(now);

		Self { start_ms: now_ms.div_euclid(window_ms) * window_ms, window_ms }
	}

	/// Returns the instant the window starts.
	pub fn start(&self) -> OffsetDateTime {
		from_epoch_millis(self.start_ms)
	}

	/// Returns the instant the window ends.
	pub fn reset_at(&self) -> OffsetDateTime {
		from_epoch_millis(self.start_ms.saturating_add(self.window_ms))
	}

	/// Appends the window suffix to `base_key`.
	pub fn bucket_key(&self, base_key: &str) -> String {
		format!("{base_key}:{}", self.start_ms)
	}
}

/// Window length in whole milliseconds, never below one.
pub fn window_millis(window: Duration) -> i64 {
	i64::try_from(window.whole_milliseconds()).unwrap_or(i64::MAX).max(1)
}

/// Instant expressed in Unix epoch milliseconds.
pub fn epoch_millis(instant: OffsetDateTime) -> i64 {
	i64::try_from(instant.unix_timestamp_nanos().div_euclid(1_000_000)).unwrap_or(i64::MAX)
}

pub(crate) fn from_epoch_millis(ms: i64) -> OffsetDateTime {
	OffsetDateTime::UNIX_EPOCH.saturating_add(Duration::milliseconds(ms))
}

mod duration_millis {
	// crates.io
	use serde::{Deserialize, Deserializer, Serializer};
	// self
	use crate::_prelude::Duration;

	pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_i64(i64::try_from(value.whole_milliseconds()).unwrap_or(i64::MAX))
	}

	pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		i64::deserialize(deserializer).map(Duration::milliseconds)
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn window_bounds_align_to_epoch_multiples() {
		let now = macros::datetime!(2025-11-10 12:00:07.250 UTC);
		let bounds = WindowBounds::containing(now, Duration::seconds(10));

		assert_eq!(bounds.start(), macros::datetime!(2025-11-10 12:00:00 UTC));
		assert_eq!(bounds.reset_at(), macros::datetime!(2025-11-10 12:00:10 UTC));
		assert_eq!(bounds.bucket_key("k"), format!("k:{}", bounds.start_ms));
	}

	#[test]
	fn instant_on_a_boundary_opens_the_next_window() {
		let now = macros::datetime!(2025-11-10 12:00:10 UTC);
		let bounds = WindowBounds::containing(now, Duration::seconds(10));

		assert_eq!(bounds.start(), now);
		assert_eq!(bounds.reset_at(), now + Duration::seconds(10));
	}

	#[test]
	fn normalization_substitutes_defaults() {
		let config = FixedWindowConfig::new(Duration::ZERO, 0).with_key_prefix("p:").normalized();

		assert_eq!(config.window, Duration::MINUTE);
		assert_eq!(config.limit, 60);
		assert_eq!(config.key_prefix, "p:");

		let config = FixedWindowConfig::new(Duration::seconds(-5), -3).normalized();

		assert_eq!(config.window, Duration::MINUTE);
		assert_eq!(config.limit, 60);

		let config = FixedWindowConfig::new(Duration::seconds(5), 2).normalized();

		assert_eq!(config.window, Duration::seconds(5));
		assert_eq!(config.limit, 2);
	}

	#[test]
	fn oversized_windows_are_capped() {
		let config = FixedWindowConfig::new(Duration::days(365 * 9000), 1).normalized();

		assert_eq!(config.window, FixedWindowConfig::MAX_WINDOW);

		let config: FixedWindowConfig =
			serde_json::from_str("{\"window_ms\":9223372036854775807,\"limit\":1}")
				.expect("Extreme window fixture should deserialize.");

		assert_eq!(config.normalized().window, FixedWindowConfig::MAX_WINDOW);
	}

	#[test]
	fn window_ends_saturate_instead_of_overflowing() {
		let bounds = WindowBounds { start_ms: i64::MAX - 1, window_ms: i64::MAX };

		assert!(bounds.reset_at() > macros::datetime!(9999-01-01 0:00 UTC));
		assert!(from_epoch_millis(i64::MIN) < OffsetDateTime::UNIX_EPOCH);
	}

	#[test]
	fn config_reads_millisecond_windows_from_json() {
		let config: FixedWindowConfig =
			serde_json::from_str("{\"window_ms\":1500,\"limit\":10,\"key_prefix\":\"tenant-a:\"}")
				.expect("Limiter config fixture should deserialize.");

		assert_eq!(config.window, Duration::milliseconds(1500));
		assert_eq!(config.limit, 10);
		assert_eq!(config.key_prefix, "tenant-a:");

		let config: FixedWindowConfig = serde_json::from_str("{\"window_ms\":0,\"limit\":0}")
			.expect("Key prefix should be optional.");

		assert_eq!(config.key_prefix, "");
		assert_eq!(config.normalized(), FixedWindowConfig::default());
	}

	#[test]
	fn blocked_decisions_carry_retry_after() {
		let now = macros::datetime!(2025-11-10 12:00:03 UTC);
		let reset_at = macros::datetime!(2025-11-10 12:00:10 UTC);
		let decision = Decision::block(reset_at, now);

		assert!(!decision.allowed);
		assert_eq!(decision.remaining, 0);
		assert_eq!(decision.retry_after, Some(Duration::seconds(7)));
		assert_eq!(decision.blocked_until, None);
		assert_eq!(Decision::allow(2, reset_at).retry_after, None);
	}
}
