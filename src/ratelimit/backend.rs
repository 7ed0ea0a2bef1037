//! Storage contract for fixed-window counters.

// self
use crate::_prelude::*;

/// Boxed future returned by [`FixedWindowBackend::incr_window`].
pub type BackendFuture<'a, T> =
	Pin<Box<dyn Future<Output = Result<T, BackendError>> + 'a + Send>>;

/// Atomic "increment the counter of the window containing `now`" primitive.
///
/// Implementations must never hand the same post-increment count to two concurrent callers of
/// the same bucket, and must report `reset_at` as the end of the window containing `now`.
/// Errors are returned verbatim; retry policy belongs to the caller. Dropping the returned
/// future cancels the call.
pub trait FixedWindowBackend
where
	Self: Send + Sync,
{
	/// Increments the bucket for `base_key` in the window containing `now`.
	fn incr_window<'a>(
		&'a self,
		base_key: &'a str,
		window: Duration,
		now: OffsetDateTime,
	) -> BackendFuture<'a, WindowCount>;
}
impl<B> FixedWindowBackend for Arc<B>
where
	B: ?Sized + FixedWindowBackend,
{
	fn incr_window<'a>(
		&'a self,
		base_key: &'a str,
		window: Duration,
		now: OffsetDateTime,
	) -> BackendFuture<'a, WindowCount> {
		(**self).incr_window(base_key, window, now)
	}
}

/// Post-increment state of a window bucket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowCount {
	/// Admissions recorded in the bucket, this one included.
	pub count: u64,
	/// End of the window.
	pub reset_at: OffsetDateTime,
}

/// Error type produced by [`FixedWindowBackend`] implementations.
#[derive(Debug, ThisError)]
pub enum BackendError {
	/// The coordinated store answered the window script with an unexpected shape.
	#[error("Window script returned an unexpected result: {reply}.")]
	UnexpectedScriptResult {
		/// Debug rendering of the reply.
		reply: String,
	},
	/// The backend call exceeded its deadline; the increment may have been recorded.
	#[error("Backend call timed out after {timeout}.")]
	Timeout {
		/// Configured deadline.
		timeout: Duration,
	},
	/// Redis transport or script failure.
	#[cfg(feature = "redis")]
	#[error(transparent)]
	Redis(#[from] redis::RedisError),
	/// Failure reported by a custom backend.
	#[error("Backend failure: {message}.")]
	Other {
		/// Human-readable error payload.
		message: String,
	},
}
