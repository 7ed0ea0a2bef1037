//! Fixed-window admission on top of a [`FixedWindowBackend`].

// self
use crate::{
	_prelude::*,
	clock::{Clock, SystemClock},
	obs::{self, AdmissionOutcome},
	ratelimit::{
		Decision, FixedWindowBackend, FixedWindowConfig, Limiter, LimiterFuture, MemoryBackend,
	},
};

/// Key substituted for callers that supply an empty one; such callers share one bucket.
pub const UNKNOWN_KEY: &str = "unknown";

/// Admits at most `limit` calls per key in each window.
///
/// The `limit`-th call of a window is admitted with `remaining = 0`; the next one is the first
/// refusal. Refused calls still count against the window.
pub struct FixedWindowLimiter<B>
where
	B: ?Sized + FixedWindowBackend,
{
	config: FixedWindowConfig,
	limit: u64,
	clock: Arc<dyn Clock>,
	backend: Arc<B>,
}
impl<B> FixedWindowLimiter<B>
where
	B: ?Sized + FixedWindowBackend,
{
	/// Binds a normalized `config` to `backend`, reading time from `clock`.
	///
	/// `clock` only drives admission. A [`MemoryBackend`] sweeps with the clock given to
	/// [`MemoryBackend::with_clock`] (the system clock by default); use
	/// [`FixedWindowLimiter::in_memory`] to drive both from one clock.
	pub fn new(config: FixedWindowConfig, backend: impl Into<Arc<B>>, clock: Arc<dyn Clock>) -> Self {
		let config = config.normalized();
		let limit = u64::try_from(config.limit).unwrap_or(1);

		Self { config, limit, clock, backend: backend.into() }
	}

	/// Binds `config` to `backend` using the system clock.
	pub fn with_system_clock(config: FixedWindowConfig, backend: impl Into<Arc<B>>) -> Self {
		Self::new(config, backend, Arc::new(SystemClock))
	}

	/// Returns the normalized configuration.
	pub fn config(&self) -> &FixedWindowConfig {
		&self.config
	}

	/// Returns the shared backend.
	pub fn backend(&self) -> &Arc<B> {
		&self.backend
	}

	fn prefixed_key(&self, key: &str) -> String {
		let key = if key.is_empty() { UNKNOWN_KEY } else { key };

		format!("{}{key}", self.config.key_prefix)
	}

	async fn decide(&self, key: &str) -> Result<Decision> {
		let base_key = self.prefixed_key(key);
		let now = self.clock.now();
		let counted = match self.backend.incr_window(&base_key, self.config.window, now).await {
			Ok(counted) => counted,
			Err(e) => {
				obs::record_admission(&base_key, AdmissionOutcome::Error);

				return Err(e.into());
			},
		};

		if counted.count > self.limit {
			obs::record_admission(&base_key, AdmissionOutcome::Blocked);

			return Ok(Decision::block(counted.reset_at, now));
		}

		obs::record_admission(&base_key, AdmissionOutcome::Allowed);

		Ok(Decision::allow(self.limit - counted.count, counted.reset_at))
	}
}
impl FixedWindowLimiter<MemoryBackend> {
	/// Builds a limiter over a fresh [`MemoryBackend`] whose housekeeper shares `clock`.
	pub fn in_memory(config: FixedWindowConfig, clock: Arc<dyn Clock>) -> Self {
		let backend = MemoryBackend::new().with_clock(clock.clone());

		Self::new(config, backend, clock)
	}
}
impl<B> Limiter for FixedWindowLimiter<B>
where
	B: ?Sized + FixedWindowBackend,
{
	fn allow<'a>(&'a self, key: &'a str) -> LimiterFuture<'a, Decision> {
		Box::pin(self.decide(key))
	}
}
impl<B> Debug for FixedWindowLimiter<B>
where
	B: ?Sized + FixedWindowBackend,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("FixedWindowLimiter")
			.field("config", &self.config)
			.field("clock", &self.clock)
			.finish()
	}
}
