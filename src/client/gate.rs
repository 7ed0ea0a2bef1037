//! Admission chokepoint consulted before any outbound I/O.
//!
//! Every call costs one permit, plus one more when the cached token is missing or about to
//! expire, because the call will first hit the token endpoint. All permits are taken before
//! anything touches the network; a refusal on any of them aborts the call. Permits already
//! taken are never handed back: the backends only ever increment, and a compensating
//! decrement could not be made atomic with the original admission.

// self
use crate::{
	_prelude::*,
	client::token::TokenState,
	ratelimit::Limiter,
};

/// Permits required by one outbound call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permits {
	/// The cached token is fresh; only the API call is admitted.
	Call,
	/// A token refresh precedes the API call; both are admitted.
	RefreshAndCall,
}
impl Permits {
	/// Estimates the cost of the next call from the token state observed at `now`.
	pub fn estimate(token: &TokenState, now: OffsetDateTime, refresh_threshold: Duration) -> Self {
		if token.needs_refresh(now, refresh_threshold) { Self::RefreshAndCall } else { Self::Call }
	}

	/// Number of limiter admissions this estimate consumes.
	pub const fn count(self) -> usize {
		match self {
			Self::Call => 1,
			Self::RefreshAndCall => 2,
		}
	}

	/// Returns `true` when a token refresh is part of the call.
	pub const fn includes_refresh(self) -> bool {
		matches!(self, Self::RefreshAndCall)
	}
}

#[derive(Clone)]
struct Admission {
	limiter: Arc<dyn Limiter>,
	key: String,
}

/// Optional limiter plus the key every admission is charged to.
#[derive(Default)]
pub struct RequestGate(RwLock<Option<Admission>>);
impl RequestGate {
	/// Installs `limiter`, replacing any previous one.
	pub fn install(&self, limiter: Arc<dyn Limiter>, key: impl Into<String>) {
		*self.0.write() = Some(Admission { limiter, key: key.into() });
	}

	/// Removes the limiter; subsequent calls are dispatched without admission.
	pub fn clear(&self) {
		*self.0.write() = None;
	}

	/// Returns `true` when a limiter is installed.
	pub fn is_enabled(&self) -> bool {
		self.0.read().is_some()
	}

	/// Consumes `permits` admissions in order, failing on the first refusal.
	///
	/// Refusals become [`Error::RateLimited`]; backend failures are returned unchanged.
	pub async fn admit(&self, permits: Permits) -> Result<()> {
		let Some(admission) = self.0.read().clone() else { return Ok(()) };

		for _ in 0..permits.count() {
			let decision = admission.limiter.allow(&admission.key).await?;

			if !decision.allowed {
				return Err(Error::RateLimited {
					reset_at: decision.reset_at,
					retry_after: decision.retry_after,
				});
			}
		}

		Ok(())
	}
}
impl Debug for RequestGate {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestGate")
			.field("key", &self.0.read().as_ref().map(|admission| admission.key.clone()))
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{
		_preludet::{memory_limiter, test_clock},
		client::token::TokenSecret,
		ratelimit::{Decision, LimiterFuture},
	};

	struct Recording(Mutex<Vec<String>>);
	impl Limiter for Recording {
		fn allow<'a>(&'a self, key: &'a str) -> LimiterFuture<'a, Decision> {
			self.0.lock().push(key.to_owned());

			let decision = Decision::allow(u64::MAX, OffsetDateTime::UNIX_EPOCH);

			Box::pin(async move { Ok::<_, Error>(decision) })
		}
	}

	#[test]
	fn estimates_follow_token_freshness() {
		let now = macros::datetime!(2025-11-10 12:00 UTC);
		let threshold = Duration::seconds(60);
		let fresh = TokenState::new(TokenSecret::new("t"), Some(now + Duration::hours(1)));
		let soon = TokenState::new(TokenSecret::new("t"), Some(now + Duration::seconds(5)));

		assert_eq!(Permits::estimate(&TokenState::default(), now, threshold), Permits::RefreshAndCall);
		assert_eq!(Permits::estimate(&soon, now, threshold), Permits::RefreshAndCall);
		assert_eq!(Permits::estimate(&fresh, now, threshold), Permits::Call);
		assert_eq!(Permits::RefreshAndCall.count(), 2);
		assert!(!Permits::Call.includes_refresh());
	}

	#[tokio::test]
	async fn admissions_are_charged_to_the_installed_key() {
		let gate = RequestGate::default();
		let limiter = Arc::new(Recording(Mutex::new(Vec::new())));

		gate.admit(Permits::RefreshAndCall).await.expect("Gates without limiters always admit.");
		gate.install(limiter.clone(), "merchant-7");
		gate.admit(Permits::RefreshAndCall).await.expect("Recording limiter always admits.");

		assert_eq!(*limiter.0.lock(), ["merchant-7", "merchant-7"]);

		gate.clear();
		gate.admit(Permits::Call).await.expect("Cleared gates always admit.");

		assert_eq!(limiter.0.lock().len(), 2);
		assert!(!gate.is_enabled());
	}

	#[tokio::test]
	async fn second_permit_refusal_fails_without_refund() {
		let clock = test_clock();
		let limiter = memory_limiter(Duration::seconds(10), 1, "", clock.clone());
		let gate = RequestGate::default();

		gate.install(limiter.clone(), "k");

		let err = gate
			.admit(Permits::RefreshAndCall)
			.await
			.expect_err("A one-permit window cannot admit a refresh plus a call.");

		assert!(matches!(err, Error::RateLimited { .. }));

		let decision = limiter.allow("k").await.expect("Memory admissions should not fail.");

		assert!(!decision.allowed);
	}
}
