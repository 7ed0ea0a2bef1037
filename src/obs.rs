//! Optional observability helpers for the request gate and limiter backends.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `payments_client.call` with the `call`
//!   (API call or token refresh) and `stage` fields, plus events for refusals and sweeps.
//! - Enable `metrics` to increment `payments_client_admission_total` (labeled by `outcome`)
//!   and `payments_client_call_total` (labeled by `call` + `outcome`).

mod metrics;
mod tracing;

pub use self::metrics::*;
pub use self::tracing::*;

// self
use crate::_prelude::*;

/// Outbound call kinds passing through the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallKind {
	/// Payments API request.
	Api,
	/// Client-credentials token refresh.
	TokenRefresh,
}
impl CallKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallKind::Api => "api",
			CallKind::TokenRefresh => "token_refresh",
		}
	}
}
impl Display for CallKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallOutcome {
	/// Entry to the gate.
	Attempt,
	/// Response received and accepted.
	Success,
	/// Refused by the limiter before any I/O.
	RateLimited,
	/// Failure propagated back to the caller.
	Failure,
}
impl CallOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallOutcome::Attempt => "attempt",
			CallOutcome::Success => "success",
			CallOutcome::RateLimited => "rate_limited",
			CallOutcome::Failure => "failure",
		}
	}
}
impl Display for CallOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Per-permit limiter outcomes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdmissionOutcome {
	/// Permit granted.
	Allowed,
	/// Window exhausted.
	Blocked,
	/// Backend failed.
	Error,
}
impl AdmissionOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			AdmissionOutcome::Allowed => "allowed",
			AdmissionOutcome::Blocked => "blocked",
			AdmissionOutcome::Error => "error",
		}
	}
}
impl Display for AdmissionOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
