// self
use crate::obs::{AdmissionOutcome, CallKind, CallOutcome};

/// Records a call outcome via the global metrics recorder (when enabled).
pub fn record_call_outcome(kind: CallKind, outcome: CallOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"payments_client_call_total",
			"call" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Records a single limiter admission, emitting an event for refusals and backend errors.
pub fn record_admission(key: &str, outcome: AdmissionOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("payments_client_admission_total", "outcome" => outcome.as_str())
			.increment(1);
	}
	#[cfg(feature = "tracing")]
	{
		match outcome {
			AdmissionOutcome::Allowed => tracing::trace!(key, "permit granted"),
			AdmissionOutcome::Blocked => tracing::debug!(key, "window exhausted"),
			AdmissionOutcome::Error => tracing::warn!(key, "limiter backend failed"),
		}
	}

	#[cfg(not(any(feature = "metrics", feature = "tracing")))]
	{
		let _ = (key, outcome);
	}
}

/// Records the result of a housekeeping sweep.
pub fn record_sweep(evicted: usize) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("payments_client_evicted_buckets_total").increment(evicted as u64);
	}
	#[cfg(feature = "tracing")]
	{
		tracing::trace!(evicted, "swept expired window buckets");
	}

	#[cfg(not(any(feature = "metrics", feature = "tracing")))]
	{
		let _ = evicted;
	}
}
