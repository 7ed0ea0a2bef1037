//! Payments REST client whose every outbound call, token refreshes included, is admitted by a
//! client-side fixed-window rate limiter backed by an in-process sharded store or a Redis
//! script.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod clock;
pub mod client;
pub mod error;
pub mod http;
pub mod obs;
pub mod ratelimit;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and limiter fixtures for tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		clock::MockClock,
		ratelimit::{FixedWindowConfig, FixedWindowLimiter, MemoryBackend},
	};

	/// Returns a mock clock pinned to a fixed, minute-aligned instant.
	pub fn test_clock() -> Arc<MockClock> {
		Arc::new(MockClock::new(time::macros::datetime!(2025-11-10 12:00 UTC)))
	}

	/// Builds a fixed-window limiter over a fresh [`MemoryBackend`] driven by `clock`.
	pub fn memory_limiter(
		window: Duration,
		limit: i64,
		key_prefix: &str,
		clock: Arc<MockClock>,
	) -> Arc<FixedWindowLimiter<MemoryBackend>> {
		let config = FixedWindowConfig::new(window, limit).with_key_prefix(key_prefix);

		Arc::new(FixedWindowLimiter::in_memory(config, clock))
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
