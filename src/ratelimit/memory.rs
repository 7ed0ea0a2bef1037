//! Sharded in-process [`FixedWindowBackend`].
//!
//! Buckets are spread over a power-of-two number of shards, each a map behind its own mutex,
//! so admissions for keys on different shards never contend. A housekeeping thread sweeps
//! expired buckets once per interval; admission itself never depends on it because every
//! window writes to a fresh, start-suffixed key.

// std
use std::{
	sync::{
		Weak,
		mpsc::{self, RecvTimeoutError, Sender},
	},
	thread::{self, JoinHandle},
};
// self
use crate::{
	_prelude::*,
	clock::{Clock, SystemClock},
	ratelimit::{BackendError, BackendFuture, FixedWindowBackend, WindowBounds, WindowCount},
};

/// Grace period a bucket outlives its window before it becomes evictable.
const EXPIRY_GRACE: Duration = Duration::SECOND;

type Shards = Arc<[Shard]>;

#[derive(Debug, Default)]
struct Shard(Mutex<HashMap<String, Entry>>);

#[derive(Clone, Copy, Debug)]
struct Entry {
	count: u64,
	expiry: OffsetDateTime,
}

/// In-process fixed-window store.
pub struct MemoryBackend {
	shards: Shards,
	mask: u32,
	clock: Arc<dyn Clock>,
	sweep_interval: Duration,
	housekeeper: Mutex<Option<Housekeeper>>,
}
impl MemoryBackend {
	/// Shard count used by [`MemoryBackend::new`].
	pub const DEFAULT_SHARDS: usize = 16;
	/// Interval between housekeeping sweeps.
	pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::MINUTE;

	/// Creates a backend with [`Self::DEFAULT_SHARDS`] shards.
	pub fn new() -> Self {
		Self::with_shards(Self::DEFAULT_SHARDS)
	}

	/// Creates a backend with `shards` rounded up to the next power of two (minimum one).
	pub fn with_shards(shards: usize) -> Self {
		let count = shards.max(1).checked_next_power_of_two().unwrap_or(1 << 31).min(1 << 31);
		let shards: Shards = (0..count).map(|_| Shard::default()).collect();
		let mask = u32::try_from(count - 1).unwrap_or(u32::MAX);
		let backend = Self {
			shards,
			mask,
			clock: Arc::new(SystemClock),
			sweep_interval: Self::DEFAULT_SWEEP_INTERVAL,
			housekeeper: Mutex::new(None),
		};

		backend.restart_housekeeper();

		backend
	}

	/// Replaces the clock the housekeeper uses to decide what has expired.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self.restart_housekeeper();

		self
	}

	/// Overrides how often the housekeeper sweeps.
	pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
		self.sweep_interval = interval;

		self.restart_housekeeper();

		self
	}

	/// Number of shards.
	pub fn shard_count(&self) -> usize {
		self.shards.len()
	}

	/// Number of live buckets across all shards.
	pub fn len(&self) -> usize {
		self.shards.iter().map(|shard| shard.0.lock().len()).sum()
	}

	/// Returns `true` when no bucket is stored.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Drops every bucket whose expiry is at or before `now`, returning how many were removed.
	pub fn evict_expired(&self, now: OffsetDateTime) -> usize {
		sweep(&self.shards, now)
	}

	/// Stops the housekeeping thread and waits for it to exit.
	pub fn shutdown(&self) {
		if let Some(housekeeper) = self.housekeeper.lock().take() {
			housekeeper.stop();
		}
	}

	fn shard_for(&self, key: &str) -> &Shard {
		&self.shards[(fnv1a_32(key.as_bytes()) & self.mask) as usize]
	}

	fn incr_now(&self, base_key: &str, window: Duration, now: OffsetDateTime) -> WindowCount {
		let bounds = WindowBounds::containing(now, window);
		let reset_at = bounds.reset_at();
		let key = bounds.bucket_key(base_key);
		let mut map = self.shard_for(&key).0.lock();
		let expiry = reset_at.saturating_add(EXPIRY_GRACE);
		let entry = map.entry(key).or_insert(Entry { count: 0, expiry });

		if entry.expiry <= now {
			entry.count = 0;
		}

		entry.count += 1;
		entry.expiry = expiry;

		WindowCount { count: entry.count, reset_at }
	}

	fn restart_housekeeper(&self) {
		let mut slot = self.housekeeper.lock();

		if let Some(previous) = slot.take() {
			previous.stop();
		}

		*slot = Housekeeper::spawn(Arc::downgrade(&self.shards), self.clock.clone(), self.sweep_interval);
	}
}
impl Default for MemoryBackend {
	fn default() -> Self {
		Self::new()
	}
}
impl Debug for MemoryBackend {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("MemoryBackend")
			.field("shards", &self.shards.len())
			.field("sweep_interval", &self.sweep_interval)
			.finish()
	}
}
impl Drop for MemoryBackend {
	fn drop(&mut self) {
		self.shutdown();
	}
}
impl FixedWindowBackend for MemoryBackend {
	fn incr_window<'a>(
		&'a self,
		base_key: &'a str,
		window: Duration,
		now: OffsetDateTime,
	) -> BackendFuture<'a, WindowCount> {
		let counted = self.incr_now(base_key, window, now);

		Box::pin(async move { Ok::<_, BackendError>(counted) })
	}
}

/// Background sweeper tied to a backend's shards.
struct Housekeeper {
	stop: Sender<()>,
	handle: JoinHandle<()>,
}
impl Housekeeper {
	fn spawn(shards: Weak<[Shard]>, clock: Arc<dyn Clock>, interval: Duration) -> Option<Self> {
		let interval = std::time::Duration::try_from(interval).ok().filter(|d| !d.is_zero())?;
		let (stop, stopped) = mpsc::channel::<()>();
		let handle = thread::Builder::new()
			.name("payments-client-window-sweeper".into())
			.spawn(move || {
				loop {
					match stopped.recv_timeout(interval) {
						Err(RecvTimeoutError::Timeout) => {},
						Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
					}

					let Some(shards) = shards.upgrade() else { return };
					let evicted = sweep(&shards, clock.now());

					crate::obs::record_sweep(evicted);
				}
			})
			.ok()?;

		Some(Self { stop, handle })
	}

	fn stop(self) {
		let _ = self.stop.send(());

		if self.handle.thread().id() != thread::current().id() {
			let _ = self.handle.join();
		}
	}
}

fn sweep(shards: &[Shard], now: OffsetDateTime) -> usize {
	shards
		.iter()
		.map(|shard| {
			let mut map = shard.0.lock();
			let before = map.len();

			map.retain(|_, entry| entry.expiry > now);

			before - map.len()
		})
		.sum()
}

/// 32-bit FNV-1a.
fn fnv1a_32(bytes: &[u8]) -> u32 {
	const OFFSET_BASIS: u32 = 0x811c_9dc5;
	const PRIME: u32 = 0x0100_0193;

	bytes.iter().fold(OFFSET_BASIS, |hash, byte| (hash ^ u32::from(*byte)).wrapping_mul(PRIME))
}
