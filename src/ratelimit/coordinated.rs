//! Redis-coordinated [`FixedWindowBackend`] for budgets shared across processes.
//!
//! The increment and the first-write expiry run inside one Lua script so concurrent clients
//! can never both see `count == 1` and skip setting the TTL. The script takes one key (the
//! prefixed base key) and two arguments (`now_ms`, `window_ms`) and returns
//! `[count, reset_ms]`; buckets are named `base_key:window_start_ms`, the same namespace the
//! memory backend uses.

// crates.io
use redis::{Client as RedisClient, Script, Value, aio::ConnectionManager};
// self
use crate::{
	_prelude::*,
	ratelimit::{
		BackendError, BackendFuture, FixedWindowBackend, WindowCount, epoch_millis,
		from_epoch_millis, window_millis,
	},
};

/// Lua source executed for every admission.
pub const FIXED_WINDOW_SCRIPT: &str = r#"
local now_ms = tonumber(ARGV[1])
local window_ms = tonumber(ARGV[2])
local window_start = math.floor(now_ms / window_ms) * window_ms
local bucket = KEYS[1] .. ":" .. string.format("%.0f", window_start)
local count = redis.call("INCR", bucket)
if count == 1 then
	redis.call("PEXPIRE", bucket, window_ms + 1000)
end
return { count, window_start + window_ms }
"#;

/// Executes the fixed-window script against a coordinated store.
pub trait ScriptExecutor
where
	Self: Send + Sync,
{
	/// Runs the script with `key` as its only key and `(now_ms, window_ms)` as arguments.
	fn eval_fixed_window<'a>(
		&'a self,
		key: &'a str,
		now_ms: i64,
		window_ms: i64,
	) -> BackendFuture<'a, Value>;
}

/// [`ScriptExecutor`] over a multiplexed, auto-reconnecting Redis connection.
///
/// [`Script`] submits `EVALSHA` first and falls back to `EVAL` when the server has not cached
/// the script yet.
#[derive(Clone)]
pub struct RedisScriptExecutor {
	connection: ConnectionManager,
	script: Arc<Script>,
}
impl RedisScriptExecutor {
	/// Connects to the Redis server at `url`.
	pub async fn connect(url: &str) -> Result<Self, BackendError> {
		let client = RedisClient::open(url)?;
		let connection = ConnectionManager::new(client).await?;

		Ok(Self::with_connection(connection))
	}

	/// Reuses an existing connection manager.
	pub fn with_connection(connection: ConnectionManager) -> Self {
		Self { connection, script: Arc::new(Script::new(FIXED_WINDOW_SCRIPT)) }
	}
}
impl ScriptExecutor for RedisScriptExecutor {
	fn eval_fixed_window<'a>(
		&'a self,
		key: &'a str,
		now_ms: i64,
		window_ms: i64,
	) -> BackendFuture<'a, Value> {
		let mut connection = self.connection.clone();
		let script = self.script.clone();

		Box::pin(async move {
			let mut invocation = script.prepare_invoke();

			invocation.key(key).arg(now_ms).arg(window_ms);

			let reply: Value = invocation.invoke_async(&mut connection).await?;

			Ok::<_, BackendError>(reply)
		})
	}
}
impl Debug for RedisScriptExecutor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RedisScriptExecutor").field("script", &self.script.get_hash()).finish()
	}
}

/// Fixed-window backend that delegates every increment to a [`ScriptExecutor`].
#[derive(Clone, Debug)]
pub struct CoordinatedBackend<E = RedisScriptExecutor> {
	executor: E,
	timeout: Option<Duration>,
}
impl CoordinatedBackend<RedisScriptExecutor> {
	/// Connects to the Redis server at `url`.
	pub async fn connect(url: &str) -> Result<Self, BackendError> {
		Ok(Self::new(RedisScriptExecutor::connect(url).await?))
	}
}
impl<E> CoordinatedBackend<E>
where
	E: ScriptExecutor,
{
	/// Wraps `executor` without a per-call deadline.
	pub fn new(executor: E) -> Self {
		Self { executor, timeout: None }
	}

	/// Aborts calls that take longer than `timeout` with [`BackendError::Timeout`].
	///
	/// An aborted call may still have been committed by the server, so the permit should be
	/// considered consumed.
	pub fn with_timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout).filter(|t| t.is_positive());

		self
	}

	/// Returns the wrapped executor.
	pub fn executor(&self) -> &E {
		&self.executor
	}

	async fn eval(&self, base_key: &str, now_ms: i64, window_ms: i64) -> Result<Value, BackendError> {
		let call = self.executor.eval_fixed_window(base_key, now_ms, window_ms);
		let Some(timeout) = self.timeout else { return call.await };
		let deadline = std::time::Duration::try_from(timeout).unwrap_or(std::time::Duration::MAX);

		tokio::time::timeout(deadline, call).await.map_err(|_| BackendError::Timeout { timeout })?
	}
}
impl<E> FixedWindowBackend for CoordinatedBackend<E>
where
	E: ScriptExecutor,
{
	fn incr_window<'a>(
		&'a self,
		base_key: &'a str,
		window: Duration,
		now: OffsetDateTime,
	) -> BackendFuture<'a, WindowCount> {
		Box::pin(async move {
			let reply = self.eval(base_key, epoch_millis(now), window_millis(window)).await?;
			let (count, reset_ms) = parse_script_reply(reply)?;

			Ok::<_, BackendError>(WindowCount { count, reset_at: from_epoch_millis(reset_ms) })
		})
	}
}

/// Extracts `(count, reset_ms)` from a script reply.
pub fn parse_script_reply(reply: Value) -> Result<(u64, i64), BackendError> {
	let parsed = match &reply {
		Value::Array(items) => match items.as_slice() {
			[Value::Int(count), Value::Int(reset_ms)] =>
				u64::try_from(*count).ok().map(|count| (count, *reset_ms)),
			_ => None,
		},
		_ => None,
	};

	parsed.ok_or_else(|| BackendError::UnexpectedScriptResult { reply: format!("{reply:?}") })
}
