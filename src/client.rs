//! Payments API client with a rate-limited dispatch path.
//!
//! [`Client::send`] is the only route to the network. It estimates how many permits the call
//! needs (see [`Permits`]), takes them from the installed [`Limiter`], and only then refreshes
//! the token, attaches credentials, serializes the body, and performs I/O.

pub mod gate;
pub mod token;

pub use gate::*;
pub use token::{TokenSecret, TokenState};

// crates.io
use reqwest::{Method, StatusCode, header::HeaderMap};
use serde::de::DeserializeOwned;
// self
use crate::{
	_prelude::*,
	clock::{Clock, SystemClock},
	client::token::TokenRefresher,
	error::{ConfigError, TransientError, TransportError},
	http::ReqwestHttpClient,
	obs::{self, CallKind, CallOutcome, CallSpan},
	ratelimit::Limiter,
};

const BODY_PREVIEW_LIMIT: usize = 512;

/// How client credentials are presented to the token endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientAuthMethod {
	/// HTTP Basic authentication header.
	#[default]
	ClientSecretBasic,
	/// Credentials in the form body.
	ClientSecretPost,
}

/// Validated client settings.
#[derive(Clone, Debug)]
pub struct ClientConfig {
	/// Root every API path is joined onto.
	pub base_url: Url,
	/// OAuth 2.0 token endpoint.
	pub token_url: Url,
	/// OAuth 2.0 client identifier; also the default admission key.
	pub client_id: String,
	/// Optional client secret.
	pub client_secret: Option<String>,
	/// Client authentication style at the token endpoint.
	pub client_auth: ClientAuthMethod,
	/// Scopes requested with every token refresh.
	pub scopes: Vec<String>,
	/// Remaining lifetime under which a cached token counts as about to expire.
	pub refresh_threshold: Duration,
	/// Optional `User-Agent` override.
	pub user_agent: Option<String>,
}
impl ClientConfig {
	/// Default value of [`ClientConfig::refresh_threshold`].
	pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::seconds(60);

	/// Returns a builder for [`ClientConfig`].
	pub fn builder() -> ClientConfigBuilder {
		ClientConfigBuilder::default()
	}
}

/// Builder for [`ClientConfig`] values.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
	base_url: Option<Url>,
	token_url: Option<Url>,
	client_id: Option<String>,
	client_secret: Option<String>,
	client_auth: ClientAuthMethod,
	scopes: Vec<String>,
	refresh_threshold: Option<Duration>,
	user_agent: Option<String>,
}
impl ClientConfigBuilder {
	/// Sets the API root.
	pub fn base_url(mut self, url: Url) -> Self {
		self.base_url = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_url(mut self, url: Url) -> Self {
		self.token_url = Some(url);

		self
	}

	/// Sets the client identifier.
	pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
		self.client_id = Some(client_id.into());

		self
	}

	/// Sets the client secret.
	pub fn client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Overrides how credentials reach the token endpoint.
	pub fn client_auth(mut self, method: ClientAuthMethod) -> Self {
		self.client_auth = method;

		self
	}

	/// Adds a scope requested on refresh.
	pub fn scope(mut self, scope: impl Into<String>) -> Self {
		self.scopes.push(scope.into());

		self
	}

	/// Overrides the soon-to-expire threshold (defaults to 60 seconds; negatives clamp to zero).
	pub fn refresh_threshold(mut self, threshold: Duration) -> Self {
		self.refresh_threshold = Some(if threshold.is_negative() { Duration::ZERO } else { threshold });

		self
	}

	/// Overrides the `User-Agent` header.
	pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.user_agent = Some(user_agent.into());

		self
	}

	/// Consumes the builder and validates the resulting config.
	pub fn build(self) -> Result<ClientConfig, ConfigError> {
		let mut base_url = self.base_url.ok_or(ConfigError::MissingField { field: "base_url" })?;
		let token_url = self.token_url.ok_or(ConfigError::MissingField { field: "token_url" })?;
		let client_id = self
			.client_id
			.filter(|id| !id.is_empty())
			.ok_or(ConfigError::MissingField { field: "client_id" })?;

		validate_scheme("base_url", &base_url)?;
		validate_scheme("token_url", &token_url)?;

		if base_url.cannot_be_a_base() {
			return Err(ConfigError::CannotBeABase { url: base_url.to_string() });
		}
		// `Url::join` replaces a final segment that lacks a trailing `/`.
		if !base_url.path().ends_with('/') {
			let path = format!("{}/", base_url.path());

			base_url.set_path(&path);
		}

		Ok(ClientConfig {
			base_url,
			token_url,
			client_id,
			client_secret: self.client_secret,
			client_auth: self.client_auth,
			scopes: self.scopes,
			refresh_threshold: self
				.refresh_threshold
				.unwrap_or(ClientConfig::DEFAULT_REFRESH_THRESHOLD),
			user_agent: self.user_agent,
		})
	}
}

fn validate_scheme(field: &'static str, url: &Url) -> Result<(), ConfigError> {
	match url.scheme() {
		"http" | "https" => Ok(()),
		_ => Err(ConfigError::UnsupportedScheme { field, url: url.to_string() }),
	}
}

/// Outbound API request; the body stays a JSON tree until after admission.
#[derive(Clone, Debug)]
pub struct ApiRequest {
	/// HTTP method.
	pub method: Method,
	/// Path relative to [`ClientConfig::base_url`].
	pub path: String,
	/// Query parameters.
	pub query: Vec<(String, String)>,
	/// JSON body, if any.
	pub body: Option<serde_json::Value>,
	/// Extra headers.
	pub headers: HeaderMap,
}
impl ApiRequest {
	/// Creates a request without body or query.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			method,
			path: path.into(),
			query: Vec::new(),
			body: None,
			headers: HeaderMap::new(),
		}
	}

	/// Shorthand for a `GET` request.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::GET, path)
	}

	/// Shorthand for a `POST` request.
	pub fn post(path: impl Into<String>) -> Self {
		Self::new(Method::POST, path)
	}

	/// Shorthand for a `DELETE` request.
	pub fn delete(path: impl Into<String>) -> Self {
		Self::new(Method::DELETE, path)
	}

	/// Appends a query parameter.
	pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.query.push((key.into(), value.into()));

		self
	}

	/// Attaches a JSON body.
	pub fn json<B>(mut self, body: &B) -> Result<Self>
	where
		B: ?Sized + Serialize,
	{
		self.body = Some(
			serde_json::to_value(body).map_err(|source| ConfigError::RequestBody { source })?,
		);

		Ok(self)
	}

	/// Adds a header.
	pub fn header(mut self, name: reqwest::header::HeaderName, value: reqwest::header::HeaderValue) -> Self {
		self.headers.insert(name, value);

		self
	}
}

/// Successful API response.
#[derive(Clone, Debug)]
pub struct ApiResponse {
	/// HTTP status.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Raw body.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Decodes the body as JSON, reporting the failing path on mismatch.
	pub fn json<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let deserializer = &mut serde_json::Deserializer::from_slice(&self.body);

		serde_path_to_error::deserialize(deserializer).map_err(|source| {
			TransientError::ResponseParse { source, status: self.status.as_u16() }.into()
		})
	}
}

/// Payments API client.
pub struct Client {
	config: ClientConfig,
	http: ReqwestHttpClient,
	clock: Arc<dyn Clock>,
	gate: RequestGate,
	token: RwLock<TokenState>,
	refresher: TokenRefresher,
	refresh_guard: AsyncMutex<()>,
}
impl Client {
	/// Creates a client with its own reqwest transport and the system clock.
	pub fn new(config: ClientConfig) -> Result<Self> {
		let http = ReqwestHttpClient::build(config.user_agent.as_deref())?;

		Ok(Self::with_http_client(config, http))
	}

	/// Creates a client that reuses `http`.
	pub fn with_http_client(config: ClientConfig, http: ReqwestHttpClient) -> Self {
		Self {
			refresher: TokenRefresher::from_config(&config),
			config,
			http,
			clock: Arc::new(SystemClock),
			gate: RequestGate::default(),
			token: Default::default(),
			refresh_guard: AsyncMutex::new(()),
		}
	}

	/// Replaces the clock used for token expiry checks.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Returns the validated configuration.
	pub fn config(&self) -> &ClientConfig {
		&self.config
	}

	/// Installs `limiter`, charging every admission to `key`. Replaces any prior limiter.
	pub fn set_limiter(&self, limiter: Arc<dyn Limiter>, key: impl Into<String>) {
		self.gate.install(limiter, key);
	}

	/// Installs `limiter`, charging admissions to the client identifier.
	pub fn set_limiter_for_client(&self, limiter: Arc<dyn Limiter>) {
		self.gate.install(limiter, self.config.client_id.clone());
	}

	/// Removes the limiter.
	pub fn clear_limiter(&self) {
		self.gate.clear();
	}

	/// Caches `token` without a known expiry; it is treated as fresh until replaced.
	pub fn set_access_token(&self, token: impl Into<String>) {
		*self.token.write() = TokenState::new(TokenSecret::new(token), None);
	}

	/// Caches `token` expiring at `expires_at`.
	pub fn set_access_token_with_expiry(&self, token: impl Into<String>, expires_at: OffsetDateTime) {
		*self.token.write() = TokenState::new(TokenSecret::new(token), Some(expires_at));
	}

	/// Drops the cached token; the next call refreshes.
	pub fn clear_access_token(&self) {
		*self.token.write() = TokenState::default();
	}

	/// Returns a snapshot of the cached token state.
	pub fn token_state(&self) -> TokenState {
		self.token.read().clone()
	}

	/// Sends `GET path` and decodes the JSON response.
	pub async fn get<T>(&self, path: &str) -> Result<T>
	where
		T: DeserializeOwned,
	{
		self.send(ApiRequest::get(path)).await?.json()
	}

	/// Sends `POST path` with a JSON body and decodes the JSON response.
	pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
	where
		B: ?Sized + Serialize,
		T: DeserializeOwned,
	{
		self.send(ApiRequest::post(path).json(body)?).await?.json()
	}

	/// Sends `DELETE path`, discarding the response body.
	pub async fn delete(&self, path: &str) -> Result<()> {
		self.send(ApiRequest::delete(path)).await.map(|_| ())
	}

	/// Dispatches `request` through the gate.
	///
	/// Fails with [`Error::RateLimited`] before any I/O when the limiter refuses one of the
	/// permits the call needs. Limiter backend failures are returned as they are.
	pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
		const KIND: CallKind = CallKind::Api;

		let span = CallSpan::new(KIND, &request.path);

		obs::record_call_outcome(KIND, CallOutcome::Attempt);

		let result = span.instrument(self.dispatch(request)).await;

		obs::record_call_outcome(KIND, match &result {
			Ok(_) => CallOutcome::Success,
			Err(e) if e.is_rate_limited() => CallOutcome::RateLimited,
			Err(_) => CallOutcome::Failure,
		});

		result
	}

	async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse> {
		let snapshot = self.token_state();
		let permits = Permits::estimate(&snapshot, self.clock.now(), self.config.refresh_threshold);

		self.gate.admit(permits).await?;

		let token = match (permits, snapshot.access_token) {
			(Permits::Call, Some(token)) => token,
			_ => self.refresh().await?,
		};

		self.execute(request, &token).await
	}

	async fn refresh(&self) -> Result<TokenSecret> {
		const KIND: CallKind = CallKind::TokenRefresh;

		let _singleflight = self.refresh_guard.lock().await;
		let current = self.token_state();

		let stale = current.needs_refresh(self.clock.now(), self.config.refresh_threshold);

		// Another caller refreshed while this one waited on the guard.
		if let (false, Some(token)) = (stale, current.access_token) {
			return Ok(token);
		}

		let span = CallSpan::new(KIND, "client_credentials");

		obs::record_call_outcome(KIND, CallOutcome::Attempt);

		let result = span.instrument(self.refresher.fetch(&self.http, self.clock.now())).await;

		obs::record_call_outcome(KIND, match &result {
			Ok(_) => CallOutcome::Success,
			Err(_) => CallOutcome::Failure,
		});

		let state = result?;
		let token = state.access_token.clone().ok_or(ConfigError::MissingField { field: "access_token" })?;

		*self.token.write() = state;

		Ok(token)
	}

	async fn execute(&self, request: ApiRequest, token: &TokenSecret) -> Result<ApiResponse> {
		let url = self.config.base_url.join(request.path.trim_start_matches('/')).map_err(ConfigError::from)?;
		let mut builder = self
			.http
			.request(request.method, url)
			.headers(request.headers)
			.bearer_auth(token.expose());

		if !request.query.is_empty() {
			builder = builder.query(&request.query);
		}
		if let Some(body) = request.body.as_ref() {
			builder = builder.json(body);
		}

		let response = builder.send().await.map_err(map_send_error)?;
		let status = response.status();
		let headers = response.headers().to_owned();
		let body = response.bytes().await.map_err(TransportError::from)?.to_vec();

		if !status.is_success() {
			return Err(Error::Api { status: status.as_u16(), body: body_preview(&body) });
		}

		Ok(ApiResponse { status, headers, body })
	}
}
impl Debug for Client {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Client")
			.field("base_url", &self.config.base_url.as_str())
			.field("client_id", &self.config.client_id)
			.field("client_secret_set", &self.config.client_secret.is_some())
			.field("gate", &self.gate)
			.finish()
	}
}

fn map_send_error(err: ReqwestError) -> Error {
	if err.is_builder() {
		ConfigError::from(err).into()
	} else {
		TransportError::from(err).into()
	}
}

fn body_preview(body: &[u8]) -> String {
	let text = String::from_utf8_lossy(body);

	match text.char_indices().nth(BODY_PREVIEW_LIMIT) {
		Some((idx, _)) => format!("{}...", &text[..idx]),
		None => text.into_owned(),
	}
}
