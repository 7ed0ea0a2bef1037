//! Access-token lifetime state and the client-credentials refresh.

// crates.io
use oauth2::{
	AuthType, ClientId, ClientSecret, EndpointNotSet, EndpointSet, HttpClientError,
	RequestTokenError, Scope, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicErrorResponseType, BasicRequestTokenError},
};
// self
use crate::{
	_prelude::*,
	client::{ClientAuthMethod, ClientConfig},
	error::{ConfigError, TransientError, TransportError},
	http::{ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot},
};

type TokenEndpointClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Redacted token secret wrapper keeping sensitive material out of logs.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("TokenSecret").field(&"<redacted>").finish()
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Cached access token plus its expiry, if known.
#[derive(Clone, Debug, Default)]
pub struct TokenState {
	/// Bearer token attached to API calls.
	pub access_token: Option<TokenSecret>,
	/// Expiry instant; `None` means the token is treated as long-lived.
	pub expires_at: Option<OffsetDateTime>,
}
impl TokenState {
	/// State holding `token` with an optional expiry.
	pub fn new(token: TokenSecret, expires_at: Option<OffsetDateTime>) -> Self {
		Self { access_token: Some(token), expires_at }
	}

	/// Returns `true` when the next call has to refresh first: no token is cached, or it has
	/// strictly less than `threshold` left at `now`.
	pub fn needs_refresh(&self, now: OffsetDateTime, threshold: Duration) -> bool {
		if self.access_token.is_none() {
			return true;
		}

		match self.expires_at {
			Some(expires_at) => expires_at - now < threshold,
			None => false,
		}
	}
}

/// Client-credentials grant against the configured token endpoint.
pub(crate) struct TokenRefresher {
	oauth_client: TokenEndpointClient,
	scopes: Vec<String>,
}
impl TokenRefresher {
	pub(crate) fn from_config(config: &ClientConfig) -> Self {
		let mut oauth_client = BasicClient::new(ClientId::new(config.client_id.clone()))
			.set_token_uri(TokenUrl::from_url(config.token_url.clone()));

		if let Some(secret) = config.client_secret.as_ref() {
			oauth_client = oauth_client.set_client_secret(ClientSecret::new(secret.clone()));
		}
		if matches!(config.client_auth, ClientAuthMethod::ClientSecretPost) {
			oauth_client = oauth_client.set_auth_type(AuthType::RequestBody);
		}

		Self { oauth_client, scopes: config.scopes.clone() }
	}

	/// Requests a new access token; the expiry is anchored at `now`.
	pub(crate) async fn fetch(
		&self,
		http: &ReqwestHttpClient,
		now: OffsetDateTime,
	) -> Result<TokenState> {
		let meta = ResponseMetadataSlot::default();
		let instrumented = http.instrumented(meta.clone());
		let mut request = self.oauth_client.exchange_client_credentials();

		for scope in &self.scopes {
			request = request.add_scope(Scope::new(scope.clone()));
		}

		let response = request
			.request_async(&instrumented)
			.await
			.map_err(|err| map_request_error(meta.take(), err))?;
		let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
		let expires_in = i64::try_from(expires_in).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

		if expires_in <= 0 {
			return Err(ConfigError::NonPositiveExpiresIn.into());
		}

		Ok(TokenState::new(
			TokenSecret::new(response.access_token().secret().to_owned()),
			Some(now + Duration::seconds(expires_in)),
		))
	}
}
impl Debug for TokenRefresher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRefresher").field("scopes", &self.scopes).finish()
	}
}

fn map_request_error(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<ReqwestError>>,
) -> Error {
	let meta = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) => map_server_response_error(response, meta),
		RequestTokenError::Request(error) => map_transport_error(error, meta),
		RequestTokenError::Parse(source, _body) =>
			TransientError::TokenResponseParse { source, status: meta_status(meta) }.into(),
		RequestTokenError::Other(message) => transient(message, meta),
	}
}

fn map_server_response_error(response: BasicErrorResponse, meta: Option<&ResponseMetadata>) -> Error {
	let reason = match response.error_description() {
		Some(description) => format!("{}: {description}", response.error().as_ref()),
		None => response.error().as_ref().to_owned(),
	};

	match response.error() {
		BasicErrorResponseType::InvalidClient => Error::InvalidClient { reason },
		BasicErrorResponseType::InvalidGrant | BasicErrorResponseType::UnauthorizedClient =>
			Error::InvalidGrant { reason },
		_ => transient(format!("OAuth error {reason}"), meta),
	}
}

fn map_transport_error(err: HttpClientError<ReqwestError>, meta: Option<&ResponseMetadata>) -> Error {
	match err {
		HttpClientError::Reqwest(inner) if inner.is_timeout() =>
			transient("request timed out", meta),
		HttpClientError::Reqwest(inner) if inner.is_builder() => ConfigError::from(*inner).into(),
		HttpClientError::Reqwest(inner) => TransportError::from(*inner).into(),
		HttpClientError::Http(inner) => ConfigError::from(inner).into(),
		HttpClientError::Io(inner) => TransportError::Io(inner).into(),
		HttpClientError::Other(message) => transient(message, meta),
		_ => transient("unknown HTTP client error", meta),
	}
}

fn transient(message: impl Into<String>, meta: Option<&ResponseMetadata>) -> Error {
	TransientError::TokenEndpoint {
		message: message.into(),
		status: meta_status(meta),
		retry_after: meta.and_then(|value| value.retry_after),
	}
	.into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}
