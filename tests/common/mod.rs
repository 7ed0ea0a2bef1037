//! Stub-server fixtures shared by the integration suites.

#![allow(dead_code)]

// std
use std::sync::Arc;
// crates.io
use httpmock::{Mock, prelude::*};
use time::Duration;
// self
use payments_client::{
	client::{Client, ClientConfig},
	clock::{Clock, MockClock},
	ratelimit::{FixedWindowConfig, FixedWindowLimiter, Limiter, MemoryBackend},
	url::Url,
};

pub const CLIENT_ID: &str = "client-test";
pub const CLIENT_SECRET: &str = "secret-test";
pub const TOKEN_PATH: &str = "/oauth/token";
pub const PAYMENT_PATH: &str = "/v1/payments/pay_123";

pub fn clock() -> Arc<MockClock> {
	Arc::new(MockClock::new(time::macros::datetime!(2025-11-10 12:00 UTC)))
}

pub fn memory_limiter(
	window: Duration,
	limit: i64,
	clock: &Arc<MockClock>,
) -> Arc<FixedWindowLimiter<MemoryBackend>> {
	Arc::new(FixedWindowLimiter::in_memory(FixedWindowConfig::new(window, limit), clock.clone()))
}

pub fn build_client(server: &MockServer, clock: &Arc<MockClock>) -> Client {
	let config = ClientConfig::builder()
		.base_url(Url::parse(&server.base_url()).expect("Stub server base URL should parse."))
		.token_url(Url::parse(&server.url(TOKEN_PATH)).expect("Stub token URL should parse."))
		.client_id(CLIENT_ID)
		.client_secret(CLIENT_SECRET)
		.build()
		.expect("Test client configuration should be valid.");
	let clock: Arc<dyn Clock> = clock.clone();

	Client::new(config).expect("Test client should build.").with_clock(clock)
}

pub fn install(client: &Client, limiter: Arc<dyn Limiter>) {
	client.set_limiter(limiter, CLIENT_ID);
}

pub async fn mock_token_endpoint<'a>(server: &'a MockServer, access_token: &str) -> Mock<'a> {
	let body = format!(
		"{{\"access_token\":\"{access_token}\",\"token_type\":\"bearer\",\"expires_in\":3600}}"
	);

	server
		.mock_async(|when, then| {
			when.method(POST)
				.path(TOKEN_PATH)
				.header("content-type", "application/x-www-form-urlencoded");
			then.status(200).header("content-type", "application/json").body(body);
		})
		.await
}

pub async fn mock_payment<'a>(server: &'a MockServer, bearer: &str) -> Mock<'a> {
	let authorization = format!("Bearer {bearer}");

	server
		.mock_async(|when, then| {
			when.method(GET).path(PAYMENT_PATH).header("authorization", authorization);
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"id\":\"pay_123\",\"amount\":1200,\"currency\":\"EUR\",\"status\":\"captured\"}");
		})
		.await
}
