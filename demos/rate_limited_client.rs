//! Drives a payments client through a two-permit window against a local stub server: the first
//! call spends one permit on the token refresh and one on the request, the second is refused
//! before touching the network.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use serde_json::Value;
use time::Duration;
// self
use payments_client::{
	client::{Client, ClientConfig},
	error::Error,
	ratelimit::{FixedWindowConfig, FixedWindowLimiter, MemoryBackend},
	url::Url,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"demo-access\",\"token_type\":\"bearer\",\"expires_in\":900}",
			);
		})
		.await;
	let payment_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/v1/payments/pay_demo");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"id\":\"pay_demo\",\"status\":\"captured\"}");
		})
		.await;
	let config = ClientConfig::builder()
		.base_url(Url::parse(&server.base_url())?)
		.token_url(Url::parse(&server.url("/oauth/token"))?)
		.client_id("demo-merchant")
		.client_secret("super-secret")
		.scope("payments.read")
		.build()?;
	let client = Client::new(config)?;
	let limiter = FixedWindowLimiter::<MemoryBackend>::with_system_clock(
		FixedWindowConfig::new(Duration::seconds(30), 2).with_key_prefix("demo:"),
		MemoryBackend::new(),
	);

	client.set_limiter_for_client(Arc::new(limiter));

	let payment: Value = client.get("/v1/payments/pay_demo").await?;

	println!("Fetched payment: {payment}.");

	match client.get::<Value>("/v1/payments/pay_demo").await {
		Err(Error::RateLimited { reset_at, retry_after }) =>
			println!("Second call refused until {reset_at} (retry after {retry_after:?})."),
		other => println!("Unexpected outcome: {other:?}."),
	}

	token_mock.assert_async().await;
	payment_mock.assert_async().await;

	Ok(())
}
