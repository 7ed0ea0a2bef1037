mod common;

// crates.io
use httpmock::prelude::*;
use serde::Deserialize;
use time::Duration;
// self
use common::*;
use payments_client::{
	clock::Clock,
	error::Error,
	ratelimit::{BackendError, Decision, Limiter, LimiterFuture},
};

#[derive(Debug, Deserialize)]
struct Payment {
	id: String,
	amount: u64,
	status: String,
}

struct OfflineLimiter;
impl Limiter for OfflineLimiter {
	fn allow<'a>(&'a self, _: &'a str) -> LimiterFuture<'a, Decision> {
		Box::pin(async {
			Err::<Decision, Error>(BackendError::Other { message: "limiter store offline".into() }.into())
		})
	}
}

#[tokio::test]
async fn single_permit_without_token_blocks_before_any_io() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let client = build_client(&server, &clock);
	let token = mock_token_endpoint(&server, "fresh-token").await;
	let payment = mock_payment(&server, "fresh-token").await;

	install(&client, memory_limiter(Duration::seconds(10), 1, &clock));

	let err = client
		.get::<Payment>(PAYMENT_PATH)
		.await
		.expect_err("A refresh plus a call cannot fit into a one-permit window.");

	match err {
		Error::RateLimited { reset_at, retry_after } => {
			assert_eq!(reset_at, clock.now() + Duration::seconds(10));
			assert_eq!(retry_after, Some(Duration::seconds(10)));
		},
		other => panic!("Expected a rate-limit refusal, got {other:?}."),
	}

	token.assert_calls_async(0).await;
	payment.assert_calls_async(0).await;
	assert!(client.token_state().access_token.is_none());
}

#[tokio::test]
async fn two_permits_without_token_refresh_once_then_call() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let client = build_client(&server, &clock);
	let token = mock_token_endpoint(&server, "fresh-token").await;
	let payment = mock_payment(&server, "fresh-token").await;

	install(&client, memory_limiter(Duration::seconds(10), 2, &clock));

	let fetched = client
		.get::<Payment>(PAYMENT_PATH)
		.await
		.expect("Two permits should cover the refresh and the call.");

	assert_eq!(fetched.id, "pay_123");
	assert_eq!(fetched.amount, 1200);
	assert_eq!(fetched.status, "captured");

	token.assert_calls_async(1).await;
	payment.assert_calls_async(1).await;
	assert_eq!(client.token_state().expires_at, Some(clock.now() + Duration::hours(1)));
}

#[tokio::test]
async fn soon_to_expire_token_is_refreshed_when_two_permits_remain() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let client = build_client(&server, &clock);
	let token = mock_token_endpoint(&server, "fresh-token").await;
	let payment = mock_payment(&server, "fresh-token").await;

	client.set_access_token_with_expiry("stale-token", clock.now() + Duration::seconds(5));
	install(&client, memory_limiter(Duration::seconds(10), 2, &clock));
	client.get::<Payment>(PAYMENT_PATH).await.expect("Refresh and call should both be admitted.");

	token.assert_calls_async(1).await;
	payment.assert_calls_async(1).await;
	assert_eq!(
		client.token_state().access_token.map(|secret| secret.expose().to_owned()).as_deref(),
		Some("fresh-token"),
	);
}

#[tokio::test]
async fn soon_to_expire_token_is_blocked_with_one_permit() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let client = build_client(&server, &clock);
	let token = mock_token_endpoint(&server, "fresh-token").await;
	let stale = mock_payment(&server, "stale-token").await;

	client.set_access_token_with_expiry("stale-token", clock.now() + Duration::seconds(5));
	install(&client, memory_limiter(Duration::seconds(10), 1, &clock));

	let err = client
		.get::<Payment>(PAYMENT_PATH)
		.await
		.expect_err("A soon-to-expire token needs two permits.");

	assert!(err.is_rate_limited());

	token.assert_calls_async(0).await;
	stale.assert_calls_async(0).await;
}

#[tokio::test]
async fn fresh_token_spends_a_single_permit() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let client = build_client(&server, &clock);
	let token = mock_token_endpoint(&server, "fresh-token").await;
	let payment = mock_payment(&server, "cached-token").await;

	client.set_access_token_with_expiry("cached-token", clock.now() + Duration::hours(1));
	install(&client, memory_limiter(Duration::seconds(10), 1, &clock));
	client.get::<Payment>(PAYMENT_PATH).await.expect("A fresh token needs one permit.");

	let err = client
		.get::<Payment>(PAYMENT_PATH)
		.await
		.expect_err("The window holds a single permit.");

	assert!(err.is_rate_limited());

	token.assert_calls_async(0).await;
	payment.assert_calls_async(1).await;
}

#[tokio::test]
async fn tokens_without_expiry_are_never_refreshed() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let client = build_client(&server, &clock);
	let token = mock_token_endpoint(&server, "fresh-token").await;
	let payment = mock_payment(&server, "static-token").await;

	client.set_access_token("static-token");
	install(&client, memory_limiter(Duration::seconds(10), 1, &clock));
	client.get::<Payment>(PAYMENT_PATH).await.expect("Static tokens count as fresh.");

	token.assert_calls_async(0).await;
	payment.assert_calls_async(1).await;
}

#[tokio::test]
async fn budget_returns_with_the_next_window() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let client = build_client(&server, &clock);
	let payment = mock_payment(&server, "cached-token").await;

	client.set_access_token("cached-token");
	install(&client, memory_limiter(Duration::seconds(10), 1, &clock));
	client.get::<Payment>(PAYMENT_PATH).await.expect("First call fits the window.");

	assert!(client.get::<Payment>(PAYMENT_PATH).await.is_err_and(|err| err.is_rate_limited()));

	clock.advance(Duration::seconds(10));
	client.get::<Payment>(PAYMENT_PATH).await.expect("The next window admits again.");

	payment.assert_calls_async(2).await;
}

#[tokio::test]
async fn backend_failures_surface_unchanged_without_io() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let client = build_client(&server, &clock);
	let token = mock_token_endpoint(&server, "fresh-token").await;
	let payment = mock_payment(&server, "fresh-token").await;

	install(&client, std::sync::Arc::new(OfflineLimiter));

	let err = client
		.get::<Payment>(PAYMENT_PATH)
		.await
		.expect_err("Backend failures must abort the call.");

	assert!(!err.is_rate_limited());
	assert!(matches!(err, Error::Backend(BackendError::Other { .. })));

	token.assert_calls_async(0).await;
	payment.assert_calls_async(0).await;
}

#[tokio::test]
async fn clearing_the_limiter_dispatches_freely() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let client = build_client(&server, &clock);
	let token = mock_token_endpoint(&server, "fresh-token").await;
	let payment = mock_payment(&server, "fresh-token").await;

	install(&client, memory_limiter(Duration::seconds(10), 1, &clock));
	client.clear_limiter();

	for _ in 0..3 {
		client.get::<Payment>(PAYMENT_PATH).await.expect("Unlimited clients always dispatch.");
	}

	token.assert_calls_async(1).await;
	payment.assert_calls_async(3).await;
}

#[tokio::test]
async fn rejected_credentials_keep_their_permits() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let client = build_client(&server, &clock);
	let token = server
		.mock_async(|when, then| {
			when.method(POST).path(TOKEN_PATH);
			then.status(401)
				.header("content-type", "application/json")
				.body("{\"error\":\"invalid_client\",\"error_description\":\"unknown client\"}");
		})
		.await;
	let limiter = memory_limiter(Duration::seconds(10), 3, &clock);

	install(&client, limiter.clone());

	let err = client
		.get::<Payment>(PAYMENT_PATH)
		.await
		.expect_err("Rejected credentials should fail the call.");

	assert!(matches!(err, Error::InvalidClient { .. }));

	token.assert_calls_async(1).await;

	let decision = limiter.allow(CLIENT_ID).await.expect("Memory admissions should not fail.");

	assert!(decision.allowed);
	assert_eq!(decision.remaining, 0);
}

#[tokio::test]
async fn api_errors_carry_status_and_body() {
	let server = MockServer::start_async().await;
	let clock = clock();
	let client = build_client(&server, &clock);

	server
		.mock_async(|when, then| {
			when.method(GET).path(PAYMENT_PATH);
			then.status(404)
				.header("content-type", "application/json")
				.body("{\"error\":\"payment_not_found\"}");
		})
		.await;
	client.set_access_token("cached-token");

	let err = client.get::<Payment>(PAYMENT_PATH).await.expect_err("404 should fail the call.");

	match err {
		Error::Api { status, body } => {
			assert_eq!(status, 404);
			assert!(body.contains("payment_not_found"));
		},
		other => panic!("Expected an API error, got {other:?}."),
	}
}
