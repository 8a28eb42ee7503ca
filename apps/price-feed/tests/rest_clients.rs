//! REST Client Integration Tests
//!
//! Exercises the CRUD client and the cached market-data services against
//! a wiremock upstream.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use price_feed::infrastructure::rest::{
    CryptoService, ExchangeRatesService, QueryParams, ResourceClient, RestBackend,
};
use price_feed::{ApiError, ApiErrorKind, ApiKey, ApiSettings, BackendSettings};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct User {
    id: u64,
    name: String,
}

fn backend(server: &MockServer) -> Arc<RestBackend> {
    Arc::new(RestBackend::new("api", &server.uri(), Duration::from_secs(2), None).unwrap())
}

fn settings(server: &MockServer, cache_ttl: Duration) -> ApiSettings {
    ApiSettings {
        cmc: BackendSettings {
            base_url: server.uri(),
            api_key: Some(ApiKey::new("cmc-key".to_string())),
        },
        exchange_rates: BackendSettings {
            base_url: server.uri(),
            api_key: Some(ApiKey::new("rates-key".to_string())),
        },
        cache_ttl,
        ..ApiSettings::default()
    }
}

fn listings_body() -> serde_json::Value {
    json!({
        "data": [
            {"id": 1, "name": "Bitcoin", "symbol": "BTC", "quote": {"USD": {"price": 50000.5}}},
            {"id": 1027, "name": "Ethereum", "symbol": "ETH", "quote": {"USD": {"price": 3000}}}
        ]
    })
}

// =============================================================================
// CRUD
// =============================================================================

#[tokio::test]
async fn create_posts_body_and_wraps_status() {
    let server = MockServer::start().await;
    let user = User {
        id: 7,
        name: "Ada".to_string(),
    };
    Mock::given(method("POST"))
        .and(path("/users"))
        .and(body_json(&user))
        .respond_with(ResponseTemplate::new(201).set_body_json(&user))
        .expect(1)
        .mount(&server)
        .await;

    let envelope = ResourceClient::users(&backend(&server))
        .create(&user)
        .await
        .unwrap();

    assert_eq!(envelope.data, user);
    assert_eq!(envelope.status, 201);
    assert_eq!(envelope.status_text, "Created");
}

#[tokio::test]
async fn list_forwards_query_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products"))
        .and(query_param("page", "2"))
        .and(query_param("active", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "name": "Widget"},
            {"id": 2, "name": "Gadget"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let params = QueryParams::new().with("page", 2).with("active", true);
    let envelope = ResourceClient::products(&backend(&server))
        .list::<User>(&params)
        .await
        .unwrap();

    assert_eq!(envelope.status, 200);
    assert_eq!(envelope.status_text, "OK");
    assert_eq!(envelope.data.len(), 2);
    assert_eq!(envelope.data[1].name, "Gadget");
}

#[tokio::test]
async fn get_by_id_encodes_the_id_as_one_segment() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 42, "name": "Lin"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/a%2Fb%20c"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 1, "name": "odd"})))
        .expect(1)
        .mount(&server)
        .await;

    let users = ResourceClient::users(&backend(&server));

    let found = users.get_by_id::<User>(42).await.unwrap();
    assert_eq!(found.data.id, 42);

    let odd = users.get_by_id::<User>("a/b c").await.unwrap();
    assert_eq!(odd.data.name, "odd");
}

#[tokio::test]
async fn api_backend_uses_configured_base_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/products/9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9, "name": "Lamp"})))
        .expect(1)
        .mount(&server)
        .await;

    let settings = ApiSettings {
        api_base_url: format!("{}/", server.uri()),
        ..ApiSettings::default()
    };
    let backend = Arc::new(RestBackend::from_api_settings(&settings).unwrap());
    assert_eq!(backend.name(), "api");
    assert_eq!(backend.base_url(), server.uri());

    let found = ResourceClient::products(&backend)
        .get_by_id::<User>(9)
        .await
        .unwrap();
    assert_eq!(found.data.name, "Lamp");
}

#[test]
fn api_backend_rejects_invalid_base_url() {
    let settings = ApiSettings {
        api_base_url: "not a url".to_string(),
        ..ApiSettings::default()
    };
    let err = RestBackend::from_api_settings(&settings).unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Unexpected);
}

#[tokio::test]
async fn update_puts_partial_body() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/products/9"))
        .and(body_json(json!({"name": "Renamed"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 9, "name": "Renamed"})))
        .expect(1)
        .mount(&server)
        .await;

    let envelope = ResourceClient::products(&backend(&server))
        .update::<User, _>(9, &json!({"name": "Renamed"}))
        .await
        .unwrap();

    assert_eq!(
        envelope.data,
        User {
            id: 9,
            name: "Renamed".to_string()
        }
    );
}

#[tokio::test]
async fn delete_with_empty_body() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/users/3"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let envelope = ResourceClient::users(&backend(&server))
        .delete(3)
        .await
        .unwrap();

    assert_eq!(envelope.status, 204);
    assert_eq!(envelope.status_text, "No Content");
}

#[tokio::test]
async fn empty_success_body_decodes_as_null() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/5"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let envelope = ResourceClient::users(&backend(&server))
        .get_by_id::<Option<User>>(5)
        .await
        .unwrap();

    assert_eq!(envelope.data, None);
}

// =============================================================================
// Errors
// =============================================================================

#[tokio::test]
async fn non_2xx_uses_body_message() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/404"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "not found"})))
        .mount(&server)
        .await;

    let err = ResourceClient::users(&backend(&server))
        .get_by_id::<User>(404)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "API Error: 404 - not found");
    assert_eq!(err.kind(), ApiErrorKind::UpstreamRejected);
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn non_2xx_without_message_uses_status_text() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(500).set_body_string("<html>boom</html>"))
        .mount(&server)
        .await;

    let err = ResourceClient::users(&backend(&server))
        .delete(1)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "API Error: 500 - Internal Server Error");
}

#[tokio::test]
async fn undecodable_success_body_is_unexpected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = ResourceClient::users(&backend(&server))
        .get_by_id::<User>(1)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ApiErrorKind::Unexpected);
    assert_eq!(err.status(), None);
}

#[tokio::test]
async fn refused_connection_is_no_response() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let backend = Arc::new(RestBackend::new("api", &base, Duration::from_secs(2), None).unwrap());
    let err = ResourceClient::users(&backend)
        .list::<User>(&QueryParams::new())
        .await
        .unwrap_err();

    assert_eq!(err, ApiError::NoResponse);
    assert_eq!(err.to_string(), "API Error: No response received from server");
}

#[tokio::test]
async fn slow_upstream_times_out_as_no_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([]))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let backend = Arc::new(
        RestBackend::new("api", &server.uri(), Duration::from_millis(200), None).unwrap(),
    );
    let err = ResourceClient::users(&backend)
        .list::<User>(&QueryParams::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ApiErrorKind::NoResponse);
}

#[tokio::test]
async fn truncated_error_body_keeps_upstream_status() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let upstream = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0_u8; 1024];
        let _ = socket.read(&mut request).await.unwrap();
        socket
            .write_all(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 100\r\n\r\npartial")
            .await
            .unwrap();
        socket.shutdown().await.unwrap();
    });

    let backend = Arc::new(RestBackend::new("api", &base, Duration::from_secs(2), None).unwrap());
    let err = ResourceClient::users(&backend)
        .get_by_id::<User>(1)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ApiError::UpstreamRejected {
            status: 503,
            message: "Service Unavailable".to_string(),
        }
    );
    upstream.await.unwrap();
}

// =============================================================================
// Market data
// =============================================================================

#[tokio::test]
async fn listings_send_key_header_and_are_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/cryptocurrency/listings/latest"))
        .and(header("X-CMC_PRO_API_KEY", "cmc-key"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listings_body()))
        .expect(1)
        .mount(&server)
        .await;

    let crypto = CryptoService::from_settings(&settings(&server, Duration::from_secs(60)))
        .unwrap()
        .expect("key configured");
    let params = QueryParams::new().with("limit", 2);

    let first = crypto.listings_latest(&params).await.unwrap();
    let second = crypto.listings_latest(&params).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.data.data[0].symbol, "BTC");
    assert_eq!(first.data.data[0].usd_price(), Some(Decimal::new(500_005, 1)));
}

#[tokio::test]
async fn cached_listings_expire_after_ttl() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/cryptocurrency/listings/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listings_body()))
        .expect(2)
        .mount(&server)
        .await;

    let crypto = CryptoService::from_settings(&settings(&server, Duration::from_millis(150)))
        .unwrap()
        .unwrap();

    crypto.listings_latest(&QueryParams::new()).await.unwrap();
    crypto.listings_latest(&QueryParams::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    crypto.listings_latest(&QueryParams::new()).await.unwrap();
}

#[tokio::test]
async fn concurrent_listings_share_one_upstream_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/cryptocurrency/listings/latest"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(listings_body())
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let crypto = CryptoService::from_settings(&settings(&server, Duration::from_secs(60)))
        .unwrap()
        .unwrap();
    let params = QueryParams::new();

    let (a, b) = tokio::join!(
        crypto.listings_latest(&params),
        crypto.listings_latest(&params)
    );
    assert_eq!(a.unwrap(), b.unwrap());
}

#[tokio::test]
async fn failed_fetch_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/cryptocurrency/listings/latest"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/cryptocurrency/listings/latest"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listings_body()))
        .expect(1)
        .mount(&server)
        .await;

    let crypto = CryptoService::from_settings(&settings(&server, Duration::from_secs(60)))
        .unwrap()
        .unwrap();

    let err = crypto
        .listings_latest(&QueryParams::new())
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(503));

    let ok = crypto.listings_latest(&QueryParams::new()).await.unwrap();
    assert_eq!(ok.data.data.len(), 2);
}

#[tokio::test]
async fn quotes_normalize_symbols_for_the_cache_key() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/cryptocurrency/quotes/latest"))
        .and(query_param("symbol", "BTC,ETH"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "BTC": {"id": 1, "name": "Bitcoin", "symbol": "BTC", "quote": {"USD": {"price": 50000}}},
                "ETH": {"id": 1027, "name": "Ethereum", "symbol": "ETH", "quote": {"USD": {"price": 3000}}}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let crypto = CryptoService::from_settings(&settings(&server, Duration::from_secs(60)))
        .unwrap()
        .unwrap();

    let first = crypto.quotes_latest(&["ETH", " BTC ", "ETH"]).await.unwrap();
    let second = crypto.quotes_latest(&["BTC", "ETH"]).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.data.data["ETH"].usd_price(), Some(Decimal::from(3_000)));

    let empty: [&str; 0] = [];
    let err = crypto.quotes_latest(&empty).await.unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Unexpected);
}

#[tokio::test]
async fn exchange_rates_send_key_and_format_params() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/latest"))
        .and(query_param("access_key", "rates-key"))
        .and(query_param("format", "1"))
        .and(query_param("base", "EUR"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "timestamp": 1_700_000_000,
            "base": "EUR",
            "date": "2023-11-14",
            "rates": {"USD": 1.07, "GBP": 0.87}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let rates = ExchangeRatesService::from_settings(&settings(&server, Duration::from_secs(60)))
        .unwrap()
        .unwrap();
    let params = QueryParams::new().with("base", "EUR");

    let first = rates.latest(&params).await.unwrap();
    let second = rates.latest(&params).await.unwrap();

    assert_eq!(first, second);
    assert!(first.data.success);
    assert_eq!(first.data.rates["USD"], Decimal::new(107, 2));
}

#[tokio::test]
async fn services_are_disabled_without_keys() {
    let server = MockServer::start().await;
    let mut settings = settings(&server, Duration::from_secs(60));
    settings.cmc.api_key = None;
    settings.exchange_rates.api_key = None;

    assert!(CryptoService::from_settings(&settings).unwrap().is_none());
    assert!(ExchangeRatesService::from_settings(&settings).unwrap().is_none());
}
