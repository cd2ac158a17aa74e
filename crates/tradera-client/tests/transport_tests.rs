//! HTTP transport tests against a mock SOAP server.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tradera_client::client::TraderaClient;
use tradera_client::config::Config;
use tradera_client::error::ClientError;

const OFFICIAL_TIME: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Header>
    <AuthenticationHeader xmlns="http://api.tradera.com">
      <AppId>1</AppId>
      <AppKey>test-app-key</AppKey>
    </AuthenticationHeader>
  </soap:Header>
  <soap:Body><GetOfficalTime xmlns="http://api.tradera.com" /></soap:Body>
</soap:Envelope>"#;

const FAULT_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <soap:Fault>
      <faultcode>soap:Client</faultcode>
      <faultstring>Server was unable to read request.</faultstring>
      <detail />
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#;

fn ok_body(inner: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
         <soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\">\
         <soap:Body>{inner}</soap:Body></soap:Envelope>"
    )
}

fn client_for(server: &MockServer) -> TraderaClient {
    TraderaClient::new(Config::for_testing(&server.uri())).unwrap()
}

fn retrying_client_for(server: &MockServer) -> TraderaClient {
    let mut config = Config::for_testing(&server.uri()).with_retry(3, Duration::from_millis(10));
    config.retry_jitter = 0.0;
    TraderaClient::new(config).unwrap()
}

// =============================================================================
// Request Shape
// =============================================================================

#[tokio::test]
async fn test_envelope_is_posted_verbatim() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/PublicService.asmx"))
        .and(header("content-type", "text/xml; charset=utf-8"))
        .and(header("SOAPAction", "\"http://api.tradera.com/GetOfficalTime\""))
        .and(body_string(OFFICIAL_TIME))
        .respond_with(ResponseTemplate::new(200).set_body_string(ok_body("<Time>now</Time>")))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let body = client
        .public()
        .send(&CancellationToken::new(), "GetOfficalTime", OFFICIAL_TIME)
        .await
        .unwrap();

    assert!(body.contains("<Time>now</Time>"));
}

#[tokio::test]
async fn test_each_service_posts_to_its_endpoint() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/OrderService.asmx"))
        .and(header("SOAPAction", "\"http://api.tradera.com/GetSellerOrders\""))
        .respond_with(ResponseTemplate::new(200).set_body_string(ok_body("<Orders/>")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/SearchService.asmx"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ok_body("<Items/>")))
        .expect(1)
        .mount(&server)
        .await;

    let config = Config::for_testing(&server.uri()).with_user_auth(77, "user-token");
    let client = TraderaClient::new(config).unwrap();
    let cancel = CancellationToken::new();

    let orders = client.order().send(&cancel, "GetSellerOrders", "").await.unwrap();
    let items = client.search().send(&cancel, "Search", "").await.unwrap();

    assert!(orders.contains("<Orders/>"));
    assert!(items.contains("<Items/>"));
}

// =============================================================================
// Status Mapping
// =============================================================================

#[tokio::test]
async fn test_429_maps_to_rate_limited_with_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .search()
        .send(&CancellationToken::new(), "Search", "")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::RateLimited { .. }));
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
}

#[tokio::test]
async fn test_429_without_retry_after() {
    let server = MockServer::start().await;

    Mock::given(method("POST")).respond_with(ResponseTemplate::new(429)).mount(&server).await;

    let err = client_for(&server)
        .search()
        .send(&CancellationToken::new(), "Search", "")
        .await
        .unwrap_err();

    assert_eq!(err.retry_after(), None);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_500_with_fault_maps_to_soap_fault() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string(FAULT_BODY))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .public()
        .send(&CancellationToken::new(), "GetItem", "")
        .await
        .unwrap_err();

    match err {
        ClientError::SoapFault { code, message, detail } => {
            assert_eq!(code, "soap:Client");
            assert_eq!(message, "Server was unable to read request.");
            assert_eq!(detail, None);
        }
        other => panic!("expected SoapFault, got {other:?}"),
    }
}

#[tokio::test]
async fn test_503_without_fault_maps_to_server() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .listing()
        .send(&CancellationToken::new(), "GetItemRestarts", "")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Server { status: 503, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_404_maps_to_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("POST")).respond_with(ResponseTemplate::new(404)).mount(&server).await;

    let err = client_for(&server)
        .public()
        .send(&CancellationToken::new(), "GetItem", "")
        .await
        .unwrap_err();

    match err {
        ClientError::NotFound { resource } => assert!(resource.ends_with("/PublicService.asmx")),
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn test_other_status_maps_to_unexpected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(418).set_body_string("teapot"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .public()
        .send(&CancellationToken::new(), "GetItem", "")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::UnexpectedStatus { status: 418, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_slow_response_maps_to_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let config = Config::for_testing(&server.uri()).with_timeout(Duration::from_millis(200));
    let client = TraderaClient::new(config).unwrap();
    let err = client
        .public()
        .send(&CancellationToken::new(), "GetItem", "")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Timeout(d) if d == Duration::from_millis(200)));
}

#[tokio::test]
async fn test_connection_refused_maps_to_network() {
    // Nothing listens on the discard port.
    let client = TraderaClient::new(Config::for_testing("http://127.0.0.1:9")).unwrap();
    let err = client
        .public()
        .send(&CancellationToken::new(), "GetItem", "")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Network { .. }), "got {err:?}");
}

// =============================================================================
// Middleware Over HTTP
// =============================================================================

#[tokio::test]
async fn test_retry_recovers_after_transient_failures() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ok_body("<ok/>")))
        .expect(1)
        .mount(&server)
        .await;

    let body = retrying_client_for(&server)
        .search()
        .send(&CancellationToken::new(), "Search", "")
        .await
        .unwrap();

    assert!(body.contains("<ok/>"));
}

#[tokio::test]
async fn test_retry_exhaustion_makes_four_attempts() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502))
        .expect(4)
        .mount(&server)
        .await;

    let err = retrying_client_for(&server)
        .search()
        .send(&CancellationToken::new(), "Search", "")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::RetriesExhausted { attempts: 4, .. }));
    assert!(matches!(err.last_attempt(), ClientError::Server { status: 502, .. }));
}

#[tokio::test]
async fn test_soap_fault_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string(FAULT_BODY))
        .expect(1)
        .mount(&server)
        .await;

    let err = retrying_client_for(&server)
        .public()
        .send(&CancellationToken::new(), "GetItem", "")
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::SoapFault { .. }));
}

#[tokio::test]
async fn test_cached_call_hits_server_once() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(header("SOAPAction", "\"http://api.tradera.com/GetCategories\""))
        .respond_with(ResponseTemplate::new(200).set_body_string(ok_body("<Categories/>")))
        .expect(1)
        .mount(&server)
        .await;

    let config = Config::for_testing(&server.uri()).with_cache(Duration::from_secs(300));
    let client = TraderaClient::new(config).unwrap();
    let cancel = CancellationToken::new();

    let first = client.public().send_cached(&cancel, "GetCategories", "").await.unwrap();
    let second = client.public().send_cached(&cancel, "GetCategories", "").await.unwrap();

    assert_eq!(first, second);
    client.close().unwrap();
}

#[tokio::test]
async fn test_failed_call_is_not_cached() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ok_body("<Categories/>")))
        .expect(1)
        .mount(&server)
        .await;

    let config = Config::for_testing(&server.uri()).with_cache(Duration::from_secs(300));
    let client = TraderaClient::new(config).unwrap();
    let cancel = CancellationToken::new();

    assert!(client.public().send_cached(&cancel, "GetCategories", "").await.is_err());
    assert!(client.public().send_cached(&cancel, "GetCategories", "").await.is_ok());
    assert!(client.public().send_cached(&cancel, "GetCategories", "").await.is_ok());
}
