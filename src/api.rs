// REST backend client and exchange-rate source
// Thin typed wrappers over the marketplace backend; no retries, failures surface to the caller.

use crate::config::CheckoutConfig;
use crate::currency::{ExchangeRateTable, RateSource, BASE_CURRENCY};
use crate::models::{BookingPayload, BookingRecord, Invoice, Offering, ProductKind};
use crate::storage::TypedStore;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

const SNIPPET_LEN: usize = 200;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Unauthorized: sign in again")]
    Unauthorized,

    #[error("API error: {status_code} - {message}")]
    ApiResponseError { status_code: u16, message: String },

    #[error("Decode error: {message} (body: {snippet})")]
    DecodeError { message: String, snippet: String },

    #[error("Invalid identifier: {0:?}")]
    InvalidId(String),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ClientStats {
    pub requests_sent: usize,
    pub requests_succeeded: usize,
    pub requests_failed: usize,
    pub average_response_time_ms: f64,
    pub max_response_time_ms: f64,
}

impl ClientStats {
    fn record(&mut self, elapsed: Duration, succeeded: bool) {
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
        self.requests_sent += 1;
        if succeeded {
            self.requests_succeeded += 1;
        } else {
            self.requests_failed += 1;
        }
        self.average_response_time_ms = (self.average_response_time_ms
            * (self.requests_sent - 1) as f64
            + elapsed_ms)
            / self.requests_sent as f64;
        self.max_response_time_ms = self.max_response_time_ms.max(elapsed_ms);
    }
}

// Backend operations the checkout depends on
#[async_trait]
pub trait BookingBackend: Send + Sync + 'static {
    async fn fetch_offering(&self, kind: ProductKind, id: &str) -> Result<Offering, ApiError>;

    // The reference travels as the idempotency key so a backend that honours it can dedupe
    async fn create_booking(
        &self,
        payload: &BookingPayload,
        idempotency_key: &str,
    ) -> Result<BookingRecord, ApiError>;

    async fn fetch_invoice(&self, booking_id: &str) -> Result<Invoice, ApiError>;

    async fn list_bookings(&self) -> Result<Vec<BookingRecord>, ApiError>;

    fn stats(&self) -> ClientStats;
}

// Fetches several offerings of one kind concurrently, failing on the first error
pub async fn fetch_many(
    backend: &dyn BookingBackend,
    kind: ProductKind,
    ids: &[String],
) -> Result<Vec<Offering>, ApiError> {
    futures::future::try_join_all(ids.iter().map(|id| backend.fetch_offering(kind, id))).await
}

// Some endpoints wrap their payload in {"data": ...}
#[derive(Deserialize)]
#[serde(untagged)]
enum MaybeWrapped<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> MaybeWrapped<T> {
    fn into_inner(self) -> T {
        match self {
            MaybeWrapped::Wrapped { data } => data,
            MaybeWrapped::Bare(value) => value,
        }
    }
}

fn snippet(body: &[u8]) -> String {
    let end = body.len().min(SNIPPET_LEN);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

pub(crate) fn check_status(status: StatusCode, body: &Bytes) -> Result<(), ApiError> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
        let message = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| snippet(body));
        return Err(ApiError::ApiResponseError {
            status_code: status.as_u16(),
            message,
        });
    }
    Ok(())
}

pub(crate) fn decode_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice::<MaybeWrapped<T>>(body)
        .map(MaybeWrapped::into_inner)
        .map_err(|e| ApiError::DecodeError {
            message: e.to_string(),
            snippet: snippet(body),
        })
}

fn transport_error(error: reqwest::Error, timeout_ms: u64) -> ApiError {
    if error.is_timeout() {
        ApiError::Timeout(timeout_ms)
    } else {
        ApiError::NetworkError(error.to_string())
    }
}

async fn send_and_read(request: RequestBuilder, timeout_ms: u64) -> Result<Bytes, ApiError> {
    let response = request
        .send()
        .await
        .map_err(|e| transport_error(e, timeout_ms))?;
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|e| transport_error(e, timeout_ms))?;
    check_status(status, &body)?;
    Ok(body)
}

// Ids become a single escaped path segment; empty and dot segments are refused
fn check_id(id: &str) -> Result<&str, ApiError> {
    match id.trim() {
        "" | "." | ".." => Err(ApiError::InvalidId(id.to_string())),
        _ => Ok(id),
    }
}

fn build_client(config: &CheckoutConfig) -> Result<reqwest::Client, ClientError> {
    config
        .validate()
        .map_err(|e| ClientError::ConfigError(e.to_string()))?;
    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .map_err(|e| ClientError::InitError(e.to_string()))
}

// reqwest implementation of BookingBackend. Reads the bearer token from
// local storage on every request; there is no refresh flow.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: Url,
    timeout_ms: u64,
    local: TypedStore,
    stats: Mutex<ClientStats>,
}

impl HttpBackend {
    pub fn new(config: &CheckoutConfig, local: TypedStore) -> Result<Self, ClientError> {
        let client = build_client(config)?;
        let base_url = Url::parse(config.api_base_url.trim())
            .map_err(|e| ClientError::ConfigError(format!("api_base_url: {}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ClientError::ConfigError(format!(
                "api_base_url cannot carry paths: {}",
                base_url
            )));
        }

        Ok(Self {
            client,
            base_url,
            timeout_ms: config.request_timeout_ms,
            local,
            stats: Mutex::new(ClientStats::default()),
        })
    }

    // Each segment is percent-encoded, so '/', '?' and '#' inside an id stay in that segment
    pub fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.local.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ApiError> {
        let started = Instant::now();
        let result = match send_and_read(self.authorized(request), self.timeout_ms).await {
            Ok(body) => decode_body(&body),
            Err(e) => Err(e),
        };
        self.stats.lock().record(started.elapsed(), result.is_ok());
        if let Err(e) = &result {
            warn!(error = %e, "backend request failed");
        }
        result
    }
}

#[async_trait]
impl BookingBackend for HttpBackend {
    async fn fetch_offering(&self, kind: ProductKind, id: &str) -> Result<Offering, ApiError> {
        let url = self.endpoint(&[kind.resource_path(), check_id(id)?]);
        debug!(%url, "fetching offering");
        let request = self.client.get(url);

        let offering = match kind {
            ProductKind::Hotel => Offering::Hotel(self.execute(request).await?),
            ProductKind::Car => Offering::Car(self.execute(request).await?),
            ProductKind::Umrah => Offering::Umrah(self.execute(request).await?),
            ProductKind::Flight => Offering::Flight(self.execute(request).await?),
            ProductKind::Property => Offering::Property(self.execute(request).await?),
        };
        Ok(offering)
    }

    async fn create_booking(
        &self,
        payload: &BookingPayload,
        idempotency_key: &str,
    ) -> Result<BookingRecord, ApiError> {
        let request = self
            .client
            .post(self.endpoint(&["bookings"]))
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(payload);
        self.execute(request).await
    }

    async fn fetch_invoice(&self, booking_id: &str) -> Result<Invoice, ApiError> {
        let request = self
            .client
            .get(self.endpoint(&["invoices", check_id(booking_id)?]));
        self.execute(request).await
    }

    async fn list_bookings(&self) -> Result<Vec<BookingRecord>, ApiError> {
        self.execute(self.client.get(self.endpoint(&["bookings"]))).await
    }

    fn stats(&self) -> ClientStats {
        self.stats.lock().clone()
    }
}

#[derive(Deserialize)]
struct RatesResponse {
    #[serde(default)]
    base: Option<String>,
    rates: HashMap<String, f64>,
}

// Public, unauthenticated exchange-rate endpoint keyed to USD
pub struct HttpRateSource {
    client: reqwest::Client,
    url: String,
    timeout_ms: u64,
}

impl HttpRateSource {
    pub fn new(config: &CheckoutConfig) -> Result<Self, ClientError> {
        Ok(Self {
            client: build_client(config)?,
            url: config.exchange_rate_url.clone(),
            timeout_ms: config.request_timeout_ms,
        })
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    async fn fetch_rates(&self) -> Result<ExchangeRateTable, ApiError> {
        let body = send_and_read(self.client.get(&self.url), self.timeout_ms).await?;
        let response: RatesResponse = decode_body(&body)?;

        match response.base.as_deref() {
            Some(base) if !base.eq_ignore_ascii_case(BASE_CURRENCY) => {
                Err(ApiError::DecodeError {
                    message: format!("rates keyed to {} instead of {}", base, BASE_CURRENCY),
                    snippet: snippet(&body),
                })
            }
            _ => Ok(ExchangeRateTable::from_rates(response.rates)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::mock_backend::MockBackend;
    use super::*;
    use crate::models::fixtures::{complete_hotel_form, hotel};
    use crate::storage::{AuthSession, StorageKey};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use test_case::test_case;
    use tokio_test::{assert_err, assert_ok};

    // Serves exactly one canned HTTP response and hands back the raw request it received
    async fn serve_once(status: &'static str, body: String) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let (name, value) = line.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            let _ = tx.send(String::from_utf8_lossy(&request).to_string());
        });

        (format!("http://{}", addr), rx)
    }

    fn backend_for(base_url: &str, local: TypedStore) -> HttpBackend {
        let config = CheckoutConfig {
            api_base_url: base_url.to_string(),
            request_timeout_ms: 2000,
            ..CheckoutConfig::default()
        };
        HttpBackend::new(&config, local).unwrap()
    }

    #[test]
    fn test_endpoint_joins_paths() {
        let backend = backend_for("https://api.example.test/v1/", TypedStore::in_memory());
        assert_eq!(
            backend.endpoint(&["hotels", "42"]).as_str(),
            "https://api.example.test/v1/hotels/42"
        );
        let root = backend_for("http://127.0.0.1:8000", TypedStore::in_memory());
        assert_eq!(root.endpoint(&["bookings"]).as_str(), "http://127.0.0.1:8000/bookings");
    }

    #[test]
    fn test_endpoint_escapes_ids() {
        let backend = backend_for("https://api.example.test/api", TypedStore::in_memory());
        let url = backend.endpoint(&["invoices", "../users/7?x=1#frag"]);
        assert_eq!(url.path(), "/api/invoices/..%2Fusers%2F7%3Fx=1%23frag");
        assert_eq!(url.query(), None);
        assert_eq!(url.fragment(), None);
    }

    #[tokio::test]
    async fn test_dot_ids_are_refused_without_request() {
        let backend = backend_for("https://api.example.test/api", TypedStore::in_memory());
        let err = assert_err!(backend.fetch_invoice("..").await);
        assert!(matches!(err, ApiError::InvalidId(_)));
        let err = assert_err!(backend.fetch_offering(ProductKind::Car, " ").await);
        assert!(matches!(err, ApiError::InvalidId(_)));
        assert_eq!(backend.stats().requests_sent, 0);
    }

    #[tokio::test]
    async fn test_id_with_separators_stays_in_one_segment() {
        let (base_url, request_rx) = serve_once("404 Not Found", "{}".to_string()).await;
        let backend = backend_for(&base_url, TypedStore::in_memory());

        let err = assert_err!(backend.fetch_invoice("bk-1/../../users?admin=1").await);
        assert!(matches!(err, ApiError::ApiResponseError { status_code: 404, .. }));

        let request = request_rx.await.unwrap();
        assert!(request.starts_with("GET /invoices/bk-1%2F..%2F..%2Fusers%3Fadmin=1 HTTP/1.1"));
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hold the connection without ever answering
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let config = CheckoutConfig {
            api_base_url: format!("http://{}", addr),
            request_timeout_ms: 100,
            ..CheckoutConfig::default()
        };
        let backend = HttpBackend::new(&config, TypedStore::in_memory()).unwrap();

        let started = Instant::now();
        let err = assert_err!(backend.list_bookings().await);
        assert!(matches!(err, ApiError::Timeout(100)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(backend.stats().requests_failed, 1);
    }

    #[test_case(" "; "blank")]
    #[test_case("not a url"; "relative")]
    #[test_case("mailto:bookings@example.test"; "no path")]
    fn test_invalid_base_url_is_rejected(base_url: &str) {
        let config = CheckoutConfig {
            api_base_url: base_url.to_string(),
            ..CheckoutConfig::default()
        };
        assert!(matches!(
            HttpBackend::new(&config, TypedStore::in_memory()),
            Err(ClientError::ConfigError(_))
        ));
    }

    #[test]
    fn test_error_status_prefers_json_message() {
        let body = Bytes::from_static(br#"{"message":"Room sold out"}"#);
        match check_status(StatusCode::CONFLICT, &body) {
            Err(ApiError::ApiResponseError {
                status_code,
                message,
            }) => {
                assert_eq!(status_code, 409);
                assert_eq!(message, "Room sold out");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            check_status(StatusCode::UNAUTHORIZED, &Bytes::new()),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn test_decode_accepts_wrapped_and_bare() {
        let bare = serde_json::to_vec(&hotel()).unwrap();
        let wrapped = serde_json::to_vec(&serde_json::json!({ "data": hotel() })).unwrap();

        let a: crate::models::Hotel = decode_body(&Bytes::from(bare)).unwrap();
        let b: crate::models::Hotel = decode_body(&Bytes::from(wrapped)).unwrap();
        assert_eq!(a, b);

        let err = decode_body::<crate::models::Hotel>(&Bytes::from_static(b"<html>")).unwrap_err();
        assert!(matches!(err, ApiError::DecodeError { ref snippet, .. } if snippet == "<html>"));
    }

    #[tokio::test]
    async fn test_create_booking_sends_idempotency_key_and_bearer() {
        let record = serde_json::json!({
            "id": "bk-77",
            "reference": "HTL-ABC123DEF",
            "status": "confirmed",
            "total_usd": 360.0,
            "created_at": "2026-10-16T09:00:00Z"
        });
        let (base_url, request_rx) = serve_once("201 Created", record.to_string()).await;

        let local = TypedStore::in_memory();
        local
            .put(
                &StorageKey::Auth,
                &AuthSession {
                    access_token: "tok-abc".to_string(),
                    refresh_token: None,
                    user_id: None,
                },
            )
            .unwrap();
        let backend = backend_for(&base_url, local);

        let offering = Offering::Hotel(hotel());
        let payload =
            BookingPayload::from_form(&complete_hotel_form(), &offering, "HTL-ABC123DEF");
        let created = assert_ok!(backend.create_booking(&payload, "HTL-ABC123DEF").await);
        assert_eq!(created.id, "bk-77");

        let request = request_rx.await.unwrap().to_lowercase();
        assert!(request.starts_with("post /bookings"));
        assert!(request.contains("idempotency-key: htl-abc123def"));
        assert!(request.contains("authorization: bearer tok-abc"));

        let stats = backend.stats();
        assert_eq!(stats.requests_sent, 1);
        assert_eq!(stats.requests_succeeded, 1);
    }

    #[tokio::test]
    async fn test_fetch_offering_unwraps_data() {
        let body = serde_json::json!({ "data": hotel() }).to_string();
        let (base_url, request_rx) = serve_once("200 OK", body).await;
        let backend = backend_for(&base_url, TypedStore::in_memory());

        let offering = assert_ok!(backend.fetch_offering(ProductKind::Hotel, "hotel-42").await);
        assert_eq!(offering, Offering::Hotel(hotel()));

        let request = request_rx.await.unwrap();
        assert!(request.starts_with("GET /hotels/hotel-42"));
        assert!(!request.to_lowercase().contains("authorization"));
    }

    #[tokio::test]
    async fn test_server_error_is_reported_with_status() {
        let (base_url, _rx) = serve_once("503 Service Unavailable", "{}".to_string()).await;
        let backend = backend_for(&base_url, TypedStore::in_memory());

        let err = assert_err!(backend.list_bookings().await);
        assert!(matches!(err, ApiError::ApiResponseError { status_code: 503, .. }));
        assert_eq!(backend.stats().requests_failed, 1);
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = backend_for(&format!("http://{}", addr), TypedStore::in_memory());
        let err = assert_err!(backend.fetch_invoice("bk-1").await);
        assert!(matches!(err, ApiError::NetworkError(_)));
    }

    #[tokio::test]
    async fn test_rate_source_parses_usd_table() {
        let body = r#"{"base":"USD","date":"2026-10-16","rates":{"USD":1,"EUR":0.91,"PKR":281.5}}"#;
        let (url, _rx) = serve_once("200 OK", body.to_string()).await;
        let source = HttpRateSource::new(&CheckoutConfig {
            exchange_rate_url: url,
            ..CheckoutConfig::default()
        })
        .unwrap();

        let table = assert_ok!(source.fetch_rates().await);
        assert_eq!(table.rate("EUR"), Some(0.91));
        assert_eq!(table.rate("PKR"), Some(281.5));
    }

    #[tokio::test]
    async fn test_rate_source_rejects_other_base() {
        let body = r#"{"base":"EUR","rates":{"USD":1.1}}"#;
        let (url, _rx) = serve_once("200 OK", body.to_string()).await;
        let source = HttpRateSource::new(&CheckoutConfig {
            exchange_rate_url: url,
            ..CheckoutConfig::default()
        })
        .unwrap();

        assert!(matches!(
            source.fetch_rates().await,
            Err(ApiError::DecodeError { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_many_runs_concurrently_and_fails_fast() {
        let mut second = hotel();
        second.id = "hotel-43".to_string();
        let backend = MockBackend::new()
            .with_offering(Offering::Hotel(hotel()))
            .with_offering(Offering::Hotel(second));
        backend.set_delay(100);

        let ids = vec!["hotel-42".to_string(), "hotel-43".to_string()];
        let started = Instant::now();
        let offerings = fetch_many(&backend, ProductKind::Hotel, &ids).await.unwrap();
        assert_eq!(offerings.len(), 2);
        assert!(started.elapsed() < Duration::from_millis(190));

        let missing = vec!["hotel-42".to_string(), "nope".to_string()];
        assert!(fetch_many(&backend, ProductKind::Hotel, &missing).await.is_err());
    }
}
