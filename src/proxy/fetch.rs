use crate::constants::MAX_RETRIES;
use crate::error::{ProxyError, ProxyResult};
use crate::models::FetchConfig;
use crate::modules::jitter;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use tokio::time::Duration;
use wreq::header::{HeaderMap, HeaderName, HeaderValue};
use wreq::{Client, Method, Response};
use wreq_util::{Emulation, EmulationOS, EmulationOption};

const RETRIABLE_STATUS: [u16; 4] = [500, 502, 503, 504];

/// Chrome profiles rotated across fetcher instances. All recent desktop
/// builds, so the TLS client-hello and HTTP/2 settings stay plausible.
const CHROME_POOL: [Emulation; 5] = [
    Emulation::Chrome131,
    Emulation::Chrome133,
    Emulation::Chrome134,
    Emulation::Chrome136,
    Emulation::Chrome137,
];

fn host_emulation_os() -> EmulationOS {
    match std::env::consts::OS {
        "macos" => EmulationOS::MacOS,
        "linux" => EmulationOS::Linux,
        _ => EmulationOS::Windows,
    }
}

fn build_client() -> Client {
    let profile = CHROME_POOL
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(Emulation::Chrome137);
    let emulation = EmulationOption::builder()
        .emulation(profile)
        .emulation_os(host_emulation_os())
        .build();

    Client::builder()
        .emulation(emulation)
        .connect_timeout(Duration::from_secs(20))
        .timeout(Duration::from_secs(600))
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn to_header_map(headers: &HashMap<String, String>) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (key, value) in headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            map.insert(name, value);
        }
    }
    map
}

async fn backoff(attempt: u32) {
    let base = 1000.0 * f64::from(1u32 << attempt);
    jitter::sleep_ms(jitter::jittered_ms(base, 0.5, 500.0)).await;
}

/// Browser-mimicking HTTP client with a humanizing pre-call delay and
/// bounded retry on transient failures. HTTP error statuses are returned to
/// the caller, never raised; 429 in particular is surfaced untouched so the
/// pool can rotate accounts.
pub struct ThrottledFetcher {
    client: Client,
    config: FetchConfig,
}

impl ThrottledFetcher {
    pub fn new(config: FetchConfig) -> Self {
        Self {
            client: build_client(),
            config,
        }
    }

    pub async fn fetch(
        &self,
        method: Method,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&serde_json::Value>,
    ) -> ProxyResult<Response> {
        if self.config.request_throttling_enabled {
            let base = self.config.request_delay_ms as f64;
            jitter::sleep_ms(jitter::jittered_ms(base, 0.4, 0.0)).await;
        }

        let header_map = to_header_map(headers);
        let mut last_error: Option<ProxyError> = None;

        for attempt in 0..=MAX_RETRIES {
            let mut request = self
                .client
                .request(method.clone(), url)
                .headers(header_map.clone());
            if let Some(body) = body {
                request = request.json(body);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    if RETRIABLE_STATUS.contains(&status) && attempt < MAX_RETRIES {
                        tracing::warn!(
                            "Upstream returned {} (attempt {}/{}), backing off",
                            status,
                            attempt + 1,
                            MAX_RETRIES + 1
                        );
                        last_error = Some(ProxyError::RetriableServer(status));
                        backoff(attempt).await;
                        continue;
                    }
                    return Ok(response);
                }
                Err(e) => {
                    let message = e.to_string();
                    if jitter::is_network_error(&message) && attempt < MAX_RETRIES {
                        tracing::debug!(
                            "Transient network failure (attempt {}/{}): {}",
                            attempt + 1,
                            MAX_RETRIES + 1,
                            message
                        );
                        last_error = Some(ProxyError::Network(message));
                        backoff(attempt).await;
                        continue;
                    }
                    return Err(ProxyError::Network(message));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProxyError::Internal("retry loop exhausted without result".to_string())))
    }

    pub async fn post_json(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        body: &serde_json::Value,
    ) -> ProxyResult<Response> {
        self.fetch(Method::POST, url, headers, Some(body)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap as AxumHeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex as AsyncMutex;

    fn test_config() -> FetchConfig {
        FetchConfig {
            request_throttling_enabled: false,
            request_delay_ms: 0,
        }
    }

    #[derive(Clone)]
    struct FlakyState {
        hits: Arc<AtomicUsize>,
        failures_before_success: usize,
        failure_status: StatusCode,
        captured_headers: Arc<AsyncMutex<Vec<(String, String)>>>,
    }

    async fn flaky_handler(
        State(state): State<FlakyState>,
        headers: AxumHeaderMap,
    ) -> (StatusCode, Json<serde_json::Value>) {
        let mut captured = Vec::new();
        for (name, value) in &headers {
            captured.push((
                name.as_str().to_string(),
                value.to_str().unwrap_or("<non-utf8>").to_string(),
            ));
        }
        *state.captured_headers.lock().await = captured;

        let hit = state.hits.fetch_add(1, Ordering::SeqCst);
        if hit < state.failures_before_success {
            (state.failure_status, Json(json!({"error": "unavailable"})))
        } else {
            (StatusCode::OK, Json(json!({"ok": true})))
        }
    }

    async fn start_server(state: FlakyState) -> (String, tokio::task::JoinHandle<()>) {
        let app = Router::new()
            .route("/v1internal:generateContent", post(flaky_handler))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test app");
        });
        (format!("http://{}/v1internal:generateContent", addr), server)
    }

    #[tokio::test]
    async fn retries_5xx_until_success() {
        let state = FlakyState {
            hits: Arc::new(AtomicUsize::new(0)),
            failures_before_success: 2,
            failure_status: StatusCode::SERVICE_UNAVAILABLE,
            captured_headers: Arc::new(AsyncMutex::new(Vec::new())),
        };
        let (url, server) = start_server(state.clone()).await;

        let fetcher = ThrottledFetcher::new(test_config());
        let response = fetcher
            .post_json(&url, &HashMap::new(), &json!({"contents": []}))
            .await
            .expect("request should eventually succeed");

        server.abort();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(state.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_return_the_final_response() {
        let state = FlakyState {
            hits: Arc::new(AtomicUsize::new(0)),
            failures_before_success: 10,
            failure_status: StatusCode::BAD_GATEWAY,
            captured_headers: Arc::new(AsyncMutex::new(Vec::new())),
        };
        let (url, server) = start_server(state.clone()).await;

        let fetcher = ThrottledFetcher::new(test_config());
        let response = fetcher
            .post_json(&url, &HashMap::new(), &json!({}))
            .await
            .expect("final 5xx response is returned, not raised");

        server.abort();
        assert_eq!(response.status().as_u16(), 502);
        assert_eq!(state.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rate_limit_is_not_retried() {
        let state = FlakyState {
            hits: Arc::new(AtomicUsize::new(0)),
            failures_before_success: 10,
            failure_status: StatusCode::TOO_MANY_REQUESTS,
            captured_headers: Arc::new(AsyncMutex::new(Vec::new())),
        };
        let (url, server) = start_server(state.clone()).await;

        let fetcher = ThrottledFetcher::new(test_config());
        let response = fetcher
            .post_json(&url, &HashMap::new(), &json!({}))
            .await
            .expect("429 is surfaced to the caller");

        server.abort();
        assert_eq!(response.status().as_u16(), 429);
        assert_eq!(state.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn identity_headers_reach_the_wire() {
        let state = FlakyState {
            hits: Arc::new(AtomicUsize::new(0)),
            failures_before_success: 0,
            failure_status: StatusCode::OK,
            captured_headers: Arc::new(AsyncMutex::new(Vec::new())),
        };
        let (url, server) = start_server(state.clone()).await;

        let fp = crate::modules::fingerprint::generate();
        let mut headers = crate::modules::fingerprint::build_headers(Some(&fp));
        headers.insert("Authorization".to_string(), "Bearer token-1".to_string());

        let fetcher = ThrottledFetcher::new(test_config());
        fetcher
            .post_json(&url, &headers, &json!({}))
            .await
            .expect("request should succeed");

        server.abort();
        let captured = state.captured_headers.lock().await.clone();
        let find = |name: &str| -> Option<String> {
            captured
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        };
        assert_eq!(find("user-agent"), Some(fp.user_agent.clone()));
        assert_eq!(find("x-client-device-id"), Some(fp.device_id.clone()));
        assert_eq!(find("authorization"), Some("Bearer token-1".to_string()));
    }
}
