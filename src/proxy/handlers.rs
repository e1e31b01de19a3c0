use crate::constants::GENERATE_CONTENT_PATH;
use crate::error::{ProxyError, ProxyResult};
use crate::models::AppConfig;
use crate::modules::{fingerprint, SignatureCache, UsageStats};
use crate::proxy::fetch::ThrottledFetcher;
use crate::proxy::mappers::{self, AnthropicMessage, ContentBlock};
use crate::proxy::pool::AccountPool;
use crate::proxy::shaper::{ShaperStatus, TrafficShaper};
use serde_json::{json, Value};
use std::sync::Arc;

/// Wires the pool, shaper, fetcher, converter and counters behind the two
/// public dialects. The HTTP layer on top of this stays a thin adapter.
pub struct ProxyEngine {
    pool: Arc<AccountPool>,
    shaper: TrafficShaper,
    fetcher: Arc<ThrottledFetcher>,
    usage: Arc<UsageStats>,
    signatures: Arc<SignatureCache>,
    base_urls: Vec<String>,
}

impl ProxyEngine {
    pub fn new(
        config: &AppConfig,
        pool: Arc<AccountPool>,
        fetcher: Arc<ThrottledFetcher>,
        usage: Arc<UsageStats>,
    ) -> Self {
        Self {
            pool,
            shaper: TrafficShaper::new(config.shaper.clone()),
            fetcher,
            usage,
            signatures: Arc::new(SignatureCache::new()),
            base_urls: vec![
                crate::constants::DAILY_BASE_URL.to_string(),
                crate::constants::PROD_BASE_URL.to_string(),
            ],
        }
    }

    pub fn with_base_urls(mut self, base_urls: Vec<String>) -> Self {
        self.base_urls = base_urls;
        self
    }

    pub fn pool(&self) -> &Arc<AccountPool> {
        &self.pool
    }

    pub fn signatures(&self) -> &Arc<SignatureCache> {
        &self.signatures
    }

    pub fn shaper_status(&self) -> ShaperStatus {
        self.shaper.status()
    }

    /// Anthropic-style dialect: forward, then normalize the upstream shape.
    pub async fn generate(&self, model: &str, body: Value) -> ProxyResult<AnthropicMessage> {
        let raw = self.generate_raw(model, body).await?;
        let message = mappers::convert_google_to_anthropic(&raw, model);
        for block in &message.content {
            let signature = match block {
                ContentBlock::Thinking {
                    signature: Some(sig),
                    ..
                } => Some(sig),
                ContentBlock::ToolUse {
                    thought_signature: Some(sig),
                    ..
                } => Some(sig),
                _ => None,
            };
            if let Some(sig) = signature {
                self.signatures.insert(sig, model);
            }
        }
        Ok(message)
    }

    /// Gemini-style dialect: forward and return the upstream JSON untouched.
    pub async fn generate_raw(&self, model: &str, body: Value) -> ProxyResult<Value> {
        let selected = self.pool.select_account(model).await?;
        let token = self.pool.token_for_account(&selected.email).await?;

        let mut headers = fingerprint::build_headers(Some(&selected.fingerprint));
        headers.insert("Authorization".to_string(), format!("Bearer {}", token));

        let mut body = body;
        if let (Some(project), Some(obj)) = (selected.project_id.as_deref(), body.as_object_mut())
        {
            obj.entry("project".to_string())
                .or_insert_with(|| json!(project));
        }

        let fetcher = Arc::clone(&self.fetcher);
        let base_urls = self.base_urls.clone();
        let response = self
            .shaper
            .enqueue(async move {
                let mut last_err: Option<ProxyError> = None;
                for (idx, base) in base_urls.iter().enumerate() {
                    let url = format!("{}{}", base, GENERATE_CONTENT_PATH);
                    match fetcher.post_json(&url, &headers, &body).await {
                        Ok(response) => return Ok(response),
                        // Only connect-level failures advance to the
                        // fallback host; HTTP errors already have an answer.
                        Err(e @ ProxyError::Network(_)) if idx + 1 < base_urls.len() => {
                            tracing::warn!("Upstream host {} unreachable, trying fallback", base);
                            last_err = Some(e);
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(last_err
                    .unwrap_or_else(|| ProxyError::Internal("no upstream hosts configured".to_string())))
            })
            .await??;

        let status = response.status().as_u16();
        match status {
            200..=299 => {
                self.pool.record_success(&selected.email).await;
                self.usage.track(model);
                response
                    .json::<Value>()
                    .await
                    .map_err(|e| ProxyError::Network(format!("upstream body read failed: {}", e)))
            }
            401 => {
                self.pool.mark_invalid(&selected.email).await;
                Err(ProxyError::Unauthorized(format!(
                    "upstream rejected credentials for {}",
                    selected.email
                )))
            }
            429 => {
                self.pool.record_rate_limited(&selected.email, model).await;
                Err(ProxyError::RateLimited(model.to_string()))
            }
            500..=599 => {
                self.pool.record_server_error(&selected.email).await;
                Err(ProxyError::RetriableServer(status))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(ProxyError::Upstream { status, body })
            }
        }
    }
}

/// Client-facing status and body for a failed request. Upstream statuses
/// pass through; pool exhaustion maps to 503 with a structured body.
pub fn error_response(err: &ProxyError) -> (u16, Value) {
    match err {
        ProxyError::NoAccountAvailable => (503, json!({"error": "no-account-available"})),
        ProxyError::RateLimited(_) => (429, json!({"error": "rate-limited"})),
        ProxyError::Unauthorized(_) => (401, json!({"error": "unauthorized"})),
        ProxyError::InvalidArgument(message) => {
            (400, json!({"error": "invalid-argument", "message": message}))
        }
        ProxyError::RetriableServer(status) => (*status, json!({"error": "upstream-unavailable"})),
        ProxyError::Upstream { status, .. } => (*status, json!({"error": "upstream-error"})),
        ProxyError::Network(_) => (502, json!({"error": "network-error"})),
        _ => (500, json!({"error": "internal-error"})),
    }
}
