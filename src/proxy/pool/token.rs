use super::AccountPool;
use crate::constants::TOKEN_EXPIRY_SKEW_MS;
use crate::error::{ProxyError, ProxyResult};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub(crate) struct TokenCacheEntry {
    pub access_token: String,
    pub expires_at: i64,
}

impl TokenCacheEntry {
    pub(crate) fn is_valid(&self, now_ms: i64) -> bool {
        now_ms < self.expires_at - TOKEN_EXPIRY_SKEW_MS
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: i64,
}

impl AccountPool {
    /// Access token for an account, refreshing through OAuth when the cached
    /// one is stale. Concurrent refreshes for the same account coalesce into
    /// a single network call.
    pub async fn token_for_account(&self, email: &str) -> ProxyResult<String> {
        if let Some(token) = self.cached_token(email) {
            return Ok(token);
        }

        let lock = self
            .refresh_locks
            .entry(email.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // A racing caller may have finished the refresh while we waited.
        if let Some(token) = self.cached_token(email) {
            return Ok(token);
        }

        let refresh_token = {
            let accounts = self.accounts.read().await;
            let account = accounts
                .iter()
                .find(|a| a.email == email)
                .ok_or_else(|| ProxyError::InvalidArgument(format!("unknown account: {}", email)))?;
            if account.is_invalid {
                return Err(ProxyError::Unauthorized(format!(
                    "account is invalid: {}",
                    email
                )));
            }
            account.oauth_refresh_token.clone().ok_or_else(|| {
                ProxyError::Unauthorized(format!("account has no refresh token: {}", email))
            })?
        };

        self.refresh_access_token(email, &refresh_token).await
    }

    fn cached_token(&self, email: &str) -> Option<String> {
        let entry = self.token_cache.get(email)?;
        if entry.is_valid(chrono::Utc::now().timestamp_millis()) {
            Some(entry.access_token.clone())
        } else {
            None
        }
    }

    async fn refresh_access_token(&self, email: &str, refresh_token: &str) -> ProxyResult<String> {
        let client_id = self.oauth_client_id.clone().ok_or_else(|| {
            ProxyError::Unauthorized(
                "Missing Google OAuth client_id. Set TRESTLE_GOOGLE_OAUTH_CLIENT_ID.".to_string(),
            )
        })?;

        let mut params: Vec<(&str, String)> = vec![
            ("client_id", client_id),
            ("refresh_token", refresh_token.to_string()),
            ("grant_type", "refresh_token".to_string()),
        ];
        if let Some(secret) = self.oauth_client_secret.clone() {
            params.push(("client_secret", secret));
        }

        tracing::debug!("Refreshing access token for {}", email);
        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ProxyError::Network(format!("token refresh request failed: {}", e)))?;

        let status = response.status().as_u16();
        if status == 400 || status == 401 {
            let body = response.text().await.unwrap_or_default();
            self.mark_invalid(email).await;
            return Err(ProxyError::Unauthorized(format!(
                "token refresh rejected for {}: {}",
                email, body
            )));
        }
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(ProxyError::Upstream { status, body });
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| ProxyError::Network(format!("token response parsing failed: {}", e)))?;

        let expires_at =
            chrono::Utc::now().timestamp_millis() + refreshed.expires_in.saturating_mul(1000);
        self.token_cache.insert(
            email.to_string(),
            TokenCacheEntry {
                access_token: refreshed.access_token.clone(),
                expires_at,
            },
        );
        tracing::debug!(
            "Token refreshed for {} (expires in {}s)",
            email,
            refreshed.expires_in
        );
        Ok(refreshed.access_token)
    }

    #[cfg(test)]
    pub(crate) fn cache_token_for_test(&self, email: &str, token: &str, expires_at: i64) {
        self.token_cache.insert(
            email.to_string(),
            TokenCacheEntry {
                access_token: token.to_string(),
                expires_at,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Account, AccountSource};
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[derive(Clone)]
    struct TokenServerState {
        hits: Arc<AtomicUsize>,
        status: u16,
    }

    async fn token_handler(
        State(state): State<TokenServerState>,
    ) -> (axum::http::StatusCode, Json<serde_json::Value>) {
        state.hits.fetch_add(1, Ordering::SeqCst);
        if state.status == 200 {
            (
                axum::http::StatusCode::OK,
                Json(json!({"access_token": "fresh-token", "expires_in": 3600, "token_type": "Bearer"})),
            )
        } else {
            (
                axum::http::StatusCode::from_u16(state.status).expect("status"),
                Json(json!({"error": "invalid_grant"})),
            )
        }
    }

    async fn start_token_server(status: u16) -> (String, Arc<AtomicUsize>, tokio::task::JoinHandle<()>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = TokenServerState {
            hits: Arc::clone(&hits),
            status,
        };
        let app = Router::new().route("/token", post(token_handler)).with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve token server");
        });
        (format!("http://{}/token", addr), hits, server)
    }

    async fn pool_with_account(token_url: String) -> AccountPool {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("accounts.json");
        // Keep the directory alive for the duration of the test process.
        std::mem::forget(dir);

        let mut pool = AccountPool::load(path).await.expect("load pool");
        pool.set_token_endpoint(token_url);
        pool.set_oauth_client_id("test-client.apps.googleusercontent.com".to_string());

        let mut account = Account::new("user@test".to_string(), AccountSource::Oauth);
        account.oauth_refresh_token = Some("refresh-abc".to_string());
        pool.add_account(account).await.expect("add account");
        pool
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_network_call() {
        let (url, hits, server) = start_token_server(200).await;
        let pool = Arc::new(pool_with_account(url).await);

        let mut handles = Vec::new();
        for _ in 0..5 {
            let pool = Arc::clone(&pool);
            handles.push(tokio::spawn(async move {
                pool.token_for_account("user@test").await
            }));
        }
        for handle in handles {
            let token = handle.await.expect("join").expect("token");
            assert_eq!(token, "fresh-token");
        }

        server.abort();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cached_token_is_reused_until_the_skew_window() {
        let (url, hits, server) = start_token_server(200).await;
        let pool = pool_with_account(url).await;

        let now = chrono::Utc::now().timestamp_millis();
        pool.cache_token_for_test("user@test", "cached-token", now + 3_600_000);
        let token = pool.token_for_account("user@test").await.expect("token");
        assert_eq!(token, "cached-token");
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // Within the 60s skew window the cache entry no longer counts.
        pool.cache_token_for_test("user@test", "stale-token", now + 30_000);
        let token = pool.token_for_account("user@test").await.expect("token");
        assert_eq!(token, "fresh-token");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        server.abort();
    }

    #[tokio::test]
    async fn rejected_refresh_invalidates_the_account() {
        let (url, _hits, server) = start_token_server(400).await;
        let pool = pool_with_account(url).await;

        let err = pool
            .token_for_account("user@test")
            .await
            .expect_err("refresh should fail");
        assert!(matches!(err, ProxyError::Unauthorized(_)));

        let account = pool.account_snapshot("user@test").await.expect("account");
        assert!(account.is_invalid);

        // Terminal: subsequent calls fail fast without touching the network.
        let err = pool
            .token_for_account("user@test")
            .await
            .expect_err("invalid account cannot refresh");
        assert!(matches!(err, ProxyError::Unauthorized(_)));
        server.abort();
    }

    #[tokio::test]
    async fn account_without_refresh_token_is_unauthorized() {
        let (url, hits, server) = start_token_server(200).await;
        let pool = pool_with_account(url).await;
        let mut keyless = Account::new("keyless@test".to_string(), AccountSource::Manual);
        keyless.api_key = Some("sk-test".to_string());
        pool.add_account(keyless).await.expect("add account");

        let err = pool
            .token_for_account("keyless@test")
            .await
            .expect_err("no refresh token");
        assert!(matches!(err, ProxyError::Unauthorized(_)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        server.abort();
    }
}
