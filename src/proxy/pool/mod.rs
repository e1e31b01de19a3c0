pub mod persistence;
pub mod selection;
pub mod token;

use crate::constants::MAX_FINGERPRINT_HISTORY;
use crate::error::{ProxyError, ProxyResult};
use crate::models::{
    Account, AccountRegistry, AccountSource, AccountStatus, Fingerprint, FingerprintChange,
    FingerprintRecord, Subscription,
};
use crate::modules::fingerprint;
use crate::proxy::telemetry::ActivityTracker;
use dashmap::DashMap;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Duration;

/// Everything a request handler needs from a selected account.
#[derive(Debug, Clone)]
pub struct SelectedAccount {
    pub email: String,
    pub fingerprint: Fingerprint,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelemetryAccount {
    pub email: String,
    pub project_id: Option<String>,
    pub fingerprint: Option<Fingerprint>,
}

/// Secret-free per-account view for status surfaces. The fingerprint is
/// reduced to a presence flag; tokens and keys are never included.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatusView {
    pub email: String,
    pub source: AccountSource,
    pub enabled: bool,
    pub is_invalid: bool,
    pub status: AccountStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
    pub has_fingerprint: bool,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub active: usize,
    pub limited: usize,
}

/// Persistent account registry plus the OAuth token cache. All mutation goes
/// through this type; saves are serialized and written atomically.
pub struct AccountPool {
    path: PathBuf,
    accounts: RwLock<Vec<Account>>,
    settings: serde_json::Value,
    token_cache: DashMap<String, token::TokenCacheEntry>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    save_lock: Mutex<()>,
    activity: Arc<ActivityTracker>,
    http: wreq::Client,
    token_url: String,
    oauth_client_id: Option<String>,
    oauth_client_secret: Option<String>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn env_first(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = std::env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

impl AccountPool {
    /// Read the registry from disk, synthesizing fingerprints for accounts
    /// that are missing one and upgrading legacy identities. Loading twice
    /// yields the same registry.
    pub async fn load(path: PathBuf) -> ProxyResult<Self> {
        let registry = persistence::read_registry(&path)?;
        let mut accounts = registry.accounts;
        let mut changed = false;

        for account in &mut accounts {
            match account.fingerprint.take() {
                None => {
                    account.fingerprint = Some(fingerprint::generate());
                    changed = true;
                    tracing::info!("Synthesized fingerprint for account {}", account.email);
                }
                Some(fp) => {
                    let upgraded = fingerprint::update_version(fp.clone());
                    if upgraded != fp {
                        changed = true;
                        tracing::info!("Upgraded legacy fingerprint for account {}", account.email);
                    }
                    account.fingerprint = Some(upgraded);
                }
            }
        }

        let pool = Self {
            path,
            accounts: RwLock::new(accounts),
            settings: registry.settings,
            token_cache: DashMap::new(),
            refresh_locks: DashMap::new(),
            save_lock: Mutex::new(()),
            activity: Arc::new(ActivityTracker::new()),
            http: wreq::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| wreq::Client::new()),
            token_url: crate::constants::OAUTH_TOKEN_URL.to_string(),
            oauth_client_id: env_first(&[
                "TRESTLE_GOOGLE_OAUTH_CLIENT_ID",
                "GOOGLE_OAUTH_CLIENT_ID",
            ]),
            oauth_client_secret: env_first(&[
                "TRESTLE_GOOGLE_OAUTH_CLIENT_SECRET",
                "GOOGLE_OAUTH_CLIENT_SECRET",
            ]),
        };

        if changed {
            pool.save().await?;
        }
        Ok(pool)
    }

    pub fn activity(&self) -> Arc<ActivityTracker> {
        Arc::clone(&self.activity)
    }

    pub fn set_token_endpoint(&mut self, url: String) {
        self.token_url = url;
    }

    pub fn set_oauth_client_id(&mut self, client_id: String) {
        self.oauth_client_id = Some(client_id);
    }

    pub async fn save(&self) -> ProxyResult<()> {
        let _guard = self.save_lock.lock().await;
        let registry = {
            let accounts = self.accounts.read().await;
            AccountRegistry {
                accounts: accounts.clone(),
                settings: self.settings.clone(),
            }
        };
        persistence::write_registry_atomic(&self.path, &registry)
    }

    /// Pick an account for an outbound request and bump its `last_used`.
    pub async fn select_account(&self, model: &str) -> ProxyResult<SelectedAccount> {
        let selected = {
            let mut accounts = self.accounts.write().await;
            let idx = selection::select_index(&accounts, model)
                .ok_or(ProxyError::NoAccountAvailable)?;
            let account = &mut accounts[idx];
            account.touch();
            let fingerprint = match &account.fingerprint {
                Some(fp) => fp.clone(),
                None => {
                    let fp = fingerprint::generate();
                    account.fingerprint = Some(fp.clone());
                    fp
                }
            };
            SelectedAccount {
                email: account.email.clone(),
                fingerprint,
                project_id: account.effective_project_id().map(str::to_string),
            }
        };
        self.activity.notify();
        self.save().await?;
        Ok(selected)
    }

    /// Accounts eligible for heartbeat traffic: enabled, valid, and used
    /// within the active window.
    pub async fn telemetry_accounts(&self, active_window_ms: i64) -> Vec<TelemetryAccount> {
        let now = now_ms();
        let accounts = self.accounts.read().await;
        accounts
            .iter()
            .filter(|a| a.enabled && !a.is_invalid)
            .filter(|a| {
                a.last_used
                    .map(|used| now - used < active_window_ms)
                    .unwrap_or(false)
            })
            .map(|a| TelemetryAccount {
                email: a.email.clone(),
                project_id: a.effective_project_id().map(str::to_string),
                fingerprint: a.fingerprint.clone(),
            })
            .collect()
    }

    pub async fn record_success(&self, email: &str) {
        self.with_account(email, |account| {
            account.status = AccountStatus::Ok;
        })
        .await;
    }

    /// 429 from the upstream: the account is throttled, not broken. Records
    /// the model that hit the limit when quota data is available.
    pub async fn record_rate_limited(&self, email: &str, model: &str) {
        self.with_account(email, |account| {
            account.status = AccountStatus::Limited;
            if let Some(subscription) = account.subscription.as_mut() {
                subscription
                    .models
                    .entry(model.to_string())
                    .and_modify(|quota| quota.remaining_fraction = 0.0)
                    .or_insert(crate::models::ModelQuota {
                        remaining_fraction: 0.0,
                        reset_time: None,
                    });
            }
            tracing::warn!("Account {} rate limited on {}", email, model);
        })
        .await;
    }

    /// 5xx that survived the fetch retries. Transient.
    pub async fn record_server_error(&self, email: &str) {
        self.with_account(email, |account| {
            account.status = AccountStatus::Error;
        })
        .await;
    }

    /// Terminal: the credential is dead. The account is never selected or
    /// heartbeated again until re-imported.
    pub async fn mark_invalid(&self, email: &str) {
        self.token_cache.remove(email);
        self.with_account(email, |account| {
            account.is_invalid = true;
            tracing::warn!("Account {} marked invalid", email);
        })
        .await;
    }

    pub async fn update_subscription(&self, email: &str, subscription: Subscription) {
        self.with_account(email, |account| {
            account.subscription = Some(subscription.clone());
            account.status = AccountStatus::Ok;
        })
        .await;
    }

    async fn with_account<F>(&self, email: &str, mutate: F)
    where
        F: FnOnce(&mut Account),
    {
        {
            let mut accounts = self.accounts.write().await;
            let Some(account) = accounts.iter_mut().find(|a| a.email == email) else {
                tracing::debug!("Ignoring state update for unknown account {}", email);
                return;
            };
            mutate(account);
        }
        if let Err(e) = self.save().await {
            tracing::warn!("Failed to persist account registry: {}", e);
        }
    }

    pub async fn add_account(&self, account: Account) -> ProxyResult<()> {
        {
            let mut accounts = self.accounts.write().await;
            if accounts.iter().any(|a| a.email == account.email) {
                return Err(ProxyError::InvalidArgument(format!(
                    "account already exists: {}",
                    account.email
                )));
            }
            let mut account = account;
            if account.fingerprint.is_none() {
                account.fingerprint = Some(fingerprint::generate());
            }
            accounts.push(account);
        }
        self.save().await
    }

    pub async fn remove_account(&self, email: &str) -> ProxyResult<()> {
        {
            let mut accounts = self.accounts.write().await;
            let before = accounts.len();
            accounts.retain(|a| a.email != email);
            if accounts.len() == before {
                return Err(ProxyError::InvalidArgument(format!(
                    "unknown account: {}",
                    email
                )));
            }
        }
        self.token_cache.remove(email);
        self.save().await
    }

    pub async fn set_enabled(&self, email: &str, enabled: bool) {
        self.with_account(email, |account| {
            account.enabled = enabled;
        })
        .await;
    }

    /// Rotate the current fingerprint out, keeping it at the head of the
    /// history, and install a fresh one.
    pub async fn regenerate_fingerprint(&self, email: &str) -> ProxyResult<Fingerprint> {
        self.rotate_fingerprint(email, FingerprintChange::Regenerated)
            .await
    }

    /// Rotate the current fingerprint out because it is suspected burned.
    pub async fn invalidate_fingerprint(&self, email: &str) -> ProxyResult<Fingerprint> {
        self.rotate_fingerprint(email, FingerprintChange::Invalidated)
            .await
    }

    async fn rotate_fingerprint(
        &self,
        email: &str,
        reason: FingerprintChange,
    ) -> ProxyResult<Fingerprint> {
        let fresh = {
            let mut accounts = self.accounts.write().await;
            let account = accounts
                .iter_mut()
                .find(|a| a.email == email)
                .ok_or_else(|| {
                    ProxyError::InvalidArgument(format!("unknown account: {}", email))
                })?;

            if let Some(current) = account.fingerprint.take() {
                account.fingerprint_history.insert(
                    0,
                    FingerprintRecord {
                        fingerprint: current,
                        reason,
                        timestamp: now_ms(),
                    },
                );
                account.fingerprint_history.truncate(MAX_FINGERPRINT_HISTORY);
            }
            let fresh = fingerprint::generate();
            account.fingerprint = Some(fresh.clone());
            fresh
        };
        self.save().await?;
        Ok(fresh)
    }

    /// Reinstall a fingerprint from the history. The outgoing current
    /// fingerprint moves to the head of the history; the restored entry is
    /// removed from it.
    pub async fn restore_fingerprint(
        &self,
        email: &str,
        history_index: usize,
    ) -> ProxyResult<Fingerprint> {
        let restored = {
            let mut accounts = self.accounts.write().await;
            let account = accounts
                .iter_mut()
                .find(|a| a.email == email)
                .ok_or_else(|| {
                    ProxyError::InvalidArgument(format!("unknown account: {}", email))
                })?;

            if history_index >= account.fingerprint_history.len() {
                return Err(ProxyError::InvalidArgument(format!(
                    "fingerprint history index out of range: {}",
                    history_index
                )));
            }

            let shift = if let Some(current) = account.fingerprint.take() {
                account.fingerprint_history.insert(
                    0,
                    FingerprintRecord {
                        fingerprint: current,
                        reason: FingerprintChange::Restored,
                        timestamp: now_ms(),
                    },
                );
                1
            } else {
                0
            };
            // The target shifted one slot down when the outgoing fingerprint
            // was pushed; remove it so it never appears both as current and
            // in the history.
            let record = account.fingerprint_history.remove(history_index + shift);
            account.fingerprint = Some(record.fingerprint.clone());
            account
                .fingerprint_history
                .truncate(MAX_FINGERPRINT_HISTORY);
            record.fingerprint
        };
        self.save().await?;
        Ok(restored)
    }

    pub async fn get_status(&self) -> Vec<AccountStatusView> {
        let accounts = self.accounts.read().await;
        accounts
            .iter()
            .map(|a| AccountStatusView {
                email: a.email.clone(),
                source: a.source,
                enabled: a.enabled,
                is_invalid: a.is_invalid,
                status: a.status,
                subscription: a.subscription.clone(),
                last_used: a.last_used,
                has_fingerprint: a.fingerprint.is_some(),
            })
            .collect()
    }

    pub async fn pool_stats(&self) -> PoolStats {
        let accounts = self.accounts.read().await;
        let enabled: Vec<&Account> = accounts.iter().filter(|a| a.enabled).collect();
        let active = enabled.iter().filter(|a| selection::is_active(a)).count();
        PoolStats {
            total: enabled.len(),
            active,
            limited: enabled.len() - active,
        }
    }

    #[cfg(test)]
    pub(crate) async fn account_snapshot(&self, email: &str) -> Option<Account> {
        let accounts = self.accounts.read().await;
        accounts.iter().find(|a| a.email == email).cloned()
    }
}
