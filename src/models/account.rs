use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountSource {
    Manual,
    Oauth,
    Imported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Ok,
    Limited,
    Error,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Ultra,
    Pro,
    Free,
}

/// Per-model quota snapshot as last reported by the upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelQuota {
    pub remaining_fraction: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub tier: SubscriptionTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default)]
    pub models: HashMap<String, ModelQuota>,
}

/// JSON-serialized into the `Client-Metadata` header, so field names follow
/// the upstream wire casing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetadata {
    pub ide_type: String,
    pub platform: String,
    pub plugin_type: String,
    pub os_version: String,
    pub arch: String,
    pub sqm_id: String,
}

/// A synthetic device identity. Stable per account until rotated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub device_id: String,
    pub session_token: String,
    pub user_agent: String,
    pub api_client: String,
    pub quota_user: String,
    pub client_metadata: ClientMetadata,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintChange {
    Regenerated,
    Restored,
    Invalidated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintRecord {
    pub fingerprint: Fingerprint,
    pub reason: FingerprintChange,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub email: String,
    pub source: AccountSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub enabled: bool,
    #[serde(default)]
    pub is_invalid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<i64>,
    #[serde(default = "default_status")]
    pub status: AccountStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fingerprint_history: Vec<FingerprintRecord>,
}

fn default_status() -> AccountStatus {
    AccountStatus::Unknown
}

impl Account {
    pub fn new(email: String, source: AccountSource) -> Self {
        Self {
            email,
            source,
            project_id: None,
            oauth_refresh_token: None,
            api_key: None,
            enabled: true,
            is_invalid: false,
            last_used: None,
            status: AccountStatus::Unknown,
            subscription: None,
            fingerprint: None,
            fingerprint_history: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.last_used = Some(chrono::Utc::now().timestamp_millis());
    }

    /// Project id used for upstream calls; the subscription-reported id
    /// takes precedence over the locally stored one.
    pub fn effective_project_id(&self) -> Option<&str> {
        self.subscription
            .as_ref()
            .and_then(|s| s.project_id.as_deref())
            .or(self.project_id.as_deref())
    }
}

/// On-disk shape of `accounts.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountRegistry {
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub settings: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn account_json_uses_wire_casing() {
        let mut account = Account::new("a@test".to_string(), AccountSource::Oauth);
        account.is_invalid = true;
        account.last_used = Some(1700000000000);

        let json = serde_json::to_value(&account).expect("serialize account");
        assert_eq!(json["isInvalid"], serde_json::json!(true));
        assert_eq!(json["lastUsed"], serde_json::json!(1700000000000i64));
        assert_eq!(json["source"], serde_json::json!("oauth"));
        assert!(json.get("fingerprintHistory").is_none());
    }

    #[test]
    fn registry_roundtrip_preserves_subscription() {
        let mut account = Account::new("b@test".to_string(), AccountSource::Manual);
        let mut models = HashMap::new();
        models.insert(
            "gemini-1.5-pro".to_string(),
            ModelQuota {
                remaining_fraction: 0.42,
                reset_time: None,
            },
        );
        account.subscription = Some(Subscription {
            tier: SubscriptionTier::Pro,
            project_id: Some("proj-1".to_string()),
            models,
        });

        let registry = AccountRegistry {
            accounts: vec![account],
            settings: serde_json::json!({}),
        };
        let text = serde_json::to_string(&registry).expect("serialize registry");
        let parsed: AccountRegistry = serde_json::from_str(&text).expect("parse registry");
        let sub = parsed.accounts[0].subscription.as_ref().expect("subscription");
        assert_eq!(sub.tier, SubscriptionTier::Pro);
        assert_eq!(parsed.accounts[0].effective_project_id(), Some("proj-1"));
    }
}
