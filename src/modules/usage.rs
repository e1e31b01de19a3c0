use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

const HOUR_MS: i64 = 3_600_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageBucket {
    #[serde(rename = "_total")]
    pub total: u64,
    #[serde(flatten)]
    pub families: HashMap<String, HashMap<String, u64>>,
}

/// Hour-bucketed request counter, persisted to `usage-history.json`.
pub struct UsageStats {
    path: Option<PathBuf>,
    buckets: Mutex<BTreeMap<i64, UsageBucket>>,
}

pub fn get_family(model: &str) -> &'static str {
    if model.starts_with("claude") {
        "claude"
    } else if model.starts_with("gemini") {
        "gemini"
    } else {
        "other"
    }
}

pub fn get_short_name(model: &str, family: &str) -> String {
    if family != "other" {
        if let Some(stripped) = model.strip_prefix(&format!("{}-", family)) {
            return stripped.to_string();
        }
    }
    model.to_string()
}

fn hour_start(now_ms: i64) -> i64 {
    now_ms - now_ms.rem_euclid(HOUR_MS)
}

impl UsageStats {
    pub fn new(path: Option<PathBuf>) -> Self {
        let buckets = path
            .as_deref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        Self {
            path,
            buckets: Mutex::new(buckets),
        }
    }

    pub fn track(&self, model: &str) {
        self.track_at(model, chrono::Utc::now().timestamp_millis());
    }

    fn track_at(&self, model: &str, now_ms: i64) {
        let family = get_family(model);
        let short = get_short_name(model, family);
        {
            let mut buckets = match self.buckets.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let bucket = buckets.entry(hour_start(now_ms)).or_default();
            *bucket
                .families
                .entry(family.to_string())
                .or_default()
                .entry(short)
                .or_insert(0) += 1;
            bucket.total += 1;
        }
        self.save();
    }

    pub fn current_hour(&self) -> UsageBucket {
        let buckets = match self.buckets.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        buckets
            .get(&hour_start(chrono::Utc::now().timestamp_millis()))
            .cloned()
            .unwrap_or_default()
    }

    fn save(&self) {
        let Some(path) = self.path.as_deref() else {
            return;
        };
        let snapshot = {
            let buckets = match self.buckets.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            serde_json::to_string_pretty(&*buckets)
        };
        match snapshot {
            Ok(content) => {
                if let Err(e) = std::fs::write(path, content) {
                    tracing::warn!("Failed to persist usage history: {}", e);
                }
            }
            Err(e) => tracing::warn!("Failed to serialize usage history: {}", e),
        }
    }
}
