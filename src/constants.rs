use regex::Regex;
use std::sync::LazyLock;

pub const DAILY_BASE_URL: &str = "https://daily-cloudcode-pa.googleapis.com";
pub const PROD_BASE_URL: &str = "https://cloudcode-pa.googleapis.com";

pub const FETCH_USER_INFO_PATH: &str = "/v1internal:fetchUserInfo";
pub const LIST_EXPERIMENTS_PATH: &str = "/v1internal:listExperiments";
pub const RECORD_TRAJECTORY_PATH: &str = "/v1internal:recordTrajectoryAnalytics";
pub const RECORD_CODE_ASSIST_PATH: &str = "/v1internal:recordCodeAssistMetrics";
pub const GENERATE_CONTENT_PATH: &str = "/v1internal:generateContent";

pub const OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Additional attempts after the first one (3 requests total).
pub const MAX_RETRIES: u32 = 2;

pub const MAX_FINGERPRINT_HISTORY: usize = 5;

pub const SIGNATURE_CACHE_CAPACITY: usize = 10_000;

/// Access tokens are considered expired this long before their actual expiry.
pub const TOKEN_EXPIRY_SKEW_MS: i64 = 60_000;

/// Accounts below this remaining-quota fraction are not preferred for routing.
pub const QUOTA_FLOOR_FRACTION: f64 = 0.05;

/// Model id reported in heartbeat trajectory metrics. Upstream still accepts
/// this id; rotate from an allowlist if it ever starts rejecting it.
pub const HEARTBEAT_MODEL_ID: &str = "gemini-1.5-pro-002";

pub static CORE_MODEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)sonnet|opus|pro|flash").expect("Invalid core model regex"));

pub fn is_core_model(model: &str) -> bool {
    CORE_MODEL_RE.is_match(model)
}
