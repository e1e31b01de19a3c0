use crate::constants::{
    FETCH_USER_INFO_PATH, HEARTBEAT_MODEL_ID, LIST_EXPERIMENTS_PATH, RECORD_CODE_ASSIST_PATH,
    RECORD_TRAJECTORY_PATH,
};
use crate::error::ProxyResult;
use crate::models::TelemetryConfig;
use crate::modules::{fingerprint, jitter};
use crate::proxy::fetch::ThrottledFetcher;
use crate::proxy::pool::{AccountPool, TelemetryAccount};
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Timestamp of the last real proxy activity, shared between the pool
/// (which records selections) and the heartbeat loop (which goes quiet when
/// the proxy has been idle long enough).
pub struct ActivityTracker {
    last_activity_ms: AtomicI64,
}

impl ActivityTracker {
    pub fn new() -> Self {
        Self {
            last_activity_ms: AtomicI64::new(0),
        }
    }

    pub fn notify(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::SeqCst);
    }

    pub fn idle_ms(&self) -> i64 {
        let last = self.last_activity_ms.load(Ordering::SeqCst);
        if last == 0 {
            return i64::MAX;
        }
        (now_ms() - last).max(0)
    }
}

impl Default for ActivityTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub struct TelemetryHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TelemetryHandle {
    /// Signal the loop to stop and wait for the current iteration to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

/// Background scheduler that keeps active accounts looking used: each
/// iteration walks the recently-used accounts and emits a randomized subset
/// of IDE-style analytics calls for each.
pub struct TelemetryLoop {
    pool: Arc<AccountPool>,
    fetcher: Arc<ThrottledFetcher>,
    config: TelemetryConfig,
    activity: Arc<ActivityTracker>,
    session_ids: Mutex<HashMap<String, String>>,
}

async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, ms: u64) -> bool {
    tokio::select! {
        _ = shutdown.changed() => true,
        _ = jitter::sleep_ms(ms) => false,
    }
}

impl TelemetryLoop {
    pub fn new(
        pool: Arc<AccountPool>,
        fetcher: Arc<ThrottledFetcher>,
        config: TelemetryConfig,
    ) -> Self {
        let activity = pool.activity();
        Self {
            pool,
            fetcher,
            config,
            activity,
            session_ids: Mutex::new(HashMap::new()),
        }
    }

    pub fn notify_activity(&self) {
        self.activity.notify();
    }

    pub fn start(self: Arc<Self>) -> TelemetryHandle {
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(rx));
        TelemetryHandle {
            shutdown: tx,
            handle,
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("Telemetry heartbeat loop started");
        if wait_or_shutdown(&mut shutdown, self.config.startup_delay_ms).await {
            return;
        }
        loop {
            if let Err(e) = self.tick().await {
                tracing::warn!("Telemetry iteration failed: {}", e);
                if wait_or_shutdown(&mut shutdown, 60_000).await {
                    break;
                }
                continue;
            }

            let spread = self.config.jitter_ms;
            let offset = if spread > 0 {
                rand::thread_rng().gen_range(-spread..=spread)
            } else {
                0
            };
            let delay = (self.config.interval_ms + offset).max(self.config.min_sleep_ms) as u64;
            if wait_or_shutdown(&mut shutdown, delay).await {
                break;
            }
        }
        tracing::info!("Telemetry heartbeat loop stopped");
    }

    async fn tick(&self) -> ProxyResult<()> {
        if self.activity.idle_ms() >= self.config.active_window_ms {
            return Ok(());
        }

        let accounts = self
            .pool
            .telemetry_accounts(self.config.active_window_ms)
            .await;
        for (idx, account) in accounts.iter().enumerate() {
            if idx > 0 {
                let (lo, hi) = self.config.account_gap_ms;
                jitter::sleep_range_ms(lo, hi).await;
            }
            // One broken account must not block the rest.
            if let Err(e) = self.emit_for_account(account).await {
                tracing::debug!("Telemetry emission failed for {}: {}", account.email, e);
            }
        }
        Ok(())
    }

    async fn emit_for_account(&self, account: &TelemetryAccount) -> ProxyResult<()> {
        let Some(project) = account.project_id.as_deref() else {
            tracing::debug!("Skipping telemetry for {}: no project id", account.email);
            return Ok(());
        };

        let session_id = self.session_id_for(&account.email);
        let token = self.pool.token_for_account(&account.email).await?;

        let mut headers = fingerprint::build_headers(account.fingerprint.as_ref());
        headers.insert("Authorization".to_string(), format!("Bearer {}", token));

        let calls = self.plan_calls(project, &session_id);
        for (idx, (path, body)) in calls.iter().enumerate() {
            if idx > 0 {
                let (lo, hi) = self.config.endpoint_gap_ms;
                jitter::sleep_range_ms(lo, hi).await;
            }
            let url = format!("{}{}", self.config.base_url, path);
            match self.fetcher.post_json(&url, &headers, body).await {
                Ok(response) if !response.status().is_success() => {
                    // 429 included: telemetry never counts against quota.
                    tracing::debug!(
                        "Telemetry call {} for {} returned {}",
                        path,
                        account.email,
                        response.status()
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("Telemetry call {} for {} failed: {}", path, account.email, e)
                }
            }
        }
        Ok(())
    }

    fn session_id_for(&self, email: &str) -> String {
        let mut sessions = match self.session_ids.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sessions
            .entry(email.to_string())
            .or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }

    /// Decide which endpoints this pass will hit and build their bodies.
    /// All randomness happens here, before any network await.
    fn plan_calls(&self, project: &str, session_id: &str) -> Vec<(&'static str, Value)> {
        let mut rng = rand::thread_rng();
        let mut calls = Vec::new();

        if rng.gen_bool(0.9) {
            calls.push((FETCH_USER_INFO_PATH, json!({ "project": project })));
        }
        if rng.gen_bool(0.5) {
            calls.push((
                LIST_EXPERIMENTS_PATH,
                json!({
                    "project": project,
                    "parent": format!("projects/{}", project),
                }),
            ));
        }
        if rng.gen_bool(0.3) {
            let events = self.interaction_events(&mut rng);
            calls.push((
                RECORD_TRAJECTORY_PATH,
                json!({
                    "project": project,
                    "session_id": session_id,
                    "trajectory_metrics": {
                        "interaction_events": events,
                        "latency_ms": 100 + rng.gen_range(0..600),
                        "model_id": HEARTBEAT_MODEL_ID,
                    },
                }),
            ));
        }
        if rng.gen_bool(0.2) {
            let shown: u32 = rng.gen_range(1..=3);
            let accepted: u32 = if rng.gen_bool(0.7) { 1 } else { 0 };
            let accept_rate = if shown > 0 {
                f64::from(accepted) / f64::from(shown)
            } else {
                0.0
            };
            calls.push((
                RECORD_CODE_ASSIST_PATH,
                json!({
                    "project": project,
                    "session_id": session_id,
                    "code_assist_metrics": {
                        "completions_shown": shown,
                        "completions_accepted": accepted,
                        "accept_rate": accept_rate,
                        "latency_ms": 100 + rng.gen_range(0..600),
                        "interaction_type": if accepted == 1 { "ACCEPT" } else { "DISMISS" },
                    },
                }),
            ));
        }
        calls
    }

    /// Plausible editor events. Right after real traffic the user is
    /// "typing"; during the liveness gap they merely scroll around.
    fn interaction_events(&self, rng: &mut impl Rng) -> Vec<Value> {
        let now = now_ms();
        let mut events = Vec::new();
        if self.activity.idle_ms() < 15_000 {
            for _ in 0..rng.gen_range(3..=8) {
                events.push(json!({
                    "event_type": "TYPING",
                    "target": "EDITOR_PANE",
                    "event_time": now - rng.gen_range(0..=5_000),
                }));
            }
        } else {
            for _ in 0..rng.gen_range(1..=3) {
                let event_type = if rng.gen_bool(0.6) { "SCROLL" } else { "MOUSE_OVER" };
                events.push(json!({
                    "event_type": event_type,
                    "target": "EDITOR_PANE",
                    "event_time": now - rng.gen_range(0..=10_000),
                }));
            }
            if rng.gen_bool(0.1) {
                let event_type = if rng.gen_bool(0.5) {
                    "WINDOW_FOCUS"
                } else {
                    "WINDOW_BLUR"
                };
                events.push(json!({
                    "event_type": event_type,
                    "target": "IDE_WINDOW",
                    "event_time": now,
                }));
            }
        }
        events
    }
}
