use crate::models::{ClientMetadata, Fingerprint};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use uuid::Uuid;

/// Legacy identities generated before the browser-style user agent rollout.
const LEGACY_UA_PREFIX: &str = "antigravity/";

const PLATFORMS: [&str; 3] = ["darwin", "win32", "linux"];

const MAC_OS_VERSIONS: [&str; 5] = ["12.7.4", "13.6.7", "14.5", "14.6.1", "15.1"];
const WINDOWS_OS_VERSIONS: [&str; 3] = ["10.0.19045", "10.0.22631", "10.0.26100"];
const LINUX_OS_VERSIONS: [&str; 3] = ["5.15.0", "6.5.0", "6.8.0"];

const ARCHES: [&str; 2] = ["x64", "arm64"];

const EDITOR_VERSIONS: [&str; 5] = ["1.94.2", "1.95.3", "1.96.0", "1.96.2", "1.97.1"];
const ENGINE_VERSIONS: [&str; 4] = [
    "128.0.6613.186",
    "130.0.6723.59",
    "132.0.6834.83",
    "134.0.6998.44",
];
const ELECTRON_VERSIONS: [&str; 3] = ["30.5.1", "32.2.7", "34.0.1"];

const API_CLIENTS: [&str; 3] = ["gl-node/18.19.1", "gl-node/20.11.0", "gl-node/22.21.1"];

const IDE_TYPE: &str = "ANTIGRAVITY";
const PLUGIN_TYPE: &str = "ANTIGRAVITY";

fn random_hex(length: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(length);
    for _ in 0..length {
        let idx = rng.gen_range(0..16);
        out.push(HEX[idx] as char);
    }
    out
}

fn pick<'a>(pool: &[&'a str]) -> &'a str {
    pool.choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or_default()
}

fn metadata_platform(platform: &str) -> &'static str {
    match platform {
        "darwin" => "macos",
        "win32" => "windows",
        "linux" => "linux",
        _ => "unspecified",
    }
}

fn user_agent_for(platform: &str, os_version: &str, editor: &str, engine: &str) -> String {
    let electron = pick(&ELECTRON_VERSIONS);
    let os_token = match platform {
        "darwin" => format!("Macintosh; Intel Mac OS X {}", os_version.replace('.', "_")),
        "win32" => format!("Windows NT {}; Win64; x64", os_version),
        _ => "X11; Linux x86_64".to_string(),
    };
    format!(
        "Mozilla/5.0 ({}) AppleWebKit/537.36 (KHTML, like Gecko) Code/{} Chrome/{} Electron/{} Safari/537.36",
        os_token, editor, engine, electron
    )
}

/// Produce a fully random device identity. Every random field is drawn
/// independently per call.
pub fn generate() -> Fingerprint {
    let platform = pick(&PLATFORMS);
    let os_version = match platform {
        "darwin" => pick(&MAC_OS_VERSIONS),
        "win32" => pick(&WINDOWS_OS_VERSIONS),
        _ => pick(&LINUX_OS_VERSIONS),
    };
    let editor = pick(&EDITOR_VERSIONS);
    let engine = pick(&ENGINE_VERSIONS);

    Fingerprint {
        device_id: Uuid::new_v4().to_string(),
        session_token: random_hex(32),
        user_agent: user_agent_for(platform, os_version, editor, engine),
        api_client: pick(&API_CLIENTS).to_string(),
        quota_user: format!("device-{}", random_hex(16)),
        client_metadata: ClientMetadata {
            ide_type: IDE_TYPE.to_string(),
            platform: metadata_platform(platform).to_string(),
            plugin_type: PLUGIN_TYPE.to_string(),
            os_version: os_version.to_string(),
            arch: pick(&ARCHES).to_string(),
            sqm_id: format!("{{{}}}", Uuid::new_v4().to_string().to_uppercase()),
        },
        created_at: chrono::Utc::now().timestamp_millis(),
    }
}

/// Request headers carrying the device identity. Absent fingerprint means
/// no identity headers at all.
pub fn build_headers(fingerprint: Option<&Fingerprint>) -> HashMap<String, String> {
    let Some(fp) = fingerprint else {
        return HashMap::new();
    };
    let mut headers = HashMap::new();
    headers.insert("User-Agent".to_string(), fp.user_agent.clone());
    headers.insert("X-Goog-Api-Client".to_string(), fp.api_client.clone());
    headers.insert(
        "Client-Metadata".to_string(),
        serde_json::to_string(&fp.client_metadata).unwrap_or_default(),
    );
    headers.insert("X-Goog-QuotaUser".to_string(), fp.quota_user.clone());
    headers.insert("X-Client-Device-Id".to_string(), fp.device_id.clone());
    headers
}

/// Upgrade a legacy `antigravity/…` identity to the browser-style user
/// agent, keeping the device identity (id, session token, quota user,
/// creation time) intact. Anything already upgraded passes through
/// untouched.
pub fn update_version(fingerprint: Fingerprint) -> Fingerprint {
    if !fingerprint.user_agent.starts_with(LEGACY_UA_PREFIX) {
        return fingerprint;
    }
    let fresh = generate();
    Fingerprint {
        user_agent: fresh.user_agent,
        client_metadata: fresh.client_metadata,
        ..fingerprint
    }
}
