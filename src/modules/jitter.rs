use rand::Rng;
use tokio::time::Duration;

const NETWORK_ERROR_MARKERS: [&str; 6] = [
    "fetch failed",
    "network error",
    "econnreset",
    "etimedout",
    "socket hang up",
    "timeout",
];

/// Gaussian sample via Box-Muller.
pub fn gaussian(mean: f64, std_dev: f64) -> f64 {
    let mut rng = rand::thread_rng();
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    let magnitude = (-2.0 * u1.ln()).sqrt();
    mean + std_dev * magnitude * (2.0 * std::f64::consts::PI * u2).cos()
}

/// `base + N(0, base*spread/4)`, clamped at `floor`.
pub fn jittered_ms(base: f64, spread: f64, floor: f64) -> u64 {
    gaussian(base, (base * spread) / 4.0).max(floor) as u64
}

pub async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Uniform sleep in `[min_ms, max_ms]`.
pub async fn sleep_range_ms(min_ms: u64, max_ms: u64) {
    let ms = if max_ms > min_ms {
        rand::thread_rng().gen_range(min_ms..=max_ms)
    } else {
        min_ms
    };
    sleep_ms(ms).await;
}

/// Transient-network predicate over an error message. Matches the markers
/// case-insensitively; an empty message never matches.
pub fn is_network_error(message: &str) -> bool {
    if message.is_empty() {
        return false;
    }
    let lowered = message.to_lowercase();
    NETWORK_ERROR_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}
