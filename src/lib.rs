pub mod constants;
pub mod error;
pub mod models;
pub mod modules;
pub mod proxy;
#[cfg(test)]
mod test_utils;

use modules::logger;
use std::sync::Arc;
use tracing::{error, info, warn};

#[cfg(target_os = "macos")]
fn increase_nofile_limit() {
    unsafe {
        let mut rl = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };

        if libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) == 0 {
            info!(
                "Current open file limit: soft={}, hard={}",
                rl.rlim_cur, rl.rlim_max
            );
            let target = 4096.min(rl.rlim_max);
            if rl.rlim_cur < target {
                rl.rlim_cur = target;
                if libc::setrlimit(libc::RLIMIT_NOFILE, &rl) == 0 {
                    info!("Successfully increased file limit to {}", target);
                } else {
                    warn!("[W-RUNTIME-NOFILE-LIMIT] failed_to_increase_file_descriptor_limit");
                }
            }
        }
    }
}

struct Runtime {
    engine: Arc<proxy::ProxyEngine>,
    telemetry: proxy::TelemetryHandle,
}

async fn start_runtime() -> Result<Runtime, String> {
    let mut config = modules::config::load_app_config()?;
    modules::config::apply_env_overrides(&mut config);
    modules::config::validate_app_config(&config).map_err(|errors| {
        format!(
            "configuration_validation_failed:\n{}",
            errors.join("\n")
        )
    })?;

    let accounts_path = modules::config::accounts_path()?;
    let pool = Arc::new(
        proxy::AccountPool::load(accounts_path)
            .await
            .map_err(|e| format!("failed_to_load_account_registry: {}", e))?,
    );
    let stats = pool.pool_stats().await;
    info!(
        "Account registry loaded: total={}, active={}, limited={}",
        stats.total, stats.active, stats.limited
    );

    let fetcher = Arc::new(proxy::ThrottledFetcher::new(config.fetch.clone()));
    let usage = Arc::new(modules::UsageStats::new(
        modules::config::usage_history_path().ok(),
    ));

    let engine = Arc::new(proxy::ProxyEngine::new(
        &config,
        Arc::clone(&pool),
        Arc::clone(&fetcher),
        usage,
    ));

    let telemetry = Arc::new(proxy::TelemetryLoop::new(
        pool,
        fetcher,
        config.telemetry.clone(),
    ))
    .start();
    info!("Telemetry heartbeat scheduler started");

    Ok(Runtime { engine, telemetry })
}

pub fn run() {
    #[cfg(target_os = "macos")]
    increase_nofile_limit();

    logger::init_logger();

    let runtime = tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");
    runtime.block_on(async {
        let running = match start_runtime().await {
            Ok(runtime) => runtime,
            Err(e) => {
                error!("[E-RUNTIME-STARTUP] {}", e);
                std::process::exit(1);
            }
        };

        info!("Headless relay core is running. Press Ctrl+C to exit.");
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");

        let status = running.engine.shaper_status();
        if status.queued > 0 || status.processing {
            warn!(
                "[W-RUNTIME-STOP] shutting_down_with_inflight_work: queued={}, processing={}",
                status.queued, status.processing
            );
        }
        running.telemetry.shutdown().await;
    });
}
