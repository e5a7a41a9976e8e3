use crate::config::LoggingConfig;
use crate::error::CallError;
use crate::peer::ice::summarize_candidate;
use crate::peer::types::IceCandidate;
use crate::telemetry::resolve_network_path;
use crate::telemetry::stats::{StatsReport, StatsType};
use tracing::debug;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Подключает tracing. При `enabled = false` подписчик не ставится вовсе.
/// `RUST_LOG` имеет приоритет над уровнем из конфига.
pub fn init_logging(config: &LoggingConfig) -> Result<(), CallError> {
    if !config.enabled {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| CallError::Logging(e.to_string()))?;

    let layer = match config.format.as_str() {
        "json" => fmt::layer().json().with_target(true).boxed(),
        "compact" => fmt::layer().compact().with_target(false).boxed(),
        _ => fmt::layer().pretty().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| CallError::Logging(e.to_string()))
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn log_candidate(direction: &str, candidate: &IceCandidate) {
    match summarize_candidate(candidate) {
        Some(s) => debug!(
            direction,
            protocol = %s.protocol,
            address = %s.address,
            port = %s.port,
            candidate_type = %s.candidate_type,
            sdp_mid = ?candidate.sdp_mid,
            "trickle candidate"
        ),
        None => debug!(direction, candidate = %candidate.candidate, "trickle candidate"),
    }
}

/// Быстрый снимок статистики → выбранная пара
pub fn log_selected_pair(report: &StatsReport, moment: &str) {
    let Some(path) = resolve_network_path(report) else {
        debug!(moment, "no selected candidate pair in stats");
        return;
    };
    let pairs = report.of_type(StatsType::CandidatePair).len();
    debug!(
        moment,
        local = %path.local,
        remote = %path.remote,
        pairs,
        "selected candidate pair"
    );
}
