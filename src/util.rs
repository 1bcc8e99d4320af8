use chrono::{DateTime, Local, Utc};

/// Placeholder shown while a next or last run is not known yet
pub const PENDING: &str = "Pending...";

/// Display format of timestamps in broadcast payloads
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn format_time(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format(TIME_FORMAT).to_string()
}

pub fn format_or_pending(time: Option<DateTime<Utc>>) -> String {
    time.map_or_else(|| PENDING.to_string(), format_time)
}

const VIGIL_LOG: &str = "VIGIL_LOG";

const DEFAULT_LOG_LEVEL: tracing::Level = tracing::Level::INFO;

pub fn get_log_level() -> tracing::Level {
    let level_from_env = std::env::var(VIGIL_LOG);
    level_from_env.map_or(DEFAULT_LOG_LEVEL, |res| {
        res.parse().unwrap_or(DEFAULT_LOG_LEVEL)
    })
}

const VIGIL_CONFIG: &str = "VIGIL_CONFIG";

pub fn get_config_path() -> Option<String> {
    std::env::var(VIGIL_CONFIG).ok()
}
