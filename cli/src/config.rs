//! Runtime configuration: defaults, then `.env`, then process environment.

use std::time::Duration;

use labelprinter::registry::DEFAULT_ALLOWED;
use labelprinter::{DitherMode, PrinterTimings, UsbIdentifier};

pub const ENV_ALLOWED_DEVICES: &str = "LABELPRINTER_ALLOWED_DEVICES";
pub const ENV_PERMISSION_TIMEOUT_MS: &str = "LABELPRINTER_PERMISSION_TIMEOUT_MS";
pub const ENV_TRANSFER_TIMEOUT_MS: &str = "LABELPRINTER_TRANSFER_TIMEOUT_MS";
pub const ENV_POLL_INTERVAL_MS: &str = "LABELPRINTER_POLL_INTERVAL_MS";
pub const ENV_PAGE_TIMEOUT_MS: &str = "LABELPRINTER_PAGE_TIMEOUT_MS";
pub const ENV_LAST_PAGE_TIMEOUT_MS: &str = "LABELPRINTER_LAST_PAGE_TIMEOUT_MS";
pub const ENV_HEARTBEAT_MS: &str = "LABELPRINTER_HEARTBEAT_MS";
pub const ENV_DEFAULT_THRESHOLD: &str = "LABELPRINTER_DEFAULT_THRESHOLD";
pub const ENV_DEFAULT_DITHER: &str = "LABELPRINTER_DEFAULT_DITHER";

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub allowed_devices: Vec<UsbIdentifier>,
    pub timings: PrinterTimings,
    pub default_threshold: f32,
    pub default_dither: DitherMode,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            allowed_devices: DEFAULT_ALLOWED.to_vec(),
            timings: PrinterTimings::default(),
            default_threshold: 0.5,
            default_dither: DitherMode::None,
        }
    }
}

impl AppConfig {
    /// Load `.env` (if any) and read overrides from the process environment.
    pub fn load() -> Self {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Malformed values keep the default.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let g = |key: &str| get(key).unwrap_or_default();
        let t = defaults.timings;

        let timings = PrinterTimings::new()
            .with_permission_timeout(parse_ms(ENV_PERMISSION_TIMEOUT_MS, &g(ENV_PERMISSION_TIMEOUT_MS), t.permission_timeout))
            .with_transfer_timeout(parse_ms(ENV_TRANSFER_TIMEOUT_MS, &g(ENV_TRANSFER_TIMEOUT_MS), t.transfer_timeout))
            .with_poll_interval(parse_ms(ENV_POLL_INTERVAL_MS, &g(ENV_POLL_INTERVAL_MS), t.poll_interval))
            .with_page_timeout(parse_ms(ENV_PAGE_TIMEOUT_MS, &g(ENV_PAGE_TIMEOUT_MS), t.page_timeout))
            .with_last_page_timeout(parse_ms(
                ENV_LAST_PAGE_TIMEOUT_MS,
                &g(ENV_LAST_PAGE_TIMEOUT_MS),
                t.last_page_timeout,
            ))
            .with_heartbeat_interval(parse_ms(ENV_HEARTBEAT_MS, &g(ENV_HEARTBEAT_MS), t.heartbeat_interval));

        Self {
            allowed_devices: parse_allow_list(&g(ENV_ALLOWED_DEVICES), defaults.allowed_devices),
            timings,
            default_threshold: parse_threshold(&g(ENV_DEFAULT_THRESHOLD), defaults.default_threshold),
            default_dither: parse_dither(&g(ENV_DEFAULT_DITHER), defaults.default_dither),
        }
    }
}

/// Load .env from multiple candidate paths.
fn load_dotenv() {
    let candidates = [".env", "../.env"];
    for path in &candidates {
        if dotenvy::from_filename(path).is_ok() {
            tracing::debug!("Loaded .env from: {path}");
            return;
        }
    }
    tracing::debug!("No .env file found, using system environment variables");
}

fn parse_ms(key: &str, s: &str, default: Duration) -> Duration {
    if s.is_empty() {
        return default;
    }
    match s.trim().parse::<u64>() {
        Ok(ms) => Duration::from_millis(ms),
        Err(_) => {
            tracing::warn!("Ignoring invalid {key}={s:?}");
            default
        }
    }
}

fn parse_threshold(s: &str, default: f32) -> f32 {
    if s.is_empty() {
        return default;
    }
    match s.trim().parse::<f32>() {
        Ok(t) if (0.0..=1.0).contains(&t) => t,
        _ => {
            tracing::warn!("Ignoring invalid {ENV_DEFAULT_THRESHOLD}={s:?}");
            default
        }
    }
}

fn parse_dither(s: &str, default: DitherMode) -> DitherMode {
    if s.is_empty() {
        return default;
    }
    s.parse().unwrap_or_else(|e| {
        tracing::warn!("Ignoring {ENV_DEFAULT_DITHER}: {e}");
        default
    })
}

/// Comma-separated `vid:pid` pairs. Falls back to `default` if any entry is
/// malformed, so a typo never silently narrows the list.
fn parse_allow_list(s: &str, default: Vec<UsbIdentifier>) -> Vec<UsbIdentifier> {
    if s.trim().is_empty() {
        return default;
    }
    let parsed: Result<Vec<UsbIdentifier>, String> = s
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(str::parse)
        .collect();
    match parsed {
        Ok(list) if !list.is_empty() => list,
        Ok(_) => default,
        Err(e) => {
            tracing::warn!("Ignoring {ENV_ALLOWED_DEVICES}: {e}");
            default
        }
    }
}
