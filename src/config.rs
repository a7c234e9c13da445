// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.

use crate::time_utils::HourWindow;
use chrono::NaiveTime;
use chrono_tz::Tz;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bearer token required by the HTTP API
    pub api_token: String,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Directory holding one cached `.ics` document per user
    pub ical_cache_dir: PathBuf,
    /// Server port
    pub port: u16,
    /// Timezone used for "today" and session hours
    pub timezone: Tz,
    /// Upper bound for a single feed download
    pub fetch_timeout: Duration,
    /// Maximum number of feeds downloaded in parallel during a fleet refresh
    pub fetch_concurrency: usize,
    /// Hours of the day during which due notifications are looked up
    pub notify_window: HourWindow,
    /// Minute of each hour at which the due check runs
    pub notify_minute: u32,
    /// Local time of the daily fleet refresh
    pub daily_refresh_at: NaiveTime,
    /// Optional webhook receiving due notifications
    pub notify_webhook_url: Option<String>,
}

impl Config {
    /// Config for tests with deterministic values.
    pub fn test_default() -> Self {
        Self {
            api_token: "test_api_token".to_string(),
            database_path: PathBuf::from(":memory:"),
            ical_cache_dir: env::temp_dir().join("checkin-notifier-test-ical"),
            port: 8080,
            timezone: chrono_tz::Europe::London,
            fetch_timeout: Duration::from_secs(5),
            fetch_concurrency: 4,
            notify_window: HourWindow::new(7, 21),
            notify_minute: 50,
            daily_refresh_at: NaiveTime::from_hms_opt(6, 0, 0).unwrap_or_default(),
            notify_webhook_url: None,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let timezone = env::var("TIMEZONE").unwrap_or_else(|_| "Europe/London".to_string());
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| ConfigError::Invalid("TIMEZONE", timezone.clone()))?;

        let notify_window = HourWindow::new(
            parse_var("NOTIFY_WINDOW_START", 7)?,
            parse_var("NOTIFY_WINDOW_END", 21)?,
        );
        if notify_window.start > notify_window.end || notify_window.end > 23 {
            return Err(ConfigError::Invalid(
                "NOTIFY_WINDOW_END",
                format!("{}..={}", notify_window.start, notify_window.end),
            ));
        }

        let notify_minute: u32 = parse_var("NOTIFY_MINUTE", 50)?;
        if notify_minute > 59 {
            return Err(ConfigError::Invalid(
                "NOTIFY_MINUTE",
                notify_minute.to_string(),
            ));
        }

        let refresh_at = env::var("DAILY_REFRESH_AT").unwrap_or_else(|_| "06:00".to_string());
        let daily_refresh_at = NaiveTime::parse_from_str(&refresh_at, "%H:%M")
            .map_err(|_| ConfigError::Invalid("DAILY_REFRESH_AT", refresh_at.clone()))?;

        Ok(Self {
            api_token: env::var("API_TOKEN")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("API_TOKEN"))?,
            database_path: env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "./db/bot-database.sqlite".to_string())
                .into(),
            ical_cache_dir: env::var("ICAL_CACHE_DIR")
                .unwrap_or_else(|_| "./ical".to_string())
                .into(),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            timezone,
            fetch_timeout: Duration::from_secs(parse_var("FETCH_TIMEOUT_SECS", 20)?),
            fetch_concurrency: parse_var::<usize>("FETCH_CONCURRENCY", 8)?.max(1),
            notify_window,
            notify_minute,
            daily_refresh_at,
            notify_webhook_url: env::var("NOTIFY_WEBHOOK_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
        })
    }
}

/// Read an optional numeric variable, falling back to `default` when unset.
fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(name, raw)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}
