// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Calendar feed download and per-user cache.
//!
//! Handles:
//! - HTTP GET of a subscription URL (bounded by a timeout)
//! - Durable caching of the last good document at `<cache_dir>/<user_id>.ics`
//! - Offline reads of that cache for fallback refreshes

use crate::error::AppError;
use crate::models::UserId;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Transport used to download raw calendar documents.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// GET `url` and return the body of a 2xx response.
    async fn get(&self, url: &str) -> Result<String, AppError>;
}

/// reqwest-backed feed transport.
#[derive(Clone)]
pub struct HttpFeedClient {
    http: reqwest::Client,
}

impl HttpFeedClient {
    /// Create a client whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(
                env!("CARGO_PKG_NAME"),
                "/",
                env!("CARGO_PKG_VERSION")
            ))
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client init: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    async fn get(&self, url: &str) -> Result<String, AppError> {
        let url = normalize_feed_url(url)?;

        let response = self.http.get(url.as_str()).send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Fetch(format!("Timed out fetching {}", url))
            } else {
                AppError::Fetch(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Fetch(format!("HTTP {} from {}", status, url)));
        }

        response
            .text()
            .await
            .map_err(|e| AppError::Fetch(format!("Failed to read body: {}", e)))
    }
}

/// Parse a subscription URL, mapping `webcal://` onto `https://`.
pub fn normalize_feed_url(raw: &str) -> Result<url::Url, AppError> {
    let mut url = url::Url::parse(raw.trim())
        .map_err(|e| AppError::Fetch(format!("Invalid URL {:?}: {}", raw, e)))?;

    match url.scheme() {
        "http" | "https" => {}
        "webcal" | "webcals" => {
            // Url::set_scheme refuses special/non-special swaps, so rebuild.
            let rebuilt = format!("https{}", &url.as_str()[url.scheme().len()..]);
            url = url::Url::parse(&rebuilt)
                .map_err(|e| AppError::Fetch(format!("Invalid URL {:?}: {}", raw, e)))?;
        }
        other => {
            return Err(AppError::Fetch(format!("Unsupported URL scheme: {}", other)));
        }
    }

    Ok(url)
}

/// Whether `document` opens with `BEGIN:VCALENDAR` (ignoring a BOM and
/// leading whitespace).
pub fn looks_like_calendar(document: &str) -> bool {
    document
        .trim_start_matches('\u{feff}')
        .trim_start()
        .get(..15)
        .is_some_and(|head| head.eq_ignore_ascii_case("BEGIN:VCALENDAR"))
}

/// Feed downloader with a per-user on-disk cache.
#[derive(Clone)]
pub struct CalendarFeed {
    client: Arc<dyn FeedClient>,
    cache_dir: PathBuf,
}

impl CalendarFeed {
    pub fn new(client: Arc<dyn FeedClient>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            cache_dir: cache_dir.into(),
        }
    }

    /// Location of a user's cached document.
    pub fn cache_path(&self, user_id: UserId) -> PathBuf {
        self.cache_dir.join(format!("{}.ics", user_id))
    }

    /// Download a user's feed and overwrite their cached copy.
    ///
    /// The cache is only touched after a successful download of something
    /// that looks like a calendar; a login page served with a 2xx status is
    /// a fetch failure and leaves the last good copy in place.
    pub async fn fetch(&self, user_id: UserId, url: &str) -> Result<String, AppError> {
        let document = self.client.get(url).await.map_err(|e| {
            tracing::warn!(user_id, url, error = %e, "Calendar download failed");
            e
        })?;
        if !looks_like_calendar(&document) {
            tracing::warn!(user_id, url, "Download is not an iCalendar document");
            return Err(AppError::Fetch(format!(
                "Response from {} is not an iCalendar document",
                url
            )));
        }
        self.store_cached(user_id, &document).await?;
        tracing::debug!(user_id, bytes = document.len(), "Calendar downloaded");
        Ok(document)
    }

    /// Download a feed without caching it.
    pub async fn fetch_uncached(&self, url: &str) -> Result<String, AppError> {
        self.client.get(url).await
    }

    /// Read the last cached document for a user.
    pub async fn load_cached(&self, user_id: UserId) -> Result<String, AppError> {
        let path = self.cache_path(user_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(document) => Ok(document),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::NotFound(
                format!("No cached calendar for user {}", user_id),
            )),
            Err(e) => Err(AppError::Internal(anyhow::anyhow!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Whether a cached document exists for the user.
    pub async fn has_cached(&self, user_id: UserId) -> bool {
        tokio::fs::try_exists(self.cache_path(user_id))
            .await
            .unwrap_or(false)
    }

    /// Durably replace a user's cached document (temp file + rename).
    pub async fn store_cached(&self, user_id: UserId, document: &str) -> Result<(), AppError> {
        let path = self.cache_path(user_id);
        write_atomic(&self.cache_dir, &path, document)
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!(
                    "Failed to cache calendar at {}: {}",
                    path.display(),
                    e
                ))
            })
    }
}

async fn write_atomic(dir: &Path, path: &Path, contents: &str) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let tmp = path.with_extension("ics.tmp");
    tokio::fs::write(&tmp, contents).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}
