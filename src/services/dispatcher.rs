// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Notification dispatcher: the orchestrator of the refresh cycle.
//!
//! Handles:
//! 1. Fleet refresh: download every enabled user's feed, extract today's
//!    sessions and replace the whole `Course` table
//! 2. Fallback: if any download fails, redo the cycle from cached feeds for
//!    everyone, so the store is never partially fresh
//! 3. Single-user refresh for the setup/resume/update flows
//! 4. Hourly "who is due" lookups for the scheduler

use crate::config::Config;
use crate::db::SqliteDb;
use crate::error::{AppError, Result};
use crate::models::{DueNotification, Session, User, UserId};
use crate::services::course_store::CourseStore;
use crate::services::extractor::{SessionExtractor, ValidatedCalendar};
use crate::services::feed::CalendarFeed;
use crate::services::user_store::{UserSnapshot, UserStore};
use crate::time_utils::{format_utc_rfc3339, Clock, HourWindow};
use futures_util::{stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Upper bound on passes per fleet refresh: the normal pass plus one
/// cached-only retry.
pub const MAX_REFRESH_PASSES: usize = 2;

/// How long before a session starts its reminder goes out, in hours.
pub const NOTIFY_LEAD_HOURS: u32 = 1;

/// Where a fleet refresh reads calendars from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    /// Download every feed.
    #[default]
    Network,
    /// Use the cached copy when present, download otherwise.
    PreferLocal,
    /// Cached copies only; users without one get no sessions.
    ForceLocal,
}

impl FetchMode {
    /// Map the `use_local_fallback` / `force_local` flag pair onto a mode.
    pub fn from_flags(use_local_fallback: bool, force_local: bool) -> Self {
        match (use_local_fallback, force_local) {
            (false, _) => FetchMode::Network,
            (true, false) => FetchMode::PreferLocal,
            (true, true) => FetchMode::ForceLocal,
        }
    }
}

/// Where the refresh cycle currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshPhase {
    Idle,
    Loading,
    Fetching,
    Extracting,
    Persisted,
    FailedFallback,
}

/// Summary of one fleet refresh.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    /// Passes run (2 when the cached-only retry kicked in)
    pub passes: usize,
    /// Mode of the pass whose result was stored
    pub mode: FetchMode,
    /// Users whose download failed in the first pass
    pub fetch_failures: Vec<UserId>,
    /// Users whose calendar could not be parsed
    pub parse_failures: Vec<UserId>,
    /// Users with no calendar available in the stored pass
    pub missing_calendars: Vec<UserId>,
    /// Opted-out users that were skipped
    pub users_skipped: usize,
    /// Users with at least one session today
    pub users_dispatched: usize,
    /// Users processed without any session today
    pub users_without_sessions: usize,
    /// Sessions written to the store
    pub sessions: usize,
    pub finished_at: String,
}

impl RefreshReport {
    pub fn used_fallback(&self) -> bool {
        !self.fetch_failures.is_empty()
    }
}

/// Outcome of the user-facing setup flow.
#[derive(Debug, Clone, Serialize)]
pub struct SetupOutcome {
    /// False when an existing subscription was replaced
    pub created: bool,
    pub user: User,
    pub sessions: Vec<Session>,
}

/// Calendars gathered during one pass.
#[derive(Default)]
struct FetchOutcome {
    documents: Vec<(UserId, String)>,
    failed: Vec<UserId>,
    missing: Vec<UserId>,
    skipped: usize,
}

/// Orchestrates feed downloads, extraction and the session store.
pub struct NotifyDispatcher {
    users: UserStore,
    courses: CourseStore,
    feed: CalendarFeed,
    extractor: SessionExtractor,
    clock: Arc<dyn Clock>,
    notify_window: HourWindow,
    fetch_concurrency: usize,
    /// Serializes every refresh, fleet-wide or single-user.
    refresh_lock: tokio::sync::Mutex<()>,
    phase: Mutex<RefreshPhase>,
}

impl NotifyDispatcher {
    pub fn new(
        db: SqliteDb,
        feed: CalendarFeed,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self {
            users: UserStore::new(db.clone()),
            courses: CourseStore::new(db, config.notify_window.shifted(NOTIFY_LEAD_HOURS)),
            feed,
            extractor: SessionExtractor::new(config.timezone),
            clock,
            notify_window: config.notify_window,
            fetch_concurrency: config.fetch_concurrency.max(1),
            refresh_lock: tokio::sync::Mutex::new(()),
            phase: Mutex::new(RefreshPhase::Idle),
        }
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub fn courses(&self) -> &CourseStore {
        &self.courses
    }

    pub fn feed(&self) -> &CalendarFeed {
        &self.feed
    }

    pub fn phase(&self) -> RefreshPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_phase(&self, phase: RefreshPhase) {
        tracing::debug!(phase = ?phase, "Refresh phase");
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    // ─── Fleet Refresh ───────────────────────────────────────────

    /// Rebuild today's sessions for every enabled user.
    ///
    /// If any download fails, the cycle is rerun once from cached calendars
    /// only, so that every user's data comes from the same kind of source.
    pub async fn refresh_all(&self, mode: FetchMode) -> Result<RefreshReport> {
        let _guard = self.refresh_lock.lock().await;
        let result = self.refresh_all_locked(mode).await;
        if result.is_err() {
            self.set_phase(RefreshPhase::Idle);
        }
        result
    }

    async fn refresh_all_locked(&self, mut mode: FetchMode) -> Result<RefreshReport> {
        let today = self.clock.today();
        let mut fetch_failures = Vec::new();

        for pass in 1..=MAX_REFRESH_PASSES {
            self.set_phase(RefreshPhase::Loading);
            let users = self.users.reload()?;

            self.set_phase(RefreshPhase::Fetching);
            let fetched = self.load_calendars(&users, mode).await;

            let can_retry = pass < MAX_REFRESH_PASSES && mode != FetchMode::ForceLocal;
            if !fetched.failed.is_empty() && can_retry {
                self.set_phase(RefreshPhase::FailedFallback);
                tracing::warn!(
                    failed_users = ?fetched.failed,
                    "One or more calendar downloads failed, rebuilding from cached calendars for all users"
                );
                fetch_failures = fetched.failed;
                mode = FetchMode::ForceLocal;
                continue;
            }

            self.set_phase(RefreshPhase::Extracting);
            let mut sessions = Vec::new();
            let mut parse_failures = Vec::new();
            let (mut dispatched, mut empty) = (0, 0);

            // Each document is dropped as soon as its sessions are extracted.
            for (user_id, document) in fetched.documents {
                match self.extractor.extract(&document, today, user_id) {
                    Ok(user_sessions) if user_sessions.is_empty() => empty += 1,
                    Ok(user_sessions) => {
                        dispatched += 1;
                        sessions.extend(user_sessions);
                    }
                    Err(e) => {
                        tracing::error!(
                            user_id,
                            error = %e,
                            "Failed to parse calendar, user gets no sessions today"
                        );
                        parse_failures.push(user_id);
                    }
                }
            }

            self.courses.replace_all(&sessions)?;
            self.set_phase(RefreshPhase::Persisted);

            tracing::info!(
                pass,
                mode = ?mode,
                users_dispatched = dispatched,
                users_without_sessions = empty,
                users_skipped = fetched.skipped,
                sessions = sessions.len(),
                "Dispatched today's timetable"
            );

            return Ok(RefreshReport {
                passes: pass,
                mode,
                fetch_failures,
                parse_failures,
                missing_calendars: fetched.missing,
                users_skipped: fetched.skipped,
                users_dispatched: dispatched,
                users_without_sessions: empty,
                sessions: sessions.len(),
                finished_at: format_utc_rfc3339(chrono::Utc::now()),
            });
        }

        Err(AppError::Internal(anyhow::anyhow!(
            "Refresh did not complete within {} passes",
            MAX_REFRESH_PASSES
        )))
    }

    /// Gather calendars for every enabled user, a bounded number at a time.
    async fn load_calendars(&self, users: &UserSnapshot, mode: FetchMode) -> FetchOutcome {
        let (enabled, disabled): (Vec<User>, Vec<User>) = users
            .values()
            .cloned()
            .partition(|u| u.notifications_enabled);
        let mut outcome = FetchOutcome {
            skipped: disabled.len(),
            ..Default::default()
        };

        let mut results = stream::iter(enabled)
            .map(|user: User| async move { (user.id, self.load_calendar(&user, mode).await) })
            .buffer_unordered(self.fetch_concurrency)
            .collect::<Vec<_>>()
            .await;
        results.sort_by_key(|(user_id, _)| *user_id);

        for (user_id, result) in results {
            match result {
                Ok(Some(document)) => outcome.documents.push((user_id, document)),
                Ok(None) => outcome.missing.push(user_id),
                Err(_) => outcome.failed.push(user_id),
            }
        }
        outcome
    }

    /// One user's calendar; `Ok(None)` when no cached copy exists in
    /// cached-only mode.
    async fn load_calendar(&self, user: &User, mode: FetchMode) -> Result<Option<String>> {
        match mode {
            FetchMode::ForceLocal => match self.feed.load_cached(user.id).await {
                Ok(document) => Ok(Some(document)),
                Err(e) => {
                    tracing::warn!(
                        user_id = user.id,
                        error = %e,
                        "No usable cached calendar"
                    );
                    Ok(None)
                }
            },
            FetchMode::PreferLocal => {
                if self.feed.has_cached(user.id).await {
                    match self.feed.load_cached(user.id).await {
                        Ok(document) => return Ok(Some(document)),
                        Err(e) => {
                            tracing::warn!(
                                user_id = user.id,
                                error = %e,
                                "Cached calendar unreadable, downloading"
                            );
                        }
                    }
                }
                self.feed.fetch(user.id, &user.subscription_url).await.map(Some)
            }
            FetchMode::Network => self
                .feed
                .fetch(user.id, &user.subscription_url)
                .await
                .map(Some),
        }
    }

    // ─── Single-User Flows ───────────────────────────────────────

    /// Download one user's feed and replace their sessions.
    ///
    /// No cache fallback: failures go straight back to the caller.
    pub async fn refresh_single_user(&self, user_id: UserId) -> Result<Vec<Session>> {
        let _guard = self.refresh_lock.lock().await;
        let user = self
            .users
            .get(user_id)
            .ok_or_else(|| AppError::NotFound(format!("User {}", user_id)))?;

        let document = self.feed.fetch(user_id, &user.subscription_url).await?;
        self.dispatch_user(user_id, &document)
    }

    /// Fetch a feed and check that it looks like a timetable.
    ///
    /// Nothing is cached or stored.
    pub async fn validate_feed_url(&self, url: &str) -> Result<ValidatedCalendar> {
        let document = self.feed.fetch_uncached(url).await?;
        self.extractor.validate(document)
    }

    /// Subscribe a user (or replace an existing subscription) after
    /// validating the feed, then dispatch today's sessions for them.
    pub async fn setup_user(&self, user_id: UserId, url: &str) -> Result<SetupOutcome> {
        let validated = self.validate_feed_url(url).await?;

        let _guard = self.refresh_lock.lock().await;
        let created = !self.users.contains(user_id);
        let user = User::new(user_id, url);
        self.users.upsert(user.clone())?;
        tracing::info!(user_id, created, "Subscription accepted");

        self.feed.store_cached(user_id, &validated.document).await?;
        let sessions = self.dispatch_user(user_id, &validated.document)?;
        Ok(SetupOutcome {
            created,
            user,
            sessions,
        })
    }

    /// Replace an existing user's subscription; re-enables notifications.
    pub async fn update_subscription(
        &self,
        user_id: UserId,
        url: &str,
    ) -> Result<Vec<Session>> {
        if !self.users.contains(user_id) {
            return Err(AppError::NotFound(format!("User {}", user_id)));
        }
        let validated = self.validate_feed_url(url).await?;

        let _guard = self.refresh_lock.lock().await;
        self.users.update_subscription(user_id, url)?;
        self.feed.store_cached(user_id, &validated.document).await?;
        self.dispatch_user(user_id, &validated.document)
    }

    /// Stop or resume notifications for a user.
    ///
    /// Resuming a user with no sessions stored refreshes their calendar.
    pub async fn set_user_enabled(&self, user_id: UserId, enabled: bool) -> Result<User> {
        let user = self.users.set_enabled(user_id, enabled)?;
        tracing::info!(user_id, enabled, "Notification preference changed");

        if enabled && self.courses.count_for_user(user_id)? == 0 {
            self.refresh_single_user(user_id).await?;
        }
        Ok(user)
    }

    fn dispatch_user(&self, user_id: UserId, document: &str) -> Result<Vec<Session>> {
        let today = self.clock.today();
        let sessions = self.extractor.extract(document, today, user_id)?;
        self.courses.replace_for_user(user_id, &sessions)?;
        Ok(sessions)
    }

    // ─── Queries ─────────────────────────────────────────────────

    /// Sessions starting in the hour after `hour`, for users who want
    /// reminders. Hours outside the notification window yield nothing.
    pub fn due_notifications(&self, hour: u32) -> Result<Vec<DueNotification>> {
        if !self.notify_window.contains(hour) {
            return Ok(Vec::new());
        }

        let sessions = self.courses.query_by_start_hour(hour + NOTIFY_LEAD_HOURS)?;
        Ok(sessions
            .into_iter()
            .filter(|s| self.users.is_enabled(s.user_id))
            .map(|session| DueNotification {
                user_id: session.user_id,
                session,
            })
            .collect())
    }
}
