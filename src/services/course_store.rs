// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Store of today's sessions (the `Course` table).

use crate::db::SqliteDb;
use crate::error::Result;
use crate::models::{Session, UserId};
use crate::time_utils::HourWindow;

/// Today's sessions, replaced wholesale by the fleet refresh and per user by
/// the setup/resume/update flows.
#[derive(Clone)]
pub struct CourseStore {
    db: SqliteDb,
    start_hours: HourWindow,
}

impl CourseStore {
    /// `start_hours` bounds the start hours that hourly lookups accept.
    pub fn new(db: SqliteDb, start_hours: HourWindow) -> Self {
        Self { db, start_hours }
    }

    /// Atomically replace every stored session.
    pub fn replace_all(&self, sessions: &[Session]) -> Result<()> {
        self.db.replace_all_courses(sessions)?;
        tracing::info!(count = sessions.len(), "Replaced all sessions");
        Ok(())
    }

    /// Atomically replace one user's sessions.
    pub fn replace_for_user(&self, user_id: UserId, sessions: &[Session]) -> Result<()> {
        self.db.replace_courses_for_user(user_id, sessions)?;
        tracing::info!(user_id, count = sessions.len(), "Replaced user sessions");
        Ok(())
    }

    /// Sessions starting at `hour`.
    ///
    /// Hours outside the configured window return nothing rather than an
    /// error, so stray ticks around boot or shutdown are harmless.
    pub fn query_by_start_hour(&self, hour: u32) -> Result<Vec<Session>> {
        if !self.start_hours.contains(hour) {
            tracing::debug!(hour, window = ?self.start_hours, "Hour outside window");
            return Ok(Vec::new());
        }
        self.db.courses_by_start_hour(hour)
    }

    pub fn count_for_user(&self, user_id: UserId) -> Result<usize> {
        self.db.count_courses_for_user(user_id)
    }

    /// Every stored session.
    pub fn all(&self) -> Result<Vec<Session>> {
        self.db.all_courses()
    }
}
