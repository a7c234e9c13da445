// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Timetable session (stored in the `Course` table).

use super::UserId;
use serde::{Deserialize, Serialize};

/// One timetable entry for one user on the current day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Session {
    /// Unit code, e.g. "COMP10120"
    pub unit_code: String,
    /// Human-readable unit title
    pub unit_title: String,
    /// Lecture, Laboratory, Tutorial, ...
    pub session_type: String,
    /// Local start hour (0-23)
    pub start_hour: u32,
    /// Local end hour (0-23)
    pub end_hour: u32,
    /// Owning user
    pub user_id: UserId,
}

/// A session some user has to be reminded about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueNotification {
    pub user_id: UserId,
    pub session: Session,
}
