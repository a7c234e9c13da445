// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Database layer (SQLite).

pub mod sqlite;

pub use sqlite::SqliteDb;

/// Table names as constants.
pub mod tables {
    pub const USER: &str = "User";
    pub const USER_CONFIG: &str = "UserConfig";
    /// Today's sessions, rebuilt on every refresh
    pub const COURSE: &str = "Course";
}
