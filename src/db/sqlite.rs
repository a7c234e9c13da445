// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! SQLite client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Users (subscription URL + notification flag)
//! - Courses (today's sessions, replaced wholesale or per user)
//!
//! Every operation runs on a single connection behind a mutex, and every
//! multi-statement write runs in one transaction, so readers only ever see
//! the state before or after a write.

use crate::db::tables::{COURSE, USER, USER_CONFIG};
use crate::error::AppError;
use crate::models::{Session, User, UserId};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// SQLite database client.
#[derive(Clone)]
pub struct SqliteDb {
    conn: Arc<Mutex<Connection>>,
}

fn db_err(e: rusqlite::Error) -> AppError {
    AppError::Database(e.to_string())
}

impl SqliteDb {
    /// Open (or create) the database file and bootstrap the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Database(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        tracing::info!(path = %path.display(), "Opened SQLite database");
        Self::from_connection(conn)
    }

    /// Private in-memory database (tests, dry runs).
    pub fn in_memory() -> Result<Self, AppError> {
        Self::from_connection(Connection::open_in_memory().map_err(db_err)?)
    }

    fn from_connection(conn: Connection) -> Result<Self, AppError> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.bootstrap()?;
        Ok(db)
    }

    fn bootstrap(&self) -> Result<(), AppError> {
        let schema = format!(
            "
            CREATE TABLE IF NOT EXISTS {USER} (
                user_id INTEGER PRIMARY KEY,
                subscription TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS {USER_CONFIG} (
                user_id INTEGER PRIMARY KEY,
                stop INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS {COURSE} (
                course_code TEXT NOT NULL,
                course_name TEXT NOT NULL,
                course_type TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER NOT NULL,
                user_id INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_course_start_time ON {COURSE}(start_time);
            CREATE INDEX IF NOT EXISTS idx_course_user_id ON {COURSE}(user_id);
            "
        );
        self.lock()?.execute_batch(&schema).map_err(db_err)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.conn
            .lock()
            .map_err(|_| AppError::Database("SQLite connection lock poisoned".to_string()))
    }

    // ─── User Operations ─────────────────────────────────────────

    /// Load every user together with its notification flag.
    pub fn load_users(&self) -> Result<Vec<User>, AppError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT u.user_id, u.subscription, COALESCE(c.stop, 0)
                 FROM {USER} u LEFT JOIN {USER_CONFIG} c ON c.user_id = u.user_id
                 ORDER BY u.user_id"
            ))
            .map_err(db_err)?;

        let rows = stmt
            .query_map([], |row| {
                let stop: bool = row.get(2)?;
                Ok(User {
                    id: row.get(0)?,
                    subscription_url: row.get(1)?,
                    notifications_enabled: !stop,
                })
            })
            .map_err(db_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    /// Create or update a user and its config row.
    pub fn upsert_user(&self, user: &User) -> Result<(), AppError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            &format!(
                "INSERT INTO {USER} (user_id, subscription) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET subscription = excluded.subscription"
            ),
            params![user.id, user.subscription_url],
        )
        .map_err(db_err)?;
        Self::write_stop_flag(&tx, user.id, !user.notifications_enabled)?;
        tx.commit().map_err(db_err)
    }

    /// Set the `stop` flag. Returns false if the user does not exist.
    pub fn set_user_stop(&self, user_id: UserId, stop: bool) -> Result<bool, AppError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        if !Self::user_exists(&tx, user_id)? {
            return Ok(false);
        }
        Self::write_stop_flag(&tx, user_id, stop)?;
        tx.commit().map_err(db_err)?;
        Ok(true)
    }

    /// Replace a user's subscription and clear its `stop` flag.
    /// Returns false if the user does not exist.
    pub fn update_subscription(&self, user_id: UserId, url: &str) -> Result<bool, AppError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        let updated = tx
            .execute(
                &format!("UPDATE {USER} SET subscription = ?1 WHERE user_id = ?2"),
                params![url, user_id],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Ok(false);
        }
        Self::write_stop_flag(&tx, user_id, false)?;
        tx.commit().map_err(db_err)?;
        Ok(true)
    }

    fn user_exists(tx: &Transaction<'_>, user_id: UserId) -> Result<bool, AppError> {
        tx.query_row(
            &format!("SELECT 1 FROM {USER} WHERE user_id = ?1"),
            params![user_id],
            |_| Ok(()),
        )
        .optional()
        .map(|found| found.is_some())
        .map_err(db_err)
    }

    fn write_stop_flag(tx: &Transaction<'_>, user_id: UserId, stop: bool) -> Result<(), AppError> {
        tx.execute(
            &format!(
                "INSERT INTO {USER_CONFIG} (user_id, stop) VALUES (?1, ?2)
                 ON CONFLICT(user_id) DO UPDATE SET stop = excluded.stop"
            ),
            params![user_id, stop],
        )
        .map_err(db_err)?;
        Ok(())
    }

    // ─── Course Operations ───────────────────────────────────────

    /// Delete every course and insert `sessions`, in one transaction.
    pub fn replace_all_courses(&self, sessions: &[Session]) -> Result<(), AppError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(&format!("DELETE FROM {COURSE}"), [])
            .map_err(db_err)?;
        Self::insert_courses(&tx, sessions)?;
        tx.commit().map_err(db_err)
    }

    /// Delete one user's courses and insert `sessions`, in one transaction.
    pub fn replace_courses_for_user(
        &self,
        user_id: UserId,
        sessions: &[Session],
    ) -> Result<(), AppError> {
        if let Some(foreign) = sessions.iter().find(|s| s.user_id != user_id) {
            return Err(AppError::Internal(anyhow::anyhow!(
                "Session owned by user {} passed to replace for user {}",
                foreign.user_id,
                user_id
            )));
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err)?;
        tx.execute(
            &format!("DELETE FROM {COURSE} WHERE user_id = ?1"),
            params![user_id],
        )
        .map_err(db_err)?;
        Self::insert_courses(&tx, sessions)?;
        tx.commit().map_err(db_err)
    }

    fn insert_courses(tx: &Transaction<'_>, sessions: &[Session]) -> Result<(), AppError> {
        let mut stmt = tx
            .prepare(&format!(
                "INSERT INTO {COURSE}
                 (course_code, course_name, course_type, start_time, end_time, user_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
            ))
            .map_err(db_err)?;

        for s in sessions {
            stmt.execute(params![
                s.unit_code,
                s.unit_title,
                s.session_type,
                s.start_hour,
                s.end_hour,
                s.user_id
            ])
            .map_err(db_err)?;
        }
        Ok(())
    }

    /// Courses starting at `hour`, in user order.
    pub fn courses_by_start_hour(&self, hour: u32) -> Result<Vec<Session>, AppError> {
        self.query_courses(
            &format!(
                "SELECT course_code, course_name, course_type, start_time, end_time, user_id
                 FROM {COURSE} WHERE start_time = ?1
                 ORDER BY user_id, course_code"
            ),
            params![hour],
        )
    }

    /// Every stored course.
    pub fn all_courses(&self) -> Result<Vec<Session>, AppError> {
        self.query_courses(
            &format!(
                "SELECT course_code, course_name, course_type, start_time, end_time, user_id
                 FROM {COURSE}
                 ORDER BY user_id, start_time, course_code"
            ),
            [],
        )
    }

    /// Number of stored courses for a user.
    pub fn count_courses_for_user(&self, user_id: UserId) -> Result<usize, AppError> {
        let count: i64 = self
            .lock()?
            .query_row(
                &format!("SELECT COUNT(*) FROM {COURSE} WHERE user_id = ?1"),
                params![user_id],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        Ok(count as usize)
    }

    fn query_courses(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Session>, AppError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok(Session {
                    unit_code: row.get(0)?,
                    unit_title: row.get(1)?,
                    session_type: row.get(2)?,
                    start_hour: row.get(3)?,
                    end_hour: row.get(4)?,
                    user_id: row.get(5)?,
                })
            })
            .map_err(db_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }
}
