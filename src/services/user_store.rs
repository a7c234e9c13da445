// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory user repository backed by the `User`/`UserConfig` tables.
//!
//! The map held here is a cache of the database, never the other way around:
//! every write goes to SQLite first and is mirrored into memory only once it
//! succeeded. Readers get an immutable snapshot, so a refresh cycle iterating
//! users never sees a half-applied update from the setup/resume paths.

use crate::db::SqliteDb;
use crate::error::{AppError, Result};
use crate::models::{User, UserId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Immutable view of all users at one point in time.
pub type UserSnapshot = Arc<HashMap<UserId, User>>;

/// Single owner of the in-memory user set.
pub struct UserStore {
    db: SqliteDb,
    snapshot: RwLock<UserSnapshot>,
}

impl UserStore {
    /// Empty store; call [`UserStore::reload`] to populate it.
    pub fn new(db: SqliteDb) -> Self {
        Self {
            db,
            snapshot: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, UserSnapshot> {
        self.snapshot.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSnapshot> {
        self.snapshot.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Re-read every user from the database and swap in the new snapshot.
    pub fn reload(&self) -> Result<UserSnapshot> {
        let mut guard = self.write();
        let users: HashMap<UserId, User> = self
            .db
            .load_users()?
            .into_iter()
            .map(|u| (u.id, u))
            .collect();
        tracing::debug!(count = users.len(), "Reloaded users");
        *guard = Arc::new(users);
        Ok(guard.clone())
    }

    /// Current snapshot of all users.
    pub fn get_all(&self) -> UserSnapshot {
        self.read().clone()
    }

    pub fn get(&self, user_id: UserId) -> Option<User> {
        self.read().get(&user_id).cloned()
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.read().contains_key(&user_id)
    }

    /// Whether a known user currently wants notifications.
    pub fn is_enabled(&self, user_id: UserId) -> bool {
        self.read()
            .get(&user_id)
            .is_some_and(|u| u.notifications_enabled)
    }

    /// Create or overwrite a user.
    pub fn upsert(&self, user: User) -> Result<()> {
        let mut guard = self.write();
        self.db.upsert_user(&user)?;
        Self::apply(&mut *guard, |users| {
            users.insert(user.id, user);
        });
        Ok(())
    }

    /// Turn notifications on or off for an existing user.
    pub fn set_enabled(&self, user_id: UserId, enabled: bool) -> Result<User> {
        let mut guard = self.write();
        if !self.db.set_user_stop(user_id, !enabled)? {
            return Err(AppError::NotFound(format!("User {}", user_id)));
        }
        Self::apply(&mut *guard, |users| {
            if let Some(user) = users.get_mut(&user_id) {
                user.notifications_enabled = enabled;
            }
        });
        self.updated(&guard, user_id)
    }

    /// Replace an existing user's subscription; this also re-enables them.
    pub fn update_subscription(&self, user_id: UserId, url: &str) -> Result<User> {
        let mut guard = self.write();
        if !self.db.update_subscription(user_id, url)? {
            return Err(AppError::NotFound(format!("User {}", user_id)));
        }
        Self::apply(&mut *guard, |users| {
            let user = users
                .entry(user_id)
                .or_insert_with(|| User::new(user_id, url));
            user.subscription_url = url.to_string();
            user.notifications_enabled = true;
        });
        self.updated(&guard, user_id)
    }

    /// Copy-on-write update of the snapshot.
    fn apply(guard: &mut UserSnapshot, f: impl FnOnce(&mut HashMap<UserId, User>)) {
        let mut users = (**guard).clone();
        f(&mut users);
        *guard = Arc::new(users);
    }

    fn updated(&self, guard: &UserSnapshot, user_id: UserId) -> Result<User> {
        guard.get(&user_id).cloned().ok_or_else(|| {
            // Present in the database but not yet loaded into memory.
            AppError::NotFound(format!("User {} (reload pending)", user_id))
        })
    }
}
