// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Subscribed user record.

use serde::{Deserialize, Serialize};

/// Opaque numeric user identity (the chat id of the subscriber).
pub type UserId = i64;

/// A subscriber, mirrored from the `User` and `UserConfig` tables.
///
/// The downloaded calendar never lives here: it is owned by the refresh
/// cycle that fetched it and dropped once sessions are extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique identity (also the primary key)
    pub id: UserId,
    /// iCalendar subscription URL
    pub subscription_url: String,
    /// Whether reminders are sent (the inverse of the stored `stop` flag)
    pub notifications_enabled: bool,
}

impl User {
    /// New subscriber with notifications enabled.
    pub fn new(id: UserId, subscription_url: impl Into<String>) -> Self {
        Self {
            id,
            subscription_url: subscription_url.into(),
            notifications_enabled: true,
        }
    }
}
