// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Checkin-Notifier: timetable ingestion and reminder dispatch
//!
//! This crate pulls each subscriber's university timetable feed, keeps today's
//! sessions in SQLite and answers "who has a session next hour" for the
//! check-in reminder bot.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use services::NotifyDispatcher;
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub dispatcher: Arc<NotifyDispatcher>,
}
