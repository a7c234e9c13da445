// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! API routes used by the chat bot.

use crate::error::{AppError, Result};
use crate::models::{DueNotification, Session, User, UserId};
use crate::services::dispatcher::SetupOutcome;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// API routes (require the bearer token).
/// The auth middleware is applied in routes/mod.rs for these routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/feeds/validate", post(validate_feed))
        .route("/api/users", post(setup_user))
        .route("/api/users/{id}/subscription", put(update_subscription))
        .route("/api/users/{id}/notifications", put(set_notifications))
        .route("/api/users/{id}/refresh", post(refresh_user))
        .route("/api/notifications/due", get(due_notifications))
}

// ─── Feeds ───────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct FeedRequest {
    pub url: String,
}

/// Result of a successful feed check.
#[derive(Serialize)]
pub struct ValidateResponse {
    pub component_count: usize,
    pub sample_unit_code: String,
    pub sample_unit_title: String,
    pub sample_session_type: String,
}

/// Check that a URL serves a timetable feed, without subscribing.
async fn validate_feed(
    State(state): State<Arc<AppState>>,
    Json(body): Json<FeedRequest>,
) -> Result<Json<ValidateResponse>> {
    let validated = state.dispatcher.validate_feed_url(&body.url).await?;
    Ok(Json(ValidateResponse {
        component_count: validated.component_count,
        sample_unit_code: validated.sample_unit_code,
        sample_unit_title: validated.sample_unit_title,
        sample_session_type: validated.sample_session_type,
    }))
}

// ─── Users ───────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SetupRequest {
    pub user_id: UserId,
    pub url: String,
}

/// Subscribe a user; 201 for a new user, 200 when replacing a subscription.
async fn setup_user(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SetupRequest>,
) -> Result<(StatusCode, Json<SetupOutcome>)> {
    let outcome = state.dispatcher.setup_user(body.user_id, &body.url).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

/// Sessions stored for a user after a refresh.
#[derive(Serialize)]
pub struct SessionsResponse {
    pub user_id: UserId,
    pub sessions: Vec<Session>,
}

async fn update_subscription(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(body): Json<FeedRequest>,
) -> Result<Json<SessionsResponse>> {
    let sessions = state
        .dispatcher
        .update_subscription(user_id, &body.url)
        .await?;
    Ok(Json(SessionsResponse { user_id, sessions }))
}

#[derive(Deserialize)]
pub struct NotificationsRequest {
    pub enabled: bool,
}

/// Stop or resume reminders.
async fn set_notifications(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
    Json(body): Json<NotificationsRequest>,
) -> Result<Json<User>> {
    let user = state
        .dispatcher
        .set_user_enabled(user_id, body.enabled)
        .await?;
    Ok(Json(user))
}

async fn refresh_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<UserId>,
) -> Result<Json<SessionsResponse>> {
    let sessions = state.dispatcher.refresh_single_user(user_id).await?;
    Ok(Json(SessionsResponse { user_id, sessions }))
}

// ─── Notifications ───────────────────────────────────────────

#[derive(Deserialize)]
pub struct DueQuery {
    pub hour: u32,
}

#[derive(Serialize)]
pub struct DueResponse {
    pub hour: u32,
    pub notifications: Vec<DueNotification>,
}

/// Sessions starting in the hour after `hour`.
async fn due_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DueQuery>,
) -> Result<Json<DueResponse>> {
    if query.hour > 23 {
        return Err(AppError::BadRequest(format!(
            "hour must be 0-23, got {}",
            query.hour
        )));
    }
    let notifications = state.dispatcher.due_notifications(query.hour)?;
    Ok(Json(DueResponse {
        hour: query.hour,
        notifications,
    }))
}
