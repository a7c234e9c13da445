// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Task routes for externally triggered maintenance jobs.
//!
//! The in-process scheduler already runs the daily refresh; these endpoints
//! let an operator or cron job force one.

use crate::error::Result;
use crate::services::dispatcher::{FetchMode, RefreshReport};
use crate::AppState;
use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use std::sync::Arc;

/// Task routes (require the bearer token).
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/tasks/refresh-all", post(refresh_all))
}

/// Optional body for a forced fleet refresh.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RefreshAllRequest {
    pub use_local_fallback: bool,
    pub force_local: bool,
}

/// Rebuild today's sessions for every enabled user.
async fn refresh_all(
    State(state): State<Arc<AppState>>,
    body: Option<Json<RefreshAllRequest>>,
) -> Result<Json<RefreshReport>> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let mode = FetchMode::from_flags(request.use_local_fallback, request.force_local);
    tracing::info!(mode = ?mode, "Fleet refresh requested");

    let report = state.dispatcher.refresh_all(mode).await?;
    Ok(Json(report))
}
