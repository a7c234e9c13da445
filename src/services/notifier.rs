// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Delivery of due reminders to the outside world.
//!
//! The chat transport lives elsewhere; this crate only hands each due
//! session to a [`Notifier`].

use crate::error::AppError;
use crate::models::{DueNotification, Session, UserId};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Receiver of due reminders.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, due: &DueNotification, minutes_before: u32) -> Result<(), AppError>;
}

/// Reminder text for a session starting in `minutes_before` minutes.
pub fn reminder_text(session: &Session, minutes_before: u32) -> String {
    format!(
        "Hey, you have a *{}* session of *{}* (*{}*) in {} minutes, don't forget to check in!",
        session.session_type, session.unit_title, session.unit_code, minutes_before
    )
}

/// Writes reminders to the log; used when no webhook is configured.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, due: &DueNotification, minutes_before: u32) -> Result<(), AppError> {
        tracing::info!(
            user_id = due.user_id,
            unit_code = %due.session.unit_code,
            start_hour = due.session.start_hour,
            text = %reminder_text(&due.session, minutes_before),
            "Reminder due"
        );
        Ok(())
    }
}

/// JSON body posted by [`WebhookNotifier`].
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub user_id: UserId,
    pub session: &'a Session,
    pub text: String,
}

/// Posts each reminder as JSON to a webhook (e.g. the chat bot).
#[derive(Clone)]
pub struct WebhookNotifier {
    http: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client init: {}", e)))?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, due: &DueNotification, minutes_before: u32) -> Result<(), AppError> {
        let payload = WebhookPayload {
            user_id: due.user_id,
            session: &due.session,
            text: reminder_text(&due.session, minutes_before),
        };

        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Internal(anyhow::anyhow!(
                "Webhook returned HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }
}
