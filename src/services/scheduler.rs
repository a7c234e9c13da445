// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Periodic triggers: the daily fleet refresh and the hourly reminder check.

use crate::config::Config;
use crate::services::dispatcher::{FetchMode, NotifyDispatcher};
use crate::services::notifier::Notifier;
use crate::time_utils::Clock;
use chrono::{NaiveDateTime, NaiveTime, Timelike};
use std::sync::Arc;
use std::time::Duration;

/// How often the wall clock is sampled.
const TICK_INTERVAL: Duration = Duration::from_secs(15);

/// What a single tick did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub refresh_started: bool,
    pub notifications_sent: usize,
}

/// Minute-granularity trigger loop.
pub struct Scheduler {
    dispatcher: Arc<NotifyDispatcher>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    daily_refresh_at: NaiveTime,
    notify_minute: u32,
    /// Last minute acted upon, so each minute fires at most once.
    last_minute: Option<NaiveDateTime>,
}

impl Scheduler {
    pub fn new(
        dispatcher: Arc<NotifyDispatcher>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: &Config,
    ) -> Self {
        Self {
            dispatcher,
            notifier,
            clock,
            daily_refresh_at: config.daily_refresh_at,
            notify_minute: config.notify_minute,
            last_minute: None,
        }
    }

    /// Minutes between the reminder check and the start of the next hour.
    pub fn minutes_before(&self) -> u32 {
        60 - self.notify_minute
    }

    /// Run forever, sampling the clock every few seconds.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(
            daily_refresh_at = %self.daily_refresh_at,
            notify_minute = self.notify_minute,
            "Scheduler started"
        );

        loop {
            interval.tick().await;
            let now = self.clock.now();
            self.tick(now).await;
        }
    }

    /// Act on `now` if this minute has not been handled yet.
    pub async fn tick(&mut self, now: NaiveDateTime) -> TickOutcome {
        let minute = now
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now);
        if self.last_minute == Some(minute) {
            return TickOutcome::default();
        }
        self.last_minute = Some(minute);

        let mut outcome = TickOutcome::default();

        if now.hour() == self.daily_refresh_at.hour()
            && now.minute() == self.daily_refresh_at.minute()
        {
            // Runs detached so a slow fleet refresh never delays reminders.
            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                if let Err(e) = dispatcher.refresh_all(FetchMode::Network).await {
                    tracing::error!(error = %e, "Daily refresh failed");
                }
            });
            outcome.refresh_started = true;
        }

        if now.minute() == self.notify_minute {
            outcome.notifications_sent = self.send_due(now.hour()).await;
        }

        outcome
    }

    /// Send reminders for sessions starting after `hour`; returns the count sent.
    pub async fn send_due(&self, hour: u32) -> usize {
        let due = match self.dispatcher.due_notifications(hour) {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(hour, error = %e, "Failed to look up due sessions");
                return 0;
            }
        };

        let minutes_before = self.minutes_before();
        let mut sent = 0;
        for notification in &due {
            match self.notifier.notify(notification, minutes_before).await {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!(
                    user_id = notification.user_id,
                    error = %e,
                    "Failed to deliver reminder"
                ),
            }
        }

        if !due.is_empty() {
            tracing::info!(hour, due = due.len(), sent, "Reminders dispatched");
        }
        sent
    }
}
