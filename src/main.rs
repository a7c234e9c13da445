// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Checkin-Notifier API Server
//!
//! Refreshes timetable feeds every morning and sends check-in reminders
//! shortly before each session.

use checkin_notifier::{
    config::Config,
    db::SqliteDb,
    services::{
        CalendarFeed, FetchMode, HttpFeedClient, LogNotifier, Notifier, NotifyDispatcher,
        Scheduler, WebhookNotifier,
    },
    time_utils::{Clock, SystemClock},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured JSON logging
    init_logging()?;

    // Load configuration from environment
    let config = Config::from_env()?;
    tracing::info!(
        port = config.port,
        timezone = %config.timezone,
        "Starting Checkin-Notifier"
    );

    // Open the session store
    let db = SqliteDb::open(&config.database_path)?;
    tracing::info!(path = %config.database_path.display(), "Database opened");

    let client = Arc::new(HttpFeedClient::new(config.fetch_timeout)?);
    let feed = CalendarFeed::new(client, config.ical_cache_dir.clone());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(config.timezone));

    let dispatcher = Arc::new(NotifyDispatcher::new(db, feed, clock.clone(), &config));
    let users = dispatcher.users().reload()?;
    tracing::info!(count = users.len(), "Users loaded");

    // Rebuild today's sessions from whatever is cached so a restart does not
    // wait for the morning refresh.
    match dispatcher.refresh_all(FetchMode::PreferLocal).await {
        Ok(report) => tracing::info!(
            sessions = report.sessions,
            passes = report.passes,
            "Startup refresh complete"
        ),
        Err(e) => tracing::error!(error = %e, "Startup refresh failed"),
    }

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => {
            tracing::info!(url = %url, "Delivering reminders via webhook");
            Arc::new(WebhookNotifier::new(url.clone(), config.fetch_timeout)?)
        }
        None => {
            tracing::info!("No webhook configured, reminders will be logged");
            Arc::new(LogNotifier)
        }
    };

    let scheduler = Scheduler::new(dispatcher.clone(), notifier, clock, &config);
    tokio::spawn(scheduler.run());

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        dispatcher,
    });

    // Build router
    let app = checkin_notifier::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

/// Initialize structured JSON logging.
fn init_logging() -> anyhow::Result<()> {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("checkin_notifier=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .with(format)
        .init();
    Ok(())
}
