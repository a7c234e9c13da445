// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use checkin_notifier::config::Config;
use checkin_notifier::db::SqliteDb;
use checkin_notifier::error::AppError;
use checkin_notifier::routes::create_router;
use checkin_notifier::services::{CalendarFeed, FeedClient, NotifyDispatcher};
use checkin_notifier::time_utils::FixedClock;
use checkin_notifier::AppState;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Date every fixture is built around.
#[allow(dead_code)]
pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
}

#[allow(dead_code)]
pub fn at(hour: u32, minute: u32) -> NaiveDateTime {
    today().and_hms_opt(hour, minute, 0).unwrap()
}

/// In-memory feed transport keyed by URL.
#[derive(Default)]
pub struct StubFeedClient {
    responses: Mutex<HashMap<String, Result<String, String>>>,
    requests: AtomicUsize,
}

#[allow(dead_code)]
impl StubFeedClient {
    pub fn serve(&self, url: &str, document: impl Into<String>) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(document.into()));
    }

    pub fn fail(&self, url: &str) {
        self.responses
            .lock()
            .unwrap()
            .insert(url.to_string(), Err("connection reset".to_string()));
    }

    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedClient for StubFeedClient {
    async fn get(&self, url: &str) -> Result<String, AppError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        match self.responses.lock().unwrap().get(url) {
            Some(Ok(document)) => Ok(document.clone()),
            Some(Err(reason)) => Err(AppError::Fetch(reason.clone())),
            None => Err(AppError::Fetch(format!("HTTP 404 Not Found from {}", url))),
        }
    }
}

/// One VEVENT for [`calendar`].
pub struct IcsEvent {
    pub uid: String,
    pub start: String,
    pub end: Option<String>,
    pub description: Option<String>,
}

/// Timed event on the fixture date, `HH:00` to `HH:00`.
#[allow(dead_code)]
pub fn event(uid: &str, start_hour: u32, end_hour: u32, description: &str) -> IcsEvent {
    IcsEvent {
        uid: uid.to_string(),
        start: format!("20261016T{:02}0000", start_hour),
        end: Some(format!("20261016T{:02}0000", end_hour)),
        description: Some(description.to_string()),
    }
}

/// Description in the timetable's `Key: value` layout.
#[allow(dead_code)]
pub fn timetable_description(code: &str, title: &str, kind: &str) -> String {
    format!(
        "Unit Code: {}\nUnit Description: {}\nEvent type: {}",
        code, title, kind
    )
}

/// Serialize events into an iCalendar document (descriptions escaped).
#[allow(dead_code)]
pub fn calendar(events: &[IcsEvent]) -> String {
    let mut out =
        String::from("BEGIN:VCALENDAR\r\nVERSION:2.0\r\nPRODID:-//Test//Timetable//EN\r\n");
    for e in events {
        out.push_str("BEGIN:VEVENT\r\n");
        out.push_str(&format!("UID:{}\r\n", e.uid));
        if e.start.contains('T') {
            out.push_str(&format!("DTSTART:{}\r\n", e.start));
        } else {
            out.push_str(&format!("DTSTART;VALUE=DATE:{}\r\n", e.start));
        }
        if let Some(end) = &e.end {
            out.push_str(&format!("DTEND:{}\r\n", end));
        }
        if let Some(description) = &e.description {
            out.push_str(&format!(
                "DESCRIPTION:{}\r\n",
                description.replace('\n', "\\n")
            ));
        }
        out.push_str("END:VEVENT\r\n");
    }
    out.push_str("END:VCALENDAR\r\n");
    out
}

/// Simple one-session timetable for a user.
#[allow(dead_code)]
pub fn single_session_calendar(code: &str, start_hour: u32) -> String {
    calendar(&[
        event(
            &format!("{}-1", code),
            start_hour,
            start_hour + 1,
            &timetable_description(code, "Some Unit", "Lecture"),
        ),
        event(
            &format!("{}-2", code),
            start_hour + 2,
            start_hour + 3,
            &timetable_description(code, "Some Unit", "Tutorial"),
        ),
    ])
}

/// Dispatcher wired to a stub transport, an in-memory database, a temp
/// cache directory and a clock fixed on the fixture date.
pub struct TestHarness {
    pub config: Config,
    pub db: SqliteDb,
    pub client: Arc<StubFeedClient>,
    pub dispatcher: Arc<NotifyDispatcher>,
    pub cache_dir: TempDir,
}

#[allow(dead_code)]
pub fn test_harness() -> TestHarness {
    test_harness_at(at(8, 50))
}

#[allow(dead_code)]
pub fn test_harness_at(now: NaiveDateTime) -> TestHarness {
    let cache_dir = tempfile::tempdir().unwrap();
    let mut config = Config::test_default();
    config.ical_cache_dir = cache_dir.path().to_path_buf();

    let db = SqliteDb::in_memory().unwrap();
    let client = Arc::new(StubFeedClient::default());
    let feed = CalendarFeed::new(client.clone(), cache_dir.path());
    let dispatcher = Arc::new(NotifyDispatcher::new(
        db.clone(),
        feed,
        Arc::new(FixedClock(now)),
        &config,
    ));

    TestHarness {
        config,
        db,
        client,
        dispatcher,
        cache_dir,
    }
}

/// Create a test app around a fresh harness.
/// Returns the router and the harness.
#[allow(dead_code)]
pub fn create_test_app() -> (axum::Router, TestHarness) {
    let harness = test_harness();
    let state = Arc::new(AppState {
        config: harness.config.clone(),
        dispatcher: harness.dispatcher.clone(),
    });
    (create_router(state), harness)
}
