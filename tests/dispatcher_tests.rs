// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Refresh cycle, fallback and subscription flow tests.

use checkin_notifier::error::AppError;
use checkin_notifier::models::User;
use checkin_notifier::services::{FetchMode, RefreshPhase};

mod common;
use common::{
    calendar, event, single_session_calendar, test_harness, timetable_description, TestHarness,
};

const URL_1: &str = "https://timetable.example.ac.uk/feed/1.ics";
const URL_2: &str = "https://timetable.example.ac.uk/feed/2.ics";
const URL_3: &str = "https://timetable.example.ac.uk/feed/3.ics";

/// Register users straight in the database, bypassing feed validation.
fn add_users(h: &TestHarness, users: &[(i64, &str)]) {
    for (id, url) in users {
        h.db.upsert_user(&User::new(*id, *url)).unwrap();
    }
}

// ─── Fleet Refresh ───────────────────────────────────────────

#[tokio::test]
async fn test_refresh_all_stores_every_users_sessions() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1), (2, URL_2)]);
    h.client.serve(URL_1, single_session_calendar("CS101", 9));
    h.client.serve(URL_2, single_session_calendar("MA201", 10));

    let report = h.dispatcher.refresh_all(FetchMode::Network).await.unwrap();

    assert_eq!(report.passes, 1);
    assert_eq!(report.mode, FetchMode::Network);
    assert!(!report.used_fallback());
    assert_eq!(report.users_dispatched, 2);
    assert_eq!(report.sessions, 4);
    assert_eq!(h.dispatcher.courses().all().unwrap().len(), 4);
    assert_eq!(h.dispatcher.phase(), RefreshPhase::Persisted);

    // Both downloads were cached.
    assert!(h.dispatcher.feed().has_cached(1).await);
    assert!(h.dispatcher.feed().has_cached(2).await);
}

#[tokio::test]
async fn test_fetch_failure_matches_pure_local_cycle() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1), (2, URL_2), (3, URL_3)]);
    h.client.serve(URL_1, single_session_calendar("CS101", 9));
    h.client.serve(URL_2, single_session_calendar("MA201", 10));
    h.client.serve(URL_3, single_session_calendar("PH301", 11));
    h.dispatcher.refresh_all(FetchMode::Network).await.unwrap();

    // Next morning's feeds change, but user 2's download breaks.
    h.client.serve(URL_1, single_session_calendar("CS102", 12));
    h.client.fail(URL_2);
    h.client.serve(URL_3, single_session_calendar("PH302", 13));

    let report = h.dispatcher.refresh_all(FetchMode::Network).await.unwrap();
    assert_eq!(report.passes, 2);
    assert_eq!(report.mode, FetchMode::ForceLocal);
    assert_eq!(report.fetch_failures, vec![2]);
    assert!(report.missing_calendars.is_empty());
    let after_fallback = h.dispatcher.courses().all().unwrap();

    let requests = h.client.request_count();
    h.dispatcher
        .refresh_all(FetchMode::ForceLocal)
        .await
        .unwrap();
    assert_eq!(h.client.request_count(), requests);
    assert_eq!(h.dispatcher.courses().all().unwrap(), after_fallback);

    // User 2 keeps the sessions from their last good calendar.
    assert!(after_fallback
        .iter()
        .any(|s| s.user_id == 2 && s.unit_code == "MA201"));
}

#[tokio::test]
async fn test_fallback_without_cache_reports_missing_calendar() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1), (2, URL_2)]);
    h.client.serve(URL_1, single_session_calendar("CS101", 9));
    h.client.fail(URL_2);

    let report = h.dispatcher.refresh_all(FetchMode::Network).await.unwrap();

    assert_eq!(report.passes, 2);
    assert_eq!(report.missing_calendars, vec![2]);
    let sessions = h.dispatcher.courses().all().unwrap();
    assert!(!sessions.is_empty());
    assert!(sessions.iter().all(|s| s.user_id == 1));
}

#[tokio::test]
async fn test_prefer_local_skips_download_when_cached() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1)]);
    h.client.serve(URL_1, single_session_calendar("CS101", 9));
    h.dispatcher.refresh_all(FetchMode::Network).await.unwrap();
    assert_eq!(h.client.request_count(), 1);

    h.client.fail(URL_1);
    let report = h
        .dispatcher
        .refresh_all(FetchMode::PreferLocal)
        .await
        .unwrap();

    assert_eq!(h.client.request_count(), 1);
    assert_eq!(report.passes, 1);
    assert_eq!(report.sessions, 2);
}

#[tokio::test]
async fn test_disabled_users_are_skipped() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1), (2, URL_2)]);
    let mut stopped = User::new(2, URL_2);
    stopped.notifications_enabled = false;
    h.db.upsert_user(&stopped).unwrap();
    h.client.serve(URL_1, single_session_calendar("CS101", 9));
    h.client.serve(URL_2, single_session_calendar("MA201", 10));

    let report = h.dispatcher.refresh_all(FetchMode::Network).await.unwrap();

    assert_eq!(report.users_skipped, 1);
    assert_eq!(h.client.request_count(), 1);
    assert_eq!(h.dispatcher.courses().count_for_user(2).unwrap(), 0);
}

#[tokio::test]
async fn test_unparseable_calendar_is_isolated() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1), (2, URL_2)]);
    h.client.serve(URL_1, single_session_calendar("CS101", 9));
    h.client
        .serve(URL_2, "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:cut-off\r\n");

    let report = h.dispatcher.refresh_all(FetchMode::Network).await.unwrap();

    assert_eq!(report.passes, 1);
    assert_eq!(report.parse_failures, vec![2]);
    assert_eq!(h.dispatcher.courses().count_for_user(1).unwrap(), 2);
}

#[tokio::test]
async fn test_login_page_keeps_last_good_calendar() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1), (2, URL_2)]);
    h.client.serve(URL_1, single_session_calendar("CS101", 9));
    h.client.serve(URL_2, single_session_calendar("MA201", 10));
    h.dispatcher.refresh_all(FetchMode::Network).await.unwrap();

    // The timetable server answers 200 with a sign-in page.
    h.client
        .serve(URL_2, "<!DOCTYPE html><html><body>Sign in</body></html>");
    let report = h.dispatcher.refresh_all(FetchMode::Network).await.unwrap();

    assert_eq!(report.passes, 2);
    assert_eq!(report.fetch_failures, vec![2]);
    assert!(report.parse_failures.is_empty());
    assert_eq!(h.dispatcher.courses().count_for_user(2).unwrap(), 2);
    let cached = h.dispatcher.feed().load_cached(2).await.unwrap();
    assert!(cached.starts_with("BEGIN:VCALENDAR"));
}

#[tokio::test]
async fn test_refresh_single_user_rejects_login_page() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1)]);
    h.dispatcher.users().reload().unwrap();
    h.client.serve(URL_1, "<html>Session expired</html>");

    let err = h.dispatcher.refresh_single_user(1).await.unwrap_err();

    assert!(matches!(err, AppError::Fetch(_)));
    assert!(!h.dispatcher.feed().has_cached(1).await);
}

#[tokio::test]
async fn test_refresh_all_runs_on_spawned_task() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1), (2, URL_2)]);
    h.client.serve(URL_1, single_session_calendar("CS101", 9));
    h.client.serve(URL_2, single_session_calendar("MA201", 10));

    let dispatcher = h.dispatcher.clone();
    let report = tokio::spawn(async move { dispatcher.refresh_all(FetchMode::Network).await })
        .await
        .unwrap()
        .unwrap();

    assert_eq!(report.sessions, 4);
}

#[tokio::test]
async fn test_user_without_sessions_today_is_counted() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1)]);
    h.client.serve(URL_1, calendar(&[]));

    let report = h.dispatcher.refresh_all(FetchMode::Network).await.unwrap();

    assert_eq!(report.users_without_sessions, 1);
    assert_eq!(report.users_dispatched, 0);
    assert!(h.dispatcher.courses().all().unwrap().is_empty());
}

// ─── Single-User Refresh ─────────────────────────────────────

#[tokio::test]
async fn test_refresh_single_user_is_idempotent() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1)]);
    h.dispatcher.users().reload().unwrap();
    h.client.serve(URL_1, single_session_calendar("CS101", 9));

    let first = h.dispatcher.refresh_single_user(1).await.unwrap();
    let stored_first = h.dispatcher.courses().all().unwrap();
    let second = h.dispatcher.refresh_single_user(1).await.unwrap();
    let stored_second = h.dispatcher.courses().all().unwrap();

    assert_eq!(first, second);
    assert_eq!(stored_first, stored_second);
    assert_eq!(stored_second.len(), 2);
}

#[tokio::test]
async fn test_refresh_single_user_does_not_touch_others() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1), (2, URL_2)]);
    h.client.serve(URL_1, single_session_calendar("CS101", 9));
    h.client.serve(URL_2, single_session_calendar("MA201", 10));
    h.dispatcher.refresh_all(FetchMode::Network).await.unwrap();

    h.client.serve(URL_1, single_session_calendar("CS999", 15));
    h.dispatcher.refresh_single_user(1).await.unwrap();

    let sessions = h.dispatcher.courses().all().unwrap();
    assert!(sessions.iter().any(|s| s.unit_code == "CS999"));
    assert!(!sessions.iter().any(|s| s.unit_code == "CS101"));
    assert_eq!(h.dispatcher.courses().count_for_user(2).unwrap(), 2);
}

#[tokio::test]
async fn test_refresh_single_user_propagates_fetch_error() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1)]);
    h.dispatcher.users().reload().unwrap();
    h.client.fail(URL_1);

    let err = h.dispatcher.refresh_single_user(1).await.unwrap_err();
    assert!(matches!(err, AppError::Fetch(_)));

    let err = h.dispatcher.refresh_single_user(99).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

// ─── Due Notifications ───────────────────────────────────────

#[tokio::test]
async fn test_due_notifications_outside_window_is_empty() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1)]);
    h.client.serve(URL_1, single_session_calendar("CS101", 3));
    h.dispatcher.refresh_all(FetchMode::Network).await.unwrap();

    assert!(h.dispatcher.due_notifications(2).unwrap().is_empty());
    assert!(h.dispatcher.due_notifications(22).unwrap().is_empty());
}

#[tokio::test]
async fn test_due_notifications_look_one_hour_ahead() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1), (2, URL_2)]);
    h.client.serve(URL_1, single_session_calendar("CS101", 9));
    h.client.serve(URL_2, single_session_calendar("MA201", 10));
    h.dispatcher.refresh_all(FetchMode::Network).await.unwrap();

    let due = h.dispatcher.due_notifications(8).unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].user_id, 1);
    assert_eq!(due[0].session.unit_code, "CS101");
    assert_eq!(due[0].session.start_hour, 9);
}

#[tokio::test]
async fn test_due_notifications_skip_stopped_users() {
    let h = test_harness();
    add_users(&h, &[(1, URL_1), (2, URL_2)]);
    h.client.serve(URL_1, single_session_calendar("CS101", 9));
    h.client.serve(URL_2, single_session_calendar("MA201", 9));
    h.dispatcher.refresh_all(FetchMode::Network).await.unwrap();

    h.dispatcher.set_user_enabled(2, false).await.unwrap();

    let due = h.dispatcher.due_notifications(8).unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].user_id, 1);
}

// ─── Subscription Flows ──────────────────────────────────────

#[tokio::test]
async fn test_setup_user_creates_and_dispatches() {
    let h = test_harness();
    h.client.serve(URL_1, single_session_calendar("CS101", 9));

    let outcome = h.dispatcher.setup_user(1, URL_1).await.unwrap();

    assert!(outcome.created);
    assert!(outcome.user.notifications_enabled);
    assert_eq!(outcome.sessions.len(), 2);
    assert_eq!(h.dispatcher.courses().count_for_user(1).unwrap(), 2);
    assert!(h.dispatcher.feed().has_cached(1).await);
    assert!(h.dispatcher.users().is_enabled(1));
    assert_eq!(h.db.load_users().unwrap().len(), 1);
}

#[tokio::test]
async fn test_setup_existing_user_replaces_subscription() {
    let h = test_harness();
    h.client.serve(URL_1, single_session_calendar("CS101", 9));
    h.client.serve(URL_2, single_session_calendar("MA201", 14));
    h.dispatcher.setup_user(1, URL_1).await.unwrap();
    h.dispatcher.set_user_enabled(1, false).await.unwrap();

    let outcome = h.dispatcher.setup_user(1, URL_2).await.unwrap();

    assert!(!outcome.created);
    assert!(outcome.user.notifications_enabled);
    assert_eq!(outcome.user.subscription_url, URL_2);
    let sessions = h.dispatcher.courses().all().unwrap();
    assert!(sessions.iter().all(|s| s.unit_code == "MA201"));
}

#[tokio::test]
async fn test_setup_rejects_invalid_feed() {
    let h = test_harness();
    h.client.serve(
        URL_1,
        calendar(&[event(
            "only",
            9,
            10,
            &timetable_description("CS101", "Intro", "Lecture"),
        )]),
    );

    let err = h.dispatcher.setup_user(1, URL_1).await.unwrap_err();

    assert!(matches!(err, AppError::InvalidFeed(_)));
    assert!(!h.dispatcher.users().contains(1));
    assert!(!h.dispatcher.feed().has_cached(1).await);
}

#[tokio::test]
async fn test_validate_feed_url_stores_nothing() {
    let h = test_harness();
    h.client.serve(URL_1, single_session_calendar("CS101", 9));

    let validated = h.dispatcher.validate_feed_url(URL_1).await.unwrap();

    assert_eq!(validated.sample_unit_code, "CS101");
    assert!(h.db.load_users().unwrap().is_empty());
    assert!(std::fs::read_dir(h.cache_dir.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn test_validate_feed_url_reports_fetch_failure() {
    let h = test_harness();
    h.client.fail(URL_1);

    let err = h.dispatcher.validate_feed_url(URL_1).await.unwrap_err();
    assert!(matches!(err, AppError::Fetch(_)));
}

#[tokio::test]
async fn test_update_subscription_requires_existing_user() {
    let h = test_harness();
    h.client.serve(URL_1, single_session_calendar("CS101", 9));

    let err = h
        .dispatcher
        .update_subscription(1, URL_1)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(h.client.request_count(), 0);
}

#[tokio::test]
async fn test_update_subscription_replaces_sessions() {
    let h = test_harness();
    h.client.serve(URL_1, single_session_calendar("CS101", 9));
    h.client.serve(URL_2, single_session_calendar("MA201", 14));
    h.dispatcher.setup_user(1, URL_1).await.unwrap();

    let sessions = h.dispatcher.update_subscription(1, URL_2).await.unwrap();

    assert!(sessions.iter().all(|s| s.unit_code == "MA201"));
    assert_eq!(h.dispatcher.users().get(1).unwrap().subscription_url, URL_2);
    assert_eq!(h.dispatcher.courses().all().unwrap(), sessions);
}

#[tokio::test]
async fn test_resume_refreshes_user_without_sessions() {
    let h = test_harness();
    let mut stopped = User::new(1, URL_1);
    stopped.notifications_enabled = false;
    h.db.upsert_user(&stopped).unwrap();
    h.dispatcher.users().reload().unwrap();
    h.client.serve(URL_1, single_session_calendar("CS101", 9));

    let user = h.dispatcher.set_user_enabled(1, true).await.unwrap();

    assert!(user.notifications_enabled);
    assert_eq!(h.dispatcher.courses().count_for_user(1).unwrap(), 2);
    assert_eq!(h.client.request_count(), 1);
}

#[tokio::test]
async fn test_resume_with_sessions_skips_download() {
    let h = test_harness();
    h.client.serve(URL_1, single_session_calendar("CS101", 9));
    h.dispatcher.setup_user(1, URL_1).await.unwrap();
    h.dispatcher.set_user_enabled(1, false).await.unwrap();
    let requests = h.client.request_count();

    h.dispatcher.set_user_enabled(1, true).await.unwrap();

    assert_eq!(h.client.request_count(), requests);
}

#[tokio::test]
async fn test_set_enabled_unknown_user() {
    let h = test_harness();
    let err = h.dispatcher.set_user_enabled(5, false).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}
