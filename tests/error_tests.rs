// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::http::StatusCode;
use axum::response::IntoResponse;
use checkin_notifier::error::AppError;

#[test]
fn test_is_feed_error_matches() {
    assert!(AppError::Fetch("timed out".to_string()).is_feed_error());
    assert!(AppError::Parse("garbage".to_string()).is_feed_error());
    assert!(AppError::InvalidFeed("one component".to_string()).is_feed_error());
}

#[test]
fn test_is_feed_error_no_match() {
    assert!(!AppError::NotFound("User 1".to_string()).is_feed_error());
    assert!(!AppError::Database("locked".to_string()).is_feed_error());
    assert!(!AppError::Unauthorized.is_feed_error());
}

#[test]
fn test_status_codes() {
    let cases = [
        (AppError::Unauthorized, StatusCode::UNAUTHORIZED),
        (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
        (AppError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
        (AppError::Fetch("x".into()), StatusCode::BAD_GATEWAY),
        (AppError::Parse("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
        (AppError::InvalidFeed("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
        (AppError::Database("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        (
            AppError::Internal(anyhow::anyhow!("x")),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];

    for (err, status) in cases {
        assert_eq!(err.into_response().status(), status);
    }
}
