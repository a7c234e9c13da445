// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod course_store;
pub mod dispatcher;
pub mod extractor;
pub mod feed;
pub mod notifier;
pub mod scheduler;
pub mod user_store;

pub use course_store::CourseStore;
pub use dispatcher::{FetchMode, NotifyDispatcher, RefreshPhase, RefreshReport};
pub use extractor::SessionExtractor;
pub use feed::{CalendarFeed, FeedClient, HttpFeedClient};
pub use notifier::{LogNotifier, Notifier, WebhookNotifier};
pub use scheduler::Scheduler;
pub use user_store::UserStore;
