// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Timetable extraction from iCalendar documents.
//!
//! University timetable feeds carry the interesting bits in the free-text
//! `DESCRIPTION` of each event, one `Key: value` pair per line. The key names
//! drift between feed versions, so each logical field is looked up through an
//! ordered list of aliases and falls back to a sentinel when none is present.

use crate::error::AppError;
use crate::models::{Session, UserId};
use crate::services::feed::looks_like_calendar;
use chrono::{NaiveDate, NaiveDateTime, TimeZone, Timelike};
use chrono_tz::Tz;
use icalendar::parser::{read_calendar, unfold, Component};
use icalendar::{CalendarDateTime, DatePerhapsTime};
use std::collections::HashMap;

/// A field the extractor pulls out of an event description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalField {
    UnitCode,
    UnitDescription,
    EventType,
}

impl LogicalField {
    pub const ALL: [LogicalField; 3] = [
        LogicalField::UnitCode,
        LogicalField::UnitDescription,
        LogicalField::EventType,
    ];

    /// Description keys accepted for this field, most preferred first.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            LogicalField::UnitCode => &["Unit Code", "Code"],
            LogicalField::UnitDescription => &["Unit Description", "Description"],
            LogicalField::EventType => &["Event type"],
        }
    }

    /// Value used when no alias is present.
    pub fn sentinel(self) -> &'static str {
        match self {
            LogicalField::UnitCode => "UNKNOWN",
            LogicalField::UnitDescription => "Unknown",
            LogicalField::EventType => "Unknown type",
        }
    }
}

/// Outcome of resolving one logical field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldLookup<'a> {
    /// `alias` was present in the description with `value`.
    Found { alias: &'static str, value: &'a str },
    /// No alias matched; the field's sentinel applies.
    UsingSentinel(&'static str),
}

impl<'a> FieldLookup<'a> {
    pub fn value(&self) -> &'a str {
        match self {
            FieldLookup::Found { value, .. } => *value,
            FieldLookup::UsingSentinel(sentinel) => *sentinel,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, FieldLookup::Found { .. })
    }
}

/// Resolve `field` against parsed description pairs, trying aliases in order.
pub fn resolve_field<'a>(
    pairs: &HashMap<&'a str, &'a str>,
    field: LogicalField,
) -> FieldLookup<'a> {
    field
        .aliases()
        .iter()
        .find_map(|alias| {
            pairs
                .get(alias)
                .map(|value| FieldLookup::Found {
                    alias: *alias,
                    value: *value,
                })
        })
        .unwrap_or(FieldLookup::UsingSentinel(field.sentinel()))
}

/// Split a description into `key: value` pairs.
///
/// Only lines with exactly one colon count; both sides are trimmed.
pub fn parse_description(text: &str) -> HashMap<&str, &str> {
    text.lines()
        .filter(|line| line.matches(':').count() == 1)
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Undo RFC 5545 TEXT escaping (`\n`, `\,`, `\;`, `\\`).
pub fn unescape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

/// A feed that passed the structural timetable check.
#[derive(Debug, Clone)]
pub struct ValidatedCalendar {
    /// Raw document, ready to be cached
    pub document: String,
    /// Number of top-level calendar sub-components
    pub component_count: usize,
    /// Unit code of the sample event
    pub sample_unit_code: String,
    /// Unit description of the sample event
    pub sample_unit_title: String,
    /// Event type of the sample event
    pub sample_session_type: String,
}

/// Turns raw calendar documents into today's sessions.
#[derive(Debug, Clone, Copy)]
pub struct SessionExtractor {
    tz: Tz,
}

impl SessionExtractor {
    /// Extractor reporting hours in the `tz` timezone.
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    /// Sessions in `document` that start on `today`, owned by `owner`.
    ///
    /// Fails only when the document as a whole cannot be parsed; a broken
    /// event is skipped and missing description keys fall back to sentinels.
    pub fn extract(
        &self,
        document: &str,
        today: NaiveDate,
        owner: UserId,
    ) -> Result<Vec<Session>, AppError> {
        let unfolded = parse_precheck(document)?;
        let calendar = read_calendar(&unfolded).map_err(AppError::Parse)?;

        let mut sessions = Vec::new();
        for event in calendar.components.iter().filter(|c| c.name == "VEVENT") {
            let Some(start) = self.event_time(event, "DTSTART") else {
                tracing::warn!(
                    user_id = owner,
                    uid = %event_uid(event),
                    "Skipping event without a timed DTSTART"
                );
                continue;
            };
            if start.date() != today {
                continue;
            }
            let end = self.event_time(event, "DTEND").unwrap_or(start);

            let description = event_description(event).unwrap_or_default();
            let pairs = parse_description(&description);

            let [unit_code, unit_title, session_type] = LogicalField::ALL.map(|field| {
                let lookup = resolve_field(&pairs, field);
                if !lookup.is_found() {
                    tracing::warn!(
                        user_id = owner,
                        uid = %event_uid(event),
                        field = ?field,
                        aliases = ?field.aliases(),
                        "Description is missing a timetable field, using sentinel"
                    );
                }
                lookup.value().to_string()
            });

            sessions.push(Session {
                unit_code,
                unit_title,
                session_type,
                start_hour: start.hour(),
                end_hour: end.hour(),
                user_id: owner,
            });
        }

        Ok(sessions)
    }

    /// Check that `document` looks like a timetable feed.
    ///
    /// Requires at least two calendar sub-components, and the second one's
    /// description must resolve every logical field.
    pub fn validate(&self, document: String) -> Result<ValidatedCalendar, AppError> {
        let invalid = |reason: &str| AppError::InvalidFeed(reason.to_string());

        let unfolded =
            parse_precheck(&document).map_err(|_| invalid("not an iCalendar document"))?;
        let calendar =
            read_calendar(&unfolded).map_err(|_| invalid("calendar could not be parsed"))?;

        let component_count = calendar.components.len();
        if component_count < 2 {
            return Err(invalid("calendar has fewer than two components"));
        }

        let description = event_description(&calendar.components[1])
            .ok_or_else(|| invalid("sample event has no description"))?;
        let pairs = parse_description(&description);

        let [unit_code, unit_title, session_type] =
            LogicalField::ALL.map(|field| resolve_field(&pairs, field));
        let lookups = [&unit_code, &unit_title, &session_type];
        for (field, lookup) in LogicalField::ALL.iter().zip(lookups) {
            if !lookup.is_found() {
                return Err(AppError::InvalidFeed(format!(
                    "sample event description lacks {:?}",
                    field
                )));
            }
        }

        let (sample_unit_code, sample_unit_title, sample_session_type) = (
            unit_code.value().to_string(),
            unit_title.value().to_string(),
            session_type.value().to_string(),
        );

        Ok(ValidatedCalendar {
            document,
            component_count,
            sample_unit_code,
            sample_unit_title,
            sample_session_type,
        })
    }

    /// Local date-time of a DTSTART/DTEND property; all-day values yield None.
    fn event_time(&self, event: &Component<'_>, prop: &str) -> Option<NaiveDateTime> {
        let value = DatePerhapsTime::try_from(event.find_prop(prop)?).ok()?;
        match value {
            DatePerhapsTime::Date(_) => None,
            DatePerhapsTime::DateTime(CalendarDateTime::Utc(dt)) => {
                Some(dt.with_timezone(&self.tz).naive_local())
            }
            DatePerhapsTime::DateTime(CalendarDateTime::Floating(naive)) => Some(naive),
            DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
                let converted = tzid.parse::<Tz>().ok().and_then(|source| {
                    source
                        .from_local_datetime(&date_time)
                        .earliest()
                        .map(|dt| dt.with_timezone(&self.tz).naive_local())
                });
                // Unknown TZIDs are read as local wall-clock time.
                Some(converted.unwrap_or(date_time))
            }
        }
    }
}

/// Unfold a document after checking it is wrapped in a VCALENDAR.
fn parse_precheck(document: &str) -> Result<String, AppError> {
    if !looks_like_calendar(document) {
        return Err(AppError::Parse(
            "document does not start with BEGIN:VCALENDAR".to_string(),
        ));
    }
    Ok(unfold(document.trim_start_matches('\u{feff}').trim_start()))
}

fn event_description(event: &Component<'_>) -> Option<String> {
    event
        .find_prop("DESCRIPTION")
        .map(|p| unescape_text(p.val.as_ref()))
}

fn event_uid(event: &Component<'_>) -> String {
    event
        .find_prop("UID")
        .map(|p| p.val.to_string())
        .unwrap_or_default()
}
