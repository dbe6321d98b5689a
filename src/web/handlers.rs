//! HTTP request handlers.
//!
//! Everything here is read-only: handlers observe controller state and the
//! history store, and never drive probes or transitions.

use super::AppState;
use crate::db::{down_seconds, uptime_percent, TransitionRecord};
use crate::monitor::Status;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Templates (simple string replacement, no template engine)
// ============================================================================

const LAYOUT_TEMPLATE: &str = include_str!("templates/layout.html");
const DASHBOARD_TEMPLATE: &str = include_str!("templates/dashboard.html");
const HISTORY_TEMPLATE: &str = include_str!("templates/history.html");

// ============================================================================
// Dashboard
// ============================================================================

pub async fn handle_dashboard(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    let day_ago = now - ChronoDuration::hours(24);
    let snapshots = state.registry.snapshot();

    let rows: String = snapshots
        .iter()
        .map(|snap| {
            let (class, label) = match snap.status {
                Status::Up => ("online", "ONLINE"),
                Status::Down => ("offline", "OFFLINE"),
                Status::Unknown => ("unknown", "UNKNOWN"),
            };
            let age = format_age((now - snap.status_since).num_seconds());
            let uptime = state
                .store
                .transitions_between(&snap.address, day_ago, now)
                .map(|records| format!("{:.2}%", uptime_percent(&records, day_ago, now)))
                .unwrap_or_else(|_| "n/a".to_string());

            format!(
                "<tr><td><a href=\"/history?address={addr}\">{addr}</a></td>\
                 <td class=\"{class}\">{label}</td><td>{since}</td><td>{age}</td>\
                 <td>{uptime}</td><td>{alerted}</td></tr>",
                addr = snap.address,
                class = class,
                label = label,
                since = snap.status_since.format("%Y-%m-%d %H:%M:%S"),
                age = age,
                uptime = uptime,
                alerted = if snap.alerted { "yes" } else { "" },
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let transition_count = state.store.transition_count().unwrap_or(0);

    let content = DASHBOARD_TEMPLATE
        .replace("{{status_rows}}", &rows)
        .replace("{{controller_count}}", &snapshots.len().to_string())
        .replace("{{transition_count}}", &transition_count.to_string());

    let page = LAYOUT_TEMPLATE
        .replace("{{title}}", "hidwatch - Controller Status")
        .replace("{{content}}", &content);

    Html(page)
}

// ============================================================================
// API: current status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct StatusEntry {
    pub status: Status,
    pub status_since: DateTime<Utc>,
    pub seconds_in_status: i64,
    pub alerted: bool,
}

pub async fn handle_status_api(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    let statuses: BTreeMap<String, StatusEntry> = state
        .registry
        .snapshot()
        .into_iter()
        .map(|snap| {
            (
                snap.address,
                StatusEntry {
                    status: snap.status,
                    status_since: snap.status_since,
                    seconds_in_status: (now - snap.status_since).num_seconds().max(0),
                    alerted: snap.alerted,
                },
            )
        })
        .collect();

    Json(statuses)
}

// ============================================================================
// API: transition history
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub address: String,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub address: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub records: Vec<TransitionRecord>,
    pub down_seconds: i64,
    pub uptime_percent: f64,
}

fn parse_range(query: &HistoryQuery) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = query
        .end
        .as_ref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let start = query
        .start
        .as_ref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| end - ChronoDuration::hours(24));

    (start, end)
}

pub async fn handle_history_api(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let (start, end) = parse_range(&query);

    let records = match state.store.transitions_between(&query.address, start, end) {
        Ok(r) => r,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let down = down_seconds(&records, end);
    let uptime = uptime_percent(&records, start, end);

    Json(HistoryResponse {
        address: query.address,
        start,
        end,
        records,
        down_seconds: down,
        uptime_percent: uptime,
    })
    .into_response()
}

// ============================================================================
// Pages
// ============================================================================

pub async fn handle_history_page(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let (start, end) = parse_range(&query);

    let records = match state.store.transitions_between(&query.address, start, end) {
        Ok(r) => r,
        Err(e) => {
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let rows: String = records
        .iter()
        .map(|r| {
            let class = match r.to_status {
                Status::Up => "online",
                Status::Down => "offline",
                Status::Unknown => "unknown",
            };
            format!(
                "<tr><td>{}</td><td>{}</td><td class=\"{}\">{}</td></tr>",
                r.occurred_at.format("%Y-%m-%d %H:%M:%S"),
                r.from_status,
                class,
                r.to_status,
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let content = HISTORY_TEMPLATE
        .replace("{{address}}", &query.address)
        .replace("{{range_start}}", &start.format("%Y-%m-%d %H:%M").to_string())
        .replace("{{range_end}}", &end.format("%Y-%m-%d %H:%M").to_string())
        .replace("{{down_seconds}}", &down_seconds(&records, end).to_string())
        .replace(
            "{{uptime_percent}}",
            &format!("{:.2}", uptime_percent(&records, start, end)),
        )
        .replace("{{history_rows}}", &rows);

    let page = LAYOUT_TEMPLATE
        .replace("{{title}}", &format!("History - {}", query.address))
        .replace("{{content}}", &content);

    Html(page).into_response()
}

// ============================================================================
// Static assets
// ============================================================================

pub async fn handle_favicon() -> impl IntoResponse {
    let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100">
        <rect x="10" y="10" width="80" height="80" rx="12" fill="#1a7f37"/>
        <circle cx="50" cy="50" r="18" fill="white"/>
    </svg>"##;

    (
        [(axum::http::header::CONTENT_TYPE, "image/svg+xml")],
        svg,
    )
}

fn format_age(mut secs: i64) -> String {
    if secs < 0 {
        secs = 0;
    }
    if secs >= 86400 {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    } else if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(5), "5s");
        assert_eq!(format_age(125), "2m 5s");
        assert_eq!(format_age(3700), "1h 1m");
        assert_eq!(format_age(90000), "1d 1h");
        assert_eq!(format_age(-3), "0s");
    }
}
