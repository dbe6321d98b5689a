//! History model types and uptime math.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::monitor::Status;

/// One durably recorded status transition. Append-only, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRecord {
    pub id: i64,
    pub address: String,
    pub from_status: Status,
    pub to_status: Status,
    pub occurred_at: DateTime<Utc>,
}

/// Total seconds spent Down across an ordered record sequence.
///
/// Each record that enters Down contributes until the next record, or until
/// `range_end` when the final Down episode is still open. Records must be
/// ordered by `occurred_at`, as returned by the store's range query.
pub fn down_seconds(records: &[TransitionRecord], range_end: DateTime<Utc>) -> i64 {
    let mut total = 0;
    for (i, record) in records.iter().enumerate() {
        if record.to_status != Status::Down {
            continue;
        }
        let episode_end = records
            .get(i + 1)
            .map(|next| next.occurred_at)
            .unwrap_or(range_end);
        total += (episode_end - record.occurred_at).num_seconds().max(0);
    }
    total
}

/// Uptime percentage over a range, derived from [`down_seconds`].
///
/// Time before the first in-range record is counted as up; an empty range
/// reports 100%.
pub fn uptime_percent(
    records: &[TransitionRecord],
    range_start: DateTime<Utc>,
    range_end: DateTime<Utc>,
) -> f64 {
    let total = (range_end - range_start).num_seconds();
    if total <= 0 {
        return 100.0;
    }
    let down = down_seconds(records, range_end).min(total);
    (total - down) as f64 * 100.0 / total as f64
}
