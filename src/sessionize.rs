//! Inactivity-gap session segmentation.
//!
//! Messages are ordered by timestamp, redacted, and cut into sessions
//! wherever two consecutive parseable timestamps are further apart than the
//! configured gap. Session ids share a batch-wide time prefix and carry a
//! 1-based ordinal in emission order, e.g. `sess_20240501T101500_3`.

use chrono::{DateTime, Duration, Utc};

use crate::models::{Message, Session};
use crate::redact::redact;

/// Parse an ISO-8601 / RFC 3339 timestamp with offset (`Z` included).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Batch-scoped prefix shared by every session id cut from one upload.
pub fn session_prefix(batch_started: DateTime<Utc>) -> String {
    format!("sess_{}", batch_started.format("%Y%m%dT%H%M%S"))
}

/// Split `messages` into sessions separated by gaps longer than `gap`.
///
/// Messages whose timestamp cannot be parsed still land in the current
/// session but do not move the gap reference point, and never bound a
/// session unless it has no parseable timestamp at all. Unparseable
/// timestamps sort ahead of all parseable ones; ties keep input order.
///
/// An empty input yields no sessions. Uploads with zero messages are
/// rejected earlier by [`crate::upload::validate_upload`].
pub fn sessionize(
    messages: Vec<Message>,
    gap: Duration,
    batch_started: DateTime<Utc>,
) -> Vec<Session> {
    let mut keyed: Vec<(Option<DateTime<Utc>>, Message)> = messages
        .into_iter()
        .map(|m| (parse_timestamp(&m.timestamp), m))
        .collect();
    // Vec::sort_by_key is stable
    keyed.sort_by_key(|(ts, _)| *ts);

    let mut groups: Vec<Vec<Message>> = Vec::new();
    let mut current: Vec<Message> = Vec::new();
    let mut last_seen: Option<DateTime<Utc>> = None;

    for (ts, mut message) in keyed {
        message.content = redact(&message.content);

        if let (Some(cur), Some(last)) = (ts, last_seen) {
            if cur - last > gap && !current.is_empty() {
                groups.push(std::mem::take(&mut current));
            }
        }

        current.push(message);
        if ts.is_some() {
            last_seen = ts;
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }

    let prefix = session_prefix(batch_started);
    groups
        .into_iter()
        .enumerate()
        .map(|(i, msgs)| {
            let (start_time, end_time) = bounds(&msgs);
            Session {
                session_id: format!("{}_{}", prefix, i + 1),
                start_time,
                end_time,
                message_count: msgs.len(),
                messages: msgs,
            }
        })
        .collect()
}

/// First and last parseable timestamps of a sorted group, as written.
fn bounds(msgs: &[Message]) -> (String, String) {
    let parseable = |m: &&Message| parse_timestamp(&m.timestamp).is_some();
    let first = msgs.iter().find(parseable).or_else(|| msgs.first());
    let last = msgs.iter().rev().find(parseable).or_else(|| msgs.last());
    let raw = |m: Option<&Message>| m.map(|m| m.timestamp.clone()).unwrap_or_default();
    (raw(first), raw(last))
}
