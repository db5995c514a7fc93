//! Core data models used throughout the warehouse pipeline.
//!
//! These types represent the uploaded messages, the sessions cut from them,
//! and the enriched records that flow into the dimensional store. Field names
//! follow the JSON contract shared with the enrichment collaborator.

use serde::{Deserialize, Serialize};

/// One chat message as it appears in an upload.
///
/// Fields default to empty strings so that a structurally valid but
/// incomplete message can be reported as a format error rather than a
/// parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub sender_name: String,
    /// ISO-8601 timestamp with offset, kept verbatim.
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub content: String,
}

/// The parsed body of one uploaded document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawUpload {
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// A run of messages with no inactivity gap above the threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub start_time: String,
    pub end_time: String,
    pub message_count: usize,
    pub messages: Vec<Message>,
}

/// Response-time metrics computed by the collaborator, in minutes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    #[serde(default)]
    pub avg_response_time_minutes: f64,
    #[serde(default)]
    pub max_response_time_minutes: f64,
}

/// Session bounds echoed back by the collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMeta {
    #[serde(default)]
    pub start_time: String,
    #[serde(default)]
    pub end_time: String,
    #[serde(default, rename = "msg_count")]
    pub message_count: usize,
}

/// A session after analysis by the enrichment collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedSession {
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub customer_type: String,
    #[serde(default)]
    pub outcome: String,
    #[serde(default)]
    pub outcome_reason: String,
    #[serde(default)]
    pub rep_quality: String,
    #[serde(default)]
    pub risk_flag: String,
    #[serde(default)]
    pub risk_evidence: String,
    #[serde(default)]
    pub metrics: SessionMetrics,
    #[serde(default)]
    pub meta: SessionMeta,
}

impl EnrichedSession {
    /// Tie a collaborator result back to the session it was produced for.
    ///
    /// The session id always comes from the input; `meta` fields the
    /// collaborator left blank are filled from the session bounds.
    /// Returns `false` when the collaborator reported a different id.
    pub fn reconcile(&mut self, session: &Session) -> bool {
        let matched = self.session_id.is_empty() || self.session_id == session.session_id;
        self.session_id = session.session_id.clone();

        if self.meta.start_time.is_empty() {
            self.meta.start_time = session.start_time.clone();
        }
        if self.meta.end_time.is_empty() {
            self.meta.end_time = session.end_time.clone();
        }
        if self.meta.message_count == 0 {
            self.meta.message_count = session.message_count;
        }
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            session_id: "sess_20240101T000000_1".to_string(),
            start_time: "2024-01-01T08:00:00+07:00".to_string(),
            end_time: "2024-01-01T09:00:00+07:00".to_string(),
            message_count: 2,
            messages: Vec::new(),
        }
    }

    #[test]
    fn test_enriched_session_wire_names() {
        let json = r#"{
            "session_id": "s1",
            "customer_type": "new",
            "outcome": "won",
            "metrics": {"avg_response_time_minutes": 2.5, "max_response_time_minutes": 9},
            "meta": {"start_time": "a", "end_time": "b", "msg_count": 4}
        }"#;
        let parsed: EnrichedSession = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.customer_type, "new");
        assert_eq!(parsed.rep_quality, "");
        assert_eq!(parsed.metrics.max_response_time_minutes, 9.0);
        assert_eq!(parsed.meta.message_count, 4);
    }

    #[test]
    fn test_reconcile_backfills_meta() {
        let mut enriched = EnrichedSession::default();
        assert!(enriched.reconcile(&session()));
        assert_eq!(enriched.session_id, "sess_20240101T000000_1");
        assert_eq!(enriched.meta.start_time, "2024-01-01T08:00:00+07:00");
        assert_eq!(enriched.meta.message_count, 2);
    }

    #[test]
    fn test_reconcile_overrides_foreign_id() {
        let mut enriched = EnrichedSession {
            session_id: "something-else".to_string(),
            meta: SessionMeta {
                start_time: "kept".to_string(),
                end_time: "kept".to_string(),
                message_count: 7,
            },
            ..Default::default()
        };
        assert!(!enriched.reconcile(&session()));
        assert_eq!(enriched.session_id, "sess_20240101T000000_1");
        assert_eq!(enriched.meta.start_time, "kept");
        assert_eq!(enriched.meta.message_count, 7);
    }
}
