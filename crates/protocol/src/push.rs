//! Push-channel messages as seen by the sync engine.

use serde::{Deserialize, Serialize};

/// Event name used by the gateway for cron notifications.
pub const CRON_EVENT: &str = "cron";

/// What a cron event reports about a job. Unknown actions decode as
/// [`CronEventAction::Other`] so new server-side actions still trigger a
/// refresh instead of being dropped as noise.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CronEventAction {
    Started,
    Finished,
    Error,
    Updated,
    Removed,
    #[serde(other)]
    Other,
}

impl CronEventAction {
    /// True for actions that mark the end of a run.
    #[must_use]
    pub fn is_completion(self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

/// Decoded payload of a `cron` event frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CronEvent {
    pub job_id: String,
    pub action: CronEventAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at_ms: Option<u64>,
}

/// One message from the ordered push channel: either a domain event or a
/// marker that the channel skipped (messages were dropped or reordered).
#[derive(Debug, Clone, PartialEq)]
pub enum PushMessage {
    /// A server-push event, payload still undecoded.
    Event {
        event: String,
        payload: Option<serde_json::Value>,
    },
    /// Sequence gap: incremental assumptions are no longer valid.
    Gap,
}

impl PushMessage {
    /// Decode the cron payload of this message, if it is a well-formed cron
    /// event. Non-cron events and undecodable payloads yield `None`.
    #[must_use]
    pub fn cron_event(&self) -> Option<CronEvent> {
        match self {
            Self::Event { event, payload } if event == CRON_EVENT => payload
                .as_ref()
                .and_then(|p| serde_json::from_value(p.clone()).ok()),
            _ => None,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn cron_message(payload: serde_json::Value) -> PushMessage {
        PushMessage::Event {
            event: CRON_EVENT.into(),
            payload: Some(payload),
        }
    }

    #[test]
    fn test_decode_cron_event() {
        let msg = cron_message(serde_json::json!({ "jobId": "j1", "action": "finished" }));
        let ev = msg.cron_event().unwrap();
        assert_eq!(ev.job_id, "j1");
        assert!(ev.action.is_completion());
    }

    #[test]
    fn test_unknown_action_decodes_as_other() {
        let msg = cron_message(serde_json::json!({ "jobId": "j1", "action": "rescheduled" }));
        let ev = msg.cron_event().unwrap();
        assert_eq!(ev.action, CronEventAction::Other);
        assert!(!ev.action.is_completion());
    }

    #[test]
    fn test_malformed_payload_yields_none() {
        let msg = cron_message(serde_json::json!({ "action": "finished" }));
        assert!(msg.cron_event().is_none());
    }

    #[test]
    fn test_non_cron_event_yields_none() {
        let msg = PushMessage::Event {
            event: "tick".into(),
            payload: Some(serde_json::json!({ "ts": 1 })),
        };
        assert!(msg.cron_event().is_none());
    }
}
