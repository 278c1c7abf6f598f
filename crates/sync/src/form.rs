//! Editable job fields and their translation into validated request bodies.
//!
//! Validation runs entirely client-side, before any request is constructed:
//! a failed build has no side effects and sends nothing.

use cronview_protocol::{
    CronJobCreate, CronJobPatch, CronPayload, CronSchedule, IsolationConfig, SessionTarget,
    WakeMode,
};

use crate::{
    codec::parse_duration_ms,
    error::{Error, Result},
};

/// Prefix applied to isolated-run output posted back to the main session when
/// the user leaves the prefix field empty.
pub const DEFAULT_POST_TO_MAIN_PREFIX: &str = "[cron]";

/// Which schedule variant the editor has active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScheduleKind {
    At,
    #[default]
    Every,
    Cron,
}

/// Which payload variant the editor has active. Session target `isolated`
/// overrides this at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadKind {
    SystemEvent,
    #[default]
    AgentTurn,
}

/// The editable fields of a job, as bound to an editor form.
#[derive(Debug, Clone)]
pub struct JobForm {
    pub name: String,
    pub enabled: bool,
    pub session_target: SessionTarget,
    pub wake_mode: WakeMode,

    pub schedule_kind: ScheduleKind,
    /// Epoch millis for an `at` schedule.
    pub at_ms: Option<u64>,
    /// Duration literal for an `every` schedule, e.g. `"30m"`.
    pub every_text: String,
    pub cron_expr: String,
    pub cron_tz: String,

    pub payload_kind: PayloadKind,
    pub system_event_text: String,
    pub agent_message: String,
    pub agent_thinking: String,
    pub agent_timeout_seconds: Option<u64>,
    pub agent_deliver: bool,
    pub agent_channel: String,
    pub agent_to: String,
    pub agent_best_effort_deliver: bool,

    pub post_to_main: bool,
    pub post_to_main_prefix: String,

    /// True when the form edits an existing job rather than creating one.
    /// Controls whether disabling "post to main" emits an explicit clear.
    pub editing_existing: bool,
}

impl Default for JobForm {
    fn default() -> Self {
        Self {
            name: String::new(),
            enabled: true,
            session_target: SessionTarget::Isolated,
            wake_mode: WakeMode::NextHeartbeat,
            schedule_kind: ScheduleKind::Every,
            at_ms: None,
            every_text: String::new(),
            cron_expr: String::new(),
            cron_tz: String::new(),
            payload_kind: PayloadKind::AgentTurn,
            system_event_text: String::new(),
            agent_message: String::new(),
            agent_thinking: String::new(),
            agent_timeout_seconds: None,
            agent_deliver: false,
            agent_channel: String::new(),
            agent_to: String::new(),
            agent_best_effort_deliver: false,
            post_to_main: false,
            post_to_main_prefix: String::new(),
            editing_existing: false,
        }
    }
}

impl JobForm {
    /// Build a `cron.add` body. Fails with a validation error before any
    /// request is constructed.
    pub fn build_create(&self) -> Result<CronJobCreate> {
        let schedule = self.schedule()?;
        let payload = self.payload()?;
        Ok(CronJobCreate {
            name: non_empty(&self.name),
            enabled: self.enabled,
            schedule,
            session_target: self.session_target,
            wake_mode: self.wake_mode,
            payload,
            // A new job with "post to main" disabled omits the block entirely.
            isolation: self.post_to_main.then(|| self.isolation_block()),
        })
    }

    /// Build a `cron.update` patch carrying every editable field.
    pub fn build_patch(&self) -> Result<CronJobPatch> {
        let schedule = self.schedule()?;
        let payload = self.payload()?;
        Ok(CronJobPatch {
            name: non_empty(&self.name),
            enabled: Some(self.enabled),
            schedule: Some(schedule),
            session_target: Some(self.session_target),
            wake_mode: Some(self.wake_mode),
            payload: Some(payload),
            isolation: if self.post_to_main {
                Some(self.isolation_block())
            } else if self.editing_existing {
                // Explicit clear so the server drops a previously-set block.
                Some(IsolationConfig {
                    post_to_main: false,
                    post_to_main_prefix: None,
                })
            } else {
                None
            },
        })
    }

    fn schedule(&self) -> Result<CronSchedule> {
        match self.schedule_kind {
            ScheduleKind::At => {
                let at_ms = self
                    .at_ms
                    .ok_or_else(|| Error::validation("run-at time is required"))?;
                Ok(CronSchedule::At { at_ms })
            },
            ScheduleKind::Every => {
                let every_ms = parse_duration_ms(&self.every_text)
                    .map_err(|_| Error::validation("invalid every duration"))?;
                Ok(CronSchedule::Every {
                    every_ms,
                    anchor_ms: None,
                })
            },
            ScheduleKind::Cron => {
                let expr = self.cron_expr.trim();
                if expr.is_empty() {
                    return Err(Error::validation("cron expression is required"));
                }
                Ok(CronSchedule::Cron {
                    expr: expr.to_string(),
                    // An empty timezone is omitted, never sent as "".
                    tz: non_empty(&self.cron_tz),
                })
            },
        }
    }

    fn payload(&self) -> Result<CronPayload> {
        match self.effective_payload_kind() {
            PayloadKind::SystemEvent => {
                let text = self.system_event_text.trim();
                if text.is_empty() {
                    return Err(Error::validation("system event text is required"));
                }
                Ok(CronPayload::SystemEvent {
                    text: text.to_string(),
                })
            },
            PayloadKind::AgentTurn => {
                let message = self.agent_message.trim();
                if message.is_empty() {
                    return Err(Error::validation("agent message is required"));
                }
                Ok(CronPayload::AgentTurn {
                    message: message.to_string(),
                    thinking: non_empty(&self.agent_thinking),
                    timeout_seconds: self.agent_timeout_seconds,
                    deliver: self.agent_deliver.then_some(true),
                    channel: self.agent_deliver.then(|| non_empty(&self.agent_channel)).flatten(),
                    to: self.agent_deliver.then(|| non_empty(&self.agent_to)).flatten(),
                    best_effort_deliver: (self.agent_deliver && self.agent_best_effort_deliver)
                        .then_some(true),
                })
            },
        }
    }

    /// An isolated session cannot receive system events, so `isolated`
    /// forces the agent-turn payload regardless of the selected kind.
    fn effective_payload_kind(&self) -> PayloadKind {
        match self.session_target {
            SessionTarget::Isolated => PayloadKind::AgentTurn,
            SessionTarget::Main => self.payload_kind,
        }
    }

    fn isolation_block(&self) -> IsolationConfig {
        let prefix = self.post_to_main_prefix.trim();
        IsolationConfig {
            post_to_main: true,
            post_to_main_prefix: Some(if prefix.is_empty() {
                DEFAULT_POST_TO_MAIN_PREFIX.to_string()
            } else {
                prefix.to_string()
            }),
        }
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn agent_form() -> JobForm {
        JobForm {
            every_text: "10m".into(),
            agent_message: "check the mail".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_minimal_agent_turn() {
        let body = agent_form().build_create().unwrap();
        assert!(body.name.is_none());
        assert_eq!(body.schedule, CronSchedule::Every {
            every_ms: 600_000,
            anchor_ms: None,
        });
        match body.payload {
            CronPayload::AgentTurn {
                message,
                deliver,
                channel,
                best_effort_deliver,
                ..
            } => {
                assert_eq!(message, "check the mail");
                assert!(deliver.is_none());
                assert!(channel.is_none());
                assert!(best_effort_deliver.is_none());
            },
            other => panic!("expected agent turn, got {other:?}"),
        }
        assert!(body.isolation.is_none());
    }

    #[test]
    fn test_invalid_every_duration() {
        let form = JobForm {
            every_text: "10x".into(),
            ..agent_form()
        };
        let err = form.build_create().unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "invalid every duration");
    }

    #[test]
    fn test_cron_expression_required() {
        let form = JobForm {
            schedule_kind: ScheduleKind::Cron,
            cron_expr: "   ".into(),
            ..agent_form()
        };
        let err = form.build_create().unwrap_err();
        assert_eq!(err.to_string(), "cron expression is required");
    }

    #[test]
    fn test_empty_timezone_omitted() {
        let form = JobForm {
            schedule_kind: ScheduleKind::Cron,
            cron_expr: "0 9 * * *".into(),
            cron_tz: "  ".into(),
            ..agent_form()
        };
        let body = form.build_create().unwrap();
        assert_eq!(body.schedule, CronSchedule::Cron {
            expr: "0 9 * * *".into(),
            tz: None,
        });
    }

    #[test]
    fn test_isolated_forces_agent_turn() {
        let form = JobForm {
            session_target: SessionTarget::Isolated,
            payload_kind: PayloadKind::SystemEvent,
            system_event_text: "ignored".into(),
            ..agent_form()
        };
        let body = form.build_create().unwrap();
        assert!(matches!(body.payload, CronPayload::AgentTurn { .. }));
    }

    #[test]
    fn test_empty_agent_message_rejected() {
        let form = JobForm {
            agent_message: "   ".into(),
            ..agent_form()
        };
        let err = form.build_create().unwrap_err();
        assert_eq!(err.to_string(), "agent message is required");
    }

    #[test]
    fn test_system_event_text_required() {
        let form = JobForm {
            session_target: SessionTarget::Main,
            payload_kind: PayloadKind::SystemEvent,
            system_event_text: "".into(),
            ..agent_form()
        };
        let err = form.build_create().unwrap_err();
        assert_eq!(err.to_string(), "system event text is required");
    }

    #[test]
    fn test_deliver_gates_subfields() {
        let mut form = JobForm {
            agent_channel: "slack".into(),
            agent_to: "ops".into(),
            agent_best_effort_deliver: true,
            ..agent_form()
        };

        // deliver off: the dependent fields stay out of the body.
        let body = form.build_create().unwrap();
        match body.payload {
            CronPayload::AgentTurn {
                deliver,
                channel,
                to,
                best_effort_deliver,
                ..
            } => {
                assert!(deliver.is_none());
                assert!(channel.is_none());
                assert!(to.is_none());
                assert!(best_effort_deliver.is_none());
            },
            other => panic!("expected agent turn, got {other:?}"),
        }

        form.agent_deliver = true;
        let body = form.build_create().unwrap();
        match body.payload {
            CronPayload::AgentTurn {
                deliver,
                channel,
                to,
                best_effort_deliver,
                ..
            } => {
                assert_eq!(deliver, Some(true));
                assert_eq!(channel.as_deref(), Some("slack"));
                assert_eq!(to.as_deref(), Some("ops"));
                assert_eq!(best_effort_deliver, Some(true));
            },
            other => panic!("expected agent turn, got {other:?}"),
        }
    }

    #[test]
    fn test_isolation_prefix_defaults() {
        let form = JobForm {
            post_to_main: true,
            post_to_main_prefix: "  ".into(),
            ..agent_form()
        };
        let body = form.build_create().unwrap();
        let isolation = body.isolation.unwrap();
        assert!(isolation.post_to_main);
        assert_eq!(
            isolation.post_to_main_prefix.as_deref(),
            Some(DEFAULT_POST_TO_MAIN_PREFIX)
        );
    }

    #[test]
    fn test_patch_clears_isolation_when_editing() {
        let form = JobForm {
            editing_existing: true,
            post_to_main: false,
            ..agent_form()
        };
        let patch = form.build_patch().unwrap();
        let isolation = patch.isolation.unwrap();
        assert!(!isolation.post_to_main);
    }

    #[test]
    fn test_create_omits_isolation_when_disabled() {
        let body = agent_form().build_create().unwrap();
        assert!(body.isolation.is_none());
    }

    #[test]
    fn test_name_trimmed_and_optional() {
        let named = JobForm {
            name: "  morning digest  ".into(),
            ..agent_form()
        };
        let body = named.build_create().unwrap();
        assert_eq!(body.name.as_deref(), Some("morning digest"));

        let unnamed = JobForm {
            name: "   ".into(),
            ..agent_form()
        };
        assert!(unnamed.build_create().unwrap().name.is_none());
    }
}
