//! Maps the push stream onto debounced refresh triggers.

use std::{sync::Arc, time::Duration};

use {
    futures::StreamExt,
    tokio::sync::watch,
    tokio_util::sync::CancellationToken,
    tracing::{debug, trace},
};

use cronview_protocol::PushMessage;

use crate::{debounce::DebouncedTrigger, engine::CronSnapshot, gateway::PushStream};

/// Debounce windows for the two trigger classes. A sequence gap routes
/// through the job-list trigger like any domain event; its window is
/// separately tunable.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerDelays {
    pub jobs: Duration,
    pub runs: Duration,
    pub gap: Duration,
}

/// Consumes the ordered push stream and drives the refresh triggers.
///
/// A malformed cron payload is noise, not an error: the next poll tick or a
/// later well-formed event resynchronizes state, so it is dropped silently.
pub struct EventReconciler {
    jobs_trigger: Arc<DebouncedTrigger>,
    runs_trigger: Arc<DebouncedTrigger>,
    delays: ReconcilerDelays,
    snapshot: watch::Receiver<CronSnapshot>,
}

impl EventReconciler {
    pub fn new(
        jobs_trigger: Arc<DebouncedTrigger>,
        runs_trigger: Arc<DebouncedTrigger>,
        delays: ReconcilerDelays,
        snapshot: watch::Receiver<CronSnapshot>,
    ) -> Self {
        Self {
            jobs_trigger,
            runs_trigger,
            delays,
            snapshot,
        }
    }

    /// Classify one message and schedule zero or more triggers.
    pub fn handle(&self, message: &PushMessage) {
        match message {
            PushMessage::Gap => {
                // The client can no longer trust that it saw every relevant
                // event; fall back to a full resynchronization.
                debug!("push sequence gap; scheduling full job refresh");
                self.jobs_trigger.schedule(self.delays.gap);
            },
            PushMessage::Event { event, .. } => {
                let Some(cron) = message.cron_event() else {
                    trace!(event, "ignoring non-cron or undecodable push event");
                    return;
                };
                self.jobs_trigger.schedule(self.delays.jobs);

                let selected = self.snapshot.borrow().selected_job_id.clone();
                if cron.action.is_completion() && selected.as_deref() == Some(cron.job_id.as_str())
                {
                    self.runs_trigger.schedule(self.delays.runs);
                }
            },
        }
    }

    /// Drive the stream until cancellation or end-of-stream. A single
    /// malformed message never terminates the loop.
    pub async fn run(self, mut stream: PushStream, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("push subscription cancelled");
                    break;
                },
                message = stream.next() => match message {
                    Some(message) => self.handle(&message),
                    None => {
                        debug!("push stream ended");
                        break;
                    },
                },
            }
        }
    }
}
