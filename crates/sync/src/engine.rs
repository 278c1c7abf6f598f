//! The sync engine: canonical snapshot, poll loop, and the operation set.
//!
//! Three signals feed the same non-reentrant refresh path: a fixed-interval
//! poll (baseline that works even when the push channel is unhealthy), push
//! events collapsed through debounced triggers, and explicit user mutations.
//! Whichever loses a race is a no-op, never a queued duplicate.

use std::{
    future::Future,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior},
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use cronview_protocol::{
    CronJob, CronJobPatch, RunLogEntry, RunMode, SchedulerStatus, rpc::methods,
};

use crate::{
    debounce::DebouncedTrigger,
    error::{Error, Result},
    form::JobForm,
    gateway::CronGateway,
    reconcile::{EventReconciler, ReconcilerDelays},
};

/// Tunables for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Baseline poll interval for the job list.
    pub poll_interval: Duration,
    /// Debounce window for push-triggered job-list refreshes.
    pub jobs_debounce: Duration,
    /// Debounce window for push-triggered run-log refreshes.
    pub runs_debounce: Duration,
    /// Debounce window for gap-triggered refreshes. Defaults to
    /// `jobs_debounce`; lower it for faster gap recovery.
    pub gap_debounce: Duration,
    /// Deadline for ordinary RPC calls.
    pub rpc_timeout: Duration,
    /// Deadline for `cron.run`, which may cover a long remote execution.
    pub run_timeout: Duration,
    /// Entries fetched per run-log refresh.
    pub runs_limit: usize,
    /// Whether disabled jobs are included in list fetches.
    pub include_disabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            jobs_debounce: Duration::from_millis(250),
            runs_debounce: Duration::from_millis(200),
            gap_debounce: Duration::from_millis(250),
            rpc_timeout: Duration::from_secs(10),
            run_timeout: Duration::from_secs(20),
            runs_limit: 50,
            include_disabled: true,
        }
    }
}

/// Immutable view of the cached state, published to observers on every
/// change. Collections are replaced outright by refreshes, never merged.
#[derive(Debug, Clone, Default)]
pub struct CronSnapshot {
    pub jobs: Vec<CronJob>,
    pub selected_job_id: Option<String>,
    /// Run log for the selected job; cleared when the selection changes.
    pub runs: Vec<RunLogEntry>,
    pub scheduler: Option<SchedulerStatus>,
    pub jobs_loading: bool,
    pub runs_loading: bool,
    pub last_error: Option<String>,
    /// Informational message, e.g. "no jobs yet".
    pub info: Option<String>,
}

struct Background {
    jobs_trigger: Arc<DebouncedTrigger>,
    runs_trigger: Arc<DebouncedTrigger>,
    poll: JoinHandle<()>,
    subscription: JoinHandle<()>,
}

/// The synchronization engine. One instance per gateway connection; a
/// stopped engine stays stopped.
pub struct SyncEngine {
    gateway: Arc<dyn CronGateway>,
    config: SyncConfig,
    snapshot: watch::Sender<CronSnapshot>,
    jobs_busy: AtomicBool,
    runs_busy: AtomicBool,
    /// Cancelled exactly once, by `stop()`. Completion handlers re-check it
    /// before touching the snapshot so in-flight work cannot mutate state
    /// after `stop()` returns.
    cancel: CancellationToken,
    background: Mutex<Option<Background>>,
}

impl SyncEngine {
    pub fn new(gateway: Arc<dyn CronGateway>, config: SyncConfig) -> Arc<Self> {
        let (snapshot, _) = watch::channel(CronSnapshot::default());
        Arc::new(Self {
            gateway,
            config,
            snapshot,
            jobs_busy: AtomicBool::new(false),
            runs_busy: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            background: Mutex::new(None),
        })
    }

    /// Observe snapshot changes. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> watch::Receiver<CronSnapshot> {
        self.snapshot.subscribe()
    }

    /// Current snapshot, cloned.
    #[must_use]
    pub fn snapshot(&self) -> CronSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Launch the poll loop and the push subscription. Idempotent: a second
    /// call (or a call after `stop()`) is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut background = self.lock_background();
        if background.is_some() || self.cancel.is_cancelled() {
            debug!("sync engine already started or stopped");
            return;
        }

        let jobs_trigger = {
            let weak = Arc::downgrade(self);
            DebouncedTrigger::new(move || {
                if let Some(engine) = weak.upgrade() {
                    tokio::spawn(async move { engine.refresh_jobs().await });
                }
            })
        };
        let runs_trigger = {
            let weak = Arc::downgrade(self);
            DebouncedTrigger::new(move || {
                if let Some(engine) = weak.upgrade() {
                    tokio::spawn(async move {
                        let selected = engine.snapshot.borrow().selected_job_id.clone();
                        if let Some(id) = selected {
                            engine.refresh_runs(&id, engine.config.runs_limit).await;
                        }
                    });
                }
            })
        };

        let reconciler = EventReconciler::new(
            Arc::clone(&jobs_trigger),
            Arc::clone(&runs_trigger),
            ReconcilerDelays {
                jobs: self.config.jobs_debounce,
                runs: self.config.runs_debounce,
                gap: self.config.gap_debounce,
            },
            self.snapshot.subscribe(),
        );
        let subscription =
            tokio::spawn(reconciler.run(self.gateway.subscribe(), self.cancel.clone()));

        let engine = Arc::clone(self);
        let cancel = self.cancel.clone();
        let poll = tokio::spawn(async move { engine.poll_loop(cancel).await });

        *background = Some(Background {
            jobs_trigger,
            runs_trigger,
            poll,
            subscription,
        });
        info!("cron sync started");
    }

    /// Cancel the poll loop, the subscription, and any pending debounce
    /// timers. No snapshot mutation is observable after this returns;
    /// in-flight RPCs may complete but their results are discarded.
    pub fn stop(&self) {
        self.cancel.cancel();
        let Some(background) = self.lock_background().take() else {
            return;
        };
        background.jobs_trigger.cancel_all();
        background.runs_trigger.cancel_all();
        background.poll.abort();
        background.subscription.abort();
        info!("cron sync stopped");
    }

    /// Fetch the job list and scheduler status, replacing the cached copies.
    /// Non-reentrant: a call while another is in flight returns immediately.
    pub async fn refresh_jobs(&self) {
        let Some(active) = self.guard() else { return };
        if self.jobs_busy.swap(true, Ordering::AcqRel) {
            debug!("job refresh already in flight");
            return;
        }
        self.mutate(|s| s.jobs_loading = true);

        // Status is best-effort and independent: its failure must not abort
        // the list fetch, and vice versa.
        let (list, status) = tokio::join!(
            self.call(
                methods::LIST,
                self.config.rpc_timeout,
                self.gateway.list(self.config.include_disabled),
            ),
            self.call(
                methods::STATUS,
                self.config.rpc_timeout,
                self.gateway.status(),
            ),
        );

        if let Err(e) = &list {
            warn!(error = %e, "job refresh failed");
        }
        if let Err(e) = &status {
            debug!(error = %e, "scheduler status fetch failed");
        }

        if !active.is_cancelled() {
            self.mutate(|s| {
                s.jobs_loading = false;
                if let Ok(scheduler) = status {
                    s.scheduler = Some(scheduler);
                }
                match list {
                    Ok(jobs) => {
                        s.info = jobs.is_empty().then(|| "no jobs yet".to_string());
                        s.jobs = jobs;
                        s.last_error = None;
                    },
                    Err(e) => s.last_error = Some(e.to_string()),
                }
            });
        }
        self.jobs_busy.store(false, Ordering::Release);
    }

    /// Fetch the run log for `job_id`, replacing the cached entries. Uses a
    /// guard independent from `refresh_jobs`. Entries for a job that is no
    /// longer selected by the time the response arrives are discarded.
    pub async fn refresh_runs(&self, job_id: &str, limit: usize) {
        let Some(active) = self.guard() else { return };
        if self.runs_busy.swap(true, Ordering::AcqRel) {
            debug!("run-log refresh already in flight");
            return;
        }
        self.mutate(|s| s.runs_loading = true);

        let result = self
            .call(
                methods::RUNS,
                self.config.rpc_timeout,
                self.gateway.runs(job_id, limit),
            )
            .await;

        if let Err(e) = &result {
            warn!(job_id, error = %e, "run-log refresh failed");
        }

        if !active.is_cancelled() {
            self.mutate(|s| {
                s.runs_loading = false;
                match result {
                    Ok(entries) if s.selected_job_id.as_deref() == Some(job_id) => {
                        s.runs = entries;
                        s.last_error = None;
                    },
                    Ok(_) => {}, // selection changed mid-flight
                    Err(e) => s.last_error = Some(e.to_string()),
                }
            });
        }
        self.runs_busy.store(false, Ordering::Release);
    }

    /// Ask the gateway to run a job now. Uses the extended deadline. Does
    /// not refresh: completion arrives as a push event.
    pub async fn run_job(&self, id: &str, force: bool) {
        let Some(active) = self.guard() else { return };
        let mode = if force { RunMode::Force } else { RunMode::Due };
        let result = self
            .call(
                methods::RUN,
                self.config.run_timeout,
                self.gateway.run(id, mode),
            )
            .await;
        if let Err(e) = result {
            warn!(id, error = %e, "run request failed");
            if !active.is_cancelled() {
                self.mutate(|s| s.last_error = Some(e.to_string()));
            }
        }
    }

    /// Remove a job, then refresh unconditionally. Removing the selected job
    /// clears the selection and the run log.
    pub async fn remove_job(&self, id: &str) {
        let Some(active) = self.guard() else { return };
        let result = self
            .call(
                methods::REMOVE,
                self.config.rpc_timeout,
                self.gateway.remove(id),
            )
            .await;
        if !active.is_cancelled() {
            match result {
                Ok(()) => {
                    info!(id, "cron job removed");
                    self.mutate(|s| {
                        if s.selected_job_id.as_deref() == Some(id) {
                            s.selected_job_id = None;
                            s.runs.clear();
                        }
                    });
                },
                Err(e) => {
                    warn!(id, error = %e, "remove request failed");
                    self.mutate(|s| s.last_error = Some(e.to_string()));
                },
            }
        }
        self.refresh_jobs().await;
    }

    /// Enable or disable a job, then refresh.
    pub async fn set_enabled(&self, id: &str, enabled: bool) {
        let Some(active) = self.guard() else { return };
        let patch = CronJobPatch {
            enabled: Some(enabled),
            ..Default::default()
        };
        let result = self
            .call(
                methods::UPDATE,
                self.config.rpc_timeout,
                self.gateway.update(id, patch),
            )
            .await;
        if let Err(e) = result {
            warn!(id, enabled, error = %e, "enable toggle failed");
            if !active.is_cancelled() {
                self.mutate(|s| s.last_error = Some(e.to_string()));
            }
        }
        self.refresh_jobs().await;
    }

    /// Create (`id` absent) or update (`id` present) a job from the form,
    /// then refresh. Unlike the other mutations, validation and transport
    /// failures propagate to the caller so the editor can surface them
    /// inline. A validation failure sends nothing.
    pub async fn upsert_job(&self, id: Option<&str>, form: &JobForm) -> Result<()> {
        if self.guard().is_none() {
            return Err(Error::Closed);
        }
        match id {
            Some(id) => {
                let patch = form.build_patch()?;
                self.call(
                    methods::UPDATE,
                    self.config.rpc_timeout,
                    self.gateway.update(id, patch),
                )
                .await?;
                info!(id, "cron job updated");
            },
            None => {
                let create = form.build_create()?;
                self.call(methods::ADD, self.config.rpc_timeout, self.gateway.add(create))
                    .await?;
                info!("cron job created");
            },
        }
        self.refresh_jobs().await;
        Ok(())
    }

    /// Change the selected job. Switching selection clears the run log; the
    /// caller follows up with `refresh_runs` when a job is selected.
    pub fn select_job(&self, id: Option<String>) {
        self.mutate(|s| {
            if s.selected_job_id != id {
                s.runs.clear();
            }
            s.selected_job_id = id;
        });
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn poll_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => self.refresh_jobs().await,
            }
        }
        debug!("poll loop exited");
    }

    /// Wrap an RPC future with its deadline. Timeouts surface like any other
    /// transport failure.
    async fn call<T>(
        &self,
        method: &'static str,
        deadline: Duration,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::timeout(method)),
        }
    }

    /// `Some(token)` while the engine may still mutate the snapshot.
    fn guard(&self) -> Option<CancellationToken> {
        (!self.cancel.is_cancelled()).then(|| self.cancel.clone())
    }

    fn mutate(&self, f: impl FnOnce(&mut CronSnapshot)) {
        self.snapshot.send_modify(f);
    }

    fn lock_background(&self) -> std::sync::MutexGuard<'_, Option<Background>> {
        self.background
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
