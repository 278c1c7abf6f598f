//! The RPC + push-subscription boundary the engine talks through.

use std::pin::Pin;

use {async_trait::async_trait, futures::Stream};

use cronview_protocol::{
    CronJob, CronJobCreate, CronJobPatch, PushMessage, RunLogEntry, RunMode, SchedulerStatus,
};

use crate::error::Result;

/// Ordered, cancellable sequence of push messages. Ends only when the
/// subscription is dropped or the connection closes.
pub type PushStream = Pin<Box<dyn Stream<Item = PushMessage> + Send>>;

/// The gateway's cron surface. Implementations own transport concerns
/// (framing, correlation, connection state); timeouts are applied by the
/// caller.
#[async_trait]
pub trait CronGateway: Send + Sync {
    async fn status(&self) -> Result<SchedulerStatus>;

    async fn list(&self, include_disabled: bool) -> Result<Vec<CronJob>>;

    async fn runs(&self, id: &str, limit: usize) -> Result<Vec<RunLogEntry>>;

    async fn run(&self, id: &str, mode: RunMode) -> Result<()>;

    async fn remove(&self, id: &str) -> Result<()>;

    async fn update(&self, id: &str, patch: CronJobPatch) -> Result<()>;

    async fn add(&self, create: CronJobCreate) -> Result<()>;

    /// Subscribe to the push channel. Each call returns an independent
    /// stream starting at the current position.
    fn subscribe(&self) -> PushStream;
}
