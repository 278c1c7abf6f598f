//! Typed parameter and response bodies for the cron RPC methods.

use serde::{Deserialize, Serialize};

use crate::jobs::{CronJob, CronJobPatch, RunLogEntry};

/// RPC method names exposed by the gateway.
pub mod methods {
    pub const STATUS: &str = "cron.status";
    pub const LIST: &str = "cron.list";
    pub const RUNS: &str = "cron.runs";
    pub const RUN: &str = "cron.run";
    pub const REMOVE: &str = "cron.remove";
    pub const UPDATE: &str = "cron.update";
    pub const ADD: &str = "cron.add";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub include_disabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse {
    pub jobs: Vec<CronJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsParams {
    pub id: String,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsResponse {
    pub entries: Vec<RunLogEntry>,
}

/// Whether a manual run bypasses the disabled flag and due-time check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RunMode {
    Force,
    Due,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunParams {
    pub id: String,
    pub mode: RunMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveParams {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateParams {
    pub id: String,
    pub patch: CronJobPatch,
}
