//! Gateway WebSocket/RPC protocol definitions for the cron client.
//!
//! All communication uses JSON frames over WebSocket: the client sends
//! `RequestFrame`s and decodes everything inbound through the `GatewayFrame`
//! tagged union (`res` responses and `event` server-pushes).
//!
//! This crate is pure data + serde; it performs no I/O.

pub mod frames;
pub mod jobs;
pub mod push;
pub mod rpc;

pub use {
    frames::{ErrorShape, GatewayFrame, RequestFrame},
    jobs::{
        CronJob, CronJobCreate, CronJobPatch, CronJobState, CronPayload, CronSchedule,
        IsolationConfig, RunLogEntry, RunStatus, SchedulerStatus, SessionTarget, WakeMode,
    },
    push::{CRON_EVENT, CronEvent, CronEventAction, PushMessage},
    rpc::{
        ListParams, ListResponse, RemoveParams, RunMode, RunParams, RunsParams, RunsResponse,
        UpdateParams, methods,
    },
};
