//! Client-side synchronization core for gateway-scheduled cron jobs.
//!
//! Keeps a local snapshot (job list, run log, scheduler status) consistent
//! with the gateway. Poll ticks, pushed events, and explicit user mutations
//! all feed the same debounced, non-reentrant refresh pipeline. The gateway
//! remains the single source of truth: every successful refresh replaces the
//! cached collections outright.

pub mod client;
pub mod codec;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod form;
pub mod gateway;
pub mod reconcile;

pub use {
    client::GatewayClient,
    engine::{CronSnapshot, SyncConfig, SyncEngine},
    error::{Error, Result},
    form::JobForm,
    gateway::{CronGateway, PushStream},
};
