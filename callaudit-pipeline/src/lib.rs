//! callaudit-pipeline library interface
//!
//! Exposes the orchestration, matching and service modules for the
//! binary and for integration tests.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod matching;
pub mod pipeline;
pub mod services;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use crate::config::Settings;
use crate::pipeline::PipelineFlags;
use crate::services::event_log::EventLog;
use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub settings: Settings,
    pub event_log: EventLog,
    pub flags: Arc<PipelineFlags>,
}

impl AppState {
    pub fn new(db: SqlitePool, settings: Settings, flags: Arc<PipelineFlags>) -> Self {
        let event_log = EventLog::new(db.clone());
        Self {
            db,
            settings,
            event_log,
            flags,
        }
    }
}

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    api::routes().with_state(state)
}
