//! cardscan - card identification microservice
//!
//! Identifies a physical Magic: The Gathering card from a single camera
//! photograph, returning the exact printing (set code + collector number)
//! or an honest retry/ambiguous verdict. The pipeline rectifies the card
//! to a canonical frame, embeds the illustration and reads the title in
//! parallel, queries the cosine index, and fuses both signals into one
//! verdict. A background reconciler keeps the printing catalog current.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod types;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::Config;
use crate::services::ingestor::Ingestor;
use crate::services::pipeline::ScanPipeline;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ScanPipeline>,
    pub ingestor: Arc<Ingestor>,
    pub config: Arc<Config>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(pipeline: Arc<ScanPipeline>, ingestor: Arc<Ingestor>, config: Arc<Config>) -> Self {
        Self {
            pipeline,
            ingestor,
            config,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// - POST /scanner/identify - identify a card photo
/// - GET  /scanner/seed/{setCode} - seed one set from upstream
/// - GET  /health - liveness probe
pub fn build_router(state: AppState) -> Router {
    // Body limit sits above the upload cap so the handler can answer an
    // oversize upload with a clean 413 instead of a closed connection.
    let body_limit = state.config.server.max_upload_bytes + 64 * 1024;

    Router::new()
        .merge(api::scanner_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}
