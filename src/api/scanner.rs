//! Scanner API handlers
//!
//! POST /scanner/identify - identify the card on an uploaded photo.
//! GET  /scanner/seed/{setCode} - seed one set from the upstream catalog.

use axum::{
    extract::{Multipart, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::error::{ApiError, ApiResult};
use crate::models::{CardSummary, ConfidenceLevel, DetectionMethod, ScanStatus, ScanVerdict};
use crate::AppState;

const SUPPORTED_CONTENT_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// Build scanner routes
pub fn scanner_routes() -> Router<AppState> {
    Router::new()
        .route("/scanner/identify", post(identify_card))
        .route("/scanner/seed/:set_code", get(seed_set))
}

#[derive(Debug, Deserialize)]
pub struct IdentifyParams {
    /// Attempt counter of the previous verdict; 0 on the first scan.
    #[serde(default)]
    pub attempt: u32,
}

/// POST /scanner/identify response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyResponse {
    pub status: ScanStatus,
    pub confidence: ConfidenceLevel,
    pub confidence_score: f32,
    pub detection_method: DetectionMethod,
    pub processing_time_ms: u64,
    pub rescan_attempt: u32,
    pub card: Option<CardSummary>,
    pub alternative_candidates: Vec<CardSummary>,
}

impl IdentifyResponse {
    fn from_verdict(verdict: ScanVerdict, processing_time_ms: u64) -> Self {
        Self {
            status: verdict.status,
            confidence: verdict.confidence,
            confidence_score: verdict.confidence_score,
            detection_method: verdict.detection_method,
            processing_time_ms,
            rescan_attempt: verdict.attempt,
            card: verdict.card,
            alternative_candidates: verdict.alternatives,
        }
    }
}

/// POST /scanner/identify
///
/// Multipart body with an image in the `file` field. Extractor failures
/// never surface here; only storage errors produce a 500.
pub async fn identify_card(
    State(state): State<AppState>,
    Query(params): Query<IdentifyParams>,
    mut multipart: Multipart,
) -> ApiResult<Json<IdentifyResponse>> {
    let started = Instant::now();

    let file = read_file_field(&mut multipart, state.config.server.max_upload_bytes).await?;
    let verdict = state.pipeline.identify(file, params.attempt).await?;

    tracing::info!(
        status = ?verdict.status,
        attempt = verdict.attempt,
        card = verdict.card.as_ref().map(|c| c.name.as_str()).unwrap_or(""),
        "identification finished"
    );

    Ok(Json(IdentifyResponse::from_verdict(
        verdict,
        started.elapsed().as_millis() as u64,
    )))
}

async fn read_file_field(multipart: &mut Multipart, max_bytes: usize) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to parse multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        match field.content_type() {
            Some(ct) if SUPPORTED_CONTENT_TYPES.contains(&ct) => {}
            Some(ct) => {
                return Err(ApiError::BadRequest(format!(
                    "Unsupported content type: {ct}. Use image/jpeg, image/png or image/webp."
                )))
            }
            None => {
                return Err(ApiError::BadRequest(
                    "Missing content type on file field".to_string(),
                ))
            }
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Failed to read file: {e}")))?;
        if data.is_empty() {
            return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
        }
        if data.len() > max_bytes {
            return Err(ApiError::PayloadTooLarge(format!(
                "File exceeds the {max_bytes} byte upload limit"
            )));
        }
        return Ok(data.to_vec());
    }

    Err(ApiError::BadRequest(
        "No file provided. Use 'file' field in multipart form.".to_string(),
    ))
}

/// GET /scanner/seed/{setCode} response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedResponse {
    pub status: String,
    pub set: String,
    pub cards_processed: u64,
    pub embeddings_generated: u64,
    pub message: String,
}

/// GET /scanner/seed/{setCode}
///
/// Idempotent: reseeding an already-ingested set is a no-op apart from
/// embeddings that previously failed to generate.
pub async fn seed_set(
    State(state): State<AppState>,
    Path(set_code): Path<String>,
) -> ApiResult<Json<SeedResponse>> {
    let code = set_code.trim().to_string();
    if code.is_empty() {
        return Err(ApiError::BadRequest("Set code must not be empty".to_string()));
    }

    let outcome = state
        .ingestor
        .seed_set(&code)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(SeedResponse {
        status: "success".to_string(),
        set: code.to_uppercase(),
        cards_processed: outcome.cards_processed,
        embeddings_generated: outcome.embeddings_generated,
        message: format!(
            "Processed {} printings, generated {} embeddings",
            outcome.cards_processed, outcome.embeddings_generated
        ),
    }))
}
