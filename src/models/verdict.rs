//! Scan verdict types returned by the decision engine
//!
//! A verdict is terminal (`Confirmed`, `Ambiguous`, `NotFound`) or asks the
//! client for another photo (`RescanRequired`). The engine never returns a
//! card it is not confident about; correctness is preferred over recall.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::VectorHit;

/// Terminal state of one identification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Confirmed,
    RescanRequired,
    Ambiguous,
    NotFound,
}

impl ScanStatus {
    /// True for verdicts that end the scan conversation.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ScanStatus::RescanRequired)
    }
}

/// Coarse confidence bucket accompanying the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

/// Which signals produced the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionMethod {
    #[serde(rename = "ocr+vector")]
    OcrVector,
    #[serde(rename = "vector")]
    Vector,
    #[serde(rename = "ocr")]
    Ocr,
    /// Vector and OCR disagreed hard enough to block a claim.
    #[serde(rename = "divergent")]
    Divergent,
    #[serde(rename = "none")]
    None,
}

/// The card a verdict points at, shaped for the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardSummary {
    pub oracle_id: Uuid,
    pub name: String,
    pub set_code: String,
    pub collector_number: String,
    pub image_url: Option<String>,
    pub released_at: DateTime<Utc>,
}

impl From<&VectorHit> for CardSummary {
    fn from(hit: &VectorHit) -> Self {
        Self {
            oracle_id: hit.oracle_id,
            name: hit.name.clone(),
            set_code: hit.set_code.clone(),
            collector_number: hit.collector_number.clone(),
            image_url: hit.image_url.clone(),
            released_at: hit.released_at,
        }
    }
}

/// Outcome of one identification attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanVerdict {
    pub status: ScanStatus,
    pub confidence: ConfidenceLevel,
    /// `max(0, 1 - distance)` of the chosen hit, rounded to 4 decimals;
    /// 0.0 when no card was chosen.
    pub confidence_score: f32,
    pub detection_method: DetectionMethod,
    /// Echoes the caller's attempt counter (1-based).
    pub attempt: u32,
    pub card: Option<CardSummary>,
    /// Remaining vector hits for `Confirmed`, near-ties when the engine
    /// could not decide; empty otherwise.
    pub alternatives: Vec<CardSummary>,
}
