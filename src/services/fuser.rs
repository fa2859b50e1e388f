//! Decision engine: fuses vector hits and the OCR hypothesis into a verdict
//!
//! The embedding is treated as authoritative whenever it is confident; OCR
//! is only allowed to veto inside the narrow band where the vector might be
//! wrong. This keeps single-letter OCR errors from discarding accurate
//! vector hits.
//!
//! Distance bands (cosine distance of the top hit):
//! - `< dist_high`          trust the vector outright
//! - `[dist_high, dist_med)` accept unless a confident OCR read disagrees
//! - `[dist_med, dist_cutoff)` suspect; ask for a rescan while attempts last
//! - `>= dist_cutoff`        reject

use serde::Deserialize;
use unicode_normalization::UnicodeNormalization;

use crate::models::{
    CardSummary, ConfidenceLevel, DetectionMethod, ScanStatus, ScanVerdict, VectorHit,
};

/// Share of database-name words that must appear in the OCR text for the
/// two names to count as the same card. Deliberately tolerant: ornate card
/// fonts produce predictable recognizer errors (P/F, C/G, rn/m).
const OVERLAP_RATIO: f32 = 0.55;

/// Calibrated decision thresholds. All overridable via `[fuser]` config.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FuserConfig {
    /// Vector alone is trustworthy below this distance.
    pub dist_high: f64,
    /// Vector alone is acceptable below this distance (medium confidence).
    pub dist_med: f64,
    /// Above this distance any vector-only claim is rejected.
    pub dist_cutoff: f64,
    /// Only an OCR read this confident may veto a passing vector hit.
    pub ocr_block: f32,
    /// Attempts after which every verdict must be terminal.
    pub max_attempts: u32,
}

impl Default for FuserConfig {
    fn default() -> Self {
        Self {
            dist_high: 0.30,
            dist_med: 0.42,
            dist_cutoff: 0.52,
            ocr_block: 0.90,
            max_attempts: 3,
        }
    }
}

/// Decision engine. Pure: same inputs, same verdict.
#[derive(Debug, Clone, Default)]
pub struct Fuser {
    config: FuserConfig,
}

impl Fuser {
    pub fn new(config: FuserConfig) -> Self {
        Self { config }
    }

    /// Fuse the vector top-K and the OCR hypothesis into one verdict.
    ///
    /// `hits[0]` with a distance of exactly 0.0 marks a candidate injected
    /// from a by-name lookup. `attempt` is the caller's 1-based attempt
    /// counter; once it reaches `max_attempts` every verdict is terminal.
    pub fn decide(
        &self,
        hits: &[VectorHit],
        ocr_title: Option<&str>,
        ocr_score: f32,
        attempt: u32,
    ) -> ScanVerdict {
        let c = &self.config;
        let can_rescan = attempt < c.max_attempts;
        let has_ocr = ocr_title.is_some();

        let Some(top) = hits.first() else {
            if has_ocr {
                // OCR alone can name a card but never a printing.
                let status = if can_rescan {
                    ScanStatus::RescanRequired
                } else {
                    ScanStatus::Ambiguous
                };
                return self.no_card(status, DetectionMethod::Ocr, attempt);
            }
            return self.no_card(ScanStatus::NotFound, DetectionMethod::None, attempt);
        };

        let alternatives: Vec<CardSummary> = hits[1..].iter().map(CardSummary::from).collect();

        // A distance of exactly 0.0 only occurs for name-injected hits.
        if top.distance == 0.0 {
            return self.with_card(
                ScanStatus::Confirmed,
                ConfidenceLevel::High,
                DetectionMethod::OcrVector,
                attempt,
                top,
                alternatives,
            );
        }

        let method = if has_ocr {
            DetectionMethod::OcrVector
        } else {
            DetectionMethod::Vector
        };

        if top.distance < c.dist_high {
            // Runners-up are reported only for name-injected confirms and
            // undecided verdicts, never for a sure vector hit.
            return self.with_card(
                ScanStatus::Confirmed,
                ConfidenceLevel::High,
                method,
                attempt,
                top,
                Vec::new(),
            );
        }

        if top.distance < c.dist_med {
            let vetoed = match ocr_title {
                Some(title) if ocr_score >= c.ocr_block => !name_overlap(&top.name, title),
                _ => false,
            };
            if vetoed {
                if can_rescan {
                    return self.no_card(
                        ScanStatus::RescanRequired,
                        DetectionMethod::Divergent,
                        attempt,
                    );
                }
                // Out of attempts: surface the vector's best guess, but
                // never claim it as confirmed.
                return self.with_card(
                    ScanStatus::Ambiguous,
                    ConfidenceLevel::Medium,
                    DetectionMethod::Vector,
                    attempt,
                    top,
                    alternatives,
                );
            }
            return self.with_card(
                ScanStatus::Confirmed,
                ConfidenceLevel::Medium,
                method,
                attempt,
                top,
                alternatives,
            );
        }

        if top.distance >= c.dist_cutoff {
            let status = if can_rescan {
                ScanStatus::RescanRequired
            } else {
                ScanStatus::NotFound
            };
            return self.no_card(status, DetectionMethod::Vector, attempt);
        }

        // Suspect band: dist_med <= distance < dist_cutoff.
        if can_rescan {
            return self.no_card(ScanStatus::RescanRequired, DetectionMethod::Vector, attempt);
        }
        self.with_card(
            ScanStatus::Ambiguous,
            ConfidenceLevel::Low,
            DetectionMethod::Vector,
            attempt,
            top,
            alternatives,
        )
    }

    fn with_card(
        &self,
        status: ScanStatus,
        confidence: ConfidenceLevel,
        detection_method: DetectionMethod,
        attempt: u32,
        hit: &VectorHit,
        alternatives: Vec<CardSummary>,
    ) -> ScanVerdict {
        ScanVerdict {
            status,
            confidence,
            confidence_score: confidence_score(hit.distance),
            detection_method,
            attempt,
            card: Some(CardSummary::from(hit)),
            alternatives,
        }
    }

    fn no_card(
        &self,
        status: ScanStatus,
        detection_method: DetectionMethod,
        attempt: u32,
    ) -> ScanVerdict {
        ScanVerdict {
            status,
            confidence: ConfidenceLevel::Low,
            confidence_score: 0.0,
            detection_method,
            attempt,
            card: None,
            alternatives: Vec::new(),
        }
    }
}

/// `max(0, 1 - distance)` rounded to 4 decimals.
fn confidence_score(distance: f64) -> f32 {
    let score = (1.0 - distance).max(0.0);
    ((score * 10_000.0).round() / 10_000.0) as f32
}

/// Whether a database card name and an OCR read plausibly refer to the
/// same card.
///
/// Both strings are lower-cased, NFKD-decomposed and stripped to ASCII
/// letters, digits and spaces. The database name is split into words of
/// length >= 3; at least [`OVERLAP_RATIO`] of those must occur as
/// substrings of the normalized OCR text.
pub fn name_overlap(db_name: &str, ocr_text: &str) -> bool {
    let db_norm = normalize_for_match(db_name);
    let ocr_norm = normalize_for_match(ocr_text);

    let words: Vec<&str> = db_norm
        .split_whitespace()
        .filter(|w| w.len() >= 3)
        .collect();
    if words.is_empty() {
        // Nothing to compare against; do not let a degenerate name veto.
        return true;
    }

    let matched = words.iter().filter(|w| ocr_norm.contains(**w)).count();
    matched as f32 / words.len() as f32 >= OVERLAP_RATIO
}

fn normalize_for_match(s: &str) -> String {
    s.to_lowercase()
        .nfkd()
        .filter(|c| c.is_ascii_alphanumeric() || *c == ' ')
        .collect()
}
