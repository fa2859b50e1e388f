//! Identification pipeline
//!
//! Orchestrates one identification attempt:
//! detect → (embed ∥ read title) → vector top-K + by-name injection → fuse.
//!
//! Extractor failures are absorbed at their boundaries; whichever signal
//! survived still reaches the decision engine. Only storage errors abort
//! the attempt.

use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::catalog::{CatalogStore, DEFAULT_TOP_K};
use crate::models::{ScanVerdict, VectorHit};
use crate::services::detector;
use crate::services::fuser::{Fuser, FuserConfig};
use crate::types::{ArtEmbedder, OcrResult, TitleReader};

pub struct ScanPipeline {
    embedder: Arc<dyn ArtEmbedder>,
    reader: Arc<dyn TitleReader>,
    store: CatalogStore,
    fuser: Fuser,
    /// Minimum OCR score for the by-name lookup. Lower than the fuser's
    /// veto threshold by design (0.70 vs 0.90).
    ocr_inject_threshold: f32,
}

impl ScanPipeline {
    pub fn new(
        embedder: Arc<dyn ArtEmbedder>,
        reader: Arc<dyn TitleReader>,
        store: CatalogStore,
        fuser_config: FuserConfig,
        ocr_inject_threshold: f32,
    ) -> Self {
        Self {
            embedder,
            reader,
            store,
            fuser: Fuser::new(fuser_config),
            ocr_inject_threshold,
        }
    }

    /// Identify the card in `raw`. The verdict's attempt counter is
    /// `previous_attempt + 1`.
    pub async fn identify(&self, raw: Vec<u8>, previous_attempt: u32) -> Result<ScanVerdict> {
        let attempt = previous_attempt + 1;

        let canonical = tokio::task::spawn_blocking(move || detector::detect_and_crop(&raw)).await?;

        // Both extractors are CPU-bound; run them on worker threads and
        // join before touching the store.
        let embedder = Arc::clone(&self.embedder);
        let embed_input = canonical.clone();
        let embed_task = tokio::task::spawn_blocking(move || embedder.embed(&embed_input));

        let reader = Arc::clone(&self.reader);
        let ocr_task = tokio::task::spawn_blocking(move || reader.read_title(&canonical));

        let (embedding, ocr) = tokio::join!(embed_task, ocr_task);
        let embedding = embedding.unwrap_or_else(|e| {
            warn!(error = %e, "embedding task failed");
            None
        });
        let ocr = ocr.unwrap_or_else(|e| {
            warn!(error = %e, "title OCR task failed");
            OcrResult::empty()
        });

        let mut hits: Vec<VectorHit> = match &embedding {
            Some(vector) => self.store.find_closest(vector, DEFAULT_TOP_K).await?,
            None => Vec::new(),
        };

        if let Some(title) = ocr.title.as_deref() {
            if ocr.score >= self.ocr_inject_threshold {
                if let Some(named) = self.store.find_by_name(title).await? {
                    debug!(title = %title, "by-name candidate injected at distance 0");
                    hits.insert(0, named);
                }
            }
        }

        debug!(
            attempt = attempt,
            hits = hits.len(),
            ocr_title = ocr.title.as_deref().unwrap_or(""),
            ocr_score = ocr.score,
            "fusing identification signals"
        );

        Ok(self
            .fuser
            .decide(&hits, ocr.title.as_deref(), ocr.score, attempt))
    }
}
