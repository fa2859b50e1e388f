//! Catalog seeding
//!
//! Pulls every printing of a set from the upstream catalog, upserts it,
//! then backfills embeddings for printings that have an image but no
//! vector yet. Per-printing failures are isolated; only upstream transport
//! errors (other than "set does not exist") abort the set.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::CatalogStore;
use crate::models::PrintingRecord;
use crate::services::catalog_client::{CatalogClient, CatalogError};
use crate::services::detector;
use crate::types::ArtEmbedder;

/// Pause between search pages, per the upstream's rate-limit policy.
const PAGE_DELAY: Duration = Duration::from_millis(100);
/// Pause between per-printing image downloads.
const IMAGE_DELAY: Duration = Duration::from_millis(150);

/// What one `seed_set` call accomplished.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeedOutcome {
    pub cards_processed: u64,
    pub embeddings_generated: u64,
}

pub struct Ingestor {
    client: CatalogClient,
    store: CatalogStore,
    embedder: Arc<dyn ArtEmbedder>,
}

impl Ingestor {
    pub fn new(client: CatalogClient, store: CatalogStore, embedder: Arc<dyn ArtEmbedder>) -> Self {
        Self {
            client,
            store,
            embedder,
        }
    }

    pub fn client(&self) -> &CatalogClient {
        &self.client
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// Seed all printings of one set. Idempotent: replaying a set is a
    /// no-op apart from embeddings that failed to generate last time.
    pub async fn seed_set(&self, set_code: &str) -> Result<SeedOutcome> {
        let storage_code = set_code.to_uppercase();
        let mut outcome = SeedOutcome::default();

        let mut url = self.client.search_url(set_code);
        loop {
            let page = match self.client.fetch_search_page(&url).await {
                Ok(page) => page,
                Err(CatalogError::UnknownSet(_)) => {
                    info!(set_code = %storage_code, "set unknown upstream, nothing to seed");
                    return Ok(outcome);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("seeding set {storage_code} failed"))
                }
            };

            let records: Vec<PrintingRecord> =
                page.data.into_iter().map(|card| card.into_record()).collect();
            outcome.cards_processed += self.store.upsert_batch(&records).await?;

            match page.next_page {
                Some(next) => {
                    sleep(PAGE_DELAY).await;
                    url = next;
                }
                None => break,
            }
        }

        let pending = self
            .store
            .printings_without_embedding(Some(&storage_code))
            .await?;
        info!(
            set_code = %storage_code,
            cards = outcome.cards_processed,
            pending = pending.len(),
            "printings upserted, generating embeddings"
        );

        for (i, (printing_id, image_url)) in pending.iter().enumerate() {
            if i > 0 {
                sleep(IMAGE_DELAY).await;
            }
            match self.embed_printing(*printing_id, image_url).await {
                Ok(true) => outcome.embeddings_generated += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(printing_id = %printing_id, error = %e, "embedding generation failed");
                }
            }
        }

        info!(
            set_code = %storage_code,
            cards = outcome.cards_processed,
            embeddings = outcome.embeddings_generated,
            "set seeded"
        );
        Ok(outcome)
    }

    /// Download, rectify and embed one printing image. `Ok(false)` means
    /// the image produced no embedding (undecodable or model failure).
    async fn embed_printing(&self, printing_id: Uuid, image_url: &str) -> Result<bool> {
        let bytes = self
            .client
            .fetch_image(image_url)
            .await
            .with_context(|| format!("image download failed: {image_url}"))?;

        let embedder = Arc::clone(&self.embedder);
        let vector = tokio::task::spawn_blocking(move || {
            let canonical = detector::detect_and_crop(&bytes);
            embedder.embed(&canonical)
        })
        .await?;

        match vector {
            Some(v) => {
                self.store.save_embedding(printing_id, &v).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
