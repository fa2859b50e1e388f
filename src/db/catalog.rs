//! Catalog store: oracle cards, printings, and the cosine index
//!
//! All pipeline and ingestion persistence goes through this type. The one
//! operation with an atomicity requirement is `upsert_batch`: the
//! latest-printing flag is recomputed inside the same transaction as the
//! upserts so readers never observe zero or two latest printings for an
//! oracle.

use pgvector::Vector;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::models::{PrintingRecord, VectorHit};

/// Default number of neighbors returned by a vector query.
pub const DEFAULT_TOP_K: i64 = 10;

const HIT_COLUMNS: &str = "p.id AS printing_id, p.oracle_id, o.name, p.set_code, \
     p.collector_number, p.image_url, p.released_at";

#[derive(Clone)]
pub struct CatalogStore {
    pool: PgPool,
}

impl CatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Up to `top_k` printings with embeddings, by ascending cosine
    /// distance to `query`. Served by the HNSW index.
    pub async fn find_closest(&self, query: &[f32], top_k: i64) -> sqlx::Result<Vec<VectorHit>> {
        let sql = format!(
            "SELECT {HIT_COLUMNS}, (p.embedding <=> $1) AS distance \
             FROM printings p \
             JOIN oracle_cards o ON o.id = p.oracle_id \
             WHERE p.embedding IS NOT NULL \
             ORDER BY p.embedding <=> $1 \
             LIMIT $2"
        );
        sqlx::query_as::<_, VectorHit>(&sql)
            .bind(Vector::from(query.to_vec()))
            .bind(top_k)
            .fetch_all(&self.pool)
            .await
    }

    /// Case-insensitive exact name match, falling back to a prefix match
    /// for names of at least 4 characters (ornate fonts routinely cost
    /// the OCR the last letter or two). Returns the latest printing of
    /// the matched card at distance 0.0.
    pub async fn find_by_name(&self, name: &str) -> sqlx::Result<Option<VectorHit>> {
        let exact_sql = format!(
            "SELECT {HIT_COLUMNS}, 0.0::float8 AS distance \
             FROM oracle_cards o \
             JOIN printings p ON p.oracle_id = o.id AND p.is_latest_printing \
             WHERE lower(o.name) = lower($1) \
             LIMIT 1"
        );
        let exact = sqlx::query_as::<_, VectorHit>(&exact_sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        if exact.is_some() || name.chars().count() < 4 {
            return Ok(exact);
        }

        // Shortest matching name first, so the most specific card wins.
        let prefix_sql = format!(
            "SELECT {HIT_COLUMNS}, 0.0::float8 AS distance \
             FROM oracle_cards o \
             JOIN printings p ON p.oracle_id = o.id AND p.is_latest_printing \
             WHERE lower(o.name) LIKE lower($1) || '%' \
             ORDER BY length(o.name) \
             LIMIT 1"
        );
        sqlx::query_as::<_, VectorHit>(&prefix_sql)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
    }

    /// Whether any printing of the given set exists. Matching is
    /// case-insensitive; codes are stored upper-case.
    pub async fn set_exists(&self, set_code: &str) -> sqlx::Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM printings WHERE set_code = upper($1))",
        )
        .bind(set_code)
        .fetch_one(&self.pool)
        .await
    }

    /// Upsert a page of printings and keep the latest-printing flag
    /// consistent. Returns the number of records actually processed.
    ///
    /// Records with malformed ids or no usable image are skipped. Existing
    /// printings get a metadata refresh (never an embedding write), and
    /// the refresh is conditioned on an actual change so replaying a page
    /// is a strict no-op.
    pub async fn upsert_batch(&self, records: &[PrintingRecord]) -> sqlx::Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut processed = 0u64;

        for record in records {
            let (Ok(oracle_id), Ok(printing_id)) = (
                Uuid::parse_str(&record.oracle_id),
                Uuid::parse_str(&record.printing_id),
            ) else {
                debug!(name = %record.name, "skipping record with malformed ids");
                continue;
            };
            if record.image_url.is_none() {
                debug!(name = %record.name, "skipping record with no image source");
                continue;
            }

            sqlx::query(
                r#"
                INSERT INTO oracle_cards (id, name, created_at, updated_at)
                VALUES ($1, $2, now(), now())
                ON CONFLICT (id) DO UPDATE
                    SET name = EXCLUDED.name, updated_at = now()
                    WHERE oracle_cards.name IS DISTINCT FROM EXCLUDED.name
                "#,
            )
            .bind(oracle_id)
            .bind(&record.name)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO printings
                    (id, oracle_id, set_code, collector_number, image_url,
                     released_at, set_type, is_latest_printing, created_at, updated_at)
                VALUES ($1, $2, upper($3), $4, $5, $6, $7, FALSE, now(), now())
                ON CONFLICT (id) DO UPDATE
                    SET set_code = EXCLUDED.set_code,
                        collector_number = EXCLUDED.collector_number,
                        image_url = EXCLUDED.image_url,
                        released_at = EXCLUDED.released_at,
                        set_type = EXCLUDED.set_type,
                        updated_at = now()
                    WHERE (printings.set_code, printings.collector_number,
                           printings.image_url, printings.released_at, printings.set_type)
                          IS DISTINCT FROM
                          (EXCLUDED.set_code, EXCLUDED.collector_number,
                           EXCLUDED.image_url, EXCLUDED.released_at, EXCLUDED.set_type)
                "#,
            )
            .bind(printing_id)
            .bind(oracle_id)
            .bind(&record.set_code)
            .bind(&record.collector_number)
            .bind(&record.image_url)
            .bind(record.released_at)
            .bind(&record.set_type)
            .execute(&mut *tx)
            .await?;

            // Greatest released_at wins; ties break on id for determinism.
            sqlx::query(
                r#"
                UPDATE printings
                SET is_latest_printing = (printings.id = (
                        SELECT id FROM printings
                        WHERE oracle_id = $1
                        ORDER BY released_at DESC, id ASC
                        LIMIT 1
                    ))
                WHERE oracle_id = $1
                "#,
            )
            .bind(oracle_id)
            .execute(&mut *tx)
            .await?;

            processed += 1;
        }

        tx.commit().await?;
        Ok(processed)
    }

    /// Write a printing's embedding and stamp the update time.
    pub async fn save_embedding(&self, printing_id: Uuid, embedding: &[f32]) -> sqlx::Result<()> {
        sqlx::query(
            "UPDATE printings \
             SET embedding = $2, embedding_updated_at = now(), updated_at = now() \
             WHERE id = $1",
        )
        .bind(printing_id)
        .bind(Vector::from(embedding.to_vec()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Printings that still need an embedding and have an image to build
    /// one from, most useful first (latest printings, then newest).
    pub async fn printings_without_embedding(
        &self,
        set_code: Option<&str>,
    ) -> sqlx::Result<Vec<(Uuid, String)>> {
        match set_code {
            Some(code) => {
                sqlx::query_as::<_, (Uuid, String)>(
                    "SELECT id, image_url FROM printings \
                     WHERE embedding IS NULL AND image_url IS NOT NULL \
                       AND set_code = upper($1) \
                     ORDER BY is_latest_printing DESC, released_at DESC",
                )
                .bind(code)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, (Uuid, String)>(
                    "SELECT id, image_url FROM printings \
                     WHERE embedding IS NULL AND image_url IS NOT NULL \
                     ORDER BY is_latest_printing DESC, released_at DESC",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
    }
}
