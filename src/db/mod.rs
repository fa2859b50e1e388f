//! Database access for cardscan

pub mod catalog;

pub use catalog::CatalogStore;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DatabaseConfig;

/// Connect to Postgres and make sure the schema exists.
pub async fn init_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await?;

    init_schema(&pool).await?;
    Ok(pool)
}

/// Create tables and indexes if they don't exist.
///
/// Runs in a transaction so a partially created schema is never visible.
/// The embedding column requires the pgvector extension; its HNSW index
/// keeps cosine top-K under the latency target as the catalog grows.
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS oracle_cards (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS printings (
            id UUID PRIMARY KEY,
            oracle_id UUID NOT NULL REFERENCES oracle_cards(id) ON DELETE CASCADE,
            set_code VARCHAR(10) NOT NULL,
            collector_number VARCHAR(20) NOT NULL,
            image_url TEXT,
            released_at TIMESTAMPTZ NOT NULL,
            set_type TEXT NOT NULL DEFAULT '',
            is_latest_printing BOOLEAN NOT NULL DEFAULT FALSE,
            embedding VECTOR(512),
            embedding_updated_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_oracle_cards_name ON oracle_cards (lower(name))")
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_printings_set_collector \
         ON printings (set_code, collector_number)",
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_printings_oracle_latest \
         ON printings (oracle_id, is_latest_printing)",
    )
    .execute(&mut *tx)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_printings_embedding \
         ON printings USING hnsw (embedding vector_cosine_ops)",
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    tracing::info!("database schema initialized (oracle_cards, printings)");

    Ok(())
}
