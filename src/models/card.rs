//! Catalog entities: oracle cards and their printings
//!
//! An oracle card is the abstract identity shared by every reprint of a
//! card; a printing is one physical print run in one set. Both carry the
//! upstream catalog's UUIDs as primary keys so reingestion is idempotent.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::FromRow;
use uuid::Uuid;

/// Abstract card identity, shared across reprints.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct OracleCard {
    pub id: Uuid,
    /// Canonical English name, unique per oracle id.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One print run of an oracle card in one set.
///
/// Exactly one printing per oracle id carries `is_latest_printing = true`:
/// the one with the greatest `released_at` (ties broken by id).
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Printing {
    pub id: Uuid,
    pub oracle_id: Uuid,
    /// Upper-case set code, 1-10 chars.
    pub set_code: String,
    /// Collector number; arbitrary case, may be non-numeric ("12a", "★4").
    pub collector_number: String,
    pub image_url: Option<String>,
    pub released_at: DateTime<Utc>,
    pub set_type: String,
    pub is_latest_printing: bool,
    pub embedding: Option<Vector>,
    pub embedding_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One printing as extracted from an upstream search page, before
/// validation. Ids are kept as raw strings; `upsert_batch` parses them and
/// skips records that do not carry well-formed UUIDs or any usable image.
#[derive(Debug, Clone)]
pub struct PrintingRecord {
    pub oracle_id: String,
    pub printing_id: String,
    pub name: String,
    pub set_code: String,
    pub collector_number: String,
    pub image_url: Option<String>,
    pub released_at: DateTime<Utc>,
    pub set_type: String,
}

/// One nearest-neighbor hit from the catalog store.
///
/// `distance` is cosine distance in [0, 2]; a value of exactly 0.0 marks a
/// hit injected from a by-name lookup rather than the vector index.
#[derive(Debug, Clone, FromRow)]
pub struct VectorHit {
    pub oracle_id: Uuid,
    pub printing_id: Uuid,
    pub name: String,
    pub set_code: String,
    pub collector_number: String,
    pub image_url: Option<String>,
    pub released_at: DateTime<Utc>,
    pub distance: f64,
}
