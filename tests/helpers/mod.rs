//! Shared helpers for integration tests
//!
//! Database-backed suites run against `DATABASE_URL` (a Postgres with the
//! pgvector extension) and skip silently when it is not set. Every test
//! isolates itself with run-unique set codes, names and vectors instead of
//! truncating shared tables.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use cardscan::models::PrintingRecord;
use cardscan::types::{ArtEmbedder, OcrResult, TitleReader, EMBEDDING_DIM};

/// Connect to the test database, or `None` when DATABASE_URL is unset.
pub async fn test_pool() -> Option<PgPool> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping: DATABASE_URL not set");
            return None;
        }
    };
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("failed to connect to test database");
    cardscan::db::init_schema(&pool)
        .await
        .expect("failed to initialize schema");
    Some(pool)
}

/// Run-unique upper-case set code (max 10 chars per the data model).
pub fn unique_set_code() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("T{}", &id[..7]).to_uppercase()
}

pub fn ts(date: &str) -> DateTime<Utc> {
    chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

pub fn record(
    oracle_id: Uuid,
    printing_id: Uuid,
    name: &str,
    set_code: &str,
    collector_number: &str,
    released_at: &str,
) -> PrintingRecord {
    PrintingRecord {
        oracle_id: oracle_id.to_string(),
        printing_id: printing_id.to_string(),
        name: name.to_string(),
        set_code: set_code.to_string(),
        collector_number: collector_number.to_string(),
        image_url: Some(format!("https://img.example/{printing_id}.jpg")),
        released_at: ts(released_at),
        set_type: "core".to_string(),
    }
}

/// Deterministic pseudo-random unit vector. Distinct seeds give vectors
/// that are nearly orthogonal in 512 dimensions, which keeps concurrent
/// test runs out of each other's neighborhoods.
pub fn random_unit_vec(seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    let mut v = Vec::with_capacity(EMBEDDING_DIM);
    for _ in 0..EMBEDDING_DIM {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        // Map the top bits to (-1, 1).
        let x = ((state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0;
        v.push(x);
    }
    normalize(v)
}

pub fn normalize(v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    v.into_iter().map(|x| x / norm).collect()
}

/// Unit vector orthogonal to `a`, derived from `b` by Gram-Schmidt.
pub fn orthogonal_to(a: &[f32], b: &[f32]) -> Vec<f32> {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    normalize(b.iter().zip(a).map(|(y, x)| y - dot * x).collect())
}

/// Unit vector at exactly the given cosine to `a`, where `a_perp` is an
/// orthonormal complement of `a`.
pub fn at_cosine(a: &[f32], a_perp: &[f32], cosine: f32) -> Vec<f32> {
    let sine = (1.0 - cosine * cosine).max(0.0).sqrt();
    a.iter()
        .zip(a_perp)
        .map(|(x, p)| cosine * x + sine * p)
        .collect()
}

pub struct FixedEmbedder(pub Vec<f32>);
impl ArtEmbedder for FixedEmbedder {
    fn embed(&self, _canonical: &[u8]) -> Option<Vec<f32>> {
        Some(self.0.clone())
    }
}

pub struct NoEmbedder;
impl ArtEmbedder for NoEmbedder {
    fn embed(&self, _canonical: &[u8]) -> Option<Vec<f32>> {
        None
    }
}

pub struct FixedReader(pub OcrResult);
impl TitleReader for FixedReader {
    fn read_title(&self, _canonical: &[u8]) -> OcrResult {
        self.0.clone()
    }
}

pub struct NoReader;
impl TitleReader for NoReader {
    fn read_title(&self, _canonical: &[u8]) -> OcrResult {
        OcrResult::empty()
    }
}
