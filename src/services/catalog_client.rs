//! Upstream card catalog API client
//!
//! Thin typed wrapper over the catalog's search, set listing and image
//! endpoints. The upstream rejects requests without a contactable
//! User-Agent and an explicit JSON Accept header, so both are baked into
//! the client at construction.

use chrono::{DateTime, NaiveDate, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::PrintingRecord;

/// Catalog client errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Network error: {0}")]
    Network(String),

    /// Upstream answered 400/404 for a set search: the set does not exist.
    #[error("Set not known upstream: {0}")]
    UnknownSet(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

/// One page of a paginated card search.
#[derive(Debug, Clone, Deserialize)]
pub struct CardPage {
    pub data: Vec<CardJson>,
    /// Absolute URL of the next page, when one exists.
    pub next_page: Option<String>,
}

/// One printing as the upstream serializes it.
#[derive(Debug, Clone, Deserialize)]
pub struct CardJson {
    pub id: String,
    pub oracle_id: Option<String>,
    pub name: String,
    pub set: String,
    pub collector_number: String,
    pub released_at: Option<String>,
    pub set_type: Option<String>,
    pub image_uris: Option<ImageUris>,
    pub card_faces: Option<Vec<CardFace>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageUris {
    pub normal: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CardFace {
    pub image_uris: Option<ImageUris>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetsPage {
    pub data: Vec<SetJson>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetJson {
    pub code: String,
    pub set_type: String,
}

impl CardJson {
    /// Extract the ingestion record. The face image of a multi-face card
    /// stands in when the card itself carries no image.
    pub fn into_record(self) -> PrintingRecord {
        let face_image = self
            .card_faces
            .as_ref()
            .and_then(|faces| faces.first())
            .and_then(|face| face.image_uris.as_ref())
            .and_then(|uris| uris.normal.clone());
        let image_url = self
            .image_uris
            .as_ref()
            .and_then(|uris| uris.normal.clone())
            .or(face_image);

        PrintingRecord {
            oracle_id: self.oracle_id.unwrap_or_default(),
            printing_id: self.id,
            name: self.name,
            set_code: self.set.to_uppercase(),
            collector_number: self.collector_number,
            image_url,
            released_at: parse_release_date(self.released_at.as_deref()),
            set_type: self.set_type.unwrap_or_default(),
        }
    }
}

/// Release dates arrive as `YYYY-MM-DD`; anything unparseable collapses to
/// the epoch so the printing sorts behind every real release date without
/// losing UTC kind. (The epoch rather than chrono's minimum: the minimum
/// predates the range a timestamptz column accepts.)
pub(crate) fn parse_release_date(raw: Option<&str>) -> DateTime<Utc> {
    raw.and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Upstream catalog API client.
#[derive(Clone)]
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
}

impl CatalogClient {
    pub fn new(base_url: &str, user_agent: &str) -> Result<Self, CatalogError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// First-page URL for all printings of a set.
    pub fn search_url(&self, set_code: &str) -> String {
        format!(
            "{}/cards/search?q=e:{}&unique=prints&include_extras=false",
            self.base_url,
            set_code.to_lowercase()
        )
    }

    /// Fetch one search page by absolute URL (first page or `next_page`).
    pub async fn fetch_search_page(&self, url: &str) -> Result<CardPage, CatalogError> {
        debug!(url = %url, "fetching catalog search page");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 400 || status.as_u16() == 404 {
            return Err(CatalogError::UnknownSet(url.to_string()));
        }
        if status.as_u16() == 429 {
            return Err(CatalogError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Api(status.as_u16(), body));
        }

        response
            .json()
            .await
            .map_err(|e| CatalogError::Parse(e.to_string()))
    }

    /// All sets the upstream knows about.
    pub async fn list_sets(&self) -> Result<Vec<SetJson>, CatalogError> {
        let url = format!("{}/sets", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(CatalogError::RateLimited);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Api(status.as_u16(), body));
        }

        let page: SetsPage = response
            .json()
            .await
            .map_err(|e| CatalogError::Parse(e.to_string()))?;
        Ok(page.data)
    }

    /// Download a printing's face image.
    pub async fn fetch_image(&self, url: &str) -> Result<Vec<u8>, CatalogError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Api(status.as_u16(), String::new()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| CatalogError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
