//! Configuration loading for cardscan
//!
//! A TOML file with a `[section]` per concern, every key defaulted, plus a
//! small set of environment overrides. Resolution order for the file path:
//! `--config` argument, `CARDSCAN_CONFIG`, then `./cardscan.toml`; a missing
//! file means compiled defaults. `DATABASE_URL` and `CARDSCAN_BIND` always
//! win over the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::services::fuser::FuserConfig;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub catalog: CatalogConfig,
    pub model: ModelConfig,
    pub ocr: OcrConfig,
    pub pipeline: PipelineConfig,
    pub fuser: FuserConfig,
    pub reconciler: ReconcilerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the HTTP listener binds to.
    pub bind: String,
    /// Hard cap on an uploaded scan image; larger uploads get 413.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7717".to_string(),
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/cardscan".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Base URL of the upstream card catalog API.
    pub base_url: String,
    /// User-Agent sent upstream; must include a contact address, the
    /// upstream rejects anonymous clients.
    pub user_agent: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.scryfall.com".to_string(),
            user_agent: format!(
                "cardscan/{} (cardscan@localhost)",
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the 512-dim ONNX image embedding model.
    pub path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("models/card-embedder.onnx"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    /// Directory containing Tesseract language data; `None` lets the
    /// engine fall back to `TESSDATA_PREFIX`.
    pub data_path: Option<PathBuf>,
    pub language: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            data_path: None,
            language: "eng".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum OCR score for a by-name lookup to be attempted. Lower than
    /// the fuser's veto threshold on purpose: a plausible read is enough
    /// to try a lookup, only a confident one may veto.
    pub ocr_inject_threshold: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ocr_inject_threshold: 0.70,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    pub enabled: bool,
    pub initial_delay_secs: u64,
    pub interval_secs: u64,
    /// Set types that never contain playable game cards.
    pub ignored_set_types: Vec<String>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_secs: 10,
            interval_secs: 24 * 60 * 60,
            ignored_set_types: ["memorabilia", "token", "minigame", "funny"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl Config {
    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from the default locations, falling back to
    /// compiled defaults when no file is present.
    pub fn load() -> Result<Self> {
        if let Ok(path) = std::env::var("CARDSCAN_CONFIG") {
            return Self::load_from(Path::new(&path));
        }
        let default_path = Path::new("cardscan.toml");
        if default_path.exists() {
            return Self::load_from(default_path);
        }
        let mut config = Config::default();
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(bind) = std::env::var("CARDSCAN_BIND") {
            self.server.bind = bind;
        }
    }
}
