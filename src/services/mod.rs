//! Core services for card identification and catalog ingestion

pub mod catalog_client;
pub mod detector;
pub mod embedder;
pub mod fuser;
pub mod ingestor;
pub mod pipeline;
pub mod reconciler;
pub mod title_reader;
