//! Data models for cardscan

pub mod card;
pub mod verdict;

pub use card::{OracleCard, Printing, PrintingRecord, VectorHit};
pub use verdict::{CardSummary, ConfidenceLevel, DetectionMethod, ScanStatus, ScanVerdict};
