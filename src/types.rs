//! Core types and trait definitions for the identification pipeline
//!
//! The pipeline fans a canonical card image out to two extractors:
//! - **ArtEmbedder** - illustration embedding for vector retrieval
//! - **TitleReader** - title-band OCR for by-name lookup and veto
//!
//! Both extractors are CPU-bound and infallible at the trait boundary:
//! failures are absorbed into their empty values (`None` embedding, empty
//! `OcrResult`) so the decision engine can work with whichever signal
//! survived.

/// Dimension of the art embedding vector.
pub const EMBEDDING_DIM: usize = 512;

/// Result of reading the title band of a canonical card image.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrResult {
    /// Cleaned title text, `None` when the read was too poor to use.
    pub title: Option<String>,
    /// Mean recognizer confidence, 0.0-1.0.
    pub score: f32,
}

impl OcrResult {
    /// The "nothing read" value used when OCR fails outright.
    pub fn empty() -> Self {
        Self {
            title: None,
            score: 0.0,
        }
    }
}

/// Produces an L2-normalized 512-dim embedding of the card illustration.
///
/// Implementations must be shareable across worker threads; the production
/// implementation wraps a process-global ONNX session.
pub trait ArtEmbedder: Send + Sync {
    /// Embed the art region of a canonical 488x680 card image.
    ///
    /// Returns `None` if the image cannot be decoded or the model
    /// invocation fails. Never panics.
    fn embed(&self, canonical: &[u8]) -> Option<Vec<f32>>;
}

/// Reads the card title from the title band of a canonical card image.
pub trait TitleReader: Send + Sync {
    /// Read and clean the title text. Never fails; a hopeless read comes
    /// back as `OcrResult::empty()`.
    fn read_title(&self, canonical: &[u8]) -> OcrResult;
}
