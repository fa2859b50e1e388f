//! Title-band OCR
//!
//! Reads the card name from the title band of a canonical card image. The
//! band is upscaled and contrast-stretched before recognition because card
//! titles are rendered in ornate serif faces that Tesseract misreads at
//! native resolution.
//!
//! The Tesseract engine is created once at startup and shared process-wide
//! behind a mutex; its C internals are not reentrant, so calls through it
//! are serialized.

use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, GrayImage};
use leptess::{LepTess, Variable};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::types::{OcrResult, TitleReader};

/// Title band as proportional offsets of the canonical frame.
const BAND_X: (f32, f32) = (0.035, 0.685);
const BAND_Y: (f32, f32) = (0.035, 0.095);

/// Reads below this mean confidence are discarded outright.
const MIN_OCR_SCORE: f32 = 0.35;

/// Characters a card title can contain: basic and Latin-1 accented
/// letters, space, apostrophe, hyphen.
const TITLE_WHITELIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz\
ÀÁÂÃÄÅÆÇÈÉÊËÌÍÎÏÐÑÒÓÔÕÖØÙÚÛÜÝÞßàáâãäåæçèéêëìíîïðñòóôõöøùúûüýþÿ '-";

/// Tesseract handle. The C internals have no thread affinity but must not
/// be entered from two threads at once; the surrounding mutex provides
/// that exclusivity.
struct Engine(LepTess);

unsafe impl Send for Engine {}

/// Title reader backed by Tesseract's LSTM recognizer.
pub struct TesseractReader {
    engine: Mutex<Engine>,
}

impl TesseractReader {
    /// Build the engine once; callers share it for the process lifetime.
    /// `data_path` points at the tessdata directory; `None` defers to
    /// `TESSDATA_PREFIX`.
    pub fn new(data_path: Option<PathBuf>, language: &str) -> anyhow::Result<Self> {
        let data_path = data_path.as_ref().map(|p| p.to_string_lossy().into_owned());
        // Tesseract 4+ initializes with the LSTM engine by default.
        let mut engine = LepTess::new(data_path.as_deref(), language)?;
        // PSM 7: treat the band as a single text line.
        engine.set_variable(Variable::TesseditPagesegMode, "7")?;
        engine.set_variable(Variable::TesseditCharWhitelist, TITLE_WHITELIST)?;
        info!(language = %language, "OCR engine initialized");

        Ok(Self {
            engine: Mutex::new(Engine(engine)),
        })
    }

    fn recognize(&self, png: &[u8]) -> anyhow::Result<(String, f32)> {
        let mut guard = self.engine.lock().unwrap_or_else(|e| e.into_inner());
        let engine = &mut guard.0;

        engine.set_image_from_mem(png)?;
        engine.set_source_resolution(300);

        let text = engine.get_utf8_text()?;
        let score = engine.mean_text_conf().clamp(0, 100) as f32 / 100.0;
        Ok((text, score))
    }
}

impl TitleReader for TesseractReader {
    fn read_title(&self, canonical: &[u8]) -> OcrResult {
        let Ok(img) = image::load_from_memory(canonical) else {
            return OcrResult::empty();
        };

        let band = prepare_title_band(&img);
        let mut buf = Cursor::new(Vec::new());
        if DynamicImage::ImageLuma8(band)
            .write_to(&mut buf, image::ImageFormat::Png)
            .is_err()
        {
            return OcrResult::empty();
        }

        match self.recognize(buf.get_ref()) {
            Ok((raw, score)) => {
                let cleaned = clean_title(&raw);
                if score < MIN_OCR_SCORE || cleaned.chars().count() < 2 {
                    OcrResult { title: None, score }
                } else {
                    OcrResult {
                        title: Some(cleaned),
                        score,
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "title OCR failed");
                OcrResult::empty()
            }
        }
    }
}

/// Crop the title band, upscale 4x, grayscale, stretch, sharpen.
fn prepare_title_band(img: &DynamicImage) -> GrayImage {
    let (w, h) = img.dimensions();
    let x0 = (w as f32 * BAND_X.0) as u32;
    let x1 = (w as f32 * BAND_X.1).ceil() as u32;
    let y0 = (h as f32 * BAND_Y.0) as u32;
    let y1 = (h as f32 * BAND_Y.1).ceil() as u32;
    let bw = x1.saturating_sub(x0).max(1);
    let bh = y1.saturating_sub(y0).max(1);

    let band = imageops::crop_imm(img, x0, y0, bw, bh).to_image();
    let upscaled = imageops::resize(&band, bw * 4, bh * 4, FilterType::Lanczos3);
    let gray = DynamicImage::ImageRgba8(upscaled).to_luma8();
    let stretched = adjust_luma(&gray, 2.2, 1.10);
    imageops::unsharpen(&stretched, 0.8, 2)
}

fn adjust_luma(img: &GrayImage, contrast: f32, brightness: f32) -> GrayImage {
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        let v = pixel[0] as f32;
        let adjusted = ((v - 128.0) * contrast + 128.0) * brightness;
        pixel[0] = adjusted.clamp(0.0, 255.0) as u8;
    }
    out
}

/// Strip an OCR read down to a plausible card title: drop bracketed
/// substrings (mana symbols render as bracketed garbage), collapse
/// whitespace, and remove everything outside the title character set.
pub(crate) fn clean_title(raw: &str) -> String {
    let mut kept = String::with_capacity(raw.len());
    let mut depth = 0u32;
    for c in raw.chars() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            _ if c.is_whitespace() => kept.push(' '),
            _ if is_title_char(c) => kept.push(c),
            _ => {}
        }
    }
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_title_char(c: char) -> bool {
    if c.is_ascii_alphabetic() || c == '\'' || c == '-' {
        return true;
    }
    // Latin-1 accented letters, excluding the multiplication and
    // division signs embedded in that block.
    let u = c as u32;
    (0xC0..=0xFF).contains(&u) && u != 0xD7 && u != 0xF7
}
