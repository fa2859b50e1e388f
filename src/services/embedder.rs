//! Art-region embedding using ONNX Runtime
//!
//! Embeds only the illustration window of the canonical card frame. Title
//! band, type line, rules text and footer are near-identical across
//! printings of unrelated cards that share a frame style; including them
//! drowned out the art signal and produced false matches. Cropping them
//! away makes the embedding a visual similarity metric on the artwork.

use anyhow::{anyhow, ensure, Context, Result};
use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, RgbImage};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

use crate::types::{ArtEmbedder, EMBEDDING_DIM};

/// Art region as proportional offsets of the canonical 488x680 frame.
const ART_X: (f32, f32) = (0.030, 0.970);
const ART_Y: (f32, f32) = (0.081, 0.845);

const INPUT_SIZE: u32 = 224;
const INPUT_NAME: &str = "pixel_values";

/// ImageNet channel statistics the model was trained with.
const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Embedder backed by a 512-output ONNX vision model.
///
/// The session is created once at startup and shared process-wide; runs
/// take the mutex because the session API requires exclusive access.
pub struct OnnxEmbedder {
    session: Mutex<Session>,
}

impl OnnxEmbedder {
    pub fn load(model_path: &Path) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load embedding model {}", model_path.display())
            })?;
        info!(model = %model_path.display(), "embedding model loaded");
        Ok(Self {
            session: Mutex::new(session),
        })
    }

    fn run(&self, img: &DynamicImage) -> Result<Vec<f32>> {
        let art = crop_art_region(img);
        let resized = imageops::resize(&art, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);
        let input = nchw_tensor_data(&resized);

        let tensor = Tensor::from_array((
            [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
            input.into_boxed_slice(),
        ))?;

        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let outputs = session.run(ort::inputs![INPUT_NAME => tensor])?;

        let output = outputs
            .iter()
            .next()
            .ok_or_else(|| anyhow!("embedding model produced no outputs"))?;
        let (_shape, data) = output.1.try_extract_tensor::<f32>()?;
        ensure!(
            data.len() == EMBEDDING_DIM,
            "embedding model produced {} floats, expected {}",
            data.len(),
            EMBEDDING_DIM
        );

        l2_normalize(data.to_vec())
    }
}

impl ArtEmbedder for OnnxEmbedder {
    fn embed(&self, canonical: &[u8]) -> Option<Vec<f32>> {
        let img = image::load_from_memory(canonical).ok()?;
        match self.run(&img) {
            Ok(vector) => Some(vector),
            Err(e) => {
                warn!(error = %e, "art embedding failed");
                None
            }
        }
    }
}

fn crop_art_region(img: &DynamicImage) -> RgbImage {
    let (w, h) = img.dimensions();
    let x0 = (w as f32 * ART_X.0) as u32;
    let x1 = (w as f32 * ART_X.1).ceil() as u32;
    let y0 = (h as f32 * ART_Y.0) as u32;
    let y1 = (h as f32 * ART_Y.1).ceil() as u32;
    let bw = x1.saturating_sub(x0).max(1);
    let bh = y1.saturating_sub(y0).max(1);
    DynamicImage::ImageRgba8(imageops::crop_imm(img, x0, y0, bw, bh).to_image()).to_rgb8()
}

/// Channel-first float tensor data, normalized per channel.
fn nchw_tensor_data(rgb: &RgbImage) -> Vec<f32> {
    let size = INPUT_SIZE as usize;
    let plane = size * size;
    let mut data = vec![0.0f32; 3 * plane];

    for y in 0..size {
        for x in 0..size {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * size + x;
            for ch in 0..3 {
                data[ch * plane + idx] =
                    ((pixel[ch] as f32 / 255.0) - CHANNEL_MEAN[ch]) / CHANNEL_STD[ch];
            }
        }
    }
    data
}

fn l2_normalize(vector: Vec<f32>) -> Result<Vec<f32>> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    ensure!(norm > 0.0, "embedding has zero norm");
    Ok(vector.iter().map(|v| v / norm).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn l2_normalize_produces_unit_vectors() {
        let v = l2_normalize(vec![3.0, 4.0]).unwrap();
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }

    #[test]
    fn l2_normalize_rejects_zero_vectors() {
        assert!(l2_normalize(vec![0.0; 4]).is_err());
    }

    #[test]
    fn tensor_data_is_channel_first_and_normalized() {
        // A uniform mid-gray image: every plane should be a constant.
        let rgb = RgbImage::from_pixel(INPUT_SIZE, INPUT_SIZE, image::Rgb([128, 128, 128]));
        let data = nchw_tensor_data(&rgb);
        let plane = (INPUT_SIZE * INPUT_SIZE) as usize;
        assert_eq!(data.len(), 3 * plane);

        for ch in 0..3 {
            let expected = ((128.0 / 255.0) - CHANNEL_MEAN[ch]) / CHANNEL_STD[ch];
            assert!((data[ch * plane] - expected).abs() < 1e-6);
            assert!((data[ch * plane + plane - 1] - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn art_crop_excludes_title_and_footer_bands() {
        // Canonical-sized frame: white everywhere except a black header
        // above the art window (first 8.1%) and a black footer below it
        // (from 84.5% down).
        let mut img = RgbImage::from_pixel(488, 680, image::Rgb([255, 255, 255]));
        for y in 0..55 {
            for x in 0..488 {
                img.put_pixel(x, y, image::Rgb([0, 0, 0]));
            }
        }
        for y in 575..680 {
            for x in 0..488 {
                img.put_pixel(x, y, image::Rgb([0, 0, 0]));
            }
        }

        let art = crop_art_region(&DynamicImage::ImageRgb8(img));
        let first = art.get_pixel(art.width() / 2, 0)[0];
        let last = art.get_pixel(art.width() / 2, art.height() - 1)[0];
        assert_eq!(first, 255, "art crop reached into the title band");
        assert_eq!(last, 255, "art crop reached into the footer");
    }
}
