//! Card detection and perspective rectification
//!
//! Finds the card quadrilateral in a cluttered scene and warps it to the
//! canonical 488x680 frontal view the downstream extractors assume. The
//! function is total: when no quad is found the input degrades to a
//! proportion-correct center crop, and undecodable bytes pass through
//! unchanged.

use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::morphology::dilate;
use imageproc::point::Point;
use tracing::debug;

/// Canonical card frame dimensions.
pub const CARD_WIDTH: u32 = 488;
pub const CARD_HEIGHT: u32 = 680;

const JPEG_QUALITY: u8 = 92;
const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
/// A candidate quad must cover at least this share of the scene.
const MIN_QUAD_AREA_RATIO: f64 = 0.05;
/// Polygon approximation tolerance as a share of the contour perimeter.
const APPROX_EPSILON_RATIO: f64 = 0.02;

/// Locate the card in `raw` and return it as a canonical 488x680 JPEG.
///
/// Never fails: when rectification finds no quad the result is the
/// enhanced center crop, and bytes that do not decode are returned as-is.
pub fn detect_and_crop(raw: &[u8]) -> Vec<u8> {
    let Ok(img) = image::load_from_memory(raw) else {
        debug!("scan image did not decode, passing bytes through");
        return raw.to_vec();
    };

    if let Some(bytes) = rectify(&img) {
        return bytes;
    }
    debug!("no card quad found, using center-crop fallback");
    fallback_crop(&img).unwrap_or_else(|| raw.to_vec())
}

/// Primary path: edge map, external contours, largest convex quad,
/// perspective warp onto the canonical frame.
fn rectify(img: &DynamicImage) -> Option<Vec<u8>> {
    let gray = img.to_luma8();
    let blurred = gaussian_blur_f32(&gray, 1.1);
    let edges = canny(&blurred, CANNY_LOW, CANNY_HIGH);
    // One 3x3 dilation pass closes single-pixel gaps in the card outline.
    let closed = dilate(&edges, Norm::LInf, 1);

    let image_area = (gray.width() as f64) * (gray.height() as f64);
    let mut best: Option<(Vec<Point<i32>>, f64)> = None;

    for contour in find_contours::<i32>(&closed)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
    {
        let perimeter = arc_length(&contour.points, true);
        let approx = approximate_polygon_dp(&contour.points, APPROX_EPSILON_RATIO * perimeter, true);
        if approx.len() != 4 || !is_convex(&approx) {
            continue;
        }
        let area = polygon_area(&approx);
        if area < MIN_QUAD_AREA_RATIO * image_area {
            continue;
        }
        if best.as_ref().map_or(true, |(_, best_area)| area > *best_area) {
            best = Some((approx, area));
        }
    }

    let (quad, area) = best?;
    debug!(area = area, "card quad located");

    let corners = order_corners(&quad);
    let projection = Projection::from_control_points(
        corners,
        [
            (0.0, 0.0),
            (CARD_WIDTH as f32, 0.0),
            (CARD_WIDTH as f32, CARD_HEIGHT as f32),
            (0.0, CARD_HEIGHT as f32),
        ],
    )?;

    let rgb = img.to_rgb8();
    let mut out = RgbImage::new(CARD_WIDTH, CARD_HEIGHT);
    warp_into(&rgb, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut out);
    encode_jpeg(&out)
}

/// Fallback path: maximal centered sub-rectangle at the card aspect ratio,
/// mild enhancement, Lanczos resize.
fn fallback_crop(img: &DynamicImage) -> Option<Vec<u8>> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return None;
    }

    let target_ratio = CARD_WIDTH as f64 / CARD_HEIGHT as f64;
    let (crop_w, crop_h) = if (w as f64) / (h as f64) > target_ratio {
        (((h as f64) * target_ratio).round() as u32, h)
    } else {
        (w, ((w as f64) / target_ratio).round() as u32)
    };
    let crop_w = crop_w.clamp(1, w);
    let crop_h = crop_h.clamp(1, h);
    let x = (w - crop_w) / 2;
    let y = (h - crop_h) / 2;

    let cropped = DynamicImage::ImageRgba8(imageops::crop_imm(img, x, y, crop_w, crop_h).to_image())
        .to_rgb8();
    let enhanced = adjust_rgb(&cropped, 1.15, 1.05);
    let sharpened = imageops::unsharpen(&enhanced, 0.8, 2);
    let resized = imageops::resize(&sharpened, CARD_WIDTH, CARD_HEIGHT, FilterType::Lanczos3);
    encode_jpeg(&resized)
}

/// Order quad corners clockwise from top-left using coordinate sums and
/// differences: TL minimizes x+y, BR maximizes it, TR minimizes y-x,
/// BL maximizes y-x.
fn order_corners(quad: &[Point<i32>]) -> [(f32, f32); 4] {
    let as_f32 = |p: &Point<i32>| (p.x as f32, p.y as f32);

    let tl = quad.iter().min_by_key(|p| p.x + p.y).unwrap();
    let br = quad.iter().max_by_key(|p| p.x + p.y).unwrap();
    let tr = quad.iter().min_by_key(|p| p.y - p.x).unwrap();
    let bl = quad.iter().max_by_key(|p| p.y - p.x).unwrap();

    [as_f32(tl), as_f32(tr), as_f32(br), as_f32(bl)]
}

fn is_convex(polygon: &[Point<i32>]) -> bool {
    let n = polygon.len();
    if n < 4 {
        return false;
    }
    let mut sign = 0i64;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        let c = polygon[(i + 2) % n];
        let cross = (b.x - a.x) as i64 * (c.y - b.y) as i64
            - (b.y - a.y) as i64 * (c.x - b.x) as i64;
        if cross == 0 {
            return false;
        }
        if sign == 0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}

fn polygon_area(polygon: &[Point<i32>]) -> f64 {
    let n = polygon.len();
    let mut doubled = 0i64;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        doubled += a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64;
    }
    (doubled.abs() as f64) / 2.0
}

fn adjust_rgb(img: &RgbImage, contrast: f32, brightness: f32) -> RgbImage {
    let mut out = img.clone();
    for pixel in out.pixels_mut() {
        for ch in 0..3 {
            let v = pixel[ch] as f32;
            let adjusted = ((v - 128.0) * contrast + 128.0) * brightness;
            pixel[ch] = adjusted.clamp(0.0, 255.0) as u8;
        }
    }
    out
}

fn encode_jpeg(img: &RgbImage) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    encoder.encode_image(img).ok()?;
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;
    use std::io::Cursor;

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn undecodable_bytes_pass_through() {
        let garbage = b"definitely not an image";
        assert_eq!(detect_and_crop(garbage), garbage.to_vec());
        assert_eq!(detect_and_crop(&[]), Vec::<u8>::new());
    }

    #[test]
    fn decodable_input_always_yields_canonical_frame() {
        // A flat image has no quad; the fallback must still produce 488x680.
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 100, image::Luma([90])));
        let out = detect_and_crop(&png_bytes(&img));
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (CARD_WIDTH, CARD_HEIGHT));
    }

    #[test]
    fn wide_input_also_yields_canonical_frame() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(640, 120, image::Luma([140])));
        let out = detect_and_crop(&png_bytes(&img));
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (CARD_WIDTH, CARD_HEIGHT));
    }

    #[test]
    fn tilted_card_is_rectified_to_canonical_frame() {
        // Bright card-like quad on a dark scene, slightly rotated.
        let mut scene = RgbImage::from_pixel(400, 400, Rgb([10, 10, 10]));
        let quad = [
            Point::new(90i32, 60i32),
            Point::new(310, 80),
            Point::new(300, 350),
            Point::new(80, 330),
        ];
        imageproc::drawing::draw_polygon_mut(&mut scene, &quad, Rgb([235, 235, 235]));

        let out = detect_and_crop(&png_bytes(&DynamicImage::ImageRgb8(scene)));
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (CARD_WIDTH, CARD_HEIGHT));

        // The warped frame should be filled by the bright card face.
        let center = decoded.to_luma8();
        let p = center.get_pixel(CARD_WIDTH / 2, CARD_HEIGHT / 2)[0];
        assert!(p > 128, "expected bright card interior, got {p}");
    }

    #[test]
    fn corner_ordering_is_clockwise_from_top_left() {
        let quad = vec![
            Point::new(300i32, 350i32),
            Point::new(90, 60),
            Point::new(80, 330),
            Point::new(310, 80),
        ];
        let [tl, tr, br, bl] = order_corners(&quad);
        assert_eq!(tl, (90.0, 60.0));
        assert_eq!(tr, (310.0, 80.0));
        assert_eq!(br, (300.0, 350.0));
        assert_eq!(bl, (80.0, 330.0));
    }

    #[test]
    fn convexity_and_area_helpers() {
        let square = vec![
            Point::new(0i32, 0i32),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert!(is_convex(&square));
        assert_eq!(polygon_area(&square), 100.0);

        let dart = vec![
            Point::new(0i32, 0i32),
            Point::new(10, 0),
            Point::new(2, 2),
            Point::new(0, 10),
        ];
        assert!(!is_convex(&dart));
    }
}
