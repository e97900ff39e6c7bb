//! Pixel-level preprocessing for the puzzle overlay.

use image::{imageops, GrayImage, Rgb, RgbImage};

use super::classifier::BoundingBox;

/// Rows above this are the status bar, never the overlay.
pub const REGION_TOP: u32 = 120;

/// Hue band (OpenCV 0..180 scale) covering orange through green arrows.
pub const HUE_BAND: (u8, u8) = (1, 75);
pub const MIN_SATURATION: u8 = 100;
pub const MIN_VALUE: u8 = 100;

pub const CANNY_LOW: f32 = 200.0;
pub const CANNY_HIGH: f32 = 300.0;

/// Top band of the frame, rows `REGION_TOP..h/2`, dropping a quarter of the
/// width on each side. `None` when the frame is too small to contain it.
pub fn puzzle_region(frame: &RgbImage) -> Option<RgbImage> {
    let (w, h) = frame.dimensions();
    let bottom = h / 2;
    let (left, right) = (w / 4, 3 * w / 4);
    if bottom <= REGION_TOP || right <= left {
        return None;
    }
    Some(imageops::crop_imm(frame, left, REGION_TOP, right - left, bottom - REGION_TOP).to_image())
}

/// 8-bit HSV the way OpenCV computes it: H in 0..180, S and V in 0..=255.
pub fn to_hsv(px: &Rgb<u8>) -> (u8, u8, u8) {
    let [r, g, b] = px.0;
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = v - min;

    let s = if v > 0.0 { delta / v * 255.0 } else { 0.0 };
    let mut hue = if delta == 0.0 {
        0.0
    } else if v == r {
        60.0 * (g - b) / delta
    } else if v == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if hue < 0.0 {
        hue += 360.0;
    }
    ((hue / 2.0).round() as u8, s.round() as u8, v as u8)
}

/// Black out every pixel outside the arrow hue band.
pub fn filter_hue(image: &RgbImage) -> RgbImage {
    let mut out = RgbImage::new(image.width(), image.height());
    for (x, y, px) in image.enumerate_pixels() {
        let (h, s, v) = to_hsv(px);
        if (HUE_BAND.0..=HUE_BAND.1).contains(&h) && s >= MIN_SATURATION && v >= MIN_VALUE {
            out.put_pixel(x, y, *px);
        }
    }
    out
}

/// Canny edge map (3x3 Sobel, L1 magnitude, non-maximum suppression,
/// hysteresis), replicated into three channels.
pub fn canny(image: &RgbImage, low: f32, high: f32) -> RgbImage {
    let (w, h) = image.dimensions();
    let mut out = RgbImage::new(w, h);
    if w < 3 || h < 3 {
        return out;
    }

    let gray = imageops::grayscale(image);
    let (mag, dir) = sobel(&gray);
    let (w, h) = (w as usize, h as usize);

    // Non-maximum suppression
    let mut thin = vec![0f32; w * h];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = y * w + x;
            let m = mag[i];
            if m <= low {
                continue;
            }
            let (a, b) = match dir[i] {
                0 => (mag[i - 1], mag[i + 1]),
                45 => (mag[i - w - 1], mag[i + w + 1]),
                90 => (mag[i - w], mag[i + w]),
                _ => (mag[i - w + 1], mag[i + w - 1]),
            };
            if m > a && m >= b {
                thin[i] = m;
            }
        }
    }

    // Hysteresis: grow strong edges through weak neighbours
    let mut edge = vec![false; w * h];
    let mut stack: Vec<usize> = (0..w * h).filter(|&i| thin[i] > high).collect();
    for &i in &stack {
        edge[i] = true;
    }
    while let Some(i) = stack.pop() {
        let (x, y) = (i % w, i / w);
        for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                let j = ny * w + nx;
                if !edge[j] && thin[j] > low {
                    edge[j] = true;
                    stack.push(j);
                }
            }
        }
    }

    for (i, _) in edge.iter().enumerate().filter(|(_, e)| **e) {
        out.put_pixel((i % w) as u32, (i / w) as u32, Rgb([255, 255, 255]));
    }
    out
}

/// Gradient magnitude and direction quantized to 0/45/90/135 degrees.
fn sobel(gray: &GrayImage) -> (Vec<f32>, Vec<u16>) {
    let (w, h) = (gray.width() as usize, gray.height() as usize);
    let px = |x: usize, y: usize| gray.get_pixel(x as u32, y as u32)[0] as f32;
    let mut mag = vec![0f32; w * h];
    let mut dir = vec![0u16; w * h];

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = (px(x + 1, y - 1) + 2.0 * px(x + 1, y) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x - 1, y) + px(x - 1, y + 1));
            let gy = (px(x - 1, y + 1) + 2.0 * px(x, y + 1) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2.0 * px(x, y - 1) + px(x + 1, y - 1));
            let i = y * w + x;
            mag[i] = gx.abs() + gy.abs();

            let mut angle = gy.atan2(gx).to_degrees();
            if angle < 0.0 {
                angle += 180.0;
            }
            dir[i] = if !(22.5..157.5).contains(&angle) {
                0
            } else if angle < 67.5 {
                45
            } else if angle < 112.5 {
                90
            } else {
                135
            };
        }
    }
    (mag, dir)
}

/// Hue filter followed by edge extraction.
pub fn preprocess(region: &RgbImage) -> RgbImage {
    canny(&filter_hue(region), CANNY_LOW, CANNY_HIGH)
}

/// Crop `image` to a normalized box. `None` if the box is degenerate.
pub fn crop_box(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let scale = |v: f32, max: f32| (v * max).round().clamp(0.0, max) as u32;
    let (left, right) = (scale(bbox.xmin, w), scale(bbox.xmax, w));
    let (top, bottom) = (scale(bbox.ymin, h), scale(bbox.ymax, h));
    if right <= left || bottom <= top {
        return None;
    }
    Some(imageops::crop_imm(image, left, top, right - left, bottom - top).to_image())
}

/// Centre `image` on a black `width` x `height` canvas. `None` if it does not
/// fit on either axis.
pub fn pad_centered(image: &RgbImage, width: u32, height: u32) -> Option<RgbImage> {
    let (w, h) = image.dimensions();
    if w > width || h > height {
        return None;
    }
    let (dx, dy) = ((width - w) / 2, (height - h) / 2);
    let mut canvas = RgbImage::new(width, height);
    for (x, y, px) in image.enumerate_pixels() {
        canvas.put_pixel(x + dx, y + dy, *px);
    }
    Some(canvas)
}

/// Rotate 90 degrees counter-clockwise.
pub fn rotate_ccw(image: &RgbImage) -> RgbImage {
    imageops::rotate270(image)
}
