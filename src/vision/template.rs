//! Normalized cross-correlation template matching.

use image::{GrayImage, RgbImage};
use std::path::Path;

use crate::error::ConfigError;

/// Score a window must reach to count as a match.
pub const MATCH_THRESHOLD: f32 = 0.9;

#[derive(Debug, Clone)]
pub struct Template {
    width: u32,
    height: u32,
    // Template pixels minus their mean
    centred: Vec<f32>,
    norm: f32,
}

impl Template {
    pub fn new(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        let n = (width * height).max(1) as f32;
        let mean = image.pixels().map(|p| p[0] as f32).sum::<f32>() / n;
        let centred: Vec<f32> = image.pixels().map(|p| p[0] as f32 - mean).collect();
        let norm = centred.iter().map(|v| v * v).sum::<f32>().sqrt();
        Self {
            width,
            height,
            centred,
            norm,
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let image = image::open(path).map_err(|e| ConfigError::Template {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Self::new(&image.to_luma8()))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Centres of every non-overlapping window scoring at least `threshold`,
    /// ordered left to right.
    pub fn find_matches(&self, haystack: &GrayImage, threshold: f32) -> Vec<(u32, u32)> {
        let (hw, hh) = haystack.dimensions();
        let (tw, th) = (self.width, self.height);
        if tw == 0 || th == 0 || tw > hw || th > hh || self.norm == 0.0 {
            return Vec::new();
        }

        let integral = Integral::new(haystack);
        let n = (tw * th) as f64;
        let mut hits: Vec<(f32, u32, u32)> = Vec::new();

        for y in 0..=hh - th {
            for x in 0..=hw - tw {
                let (sum, sum_sq) = integral.window(x, y, tw, th);
                let variance = sum_sq - sum * sum / n;
                if variance <= f64::EPSILON {
                    continue;
                }
                // The template is zero-mean, so the window mean drops out of the cross term
                let mut cross = 0f32;
                for ty in 0..th {
                    let row = (ty * tw) as usize;
                    for tx in 0..tw {
                        cross += self.centred[row + tx as usize] * haystack.get_pixel(x + tx, y + ty)[0] as f32;
                    }
                }
                let score = cross / (self.norm * variance.sqrt() as f32);
                if score >= threshold {
                    hits.push((score, x, y));
                }
            }
        }

        hits.sort_by(|a, b| b.0.total_cmp(&a.0));
        let mut kept: Vec<(u32, u32)> = Vec::new();
        for (_, x, y) in hits {
            let overlaps = kept.iter().any(|&(kx, ky)| kx.abs_diff(x) < tw && ky.abs_diff(y) < th);
            if !overlaps {
                kept.push((x, y));
            }
        }

        let mut centres: Vec<(u32, u32)> = kept.into_iter().map(|(x, y)| (x + tw / 2, y + th / 2)).collect();
        centres.sort();
        centres
    }

    /// Leftmost match in the top eighth of `frame`.
    pub fn locate_in_top_band(&self, frame: &RgbImage) -> Option<(u32, u32)> {
        let band_height = frame.height() / 8;
        if band_height == 0 {
            return None;
        }
        let band = image::imageops::crop_imm(frame, 0, 0, frame.width(), band_height).to_image();
        let gray = image::imageops::grayscale(&band);
        self.find_matches(&gray, MATCH_THRESHOLD).into_iter().next()
    }
}

/// Summed-area tables of pixel values and squared pixel values.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Integral {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0f64; stride * (h + 1)];
        let mut sum_sq = vec![0f64; stride * (h + 1)];
        for y in 0..h {
            let mut row = 0f64;
            let mut row_sq = 0f64;
            for x in 0..w {
                let v = image.get_pixel(x as u32, y as u32)[0] as f64;
                row += v;
                row_sq += v * v;
                let i = (y + 1) * stride + x + 1;
                sum[i] = sum[i - stride] + row;
                sum_sq[i] = sum_sq[i - stride] + row_sq;
            }
        }
        Self { stride, sum, sum_sq }
    }

    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let at = |t: &[f64], x: usize, y: usize| t[y * self.stride + x];
        let rect = |t: &[f64]| at(t, x1, y1) - at(t, x0, y1) - at(t, x1, y0) + at(t, x0, y0);
        (rect(&self.sum), rect(&self.sum_sq))
    }
}
