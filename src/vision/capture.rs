use image::RgbImage;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CaptureSettings;
use crate::error::EnvironmentError;

/// Source of environment frames.
pub trait Capture: Send + Sync {
    /// Most recent frame. Consumers must tolerate staleness.
    fn frame(&self) -> Result<Arc<RgbImage>, EnvironmentError>;
    /// Screen position of the frame's top-left corner.
    fn window_origin(&self) -> (i32, i32);
}

/// Single-slot frame buffer: the grabber overwrites, readers clone the `Arc`.
#[derive(Debug, Default)]
pub struct LatestFrame {
    slot: RwLock<Option<Arc<RgbImage>>>,
    origin: (i32, i32),
}

impl LatestFrame {
    pub fn new(origin: (i32, i32)) -> Self {
        Self {
            slot: RwLock::new(None),
            origin,
        }
    }

    pub fn publish(&self, frame: RgbImage) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(frame));
    }
}

impl Capture for LatestFrame {
    fn frame(&self) -> Result<Arc<RgbImage>, EnvironmentError> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(EnvironmentError::FrameUnavailable)
    }

    fn window_origin(&self) -> (i32, i32) {
        self.origin
    }
}

/// Periodic primary-monitor capture cropped to the environment window.
pub struct ScreenGrabber {
    target: Arc<LatestFrame>,
    region: CaptureSettings,
}

impl ScreenGrabber {
    pub fn new(target: Arc<LatestFrame>, region: CaptureSettings) -> Self {
        Self { target, region }
    }

    /// Run the capture loop. Blocking; give it a dedicated OS thread.
    pub fn run(self) {
        info!(
            "Screen grabber started ({}x{} at {},{} every {} ms)",
            self.region.width, self.region.height, self.region.left, self.region.top, self.region.interval_ms
        );
        let interval = Duration::from_millis(self.region.interval_ms.max(1));
        let mut failing = false;

        loop {
            match self.grab() {
                Ok(frame) => {
                    if failing {
                        info!("Screen capture recovered");
                        failing = false;
                    }
                    self.target.publish(frame);
                }
                Err(e) if failing => debug!("Screen capture still failing: {}", e),
                Err(e) => {
                    // No frame is not a new frame: the slot keeps the last good one
                    warn!("Screen capture failed: {}", e);
                    failing = true;
                }
            }
            std::thread::sleep(interval);
        }
    }

    fn grab(&self) -> Result<RgbImage, EnvironmentError> {
        let monitor = xcap::Monitor::all()
            .map_err(|e| EnvironmentError::Capture(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| EnvironmentError::Capture("no monitor found".to_string()))?;
        let shot = monitor
            .capture_image()
            .map_err(|e| EnvironmentError::Capture(e.to_string()))?;

        let (width, height) = (shot.width(), shot.height());
        let screen = rgba_to_rgb(width, height, shot.into_raw())?;
        self.crop_to_window(&screen)
    }

    fn crop_to_window(&self, screen: &RgbImage) -> Result<RgbImage, EnvironmentError> {
        let left = self.region.left.max(0) as u32;
        let top = self.region.top.max(0) as u32;
        if left >= screen.width() || top >= screen.height() {
            return Err(EnvironmentError::Capture(format!(
                "window origin ({}, {}) is off screen",
                self.region.left, self.region.top
            )));
        }
        let width = self.region.width.min(screen.width() - left);
        let height = self.region.height.min(screen.height() - top);
        Ok(image::imageops::crop_imm(screen, left, top, width, height).to_image())
    }
}

fn rgba_to_rgb(width: u32, height: u32, raw: Vec<u8>) -> Result<RgbImage, EnvironmentError> {
    let rgb: Vec<u8> = raw.chunks_exact(4).flat_map(|px| [px[0], px[1], px[2]]).collect();
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| EnvironmentError::Capture("frame buffer size mismatch".to_string()))
}
