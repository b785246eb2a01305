//! Screen capture: full planner-facing captures (grid overlay + downscale)
//! and cheap grayscale frames for click verification.

use std::io::Cursor;
use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageOutputFormat, Rgb, RgbImage};

use crate::screen::{CaptureMetadata, GridSpec};

/// One planner-facing capture: encoded image plus the geometry the
/// orchestrator feeds to the Coordinate Mapper.
#[derive(Debug, Clone)]
pub struct Capture {
    pub png: Vec<u8>,
    pub meta: CaptureMetadata,
}

#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn capture(&self, with_grid: bool, all_monitors: bool) -> Result<Capture>;
}

/// Grayscale frame grabs for before/after action verification. Kept separate
/// from `CaptureProvider` so the blocking script executor can use it without
/// an async hop, and so "no diff backend available" is representable.
pub trait FrameSource: Send + Sync {
    fn grab_gray(&self) -> Result<GrayImage>;
}

/// Downscale applied to planner captures to keep vision token usage down.
const SCALE_FACTOR: f64 = 0.75;

const MINOR_COLOR: Rgb<u8> = Rgb([200, 200, 200]);
const MAJOR_COLOR: Rgb<u8> = Rgb([120, 120, 120]);

/// `screencapture`-backed provider (macOS). The command itself is the
/// platform boundary; on other platforms it fails with a spawn error the
/// orchestrator reports as a capture failure.
pub struct ScreencaptureProvider;

impl ScreencaptureProvider {
    fn grab_raw(all_monitors: bool) -> Result<DynamicImage> {
        let path: PathBuf =
            std::env::temp_dir().join(format!("screen_agent_{}.png", uuid::Uuid::new_v4()));
        let mut cmd = Command::new("screencapture");
        cmd.arg("-x").arg("-t").arg("png");
        if !all_monitors {
            cmd.arg("-m");
        }
        cmd.arg(&path);
        let status = cmd.status().context("Failed to run screencapture")?;
        if !status.success() {
            return Err(anyhow::anyhow!("screencapture exited with {}", status));
        }
        let bytes = std::fs::read(&path).context("Failed to read captured image")?;
        let _ = std::fs::remove_file(&path);
        image::load_from_memory(&bytes).context("Failed to decode captured image")
    }

    fn process(img: DynamicImage, with_grid: bool, all_monitors: bool) -> Result<Capture> {
        let mut rgb = img.to_rgb8();
        let (width, height) = (rgb.width(), rgb.height());
        let grid = GridSpec::default();
        if with_grid {
            draw_grid(&mut rgb, grid);
        }

        let new_w = ((width as f64) * SCALE_FACTOR) as u32;
        let new_h = ((height as f64) * SCALE_FACTOR) as u32;
        let resized = image::imageops::resize(
            &rgb,
            new_w.max(1),
            new_h.max(1),
            image::imageops::FilterType::Lanczos3,
        );

        let mut png = Vec::new();
        DynamicImage::ImageRgb8(resized)
            .write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)
            .context("Failed to encode capture as PNG")?;

        Ok(Capture {
            png,
            meta: CaptureMetadata {
                width,
                height,
                origin_left: 0,
                origin_top: 0,
                capture_mode: if all_monitors { "all" } else { "primary" }.to_string(),
                grid,
                scale: SCALE_FACTOR,
            },
        })
    }
}

#[async_trait]
impl CaptureProvider for ScreencaptureProvider {
    async fn capture(&self, with_grid: bool, all_monitors: bool) -> Result<Capture> {
        let img = tokio::task::spawn_blocking(move || Self::grab_raw(all_monitors))
            .await
            .context("capture task panicked")??;
        Self::process(img, with_grid, all_monitors)
    }
}

impl FrameSource for ScreencaptureProvider {
    fn grab_gray(&self) -> Result<GrayImage> {
        Ok(Self::grab_raw(false)?.to_luma8())
    }
}

/// Label-free coordinate grid: minor lines every `grid.minor` px (1px wide),
/// major lines every `grid.major` px (2px, overdrawn for emphasis).
fn draw_grid(img: &mut RgbImage, grid: GridSpec) {
    let (w, h) = (img.width(), img.height());
    for x in (0..w).step_by(grid.minor as usize) {
        draw_vline(img, x, 1, MINOR_COLOR);
    }
    for y in (0..h).step_by(grid.minor as usize) {
        draw_hline(img, y, 1, MINOR_COLOR);
    }
    for x in (0..w).step_by(grid.major as usize) {
        draw_vline(img, x, 2, MAJOR_COLOR);
    }
    for y in (0..h).step_by(grid.major as usize) {
        draw_hline(img, y, 2, MAJOR_COLOR);
    }
}

fn draw_vline(img: &mut RgbImage, x: u32, width: u32, color: Rgb<u8>) {
    for dx in 0..width {
        let x = x + dx;
        if x >= img.width() {
            break;
        }
        for y in 0..img.height() {
            img.put_pixel(x, y, color);
        }
    }
}

fn draw_hline(img: &mut RgbImage, y: u32, width: u32, color: Rgb<u8>) {
    for dy in 0..width {
        let y = y + dy;
        if y >= img.height() {
            break;
        }
        for x in 0..img.width() {
            img.put_pixel(x, y, color);
        }
    }
}
