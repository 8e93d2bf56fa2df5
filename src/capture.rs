//! Frame capture to disk: raw HDR color as OpenEXR, or tone-mapped PNG.

use image::{ImageBuffer, Rgba, Rgba32FImage, RgbaImage};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Mid-grey the presentation pass maps the average luminance to.
pub const KEY_VALUE: f32 = 0.18;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Frame is {width}x{height} but holds {actual} floats, expected {expected}")]
    Size {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("Failed to encode capture: {0}")]
    Image(#[from] image::ImageError),
    #[error("Failed to create capture directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Linear RGBA color read back from the color field.
#[derive(Debug, Clone)]
pub struct HdrFrame {
    pub width: u32,
    pub height: u32,
    pub texels: Vec<f32>,
}

impl HdrFrame {
    pub fn new(width: u32, height: u32, texels: Vec<f32>) -> Result<Self, CaptureError> {
        let expected = width as usize * height as usize * 4;
        if texels.len() != expected {
            return Err(CaptureError::Size {
                width,
                height,
                expected,
                actual: texels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            texels,
        })
    }

    pub fn to_rgba32f(&self) -> Rgba32FImage {
        ImageBuffer::<Rgba<f32>, Vec<f32>>::from_raw(self.width, self.height, self.texels.clone())
            .unwrap_or_else(|| ImageBuffer::new(self.width, self.height))
    }

    /// Log-average luminance, matching what the auto-exposure reduction computes.
    pub fn average_luminance(&self) -> f32 {
        let (sum, count) = self
            .texels
            .par_chunks_exact(4)
            .map(|c| {
                let lum = crate::analysis::luminance([c[0], c[1], c[2], c[3]]);
                ((lum + 1e-4).log2(), 1.0f32)
            })
            .reduce(|| (0.0, 0.0), |a, b| (a.0 + b.0, a.1 + b.1));
        if count == 0.0 {
            0.0
        } else {
            (sum / count).exp2()
        }
    }

    /// Exponential tone map plus gamma, the same curve the presentation pass applies.
    pub fn tone_map(&self, exposure: f32) -> RgbaImage {
        let mut bytes = vec![0u8; self.texels.len()];
        bytes
            .par_chunks_exact_mut(4)
            .zip(self.texels.par_chunks_exact(4))
            .for_each(|(out, texel)| {
                for c in 0..3 {
                    out[c] = encode_channel(texel[c], exposure);
                }
                out[3] = 255;
            });
        RgbaImage::from_raw(self.width, self.height, bytes)
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }
}

pub fn exposure_scale(average_luminance: f32) -> f32 {
    KEY_VALUE / average_luminance.max(1e-4)
}

fn encode_channel(value: f32, exposure: f32) -> u8 {
    let mapped = 1.0 - (-value.max(0.0) * exposure).exp();
    (mapped.powf(1.0 / 2.2) * 255.0 + 0.5).clamp(0.0, 255.0) as u8
}

/// Writes numbered captures into one directory.
#[derive(Debug)]
pub struct FrameCapture {
    dir: PathBuf,
    next: usize,
}

impl FrameCapture {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            next: 0,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn captured(&self) -> usize {
        self.next
    }

    fn next_path(&mut self, extension: &str) -> Result<PathBuf, CaptureError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{}.{extension}", self.next));
        self.next += 1;
        Ok(path)
    }

    pub fn save_exr(&mut self, frame: &HdrFrame) -> Result<PathBuf, CaptureError> {
        let path = self.next_path("exr")?;
        frame.to_rgba32f().save(&path)?;
        log::debug!("Captured {}", path.display());
        Ok(path)
    }

    /// Tone-maps with auto exposure derived from the frame itself.
    pub fn save_png(&mut self, frame: &HdrFrame) -> Result<PathBuf, CaptureError> {
        let path = self.next_path("png")?;
        let exposure = exposure_scale(frame.average_luminance());
        frame.tone_map(exposure).save(&path)?;
        log::debug!("Exported {}", path.display());
        Ok(path)
    }
}
