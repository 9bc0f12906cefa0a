//! Separable blur used to soften exponential shadow maps.
//!
//! A 2D kernel is applied as two 1D passes, horizontal first and vertical second,
//! on every layer of a layered image independently.

use anyhow::{Context, Result};
use image::{GrayImage, Luma};
use std::path::Path;
use thiserror::Error;

pub const SUPPORTED_KERNEL_WIDTHS: [u32; 8] = [1, 3, 5, 7, 9, 11, 13, 15];
pub const MAX_KERNEL_RADIUS: usize = 7;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlurError {
    #[error("unsupported blur kernel width {0}; supported widths are 1, 3, 5, 7, 9, 11, 13 and 15")]
    UnsupportedKernelWidth(u32),
    #[error("layered image data has {actual} texels, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("layer {layer} is out of range for an image with {layers} layer(s)")]
    LayerOutOfRange { layer: usize, layers: usize },
}

/// Gaussian-equivalent kernels built from binomial coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlurKernel {
    Identity,
    Gaussian3x3,
    Gaussian5x5,
    #[default]
    Gaussian7x7,
    Gaussian9x9,
    Gaussian11x11,
    Gaussian13x13,
    Gaussian15x15,
}

impl BlurKernel {
    pub fn from_width(width: u32) -> Result<Self, BlurError> {
        match width {
            1 => Ok(Self::Identity),
            3 => Ok(Self::Gaussian3x3),
            5 => Ok(Self::Gaussian5x5),
            7 => Ok(Self::Gaussian7x7),
            9 => Ok(Self::Gaussian9x9),
            11 => Ok(Self::Gaussian11x11),
            13 => Ok(Self::Gaussian13x13),
            15 => Ok(Self::Gaussian15x15),
            other => Err(BlurError::UnsupportedKernelWidth(other)),
        }
    }

    pub fn width(self) -> u32 {
        match self {
            Self::Identity => 1,
            Self::Gaussian3x3 => 3,
            Self::Gaussian5x5 => 5,
            Self::Gaussian7x7 => 7,
            Self::Gaussian9x9 => 9,
            Self::Gaussian11x11 => 11,
            Self::Gaussian13x13 => 13,
            Self::Gaussian15x15 => 15,
        }
    }

    pub fn radius(self) -> usize {
        (self.width() as usize - 1) / 2
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Identity => "1x1 (no blur)",
            Self::Gaussian3x3 => "3x3 Gaussian",
            Self::Gaussian5x5 => "5x5 Gaussian",
            Self::Gaussian7x7 => "7x7 Gaussian",
            Self::Gaussian9x9 => "9x9 Gaussian",
            Self::Gaussian11x11 => "11x11 Gaussian",
            Self::Gaussian13x13 => "13x13 Gaussian",
            Self::Gaussian15x15 => "15x15 Gaussian",
        }
    }

    /// Weights for offsets `0..=radius`; offset `i > 0` applies on both sides of the center.
    pub fn half_weights(self) -> [f32; MAX_KERNEL_RADIUS + 1] {
        let n = self.width() as usize - 1;
        let total = (1u64 << n) as f64;
        let mut weights = [0.0f32; MAX_KERNEL_RADIUS + 1];
        let radius = self.radius();
        for (offset, weight) in weights.iter_mut().enumerate().take(radius + 1) {
            *weight = (binomial(n, radius + offset) as f64 / total) as f32;
        }
        weights
    }

    /// Full symmetric tap list, left to right.
    pub fn taps(self) -> Vec<f32> {
        let half = self.half_weights();
        let radius = self.radius() as isize;
        (-radius..=radius).map(|offset| half[offset.unsigned_abs()]).collect()
    }
}

fn binomial(n: usize, k: usize) -> u64 {
    let k = k.min(n - k);
    (0..k).fold(1u64, |acc, i| acc * (n - i) as u64 / (i + 1) as u64)
}

/// `layers` stacked single-channel images of `width * height` texels each.
#[derive(Debug, Clone, PartialEq)]
pub struct LayeredImage {
    width: usize,
    height: usize,
    layers: usize,
    data: Vec<f32>,
}

impl LayeredImage {
    pub fn new(width: usize, height: usize, layers: usize) -> Self {
        Self { width, height, layers, data: vec![0.0; width * height * layers] }
    }

    pub fn from_data(width: usize, height: usize, layers: usize, data: Vec<f32>) -> Result<Self, BlurError> {
        let expected = width * height * layers;
        if data.len() != expected {
            return Err(BlurError::SizeMismatch { expected, actual: data.len() });
        }
        Ok(Self { width, height, layers, data })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn layers(&self) -> usize {
        self.layers
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    fn index(&self, x: usize, y: usize, layer: usize) -> usize {
        (layer * self.height + y) * self.width + x
    }

    pub fn get(&self, x: usize, y: usize, layer: usize) -> f32 {
        self.data[self.index(x, y, layer)]
    }

    pub fn set(&mut self, x: usize, y: usize, layer: usize, value: f32) {
        let index = self.index(x, y, layer);
        self.data[index] = value;
    }

    pub fn layer(&self, layer: usize) -> Result<&[f32], BlurError> {
        if layer >= self.layers {
            return Err(BlurError::LayerOutOfRange { layer, layers: self.layers });
        }
        let size = self.width * self.height;
        Ok(&self.data[layer * size..(layer + 1) * size])
    }

    /// Writes one layer as an 8-bit grayscale PNG, stretched to the layer's value range.
    pub fn save_layer_png(&self, layer: usize, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let values = self.layer(layer)?;
        let (min, max) = values
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), value| (lo.min(*value), hi.max(*value)));
        let range = (max - min).max(f32::EPSILON);
        let mut img = GrayImage::new(self.width as u32, self.height as u32);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            let value = self.get(x as usize, y as usize, layer);
            *pixel = Luma([(((value - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8]);
        }
        img.save(path).with_context(|| format!("Failed to write shadow layer preview {}", path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlurAxis {
    Horizontal,
    Vertical,
}

impl BlurAxis {
    pub fn direction(self) -> [i32; 2] {
        match self {
            BlurAxis::Horizontal => [1, 0],
            BlurAxis::Vertical => [0, 1],
        }
    }
}

/// CPU reference of the two-pass filter. Edges clamp, layers never mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SeparableBlur {
    kernel: BlurKernel,
}

impl SeparableBlur {
    pub fn new(kernel: BlurKernel) -> Self {
        Self { kernel }
    }

    pub fn from_width(width: u32) -> Result<Self, BlurError> {
        Ok(Self::new(BlurKernel::from_width(width)?))
    }

    pub fn kernel(&self) -> BlurKernel {
        self.kernel
    }

    pub fn apply(&self, source: &LayeredImage) -> LayeredImage {
        let intermediate = self.pass(source, BlurAxis::Horizontal);
        self.pass(&intermediate, BlurAxis::Vertical)
    }

    pub fn pass(&self, source: &LayeredImage, axis: BlurAxis) -> LayeredImage {
        let weights = self.kernel.half_weights();
        let radius = self.kernel.radius() as isize;
        let [dx, dy] = axis.direction();
        let max_x = source.width as isize - 1;
        let max_y = source.height as isize - 1;
        let mut output = LayeredImage::new(source.width, source.height, source.layers);
        for layer in 0..source.layers {
            for y in 0..source.height {
                for x in 0..source.width {
                    let sample = |offset: isize| {
                        let sx = (x as isize + offset * dx as isize).clamp(0, max_x) as usize;
                        let sy = (y as isize + offset * dy as isize).clamp(0, max_y) as usize;
                        source.get(sx, sy, layer)
                    };
                    let mut sum = sample(0) * weights[0];
                    for offset in 1..=radius {
                        sum += (sample(offset) + sample(-offset)) * weights[offset as usize];
                    }
                    output.set(x, y, layer, sum);
                }
            }
        }
        output
    }
}
