//! Frame to classifier-input conversion.
//!
//! Every frame becomes a `[1, 48, 48, 1]` tensor: nearest-neighbour resize,
//! channel average, scale by 1/255, then min-max contrast stretch over the
//! whole tensor. A flat frame has no contrast to stretch and becomes all zeros.

use image::imageops::{self, FilterType};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

pub const INPUT_SIDE: u32 = 48;
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_SIDE as usize, INPUT_SIDE as usize, 1];

const LOG_TARGET: &str = "preprocess";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
    #[error("image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("tensor data length {actual} does not match shape {shape:?}")]
    LengthMismatch { shape: Vec<usize>, actual: usize },
}

/// Row-major `f32` tensor handed to the classifier.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FaceTensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl FaceTensor {
    pub fn from_raw(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, PreprocessError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(PreprocessError::LengthMismatch {
                shape,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

pub fn preprocess(image: &DynamicImage) -> Result<FaceTensor, PreprocessError> {
    let (width, height) = (image.width(), image.height());
    if width == 0 || height == 0 {
        return Err(PreprocessError::EmptyImage { width, height });
    }

    // 16-bit and alpha inputs are reduced to 8-bit RGB first.
    let rgb = image.to_rgb8();
    let resized = imageops::resize(&rgb, INPUT_SIDE, INPUT_SIDE, FilterType::Nearest);
    drop(rgb);

    let mut data: Vec<f32> = resized
        .pixels()
        .map(|p| {
            let mean = (f32::from(p[0]) + f32::from(p[1]) + f32::from(p[2])) / 3.0;
            mean / 255.0
        })
        .collect();

    stretch_contrast(&mut data);

    Ok(FaceTensor {
        shape: INPUT_SHAPE.to_vec(),
        data,
    })
}

/// In-place `(x - min) / (max - min)`. Zeroes the slice when the range is empty.
pub fn stretch_contrast(data: &mut [f32]) {
    let (min, max) = data
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    let range = max - min;

    if !range.is_finite() || range <= 0.0 {
        tracing::debug!(target: LOG_TARGET, min, max, "degenerate frame, using zero tensor");
        data.fill(0.0);
        return;
    }

    for v in data.iter_mut() {
        *v = (*v - min) / range;
    }
}
