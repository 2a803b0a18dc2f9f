//! Depth to 8-bit intensity normalization.
//!
//! Depth is clamped to a fixed `[min, max]` range and linearly rescaled to
//! `0..=255`. No per-frame min/max scan is performed, so the same distance
//! always maps to the same intensity across frames.

use super::error::ConverterError;
use super::format::PixelFormat;

/// Default near bound in metres.
pub const DEFAULT_MIN_DEPTH: f32 = 0.2;

/// Default far bound in metres.
pub const DEFAULT_MAX_DEPTH: f32 = 1.5;

/// Intensity written for NaN, infinite or otherwise missing samples.
pub const SENTINEL_INTENSITY: u8 = 0;

/// Normalization range in distance units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRange {
    min: f32,
    max: f32,
}

impl DepthRange {
    /// # Errors
    /// * `ConverterError::InvalidRange` - a bound is not finite or `min >= max`
    pub fn new(min: f32, max: f32) -> Result<Self, ConverterError> {
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(ConverterError::InvalidRange { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }
}

impl Default for DepthRange {
    fn default() -> Self {
        Self {
            min: DEFAULT_MIN_DEPTH,
            max: DEFAULT_MAX_DEPTH,
        }
    }
}

/// Map a depth value to an 8-bit intensity.
///
/// Values at or below `range.min()` give 0, values at or above
/// `range.max()` give 255, and values in between are rounded to the nearest
/// step. Non-finite input gives [`SENTINEL_INTENSITY`].
#[inline]
pub fn normalize(depth: f32, range: DepthRange) -> u8 {
    if !depth.is_finite() {
        return SENTINEL_INTENSITY;
    }
    let clamped = depth.clamp(range.min, range.max);
    let t = (clamped - range.min) / (range.max - range.min);
    (t * 255.0).round() as u8
}

/// Convert a raw sample of the given format to a depth in metres.
///
/// Disparity is inverse distance; zero or negative disparity has no
/// distance and becomes NaN. A positive disparity too small to invert
/// saturates at `f32::MAX`, so it reads as far rather than as dropout.
#[inline]
pub fn sample_to_depth(sample: f32, format: PixelFormat) -> f32 {
    match format {
        PixelFormat::DisparityFloat32 => {
            if sample > 0.0 {
                (1.0 / sample).min(f32::MAX)
            } else {
                f32::NAN
            }
        }
        _ => sample,
    }
}

/// Normalization settings applied by the converter to every pixel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DepthNormalizer {
    pub range: DepthRange,
    /// Map near to bright instead of dark
    pub invert: bool,
}

impl DepthNormalizer {
    pub fn new(range: DepthRange, invert: bool) -> Self {
        Self { range, invert }
    }

    /// Intensity for a depth value in metres.
    #[inline]
    pub fn intensity(&self, depth: f32) -> u8 {
        if !depth.is_finite() {
            return SENTINEL_INTENSITY;
        }
        let value = normalize(depth, self.range);
        if self.invert { 255 - value } else { value }
    }

    /// Intensity for a raw sample of `format`.
    #[inline]
    pub fn intensity_of_sample(&self, sample: f32, format: PixelFormat) -> u8 {
        self.intensity(sample_to_depth(sample, format))
    }

    /// Normalize one row of samples into `out`.
    pub fn normalize_row(&self, samples: &[f32], format: PixelFormat, out: &mut [u8]) {
        for (dst, &sample) in out.iter_mut().zip(samples) {
            *dst = self.intensity_of_sample(sample, format);
        }
    }
}
