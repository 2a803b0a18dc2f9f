//! Depth to grayscale conversion.
//!
//! This module provides the conversion core:
//! - Format inspection via [`resolve`] and [`FormatDescriptor`]
//! - Output buffer recycling via [`BufferPool`] and [`GrayImage`]
//! - Depth normalization via [`DepthNormalizer`]
//! - The prepare / render / reset state machine via [`Converter`]

mod converter;
mod error;
mod format;
mod frame;
mod normalize;
mod pool;

pub use converter::{Converter, DEFAULT_RETAINED_BUFFERS};
pub use error::ConverterError;
pub use format::{FormatDescriptor, PixelFormat, resolve};
pub use frame::{DepthFrame, DepthMap};
pub use normalize::{
    DEFAULT_MAX_DEPTH, DEFAULT_MIN_DEPTH, DepthNormalizer, DepthRange, SENTINEL_INTENSITY,
    normalize, sample_to_depth,
};
pub use pool::{BufferPool, GrayImage, OUTPUT_ROW_ALIGNMENT};
