//! Pixel format tags and format descriptor resolution.

use std::fmt;

use super::error::ConverterError;
use super::frame::DepthFrame;

/// Pixel format tag of an image buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit float distance in metres per pixel
    DepthFloat32,
    /// 32-bit float disparity (inverse distance, 1/m) per pixel
    DisparityFloat32,
    /// Single-channel 8-bit intensity (the converter's output format)
    OneComponent8,
    /// Packed 8-bit BGRA
    Bgra32,
}

impl PixelFormat {
    /// Size of one pixel in bytes.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::DepthFloat32 | PixelFormat::DisparityFloat32 => 4,
            PixelFormat::OneComponent8 => 1,
            PixelFormat::Bgra32 => 4,
        }
    }

    /// Whether the converter accepts this format as input.
    pub fn is_depth_input(self) -> bool {
        matches!(
            self,
            PixelFormat::DepthFloat32 | PixelFormat::DisparityFloat32
        )
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::DepthFloat32 => "depth-float32",
            PixelFormat::DisparityFloat32 => "disparity-float32",
            PixelFormat::OneComponent8 => "gray8",
            PixelFormat::Bgra32 => "bgra32",
        };
        f.write_str(name)
    }
}

/// Immutable description of an image buffer's pixel layout.
///
/// Width, height and bytes-per-row are always positive and a row always
/// holds at least `width` pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    format: PixelFormat,
    width: u32,
    height: u32,
    bytes_per_row: usize,
}

impl FormatDescriptor {
    /// Build a descriptor, checking the layout invariants.
    ///
    /// # Errors
    /// * `ConverterError::InvalidLayout` - zero dimension, or a stride that
    ///   cannot hold a full row
    pub fn new(
        format: PixelFormat,
        width: u32,
        height: u32,
        bytes_per_row: usize,
    ) -> Result<Self, ConverterError> {
        if width == 0 || height == 0 {
            return Err(ConverterError::layout(format!(
                "dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        let min_row = (width as usize)
            .checked_mul(format.bytes_per_pixel())
            .ok_or_else(|| ConverterError::layout("row size overflows"))?;
        if bytes_per_row < min_row {
            return Err(ConverterError::layout(format!(
                "bytes per row {} is smaller than {} ({} pixels of {})",
                bytes_per_row, min_row, width, format
            )));
        }
        Ok(Self {
            format,
            width,
            height,
            bytes_per_row,
        })
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes_per_row(&self) -> usize {
        self.bytes_per_row
    }

    /// Width and height as a pair.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Total bytes covered by `height` rows at this stride, or `None` on
    /// overflow.
    pub fn plane_len(&self) -> Option<usize> {
        self.bytes_per_row.checked_mul(self.height as usize)
    }
}

/// Inspect a depth frame and describe its layout.
///
/// Pure inspection: the frame is only borrowed for the duration of the call.
///
/// # Errors
/// * `ConverterError::UnsupportedFormat` - the frame is not a float32 depth
///   or disparity plane
/// * `ConverterError::InvalidLayout` - the declared layout is inconsistent
///   with the frame's data
pub fn resolve(frame: &DepthFrame<'_>) -> Result<FormatDescriptor, ConverterError> {
    if !frame.format().is_depth_input() {
        return Err(ConverterError::UnsupportedFormat(frame.format()));
    }
    let descriptor = FormatDescriptor::new(
        frame.format(),
        frame.width(),
        frame.height(),
        frame.bytes_per_row(),
    )?;
    frame.validate_plane()?;
    Ok(descriptor)
}
