//! Depth frame views and owned depth maps.

use super::error::ConverterError;
use super::format::PixelFormat;

const SAMPLE_SIZE: usize = std::mem::size_of::<f32>();

/// A borrowed float32 depth plane, valid for the duration of one conversion.
///
/// Rows are `bytes_per_row` apart; only the first `width` samples of each
/// row are image data.
#[derive(Debug, Clone, Copy)]
pub struct DepthFrame<'a> {
    data: &'a [f32],
    width: u32,
    height: u32,
    bytes_per_row: usize,
    format: PixelFormat,
}

impl<'a> DepthFrame<'a> {
    /// Wrap a tightly packed plane (no row padding).
    pub fn new(data: &'a [f32], width: u32, height: u32, format: PixelFormat) -> Self {
        Self::with_stride(data, width, height, width as usize * SAMPLE_SIZE, format)
    }

    /// Wrap a plane whose rows are `bytes_per_row` apart.
    pub fn with_stride(
        data: &'a [f32],
        width: u32,
        height: u32,
        bytes_per_row: usize,
        format: PixelFormat,
    ) -> Self {
        Self {
            data,
            width,
            height,
            bytes_per_row,
            format,
        }
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

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Check that the declared stride and dimensions fit inside the plane.
    pub fn validate_plane(&self) -> Result<(), ConverterError> {
        if self.bytes_per_row % SAMPLE_SIZE != 0 {
            return Err(ConverterError::layout(format!(
                "bytes per row {} is not a multiple of the {}-byte sample size",
                self.bytes_per_row, SAMPLE_SIZE
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConverterError::layout(format!(
                "dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        let stride = self.row_stride();
        if stride < self.width as usize {
            return Err(ConverterError::layout(format!(
                "stride of {} samples cannot hold {} pixels",
                stride, self.width
            )));
        }
        let required = (self.height as usize - 1)
            .checked_mul(stride)
            .and_then(|n| n.checked_add(self.width as usize))
            .ok_or_else(|| ConverterError::layout("plane size overflows"))?;
        if self.data.len() < required {
            return Err(ConverterError::layout(format!(
                "plane holds {} samples, {}x{} at stride {} needs {}",
                self.data.len(),
                self.width,
                self.height,
                stride,
                required
            )));
        }
        Ok(())
    }

    /// Distance between row starts, in samples.
    pub(crate) fn row_stride(&self) -> usize {
        self.bytes_per_row / SAMPLE_SIZE
    }

    /// Samples of row `y`. The plane must have passed `validate_plane`.
    pub(crate) fn row(&self, y: usize) -> &'a [f32] {
        let start = y * self.row_stride();
        &self.data[start..start + self.width as usize]
    }
}

/// An owned depth plane, for handing frames across threads or loading them
/// from raw files.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthMap {
    pub data: Vec<f32>,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: usize,
    pub format: PixelFormat,
}

impl DepthMap {
    /// Create a tightly packed depth map.
    pub fn new(data: Vec<f32>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            bytes_per_row: width as usize * SAMPLE_SIZE,
            format,
        }
    }

    /// Create a `width` x `height` depth map with every sample set to `value`.
    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        let count = width as usize * height as usize;
        Self::new(vec![value; count], width, height, PixelFormat::DepthFloat32)
    }

    /// Decode raw little-endian float32 bytes.
    ///
    /// `bytes_per_row` defaults to a tightly packed row.
    ///
    /// # Errors
    /// * `ConverterError::InvalidLayout` - the byte count is not a whole
    ///   number of samples or is too short for the declared layout
    pub fn from_le_bytes(
        bytes: &[u8],
        width: u32,
        height: u32,
        bytes_per_row: Option<usize>,
        format: PixelFormat,
    ) -> Result<Self, ConverterError> {
        if bytes.len() % SAMPLE_SIZE != 0 {
            return Err(ConverterError::layout(format!(
                "{} bytes is not a whole number of float32 samples",
                bytes.len()
            )));
        }
        let data: Vec<f32> = bytes
            .chunks_exact(SAMPLE_SIZE)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        let map = Self {
            data,
            width,
            height,
            bytes_per_row: bytes_per_row.unwrap_or(width as usize * SAMPLE_SIZE),
            format,
        };
        map.as_frame().validate_plane()?;
        Ok(map)
    }

    /// Borrow this map as a frame.
    pub fn as_frame(&self) -> DepthFrame<'_> {
        DepthFrame::with_stride(
            &self.data,
            self.width,
            self.height,
            self.bytes_per_row,
            self.format,
        )
    }
}
