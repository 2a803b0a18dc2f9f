//! Error types for depth conversion.

use super::format::PixelFormat;

/// Errors reported by format resolution, pool management and the converter.
///
/// Every failure is surfaced to the immediate caller. Invalid individual
/// samples (NaN, infinity) are never reported here; they map to the
/// sentinel intensity instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConverterError {
    #[error("Unsupported pixel format {0:?}: expected a float32 depth or disparity plane")]
    UnsupportedFormat(PixelFormat),

    #[error("Invalid buffer layout: {reason}")]
    InvalidLayout {
        /// What was wrong with the declared layout
        reason: String,
    },

    #[error(
        "Frame is {}x{} but converter was prepared for {}x{}",
        .actual.0, .actual.1, .expected.0, .expected.1
    )]
    FormatMismatch {
        /// Width and height of the prepared descriptor
        expected: (u32, u32),
        /// Width and height of the incoming frame
        actual: (u32, u32),
    },

    #[error("Frame is {actual} but converter was prepared for {expected}")]
    PixelFormatMismatch {
        /// Sample format of the prepared descriptor
        expected: PixelFormat,
        /// Sample format of the incoming frame
        actual: PixelFormat,
    },

    #[error("Converter is not prepared; call prepare() first")]
    NotPrepared,

    #[error("Failed to allocate {count} output buffer(s) of {bytes} bytes")]
    PoolAllocationFailed {
        /// Number of buffers requested
        count: usize,
        /// Size of each buffer in bytes
        bytes: usize,
    },

    #[error("All {capacity} output buffer(s) are checked out")]
    PoolExhausted {
        /// Capacity the pool was created with
        capacity: usize,
    },

    #[error("Invalid depth range [{min}, {max}]: bounds must be finite and min < max")]
    InvalidRange { min: f32, max: f32 },
}

impl ConverterError {
    pub(crate) fn layout(reason: impl Into<String>) -> Self {
        ConverterError::InvalidLayout {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mismatch_display() {
        let err = ConverterError::FormatMismatch {
            expected: (640, 480),
            actual: (320, 240),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("320x240"));
        assert!(msg.contains("640x480"));
    }

    #[test]
    fn test_pixel_format_mismatch_display() {
        let err = ConverterError::PixelFormatMismatch {
            expected: PixelFormat::DepthFloat32,
            actual: PixelFormat::DisparityFloat32,
        };
        assert_eq!(
            format!("{}", err),
            "Frame is disparity-float32 but converter was prepared for depth-float32"
        );
    }

    #[test]
    fn test_pool_exhausted_display() {
        let msg = format!("{}", ConverterError::PoolExhausted { capacity: 3 });
        assert_eq!(msg, "All 3 output buffer(s) are checked out");
    }

    #[test]
    fn test_unsupported_format_display() {
        let msg = format!("{}", ConverterError::UnsupportedFormat(PixelFormat::Bgra32));
        assert!(msg.contains("Bgra32"));
    }

    #[test]
    fn test_not_prepared_display() {
        assert!(format!("{}", ConverterError::NotPrepared).contains("prepare()"));
    }
}
