//! Pool-backed depth to grayscale converter.
//!
//! A [`Converter`] is either unprepared or prepared with a format descriptor
//! and a buffer pool. Both live behind one mutex, so a [`Converter::reset`]
//! from another thread can never leave `render` looking at a half torn down
//! pool: `render` takes a snapshot (normalizer plus an acquired buffer)
//! under the lock and runs the pixel kernel after releasing it.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::error::ConverterError;
use super::format::FormatDescriptor;
use super::frame::DepthFrame;
use super::normalize::DepthNormalizer;
use super::pool::{BufferPool, GrayImage};

/// Retained buffer count covering one frame of producer latency, one in
/// conversion and one held downstream.
pub const DEFAULT_RETAINED_BUFFERS: NonZeroUsize = match NonZeroUsize::new(3) {
    Some(n) => n,
    None => unreachable!(),
};

#[derive(Debug)]
struct Prepared {
    descriptor: FormatDescriptor,
    pool: BufferPool,
    retained_buffers: NonZeroUsize,
}

#[derive(Debug, Default)]
enum ConverterState {
    #[default]
    Unprepared,
    Prepared(Prepared),
}

/// Converts float32 depth frames into single-channel 8-bit images.
///
/// All methods take `&self`; share the converter with `Arc` between the
/// processing thread and whoever handles lifecycle events.
#[derive(Debug)]
pub struct Converter {
    normalizer: DepthNormalizer,
    state: Mutex<ConverterState>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(DepthNormalizer::default())
    }
}

impl Converter {
    /// Create an unprepared converter.
    pub fn new(normalizer: DepthNormalizer) -> Self {
        Self {
            normalizer,
            state: Mutex::new(ConverterState::Unprepared),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConverterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn normalizer(&self) -> DepthNormalizer {
        self.normalizer
    }

    pub fn is_prepared(&self) -> bool {
        matches!(*self.lock(), ConverterState::Prepared(_))
    }

    /// The descriptor captured by the last `prepare`, if prepared.
    pub fn descriptor(&self) -> Option<FormatDescriptor> {
        match &*self.lock() {
            ConverterState::Prepared(p) => Some(p.descriptor),
            ConverterState::Unprepared => None,
        }
    }

    /// A handle to the current output pool, if prepared.
    pub fn pool(&self) -> Option<BufferPool> {
        match &*self.lock() {
            ConverterState::Prepared(p) => Some(p.pool.clone()),
            ConverterState::Unprepared => None,
        }
    }

    /// The retained buffer count given to the last `prepare`, if prepared.
    pub fn retained_buffers(&self) -> Option<NonZeroUsize> {
        match &*self.lock() {
            ConverterState::Prepared(p) => Some(p.retained_buffers),
            ConverterState::Unprepared => None,
        }
    }

    /// Allocate an output pool for frames described by `descriptor`.
    ///
    /// Replaces any previous preparation. Images still held from the
    /// previous pool stay valid but are no longer recycled.
    ///
    /// # Errors
    /// * `ConverterError::UnsupportedFormat` - `descriptor` is not a depth
    ///   or disparity format
    /// * `ConverterError::PoolAllocationFailed` - the pool cannot be
    ///   allocated; the previous state is kept
    pub fn prepare(
        &self,
        descriptor: &FormatDescriptor,
        retained_buffers: NonZeroUsize,
    ) -> Result<(), ConverterError> {
        if !descriptor.format().is_depth_input() {
            return Err(ConverterError::UnsupportedFormat(descriptor.format()));
        }
        // Allocate before taking the lock so render is not held up
        let pool = BufferPool::new(descriptor, retained_buffers)?;

        let previous = std::mem::replace(
            &mut *self.lock(),
            ConverterState::Prepared(Prepared {
                descriptor: *descriptor,
                pool,
                retained_buffers,
            }),
        );
        if let ConverterState::Prepared(old) = previous {
            old.pool.retire();
        }

        log::debug!(
            "Converter prepared for {}x{} {} with {} retained buffer(s)",
            descriptor.width(),
            descriptor.height(),
            descriptor.format(),
            retained_buffers
        );
        Ok(())
    }

    /// Convert one depth frame.
    ///
    /// The frame is only borrowed for this call. The returned image goes
    /// back to the pool when dropped or released.
    ///
    /// # Errors
    /// * `ConverterError::NotPrepared` - `prepare` has not been called
    ///   since construction or the last `reset`
    /// * `ConverterError::FormatMismatch` - frame dimensions differ from
    ///   the prepared descriptor
    /// * `ConverterError::PixelFormatMismatch` - the frame carries a
    ///   different sample format than the prepared descriptor
    /// * `ConverterError::InvalidLayout` - the frame is not a valid plane
    /// * `ConverterError::PoolExhausted` - every output buffer is checked out
    ///
    /// On error the converter state is unchanged.
    pub fn render(&self, frame: &DepthFrame<'_>) -> Result<GrayImage, ConverterError> {
        let mut image = {
            let state = self.lock();
            let prepared = match &*state {
                ConverterState::Prepared(p) => p,
                ConverterState::Unprepared => return Err(ConverterError::NotPrepared),
            };
            let expected = prepared.descriptor.dimensions();
            let actual = (frame.width(), frame.height());
            if expected != actual {
                return Err(ConverterError::FormatMismatch { expected, actual });
            }
            let expected = prepared.descriptor.format();
            if frame.format() != expected {
                return Err(ConverterError::PixelFormatMismatch {
                    expected,
                    actual: frame.format(),
                });
            }
            frame.validate_plane()?;
            prepared.pool.acquire()?
        };

        convert_plane(frame, &self.normalizer, &mut image);
        Ok(image)
    }

    /// Drop the pool and descriptor and return to the unprepared state.
    ///
    /// Safe to call from any thread, including while another thread is in
    /// `render`. That render finishes against the pool it started with;
    /// later renders fail with `NotPrepared`.
    pub fn reset(&self) {
        let previous = std::mem::take(&mut *self.lock());
        if let ConverterState::Prepared(old) = previous {
            old.pool.retire();
            log::debug!(
                "Converter reset ({} buffer(s) still held by callers)",
                old.pool.outstanding()
            );
        }
    }
}

/// Pixel kernel: normalize every sample into `image`, honoring both strides.
fn convert_plane(frame: &DepthFrame<'_>, normalizer: &DepthNormalizer, image: &mut GrayImage) {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let out_stride = image.bytes_per_row();
    let format = frame.format();
    let out = image.data_mut();

    for y in 0..height {
        let row = &mut out[y * out_stride..(y + 1) * out_stride];
        let (pixels, padding) = row.split_at_mut(width);
        normalizer.normalize_row(frame.row(y), format, pixels);
        padding.fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::format::{PixelFormat, resolve};
    use crate::depth::frame::DepthMap;
    use crate::depth::normalize::DepthRange;

    fn converter() -> Converter {
        Converter::new(DepthNormalizer::new(DepthRange::new(0.2, 1.5).unwrap(), false))
    }

    fn prepared(map: &DepthMap, buffers: usize) -> Converter {
        let c = converter();
        let desc = resolve(&map.as_frame()).unwrap();
        c.prepare(&desc, NonZeroUsize::new(buffers).unwrap()).unwrap();
        c
    }

    #[test]
    fn test_new_is_unprepared() {
        let c = converter();
        assert!(!c.is_prepared());
        assert!(c.descriptor().is_none());
        assert!(c.pool().is_none());
    }

    #[test]
    fn test_render_unprepared() {
        let map = DepthMap::filled(4, 4, 1.0);
        assert_eq!(
            converter().render(&map.as_frame()).unwrap_err(),
            ConverterError::NotPrepared
        );
    }

    #[test]
    fn test_prepare_rejects_output_format() {
        let desc = FormatDescriptor::new(PixelFormat::OneComponent8, 4, 4, 16).unwrap();
        let c = converter();
        assert_eq!(
            c.prepare(&desc, DEFAULT_RETAINED_BUFFERS).unwrap_err(),
            ConverterError::UnsupportedFormat(PixelFormat::OneComponent8)
        );
        assert!(!c.is_prepared());
    }

    #[test]
    fn test_render_fills_rows_and_padding() {
        let map = DepthMap::new(vec![0.2, 1.5, 10.0], 3, 1, PixelFormat::DepthFloat32);
        let c = prepared(&map, 1);
        let image = c.render(&map.as_frame()).unwrap();
        assert_eq!(image.bytes_per_row(), 16);
        assert_eq!(image.row(0), &[0, 255, 255]);
        assert!(image.data()[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_render_strided_input() {
        // Two valid samples per row followed by one padding sample
        let data = vec![0.2, 1.5, f32::NAN, 1.5, 0.2, f32::NAN];
        let map = DepthMap {
            data,
            width: 2,
            height: 2,
            bytes_per_row: 12,
            format: PixelFormat::DepthFloat32,
        };
        let c = prepared(&map, 1);
        let image = c.render(&map.as_frame()).unwrap();
        assert_eq!(image.to_packed(), vec![0, 255, 255, 0]);
    }

    #[test]
    fn test_format_mismatch_keeps_state() {
        let map = DepthMap::filled(4, 4, 1.0);
        let c = prepared(&map, 2);
        let other = DepthMap::filled(8, 4, 1.0);
        assert_eq!(
            c.render(&other.as_frame()).unwrap_err(),
            ConverterError::FormatMismatch {
                expected: (4, 4),
                actual: (8, 4)
            }
        );
        assert!(c.is_prepared());
        assert_eq!(c.pool().unwrap().outstanding(), 0);
        assert!(c.render(&map.as_frame()).is_ok());
    }

    #[test]
    fn test_pixel_format_mismatch_keeps_state() {
        let depth = DepthMap::filled(2, 2, 1.0);
        let c = prepared(&depth, 1);
        let disparity = DepthMap::new(vec![1.0; 4], 2, 2, PixelFormat::DisparityFloat32);
        assert_eq!(
            c.render(&disparity.as_frame()).unwrap_err(),
            ConverterError::PixelFormatMismatch {
                expected: PixelFormat::DepthFloat32,
                actual: PixelFormat::DisparityFloat32,
            }
        );
        assert_eq!(c.pool().unwrap().outstanding(), 0);
        assert_eq!(c.descriptor().unwrap().format(), PixelFormat::DepthFloat32);
        assert!(c.render(&depth.as_frame()).is_ok());
    }

    #[test]
    fn test_reprepare_retires_old_pool() {
        let map = DepthMap::filled(2, 2, 1.0);
        let c = prepared(&map, 1);
        let held = c.render(&map.as_frame()).unwrap();
        let old_pool = c.pool().unwrap();
        let desc = c.descriptor().unwrap();
        c.prepare(&desc, NonZeroUsize::new(1).unwrap()).unwrap();
        assert!(old_pool.is_retired());
        assert!(!held.is_pooled());
        // The fresh pool is not exhausted by the image held from the old one
        assert!(c.render(&map.as_frame()).is_ok());
    }

    #[test]
    fn test_reset() {
        let map = DepthMap::filled(2, 2, 1.0);
        let c = prepared(&map, 3);
        let held = c.render(&map.as_frame()).unwrap();
        c.reset();
        assert!(!c.is_prepared());
        assert!(c.descriptor().is_none());
        assert_eq!(
            c.render(&map.as_frame()).unwrap_err(),
            ConverterError::NotPrepared
        );
        // Held image is still readable after reset
        assert_eq!(held.to_packed().len(), 4);
    }

    #[test]
    fn test_reset_unprepared_is_noop() {
        let c = converter();
        c.reset();
        assert!(!c.is_prepared());
    }

    #[test]
    fn test_disparity_render() {
        // Disparity 2.0 is 0.5 m, 0.5 is 2 m (clamped), 0 is dropout
        let map = DepthMap::new(vec![2.0, 0.5, 0.0], 3, 1, PixelFormat::DisparityFloat32);
        let c = prepared(&map, 1);
        let image = c.render(&map.as_frame()).unwrap();
        let range = DepthRange::new(0.2, 1.5).unwrap();
        let expected_near = crate::depth::normalize::normalize(0.5, range);
        assert_eq!(image.row(0), &[expected_near, 255, 0]);
    }

    #[test]
    fn test_disparity_render_tiny_positive_is_far() {
        let map = DepthMap::new(vec![1e-39, 0.5], 2, 1, PixelFormat::DisparityFloat32);
        let c = prepared(&map, 1);
        let image = c.render(&map.as_frame()).unwrap();
        assert_eq!(image.row(0), &[255, 255]);
    }
}
