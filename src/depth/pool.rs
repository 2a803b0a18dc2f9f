//! Bounded pool of reusable grayscale output buffers.
//!
//! The pool pre-allocates `capacity` buffers of one fixed layout and hands
//! them out as [`GrayImage`]s. Dropping (or explicitly releasing) an image
//! puts its buffer back on the free list. At most `capacity` images are
//! checked out at any time; acquiring beyond that fails immediately with
//! `PoolExhausted` rather than blocking.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::error::ConverterError;
use super::format::{FormatDescriptor, PixelFormat};

/// Output rows are padded to a multiple of this many bytes.
pub const OUTPUT_ROW_ALIGNMENT: usize = 16;

/// Free list and checkout accounting.
#[derive(Debug)]
struct PoolState {
    free: Vec<Vec<u8>>,
    outstanding: usize,
    /// Set on retire; released buffers are dropped instead of recycled
    retired: bool,
}

#[derive(Debug)]
struct PoolShared {
    descriptor: FormatDescriptor,
    capacity: usize,
    state: Mutex<PoolState>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Every critical section leaves the state consistent
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn buffer_len(&self) -> usize {
        self.descriptor.bytes_per_row() * self.descriptor.height() as usize
    }

    fn give_back(&self, buffer: Vec<u8>) {
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        if !state.retired {
            state.free.push(buffer);
        }
    }

    fn forget(&self) {
        let mut state = self.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
    }
}

/// Thread-safe pool of single-channel 8-bit buffers.
///
/// Cloning the pool yields another handle to the same buffers.
#[derive(Debug, Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create a pool of `capacity` gray8 buffers matching the width and
    /// height of `source`.
    ///
    /// Every buffer is allocated and zero-filled here, so all of the pool's
    /// pages are committed before the first frame. `PoolAllocationFailed`
    /// only covers a refused reservation; on a host that overcommits memory
    /// the reservation succeeds and an oversized pool is instead stopped by
    /// the OS when the pages are touched. Callers converting untrusted
    /// dimensions should bound width, height and capacity first.
    ///
    /// # Errors
    /// * `ConverterError::PoolAllocationFailed` - the buffers cannot be
    ///   allocated
    pub fn new(source: &FormatDescriptor, capacity: NonZeroUsize) -> Result<Self, ConverterError> {
        let count = capacity.get();
        let width = source.width() as usize;
        let bytes_per_row = width
            .checked_next_multiple_of(OUTPUT_ROW_ALIGNMENT)
            .unwrap_or(usize::MAX);
        let descriptor = FormatDescriptor::new(
            PixelFormat::OneComponent8,
            source.width(),
            source.height(),
            bytes_per_row,
        )?;
        let bytes = descriptor.plane_len().unwrap_or(usize::MAX);
        let failed = || ConverterError::PoolAllocationFailed { count, bytes };

        if bytes == usize::MAX || bytes.checked_mul(count).is_none() {
            return Err(failed());
        }
        let mut free = Vec::new();
        free.try_reserve_exact(count).map_err(|_| failed())?;
        for _ in 0..count {
            free.push(allocate(bytes).ok_or_else(failed)?);
        }

        log::debug!(
            "Created buffer pool: {} x {}x{} gray8 (stride {})",
            count,
            descriptor.width(),
            descriptor.height(),
            descriptor.bytes_per_row()
        );

        Ok(Self {
            shared: Arc::new(PoolShared {
                descriptor,
                capacity: count,
                state: Mutex::new(PoolState {
                    free,
                    outstanding: 0,
                    retired: false,
                }),
            }),
        })
    }

    /// Layout of every buffer this pool hands out.
    pub fn descriptor(&self) -> &FormatDescriptor {
        &self.shared.descriptor
    }

    /// Maximum number of buffers checked out at once.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of buffers currently checked out.
    pub fn outstanding(&self) -> usize {
        self.shared.lock().outstanding
    }

    /// Number of buffers that can be acquired right now.
    pub fn available(&self) -> usize {
        let state = self.shared.lock();
        if state.retired {
            0
        } else {
            self.shared.capacity - state.outstanding
        }
    }

    /// Whether the pool has been retired by a converter reset.
    pub fn is_retired(&self) -> bool {
        self.shared.lock().retired
    }

    /// Check out a buffer.
    ///
    /// Buffer contents are whatever the previous holder left; the converter
    /// overwrites every byte.
    ///
    /// # Errors
    /// * `ConverterError::PoolExhausted` - `capacity` buffers are already out
    /// * `ConverterError::NotPrepared` - the pool has been retired
    /// * `ConverterError::PoolAllocationFailed` - a detached buffer could
    ///   not be replaced
    pub fn acquire(&self) -> Result<GrayImage, ConverterError> {
        let mut state = self.shared.lock();
        if state.retired {
            return Err(ConverterError::NotPrepared);
        }
        if state.outstanding >= self.shared.capacity {
            return Err(ConverterError::PoolExhausted {
                capacity: self.shared.capacity,
            });
        }
        let data = match state.free.pop() {
            Some(buffer) => buffer,
            None => {
                // Only reached after a holder detached its buffer
                let bytes = self.shared.buffer_len();
                allocate(bytes).ok_or(ConverterError::PoolAllocationFailed { count: 1, bytes })?
            }
        };
        state.outstanding += 1;
        Ok(GrayImage {
            data,
            descriptor: self.shared.descriptor,
            pool: Some(Arc::downgrade(&self.shared)),
        })
    }

    /// Stop recycling: drop free buffers and let outstanding images become
    /// ordinary owned buffers.
    pub fn retire(&self) {
        let mut state = self.shared.lock();
        state.retired = true;
        state.free.clear();
        state.free.shrink_to_fit();
    }
}

/// Reserve and zero-fill `bytes`. The fill writes every page.
fn allocate(bytes: usize) -> Option<Vec<u8>> {
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(bytes).ok()?;
    buffer.resize(bytes, 0);
    Some(buffer)
}

/// A single-channel 8-bit image, usually backed by a [`BufferPool`].
///
/// Dropping the image or calling [`GrayImage::release`] returns its buffer
/// to the pool. If the pool was retired in the meantime the buffer is
/// simply freed.
#[derive(Debug)]
pub struct GrayImage {
    data: Vec<u8>,
    descriptor: FormatDescriptor,
    pool: Option<Weak<PoolShared>>,
}

impl GrayImage {
    pub fn width(&self) -> u32 {
        self.descriptor.width()
    }

    pub fn height(&self) -> u32 {
        self.descriptor.height()
    }

    /// Distance between row starts in bytes (may exceed the width).
    pub fn bytes_per_row(&self) -> usize {
        self.descriptor.bytes_per_row()
    }

    pub fn descriptor(&self) -> &FormatDescriptor {
        &self.descriptor
    }

    /// The whole plane, including row padding.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Pixels of row `y`, without padding.
    ///
    /// # Panics
    /// If `y >= height`.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.bytes_per_row();
        &self.data[start..start + self.width() as usize]
    }

    /// Intensity at (`x`, `y`), or `None` if out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        Some(self.data[y as usize * self.bytes_per_row() + x as usize])
    }

    /// Copy the pixels into a tightly packed `width * height` vector.
    pub fn to_packed(&self) -> Vec<u8> {
        let mut packed = Vec::with_capacity(self.width() as usize * self.height() as usize);
        for y in 0..self.height() {
            packed.extend_from_slice(self.row(y));
        }
        packed
    }

    /// Whether releasing this image will recycle its buffer.
    pub fn is_pooled(&self) -> bool {
        match self.pool.as_ref().and_then(Weak::upgrade) {
            Some(shared) => {
                let retired = shared.lock().retired;
                !retired
            }
            None => false,
        }
    }

    /// Return the buffer to its pool.
    pub fn release(self) {
        drop(self);
    }

    /// Take ownership of the buffer instead of returning it.
    ///
    /// Detaching does not shrink the pool. The slot counts as free again
    /// straight away and the pool allocates a fresh buffer for it on a
    /// later acquire, so up to `capacity` images can still be outstanding.
    pub fn detach(mut self) -> Vec<u8> {
        if let Some(shared) = self.pool.take().and_then(|weak| weak.upgrade()) {
            shared.forget();
        }
        std::mem::take(&mut self.data)
    }
}

impl Drop for GrayImage {
    fn drop(&mut self) {
        if let Some(shared) = self.pool.take().and_then(|weak| weak.upgrade()) {
            shared.give_back(std::mem::take(&mut self.data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(width: u32, height: u32) -> FormatDescriptor {
        FormatDescriptor::new(PixelFormat::DepthFloat32, width, height, width as usize * 4).unwrap()
    }

    fn cap(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn test_output_layout() {
        let pool = BufferPool::new(&source(20, 3), cap(2)).unwrap();
        let desc = pool.descriptor();
        assert_eq!(desc.format(), PixelFormat::OneComponent8);
        assert_eq!(desc.dimensions(), (20, 3));
        assert_eq!(desc.bytes_per_row(), 32);
    }

    #[test]
    fn test_new_commits_zeroed_buffers() {
        let pool = BufferPool::new(&source(5, 2), cap(3)).unwrap();
        assert_eq!(pool.shared.lock().free.len(), 3);
        let image = pool.acquire().unwrap();
        assert_eq!(image.data().len(), 16 * 2);
        assert!(image.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_acquire_until_exhausted() {
        let pool = BufferPool::new(&source(4, 4), cap(3)).unwrap();
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let c = pool.acquire().unwrap();
        assert_eq!(pool.outstanding(), 3);
        assert_eq!(pool.available(), 0);
        assert_eq!(
            pool.acquire().unwrap_err(),
            ConverterError::PoolExhausted { capacity: 3 }
        );
        drop((a, b, c));
    }

    #[test]
    fn test_release_recycles() {
        let pool = BufferPool::new(&source(4, 4), cap(1)).unwrap();
        let image = pool.acquire().unwrap();
        let ptr = image.data().as_ptr();
        image.release();
        assert_eq!(pool.outstanding(), 0);
        let again = pool.acquire().unwrap();
        assert_eq!(again.data().as_ptr(), ptr);
    }

    #[test]
    fn test_drop_returns_buffer() {
        let pool = BufferPool::new(&source(4, 4), cap(1)).unwrap();
        {
            let _image = pool.acquire().unwrap();
            assert_eq!(pool.available(), 0);
        }
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_detach_frees_slot() {
        let pool = BufferPool::new(&source(4, 4), cap(1)).unwrap();
        let image = pool.acquire().unwrap();
        assert_eq!(pool.available(), 0);
        let owned = image.detach();
        assert_eq!(owned.len(), 16 * 4);
        assert_eq!(pool.outstanding(), 0);
        // Availability is restored, not reduced
        assert_eq!(pool.available(), pool.capacity());
        // Replacement buffer is allocated on demand
        let replacement = pool.acquire().unwrap();
        assert_eq!(replacement.data().len(), 16 * 4);
    }

    #[test]
    fn test_retire_degrades_outstanding() {
        let pool = BufferPool::new(&source(4, 4), cap(2)).unwrap();
        let image = pool.acquire().unwrap();
        assert!(image.is_pooled());
        pool.retire();
        assert!(!image.is_pooled());
        assert_eq!(image.width(), 4);
        image.release();
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.acquire().unwrap_err(), ConverterError::NotPrepared);
    }

    #[test]
    fn test_image_outlives_pool() {
        let pool = BufferPool::new(&source(2, 2), cap(1)).unwrap();
        let image = pool.acquire().unwrap();
        drop(pool);
        assert!(!image.is_pooled());
        assert_eq!(image.to_packed().len(), 4);
    }

    #[test]
    fn test_allocation_failure() {
        let huge = FormatDescriptor::new(
            PixelFormat::DepthFloat32,
            u32::MAX,
            u32::MAX,
            u32::MAX as usize * 4,
        )
        .unwrap();
        assert!(matches!(
            BufferPool::new(&huge, cap(2)),
            Err(ConverterError::PoolAllocationFailed { count: 2, .. })
        ));
    }

    #[test]
    fn test_pixel_bounds() {
        let pool = BufferPool::new(&source(3, 2), cap(1)).unwrap();
        let image = pool.acquire().unwrap();
        assert_eq!(image.pixel(2, 1), Some(0));
        assert_eq!(image.pixel(3, 0), None);
        assert_eq!(image.pixel(0, 2), None);
    }

    #[test]
    fn test_concurrent_acquire_release() {
        let pool = BufferPool::new(&source(8, 8), cap(4)).unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        if let Ok(image) = pool.acquire() {
                            assert!(pool.outstanding() <= 4);
                            image.release();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.available(), 4);
    }
}
