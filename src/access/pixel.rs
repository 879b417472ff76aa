//! Typed element access on top of a read or write accessor.
//!
//! A [`PixelAccessor`] interprets the bytes held by an accessor as elements
//! of type `T` laid out row-major over `D` axes:
//!
//! ```text
//! offset(i) = i[0] + i[1]·e0 + i[2]·e0·e1 + i[3]·e0·e1·e2 + ...
//! ```
//!
//! Element type and dimensionality are checked once, at construction.

use std::marker::PhantomData;
use std::mem::size_of;
use std::ptr;
use std::sync::Arc;

use super::read::ImageReadAccessor;
use super::write::ImageWriteAccessor;
use crate::data::BufferItem;
use crate::error::{AccessError, ImageError};
use crate::geometry::Point3;
use crate::image::ImageContainer;
use crate::pixel::{PixelElement, PixelFormat};

// =============================================================================
// Access traits
// =============================================================================

/// Something holding arbitrated access to image bytes.
pub trait ImageAccess {
    fn image(&self) -> &ImageContainer;
    fn item(&self) -> &Arc<BufferItem>;
    /// Whether the bytes are all of channel 0 rather than one item.
    fn covers_whole_image(&self) -> bool;
    fn data(&self) -> &[u8];
}

/// Arbitrated access that may also write.
pub trait ImageAccessMut: ImageAccess {
    fn data_mut(&mut self) -> &mut [u8];
}

impl ImageAccess for ImageReadAccessor<'_> {
    fn image(&self) -> &ImageContainer {
        ImageReadAccessor::image(self)
    }

    fn item(&self) -> &Arc<BufferItem> {
        ImageReadAccessor::item(self)
    }

    fn covers_whole_image(&self) -> bool {
        ImageReadAccessor::covers_whole_image(self)
    }

    fn data(&self) -> &[u8] {
        ImageReadAccessor::data(self)
    }
}

impl ImageAccess for ImageWriteAccessor<'_> {
    fn image(&self) -> &ImageContainer {
        ImageWriteAccessor::image(self)
    }

    fn item(&self) -> &Arc<BufferItem> {
        ImageWriteAccessor::item(self)
    }

    fn covers_whole_image(&self) -> bool {
        ImageWriteAccessor::covers_whole_image(self)
    }

    fn data(&self) -> &[u8] {
        ImageWriteAccessor::data(self)
    }
}

impl ImageAccessMut for ImageWriteAccessor<'_> {
    fn data_mut(&mut self) -> &mut [u8] {
        ImageWriteAccessor::data_mut(self)
    }
}

impl<A: ImageAccess + ?Sized> ImageAccess for &A {
    fn image(&self) -> &ImageContainer {
        (**self).image()
    }

    fn item(&self) -> &Arc<BufferItem> {
        (**self).item()
    }

    fn covers_whole_image(&self) -> bool {
        (**self).covers_whole_image()
    }

    fn data(&self) -> &[u8] {
        (**self).data()
    }
}

impl<A: ImageAccess + ?Sized> ImageAccess for &mut A {
    fn image(&self) -> &ImageContainer {
        (**self).image()
    }

    fn item(&self) -> &Arc<BufferItem> {
        (**self).item()
    }

    fn covers_whole_image(&self) -> bool {
        (**self).covers_whole_image()
    }

    fn data(&self) -> &[u8] {
        (**self).data()
    }
}

impl<A: ImageAccessMut + ?Sized> ImageAccessMut for &mut A {
    fn data_mut(&mut self) -> &mut [u8] {
        (**self).data_mut()
    }
}

// =============================================================================
// Pixel accessor
// =============================================================================

/// Typed, `D`-dimensional element view over an accessor.
///
/// Works with owned accessors as well as borrowed ones:
///
/// ```no_run
/// use voxelcore::{AccessOptions, ImageContainer, ImageWriteAccessor, PixelAccessor, PixelFormat};
///
/// let mut image = ImageContainer::new();
/// image.initialize(PixelFormat::of::<f32>(), &[32, 32, 8], 1).unwrap();
///
/// let mut writer = ImageWriteAccessor::new(&image, AccessOptions::NONE).unwrap();
/// let mut pixels = PixelAccessor::<_, f32, 3>::new(&mut writer).unwrap();
/// pixels.set_by_index([1, 2, 3], 0.5);
/// assert_eq!(pixels.get_by_index([1, 2, 3]), 0.5);
/// ```
pub struct PixelAccessor<A, T, const D: usize> {
    access: A,
    extents: [u32; D],
    strides: [usize; D],
    _element: PhantomData<T>,
}

impl<A: ImageAccess, T: PixelElement, const D: usize> PixelAccessor<A, T, D> {
    /// Wrap `access`.
    ///
    /// `D` must equal the image dimension when the accessor covers the whole
    /// image, or the item dimension otherwise. `T` must match the pixel
    /// format of the accessed data exactly.
    pub fn new(access: A) -> Result<Self, AccessError> {
        let item = access.item();
        let expected = if access.covers_whole_image() {
            access.image().dimension()
        } else {
            item.dimension()
        };
        if D != expected {
            return Err(AccessError::DimensionMismatch {
                expected,
                actual: D,
            });
        }

        let format = item.pixel_format();
        let requested = PixelFormat::of::<T>();
        if format != requested {
            return Err(AccessError::TypeMismatch {
                expected: format,
                actual: requested,
            });
        }

        let mut extents = [1u32; D];
        let mut strides = [0usize; D];
        let mut stride = 1usize;
        for axis in 0..D {
            extents[axis] = item.extent(axis);
            strides[axis] = stride;
            stride *= extents[axis] as usize;
        }

        Ok(Self {
            access,
            extents,
            strides,
            _element: PhantomData,
        })
    }

    /// Extents of the accessed data.
    pub fn extents(&self) -> [u32; D] {
        self.extents
    }

    /// The wrapped accessor.
    pub fn access(&self) -> &A {
        &self.access
    }

    /// Unwrap, returning the accessor.
    pub fn into_inner(self) -> A {
        self.access
    }

    fn byte_offset(&self, index: [u32; D]) -> usize {
        let element: usize = index
            .iter()
            .zip(&self.strides)
            .map(|(&i, &stride)| i as usize * stride)
            .sum();
        element * size_of::<T>()
    }

    fn checked_byte_offset(&self, index: [u32; D]) -> Result<usize, AccessError> {
        let size = self.access.data().len();
        let out_of_range = |offset| AccessError::OutOfRange { offset, size };
        let mut element = 0usize;
        for (&i, &stride) in index.iter().zip(&self.strides) {
            element = (i as usize)
                .checked_mul(stride)
                .and_then(|step| element.checked_add(step))
                .ok_or(out_of_range(usize::MAX))?;
        }
        let offset = element.checked_mul(size_of::<T>()).ok_or(out_of_range(usize::MAX))?;
        match offset.checked_add(size_of::<T>()) {
            Some(end) if end <= size => Ok(offset),
            _ => Err(out_of_range(offset)),
        }
    }

    /// Element at `index`.
    ///
    /// Only the byte range is checked: an index past the end of the
    /// accessed bytes panics, an index out of bounds along one axis but still
    /// inside the bytes reads a neighbouring element.
    #[inline]
    pub fn get_by_index(&self, index: [u32; D]) -> T {
        let offset = self.byte_offset(index);
        let bytes = &self.access.data()[offset..offset + size_of::<T>()];
        // SAFETY: `bytes` holds `size_of::<T>()` bytes and every bit pattern
        // is a valid `T` (sealed element types).
        unsafe { ptr::read_unaligned(bytes.as_ptr() as *const T) }
    }

    /// Element at `index`, or [`AccessError::OutOfRange`] when its bytes are
    /// not inside the accessed range.
    pub fn get_by_index_checked(&self, index: [u32; D]) -> Result<T, AccessError> {
        let offset = self.checked_byte_offset(index)?;
        Ok(self.get_by_index_at(offset))
    }

    #[inline]
    fn get_by_index_at(&self, offset: usize) -> T {
        let bytes = &self.access.data()[offset..offset + size_of::<T>()];
        // SAFETY: as in `get_by_index`.
        unsafe { ptr::read_unaligned(bytes.as_ptr() as *const T) }
    }

    /// Element at a world position, mapped through the image geometry.
    ///
    /// Axes from 3 on use index 0.
    pub fn get_by_world_coordinate(&self, point: Point3) -> Result<T, AccessError> {
        let index = self.world_index(point, 0)?;
        self.get_by_index_checked(index)
    }

    /// Element at a world position and time step. The time step is clamped
    /// to the last one of the image.
    pub fn get_by_world_coordinate_at_time(
        &self,
        point: Point3,
        time_step: u32,
    ) -> Result<T, AccessError> {
        let last = self.access.image().time_steps().saturating_sub(1);
        let index = self.world_index(point, time_step.min(last))?;
        self.get_by_index_checked(index)
    }

    fn world_index(&self, point: Point3, time_step: u32) -> Result<[u32; D], AccessError> {
        let geometry = self
            .access
            .image()
            .geometry()
            .ok_or(ImageError::NotInitialized)?;
        let spatial = geometry.world_to_index(point);

        let mut index = [0u32; D];
        for (axis, slot) in index.iter_mut().enumerate() {
            let value = match axis {
                0..=2 => spatial[axis],
                3 => time_step as i64,
                _ => 0,
            };
            let extent = self.extents[axis];
            if value < 0 || value >= extent as i64 {
                return Err(AccessError::OutOfBounds {
                    axis,
                    index: value,
                    extent,
                });
            }
            *slot = value as u32;
        }
        Ok(index)
    }
}

impl<A: ImageAccessMut, T: PixelElement, const D: usize> PixelAccessor<A, T, D> {
    /// Store `value` at `index`. Bounds behave as in
    /// [`get_by_index`](Self::get_by_index).
    #[inline]
    pub fn set_by_index(&mut self, index: [u32; D], value: T) {
        let offset = self.byte_offset(index);
        self.set_by_index_at(offset, value);
    }

    /// Store `value` at `index`, or fail with [`AccessError::OutOfRange`].
    pub fn set_by_index_checked(&mut self, index: [u32; D], value: T) -> Result<(), AccessError> {
        let offset = self.checked_byte_offset(index)?;
        self.set_by_index_at(offset, value);
        Ok(())
    }

    #[inline]
    fn set_by_index_at(&mut self, offset: usize, value: T) {
        let bytes = &mut self.access.data_mut()[offset..offset + size_of::<T>()];
        // SAFETY: `bytes` holds `size_of::<T>()` writable bytes.
        unsafe { ptr::write_unaligned(bytes.as_mut_ptr() as *mut T, value) }
    }
}

// =============================================================================
// Tests
// =============================================================================
