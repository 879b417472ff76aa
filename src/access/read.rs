//! Shared read access to image memory.

use std::sync::Arc;

use bytes::Bytes;

use super::coordinator::{AccessKind, AccessOptions, AccessState};
use super::handle::{AccessHandle, AccessTarget};
use crate::data::BufferItem;
use crate::error::AccessError;
use crate::image::{ImageContainer, ImageRegion};
use crate::pixel::PixelFormat;

/// Read access to one byte range of an image.
///
/// Any number of read accessors may cover the same bytes at once. While one
/// is alive, a write accessor over overlapping bytes waits (or fails with
/// [`AccessOptions::FAIL_IF_LOCKED`]). Construction blocks the calling thread
/// while an overlapping write accessor is alive.
///
/// ```no_run
/// use voxelcore::{AccessOptions, ImageContainer, ImageReadAccessor, PixelFormat};
///
/// let mut image = ImageContainer::new();
/// image.initialize(PixelFormat::of::<u8>(), &[64, 64, 16], 1).unwrap();
///
/// let accessor = ImageReadAccessor::new(&image, AccessOptions::NONE).unwrap();
/// let sum: u64 = accessor.data().iter().map(|&b| b as u64).sum();
/// # let _ = sum;
/// ```
pub struct ImageReadAccessor<'a> {
    handle: AccessHandle<'a>,
}

impl<'a> ImageReadAccessor<'a> {
    /// Read all of channel 0, composing it first when needed.
    pub fn new(image: &'a ImageContainer, options: AccessOptions) -> Result<Self, AccessError> {
        Self::with_target(image, AccessTarget::WholeImage, options)
    }

    /// Read exactly the bytes of `item`, typically a slice or volume obtained
    /// from the same image.
    pub fn for_item(
        image: &'a ImageContainer,
        item: Arc<BufferItem>,
        options: AccessOptions,
    ) -> Result<Self, AccessError> {
        Self::with_target(image, AccessTarget::Item(item), options)
    }

    /// Read a region of the image.
    ///
    /// Only the largest possible region is supported; any other region
    /// fails with [`AccessError::SubRegionUnsupported`].
    pub fn for_region(
        image: &'a ImageContainer,
        region: &ImageRegion,
        options: AccessOptions,
    ) -> Result<Self, AccessError> {
        Self::with_target(image, AccessTarget::Region(region), options)
    }

    fn with_target(
        image: &'a ImageContainer,
        target: AccessTarget<'_>,
        options: AccessOptions,
    ) -> Result<Self, AccessError> {
        let handle = AccessHandle::new(image, target, options, AccessKind::Read)?;
        Ok(Self { handle })
    }

    /// The covered bytes.
    pub fn data(&self) -> &[u8] {
        self.handle.data()
    }

    /// Copy of the covered bytes.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.data())
    }

    pub fn item(&self) -> &Arc<BufferItem> {
        self.handle.item()
    }

    pub fn size(&self) -> usize {
        self.handle.item().size()
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.handle.item().pixel_format()
    }

    pub fn options(&self) -> AccessOptions {
        self.handle.options()
    }

    pub fn state(&self) -> AccessState {
        self.handle.state()
    }

    pub fn image(&self) -> &'a ImageContainer {
        self.handle.image()
    }

    /// Whether the accessor covers the whole image rather than one item.
    pub fn covers_whole_image(&self) -> bool {
        self.handle.covers_whole_image()
    }
}
