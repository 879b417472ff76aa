//! Exclusive write access to image memory.

use std::sync::Arc;

use super::coordinator::{AccessKind, AccessOptions, AccessState};
use super::handle::{AccessHandle, AccessTarget};
use crate::data::BufferItem;
use crate::error::AccessError;
use crate::image::{ImageContainer, ImageRegion};
use crate::pixel::PixelFormat;

/// Exclusive write access to one byte range of an image.
///
/// Construction waits until no overlapping read or write accessor is alive.
/// Dropping the accessor marks the item and the image as modified.
pub struct ImageWriteAccessor<'a> {
    handle: AccessHandle<'a>,
}

impl<'a> ImageWriteAccessor<'a> {
    /// Write all of channel 0, composing it first when needed.
    pub fn new(image: &'a ImageContainer, options: AccessOptions) -> Result<Self, AccessError> {
        Self::with_target(image, AccessTarget::WholeImage, options)
    }

    /// Write exactly the bytes of `item`.
    pub fn for_item(
        image: &'a ImageContainer,
        item: Arc<BufferItem>,
        options: AccessOptions,
    ) -> Result<Self, AccessError> {
        Self::with_target(image, AccessTarget::Item(item), options)
    }

    /// Write a region of the image. Only the largest possible region is
    /// supported.
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
        let handle = AccessHandle::new(image, target, options, AccessKind::Write)?;
        Ok(Self { handle })
    }

    pub fn data(&self) -> &[u8] {
        self.handle.data()
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.handle.data_mut()
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

    pub fn covers_whole_image(&self) -> bool {
        self.handle.covers_whole_image()
    }
}

impl Drop for ImageWriteAccessor<'_> {
    fn drop(&mut self) {
        // Runs before the handle deregisters.
        self.handle.item().touch();
        self.handle.image().mark_modified();
    }
}
