//! Shared core of read and write accessors.

use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;
use tracing::trace;

use super::coordinator::{arbitrate, AccessKind, AccessOptions, AccessRecord, AccessState, WaitLock};
use crate::data::BufferItem;
use crate::error::{AccessError, ImageError};
use crate::image::{ImageContainer, ImageRegion};

/// What an accessor covers.
pub(crate) enum AccessTarget<'r> {
    /// All of channel 0
    WholeImage,
    /// Exactly the bytes of one item
    Item(Arc<BufferItem>),
    /// A region of the image
    Region(&'r ImageRegion),
}

/// An arbitrated byte range of one image.
///
/// Dropping the handle removes its record from the image's lists first and
/// then releases the private wait lock, which wakes every waiter.
pub(crate) struct AccessHandle<'a> {
    image: &'a ImageContainer,
    item: Arc<BufferItem>,
    record: Arc<AccessRecord>,
    whole_image: bool,
    registered: bool,
    _wait_guard: OwnedMutexGuard<()>,
}

impl<'a> AccessHandle<'a> {
    pub(crate) fn new(
        image: &'a ImageContainer,
        target: AccessTarget<'_>,
        options: AccessOptions,
        kind: AccessKind,
    ) -> Result<Self, AccessError> {
        let (item, whole_image) = match target {
            AccessTarget::Item(item) => (item, false),
            AccessTarget::WholeImage => (primary_channel(image)?, true),
            AccessTarget::Region(region) => {
                let largest = image
                    .largest_possible_region()
                    .ok_or(ImageError::NotInitialized)?;
                if *region != largest {
                    return Err(AccessError::SubRegionUnsupported);
                }
                (primary_channel(image)?, true)
            }
        };

        let (wait_lock, wait_guard) = WaitLock::new_held();
        let record = Arc::new(AccessRecord::new(
            kind,
            item.as_ptr() as usize,
            item.size(),
            true,
            options,
            wait_lock,
        ));

        let registered = !(kind == AccessKind::Read && options.ignores_lock());
        if registered {
            arbitrate(image, &record, &item)?;
        } else {
            if !image.lock_state().holds(&item) {
                return Err(AccessError::ForeignItem);
            }
            record.set_state(AccessState::Active);
            trace!(id = record.id(), bytes = item.size(), "Unarbitrated read access");
        }

        Ok(Self {
            image,
            item,
            record,
            whole_image,
            registered,
            _wait_guard: wait_guard,
        })
    }

    pub(crate) fn image(&self) -> &'a ImageContainer {
        self.image
    }

    pub(crate) fn item(&self) -> &Arc<BufferItem> {
        &self.item
    }

    pub(crate) fn covers_whole_image(&self) -> bool {
        self.whole_image
    }

    pub(crate) fn state(&self) -> AccessState {
        self.record.state()
    }

    pub(crate) fn options(&self) -> AccessOptions {
        self.record.options()
    }

    pub(crate) fn data(&self) -> &[u8] {
        // SAFETY: the item keeps its memory alive, and arbitration excludes
        // overlapping writers for as long as this handle lives.
        unsafe { std::slice::from_raw_parts(self.item.as_ptr(), self.item.size()) }
    }

    pub(crate) fn data_mut(&mut self) -> &mut [u8] {
        // SAFETY: as for `data`; a write handle excludes every other
        // overlapping arbitrated accessor, and `&mut self` excludes aliases
        // through this handle.
        unsafe { std::slice::from_raw_parts_mut(self.item.as_ptr(), self.item.size()) }
    }
}

impl Drop for AccessHandle<'_> {
    fn drop(&mut self) {
        if self.registered {
            let mut state = self.image.lock_state();
            state.access.release(self.record.id(), self.record.kind());
        }
        self.record.set_state(AccessState::Released);
        trace!(
            id = self.record.id(),
            kind = self.record.kind().name(),
            "Released accessor"
        );
    }
}

fn primary_channel(image: &ImageContainer) -> Result<Arc<BufferItem>, AccessError> {
    if !image.is_initialized() {
        return Err(ImageError::NotInitialized.into());
    }
    image.data().ok_or(AccessError::NoData)
}
