//! Mutable state of an image, guarded by the image's coordinating mutex.
//!
//! The three storage arrays and the accessor lists live together so that
//! composition, decomposition and accessor arbitration are linearized by one
//! lock. Every function here runs with that lock held.

use std::sync::Arc;

use tracing::{debug, trace};

use super::level::{Granularity, Layout, Slot};
use super::region::ImageRegion;
use crate::access::{AccessCoordinator, AccessRecord};
use crate::data::{BufferItem, ChannelCatalog, ImportData, MemoryMode};
use crate::error::ImageError;
use crate::pixel::PixelFormat;

type ItemArray = Vec<Option<Arc<BufferItem>>>;

#[derive(Debug, Default)]
pub(crate) struct ImageState {
    catalog: ChannelCatalog,
    slices: ItemArray,
    volumes: ItemArray,
    channels: ItemArray,
    requested_region: Option<ImageRegion>,
    /// Live readers and writers
    pub(crate) access: AccessCoordinator,
    /// Accessor whose bytes the last operation needed to move
    blocker: Option<Arc<AccessRecord>>,
}

impl ImageState {
    pub(crate) fn new(layout: &Layout, catalog: ChannelCatalog) -> Result<Self, ImageError> {
        Ok(Self {
            catalog,
            slices: empty_array(layout, Granularity::Slice)?,
            volumes: empty_array(layout, Granularity::Volume)?,
            channels: empty_array(layout, Granularity::Channel)?,
            requested_region: None,
            access: AccessCoordinator::default(),
            blocker: None,
        })
    }

    pub(crate) fn catalog(&self) -> &ChannelCatalog {
        &self.catalog
    }

    pub(crate) fn requested_region(&self) -> Option<ImageRegion> {
        self.requested_region
    }

    pub(crate) fn set_requested_region(&mut self, region: ImageRegion) {
        self.requested_region = Some(region);
    }

    pub(crate) fn format(&self, n: u32) -> Result<PixelFormat, ImageError> {
        self.catalog
            .pixel_format(n as usize)
            .ok_or(ImageError::NotInitialized)
    }

    // =========================================================================
    // Storage arrays
    // =========================================================================

    fn array(&self, granularity: Granularity) -> &ItemArray {
        match granularity {
            Granularity::Slice => &self.slices,
            Granularity::Volume => &self.volumes,
            Granularity::Channel => &self.channels,
        }
    }

    fn array_mut(&mut self, granularity: Granularity) -> &mut ItemArray {
        match granularity {
            Granularity::Slice => &mut self.slices,
            Granularity::Volume => &mut self.volumes,
            Granularity::Channel => &mut self.channels,
        }
    }

    /// Whether `item` lies inside data currently stored in this image.
    pub(crate) fn holds(&self, item: &BufferItem) -> bool {
        self.channels
            .iter()
            .chain(&self.volumes)
            .chain(&self.slices)
            .flatten()
            .any(|stored| item.is_within(stored))
    }

    fn item(&self, layout: &Layout, slot: Slot) -> Option<&Arc<BufferItem>> {
        self.array(slot.granularity)
            .get(layout.flat_index(slot))?
            .as_ref()
    }

    fn complete_item(&self, layout: &Layout, slot: Slot) -> Option<Arc<BufferItem>> {
        self.item(layout, slot)
            .filter(|item| item.is_complete())
            .cloned()
    }

    fn store(&mut self, layout: &Layout, slot: Slot, item: Arc<BufferItem>) {
        if slot.granularity == Granularity::Channel {
            self.catalog.set_data(slot.n as usize, &item);
        }
        let index = layout.flat_index(slot);
        if let Some(entry) = self.array_mut(slot.granularity).get_mut(index) {
            *entry = Some(item);
        }
    }

    /// Drop every cached descendant of `slot` whose bytes no longer lie inside
    /// `item`.
    fn clear_detached(&mut self, layout: &Layout, slot: Slot, item: &BufferItem) {
        for piece in layout.pieces(slot) {
            let index = layout.flat_index(piece);
            let detached = matches!(
                self.array(piece.granularity).get(index),
                Some(Some(existing)) if !existing.is_within(item)
            );
            if detached {
                self.array_mut(piece.granularity)[index] = None;
            }
            self.clear_detached(layout, piece, item);
        }
    }

    // =========================================================================
    // Live accessors
    // =========================================================================

    /// Accessor that stopped the last `resolve` or `allocate`, if any.
    ///
    /// The caller must wait for its release and then retry.
    pub(crate) fn take_blocker(&mut self) -> Option<Arc<AccessRecord>> {
        self.blocker.take()
    }

    pub(crate) fn blocked(&self) -> bool {
        self.blocker.is_some()
    }

    /// A live accessor over a cached descendant of `slot` that is about to
    /// be copied or dropped, i.e. every one not already inside `keep`.
    fn detach_conflict(
        &self,
        layout: &Layout,
        slot: Slot,
        keep: Option<&BufferItem>,
    ) -> Option<Arc<AccessRecord>> {
        for piece in layout.pieces(slot) {
            if let Some(stored) = self.item(layout, piece) {
                if !keep.is_some_and(|keep| stored.is_within(keep)) {
                    if let Some(record) = self.access.find_overlapping(stored) {
                        return Some(record);
                    }
                }
            }
            if let Some(record) = self.detach_conflict(layout, piece, keep) {
                return Some(record);
            }
        }
        None
    }

    /// Record `record` as the blocker of the running operation.
    fn block_on(&mut self, layout: &Layout, slot: Slot, record: Arc<AccessRecord>) {
        debug!(
            level = slot.granularity.name(),
            s = slot.s,
            t = slot.t,
            n = slot.n,
            holder = record.id(),
            "Pieces held by a live accessor"
        );
        self.blocker = Some(record);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Whether `slot` can be served without allocating: it is cached, it lies
    /// inside a complete coarser item, or all of its pieces are set.
    pub(crate) fn is_set(&self, layout: &Layout, slot: Slot) -> bool {
        let mut ancestor = layout.coarser(slot);
        while let Some(coarse) = ancestor {
            if self.complete_item(layout, coarse).is_some() {
                return true;
            }
            ancestor = layout.coarser(coarse);
        }
        self.is_set_below(layout, slot)
    }

    fn is_set_below(&self, layout: &Layout, slot: Slot) -> bool {
        if self.complete_item(layout, slot).is_some() {
            return true;
        }
        let pieces = layout.pieces(slot);
        !pieces.is_empty() && pieces.iter().all(|&piece| self.is_set_below(layout, piece))
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Return complete data for `slot` from the cache, by decomposing a
    /// coarser item, or by composing finer pieces. Never allocates data that
    /// was not already present.
    ///
    /// Composition never moves bytes a live accessor covers. It returns
    /// `None` instead and leaves that accessor in [`take_blocker`](Self::take_blocker).
    pub(crate) fn resolve(&mut self, layout: &Layout, slot: Slot) -> Option<Arc<BufferItem>> {
        if let Some(item) = self.complete_item(layout, slot) {
            trace!(
                level = slot.granularity.name(),
                s = slot.s,
                t = slot.t,
                n = slot.n,
                "Cache hit"
            );
            return Some(item);
        }
        if let Some(view) = self.decompose(layout, slot) {
            return Some(view);
        }
        if self.is_set_below(layout, slot) {
            return self.compose(layout, slot);
        }
        None
    }

    fn decompose(&mut self, layout: &Layout, slot: Slot) -> Option<Arc<BufferItem>> {
        let format = self.format(slot.n).ok()?;
        let mut ancestor = layout.coarser(slot);
        while let Some(coarse) = ancestor {
            if let Some(parent) = self.complete_item(layout, coarse) {
                let offset = format.buffer_size(layout.element_offset(slot, coarse));
                let view =
                    BufferItem::view(&parent, &layout.item_extents(slot.granularity), offset)?;
                view.set_complete(true);
                debug!(
                    level = slot.granularity.name(),
                    s = slot.s,
                    t = slot.t,
                    n = slot.n,
                    parent = coarse.granularity.name(),
                    offset = offset,
                    "Decomposed into view"
                );
                self.store(layout, slot, Arc::clone(&view));
                self.clear_detached(layout, slot, &view);
                return Some(view);
            }
            ancestor = layout.coarser(coarse);
        }
        None
    }

    fn compose(&mut self, layout: &Layout, slot: Slot) -> Option<Arc<BufferItem>> {
        let format = self.format(slot.n).ok()?;
        let pieces = layout.pieces(slot);
        let mut items = Vec::with_capacity(pieces.len());
        for &piece in &pieces {
            items.push(self.resolve(layout, piece)?);
        }
        let extents = layout.item_extents(slot.granularity);
        let existing = self.item(layout, slot).cloned();

        // A single piece already has the right size: wrap it.
        if let ([single], None) = (items.as_slice(), existing.as_ref()) {
            let view = BufferItem::view(single, &extents, 0)?;
            view.set_complete(true);
            debug!(
                level = slot.granularity.name(),
                t = slot.t,
                n = slot.n,
                "Wrapped single piece"
            );
            self.store(layout, slot, Arc::clone(&view));
            return Some(view);
        }

        let size = format.buffer_size(layout.element_count(slot.granularity));
        let target = match existing.filter(|item| item.size() == size) {
            Some(item) => item,
            None => BufferItem::allocate(format, &extents).ok()?,
        };
        if let Some(holder) = self.detach_conflict(layout, slot, Some(&*target)) {
            self.block_on(layout, slot, holder);
            return None;
        }

        let mut copied = 0usize;
        for (&piece, item) in pieces.iter().zip(&items) {
            if self.place_piece(layout, slot, piece, item, &target, format)? {
                copied += 1;
            }
        }

        target.set_complete(true);
        debug!(
            level = slot.granularity.name(),
            t = slot.t,
            n = slot.n,
            pieces = pieces.len(),
            copied = copied,
            "Composed from pieces"
        );
        self.store(layout, slot, Arc::clone(&target));
        Some(target)
    }

    /// Make `piece` a view at its place inside `target`, the item of
    /// `ancestor`, copying its bytes there first when they live elsewhere.
    /// Returns whether bytes were copied.
    fn place_piece(
        &mut self,
        layout: &Layout,
        ancestor: Slot,
        piece: Slot,
        item: &Arc<BufferItem>,
        target: &Arc<BufferItem>,
        format: PixelFormat,
    ) -> Option<bool> {
        let offset = format.buffer_size(layout.element_offset(piece, ancestor));
        if item.is_within(target) && item.offset() == target.offset() + offset {
            return Some(false);
        }
        debug_assert!(!item.aliases(target));
        // SAFETY: the coordinating lock is held, `target` covers every piece
        // of `ancestor`, and `item` does not share bytes with `target`.
        unsafe { target.write_at(offset, item.as_ptr(), item.size()) };
        let view = BufferItem::view(target, &layout.item_extents(piece.granularity), offset)?;
        view.set_complete(true);
        self.store(layout, piece, Arc::clone(&view));
        self.clear_detached(layout, piece, &view);
        Some(true)
    }

    /// Resolve the outermost set descendants of `slot`. `None` when a live
    /// accessor blocked their composition.
    fn collect_pieces(&mut self, layout: &Layout, slot: Slot) -> Option<Vec<(Slot, Arc<BufferItem>)>> {
        let mut found = Vec::new();
        for piece in layout.pieces(slot) {
            if !self.is_set_below(layout, piece) {
                found.extend(self.collect_pieces(layout, piece)?);
                continue;
            }
            match self.resolve(layout, piece) {
                Some(item) => found.push((piece, item)),
                None if self.blocked() => return None,
                None => {}
            }
        }
        Some(found)
    }

    // =========================================================================
    // Allocation and population
    // =========================================================================

    /// Create complete data for an unset `slot`, filled from `data` when
    /// given and from the pieces already set below it otherwise.
    ///
    /// New data lives inside the nearest existing coarser item when there is
    /// one. A slice without one gets a placeholder volume to live in, unless
    /// the caller hands over or references its own memory, which is then
    /// adopted as is.
    ///
    /// Returns `Ok(None)` without consuming `data` when a live accessor
    /// covers bytes that would be copied or dropped; see
    /// [`take_blocker`](Self::take_blocker).
    pub(crate) fn allocate(
        &mut self,
        layout: &Layout,
        slot: Slot,
        data: &mut Option<ImportData<'_>>,
    ) -> Result<Option<Arc<BufferItem>>, ImageError> {
        let format = self.format(slot.n)?;
        let extents = layout.item_extents(slot.granularity);
        let adopt = data
            .as_ref()
            .is_some_and(|data| data.mode() != MemoryMode::CopyMemory);

        // Pieces set earlier keep their content in the new item.
        let pieces = if data.is_none() {
            match self.collect_pieces(layout, slot) {
                Some(pieces) => pieces,
                None => return Ok(None),
            }
        } else {
            Vec::new()
        };

        let host = self.host_for(layout, slot, format, adopt)?;
        let overwritten = match (&host, data.is_some()) {
            (Some(host), true) => self.access.find_overlapping(host),
            _ => None,
        };
        let busy = overwritten.or_else(|| self.detach_conflict(layout, slot, host.as_deref()));
        if let Some(holder) = busy {
            self.block_on(layout, slot, holder);
            return Ok(None);
        }

        let item = match (host, data.take()) {
            (Some(item), data) => {
                if let Some(data) = &data {
                    // SAFETY: sizes were checked by the caller and the lock is held.
                    unsafe { data.copy_to(item.as_ptr()) };
                }
                item
            }
            (None, Some(data)) if adopt => BufferItem::import(format, &extents, data)?,
            (None, Some(data)) => {
                let item = BufferItem::allocate(format, &extents)?;
                // SAFETY: freshly allocated with the same size.
                unsafe { data.copy_to(item.as_ptr()) };
                item
            }
            (None, None) => BufferItem::allocate(format, &extents)?,
        };

        let mut absorbed = 0usize;
        for (piece, piece_item) in &pieces {
            if let Some(true) = self.place_piece(layout, slot, *piece, piece_item, &item, format) {
                absorbed += 1;
            }
        }

        item.set_complete(true);
        debug!(
            level = slot.granularity.name(),
            s = slot.s,
            t = slot.t,
            n = slot.n,
            absorbed = absorbed,
            view = item.is_view(),
            mode = ?item.memory_mode(),
            "Allocated"
        );
        self.store(layout, slot, Arc::clone(&item));
        self.clear_detached(layout, slot, &item);
        Ok(Some(item))
    }

    /// Memory an item for `slot` should live in: an incomplete placeholder at
    /// the slot itself, or a view into the nearest existing coarser item.
    fn host_for(
        &mut self,
        layout: &Layout,
        slot: Slot,
        format: PixelFormat,
        adopt: bool,
    ) -> Result<Option<Arc<BufferItem>>, ImageError> {
        if !adopt {
            if let Some(placeholder) = self.item(layout, slot).filter(|i| !i.is_complete()) {
                return Ok(Some(Arc::clone(placeholder)));
            }
        }

        let extents = layout.item_extents(slot.granularity);
        let mut ancestor = layout.coarser(slot);
        while let Some(coarse) = ancestor {
            if let Some(host) = self.item(layout, coarse).cloned() {
                let offset = format.buffer_size(layout.element_offset(slot, coarse));
                return view_into(&host, &extents, offset).map(Some);
            }
            ancestor = layout.coarser(coarse);
        }

        if slot.granularity == Granularity::Slice && !adopt {
            if let Some(volume) = layout.coarser(slot) {
                let host = BufferItem::allocate(format, &layout.item_extents(Granularity::Volume))?;
                trace!(t = volume.t, n = volume.n, "Allocated placeholder volume");
                self.store(layout, volume, Arc::clone(&host));
                let offset = format.buffer_size(layout.element_offset(slot, volume));
                return view_into(&host, &extents, offset).map(Some);
            }
        }
        Ok(None)
    }

    /// Check that `len` bytes exactly fill the buffer at `slot`.
    pub(crate) fn check_size(&self, layout: &Layout, slot: Slot, len: usize) -> Result<(), ImageError> {
        let format = self.format(slot.n)?;
        let expected = format.buffer_size(layout.element_count(slot.granularity));
        if len != expected {
            return Err(ImageError::DataSizeMismatch {
                expected,
                actual: len,
            });
        }
        Ok(())
    }
}

/// One empty cell per slot, failing instead of aborting when the array
/// cannot be allocated.
fn empty_array(layout: &Layout, granularity: Granularity) -> Result<ItemArray, ImageError> {
    let len = layout.array_len(granularity);
    let mut array = ItemArray::new();
    array
        .try_reserve_exact(len)
        .map_err(|_| ImageError::TooLarge(layout.extents().to_vec()))?;
    array.resize(len, None);
    Ok(array)
}

fn view_into(
    host: &Arc<BufferItem>,
    extents: &[u32],
    offset: usize,
) -> Result<Arc<BufferItem>, ImageError> {
    BufferItem::view(host, extents, offset).ok_or_else(|| ImageError::DataSizeMismatch {
        expected: offset + host.pixel_format().buffer_size(extents.iter().map(|&e| e as usize).product()),
        actual: host.size(),
    })
}
