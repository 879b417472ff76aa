//! The image container.
//!
//! An [`ImageContainer`] owns the pixel data of one multi-channel,
//! multi-time-step image and serves it at three granularities:
//!
//! ```text
//! get_slice_data(s, t, n)                 get_volume_data(t, n)        get_channel_data(n)
//!        │                                       │                            │
//!        ▼                                       ▼                            ▼
//!   1. cached and complete?  ──────────────────────────────────────────────▶ return it
//!   2. inside a complete coarser item?  ─────────▶ view at byte offset, cache, return
//!   3. all finer pieces present?  ───────────────▶ copy into one buffer, re-point pieces
//!   4. producer attached and idle?  ─────────────▶ compute exactly this region, retry once
//!   5. otherwise  ───────────────────────────────▶ allocate zeroed data, return
//! ```
//!
//! Steps 1-3 and 5 run under the image's coordinating mutex, the same mutex
//! the accessors in [`crate::access`] use for arbitration. The producer in
//! step 4 runs with the mutex released, since it writes back through the
//! regular `set_*` operations. Step 3 never copies bytes a live accessor
//! covers; it waits for that accessor with the mutex released and restarts.
//!
//! Indices are signed. Negative or out-of-range indices are not errors: the
//! getters return `None` and the predicates return `false`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use super::descriptor::{ExtentOverrides, VolumeDescriptor};
use super::level::{Granularity, Layout, Slot};
use super::producer::Producer;
use super::region::ImageRegion;
use super::state::ImageState;
use crate::access::{AccessOptions, ImageReadAccessor, ImageWriteAccessor};
use crate::data::{next_timestamp, BufferItem, ChannelCatalog, ImportData, MAX_IMAGE_DIMENSIONS};
use crate::error::{AccessError, ImageError};
use crate::geometry::{AxisAlignedGeometry, Geometry, Point3};
use crate::pixel::PixelFormat;

/// Multi-dimensional image with lazily composed slice / volume / channel data.
///
/// All data operations take `&self` and may be called from many threads at
/// once. Re-initialization and attaching collaborators take `&mut self`,
/// which statically rules out live accessors while the layout changes.
///
/// Operations that lock the coordinating mutex block the calling thread and
/// must not be called from inside an async task.
pub struct ImageContainer {
    layout: Option<Layout>,
    geometry: Option<Arc<dyn Geometry>>,
    producer: Option<Arc<dyn Producer>>,
    /// Storage arrays, channel catalog and accessor lists
    state: Mutex<ImageState>,
    /// Set while the producer computes on behalf of this image
    updating: AtomicBool,
    modified: AtomicU64,
}

impl ImageContainer {
    /// Create an uninitialized image.
    pub fn new() -> Self {
        Self {
            layout: None,
            geometry: None,
            producer: None,
            state: Mutex::new(ImageState::default()),
            updating: AtomicBool::new(false),
            modified: AtomicU64::new(next_timestamp()),
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Initialize with `channels` channels of the same format.
    pub fn initialize(
        &mut self,
        format: PixelFormat,
        extents: &[u32],
        channels: u32,
    ) -> Result<(), ImageError> {
        self.reset(extents, unnamed_channels(format, channels), None)
    }

    /// Initialize with one named channel per `(name, format)` entry.
    pub fn initialize_with_channels(
        &mut self,
        extents: &[u32],
        channels: &[(&str, PixelFormat)],
    ) -> Result<(), ImageError> {
        let channels = channels
            .iter()
            .map(|&(name, format)| (Some(name.to_string()), format))
            .collect();
        self.reset(extents, channels, None)
    }

    /// Initialize with the extents, channels and geometry of `reference`.
    ///
    /// No pixel data is copied; see [`duplicate`](Self::duplicate) for that.
    pub fn initialize_like(&mut self, reference: &ImageContainer) -> Result<(), ImageError> {
        let layout = reference.layout.as_ref().ok_or(ImageError::NotInitialized)?;
        let channels = reference
            .state
            .blocking_lock()
            .catalog()
            .iter()
            .map(|channel| (Some(channel.name().to_string()), channel.pixel_format()))
            .collect();
        let extents = layout.extents().to_vec();
        self.reset(&extents, channels, reference.geometry.clone())
    }

    /// Initialize from a geometry.
    ///
    /// Extents are the geometry's extents rounded to the nearest integer. The
    /// number of time steps is `time_steps`, or the geometry's own count when
    /// `None`. The image gets 4 axes when there is more than one time step,
    /// otherwise 3 axes when there is more than one slice, otherwise 2.
    pub fn initialize_from_geometry(
        &mut self,
        format: PixelFormat,
        geometry: Arc<dyn Geometry>,
        channels: u32,
        time_steps: Option<u32>,
    ) -> Result<(), ImageError> {
        let time_steps = match time_steps {
            Some(0) => return Err(ImageError::InvalidTimeSteps),
            Some(time_steps) => time_steps,
            None => geometry.time_steps().max(1),
        };
        let axis = |i: usize| (geometry.extent(i) + 0.5) as u32;
        let (x, y, z) = (axis(0), axis(1), axis(2));
        let extents = if time_steps > 1 {
            vec![x, y, z, time_steps]
        } else if z > 1 {
            vec![x, y, z]
        } else {
            vec![x, y]
        };
        self.reset(&extents, unnamed_channels(format, channels), Some(geometry))
    }

    /// Initialize from the header of an external volume, with optional
    /// overrides of the row, slice and time extents.
    pub fn initialize_from_volume(
        &mut self,
        volume: &VolumeDescriptor,
        channels: u32,
        overrides: ExtentOverrides,
    ) -> Result<(), ImageError> {
        if overrides.time_steps == Some(0) {
            return Err(ImageError::InvalidTimeSteps);
        }
        let extents = overrides.apply(volume.extents());
        let time_steps = extents.get(3).copied().unwrap_or(1);
        let geometry: Arc<dyn Geometry> = Arc::new(volume.geometry(&extents, time_steps));
        self.reset(
            &extents,
            unnamed_channels(volume.pixel_format(), channels),
            Some(geometry),
        )
    }

    fn reset(
        &mut self,
        extents: &[u32],
        channels: Vec<(Option<String>, PixelFormat)>,
        geometry: Option<Arc<dyn Geometry>>,
    ) -> Result<(), ImageError> {
        if extents.is_empty() || extents.len() > MAX_IMAGE_DIMENSIONS {
            return Err(ImageError::InvalidDimensionCount(extents.len()));
        }
        if let Some(axis) = extents.iter().position(|&extent| extent == 0) {
            return Err(ImageError::InvalidExtent { axis, extent: 0 });
        }

        if channels.is_empty() {
            self.clear();
            warn!(
                extents = ?extents,
                "Initialized with zero channels, image stays uninitialized"
            );
            return Ok(());
        }

        let channel_count =
            u32::try_from(channels.len()).map_err(|_| ImageError::TooLarge(extents.to_vec()))?;
        let layout = Layout::new(extents, channel_count)?;
        let elements = layout.element_count(Granularity::Channel);
        if channels
            .iter()
            .any(|(_, format)| format.checked_buffer_size(elements).is_none())
        {
            return Err(ImageError::TooLarge(extents.to_vec()));
        }

        let mut catalog = ChannelCatalog::new(extents);
        for (name, format) in &channels {
            catalog.add_channel(*format, name.as_deref());
        }
        let state = ImageState::new(&layout, catalog)?;
        self.clear();

        let geometry = geometry.unwrap_or_else(|| {
            Arc::new(
                AxisAlignedGeometry::new([layout.extent(0), layout.extent(1), layout.extent(2)])
                    .with_time_steps(layout.time_steps()),
            )
        });

        debug!(
            extents = ?layout.extents(),
            channels = layout.channels(),
            time_steps = layout.time_steps(),
            "Initialized image"
        );

        *self.state.get_mut() = state;
        self.geometry = Some(geometry);
        self.layout = Some(layout);
        self.mark_modified();
        Ok(())
    }

    /// Drop all data and return to the uninitialized state.
    pub fn clear(&mut self) {
        *self.state.get_mut() = ImageState::default();
        self.layout = None;
        self.geometry = None;
    }

    // =========================================================================
    // Collaborators
    // =========================================================================

    /// Attach (or detach) the producer consulted for missing data.
    pub fn set_producer(&mut self, producer: Option<Arc<dyn Producer>>) {
        self.producer = producer;
    }

    pub fn producer(&self) -> Option<&Arc<dyn Producer>> {
        self.producer.as_ref()
    }

    /// Replace the geometry. Extents are not changed.
    pub fn set_geometry(&mut self, geometry: Arc<dyn Geometry>) {
        self.geometry = Some(geometry);
    }

    pub fn geometry(&self) -> Option<&Arc<dyn Geometry>> {
        self.geometry.as_ref()
    }

    // =========================================================================
    // Shape
    // =========================================================================

    pub fn is_initialized(&self) -> bool {
        self.layout.is_some()
    }

    /// Number of axes, 0 when uninitialized.
    pub fn dimension(&self) -> usize {
        self.layout.as_ref().map_or(0, Layout::dimension)
    }

    /// Extent along `axis`; 1 beyond the declared axes, 0 when uninitialized.
    pub fn dimension_of(&self, axis: usize) -> u32 {
        self.layout.as_ref().map_or(0, |layout| layout.extent(axis))
    }

    /// Extents of the declared axes.
    pub fn dimensions(&self) -> &[u32] {
        self.layout.as_ref().map(Layout::extents).unwrap_or(&[])
    }

    /// Prefix products of the extents (`offset_table()[k]` elements per step
    /// along axis `k`).
    pub fn offset_table(&self) -> &[usize] {
        self.layout.as_ref().map(Layout::offset_table).unwrap_or(&[])
    }

    pub fn number_of_channels(&self) -> u32 {
        self.layout.as_ref().map_or(0, Layout::channels)
    }

    /// Number of time steps; every axis from 3 on counts as time.
    pub fn time_steps(&self) -> u32 {
        self.layout.as_ref().map_or(0, Layout::time_steps)
    }

    pub fn is_valid_slice(&self, s: i32, t: i32, n: i32) -> bool {
        self.layout
            .as_ref()
            .and_then(|layout| layout.slot(Granularity::Slice, s, t, n))
            .is_some()
    }

    pub fn is_valid_volume(&self, t: i32, n: i32) -> bool {
        self.layout
            .as_ref()
            .and_then(|layout| layout.slot(Granularity::Volume, 0, t, n))
            .is_some()
    }

    pub fn is_valid_channel(&self, n: i32) -> bool {
        self.layout
            .as_ref()
            .and_then(|layout| layout.slot(Granularity::Channel, 0, 0, n))
            .is_some()
    }

    pub fn is_valid_time_step(&self, t: i32) -> bool {
        t >= 0 && (t as u32) < self.time_steps()
    }

    /// Pixel format of channel `n`.
    pub fn pixel_format(&self, n: usize) -> Option<PixelFormat> {
        self.state.blocking_lock().catalog().pixel_format(n)
    }

    /// Name of channel `n`.
    pub fn channel_name(&self, n: usize) -> Option<String> {
        self.state
            .blocking_lock()
            .catalog()
            .channel(n)
            .map(|channel| channel.name().to_string())
    }

    /// Index of the channel called `name`.
    pub fn channel_index(&self, name: &str) -> Option<usize> {
        self.state.blocking_lock().catalog().index_of(name)
    }

    /// Snapshot of the channel catalog.
    pub fn channel_catalog(&self) -> ChannelCatalog {
        self.state.blocking_lock().catalog().clone()
    }

    /// Region covering the whole image, all channels included.
    pub fn largest_possible_region(&self) -> Option<ImageRegion> {
        self.layout.as_ref().map(Layout::largest_region)
    }

    /// Region most recently requested from the producer, or the whole image.
    pub fn requested_region(&self) -> Option<ImageRegion> {
        let layout = self.layout.as_ref()?;
        let requested = self.state.blocking_lock().requested_region();
        Some(requested.unwrap_or_else(|| layout.largest_region()))
    }

    /// Timestamp of the last modification of already visible content.
    pub fn modified_time(&self) -> u64 {
        self.modified.load(Ordering::Relaxed)
    }

    pub(crate) fn mark_modified(&self) {
        self.modified.fetch_max(next_timestamp(), Ordering::Relaxed);
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ImageState> {
        self.state.blocking_lock()
    }

    /// Number of registered read accessors.
    pub fn active_readers(&self) -> usize {
        self.lock_state().access.reader_count()
    }

    /// Number of registered write accessors.
    pub fn active_writers(&self) -> usize {
        self.lock_state().access.writer_count()
    }

    // =========================================================================
    // Data
    // =========================================================================

    /// Complete data of slice `s` at time step `t` of channel `n`.
    pub fn get_slice_data(&self, s: i32, t: i32, n: i32) -> Option<Arc<BufferItem>> {
        self.data_for(Granularity::Slice, s, t, n)
    }

    /// Complete data of time step `t` of channel `n`.
    pub fn get_volume_data(&self, t: i32, n: i32) -> Option<Arc<BufferItem>> {
        self.data_for(Granularity::Volume, 0, t, n)
    }

    /// Complete data of channel `n`.
    pub fn get_channel_data(&self, n: i32) -> Option<Arc<BufferItem>> {
        self.data_for(Granularity::Channel, 0, 0, n)
    }

    /// Complete data of channel 0.
    pub fn data(&self) -> Option<Arc<BufferItem>> {
        self.get_channel_data(0)
    }

    pub fn is_slice_set(&self, s: i32, t: i32, n: i32) -> bool {
        self.is_set(Granularity::Slice, s, t, n)
    }

    pub fn is_volume_set(&self, t: i32, n: i32) -> bool {
        self.is_set(Granularity::Volume, 0, t, n)
    }

    pub fn is_channel_set(&self, n: i32) -> bool {
        self.is_set(Granularity::Channel, 0, 0, n)
    }

    /// Store one slice. Returns `Ok(false)` for an invalid index.
    ///
    /// Overwriting data that is already set waits for overlapping accessors
    /// and bumps [`modified_time`](Self::modified_time); populating it for the
    /// first time does neither.
    pub fn set_slice(&self, data: ImportData<'_>, s: i32, t: i32, n: i32) -> Result<bool, AccessError> {
        self.set_data(Granularity::Slice, data, s, t, n)
    }

    /// Store one volume. Returns `Ok(false)` for an invalid index.
    pub fn set_volume(&self, data: ImportData<'_>, t: i32, n: i32) -> Result<bool, AccessError> {
        self.set_data(Granularity::Volume, data, 0, t, n)
    }

    /// Store one channel. Returns `Ok(false)` for an invalid index.
    pub fn set_channel(&self, data: ImportData<'_>, n: i32) -> Result<bool, AccessError> {
        self.set_data(Granularity::Channel, data, 0, 0, n)
    }

    fn is_set(&self, granularity: Granularity, s: i32, t: i32, n: i32) -> bool {
        let Some(layout) = self.layout.as_ref() else {
            return false;
        };
        match layout.slot(granularity, s, t, n) {
            Some(slot) => self.state.blocking_lock().is_set(layout, slot),
            None => false,
        }
    }

    /// Run `operation` on the locked state until it finishes without having
    /// to move bytes that a live accessor covers. Each such accessor is
    /// waited for with the state unlocked, then the operation starts over.
    fn with_state<T>(&self, mut operation: impl FnMut(&mut ImageState) -> T) -> Result<T, AccessError> {
        loop {
            let mut state = self.lock_state();
            let result = operation(&mut state);
            let Some(holder) = state.take_blocker() else {
                return Ok(result);
            };
            if holder.held_by_current_thread() {
                debug!(holder = holder.id(), "Pieces held by an accessor of this thread");
                return Err(AccessError::RecursiveLock);
            }

            let wait_lock = Arc::clone(holder.wait_lock());
            wait_lock.add_waiter();
            drop(state);

            trace!(holder = holder.id(), "Waiting for accessor before moving its bytes");
            wait_lock.wait_for_release();
        }
    }

    fn data_for(&self, granularity: Granularity, s: i32, t: i32, n: i32) -> Option<Arc<BufferItem>> {
        let layout = self.layout.as_ref()?;
        let slot = layout.slot(granularity, s, t, n)?;
        match self.serve(layout, slot) {
            Ok(item) => item,
            Err(err) => {
                warn!(error = %err, level = granularity.name(), "Could not serve data");
                None
            }
        }
    }

    fn serve(&self, layout: &Layout, slot: Slot) -> Result<Option<Arc<BufferItem>>, AccessError> {
        let cached = self.with_state(|state| state.resolve(layout, slot))?;
        if cached.is_some() {
            return Ok(cached);
        }

        if let Some(producer) = self.producer.as_ref() {
            if !producer.is_computing() && !self.updating.swap(true, Ordering::AcqRel) {
                let _updating = UpdatingFlag(&self.updating);
                let region = layout.region_of(slot);
                self.lock_state().set_requested_region(region);
                debug!(
                    level = slot.granularity.name(),
                    s = slot.s,
                    t = slot.t,
                    n = slot.n,
                    "Requesting data from producer"
                );
                producer.compute_region(self, &region);

                let produced = self.with_state(|state| state.resolve(layout, slot))?;
                if produced.is_none() {
                    debug!(
                        level = slot.granularity.name(),
                        s = slot.s,
                        t = slot.t,
                        n = slot.n,
                        "Producer left the requested region empty"
                    );
                }
                return Ok(produced);
            }
        }

        let item = self.with_state(|state| match state.resolve(layout, slot) {
            Some(item) => Ok(Some(item)),
            None if state.blocked() => Ok(None),
            None => state.allocate(layout, slot, &mut None),
        })??;
        Ok(item)
    }

    fn set_data(
        &self,
        granularity: Granularity,
        data: ImportData<'_>,
        s: i32,
        t: i32,
        n: i32,
    ) -> Result<bool, AccessError> {
        let layout = self.layout.as_ref().ok_or(ImageError::NotInitialized)?;
        let Some(slot) = layout.slot(granularity, s, t, n) else {
            return Ok(false);
        };
        let (mode, len) = (data.mode(), data.len());
        let mut data = Some(data);

        let overwritten = loop {
            let existing = self.with_state(|state| -> Result<_, ImageError> {
                state.check_size(layout, slot, len)?;
                if state.is_set(layout, slot) {
                    Ok(state.resolve(layout, slot))
                } else {
                    state.allocate(layout, slot, &mut data)?;
                    Ok(None)
                }
            })??;

            // Overwrites go through a write accessor so they wait for live readers.
            let (Some(item), Some(bytes)) = (existing, data.as_ref()) else {
                break false;
            };
            match ImageWriteAccessor::for_item(self, item, AccessOptions::default()) {
                Ok(mut accessor) => {
                    // SAFETY: `check_size` matched the lengths, and the accessor's
                    // bytes belong to the image, never to the caller's buffer.
                    unsafe { bytes.copy_to(accessor.data_mut().as_mut_ptr()) };
                    break true;
                }
                // Moved by a concurrent composition before the accessor registered.
                Err(AccessError::ForeignItem) => continue,
                Err(err) => return Err(err),
            }
        };

        debug!(
            level = granularity.name(),
            s = slot.s,
            t = slot.t,
            n = slot.n,
            mode = ?mode,
            overwritten = overwritten,
            "Stored pixel data"
        );
        Ok(true)
    }

    // =========================================================================
    // Pixel values
    // =========================================================================

    /// Value of one component of channel 0 at a voxel index, as `f64`.
    ///
    /// The time step is clamped to the last one. Positions outside the image
    /// yield 0.0 with a warning. For the packed 24-bit tri-component format
    /// the sum of the three components is returned and `component` is ignored.
    pub fn pixel_value_by_index(
        &self,
        index: [i64; 3],
        time_step: u32,
        component: u32,
    ) -> Result<f64, AccessError> {
        let layout = self.layout.as_ref().ok_or(ImageError::NotInitialized)?;
        let time_step = time_step.min(layout.time_steps().saturating_sub(1));

        let inside = (0..3).all(|axis| index[axis] >= 0 && index[axis] < layout.extent(axis) as i64);
        if !inside {
            warn!(position = ?index, "Position is outside the image, returning 0");
            return Ok(0.0);
        }

        let format = self.pixel_format(0).ok_or(AccessError::NoData)?;
        if !format.is_packed_rgb24() && component >= format.number_of_components() {
            warn!(
                component = component,
                components = format.number_of_components(),
                "Component is outside the pixel, returning 0"
            );
            return Ok(0.0);
        }

        let channel = self.data().ok_or(AccessError::NoData)?;
        let accessor = ImageReadAccessor::for_item(self, channel, AccessOptions::default())?;

        let table = layout.offset_table();
        let element = index[0] as usize
            + index[1] as usize * table[1]
            + index[2] as usize * table[2]
            + time_step as usize * table[3];
        let start = format.buffer_size(element);
        let bytes = accessor
            .data()
            .get(start..start + format.size())
            .ok_or(AccessError::OutOfRange {
                offset: start,
                size: accessor.size(),
            })?;

        let component_type = format.component_type();
        let width = component_type.byte_size();
        let value = if format.is_packed_rgb24() {
            (0..3)
                .filter_map(|c| component_type.decode_f64(&bytes[c * width..]))
                .sum::<f64>()
        } else {
            component_type
                .decode_f64(&bytes[component as usize * width..])
                .unwrap_or(0.0)
        };
        Ok(value)
    }

    /// Like [`pixel_value_by_index`](Self::pixel_value_by_index), at a world
    /// position mapped through the geometry.
    pub fn pixel_value_by_world_coordinate(
        &self,
        point: Point3,
        time_step: u32,
        component: u32,
    ) -> Result<f64, AccessError> {
        let geometry = self.geometry.as_ref().ok_or(ImageError::NotInitialized)?;
        let index = geometry.world_to_index(point);
        self.pixel_value_by_index(index, time_step, component)
    }

    // =========================================================================
    // Copies
    // =========================================================================

    /// New image with the same layout, channels and geometry and a copy of
    /// every volume that is set.
    pub fn duplicate(&self) -> Result<ImageContainer, AccessError> {
        let mut copy = ImageContainer::new();
        let Some(layout) = self.layout.as_ref() else {
            return Ok(copy);
        };
        copy.initialize_like(self)?;

        for n in 0..layout.channels() as i32 {
            for t in 0..layout.time_steps() as i32 {
                if !self.is_volume_set(t, n) {
                    continue;
                }
                let Some(volume) = self.get_volume_data(t, n) else {
                    continue;
                };
                let accessor = ImageReadAccessor::for_item(self, volume, AccessOptions::default())?;
                copy.set_volume(ImportData::Copy(accessor.data()), t, n)?;
            }
        }
        Ok(copy)
    }
}

impl Default for ImageContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ImageContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageContainer")
            .field("dimensions", &self.dimensions())
            .field("channels", &self.number_of_channels())
            .field("time_steps", &self.time_steps())
            .field("producer", &self.producer.is_some())
            .finish()
    }
}

/// Clears the updating flag when the producer returns (or unwinds).
struct UpdatingFlag<'a>(&'a AtomicBool);

impl Drop for UpdatingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn unnamed_channels(format: PixelFormat, channels: u32) -> Vec<(Option<String>, PixelFormat)> {
    (0..channels).map(|_| (None, format)).collect()
}
