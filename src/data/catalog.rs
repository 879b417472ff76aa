//! Per-image registry of channels.
//!
//! Every channel of an image shares the same extents; only the pixel format
//! (and the name) may differ. A channel's allocation handle stays empty until
//! data for the channel first becomes available.

use std::sync::{Arc, Weak};

use super::item::{BufferItem, MAX_IMAGE_DIMENSIONS};
use crate::pixel::PixelFormat;

/// Description of one channel.
#[derive(Debug, Clone)]
pub struct ChannelDescriptor {
    name: String,
    format: PixelFormat,
    /// Number of elements in the channel
    element_count: usize,
    /// Allocation handle, filled lazily
    data: Option<Weak<BufferItem>>,
}

impl ChannelDescriptor {
    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Element format.
    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    /// Number of elements.
    pub fn element_count(&self) -> usize {
        self.element_count
    }

    /// Total byte size, saturating at `usize::MAX`.
    pub fn byte_size(&self) -> usize {
        self.format
            .checked_buffer_size(self.element_count)
            .unwrap_or(usize::MAX)
    }

    /// The buffer recorded as this channel's allocation, if it is still alive.
    pub fn data(&self) -> Option<Arc<BufferItem>> {
        self.data.as_ref().and_then(Weak::upgrade)
    }

    /// Whether an allocation has been recorded (and is still alive).
    pub fn has_data(&self) -> bool {
        self.data().is_some()
    }
}

/// Ordered collection of channel descriptors sharing one set of extents.
#[derive(Debug, Clone, Default)]
pub struct ChannelCatalog {
    dimensions: Vec<u32>,
    channels: Vec<ChannelDescriptor>,
}

impl ChannelCatalog {
    /// Create an empty catalog for images of the given extents.
    pub fn new(dimensions: &[u32]) -> Self {
        let dimensions = dimensions.iter().copied().take(MAX_IMAGE_DIMENSIONS).collect();
        Self {
            dimensions,
            channels: Vec::new(),
        }
    }

    /// Append a channel and return its index.
    ///
    /// Unnamed channels are called `channel-<index>`.
    pub fn add_channel(&mut self, format: PixelFormat, name: Option<&str>) -> usize {
        let index = self.channels.len();
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| format!("channel-{}", index));
        self.channels.push(ChannelDescriptor {
            name,
            format,
            element_count: self.element_count(),
            data: None,
        });
        index
    }

    /// Shared extents.
    pub fn dimensions(&self) -> &[u32] {
        &self.dimensions
    }

    /// Elements per channel, saturating at `usize::MAX`.
    pub fn element_count(&self) -> usize {
        self.dimensions
            .iter()
            .try_fold(1usize, |count, &d| count.checked_mul(d as usize))
            .unwrap_or(usize::MAX)
    }

    /// Number of channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the catalog has no channels.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channel descriptor by index.
    pub fn channel(&self, n: usize) -> Option<&ChannelDescriptor> {
        self.channels.get(n)
    }

    /// Channel index by name.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.channels.iter().position(|c| c.name == name)
    }

    /// Pixel format of channel `n`.
    pub fn pixel_format(&self, n: usize) -> Option<PixelFormat> {
        self.channels.get(n).map(|c| c.format)
    }

    /// Iterate over all channels.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelDescriptor> {
        self.channels.iter()
    }

    /// Record `item` as the allocation of channel `n` unless one is already recorded.
    pub(crate) fn set_data(&mut self, n: usize, item: &Arc<BufferItem>) {
        if let Some(channel) = self.channels.get_mut(n) {
            if !channel.has_data() {
                channel.data = Some(Arc::downgrade(item));
            }
        }
    }
}
