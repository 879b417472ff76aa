//! Five-axis region descriptors.

use serde::Serialize;

/// Number of axes a region spans: x, y, slice, time, channel.
pub const REGION_AXES: usize = 5;

/// Axis-aligned box over (x, y, slice, time, channel).
///
/// Used as the requested region handed to a [`Producer`](super::Producer) and
/// to validate the region given to an accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ImageRegion {
    index: [u32; REGION_AXES],
    size: [u32; REGION_AXES],
}

impl ImageRegion {
    /// Create a region from its start index and size.
    pub fn new(index: [u32; REGION_AXES], size: [u32; REGION_AXES]) -> Self {
        Self { index, size }
    }

    /// Start index per axis.
    pub fn index(&self) -> [u32; REGION_AXES] {
        self.index
    }

    /// Size per axis.
    pub fn size(&self) -> [u32; REGION_AXES] {
        self.size
    }

    /// Number of elements covered (all channels counted).
    pub fn element_count(&self) -> u64 {
        self.size.iter().map(|&s| s as u64).product()
    }

    /// Whether `other` lies completely inside this region.
    pub fn contains(&self, other: &ImageRegion) -> bool {
        (0..REGION_AXES).all(|axis| {
            let start = self.index[axis] as u64;
            let end = start + self.size[axis] as u64;
            let other_start = other.index[axis] as u64;
            let other_end = other_start + other.size[axis] as u64;
            other_start >= start && other_end <= end
        })
    }

    /// Slice index covered, if the region spans exactly one slice.
    pub fn slice(&self) -> Option<u32> {
        (self.size[2] == 1).then_some(self.index[2])
    }

    /// Time step covered, if the region spans exactly one time step.
    pub fn time_step(&self) -> Option<u32> {
        (self.size[3] == 1).then_some(self.index[3])
    }

    /// Channel covered, if the region spans exactly one channel.
    pub fn channel(&self) -> Option<u32> {
        (self.size[4] == 1).then_some(self.index[4])
    }
}
