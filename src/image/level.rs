//! Index arithmetic for the slice / volume / channel hierarchy.
//!
//! ```text
//!   channel n   ──────────────────────────────────────────────  off[max(dim,4)] elements
//!   volume t    ────────────┬────────────┬─────────────────────  off[3] elements each
//!   slice s     ──┬──┬──┬───┴──┬──┬──┬───┴ ...                   off[2] elements each
//! ```
//!
//! Axes 0 and 1 are in-plane, axis 2 is the slice axis, axis 3 and every axis
//! beyond it are folded into "time steps", and channels are kept in separate
//! buffers. One [`Slot`] names one cell of one of the three levels; the
//! container resolves every level with the same routine parameterized by the
//! slot's [`Granularity`].

use super::region::ImageRegion;
use crate::data::MAX_IMAGE_DIMENSIONS;
use crate::error::ImageError;

/// Level of the storage hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Granularity {
    Slice,
    Volume,
    Channel,
}

impl Granularity {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Slice => "slice",
            Self::Volume => "volume",
            Self::Channel => "channel",
        }
    }
}

/// A validated (s, t, n) position at one granularity.
///
/// Fields that do not apply to the granularity are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Slot {
    pub granularity: Granularity,
    pub s: u32,
    pub t: u32,
    pub n: u32,
}

/// Extents, offset table and derived counts of an initialized image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Layout {
    dimension: usize,
    extents: [u32; MAX_IMAGE_DIMENSIONS],
    /// Prefix products of the extents, `max(dimension, 4) + 1` entries
    offset_table: Vec<usize>,
    time_steps: u32,
    channels: u32,
}

impl Layout {
    /// Build a layout. Extents must already be validated (1..=8 axes, all >= 1).
    ///
    /// Fails with [`ImageError::TooLarge`] when the element count of a
    /// channel or the number of slices does not fit the address space.
    pub(crate) fn new(extents: &[u32], channels: u32) -> Result<Self, ImageError> {
        let too_large = || ImageError::TooLarge(extents.to_vec());
        let dimension = extents.len().min(MAX_IMAGE_DIMENSIONS);
        let mut padded = [1u32; MAX_IMAGE_DIMENSIONS];
        padded[..dimension].copy_from_slice(&extents[..dimension]);

        let table_len = dimension.max(4) + 1;
        let mut offset_table = Vec::with_capacity(table_len);
        offset_table.push(1usize);
        for axis in 0..table_len - 1 {
            let next = offset_table[axis]
                .checked_mul(padded[axis] as usize)
                .ok_or_else(too_large)?;
            offset_table.push(next);
        }

        let time_steps = u32::try_from(offset_table[table_len - 1] / offset_table[3].max(1))
            .map_err(|_| too_large())?;

        // Every slice of every channel needs a cell in the slice array.
        (offset_table[table_len - 1] / offset_table[2].max(1))
            .checked_mul(channels as usize)
            .ok_or_else(too_large)?;

        Ok(Self {
            dimension,
            extents: padded,
            offset_table,
            time_steps,
            channels,
        })
    }

    pub(crate) fn dimension(&self) -> usize {
        self.dimension
    }

    pub(crate) fn extents(&self) -> &[u32] {
        &self.extents[..self.dimension]
    }

    /// Extent along `axis`, 1 beyond the declared axes.
    pub(crate) fn extent(&self, axis: usize) -> u32 {
        if axis < self.dimension {
            self.extents[axis]
        } else {
            1
        }
    }

    pub(crate) fn offset_table(&self) -> &[usize] {
        &self.offset_table
    }

    pub(crate) fn time_steps(&self) -> u32 {
        self.time_steps
    }

    pub(crate) fn channels(&self) -> u32 {
        self.channels
    }

    pub(crate) fn slices(&self) -> u32 {
        self.extent(2)
    }

    // =========================================================================
    // Slots
    // =========================================================================

    /// Validate signed indices and build a slot. Negative or out-of-range
    /// indices yield `None`.
    pub(crate) fn slot(&self, granularity: Granularity, s: i32, t: i32, n: i32) -> Option<Slot> {
        let s = u32::try_from(s).ok()?;
        let t = u32::try_from(t).ok()?;
        let n = u32::try_from(n).ok()?;
        if n >= self.channels {
            return None;
        }
        let (s, t) = match granularity {
            Granularity::Slice => {
                if s >= self.slices() || t >= self.time_steps {
                    return None;
                }
                (s, t)
            }
            Granularity::Volume => {
                if t >= self.time_steps {
                    return None;
                }
                (0, t)
            }
            Granularity::Channel => (0, 0),
        };
        Some(Slot {
            granularity,
            s,
            t,
            n,
        })
    }

    /// Position of a slot inside its level's storage array.
    ///
    /// Slices are numbered `s + t * slices + n * slices * time_steps`, volumes
    /// `t + n * time_steps`.
    pub(crate) fn flat_index(&self, slot: Slot) -> usize {
        let slices = self.slices() as usize;
        let time_steps = self.time_steps as usize;
        let (s, t, n) = (slot.s as usize, slot.t as usize, slot.n as usize);
        match slot.granularity {
            Granularity::Slice => s + t * slices + n * slices * time_steps,
            Granularity::Volume => t + n * time_steps,
            Granularity::Channel => n,
        }
    }

    /// Length of a level's storage array.
    pub(crate) fn array_len(&self, granularity: Granularity) -> usize {
        let slices = self.slices() as usize;
        let time_steps = self.time_steps as usize;
        let channels = self.channels as usize;
        match granularity {
            Granularity::Slice => slices * time_steps * channels,
            Granularity::Volume => time_steps * channels,
            Granularity::Channel => channels,
        }
    }

    /// The slot one level up that contains `slot`.
    pub(crate) fn coarser(&self, slot: Slot) -> Option<Slot> {
        let granularity = match slot.granularity {
            Granularity::Slice => Granularity::Volume,
            Granularity::Volume => Granularity::Channel,
            Granularity::Channel => return None,
        };
        let t = if granularity == Granularity::Channel {
            0
        } else {
            slot.t
        };
        Some(Slot {
            granularity,
            s: 0,
            t,
            n: slot.n,
        })
    }

    /// The slots one level down that together make up `slot`.
    pub(crate) fn pieces(&self, slot: Slot) -> Vec<Slot> {
        match slot.granularity {
            Granularity::Slice => Vec::new(),
            Granularity::Volume => (0..self.slices())
                .map(|s| Slot {
                    granularity: Granularity::Slice,
                    s,
                    t: slot.t,
                    n: slot.n,
                })
                .collect(),
            Granularity::Channel => (0..self.time_steps)
                .map(|t| Slot {
                    granularity: Granularity::Volume,
                    s: 0,
                    t,
                    n: slot.n,
                })
                .collect(),
        }
    }

    /// Element offset of `slot` inside the coarser slot `ancestor`.
    pub(crate) fn element_offset(&self, slot: Slot, ancestor: Slot) -> usize {
        let slice = self.offset_table[2];
        let volume = self.offset_table[3];
        match (slot.granularity, ancestor.granularity) {
            (Granularity::Slice, Granularity::Volume) => slot.s as usize * slice,
            (Granularity::Slice, Granularity::Channel) => {
                slot.s as usize * slice + slot.t as usize * volume
            }
            (Granularity::Volume, Granularity::Channel) => slot.t as usize * volume,
            _ => 0,
        }
    }

    /// Extents of the buffer stored at a level.
    pub(crate) fn item_extents(&self, granularity: Granularity) -> Vec<u32> {
        match granularity {
            Granularity::Slice => vec![self.extent(0), self.extent(1)],
            Granularity::Volume => vec![self.extent(0), self.extent(1), self.extent(2)],
            Granularity::Channel => self.extents().to_vec(),
        }
    }

    /// Elements in one buffer of a level.
    pub(crate) fn element_count(&self, granularity: Granularity) -> usize {
        match granularity {
            Granularity::Slice => self.offset_table[2],
            Granularity::Volume => self.offset_table[3],
            Granularity::Channel => self.offset_table[self.dimension.max(4)],
        }
    }

    // =========================================================================
    // Regions
    // =========================================================================

    /// Region covering every element of every channel.
    pub(crate) fn largest_region(&self) -> ImageRegion {
        ImageRegion::new(
            [0; 5],
            [
                self.extent(0),
                self.extent(1),
                self.slices(),
                self.time_steps,
                self.channels,
            ],
        )
    }

    /// Region covered by a single slot.
    pub(crate) fn region_of(&self, slot: Slot) -> ImageRegion {
        let (x, y) = (self.extent(0), self.extent(1));
        match slot.granularity {
            Granularity::Slice => {
                ImageRegion::new([0, 0, slot.s, slot.t, slot.n], [x, y, 1, 1, 1])
            }
            Granularity::Volume => {
                ImageRegion::new([0, 0, 0, slot.t, slot.n], [x, y, self.slices(), 1, 1])
            }
            Granularity::Channel => ImageRegion::new(
                [0, 0, 0, 0, slot.n],
                [x, y, self.slices(), self.time_steps, 1],
            ),
        }
    }
}
