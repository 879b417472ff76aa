//! Header of an external volumetric dataset, used to initialize an image.

use crate::geometry::{AxisAlignedGeometry, Point3};
use crate::pixel::PixelFormat;

/// Shape, element format and spacing of a volume produced elsewhere
/// (a file reader, a rendering toolkit, ...).
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeDescriptor {
    format: PixelFormat,
    extents: Vec<u32>,
    spacing: [f64; 3],
    origin: Point3,
}

impl VolumeDescriptor {
    /// Describe a unit-spaced volume at the origin.
    pub fn new(format: PixelFormat, extents: &[u32]) -> Self {
        Self {
            format,
            extents: extents.to_vec(),
            spacing: [1.0; 3],
            origin: [0.0; 3],
        }
    }

    pub fn with_spacing(mut self, spacing: [f64; 3]) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_origin(mut self, origin: Point3) -> Self {
        self.origin = origin;
        self
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    pub fn extents(&self) -> &[u32] {
        &self.extents
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    pub fn origin(&self) -> Point3 {
        self.origin
    }

    /// Axis-aligned geometry matching the descriptor and the given extents.
    pub(crate) fn geometry(&self, extents: &[u32], time_steps: u32) -> AxisAlignedGeometry {
        let axis = |i: usize| extents.get(i).copied().unwrap_or(1);
        AxisAlignedGeometry::new([axis(0), axis(1), axis(2)])
            .with_origin(self.origin)
            .with_spacing(self.spacing)
            .with_time_steps(time_steps)
    }
}

/// Extent overrides applied on top of a [`VolumeDescriptor`].
///
/// Setting an override also raises the image dimension far enough to hold the
/// overridden axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtentOverrides {
    /// Extent of axis 1
    pub rows: Option<u32>,
    /// Extent of axis 2
    pub slices: Option<u32>,
    /// Extent of axis 3
    pub time_steps: Option<u32>,
}

impl ExtentOverrides {
    /// Apply the overrides to `extents`, returning the resulting extents.
    pub(crate) fn apply(&self, extents: &[u32]) -> Vec<u32> {
        let mut result = extents.to_vec();
        for (axis, value) in [(1, self.rows), (2, self.slices), (3, self.time_steps)] {
            if let Some(value) = value {
                if result.len() <= axis {
                    result.resize(axis + 1, 1);
                }
                result[axis] = value;
            }
        }
        result
    }
}
