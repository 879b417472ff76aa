//! Spatial geometry collaborator.
//!
//! The container never interprets geometry itself. It stores an
//! `Arc<dyn Geometry>` next to the pixel data, hands it to typed accessors for
//! world-coordinate lookups, and reads extents from it when an image is
//! initialized from a geometry.

use std::fmt::Debug;

/// World-space point (x, y, z), in millimetres by convention.
pub type Point3 = [f64; 3];

/// Read-only spatial description of an image.
pub trait Geometry: Debug + Send + Sync {
    /// Map a world-space point to the nearest voxel index.
    ///
    /// The result may lie outside the image; callers check bounds.
    fn world_to_index(&self, point: Point3) -> [i64; 3];

    /// Map a (possibly fractional) voxel index to world space.
    fn index_to_world(&self, index: [f64; 3]) -> Point3;

    /// Extent along a spatial axis (0..3) in voxels.
    fn extent(&self, axis: usize) -> f64;

    /// Voxel spacing along x, y and z.
    fn spacing(&self) -> [f64; 3];

    /// World position of voxel (0, 0, 0).
    fn origin(&self) -> Point3;

    /// Number of time steps described by this geometry.
    fn time_steps(&self) -> u32 {
        1
    }
}

// =============================================================================
// Axis-aligned geometry
// =============================================================================

/// Axis-aligned geometry defined by origin, spacing and extents.
///
/// This is the default geometry attached by
/// [`ImageContainer::initialize`](crate::ImageContainer::initialize).
#[derive(Debug, Clone, PartialEq)]
pub struct AxisAlignedGeometry {
    origin: Point3,
    spacing: [f64; 3],
    extents: [u32; 3],
    time_steps: u32,
}

impl AxisAlignedGeometry {
    /// Unit-spaced geometry at the origin.
    pub fn new(extents: [u32; 3]) -> Self {
        Self {
            origin: [0.0; 3],
            spacing: [1.0; 3],
            extents,
            time_steps: 1,
        }
    }

    /// Set the world origin.
    pub fn with_origin(mut self, origin: Point3) -> Self {
        self.origin = origin;
        self
    }

    /// Set the voxel spacing. Non-positive entries are replaced by 1.0.
    pub fn with_spacing(mut self, spacing: [f64; 3]) -> Self {
        self.spacing = spacing.map(|s| if s > 0.0 { s } else { 1.0 });
        self
    }

    /// Set the number of time steps.
    pub fn with_time_steps(mut self, time_steps: u32) -> Self {
        self.time_steps = time_steps.max(1);
        self
    }

    /// Voxel extents along x, y and z.
    pub fn extents(&self) -> [u32; 3] {
        self.extents
    }
}

impl Geometry for AxisAlignedGeometry {
    fn world_to_index(&self, point: Point3) -> [i64; 3] {
        let mut index = [0i64; 3];
        for axis in 0..3 {
            let continuous = (point[axis] - self.origin[axis]) / self.spacing[axis];
            index[axis] = continuous.round() as i64;
        }
        index
    }

    fn index_to_world(&self, index: [f64; 3]) -> Point3 {
        let mut point = [0.0; 3];
        for axis in 0..3 {
            point[axis] = self.origin[axis] + index[axis] * self.spacing[axis];
        }
        point
    }

    fn extent(&self, axis: usize) -> f64 {
        self.extents.get(axis).copied().unwrap_or(1) as f64
    }

    fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    fn origin(&self) -> Point3 {
        self.origin
    }

    fn time_steps(&self) -> u32 {
        self.time_steps
    }
}
