//! Image container and its storage hierarchy.
//!
//! - [`ImageContainer`]: slices, volumes and channels with lazy composition
//! - [`ImageRegion`]: five-axis region descriptors
//! - [`Producer`]: upstream stage that fills missing data on demand
//! - [`VolumeDescriptor`] / [`ExtentOverrides`]: initialization from external volumes

mod container;
mod descriptor;
mod level;
mod producer;
mod region;
mod state;

pub use container::ImageContainer;
pub use descriptor::{ExtentOverrides, VolumeDescriptor};
pub use producer::Producer;
pub use region::{ImageRegion, REGION_AXES};
