//! # voxelcore
//!
//! A multi-dimensional image container for medical imaging together with a
//! concurrency-safe accessor protocol for its pixel memory.
//!
//! An image has up to eight axes. Axes 0 and 1 span a slice, axis 2 stacks
//! slices into a volume, and every axis from 3 on counts as time. Each
//! channel holds one time series of volumes. Data can be stored and
//! requested at any of the three granularities; the container composes
//! slices into volumes and decomposes channels into views on demand, so one
//! byte is never stored twice.
//!
//! ## Features
//!
//! - **Lazy composition**: volumes assembled from slices, slices served as views of volumes
//! - **Memory modes**: copy caller data, adopt a caller buffer, or reference external memory
//! - **Byte-range arbitration**: readers share, writers exclude, disjoint ranges never wait
//! - **Self-deadlock detection**: conflicting re-entry on the same thread fails instead of hanging
//! - **Typed access**: `D`-dimensional element views checked against the pixel format
//!
//! ## Architecture
//!
//! - [`pixel`] - Pixel format descriptors and element types
//! - [`geometry`] - Spatial geometry collaborator
//! - [`data`] - Buffer items, memory ownership and the channel catalog
//! - [`image`] - The image container and its producer interface
//! - [`access`] - Read, write and typed pixel accessors
//! - [`stress`] - Concurrent diagnostic runs
//! - [`config`] - CLI configuration of the diagnostic binary
//!
//! ## Example
//!
//! ```rust,no_run
//! use voxelcore::{AccessOptions, ImageContainer, ImageReadAccessor, ImportData, PixelFormat};
//!
//! let mut image = ImageContainer::new();
//! image.initialize(PixelFormat::of::<u8>(), &[2, 2, 3], 1).unwrap();
//!
//! for (s, value) in [7u8, 9, 3].into_iter().enumerate() {
//!     image.set_slice(ImportData::Copy(&[value; 4]), s as i32, 0, 0).unwrap();
//! }
//! assert!(image.is_volume_set(0, 0));
//!
//! let volume = image.get_volume_data(0, 0).unwrap();
//! let reader = ImageReadAccessor::for_item(&image, volume, AccessOptions::NONE).unwrap();
//! assert_eq!(reader.data(), &[7, 7, 7, 7, 9, 9, 9, 9, 3, 3, 3, 3]);
//! ```

pub mod access;
pub mod config;
pub mod data;
pub mod error;
pub mod geometry;
pub mod image;
pub mod pixel;
pub mod stress;

// Re-export commonly used types
pub use access::{
    AccessOptions, AccessState, ImageAccess, ImageAccessMut, ImageReadAccessor,
    ImageWriteAccessor, PixelAccessor, WaitLock,
};
pub use data::{
    BufferItem, ChannelCatalog, ChannelDescriptor, ExternalMemory, ImportData, MemoryMode,
    MAX_IMAGE_DIMENSIONS,
};
pub use error::{AccessError, ImageError};
pub use geometry::{AxisAlignedGeometry, Geometry, Point3};
pub use image::{ExtentOverrides, ImageContainer, ImageRegion, Producer, VolumeDescriptor, REGION_AXES};
pub use pixel::{ComponentType, PixelComponent, PixelElement, PixelFormat};
pub use stress::{run_scenario, run_stress, ScenarioReport, StressConfig, StressReport};
