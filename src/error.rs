use thiserror::Error;

use crate::pixel::PixelFormat;

/// Errors raised while configuring or populating an image
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    /// Dimension count outside 1..=8
    #[error("Invalid dimension count: {0} (expected 1 to 8 axes)")]
    InvalidDimensionCount(usize),

    /// An axis was given a zero extent
    #[error("Invalid extent {extent} on axis {axis}: every extent must be at least 1")]
    InvalidExtent { axis: usize, extent: u32 },

    /// Operation requires an initialized image
    #[error("Image is not initialized")]
    NotInitialized,

    /// Supplied pixel data does not match the target buffer size
    #[error("Data size mismatch: expected {expected} bytes, got {actual}")]
    DataSizeMismatch { expected: usize, actual: usize },

    /// Extents whose element or byte count does not fit the address space
    #[error("Image of extents {0:?} is too large to address")]
    TooLarge(Vec<u32>),

    /// Zero time steps requested explicitly
    #[error("Invalid number of time steps: must be at least 1")]
    InvalidTimeSteps,
}

/// Errors raised by read/write accessors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessError {
    /// A conflicting accessor is live and the caller asked not to wait
    #[error("Memory is locked by another accessor")]
    MemoryLocked,

    /// The calling thread already holds a conflicting accessor and would wait on itself
    #[error("Recursive lock: the calling thread already holds a conflicting accessor")]
    RecursiveLock,

    /// Overlap detection requires single contiguous ranges
    #[error("Overlap detection is only supported for coherent memory")]
    NonCoherentMemory,

    /// The buffer item is not part of the image's current data
    #[error("Buffer item does not belong to this image")]
    ForeignItem,

    /// Partial regions cannot be accessed
    #[error("Sub-region access is not supported")]
    SubRegionUnsupported,

    /// The requested element type does not match the image pixel format
    #[error("Pixel type mismatch: image holds {expected}, accessor requested {actual}")]
    TypeMismatch {
        expected: PixelFormat,
        actual: PixelFormat,
    },

    /// The requested dimensionality does not match the accessed data
    #[error("Dimension mismatch: data has {expected} axes, accessor requested {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Checked element access outside the accessor's byte range
    #[error("Index out of range: byte offset {offset} is outside a {size}-byte region")]
    OutOfRange { offset: usize, size: usize },

    /// Index outside the image along one axis
    #[error("Index {index} on axis {axis} is outside the image extent {extent}")]
    OutOfBounds { axis: usize, index: i64, extent: u32 },

    /// No buffer could be resolved for the access
    #[error("No data available for access")]
    NoData,

    /// Error from the image
    #[error("Image error: {0}")]
    Image(#[from] ImageError),
}
