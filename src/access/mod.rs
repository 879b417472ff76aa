//! Arbitrated read/write access to image memory.
//!
//! - [`ImageReadAccessor`]: shared access, waits for overlapping writers
//! - [`ImageWriteAccessor`]: exclusive access, waits for overlapping readers and writers
//! - [`PixelAccessor`]: typed element view over either of them
//!
//! Overlap is decided on byte ranges, so accessors over disjoint slices or
//! volumes of one image never wait for each other. Constructing an accessor
//! may block the calling thread; it must not be done from inside an async
//! task.

mod coordinator;
mod handle;
mod pixel;
mod read;
mod write;

pub(crate) use coordinator::{AccessCoordinator, AccessRecord};
pub use coordinator::{AccessOptions, AccessState, WaitLock};
pub use pixel::{ImageAccess, ImageAccessMut, PixelAccessor};
pub use read::ImageReadAccessor;
pub use write::ImageWriteAccessor;
