//! Pixel format descriptors and typed element support.
//!
//! - [`PixelFormat`]: value-comparable description used for all buffer size arithmetic
//! - [`ComponentType`]: storage type of a single component
//! - [`PixelElement`] / [`PixelComponent`]: Rust types that map onto a format,
//!   used by the typed [`PixelAccessor`](crate::access::PixelAccessor)

mod element;
mod format;

pub use element::{PixelComponent, PixelElement};
pub use format::{ComponentType, PixelFormat};
