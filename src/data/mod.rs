//! Pixel memory layer.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  channel item (root, owns)   │  RawMemory block
//! │ ┌──────────┐ ┌──────────┐    │
//! │ │ volume t0│ │ volume t1│    │  views at t * volume_bytes
//! │ │┌──┐┌──┐  │ │┌──┐┌──┐  │    │
//! │ ││s0││s1│  │ ││s0││s1│  │    │  views at s * slice_bytes
//! │ │└──┘└──┘  │ │└──┘└──┘  │    │
//! │ └──────────┘ └──────────┘    │
//! └──────────────────────────────┘
//! ```
//!
//! - [`BufferItem`]: a root block or a view into one
//! - [`ImportData`] / [`MemoryMode`]: copy, adopt or reference caller memory
//! - [`ChannelCatalog`]: channel names, formats and allocation handles

mod catalog;
mod item;
mod memory;

pub use catalog::{ChannelCatalog, ChannelDescriptor};
pub use item::{BufferItem, MAX_IMAGE_DIMENSIONS};
pub(crate) use item::next_timestamp;
pub use memory::{ExternalMemory, ImportData, MemoryMode};
