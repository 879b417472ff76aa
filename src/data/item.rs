//! Buffer items: contiguous N-dimensional blocks of pixel memory.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;

use super::memory::{ImportData, MemoryMode, RawMemory};
use crate::error::ImageError;
use crate::pixel::PixelFormat;

/// Maximum number of axes an image or buffer may have.
pub const MAX_IMAGE_DIMENSIONS: usize = 8;

static NEXT_ITEM_ID: AtomicU64 = AtomicU64::new(1);
static CLOCK: AtomicU64 = AtomicU64::new(1);

/// Next value of the process-wide modification clock.
pub(crate) fn next_timestamp() -> u64 {
    CLOCK.fetch_add(1, Ordering::Relaxed)
}

/// A contiguous block of pixel memory interpreted as `dimension`-D data.
///
/// A root item owns (or externally references) its memory block. A view item
/// shares its parent's block at a byte offset; it keeps the block alive but
/// holds only a weak back-reference to the parent item, which is used for
/// ancestry queries and never for ownership.
pub struct BufferItem {
    id: u64,
    memory: Arc<RawMemory>,
    /// Byte offset of this item inside `memory`
    offset: usize,
    /// Byte size of this item
    size: usize,
    format: PixelFormat,
    dimension: usize,
    extents: [u32; MAX_IMAGE_DIMENSIONS],
    parent: Option<Weak<BufferItem>>,
    complete: AtomicBool,
    modified: AtomicU64,
}

impl BufferItem {
    /// Allocate a zero-filled root item.
    ///
    /// Fails with [`ImageError::TooLarge`] when the byte size does not fit
    /// the address space.
    pub fn allocate(format: PixelFormat, extents: &[u32]) -> Result<Arc<Self>, ImageError> {
        let size = byte_size(format, extents).ok_or_else(|| ImageError::TooLarge(extents.to_vec()))?;
        Ok(Arc::new(Self::root(RawMemory::zeroed(size), format, extents)))
    }

    /// Create a root item from caller data.
    ///
    /// The data must be exactly the byte size implied by `format` and `extents`.
    pub fn import(
        format: PixelFormat,
        extents: &[u32],
        data: ImportData<'_>,
    ) -> Result<Arc<Self>, ImageError> {
        let expected =
            byte_size(format, extents).ok_or_else(|| ImageError::TooLarge(extents.to_vec()))?;
        if data.len() != expected {
            return Err(ImageError::DataSizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Arc::new(Self::root(
            RawMemory::from_import(data),
            format,
            extents,
        )))
    }

    /// Create a view into `parent` starting `byte_offset` bytes into it.
    ///
    /// Returns `None` if the view would not fit inside the parent.
    pub fn view(parent: &Arc<BufferItem>, extents: &[u32], byte_offset: usize) -> Option<Arc<Self>> {
        let size = byte_size(parent.format, extents)?;
        if byte_offset.checked_add(size)? > parent.size || extents.len() > MAX_IMAGE_DIMENSIONS {
            return None;
        }
        Some(Arc::new(Self {
            id: NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed),
            memory: Arc::clone(&parent.memory),
            offset: parent.offset + byte_offset,
            size,
            format: parent.format,
            dimension: extents.len(),
            extents: pad_extents(extents),
            parent: Some(Arc::downgrade(parent)),
            complete: AtomicBool::new(false),
            modified: AtomicU64::new(next_timestamp()),
        }))
    }

    fn root(memory: RawMemory, format: PixelFormat, extents: &[u32]) -> Self {
        let size = memory.len();
        Self {
            id: NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed),
            memory: Arc::new(memory),
            offset: 0,
            size,
            format,
            dimension: extents.len().min(MAX_IMAGE_DIMENSIONS),
            extents: pad_extents(extents),
            parent: None,
            complete: AtomicBool::new(false),
            modified: AtomicU64::new(next_timestamp()),
        }
    }

    /// Unique identifier of this item.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Start of this item's bytes.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        // SAFETY: `offset` never exceeds the block length (checked in `view`).
        unsafe { self.memory.as_ptr().add(self.offset) }
    }

    /// Byte size.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Byte offset inside the underlying memory block.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Element format.
    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    /// Number of axes.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Extents of the declared axes.
    pub fn extents(&self) -> &[u32] {
        &self.extents[..self.dimension]
    }

    /// Extent along `axis`, 1 beyond the declared axes.
    pub fn extent(&self, axis: usize) -> u32 {
        if axis < self.dimension {
            self.extents[axis]
        } else {
            1
        }
    }

    /// Number of elements.
    pub fn element_count(&self) -> usize {
        self.size / self.format.size().max(1)
    }

    /// Parent item, if this is a view and the parent is still alive.
    pub fn parent(&self) -> Option<Arc<BufferItem>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Whether this item is a view into another item.
    pub fn is_view(&self) -> bool {
        self.parent.is_some()
    }

    /// Whether this item frees its memory when dropped.
    pub fn manages_memory(&self) -> bool {
        !self.is_view() && self.memory.mode().frees_memory()
    }

    /// How the underlying block is managed.
    pub fn memory_mode(&self) -> MemoryMode {
        self.memory.mode()
    }

    /// Whether the item holds fully populated data.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    pub(crate) fn set_complete(&self, complete: bool) {
        self.complete.store(complete, Ordering::Release);
    }

    /// Timestamp of the last recorded modification.
    pub fn modified_time(&self) -> u64 {
        self.modified.load(Ordering::Relaxed)
    }

    pub(crate) fn touch(&self) {
        self.modified.store(next_timestamp(), Ordering::Relaxed);
    }

    /// Whether `ancestor` is this item's parent, grandparent, and so on.
    pub fn has_ancestor(&self, ancestor: &BufferItem) -> bool {
        let mut current = self.parent();
        while let Some(item) = current {
            if item.id == ancestor.id {
                return true;
            }
            current = item.parent();
        }
        false
    }

    /// Whether this item's bytes lie entirely inside `other`'s bytes.
    pub fn is_within(&self, other: &BufferItem) -> bool {
        Arc::ptr_eq(&self.memory, &other.memory)
            && self.offset >= other.offset
            && self.offset + self.size <= other.offset + other.size
    }

    /// Whether this item and `other` share at least one byte.
    pub fn aliases(&self, other: &BufferItem) -> bool {
        Arc::ptr_eq(&self.memory, &other.memory)
            && self.offset < other.offset + other.size
            && other.offset < self.offset + self.size
    }

    /// Copy `len` bytes from `src` into this item at `byte_offset`.
    ///
    /// # Safety
    ///
    /// `src` must be valid for `len` reads, the destination range must not be
    /// accessed concurrently, and the two ranges must not overlap.
    pub(crate) unsafe fn write_at(&self, byte_offset: usize, src: *const u8, len: usize) {
        debug_assert!(byte_offset + len <= self.size);
        std::ptr::copy_nonoverlapping(src, self.as_ptr().add(byte_offset), len);
    }

    /// Copy the item's bytes out.
    ///
    /// # Safety
    ///
    /// No writer may be modifying the item's range concurrently.
    pub(crate) unsafe fn snapshot(&self) -> Bytes {
        let bytes = std::slice::from_raw_parts(self.as_ptr() as *const u8, self.size);
        Bytes::copy_from_slice(bytes)
    }
}

impl fmt::Debug for BufferItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferItem")
            .field("id", &self.id)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("format", &self.format)
            .field("extents", &self.extents())
            .field("view", &self.is_view())
            .field("complete", &self.is_complete())
            .finish()
    }
}

fn byte_size(format: PixelFormat, extents: &[u32]) -> Option<usize> {
    let elements = extents
        .iter()
        .try_fold(1usize, |count, &e| count.checked_mul(e as usize))?;
    format.checked_buffer_size(elements)
}

fn pad_extents(extents: &[u32]) -> [u32; MAX_IMAGE_DIMENSIONS] {
    let mut padded = [1u32; MAX_IMAGE_DIMENSIONS];
    for (dst, &src) in padded.iter_mut().zip(extents) {
        *dst = src;
    }
    padded
}
