//! Raw pixel memory and the import memory-management modes.
//!
//! All pixel bytes live in a [`RawMemory`] block. A block is either owned
//! (allocated by the container, or a caller `Vec` whose ownership was handed
//! over) and freed when the last [`BufferItem`](super::BufferItem) referring to
//! it is dropped, or external, in which case it is never freed by the crate.
//!
//! Mutation goes through raw pointers only. Exclusive access to a byte range is
//! established by the accessor protocol in [`crate::access`], never by the
//! borrow checker, which is why the block is shared behind an `Arc` and
//! handed out as pointers.

use std::fmt;
use std::ptr::NonNull;

use serde::Serialize;

// =============================================================================
// Memory Mode
// =============================================================================

/// How the bytes behind a buffer are managed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryMode {
    /// The bytes were copied into a buffer allocated by the container.
    CopyMemory,
    /// The container took ownership of a caller buffer and frees it.
    ManageMemory,
    /// The container only references caller memory and never frees it.
    ReferenceMemory,
}

impl MemoryMode {
    /// Whether buffers in this mode are freed by the container.
    #[inline]
    pub const fn frees_memory(self) -> bool {
        !matches!(self, Self::ReferenceMemory)
    }
}

// =============================================================================
// External Memory
// =============================================================================

/// A caller-owned memory block that the container may reference but never frees.
pub struct ExternalMemory {
    ptr: NonNull<u8>,
    len: usize,
}

impl ExternalMemory {
    /// Wrap a raw memory block.
    ///
    /// Returns `None` for a null pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for as long as
    /// any image buffer references it, and must not be accessed through other
    /// paths while an image accessor holds a range inside it.
    pub unsafe fn new(ptr: *mut u8, len: usize) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, len })
    }

    /// Reference a leaked or otherwise `'static` buffer.
    pub fn from_static(buffer: &'static mut [u8]) -> Self {
        let len = buffer.len();
        Self {
            ptr: NonNull::from(buffer).cast(),
            len,
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the block is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl fmt::Debug for ExternalMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalMemory")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

// SAFETY: the creator of an `ExternalMemory` promises the block stays valid
// and is only touched under the accessor protocol.
unsafe impl Send for ExternalMemory {}
unsafe impl Sync for ExternalMemory {}

// =============================================================================
// Import Data
// =============================================================================

/// Caller-supplied pixel bytes together with their memory-management mode.
#[derive(Debug)]
pub enum ImportData<'a> {
    /// Copy the bytes into a buffer owned by the container.
    Copy(&'a [u8]),
    /// Hand the buffer over; the container frees it later.
    Manage(Vec<u8>),
    /// Reference the caller's buffer without ever freeing it.
    Reference(ExternalMemory),
}

impl ImportData<'_> {
    /// The memory-management mode requested by this import.
    pub fn mode(&self) -> MemoryMode {
        match self {
            Self::Copy(_) => MemoryMode::CopyMemory,
            Self::Manage(_) => MemoryMode::ManageMemory,
            Self::Reference(_) => MemoryMode::ReferenceMemory,
        }
    }

    /// Number of bytes supplied.
    pub fn len(&self) -> usize {
        match self {
            Self::Copy(bytes) => bytes.len(),
            Self::Manage(buffer) => buffer.len(),
            Self::Reference(external) => external.len(),
        }
    }

    /// Whether no bytes were supplied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the supplied bytes into `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of `self.len()` bytes and must not
    /// overlap the source.
    pub(crate) unsafe fn copy_to(&self, dst: *mut u8) {
        let src = match self {
            Self::Copy(bytes) => bytes.as_ptr(),
            Self::Manage(buffer) => buffer.as_ptr(),
            Self::Reference(external) => external.ptr.as_ptr() as *const u8,
        };
        if src != dst as *const u8 {
            std::ptr::copy_nonoverlapping(src, dst, self.len());
        }
    }
}

// =============================================================================
// Raw Memory
// =============================================================================

/// One contiguous allocation (or external block) of pixel bytes.
pub(crate) struct RawMemory {
    ptr: NonNull<u8>,
    len: usize,
    mode: MemoryMode,
}

impl RawMemory {
    /// Allocate `len` zeroed bytes.
    pub(crate) fn zeroed(len: usize) -> Self {
        Self::from_vec(vec![0u8; len], MemoryMode::CopyMemory)
    }

    /// Build a block from import data, copying or adopting as requested.
    pub(crate) fn from_import(data: ImportData<'_>) -> Self {
        match data {
            ImportData::Copy(bytes) => Self::from_vec(bytes.to_vec(), MemoryMode::CopyMemory),
            ImportData::Manage(buffer) => Self::from_vec(buffer, MemoryMode::ManageMemory),
            ImportData::Reference(external) => Self {
                ptr: external.ptr,
                len: external.len,
                mode: MemoryMode::ReferenceMemory,
            },
        }
    }

    fn from_vec(buffer: Vec<u8>, mode: MemoryMode) -> Self {
        let boxed = buffer.into_boxed_slice();
        let len = boxed.len();
        // `Box::into_raw` never yields null.
        let ptr = NonNull::new(Box::into_raw(boxed) as *mut u8).unwrap_or(NonNull::dangling());
        Self { ptr, len, mode }
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn mode(&self) -> MemoryMode {
        self.mode
    }
}

impl Drop for RawMemory {
    fn drop(&mut self) {
        if self.mode.frees_memory() {
            // SAFETY: owned blocks were produced by `Box::into_raw` on a boxed
            // slice of exactly `len` bytes and are dropped exactly once here.
            unsafe {
                let slice = std::ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), self.len);
                drop(Box::from_raw(slice));
            }
        }
    }
}

impl fmt::Debug for RawMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawMemory")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .field("mode", &self.mode)
            .finish()
    }
}

// SAFETY: the block is plain bytes; concurrent access to overlapping ranges is
// arbitrated by the accessor protocol.
unsafe impl Send for RawMemory {}
unsafe impl Sync for RawMemory {}
