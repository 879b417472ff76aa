//! Reader/writer arbitration over byte ranges of one image.
//!
//! Every live accessor is described by an [`AccessRecord`]: the byte range it
//! covers, the thread that created it and a private [`WaitLock`] that the
//! accessor keeps locked for as long as it is alive. Records are kept in the
//! reader and writer lists of the image, guarded by the image's coordinating
//! mutex.
//!
//! ```text
//!   lock coordinating mutex
//!        │
//!        ▼
//!   scan lists for an overlapping, conflicting record ◀─────────────┐
//!        │                                                          │
//!        ├── none ──────────▶ register self, unlock, Active         │
//!        │                                                          │
//!        ├── FAIL_IF_LOCKED ▶ unlock, MemoryLocked                  │
//!        │                                                          │
//!        ├── same thread ───▶ unlock, RecursiveLock                 │
//!        │                                                          │
//!        └── otherwise ─────▶ add waiter, unlock,                   │
//!                             block on the record's wait lock, ─────┘
//!                             lock coordinating mutex again
//! ```
//!
//! The scan restarts from the beginning after every wait: the lists may have
//! changed while the mutex was released.

use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
#[cfg(not(target_family = "wasm"))]
use std::thread::{self, ThreadId};

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::data::BufferItem;
use crate::error::AccessError;
use crate::image::ImageContainer;

static NEXT_ACCESS_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// Options
// =============================================================================

/// Option flags of one accessor construction.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AccessOptions(u32);

impl AccessOptions {
    /// Wait for conflicting accessors to be released.
    pub const NONE: Self = Self(0);

    /// Fail with [`AccessError::MemoryLocked`] instead of waiting.
    pub const FAIL_IF_LOCKED: Self = Self(1);

    const IGNORE_LOCK: u32 = 1 << 1;

    /// Add [`FAIL_IF_LOCKED`](Self::FAIL_IF_LOCKED).
    pub const fn fail_if_locked(self) -> Self {
        Self(self.0 | Self::FAIL_IF_LOCKED.0)
    }

    /// Skip arbitration.
    ///
    /// A read accessor with this option never registers and never waits. A
    /// write accessor still waits for conflicting accessors, but read
    /// accessors do not wait for it.
    ///
    /// # Safety
    ///
    /// The caller must guarantee by other means that no accessor writes the
    /// covered bytes while the resulting accessor is alive, typically because
    /// the calling scope already holds a write accessor over them and does
    /// not use it concurrently.
    pub const unsafe fn with_ignore_lock(self) -> Self {
        Self(self.0 | Self::IGNORE_LOCK)
    }

    pub const fn fails_if_locked(self) -> bool {
        self.0 & Self::FAIL_IF_LOCKED.0 != 0
    }

    pub const fn ignores_lock(self) -> bool {
        self.0 & Self::IGNORE_LOCK != 0
    }
}

impl BitOr for AccessOptions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for AccessOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessOptions")
            .field("fail_if_locked", &self.fails_if_locked())
            .field("ignore_lock", &self.ignores_lock())
            .finish()
    }
}

// =============================================================================
// States
// =============================================================================

/// Lifecycle of one accessor. There is no way back from `Released`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessState {
    Constructing,
    Arbitrating,
    Active,
    Released,
}

impl AccessState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => AccessState::Constructing,
            1 => AccessState::Arbitrating,
            2 => AccessState::Active,
            _ => AccessState::Released,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccessKind {
    Read,
    Write,
}

impl AccessKind {
    pub(crate) fn name(self) -> &'static str {
        match self {
            AccessKind::Read => "read",
            AccessKind::Write => "write",
        }
    }
}

// =============================================================================
// Wait lock
// =============================================================================

/// Private lock of one accessor that waiters block on.
///
/// The owning accessor holds the mutex from construction to release. Waiters
/// announce themselves with [`add_waiter`](Self::add_waiter) while the
/// coordinating mutex is held, then block in
/// [`wait_for_release`](Self::wait_for_release). The structure itself is
/// freed when the owner and the last waiter have dropped their handles.
pub struct WaitLock {
    mutex: Arc<Mutex<()>>,
    waiters: AtomicI32,
}

impl WaitLock {
    /// Create a wait lock that is already held by the caller.
    pub(crate) fn new_held() -> (Arc<Self>, OwnedMutexGuard<()>) {
        let mutex = Arc::new(Mutex::new(()));
        let guard = Arc::clone(&mutex).blocking_lock_owned();
        let lock = Arc::new(Self {
            mutex,
            waiters: AtomicI32::new(0),
        });
        (lock, guard)
    }

    pub(crate) fn add_waiter(&self) {
        self.waiters.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of threads currently announced as waiting.
    pub fn waiters(&self) -> i32 {
        self.waiters.load(Ordering::Acquire)
    }

    /// Block until the owner releases the lock.
    ///
    /// Returns `true` for the waiter whose departure brings the waiter count
    /// to zero or below.
    pub(crate) fn wait_for_release(&self) -> bool {
        let _guard = self.mutex.blocking_lock();
        self.waiters.fetch_sub(1, Ordering::AcqRel) <= 1
    }
}

impl fmt::Debug for WaitLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitLock")
            .field("waiters", &self.waiters())
            .finish()
    }
}

// =============================================================================
// Access record
// =============================================================================

/// Byte range and identity of one accessor.
#[derive(Debug)]
pub(crate) struct AccessRecord {
    id: u64,
    kind: AccessKind,
    begin: usize,
    end: usize,
    coherent: bool,
    options: AccessOptions,
    #[cfg(not(target_family = "wasm"))]
    thread: ThreadId,
    state: AtomicU8,
    wait_lock: Arc<WaitLock>,
}

impl AccessRecord {
    pub(crate) fn new(
        kind: AccessKind,
        begin: usize,
        len: usize,
        coherent: bool,
        options: AccessOptions,
        wait_lock: Arc<WaitLock>,
    ) -> Self {
        Self {
            id: NEXT_ACCESS_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            begin,
            end: begin + len,
            coherent,
            options,
            #[cfg(not(target_family = "wasm"))]
            thread: thread::current().id(),
            state: AtomicU8::new(AccessState::Constructing as u8),
            wait_lock,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn kind(&self) -> AccessKind {
        self.kind
    }

    pub(crate) fn options(&self) -> AccessOptions {
        self.options
    }

    pub(crate) fn state(&self) -> AccessState {
        AccessState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: AccessState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Whether the half-open byte ranges of both records intersect.
    pub(crate) fn overlaps(&self, other: &AccessRecord) -> Result<bool, AccessError> {
        if !self.coherent || !other.coherent {
            return Err(AccessError::NonCoherentMemory);
        }
        Ok(self.begin < other.end && other.begin < self.end)
    }

    pub(crate) fn wait_lock(&self) -> &Arc<WaitLock> {
        &self.wait_lock
    }

    /// Whether the calling thread created this record.
    #[cfg(not(target_family = "wasm"))]
    pub(crate) fn held_by_current_thread(&self) -> bool {
        thread::current().id() == self.thread
    }

    #[cfg(target_family = "wasm")]
    pub(crate) fn held_by_current_thread(&self) -> bool {
        false
    }

    /// Fail when `other` was created on the calling thread: waiting for it
    /// would never return.
    pub(crate) fn prevent_recursive_lock(&self, other: &AccessRecord) -> Result<(), AccessError> {
        if other.held_by_current_thread() {
            return Err(AccessError::RecursiveLock);
        }
        Ok(())
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Live accessors of one image, split by direction.
#[derive(Debug, Default)]
pub(crate) struct AccessCoordinator {
    readers: Vec<Arc<AccessRecord>>,
    writers: Vec<Arc<AccessRecord>>,
}

impl AccessCoordinator {
    /// First registered record that `record` must wait for, if any.
    ///
    /// Reads conflict with overlapping writers that do not ignore the lock.
    /// Writes conflict with overlapping readers and writers; readers that
    /// ignore the lock are never registered.
    pub(crate) fn find_conflict(
        &self,
        record: &AccessRecord,
    ) -> Result<Option<Arc<AccessRecord>>, AccessError> {
        match record.kind {
            AccessKind::Read => {
                for writer in &self.writers {
                    if writer.options.ignores_lock() {
                        continue;
                    }
                    if record.overlaps(writer)? {
                        return Ok(Some(Arc::clone(writer)));
                    }
                }
            }
            AccessKind::Write => {
                for other in self.readers.iter().chain(&self.writers) {
                    if other.kind == AccessKind::Read && other.options.ignores_lock() {
                        continue;
                    }
                    if record.overlaps(other)? {
                        return Ok(Some(Arc::clone(other)));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Any live record, reader or writer, sharing a byte with `item`.
    pub(crate) fn find_overlapping(&self, item: &BufferItem) -> Option<Arc<AccessRecord>> {
        let begin = item.as_ptr() as usize;
        let end = begin + item.size();
        self.readers
            .iter()
            .chain(&self.writers)
            .find(|record| record.begin < end && begin < record.end)
            .cloned()
    }

    pub(crate) fn register(&mut self, record: Arc<AccessRecord>) {
        match record.kind {
            AccessKind::Read => self.readers.push(record),
            AccessKind::Write => self.writers.push(record),
        }
    }

    /// Remove the record with `id`. Returns whether it was registered.
    pub(crate) fn release(&mut self, id: u64, kind: AccessKind) -> bool {
        let list = match kind {
            AccessKind::Read => &mut self.readers,
            AccessKind::Write => &mut self.writers,
        };
        let before = list.len();
        list.retain(|record| record.id != id);
        list.len() != before
    }

    pub(crate) fn reader_count(&self) -> usize {
        self.readers.len()
    }

    pub(crate) fn writer_count(&self) -> usize {
        self.writers.len()
    }
}

/// Register `record` over the bytes of `item` with the coordinator of
/// `image`, waiting for every conflicting accessor to be released first.
///
/// `item` must be part of the image's current data. This is checked again
/// after every wait, since the item may have been moved meanwhile.
pub(crate) fn arbitrate(
    image: &ImageContainer,
    record: &Arc<AccessRecord>,
    item: &BufferItem,
) -> Result<(), AccessError> {
    record.set_state(AccessState::Arbitrating);
    loop {
        let mut state = image.lock_state();
        if !state.holds(item) {
            debug!(id = record.id, item = item.id(), "Item is not part of the image");
            return Err(AccessError::ForeignItem);
        }
        let Some(conflict) = state.access.find_conflict(record)? else {
            state.access.register(Arc::clone(record));
            record.set_state(AccessState::Active);
            debug!(
                id = record.id,
                kind = record.kind.name(),
                bytes = record.end - record.begin,
                readers = state.access.reader_count(),
                writers = state.access.writer_count(),
                "Registered accessor"
            );
            return Ok(());
        };

        if record.options.fails_if_locked() {
            debug!(
                id = record.id,
                kind = record.kind.name(),
                holder = conflict.id,
                "Memory locked, not waiting"
            );
            return Err(AccessError::MemoryLocked);
        }
        record.prevent_recursive_lock(&conflict)?;

        let wait_lock = Arc::clone(&conflict.wait_lock);
        wait_lock.add_waiter();
        drop(state);

        trace!(
            id = record.id,
            kind = record.kind.name(),
            holder = conflict.id,
            "Waiting for conflicting accessor"
        );
        if wait_lock.wait_for_release() {
            trace!(holder = conflict.id, "Last waiter left the wait lock");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
