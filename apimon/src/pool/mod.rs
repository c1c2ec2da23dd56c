//! # Per-Thread Wide Buffer Pool
//!
//! Canonicalization needs several path-sized scratch buffers per call. Heap
//! allocation of that size on every intercepted call is slow and, worse, can
//! recurse into the very APIs being monitored. The pool hands out
//! fixed-capacity [`WideBuf`]s from a per-thread slot array instead.
//!
//! ## Layout
//!
//! ```text
//! directory: DashMap<ThreadId, SlotArray>
//!
//!   thread A ─▶ [ Free(buf) | OnLoan(id) | Free(buf) | ... ]   (≤ N slots)
//!   thread B ─▶ [ OnLoan(id) | ... ]
//! ```
//!
//! - Slots are created lazily up to `slots_per_thread`; a slot's storage is
//!   kept once created and reused by later borrows.
//! - A borrowed buffer is identified by its storage address; releasing looks
//!   the address up in the owning thread's slot array.
//! - When every slot is on loan an unpooled buffer is handed out instead and
//!   a diagnostic is raised (usually a leak of [`PoolBuffer`]s).
//!
//! ## Concurrency
//!
//! Threads only ever touch their own entry. The sharded directory lets a new
//! thread insert its entry while other threads look theirs up.
//! [`PoolBuffer`] is `!Send`, so a buffer is always released on the thread
//! that borrowed it.

use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use apimon_common::{BUFFER_SLOT_COUNT, MAX_PATH_W};

use crate::diagnostics::{DiagnosticSink, Severity};
use crate::wide::WideBuf;

enum Slot {
    Free(WideBuf),
    /// Storage address of the buffer currently borrowed from this slot
    OnLoan(usize),
}

struct SlotArray {
    slots: Vec<Slot>,
}

/// Slot usage of one thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Slots created so far
    pub slots: usize,

    /// Slots currently on loan
    pub in_use: usize,
}

/// Pool of fixed-capacity wide buffers, partitioned by thread
pub struct BufferPool {
    directory: DashMap<ThreadId, SlotArray>,
    slots_per_thread: usize,
    buffer_capacity: usize,
    sink: Arc<dyn DiagnosticSink>,
}

impl BufferPool {
    /// Pool with the default slot count and path-sized buffers.
    pub fn new(sink: Arc<dyn DiagnosticSink>) -> Self {
        Self::with_limits(BUFFER_SLOT_COUNT, MAX_PATH_W, sink)
    }

    pub fn with_limits(slots_per_thread: usize, buffer_capacity: usize, sink: Arc<dyn DiagnosticSink>) -> Self {
        Self { directory: DashMap::new(), slots_per_thread, buffer_capacity, sink }
    }

    #[must_use]
    pub fn buffer_capacity(&self) -> usize {
        self.buffer_capacity
    }

    #[must_use]
    pub fn slots_per_thread(&self) -> usize {
        self.slots_per_thread
    }

    /// Borrow an empty buffer for the calling thread.
    ///
    /// Always succeeds; when the thread's slots are exhausted the buffer is
    /// allocated outside the pool and freed again on release.
    pub fn acquire(&self) -> PoolBuffer<'_> {
        let owner = thread::current().id();
        if let Some(buffer) = self.acquire_pooled(owner) {
            return PoolBuffer::new(self, owner, buffer);
        }
        self.sink.report(
            Severity::Critical,
            format_args!(
                "All {} wide buffers of this thread are in use, probably leaking buffers",
                self.slots_per_thread
            ),
        );
        PoolBuffer::new(self, owner, WideBuf::with_capacity(self.buffer_capacity))
    }

    /// Return a buffer to the pool. Equivalent to dropping it.
    pub fn release(&self, buffer: PoolBuffer<'_>) {
        drop(buffer);
    }

    /// Slot usage of the calling thread.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.directory.get(&thread::current().id()).map_or_else(PoolStats::default, |array| PoolStats {
            slots: array.slots.len(),
            in_use: array.slots.iter().filter(|slot| matches!(slot, Slot::OnLoan(_))).count(),
        })
    }

    /// Drop the calling thread's slot array, typically on thread exit.
    ///
    /// Does nothing and returns `false` while any buffer is on loan.
    pub fn reset_thread(&self) -> bool {
        let owner = thread::current().id();
        self.directory
            .remove_if(&owner, |_, array| array.slots.iter().all(|slot| matches!(slot, Slot::Free(_))))
            .is_some()
    }

    fn acquire_pooled(&self, owner: ThreadId) -> Option<WideBuf> {
        let mut array = match self.directory.entry(owner) {
            Entry::Occupied(entry) => entry.into_ref(),
            Entry::Vacant(entry) => {
                let mut slots = Vec::new();
                if slots.try_reserve_exact(self.slots_per_thread).is_err() {
                    self.sink.report(
                        Severity::Warning,
                        format_args!("Error allocating memory for {} wide buffer slots", self.slots_per_thread),
                    );
                    return None;
                }
                log::trace!("Created buffer slot array for {owner:?}");
                entry.insert(SlotArray { slots })
            }
        };

        if let Some(slot) = array.slots.iter_mut().find(|slot| matches!(slot, Slot::Free(_))) {
            if let Slot::Free(mut buffer) = mem::replace(slot, Slot::OnLoan(0)) {
                buffer.clear();
                *slot = Slot::OnLoan(identity(&buffer));
                return Some(buffer);
            }
        }

        if array.slots.len() < self.slots_per_thread {
            let buffer = WideBuf::with_capacity(self.buffer_capacity);
            array.slots.push(Slot::OnLoan(identity(&buffer)));
            return Some(buffer);
        }
        None
    }

    fn give_back(&self, owner: ThreadId, buffer: WideBuf) {
        let id = identity(&buffer);
        if let Some(mut array) = self.directory.get_mut(&owner) {
            if let Some(slot) = array.slots.iter_mut().find(|slot| matches!(slot, Slot::OnLoan(s) if *s == id)) {
                *slot = Slot::Free(buffer);
                return;
            }
        }
        // Unpooled: freed here
    }
}

fn identity(buffer: &WideBuf) -> usize {
    buffer.as_ptr() as usize
}

/// A buffer borrowed from a [`BufferPool`]
///
/// Dereferences to [`WideBuf`]. Returned to the pool when dropped.
pub struct PoolBuffer<'a> {
    pool: &'a BufferPool,
    owner: ThreadId,
    buffer: ManuallyDrop<WideBuf>,
    _not_send: PhantomData<*const ()>,
}

impl<'a> PoolBuffer<'a> {
    fn new(pool: &'a BufferPool, owner: ThreadId, buffer: WideBuf) -> Self {
        Self { pool, owner, buffer: ManuallyDrop::new(buffer), _not_send: PhantomData }
    }
}

impl Deref for PoolBuffer<'_> {
    type Target = WideBuf;

    fn deref(&self) -> &WideBuf {
        &self.buffer
    }
}

impl DerefMut for PoolBuffer<'_> {
    fn deref_mut(&mut self) -> &mut WideBuf {
        &mut self.buffer
    }
}

impl Drop for PoolBuffer<'_> {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        // SAFETY: the buffer is taken exactly once, here, and never used again
        let buffer = unsafe { ManuallyDrop::take(&mut self.buffer) };
        self.pool.give_back(self.owner, buffer);
    }
}
