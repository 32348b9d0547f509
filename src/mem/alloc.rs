//! The locked page allocator that is shared between harts.

use super::{
    buddy::{BuddyAllocator, Checks, FreeListPolicy, Freed, Violation},
    order_for_pages, AllocStats, Error, FrameMap, Identity, PageDescriptor, Pfn, Result,
};
use crate::arch::{Interrupts, IrqGuard, NoIrq};
use core::marker::PhantomData;
use spin::Mutex;

/// The central allocator that is responsible for allocating physical page frames.
///
/// This wraps a [`BuddyAllocator`] inside a spinlock, and keeps interrupts
/// disabled using `I` while the lock is held, so an interrupt handler on the
/// same hart can never spin on a lock its own hart is holding.
///
/// The allocator is created empty, so it can be put into a `static`, and
/// must be [initialized](Self::init) with the descriptor table before use.
pub struct PageAllocator<'t, F = Identity, I = NoIrq> {
    inner: Mutex<Option<BuddyAllocator<'t, F>>>,
    _irq: PhantomData<fn() -> I>,
}

impl<'t, F, I> PageAllocator<'t, F, I> {
    /// Create a new, uninitialized page allocator.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
            _irq: PhantomData,
        }
    }
}

impl<'t, F: FrameMap, I: Interrupts> PageAllocator<'t, F, I> {
    /// Initialize this allocator with the kernel's page descriptor table.
    ///
    /// No page is available until it was [inserted](Self::insert_range).
    pub fn init(&self, table: &'t mut [PageDescriptor], frames: F) -> Result<()> {
        self.init_with_policy(table, frames, FreeListPolicy::default())
    }

    /// Initialize this allocator, using the given free list policy.
    pub fn init_with_policy(
        &self,
        table: &'t mut [PageDescriptor],
        frames: F,
        policy: FreeListPolicy,
    ) -> Result<()> {
        let _irq = IrqGuard::<I>::new();
        let mut inner = self.inner.lock();

        if inner.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        *inner = Some(BuddyAllocator::with_policy(table, frames, policy)?);
        Ok(())
    }

    /// Returns whether this allocator was initialized already.
    pub fn is_initialized(&self) -> bool {
        let _irq = IrqGuard::<I>::new();
        self.inner.lock().is_some()
    }

    /// Run `f` with interrupts disabled and the lock held.
    fn with<R>(&self, f: impl FnOnce(&mut BuddyAllocator<'t, F>) -> R) -> Result<R> {
        let _irq = IrqGuard::<I>::new();
        let mut inner = self.inner.lock();
        let alloc = inner.as_mut().ok_or(Error::Uninitialized)?;
        Ok(f(alloc))
    }

    /// Allocate a block of `2^order` pages.
    pub fn allocate(&self, order: usize) -> Result<Pfn> {
        self.with(|alloc| alloc.allocate(order))?
    }

    /// Allocate a single page.
    pub fn alloc(&self) -> Result<Pfn> {
        // order 0 is exactly one page
        self.allocate(0)
    }

    /// Allocate at least `count` contiguous pages.
    ///
    /// The block is rounded up to the next power of two, so freeing it
    /// requires the order that [`order_for_pages`] returns for `count`.
    pub fn alloc_pages(&self, count: usize) -> Result<Pfn> {
        if count == 0 {
            return Err(Error::AllocateZeroPages);
        }

        self.allocate(order_for_pages(count))
    }

    /// Free a block that was allocated with the given order.
    ///
    /// # Panics
    ///
    /// See [`BuddyAllocator::free`].
    pub fn free(&self, block: Pfn, order: usize) -> Result<Freed> {
        self.with(|alloc| alloc.free(block, order))
    }

    /// Make `count` pages, starting at `start`, available for allocation.
    pub fn insert_range(&self, start: Pfn, count: usize) -> Result<()> {
        self.with(|alloc| alloc.insert_range(start, count))?
    }

    /// Reserve `count` free pages, starting at `start`.
    pub fn remove_range(&self, start: Pfn, count: usize) -> Result<()> {
        self.with(|alloc| alloc.remove_range(start, count))?
    }

    /// Sort every free list by frame number.
    pub fn compact(&self) -> Result<()> {
        self.with(|alloc| alloc.compact())
    }

    /// Return the statistics for this allocator.
    pub fn stats(&self) -> Result<AllocStats> {
        self.with(|alloc| alloc.stats())
    }

    /// Dumps the free lists of every order into the log.
    pub fn dump_state(&self) -> Result<()> {
        self.with(|alloc| alloc.dump_state())
    }

    /// Check the invariants selected by `checks`.
    ///
    /// An allocator that was not initialized yet has nothing to violate.
    pub fn verify(&self, checks: Checks) -> core::result::Result<(), Violation> {
        self.with(|alloc| alloc.verify(checks)).unwrap_or(Ok(()))
    }
}

impl<F, I> Default for PageAllocator<'_, F, I> {
    fn default() -> Self {
        Self::new()
    }
}
