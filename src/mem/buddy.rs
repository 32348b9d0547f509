//! Implementation of a Buddy Allocator that is responsible for allocating
//! physical page frames described by the kernel's page descriptor table.
//!
//! Blocks are identified by the frame number of their first page, and a
//! block of order `n` spans `2^n` pages and always starts at a multiple of
//! `2^n`. For every order there is one intrusive [free list](LinkedList)
//! whose links live inside the page descriptors.

use super::{
    pages_for_order, AllocStats, Error, FrameMap, Identity, LinkedList, PageDescriptor,
    PageState, Pfn, Result,
};
use core::{cmp, fmt};

mod check;
pub use check::{Checks, Violation};

/// The maximum order for the buddy allocator (inclusive).
///
/// The largest block is `2^18` pages, which is 1GiB with 4KiB pages.
pub const MAX_ORDER: usize = 18;

/// The size of the orders array inside the buddy allocator.
pub const ORDER_COUNT: usize = MAX_ORDER + 1;

/// Calculate the frame number of the buddy of `block` at `order`,
/// inside a table with `len` descriptors.
///
/// If the block index (`block >> order`) is odd, the buddy is the block right
/// before it, otherwise it's the block right after it. Returns `None` if the
/// buddy would be outside the table.
pub fn buddy_of(block: Pfn, order: usize, len: usize) -> Option<Pfn> {
    debug_assert!(block.is_aligned(order), "block {} is not aligned", block);

    let size = pages_for_order(order);
    let buddy = if (block.value() >> order) & 1 == 1 {
        block.value().checked_sub(size)?
    } else {
        block.value().checked_add(size)?
    };

    if buddy < len {
        Some(Pfn::new(buddy))
    } else {
        None
    }
}

/// Where blocks are inserted into a free list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreeListPolicy {
    /// Push new blocks to the front of the list, which is `O(1)`.
    Unordered,
    /// Keep every list sorted by frame number, so allocations prefer
    /// low memory. Insertion is linear in the length of the list.
    AddressOrdered,
}

impl Default for FreeListPolicy {
    fn default() -> Self {
        FreeListPolicy::Unordered
    }
}

/// The result of [freeing](BuddyAllocator::free) a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freed {
    /// The block that ended up in the free lists after merging.
    pub block: Pfn,
    /// The order the caller freed the block with.
    pub requested_order: usize,
    /// The order that was reached by merging buddies.
    pub order: usize,
}

/// The central structure that is responsible for allocating
/// page frames using the buddy allocation algorithm.
pub struct BuddyAllocator<'t, F = Identity> {
    table: &'t mut [PageDescriptor],
    frames: F,
    orders: [LinkedList; ORDER_COUNT],
    policy: FreeListPolicy,
    stats: AllocStats,
}

impl<'t, F: FrameMap> BuddyAllocator<'t, F> {
    /// The name of this allocation algorithm.
    pub const NAME: &'static str = "buddy";

    /// Create a new allocator that manages the given descriptor table,
    /// using front insertion for its free lists.
    ///
    /// Every descriptor is reset to [`Invalid`](PageState::Invalid), pages
    /// become available by [inserting](Self::insert_range) them.
    ///
    /// Fails if the table is empty, or if its first descriptor doesn't describe frame `0`.
    pub fn init(table: &'t mut [PageDescriptor], frames: F) -> Result<Self> {
        Self::with_policy(table, frames, FreeListPolicy::default())
    }

    /// Create a new allocator that uses the given free list policy.
    ///
    /// See [`init`](Self::init).
    pub fn with_policy(
        table: &'t mut [PageDescriptor],
        frames: F,
        policy: FreeListPolicy,
    ) -> Result<Self> {
        if table.is_empty() {
            return Err(Error::EmptyTable);
        }

        let base = frames.pfn_of(0);
        if base != Pfn::new(0) {
            log::error!(
                "Failed to initialize page descriptor table: it begins at frame {}",
                base
            );
            return Err(Error::NonZeroBase(base));
        }

        table.iter_mut().for_each(|desc| *desc = PageDescriptor::new());

        log::info!(
            "Initialized {} allocator with {} pages (frames {}..={})",
            Self::NAME,
            table.len(),
            base,
            frames.pfn_of(table.len() - 1)
        );

        let mut orders = [LinkedList::new(0); ORDER_COUNT];
        orders
            .iter_mut()
            .enumerate()
            .for_each(|(order, list)| *list = LinkedList::new(order));

        Ok(Self {
            table,
            frames,
            orders,
            policy,
            stats: AllocStats::with_name("Buddy Allocator"),
        })
    }

    /// Returns the name of this allocation algorithm.
    pub fn name(&self) -> &'static str {
        Self::NAME
    }

    /// Returns the number of descriptors inside the managed table.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Always `false`, because an allocator can't be created for an empty table.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the free list policy of this allocator.
    pub fn policy(&self) -> FreeListPolicy {
        self.policy
    }

    /// Returns the descriptor of the given frame.
    pub fn descriptor(&self, pfn: Pfn) -> Option<&PageDescriptor> {
        self.table.get(pfn.value())
    }

    /// Returns the whole descriptor table.
    pub fn descriptors(&self) -> &[PageDescriptor] {
        &self.table[..]
    }

    /// Returns an iterator over all free blocks of the given order.
    ///
    /// # Panics
    ///
    /// If `order` is larger than [`MAX_ORDER`].
    pub fn free_list(&self, order: usize) -> impl Iterator<Item = Pfn> + '_ {
        self.orders[order].iter(&self.table[..])
    }

    /// Returns the number of free blocks of the given order.
    pub fn free_blocks(&self, order: usize) -> usize {
        self.orders[order].len()
    }

    /// Returns the number of free pages, counted from the free lists.
    pub fn free_pages(&self) -> usize {
        self.orders
            .iter()
            .map(|list| list.len() * pages_for_order(list.order()))
            .sum()
    }

    /// Return a copy of the statistics for this allocator.
    pub fn stats(&self) -> AllocStats {
        self.stats.clone()
    }

    /// Calculate the buddy of `block` at `order` inside the managed table.
    pub fn buddy_of(&self, block: Pfn, order: usize) -> Option<Pfn> {
        buddy_of(block, order, self.table.len())
    }

    /// Check if `block` is the head of a free block that is tracked at `order`.
    fn is_free_at(&self, block: Pfn, order: usize) -> bool {
        let desc = &self.table[block.value()];
        desc.state == PageState::Available && desc.free_order() == Some(order)
    }

    /// Put `block` into the free list of `order`, respecting the policy.
    fn push(&mut self, block: Pfn, order: usize) {
        let list = &mut self.orders[order];
        match self.policy {
            FreeListPolicy::Unordered => list.push_front(self.table, block),
            FreeListPolicy::AddressOrdered => list.insert_sorted(self.table, block),
        }
    }

    /// Split the first free block of `order` into two buddies of `order - 1`.
    ///
    /// Returns the left buddy, which will be the first block in the list of `order - 1`.
    ///
    /// # Panics
    ///
    /// If there's no free block of `order`, or `order` is zero.
    pub fn split(&mut self, order: usize) -> Pfn {
        let block = self.orders[order]
            .head()
            .unwrap_or_else(|| panic!("tried to split order {} without free blocks", order));
        self.split_block(block, order)
    }

    /// Split the given free block of `order` into two buddies of `order - 1`.
    ///
    /// Returns the left buddy.
    fn split_block(&mut self, block: Pfn, order: usize) -> Pfn {
        assert!(order > 0, "tried to split an order 0 block");
        self.orders[order].remove(self.table, block);

        // if this is how the order before the split looked like:
        //
        // +-- this is were `block` starts
        // v
        // +--------------------------------+
        // |            `order`             |
        // +--------------------------------+
        //
        // then the two halves look like this:
        //
        // +-- `block` is the left half
        // v
        // +---------------------------------+
        // |     left       |     right      |
        // +---------------------------------+
        //                  ^
        //                  +--- `right` is the buddy of `block` in `target`
        let target = order - 1;
        let right = self
            .buddy_of(block, target)
            .filter(|&right| right == block.add(pages_for_order(target)))
            .unwrap_or_else(|| panic!("block {} of order {} has no right half", block, order));

        self.table[block.value()].state = PageState::Available;
        self.table[right.value()].state = PageState::Available;

        // push the right half first, so the left one is at the front
        self.push(right, target);
        self.push(block, target);

        log::debug!(
            "Split block {} of order {} into {} and {}",
            block,
            order,
            block,
            right
        );
        block
    }

    /// Try to merge the free `block` of `order` with its buddy.
    ///
    /// Returns the merged block which is now tracked at `order + 1`,
    /// or `None` if the buddy is not free at `order`.
    ///
    /// # Panics
    ///
    /// If `order` is [`MAX_ORDER`] or `block` isn't free at `order`.
    pub fn merge(&mut self, block: Pfn, order: usize) -> Option<Pfn> {
        assert!(order < MAX_ORDER, "tried to merge blocks of the maximum order");
        assert!(
            self.is_free_at(block, order),
            "tried to merge block {} that is not free at order {}",
            block,
            order
        );

        let buddy = self.buddy_of(block, order)?;
        if !self.is_free_at(buddy, order) {
            return None;
        }

        self.orders[order].remove(self.table, block);
        self.orders[order].remove(self.table, buddy);

        let left = cmp::min(block, buddy);
        self.push(left, order + 1);

        log::debug!(
            "Merged {} and {} of order {} into {}",
            block,
            buddy,
            order,
            left
        );
        Some(left)
    }

    /// Merge `block` with its buddies for as long as possible.
    ///
    /// Returns the resulting block and its order.
    fn coalesce(&mut self, mut block: Pfn, mut order: usize) -> (Pfn, usize) {
        while order < MAX_ORDER {
            match self.merge(block, order) {
                Some(merged) => {
                    block = merged;
                    order += 1;
                }
                None => break,
            }
        }
        (block, order)
    }

    /// Allocates a block of `2^order` contiguous pages.
    ///
    /// Returns the frame number of the first page.
    pub fn allocate(&mut self, order: usize) -> Result<Pfn> {
        if order > MAX_ORDER {
            return Err(Error::OrderTooLarge);
        }

        // find the smallest order that has a free block.
        // this is `order` itself in the fast path
        let from_order = match (order..ORDER_COUNT).find(|&o| !self.orders[o].is_empty()) {
            Some(from_order) => from_order,
            None => {
                log::warn!(
                    "Cannot allocate {} contiguous pages (order {})",
                    pages_for_order(order),
                    order
                );
                return Err(Error::NoMemoryAvailable);
            }
        };

        // now walk down the orders from top to bottom, splitting
        // the left half again and again until we reach `order`
        for order_to_split in (order + 1..=from_order).rev() {
            self.split(order_to_split);
        }

        // there _must_ be a block now, either it was there before or
        // the last split created it.
        let block = self.orders[order]
            .pop_front(self.table)
            .unwrap_or_else(|| panic!("splitting didn't produce an order {} block", order));
        self.table[block.value()].state = PageState::Allocated;

        let pages = pages_for_order(order);
        self.stats.free -= pages;
        self.stats.allocated += pages;

        log::debug!("Allocated block {} of order {}", block, order);
        Ok(block)
    }

    /// Frees a block that was allocated with the given order and merges it
    /// with its buddies as long as they are free.
    ///
    /// The order that was reached by merging is reported separately from
    /// the requested one inside the returned [`Freed`].
    ///
    /// # Panics
    ///
    /// If the block is not an allocated block of `order`, which means this is a
    /// double free or the order is wrong.
    pub fn free(&mut self, block: Pfn, order: usize) -> Freed {
        assert!(order <= MAX_ORDER, "invalid order {} given to free", order);
        assert!(
            block.is_aligned(order),
            "freed block {} is not aligned to order {}",
            block,
            order
        );

        let pages = pages_for_order(order);
        assert!(
            block.value() + pages <= self.table.len(),
            "freed block {} of order {} exceeds the descriptor table",
            block,
            order
        );

        let desc = &self.table[block.value()];
        assert_eq!(
            desc.state,
            PageState::Allocated,
            "tried to free block {} that is not allocated",
            block
        );

        // the interior of a live block is never linked or allocated, so a linked
        // or allocated right half means the block was freed with a larger order
        if order > 0 {
            let right = &self.table[block.value() + pages_for_order(order - 1)];
            assert!(
                right.state == PageState::Available && right.free_order.is_none(),
                "tried to free block {} with the wrong order {}",
                block,
                order
            );
        }

        self.stats.allocated = self.stats.allocated.checked_sub(pages).unwrap_or_else(|| {
            panic!(
                "tried to free block {} with the wrong order {}",
                block, order
            )
        });
        self.stats.free += pages;

        self.table[block.value()].state = PageState::Available;
        self.push(block, order);

        let (merged, achieved) = self.coalesce(block, order);
        log::debug!(
            "Freed block {} of order {}, merged up to {} of order {}",
            block,
            order,
            merged,
            achieved
        );

        Freed {
            block: merged,
            requested_order: order,
            order: achieved,
        }
    }

    /// Check that `start..start + count` lies inside the table and return the end.
    fn range_end(&self, start: Pfn, count: usize) -> Result<usize> {
        start
            .value()
            .checked_add(count)
            .filter(|&end| end <= self.table.len())
            .ok_or(Error::InvalidRange(start))
    }

    /// Marks `count` pages, starting at `start`, as available for allocation.
    ///
    /// The range is split into the largest blocks that are aligned to
    /// their order, so a range of `2^4 + 1` pages at frame `0` will add one
    /// order `4` block and one order `0` block. Every block is merged with its
    /// buddy if that one is already free.
    ///
    /// # Panics
    ///
    /// If a page inside the range is already managed by the allocator, which
    /// means it is part of a free or an allocated block. Only pages that were
    /// never inserted or that were [removed](Self::remove_range) may be inserted.
    pub fn insert_range(&mut self, start: Pfn, count: usize) -> Result<()> {
        let end = self.range_end(start, count)?;

        // interior pages of a block keep the `Available` state, so only
        // `Invalid` and `Reserved` prove that a page is unused
        if let Some(idx) = self.table[start.value()..end]
            .iter()
            .position(|desc| !matches!(desc.state, PageState::Invalid | PageState::Reserved))
        {
            panic!(
                "tried to insert page {} that is already in use",
                start.add(idx)
            );
        }

        log::info!(
            "Inserting frames {}..{}",
            self.frames.pfn_of(start.value()),
            Pfn::new(end)
        );

        for desc in &mut self.table[start.value()..end] {
            desc.state = PageState::Available;
        }

        self.stats.total += count;
        self.stats.free += count;

        let mut base = start.value();
        while base < end {
            // the largest order that `base` is aligned to, and that still fits into the range.
            // order `0` always fits, because `base < end`.
            let order = (0..ORDER_COUNT)
                .rev()
                .find(|&o| Pfn::new(base).is_aligned(o) && base + pages_for_order(o) <= end)
                .unwrap_or(0);

            let block = Pfn::new(base);
            self.push(block, order);
            self.coalesce(block, order);

            log::debug!(
                "Inserted block {} of order {}, {} pages remaining",
                block,
                order,
                end - base - pages_for_order(order)
            );
            base += pages_for_order(order);
        }

        Ok(())
    }

    /// Marks `count` pages, starting at `start`, as reserved so they will
    /// never be handed out, until they are inserted again.
    ///
    /// Free blocks which only partially overlap the range are split until
    /// the range can be covered exactly.
    ///
    /// Fails without touching any block if a page inside the range is not free.
    pub fn remove_range(&mut self, start: Pfn, count: usize) -> Result<()> {
        let end = self.range_end(start, count)?;
        if count == 0 {
            return Ok(());
        }

        if self.free_pages_in(start.value(), end) != count {
            return Err(Error::RangeNotFree(start));
        }

        log::info!(
            "Reserving frames {}..{}",
            self.frames.pfn_of(start.value()),
            Pfn::new(end)
        );

        let (mut bound_base, mut bound_lim) = (start.value(), end);

        'scan: loop {
            for order in (0..ORDER_COUNT).rev() {
                let mut cursor = self.orders[order].head();

                while let Some(block) = cursor {
                    cursor = self.table[block.value()].next_free;

                    let block_base = block.value();
                    let block_lim = block_base + pages_for_order(order);

                    if block_base == bound_base && block_lim <= bound_lim {
                        // the block starts at the bound, and either is the whole
                        // bound, or is the left part of it
                        self.reserve_block(block, order);
                        bound_base = block_lim;

                        if bound_base == bound_lim {
                            return Ok(());
                        }
                        continue 'scan;
                    } else if bound_base < block_base && block_lim == bound_lim {
                        // the block is the right part of the bound
                        self.reserve_block(block, order);
                        bound_lim = block_base;
                        continue 'scan;
                    } else if block_base < bound_lim
                        && bound_base < block_lim
                        && (block_base < bound_base || bound_lim < block_lim)
                    {
                        // the block overlaps the bound, but reaches outside of it,
                        // so split it and try again with the smaller halves
                        self.split_block(block, order);
                        continue 'scan;
                    }
                }
            }

            // the check at the start guarantees that the bound is covered by free blocks
            panic!(
                "no free block covers frames {:#x}..{:#x}",
                bound_base, bound_lim
            );
        }
    }

    /// Count the free pages inside `start..end`.
    fn free_pages_in(&self, start: usize, end: usize) -> usize {
        self.orders
            .iter()
            .flat_map(|list| {
                let size = pages_for_order(list.order());
                list.iter(&self.table[..]).map(move |block| (block.value(), size))
            })
            .map(|(base, size)| {
                let lo = cmp::max(base, start);
                let hi = cmp::min(base + size, end);
                hi.saturating_sub(lo)
            })
            .sum()
    }

    /// Remove a free block from its list and mark every page of it as reserved.
    fn reserve_block(&mut self, block: Pfn, order: usize) {
        self.orders[order].remove(self.table, block);

        let pages = pages_for_order(order);
        self.table[block.value()..block.value() + pages]
            .iter_mut()
            .for_each(|desc| desc.state = PageState::Reserved);

        self.stats.free -= pages;
        self.stats.total -= pages;

        log::info!("Reserved block {} of order {}", block, order);
    }

    /// Sort every free list by frame number.
    ///
    /// With the [`Unordered`](FreeListPolicy::Unordered) policy the lists are
    /// in no particular order, this pass makes the following allocations prefer
    /// low memory again. It never changes which blocks are free.
    pub fn compact(&mut self) {
        for list in self.orders.iter_mut() {
            list.sort(self.table);
        }
    }

    /// Returns a printable listing of every free list.
    pub fn dump(&self) -> StateDump<'_, 't, F> {
        StateDump { alloc: self }
    }

    /// Dumps the free lists of every order into the log.
    pub fn dump_state(&self) {
        log::debug!("BUDDY STATE:");
        for order in 0..ORDER_COUNT {
            log::debug!("{}", OrderDump { alloc: self, order });
        }
    }
}

impl<F> fmt::Debug for BuddyAllocator<'_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuddyAllocator")
            .field("pages", &self.table.len())
            .field("policy", &self.policy)
            .field("stats", &self.stats)
            .finish()
    }
}

/// Listing of every free list of a [`BuddyAllocator`], created by
/// [`BuddyAllocator::dump`].
pub struct StateDump<'a, 't, F> {
    alloc: &'a BuddyAllocator<'t, F>,
}

impl<F: FrameMap> fmt::Display for StateDump<'_, '_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "BUDDY STATE:")?;
        for order in 0..ORDER_COUNT {
            writeln!(
                f,
                "{}",
                OrderDump {
                    alloc: self.alloc,
                    order
                }
            )?;
        }
        Ok(())
    }
}

/// A single line of the dump: `[order] pfn pfn ...`
struct OrderDump<'a, 't, F> {
    alloc: &'a BuddyAllocator<'t, F>,
    order: usize,
}

impl<F: FrameMap> fmt::Display for OrderDump<'_, '_, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.order)?;
        self.alloc.orders[self.order]
            .iter(&self.alloc.table[..])
            .try_for_each(|block| write!(f, " {}", self.alloc.frames.pfn_of(block.value())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::vec::Vec;

    fn free_lists<F: FrameMap>(alloc: &BuddyAllocator<'_, F>) -> Vec<Vec<usize>> {
        (0..ORDER_COUNT)
            .map(|order| alloc.free_list(order).map(Pfn::value).collect())
            .collect()
    }

    fn pfn(n: usize) -> Pfn {
        Pfn::new(n)
    }

    #[test]
    fn buddy_locator() {
        assert_eq!(buddy_of(pfn(0), 0, 8), Some(pfn(1)));
        assert_eq!(buddy_of(pfn(1), 0, 8), Some(pfn(0)));
        assert_eq!(buddy_of(pfn(4), 2, 8), Some(pfn(0)));
        assert_eq!(buddy_of(pfn(0), 2, 8), Some(pfn(4)));
        assert_eq!(buddy_of(pfn(6), 1, 8), Some(pfn(4)));
        // the buddy of the last block lies outside the table
        assert_eq!(buddy_of(pfn(0), 3, 8), None);
        assert_eq!(buddy_of(pfn(4), 2, 6), Some(pfn(0)));
        assert_eq!(buddy_of(pfn(8), 2, 12), None);
    }

    #[test]
    fn init_rejects_bad_tables() {
        let mut empty: [PageDescriptor; 0] = [];
        assert_eq!(
            BuddyAllocator::init(&mut empty, Identity).unwrap_err(),
            Error::EmptyTable
        );

        let mut table = testing::table(4);
        let shifted = |idx: usize| Pfn::new(idx + 0x80);
        assert_eq!(
            BuddyAllocator::init(&mut table, shifted).unwrap_err(),
            Error::NonZeroBase(pfn(0x80))
        );
    }

    #[test]
    fn init_resets_descriptors() {
        let mut table = testing::table(4);
        table[2].state = PageState::Allocated;

        let alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        assert!(alloc
            .descriptors()
            .iter()
            .all(|desc| *desc == PageDescriptor::INVALID));
        assert_eq!(alloc.name(), "buddy");
        assert_eq!(alloc.free_pages(), 0);
    }

    #[test]
    fn insert_uses_largest_aligned_blocks() {
        testing::init_logging();
        let mut table = testing::table(32);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();

        // 3..23 = 3 | 4..8 | 8..16 | 16..20 | 20..22 | 22
        alloc.insert_range(pfn(3), 20).unwrap();

        let lists = free_lists(&alloc);
        assert_eq!(lists[0], [22, 3]);
        assert_eq!(lists[1], [20]);
        assert_eq!(lists[2], [16, 4]);
        assert_eq!(lists[3], [8]);
        assert!(lists[4..].iter().all(Vec::is_empty));

        assert_eq!(alloc.free_pages(), 20);
        assert_eq!(alloc.stats().total, 20);
        assert_eq!(alloc.descriptor(pfn(2)).unwrap().state(), PageState::Invalid);
        assert_eq!(alloc.descriptor(pfn(9)).unwrap().state(), PageState::Available);
        alloc.verify(Checks::all()).unwrap();
    }

    #[test]
    fn insert_rejects_ranges_outside_the_table() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();

        assert_eq!(
            alloc.insert_range(pfn(4), 5),
            Err(Error::InvalidRange(pfn(4)))
        );
        assert_eq!(
            alloc.insert_range(pfn(usize::MAX), 2),
            Err(Error::InvalidRange(pfn(usize::MAX)))
        );
        assert_eq!(alloc.free_pages(), 0);
    }

    #[test]
    fn exhaustion() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 8).unwrap();

        assert_eq!(alloc.allocate(3), Ok(pfn(0)));
        assert_eq!(alloc.allocate(3), Err(Error::NoMemoryAvailable));
        assert_eq!(alloc.allocate(0), Err(Error::NoMemoryAvailable));
        assert_eq!(alloc.allocate(MAX_ORDER + 1), Err(Error::OrderTooLarge));
    }

    #[test]
    fn fine_grained_splitting() {
        let mut table = testing::table(4);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 4).unwrap();

        let blocks = (0..4)
            .map(|_| alloc.allocate(0).unwrap().value())
            .collect::<Vec<_>>();
        assert_eq!(blocks, [0, 1, 2, 3]);
        assert_eq!(alloc.allocate(0), Err(Error::NoMemoryAvailable));

        let stats = alloc.stats();
        assert_eq!((stats.allocated, stats.free, stats.total), (4, 0, 4));
    }

    #[test]
    fn split_pushes_both_halves() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 8).unwrap();

        assert_eq!(alloc.split(3), pfn(0));
        assert_eq!(free_lists(&alloc)[2], [0, 4]);
        assert_eq!(alloc.split(2), pfn(0));
        assert_eq!(free_lists(&alloc)[1], [0, 2]);
        assert_eq!(free_lists(&alloc)[2], [4]);
        assert_eq!(alloc.free_pages(), 8);
    }

    #[test]
    #[should_panic(expected = "without free blocks")]
    fn split_of_empty_order_panics() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.split(2);
    }

    #[test]
    fn merge_declines_if_buddy_is_busy() {
        let mut table = testing::table(4);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 4).unwrap();

        alloc.split(2);
        alloc.split(1);
        // order 0: [0, 1], order 1: [2]
        assert_eq!(alloc.merge(pfn(0), 0), Some(pfn(0)));
        assert_eq!(free_lists(&alloc)[1], [0, 2]);

        let taken = alloc.allocate(1).unwrap();
        let left = if taken == pfn(0) { pfn(2) } else { pfn(0) };
        assert_eq!(alloc.merge(left, 1), None);
    }

    #[test]
    fn merge_ignores_buddy_of_a_different_order() {
        let mut table = testing::table(4);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 4).unwrap();

        // order 0: [2], allocated: 0..2 and 3
        assert_eq!(alloc.allocate(1), Ok(pfn(0)));
        assert_eq!(alloc.allocate(0), Ok(pfn(2)));
        assert_eq!(alloc.allocate(0), Ok(pfn(3)));
        alloc.free(pfn(2), 0);

        // pfn 2 is available, but only at order 0
        let freed = alloc.free(pfn(0), 1);
        assert_eq!(freed.order, 1);
        assert_eq!(free_lists(&alloc)[1], [0]);
        assert_eq!(free_lists(&alloc)[0], [2]);
    }

    #[test]
    fn free_merges_up_to_the_largest_block() {
        let mut table = testing::table(16);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 16).unwrap();

        let blocks = (0..16)
            .map(|_| alloc.allocate(0).unwrap())
            .collect::<Vec<_>>();

        for &block in &blocks[..15] {
            let freed = alloc.free(block, 0);
            assert_eq!(freed.requested_order, 0);
            alloc.verify(Checks::all()).unwrap();
        }

        let freed = alloc.free(blocks[15], 0);
        assert_eq!(
            freed,
            Freed {
                block: pfn(0),
                requested_order: 0,
                order: 4
            }
        );
        assert_eq!(free_lists(&alloc)[4], [0]);
        assert_eq!(alloc.free_pages(), 16);
    }

    #[test]
    fn free_reports_achieved_order_separately() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 8).unwrap();

        let a = alloc.allocate(1).unwrap();
        let b = alloc.allocate(1).unwrap();
        assert_eq!((a, b), (pfn(0), pfn(2)));

        // the buddy of `a` is still allocated
        let freed = alloc.free(a, 1);
        assert_eq!(freed.requested_order, 1);
        assert_eq!(freed.order, 1);
        assert_eq!(freed.block, a);

        let freed = alloc.free(b, 1);
        assert_eq!(freed.order, 3);
        assert_eq!(freed.block, pfn(0));
    }

    #[test]
    #[should_panic(expected = "not allocated")]
    fn double_free_panics() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 8).unwrap();

        let block = alloc.allocate(1).unwrap();
        alloc.free(block, 1);
        alloc.free(block, 1);
    }

    #[test]
    #[should_panic(expected = "not aligned")]
    fn misaligned_free_panics() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 8).unwrap();
        alloc.allocate(0).unwrap();
        alloc.free(pfn(1), 1);
    }

    #[test]
    fn round_trip_restores_free_capacity() {
        let mut table = testing::table(64);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 64).unwrap();
        let _keep = alloc.allocate(2).unwrap();

        let before = (0..ORDER_COUNT)
            .map(|order| alloc.free_blocks(order))
            .collect::<Vec<_>>();

        for order in 0..4 {
            let block = alloc.allocate(order).unwrap();
            alloc.free(block, order);

            let after = (0..ORDER_COUNT)
                .map(|order| alloc.free_blocks(order))
                .collect::<Vec<_>>();
            assert_eq!(before, after);
        }
        alloc.verify(Checks::all()).unwrap();
    }

    #[test]
    fn partial_reservation_forces_split() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 8).unwrap();

        alloc.remove_range(pfn(2), 2).unwrap();

        let states = alloc
            .descriptors()
            .iter()
            .map(PageDescriptor::state)
            .collect::<Vec<_>>();
        use PageState::*;
        assert_eq!(
            states,
            [Available, Available, Reserved, Reserved, Available, Available, Available, Available]
        );

        let lists = free_lists(&alloc);
        assert_eq!(lists[1], [0]);
        assert_eq!(lists[2], [4]);
        assert!(lists[3].is_empty());
        assert_eq!(alloc.stats().total, 6);
        alloc.verify(Checks::all()).unwrap();
    }

    #[test]
    fn remove_range_spanning_two_blocks() {
        let mut table = testing::table(16);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 16).unwrap();
        alloc.split(4);

        // 0..8 and 8..16 are separate blocks now, take 6..11 out of both
        alloc.remove_range(pfn(6), 5).unwrap();

        let lists = free_lists(&alloc);
        assert_eq!(lists[2], [12, 0]);
        assert_eq!(lists[1], [4]);
        assert_eq!(lists[0], [11]);
        assert_eq!(alloc.free_pages(), 11);
        assert!((6..11).all(|n| alloc.descriptor(pfn(n)).unwrap().state() == PageState::Reserved));
        alloc.verify(Checks::all()).unwrap();
    }

    #[test]
    fn remove_range_of_right_aligned_block() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 8).unwrap();

        alloc.remove_range(pfn(2), 6).unwrap();
        assert_eq!(free_lists(&alloc)[1], [0]);
        assert_eq!(alloc.free_pages(), 2);
    }

    #[test]
    fn remove_range_requires_free_pages() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 8).unwrap();
        let block = alloc.allocate(1).unwrap();
        let lists = free_lists(&alloc);

        assert_eq!(
            alloc.remove_range(block, 4),
            Err(Error::RangeNotFree(block))
        );
        assert_eq!(alloc.remove_range(pfn(6), 4), Err(Error::InvalidRange(pfn(6))));
        assert_eq!(alloc.remove_range(pfn(3), 0), Ok(()));
        assert_eq!(free_lists(&alloc), lists);
    }

    #[test]
    fn reinserting_a_reserved_range_coalesces() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 8).unwrap();

        alloc.remove_range(pfn(2), 2).unwrap();
        alloc.insert_range(pfn(2), 2).unwrap();

        assert_eq!(free_lists(&alloc)[3], [0]);
        assert_eq!(alloc.stats().total, 8);
        alloc.verify(Checks::all()).unwrap();
    }

    #[test]
    #[should_panic(expected = "already in use")]
    fn inserting_free_pages_twice_panics() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 8).unwrap();
        alloc.insert_range(pfn(0), 1).unwrap();
    }

    #[test]
    #[should_panic(expected = "page 0x4 that is already in use")]
    fn inserting_inside_an_allocated_block_panics() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 8).unwrap();
        assert_eq!(alloc.allocate(3), Ok(pfn(0)));

        alloc.insert_range(pfn(4), 4).unwrap();
    }

    #[test]
    #[should_panic(expected = "page 0x4 that is already in use")]
    fn inserting_inside_a_larger_free_block_panics() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 8).unwrap();

        alloc.insert_range(pfn(4), 4).unwrap();
    }

    #[test]
    fn rejected_insert_leaves_the_table_untouched() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(4), 4).unwrap();
        let before = alloc.descriptors().to_vec();

        // 0..4 are unused, but 4..6 are free already
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            alloc.insert_range(pfn(0), 6).unwrap();
        }));
        assert!(result.is_err());
        assert_eq!(alloc.descriptors(), &before[..]);
        assert_eq!(alloc.stats().total, 4);
    }

    #[test]
    #[should_panic(expected = "wrong order")]
    fn freeing_with_a_larger_order_panics() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 8).unwrap();

        // 2..4 stays linked at order 1
        assert_eq!(alloc.allocate(1), Ok(pfn(0)));
        alloc.free(pfn(0), 2);
    }

    #[test]
    #[should_panic(expected = "wrong order")]
    fn freeing_over_an_allocated_neighbour_panics() {
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 8).unwrap();

        assert_eq!(alloc.allocate(1), Ok(pfn(0)));
        assert_eq!(alloc.allocate(1), Ok(pfn(2)));
        alloc.free(pfn(0), 2);
    }

    #[test]
    fn address_ordered_policy() {
        let mut table = testing::table(16);
        let mut alloc =
            BuddyAllocator::with_policy(&mut table, Identity, FreeListPolicy::AddressOrdered)
                .unwrap();
        assert_eq!(alloc.policy(), FreeListPolicy::AddressOrdered);

        alloc.insert_range(pfn(0), 1).unwrap();
        alloc.insert_range(pfn(8), 1).unwrap();
        alloc.insert_range(pfn(4), 1).unwrap();
        assert_eq!(free_lists(&alloc)[0], [0, 4, 8]);
        assert_eq!(alloc.allocate(0), Ok(pfn(0)));
    }

    #[test]
    fn compact_sorts_without_changing_free_blocks() {
        let mut table = testing::table(16);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        for n in [2, 10, 6, 14] {
            alloc.insert_range(pfn(n), 1).unwrap();
        }
        assert_eq!(free_lists(&alloc)[0], [14, 6, 10, 2]);

        alloc.compact();
        assert_eq!(free_lists(&alloc)[0], [2, 6, 10, 14]);
        assert_eq!(alloc.free_pages(), 4);
        alloc.verify(Checks::all()).unwrap();
    }

    #[test]
    fn dump_lists_every_order_without_mutating() {
        testing::init_logging();
        let mut table = testing::table(8);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(0), 8).unwrap();
        alloc.allocate(0).unwrap();

        let lists = free_lists(&alloc);
        let descriptors = alloc.descriptors().to_vec();

        let text = alloc.dump().to_string();
        alloc.dump_state();

        let lines = text.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), ORDER_COUNT + 1);
        assert_eq!(lines[0], "BUDDY STATE:");
        assert_eq!(lines[1], "[0] 0x1");
        assert_eq!(lines[2], "[1] 0x2");
        assert_eq!(lines[3], "[2] 0x4");
        assert_eq!(lines[4], "[3]");

        assert_eq!(free_lists(&alloc), lists);
        assert_eq!(alloc.descriptors(), &descriptors[..]);
    }

    #[test]
    fn interior_block_inside_range_is_reserved_last() {
        let mut table = testing::table(16);
        let mut alloc = BuddyAllocator::init(&mut table, Identity).unwrap();
        alloc.insert_range(pfn(1), 15).unwrap();

        // 1 | 2..4 | 4..8 | 8..16, take out 1..10
        alloc.remove_range(pfn(1), 9).unwrap();
        let lists = free_lists(&alloc);
        assert_eq!(lists[1], [10]);
        assert_eq!(lists[2], [12]);
        assert_eq!(alloc.free_pages(), 6);
        alloc.verify(Checks::all()).unwrap();
    }
}
