//! Verification of the invariants that every [`BuddyAllocator`]
//! operation has to uphold.

use super::{BuddyAllocator, MAX_ORDER};
use crate::mem::{pages_for_order, FrameMap, PageState, Pfn};
use bitflags::bitflags;
use core::cmp;
use displaydoc_lite::displaydoc;

bitflags! {
    /// The invariants that are checked by [`BuddyAllocator::verify`].
    pub struct Checks: u8 {
        /// Every free list is linked correctly and every linked
        /// descriptor is reachable from exactly one list.
        const LINKAGE = 1 << 0;
        /// Every free block starts at a multiple of its size and
        /// lies completely inside the table.
        const ALIGNMENT = 1 << 1;
        /// No free block has a buddy that is free at the same order.
        const COALESCING = 1 << 2;
        /// The free lists hold exactly as many pages as the statistics claim,
        /// and never more than the table has.
        const CONSERVATION = 1 << 3;
        /// Every page of a free block is available and covered by no other free block.
        const COVERAGE = 1 << 4;
    }
}

displaydoc! {
    /// A broken invariant that was found by [`BuddyAllocator::verify`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Violation {
        /// block {_0} in the order {_1} free list has broken links.
        BrokenLink(Pfn, usize),
        /// the order {_0} free list holds {_1} blocks, but its length says otherwise.
        LengthMismatch(usize, usize),
        /// {_0} descriptors are marked as linked, but only {_1} are reachable.
        Orphaned(usize, usize),
        /// block {_0} of order {_1} is not aligned or exceeds the table.
        Misaligned(Pfn, usize),
        /// block {_0} and its buddy are both free at order {_1}.
        Uncoalesced(Pfn, usize),
        /// {_0} pages are counted as free, but {_1} pages should be free.
        Conservation(usize, usize),
        /// {_0} pages are managed, but the table only has {_1} descriptors.
        Overcommitted(usize, usize),
        /// block {_0} of order {_1} overlaps another free block.
        Overlap(Pfn, usize),
        /// block {_0} of order {_1} covers page {_2}, which is not available.
        Unavailable(Pfn, usize, Pfn),
    }
}

impl<F: FrameMap> BuddyAllocator<'_, F> {
    /// Check the invariants selected by `checks` and return the first
    /// violation that was found.
    ///
    /// This walks every free list and is meant for tests and debugging,
    /// never for a hot path.
    pub fn verify(&self, checks: Checks) -> Result<(), Violation> {
        if checks.contains(Checks::LINKAGE) {
            self.verify_linkage()?;
        }

        if checks.contains(Checks::ALIGNMENT) {
            self.verify_alignment()?;
        }

        if checks.contains(Checks::COALESCING) {
            self.verify_coalescing()?;
        }

        if checks.contains(Checks::CONSERVATION) {
            self.verify_conservation()?;
        }

        if checks.contains(Checks::COVERAGE) {
            self.verify_coverage()?;
        }

        Ok(())
    }

    fn verify_linkage(&self) -> Result<(), Violation> {
        let table = &self.table[..];
        let mut reachable = 0;

        for list in self.orders.iter() {
            let order = list.order();
            let mut prev = None;
            let mut count = 0;

            for block in list.iter(table) {
                let desc = &table[block.value()];
                // more blocks than descriptors means the list is cyclic
                if desc.prev_free != prev
                    || desc.free_order() != Some(order)
                    || desc.state != PageState::Available
                    || count >= table.len()
                {
                    return Err(Violation::BrokenLink(block, order));
                }

                prev = Some(block);
                count += 1;
            }

            if count != list.len() {
                return Err(Violation::LengthMismatch(order, count));
            }
            reachable += count;
        }

        let linked = table
            .iter()
            .filter(|desc| desc.free_order.is_some())
            .count();
        if linked != reachable {
            return Err(Violation::Orphaned(linked, reachable));
        }

        Ok(())
    }

    fn verify_alignment(&self) -> Result<(), Violation> {
        for list in self.orders.iter() {
            let order = list.order();
            let size = pages_for_order(order);

            if let Some(block) = list
                .iter(&self.table[..])
                .find(|block| !block.is_aligned(order) || block.value() + size > self.table.len())
            {
                return Err(Violation::Misaligned(block, order));
            }
        }
        Ok(())
    }

    fn verify_coalescing(&self) -> Result<(), Violation> {
        for list in self.orders[..MAX_ORDER].iter() {
            let order = list.order();

            for block in list.iter(&self.table[..]) {
                if let Some(buddy) = self.buddy_of(block, order) {
                    if self.is_free_at(buddy, order) {
                        return Err(Violation::Uncoalesced(cmp::min(block, buddy), order));
                    }
                }
            }
        }
        Ok(())
    }

    fn verify_conservation(&self) -> Result<(), Violation> {
        let len = self.table.len();
        let listed = self.free_pages();
        if listed > len {
            return Err(Violation::Overcommitted(listed, len));
        }
        if self.stats.total > len {
            return Err(Violation::Overcommitted(self.stats.total, len));
        }

        if listed != self.stats.free {
            return Err(Violation::Conservation(self.stats.free, listed));
        }

        let expected = self.stats.total.saturating_sub(self.stats.allocated);
        if self.stats.free != expected {
            return Err(Violation::Conservation(self.stats.free, expected));
        }
        Ok(())
    }

    /// Aligned blocks either nest or are disjoint, so two free blocks overlap
    /// exactly if the head of one is linked inside the other.
    fn verify_coverage(&self) -> Result<(), Violation> {
        let table = &self.table[..];

        for list in self.orders.iter() {
            let order = list.order();

            for block in list.iter(table) {
                let pages = table
                    .get(block.value()..block.value() + pages_for_order(order))
                    .ok_or(Violation::Misaligned(block, order))?;

                for (idx, desc) in pages.iter().enumerate() {
                    if desc.state != PageState::Available {
                        return Err(Violation::Unavailable(block, order, block.add(idx)));
                    }
                    if idx > 0 && desc.free_order.is_some() {
                        return Err(Violation::Overlap(block, order));
                    }
                }
            }
        }
        Ok(())
    }
}
