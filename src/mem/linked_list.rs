//! Intrusive, doubly linked free list over the page descriptor table.
//!
//! The links live inside the [`PageDescriptor`]s themselves and point to
//! other descriptors by their position in the table, so the list never
//! owns any memory on its own. Every operation takes the table it links.

use super::{PageDescriptor, Pfn};

/// Intrusive linked list of free blocks that all have the same order.
#[derive(Debug, Clone, Copy)]
pub struct LinkedList {
    head: Option<Pfn>,
    len: usize,
    order: u8,
}

impl LinkedList {
    /// Create a new, empty list for blocks of the given order.
    pub const fn new(order: usize) -> Self {
        Self {
            head: None,
            len: 0,
            order: order as u8,
        }
    }

    /// Returns whether this list is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Returns the number of blocks inside this list.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns the first block of this list.
    #[inline]
    pub fn head(&self) -> Option<Pfn> {
        self.head
    }

    /// Returns the order of the blocks inside this list.
    #[inline]
    pub fn order(&self) -> usize {
        self.order as usize
    }

    /// Push the given block to the front of the list.
    ///
    /// # Panics
    ///
    /// If `item` is already linked into any free list.
    pub fn push_front(&mut self, table: &mut [PageDescriptor], item: Pfn) {
        let next = self.head;
        self.link(table, item, None, next);
    }

    /// Insert the given block in front of the first block that has a higher
    /// frame number, so the list stays sorted if it was sorted before.
    ///
    /// # Panics
    ///
    /// If `item` is already linked into any free list.
    pub fn insert_sorted(&mut self, table: &mut [PageDescriptor], item: Pfn) {
        let mut prev = None;
        let mut next = self.head;

        while let Some(cur) = next {
            if cur > item {
                break;
            }
            prev = Some(cur);
            next = table[cur.value()].next_free;
        }

        self.link(table, item, prev, next);
    }

    /// Link `item` between `prev` and `next`.
    fn link(
        &mut self,
        table: &mut [PageDescriptor],
        item: Pfn,
        prev: Option<Pfn>,
        next: Option<Pfn>,
    ) {
        let desc = &mut table[item.value()];
        assert!(
            desc.free_order.is_none(),
            "block {} is already linked into the order {} free list",
            item,
            desc.free_order.unwrap_or_default(),
        );

        desc.prev_free = prev;
        desc.next_free = next;
        desc.free_order = Some(self.order);

        match prev {
            Some(prev) => table[prev.value()].next_free = Some(item),
            None => self.head = Some(item),
        }

        if let Some(next) = next {
            table[next.value()].prev_free = Some(item);
        }

        self.len += 1;
    }

    /// Remove the given block from this list, by relinking its neighbours.
    ///
    /// # Panics
    ///
    /// If `item` is not linked into this list, or the links around it are corrupted.
    pub fn remove(&mut self, table: &mut [PageDescriptor], item: Pfn) {
        let desc = table[item.value()];
        assert_eq!(
            desc.free_order,
            Some(self.order),
            "block {} is not linked into the order {} free list",
            item,
            self.order,
        );

        match desc.prev_free {
            Some(prev) => {
                let prev = &mut table[prev.value()];
                assert_eq!(prev.next_free, Some(item), "corrupted free list link");
                prev.next_free = desc.next_free;
            }
            None => {
                assert_eq!(self.head, Some(item), "corrupted free list head");
                self.head = desc.next_free;
            }
        }

        if let Some(next) = desc.next_free {
            let next = &mut table[next.value()];
            assert_eq!(next.prev_free, Some(item), "corrupted free list link");
            next.prev_free = desc.prev_free;
        }

        table[item.value()].unlink();
        self.len -= 1;
    }

    /// Removes the first block from this list.
    pub fn pop_front(&mut self, table: &mut [PageDescriptor]) -> Option<Pfn> {
        let head = self.head?;
        self.remove(table, head);
        Some(head)
    }

    /// Sort this list by frame number.
    ///
    /// This is an insertion sort which relinks every node, so it is
    /// quadratic in the length of the list and must never be used on a hot path.
    pub fn sort(&mut self, table: &mut [PageDescriptor]) {
        let mut cur = self.head.take();
        self.len = 0;

        while let Some(item) = cur {
            cur = table[item.value()].next_free;
            table[item.value()].unlink();
            self.insert_sorted(table, item);
        }
    }

    /// Returns an iterator over the blocks of this list.
    pub fn iter<'t>(&self, table: &'t [PageDescriptor]) -> Iter<'t> {
        Iter {
            next: self.head,
            table,
        }
    }
}

/// Iterator over the blocks of a [`LinkedList`].
pub struct Iter<'t> {
    next: Option<Pfn>,
    table: &'t [PageDescriptor],
}

impl Iterator for Iter<'_> {
    type Item = Pfn;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.next?;
        self.next = self.table[item.value()].next_free;
        Some(item)
    }
}
