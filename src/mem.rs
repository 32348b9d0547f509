//! Physical page-frame management.

pub mod alloc;
pub mod buddy;
pub mod linked_list;
pub mod page;

pub use linked_list::LinkedList;
pub use page::{FrameMap, Identity, PageDescriptor, PageState, Pfn};

use crate::unit::{self, KIB};
use core::fmt;
use displaydoc_lite::displaydoc;

/// The size of a single page in memory.
///
/// This is also the size of an order-0 block inside
/// the buddy allocator.
pub const PAGE_SIZE: usize = 4 * KIB;

/// Result for every page allocation operation.
pub type Result<T, E = Error> = core::result::Result<T, E>;

displaydoc! {
    /// Any error that can happen while allocating, freeing, inserting
    /// or removing pages.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Error {
        /// tried to initialize an allocator with an empty descriptor table.
        EmptyTable,
        /// the descriptor table starts at frame {_0} instead of frame zero.
        NonZeroBase(Pfn),
        /// the page allocator was initialized twice.
        AlreadyInitialized,
        /// the page allocator was used before it was initialized.
        Uninitialized,
        /// tried to allocate an order that exceeded the maximum order.
        OrderTooLarge,
        /// tried to allocate, but there was no free memory left.
        NoMemoryAvailable,
        /// tried to allocate zero pages using `alloc_pages`.
        AllocateZeroPages,
        /// the page range starting at {_0} lies outside the descriptor table.
        InvalidRange(Pfn),
        /// the page range starting at {_0} is not completely free.
        RangeNotFree(Pfn),
    }
}

/// Returns the number of pages inside a block of the given order.
#[inline]
pub const fn pages_for_order(order: usize) -> usize {
    1 << order
}

/// Calculates the first order where `count` pages fit in.
///
/// This function may return an order that is larger than [`buddy::MAX_ORDER`].
pub fn order_for_pages(count: usize) -> usize {
    count.max(1).next_power_of_two().trailing_zeros() as usize
}

/// Statistics for a page allocator, counted in pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocStats {
    /// The name of the allocator that collected these stats.
    pub name: &'static str,
    /// The number of pages that are handed out to callers.
    pub allocated: usize,
    /// The number of pages that are left for allocation.
    pub free: usize,
    /// The number of pages that were inserted and not reserved again.
    pub total: usize,
}

impl AllocStats {
    /// Create a new [`AllocStats`] instance for the given allocator name.
    pub const fn with_name(name: &'static str) -> Self {
        Self {
            name,
            allocated: 0,
            free: 0,
            total: 0,
        }
    }
}

impl fmt::Display for AllocStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = |pages: usize| unit::bytes(pages.saturating_mul(PAGE_SIZE));

        writeln!(f, "{}", self.name)?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(
            f,
            "\nAllocated: {} pages ({})",
            self.allocated,
            bytes(self.allocated)
        )?;
        writeln!(f, "Free: {} pages ({})", self.free, bytes(self.free))?;
        writeln!(f, "Total: {} pages ({})", self.total, bytes(self.total))?;
        self.name.chars().try_for_each(|_| write!(f, "~"))?;
        writeln!(f)?;
        Ok(())
    }
}
