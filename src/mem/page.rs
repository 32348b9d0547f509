//! Page descriptors and page frame numbers.

use core::fmt;

/// A page frame number, the index of a physical page inside the
/// managed descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Pfn(usize);

impl Pfn {
    /// Create a new `Pfn` from the raw frame number.
    #[inline]
    pub const fn new(pfn: usize) -> Self {
        Self(pfn)
    }

    /// Return the raw frame number.
    #[inline]
    pub const fn value(self) -> usize {
        self.0
    }

    /// Return the frame that is `count` frames after this one.
    #[inline]
    pub const fn add(self, count: usize) -> Self {
        Self(self.0 + count)
    }

    /// Check if this frame can start a block of the given order,
    /// meaning it is a multiple of `2^order`.
    #[inline]
    pub const fn is_aligned(self, order: usize) -> bool {
        self.0 & ((1 << order) - 1) == 0
    }
}

impl From<usize> for Pfn {
    fn from(pfn: usize) -> Self {
        Self(pfn)
    }
}

impl fmt::Display for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// The state of a single page frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// The frame is not managed by the allocator.
    Invalid,
    /// The frame is free and part of a block inside the free lists.
    Available,
    /// The frame belongs to a block that was handed out by the allocator.
    Allocated,
    /// The frame was removed from the allocator and must not be handed out.
    Reserved,
}

/// Metadata for one physical page frame.
///
/// The table of descriptors is owned by the kernel, the allocator only
/// borrows it. The free-list links are owned by the allocator and only
/// meaningful while the descriptor is the head of a free block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageDescriptor {
    pub(crate) state: PageState,
    pub(crate) prev_free: Option<Pfn>,
    pub(crate) next_free: Option<Pfn>,
    /// The order of the free list this descriptor is linked into.
    pub(crate) free_order: Option<u8>,
}

impl PageDescriptor {
    /// A descriptor for a frame that isn't managed by any allocator yet.
    pub const INVALID: Self = Self::new();

    /// Create a new, [`Invalid`](PageState::Invalid) descriptor.
    pub const fn new() -> Self {
        Self {
            state: PageState::Invalid,
            prev_free: None,
            next_free: None,
            free_order: None,
        }
    }

    /// Return the current state of this frame.
    #[inline]
    pub fn state(&self) -> PageState {
        self.state
    }

    /// Return the order of the free list this descriptor is currently
    /// linked into, if any.
    #[inline]
    pub fn free_order(&self) -> Option<usize> {
        self.free_order.map(usize::from)
    }

    /// Clear all free-list links.
    pub(crate) fn unlink(&mut self) {
        self.prev_free = None;
        self.next_free = None;
        self.free_order = None;
    }
}

impl Default for PageDescriptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Translation from a position inside the descriptor table to the
/// frame number of the page it describes.
///
/// The buddy arithmetic itself only works on table positions, this
/// is used for the initialization check and for diagnostics.
pub trait FrameMap {
    /// Return the frame number of the descriptor at `index`.
    fn pfn_of(&self, index: usize) -> Pfn;
}

/// A [`FrameMap`] where every descriptor describes the frame
/// with the same number as its position.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl FrameMap for Identity {
    #[inline]
    fn pfn_of(&self, index: usize) -> Pfn {
        Pfn(index)
    }
}

impl<F: Fn(usize) -> Pfn> FrameMap for F {
    #[inline]
    fn pfn_of(&self, index: usize) -> Pfn {
        self(index)
    }
}
