//! Physical page-frame allocator for Windy.
//!
//! The allocator manages a table of [page descriptors](mem::PageDescriptor)
//! owned by the kernel and hands out power-of-two sized runs of page frames
//! using the buddy algorithm. See [`mem::buddy`] for the algorithm itself and
//! [`mem::alloc`] for the locked allocator that is shared between harts.
#![deny(rust_2018_idioms, rustdoc::broken_intra_doc_links)]
#![cfg_attr(not(test), no_std)]

#[cfg(not(any(target_pointer_width = "32", target_pointer_width = "64")))]
compile_error!("windy_pmem requires at least 32 bit pointers");

pub mod arch;
pub mod logger;
pub mod mem;
pub mod unit;

#[cfg(test)]
mod testing;

pub use mem::{
    alloc::PageAllocator, buddy::BuddyAllocator, AllocStats, Error, PageDescriptor, PageState,
    Pfn, Result,
};
