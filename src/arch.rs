//! Interrupt control used to make allocator critical sections
//! safe against interrupt handlers running on the same hart.

#[cfg(target_arch = "riscv64")]
mod riscv;
#[cfg(target_arch = "riscv64")]
pub use riscv::Machine;

use core::marker::PhantomData;

/// Ability to mask interrupts on the current hart.
///
/// The allocator itself never touches interrupt state directly, the
/// locked [`PageAllocator`](crate::PageAllocator) uses an implementation of this
/// trait to keep interrupts disabled while it holds its lock.
pub trait Interrupts {
    /// Disable interrupts and return whether they were enabled before.
    fn disable() -> bool;

    /// Restore the interrupt state returned by [`disable`](Interrupts::disable).
    fn restore(was_enabled: bool);
}

/// An [`Interrupts`] implementation that does nothing.
///
/// Used on hosts and in contexts where no interrupt handler
/// can call into the allocator.
#[derive(Debug, Clone, Copy)]
pub struct NoIrq;

impl Interrupts for NoIrq {
    #[inline]
    fn disable() -> bool {
        false
    }

    #[inline]
    fn restore(_was_enabled: bool) {}
}

/// Keeps interrupts disabled until it is dropped.
#[must_use = "interrupts are restored as soon as the guard is dropped"]
pub struct IrqGuard<I: Interrupts> {
    was_enabled: bool,
    _irq: PhantomData<fn() -> I>,
}

impl<I: Interrupts> IrqGuard<I> {
    /// Disable interrupts on the current hart.
    pub fn new() -> Self {
        Self {
            was_enabled: I::disable(),
            _irq: PhantomData,
        }
    }
}

impl<I: Interrupts> Drop for IrqGuard<I> {
    fn drop(&mut self) {
        I::restore(self.was_enabled);
    }
}
