//! Interrupt control for RISC-V harts running in machine mode.

use super::Interrupts;
use core::arch::asm;

/// The `MIE` bit inside the `mstatus` CSR.
const MSTATUS_MIE: usize = 1 << 3;

/// Masks machine mode interrupts using the `mstatus.MIE` bit.
#[derive(Debug, Clone, Copy)]
pub struct Machine;

impl Interrupts for Machine {
    #[inline]
    fn disable() -> bool {
        let bits: usize;
        // clear `MIE` and read the previous value in one instruction,
        // so an interrupt can't slip in between.
        unsafe { asm!("csrrci {}, mstatus, 8", out(reg) bits, options(nostack)) }
        bits & MSTATUS_MIE != 0
    }

    #[inline]
    fn restore(was_enabled: bool) {
        if was_enabled {
            unsafe { asm!("csrsi mstatus, 8", options(nostack)) }
        }
    }
}
