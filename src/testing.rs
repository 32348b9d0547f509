//! Helpers shared by the unit tests.

use crate::mem::PageDescriptor;
use std::{sync::Once, vec::Vec};

/// Create a descriptor table with `len` invalid descriptors.
pub fn table(len: usize) -> Vec<PageDescriptor> {
    vec![PageDescriptor::new(); len]
}

fn print_sink(args: core::fmt::Arguments<'_>) {
    print!("{}", args);
}

/// Route log output to stdout, so it shows up for failing tests.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // another test harness may have installed a logger already
        let _ = crate::logger::init_logging(print_sink);
    });
}
