//! Device backends
//!
//! Two backends available:
//! - **Software**: in-process register file and link (tests, CI, dry runs)
//! - **Mmio**: region device node with mapped descriptor page and CSR window

pub mod mmap;
pub mod software;

pub use mmap::{open_region, MmioLink, MmioRegisters};
pub use software::{MajorityKernel, SoftwareLink, SoftwareRegisters, StreamKernel};
