//! Mapping layout of a vFPGA region device file.
//!
//! Each region is exposed as one character device. Mapping it at fixed
//! offsets yields the windows the host needs:
//!
//! ```text
//! offset     size    purpose
//! ────────── ─────── ─────────────────────────────────────────────
//! 0x00_0000  4 KB    descriptor page (see `ctrl`)
//! 0x10_0000  64 KB   kernel CSR window (see `regs`)
//! ```
//!
//! Offsets follow the shell's page-granular mmap convention.

/// Descriptor page.
pub mod ctrl_page {
    /// mmap offset.
    pub const OFFSET: u64 = 0x0;
    /// Size in bytes.
    pub const SIZE: u64 = 0x1000;
}

/// Kernel CSR window.
pub mod csr_window {
    /// mmap offset.
    pub const OFFSET: u64 = 0x10_0000;
    /// Size in bytes.
    pub const SIZE: u64 = 0x1_0000;
}

/// Default device node for region 0 of FPGA 0.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/fpga_0_v0";

/// Mapped window of a region device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Descriptor page.
    Ctrl,
    /// Kernel CSR window.
    Csr,
}

impl Window {
    /// mmap offset of this window.
    #[must_use]
    pub const fn offset(&self) -> u64 {
        match self {
            Self::Ctrl => ctrl_page::OFFSET,
            Self::Csr => csr_window::OFFSET,
        }
    }

    /// Size of this window in bytes.
    #[must_use]
    pub const fn size(&self) -> u64 {
        match self {
            Self::Ctrl => ctrl_page::SIZE,
            Self::Csr => csr_window::SIZE,
        }
    }
}
