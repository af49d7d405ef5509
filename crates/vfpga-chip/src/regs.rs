//! Kernel control register map.
//!
//! The kernel exposes a small AXI-Lite control block. All registers are
//! 64 bits wide and are addressed by *register index*, i.e. the byte offset
//! from the region base divided by 8:
//!
//! ```text
//! byte   index  register
//! ────── ────── ───────────────────────────────────────────────
//! +0x00  0      STATUS      bit0 = start request, bit1 = done
//! +0x10  2      BATCH_SIZE  number of inputs the kernel consumes
//! +0x18  3      CONFIG      opaque kernel mode word
//! ```
//!
//! The done bit carries no meaning until a start has been issued, and it must
//! be polled: the kernel raises it asynchronously.

/// Byte offset of the kernel's control block inside the CSR window.
pub const KERNEL_CTRL_OFFSET: u64 = 0x0;

/// Register width in bytes.
pub const REG_BYTES: u64 = 8;

/// Start / status register.
pub const STATUS: u64 = 0x00;

/// Batch size parameter register.
pub const BATCH_SIZE: u64 = 0x10;

/// Kernel configuration (mode) register.
pub const CONFIG: u64 = 0x18;

/// Mode word the reference kernel is built for.
pub const DEFAULT_MODE: u64 = 0x8110;

// ── Status register bit definitions ──────────────────────────────────────────

/// Status register bit definitions.
pub mod status {
    /// Start request (write 1 to arm the kernel).
    pub const START: u64 = 1 << 0;
    /// Kernel reports done.
    pub const DONE: u64 = 1 << 1;
}

/// Register index addressed by `byte_offset` relative to `base`.
///
/// Returns `None` when the sum is not register aligned or overflows.
#[must_use]
pub const fn reg_index(base: u64, byte_offset: u64) -> Option<u64> {
    match base.checked_add(byte_offset) {
        Some(addr) if addr % REG_BYTES == 0 => Some(addr / REG_BYTES),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_registers_map_to_expected_indices() {
        assert_eq!(reg_index(KERNEL_CTRL_OFFSET, STATUS), Some(0));
        assert_eq!(reg_index(KERNEL_CTRL_OFFSET, BATCH_SIZE), Some(2));
        assert_eq!(reg_index(KERNEL_CTRL_OFFSET, CONFIG), Some(3));
    }

    #[test]
    fn base_offset_shifts_index() {
        assert_eq!(reg_index(0x100, CONFIG), Some((0x100 + 0x18) / 8));
    }

    #[test]
    fn unaligned_or_overflowing_offsets_have_no_index() {
        assert_eq!(reg_index(0, 0x4), None);
        assert_eq!(reg_index(u64::MAX, 8), None);
    }

    #[test]
    fn status_bits_distinct() {
        assert_ne!(status::START, status::DONE);
        assert_eq!(status::DONE, 2);
    }
}
