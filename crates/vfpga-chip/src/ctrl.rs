//! Descriptor registers of the vFPGA region.
//!
//! The shell accepts one READ (card pulls from host memory) and one WRITE
//! (card pushes to host memory) descriptor at a time through a page of
//! host-controlled registers. A TRANSFER is a READ and a WRITE started by a
//! single control word, with both sides routed through the kernel's streams.
//!
//! Indices are register indices (byte offset / 8) within the descriptor
//! page, see [`crate::bar::ctrl_page`].
//!
//! ```text
//! index  register          notes
//! ─────  ────────────────  ─────────────────────────────────────────
//!  0     CTRL              start / stream / clear / destination bits
//!  1     VADDR_RD          host virtual address the card reads from
//!  2     LEN_RD            bytes to read
//!  3     VADDR_WR          host virtual address the card writes to
//!  4     LEN_WR            bytes to write
//!  5     STAT_CMPLT_RD     completed reads since last clear
//!  6     STAT_CMPLT_WR     completed writes since last clear
//! ```

/// Control word register.
pub const CTRL: u64 = 0;
/// Read descriptor: source virtual address.
pub const VADDR_RD: u64 = 1;
/// Read descriptor: length in bytes.
pub const LEN_RD: u64 = 2;
/// Write descriptor: destination virtual address.
pub const VADDR_WR: u64 = 3;
/// Write descriptor: length in bytes.
pub const LEN_WR: u64 = 4;
/// Completed read counter.
pub const STAT_CMPLT_RD: u64 = 5;
/// Completed write counter.
pub const STAT_CMPLT_WR: u64 = 6;
/// Number of registers in the descriptor page that are in use.
pub const REG_COUNT: u64 = 7;

/// Control word bit definitions.
pub mod bits {
    /// Start the posted read descriptor.
    pub const START_RD: u64 = 1 << 0;
    /// Start the posted write descriptor.
    pub const START_WR: u64 = 1 << 1;
    /// Read side targets a kernel stream instead of card memory.
    pub const STREAM_RD: u64 = 1 << 2;
    /// Write side drains a kernel stream instead of card memory.
    pub const STREAM_WR: u64 = 1 << 3;
    /// Clear the read completion counter before starting.
    pub const CLR_STAT_RD: u64 = 1 << 4;
    /// Clear the write completion counter before starting.
    pub const CLR_STAT_WR: u64 = 1 << 5;
    /// Read-side destination (stream / queue id), 4 bits.
    pub const DEST_RD_SHIFT: u32 = 8;
    /// Write-side destination (stream / queue id), 4 bits.
    pub const DEST_WR_SHIFT: u32 = 12;
    /// Destination field mask (before shifting).
    pub const DEST_MASK: u64 = 0xF;
}

/// Largest destination id the control word can carry.
pub const MAX_DEST: u8 = 0xF;

/// Encode `dest` into the read-side destination field.
#[must_use]
pub const fn dest_rd(dest: u8) -> u64 {
    ((dest as u64) & bits::DEST_MASK) << bits::DEST_RD_SHIFT
}

/// Encode `dest` into the write-side destination field.
#[must_use]
pub const fn dest_wr(dest: u8) -> u64 {
    ((dest as u64) & bits::DEST_MASK) << bits::DEST_WR_SHIFT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_bits_do_not_overlap_destination_fields() {
        let flags = bits::START_RD
            | bits::START_WR
            | bits::STREAM_RD
            | bits::STREAM_WR
            | bits::CLR_STAT_RD
            | bits::CLR_STAT_WR;
        assert_eq!(flags & dest_rd(MAX_DEST), 0);
        assert_eq!(flags & dest_wr(MAX_DEST), 0);
        assert_eq!(dest_rd(MAX_DEST) & dest_wr(MAX_DEST), 0);
    }

    #[test]
    fn destination_is_truncated_to_field_width() {
        assert_eq!(dest_rd(0x1F), dest_rd(0xF));
        assert_eq!(dest_wr(3), 3 << 12);
    }

    #[test]
    fn registers_fit_in_descriptor_page() {
        assert!(STAT_CMPLT_WR < REG_COUNT);
        assert!(REG_COUNT * 8 <= crate::bar::ctrl_page::SIZE);
    }
}
