//! Invocation descriptors
//!
//! A descriptor names one data movement between the host buffer and the
//! card. READ and WRITE move a single region to or from an endpoint; a
//! TRANSFER pulls a source region through the kernel and lands the result in
//! a destination region without the host touching the data in between.

use crate::buffer::{HostBuffer, Region};
use crate::error::{Result, VfpgaError};
use vfpga_chip::ctrl::MAX_DEST;

/// Kind of operation, also the key of the completion counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Oper {
    /// Card reads from host memory (host to device)
    Read,
    /// Card writes to host memory (device to host)
    Write,
    /// Card reads, runs the kernel, and writes back in one invocation
    Transfer,
}

impl Oper {
    /// All kinds, in counter order
    pub const ALL: [Self; 3] = [Self::Read, Self::Write, Self::Transfer];

    /// Counter slot of this kind
    pub const fn index(self) -> usize {
        match self {
            Self::Read => 0,
            Self::Write => 1,
            Self::Transfer => 2,
        }
    }
}

impl std::fmt::Display for Oper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read => write!(f, "READ"),
            Self::Write => write!(f, "WRITE"),
            Self::Transfer => write!(f, "TRANSFER"),
        }
    }
}

/// Where the card side of a READ / WRITE lands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endpoint {
    /// Card memory, addressed like the host region
    #[default]
    Memory,
    /// Kernel stream; bytes are consumed / produced in order
    Stream,
}

/// Behaviour flags shared by every descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvokeFlags {
    /// Reset this kind's completion counter before posting
    pub clear_stats: bool,
    /// Block until the card reports the operation done
    pub poll: bool,
    /// Stream / queue id on the card
    pub dest: u8,
}

impl Default for InvokeFlags {
    fn default() -> Self {
        Self {
            clear_stats: true,
            poll: true,
            dest: 0,
        }
    }
}

impl InvokeFlags {
    /// Non-blocking flags that accumulate completions across invocations
    pub const fn detached() -> Self {
        Self {
            clear_stats: false,
            poll: false,
            dest: 0,
        }
    }

    /// Set the destination id
    #[must_use]
    pub const fn with_dest(mut self, dest: u8) -> Self {
        self.dest = dest;
        self
    }
}

/// Single-region operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Single {
    /// Host region read from or written to
    pub region: Region,
    /// Card-side endpoint
    pub endpoint: Endpoint,
    /// Shared flags
    pub flags: InvokeFlags,
}

/// Source / destination pair moved by one TRANSFER
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paired {
    /// Host region the card reads
    pub src: Region,
    /// Host region the card writes
    pub dst: Region,
    /// Shared flags
    pub flags: InvokeFlags,
}

/// One invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invoke {
    /// Host to device
    Read(Single),
    /// Device to host
    Write(Single),
    /// Host to kernel to host
    Transfer(Paired),
}

impl Invoke {
    /// Blocking memory-mapped read of `region`
    pub fn read(region: Region) -> Self {
        Self::Read(Single {
            region,
            endpoint: Endpoint::Memory,
            flags: InvokeFlags::default(),
        })
    }

    /// Blocking memory-mapped write of `region`
    pub fn write(region: Region) -> Self {
        Self::Write(Single {
            region,
            endpoint: Endpoint::Memory,
            flags: InvokeFlags::default(),
        })
    }

    /// Transfer `src` through the kernel into `dst` with default flags
    pub fn transfer(src: Region, dst: Region) -> Self {
        Self::Transfer(Paired {
            src,
            dst,
            flags: InvokeFlags::default(),
        })
    }

    /// Replace the shared flags
    #[must_use]
    pub fn with_flags(mut self, new: InvokeFlags) -> Self {
        *self.flags_mut() = new;
        self
    }

    /// Target the kernel stream instead of card memory (no-op on TRANSFER,
    /// which always streams)
    #[must_use]
    pub fn streaming(mut self) -> Self {
        if let Self::Read(s) | Self::Write(s) = &mut self {
            s.endpoint = Endpoint::Stream;
        }
        self
    }

    /// Operation kind
    pub const fn oper(&self) -> Oper {
        match self {
            Self::Read(_) => Oper::Read,
            Self::Write(_) => Oper::Write,
            Self::Transfer(_) => Oper::Transfer,
        }
    }

    /// Shared flags
    pub const fn flags(&self) -> &InvokeFlags {
        match self {
            Self::Read(s) | Self::Write(s) => &s.flags,
            Self::Transfer(p) => &p.flags,
        }
    }

    fn flags_mut(&mut self) -> &mut InvokeFlags {
        match self {
            Self::Read(s) | Self::Write(s) => &mut s.flags,
            Self::Transfer(p) => &mut p.flags,
        }
    }

    /// Total bytes the card moves for this invocation
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Read(s) | Self::Write(s) => s.region.len(),
            Self::Transfer(p) => p.src.len() + p.dst.len(),
        }
    }

    /// Check every region against `buffer` and the destination against the
    /// control word's field width
    ///
    /// # Errors
    ///
    /// Returns [`VfpgaError::OutOfBounds`] for a region outside the buffer,
    /// or a configuration error for an unencodable destination.
    pub fn validate(&self, buffer: &HostBuffer) -> Result<()> {
        match self {
            Self::Read(s) | Self::Write(s) => {
                buffer.check(s.region)?;
            }
            Self::Transfer(p) => {
                buffer.check(p.src)?;
                buffer.check(p.dst)?;
            }
        }
        let dest = self.flags().dest;
        if dest > MAX_DEST {
            return Err(VfpgaError::config(format!(
                "destination {dest} exceeds {MAX_DEST}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vfpga_chip::page::AllocClass;

    fn buffer() -> HostBuffer {
        HostBuffer::allocate(AllocClass::Reg4K, 1).unwrap()
    }

    #[test]
    fn defaults_clear_and_poll() {
        let buf = buffer();
        let d = Invoke::read(buf.region(0, 16).unwrap());
        assert_eq!(d.oper(), Oper::Read);
        assert!(d.flags().clear_stats);
        assert!(d.flags().poll);
        assert_eq!(d.flags().dest, 0);
        assert!(matches!(d, Invoke::Read(Single { endpoint: Endpoint::Memory, .. })));
    }

    #[test]
    fn streaming_only_changes_single_forms() {
        let buf = buffer();
        let r = buf.region(0, 16).unwrap();
        let d = Invoke::read(r).streaming();
        assert!(matches!(d, Invoke::Read(Single { endpoint: Endpoint::Stream, .. })));
        let t = Invoke::transfer(r, buf.region(16, 1).unwrap());
        assert_eq!(t.streaming(), t);
    }

    #[test]
    fn detached_flags_neither_clear_nor_poll() {
        let buf = buffer();
        let d = Invoke::read(buf.region(0, 16).unwrap()).with_flags(InvokeFlags::detached());
        assert!(!d.flags().clear_stats);
        assert!(!d.flags().poll);
    }

    #[test]
    fn region_from_other_buffer_is_rejected() {
        let big = HostBuffer::allocate(AllocClass::Reg4K, 2).unwrap();
        let small = buffer();
        let d = Invoke::write(big.region(4096, 8).unwrap());
        assert!(d.validate(&big).is_ok());
        assert!(matches!(d.validate(&small), Err(VfpgaError::OutOfBounds { .. })));
    }

    #[test]
    fn transfer_checks_both_sides() {
        let big = HostBuffer::allocate(AllocClass::Reg4K, 2).unwrap();
        let small = buffer();
        let d = Invoke::transfer(small.region(0, 16).unwrap(), big.region(5000, 1).unwrap());
        assert!(d.validate(&small).is_err());
        assert_eq!(d.bytes(), 17);
    }

    #[test]
    fn oversized_destination_is_rejected() {
        let buf = buffer();
        let d = Invoke::read(buf.region(0, 1).unwrap())
            .with_flags(InvokeFlags::default().with_dest(16));
        assert!(matches!(d.validate(&buf), Err(VfpgaError::Config { .. })));
    }

    #[test]
    fn counter_slots_are_distinct() {
        let mut slots: Vec<_> = Oper::ALL.iter().map(|o| o.index()).collect();
        slots.dedup();
        assert_eq!(slots, vec![0, 1, 2]);
        assert_eq!(Oper::Transfer.to_string(), "TRANSFER");
    }
}
