//! Memory-mapped hardware backend
//!
//! Opens a region device node (e.g. `/dev/fpga_0_v0`), maps its descriptor
//! page and kernel CSR window, and drives the card through them:
//!
//! - [`MmioRegisters`] forwards register indices to the CSR window.
//! - [`MmioLink`] posts descriptors by writing addresses and lengths into the
//!   descriptor page and then the control word, and reads the completion
//!   counters back from the same page.
//!
//! The shell counts completed reads and completed writes. A TRANSFER
//! completes on its write side, so TRANSFER and WRITE share a counter here.

use crate::backend::BackendType;
use crate::buffer::HostBuffer;
use crate::csr::RegisterAccess;
use crate::descriptor::{Endpoint, Invoke, Oper, Single};
use crate::engine::Link;
use crate::error::{Result, VfpgaError};
use crate::mmio::MappedRegion;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{fence, Ordering};
use vfpga_chip::bar::Window;
use vfpga_chip::ctrl::{self, bits};

/// Kernel CSR window of a mapped region
#[derive(Debug)]
pub struct MmioRegisters {
    window: MappedRegion,
}

impl RegisterAccess for MmioRegisters {
    #[allow(clippy::cast_possible_truncation)]
    fn read_reg(&self, index: u64) -> u64 {
        self.window.read64((index * 8) as usize)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_reg(&mut self, index: u64, value: u64) {
        self.window.write64((index * 8) as usize, value);
    }

    fn contains(&self, index: u64) -> bool {
        index < (self.window.size() / 8) as u64
    }
}

/// Descriptor page of a mapped region
#[derive(Debug)]
pub struct MmioLink {
    page: MappedRegion,
}

impl MmioLink {
    fn reg(&self, index: u64) -> u64 {
        self.page.read64(usize::try_from(index * 8).unwrap_or(usize::MAX))
    }

    fn set(&self, index: u64, value: u64) {
        self.page.write64(usize::try_from(index * 8).unwrap_or(usize::MAX), value);
    }

    fn post_read(&self, buffer: &HostBuffer, s: &Single) -> Result<u64> {
        self.set(ctrl::VADDR_RD, buffer.vaddr(s.region)?);
        self.set(ctrl::LEN_RD, s.region.len() as u64);
        let stream = match s.endpoint {
            Endpoint::Memory => 0,
            Endpoint::Stream => bits::STREAM_RD,
        };
        Ok(bits::START_RD | stream | ctrl::dest_rd(s.flags.dest))
    }

    fn post_write(&self, buffer: &HostBuffer, s: &Single) -> Result<u64> {
        self.set(ctrl::VADDR_WR, buffer.vaddr(s.region)?);
        self.set(ctrl::LEN_WR, s.region.len() as u64);
        let stream = match s.endpoint {
            Endpoint::Memory => 0,
            Endpoint::Stream => bits::STREAM_WR,
        };
        Ok(bits::START_WR | stream | ctrl::dest_wr(s.flags.dest))
    }
}

impl Link for MmioLink {
    fn post(&mut self, buffer: &mut HostBuffer, invoke: &Invoke) -> Result<()> {
        let word = match invoke {
            Invoke::Read(s) => self.post_read(buffer, s)?,
            Invoke::Write(s) => self.post_write(buffer, s)?,
            Invoke::Transfer(p) => {
                let rd = Single {
                    region: p.src,
                    endpoint: Endpoint::Stream,
                    flags: p.flags,
                };
                let wr = Single {
                    region: p.dst,
                    endpoint: Endpoint::Stream,
                    flags: p.flags,
                };
                self.post_read(buffer, &rd)? | self.post_write(buffer, &wr)?
            }
        };
        // Addresses and lengths must land before the start bits.
        fence(Ordering::Release);
        self.set(ctrl::CTRL, word);
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn completions(&self, oper: Oper) -> u32 {
        let value = match oper {
            Oper::Read => self.reg(ctrl::STAT_CMPLT_RD),
            Oper::Write | Oper::Transfer => self.reg(ctrl::STAT_CMPLT_WR),
        };
        fence(Ordering::Acquire);
        value as u32
    }

    fn reset_completions(&mut self, oper: Option<Oper>) {
        let word = match oper {
            Some(Oper::Read) => bits::CLR_STAT_RD,
            Some(Oper::Write | Oper::Transfer) => bits::CLR_STAT_WR,
            None => bits::CLR_STAT_RD | bits::CLR_STAT_WR,
        };
        self.set(ctrl::CTRL, word);
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Mmio
    }
}

/// Open a region device and map both windows
///
/// # Errors
///
/// Returns [`VfpgaError::DeviceNotFound`] if `path` does not exist, an I/O
/// error if it cannot be opened read/write, or a mapping error.
pub fn open_region(path: &Path) -> Result<(MmioRegisters, MmioLink)> {
    if !path.exists() {
        return Err(VfpgaError::device_not_found(path));
    }
    let device: File = OpenOptions::new().read(true).write(true).open(path)?;

    let csr = MappedRegion::map(&device, Window::Csr)?;
    let page = MappedRegion::map(&device, Window::Ctrl)?;

    tracing::info!("Opened region device {}", path.display());

    // The mappings keep the device referenced after `device` is closed.
    Ok((MmioRegisters { window: csr }, MmioLink { page }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csr::ControlRegisters;
    use vfpga_chip::regs;

    #[test]
    fn missing_device_reported() {
        let err = open_region(Path::new("/nonexistent/fpga_9_v9")).unwrap_err();
        assert!(matches!(err, VfpgaError::DeviceNotFound { .. }));
    }

    #[test]
    fn csr_offsets_bounded_by_window() {
        let path = std::env::temp_dir().join(format!("vfpga-region-{}", std::process::id()));
        let file = File::create(&path).unwrap();
        file.set_len(2 * 1024 * 1024).unwrap();
        drop(file);

        let (regs, _link) = open_region(&path).unwrap();
        let mut csr = ControlRegisters::new(regs, 0);

        csr.write(0xDEAD, 0xFFF8).unwrap();
        assert_eq!(csr.read(0xFFF8).unwrap(), 0xDEAD);
        assert!(matches!(
            csr.read(0x1_0000),
            Err(VfpgaError::RegisterOutOfRange { offset: 0x1_0000, .. })
        ));
        assert!(csr.write(1, 0x20_0000).is_err());

        let far = ControlRegisters::new(csr.into_inner(), 0x1_0000);
        assert!(matches!(
            far.read(regs::STATUS),
            Err(VfpgaError::RegisterOutOfRange { base: 0x1_0000, .. })
        ));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    #[ignore] // Requires hardware
    fn test_open_default_region() {
        let (regs, link) =
            open_region(Path::new(vfpga_chip::bar::DEFAULT_DEVICE_PATH)).expect("region device");
        println!("status = {:#x}", regs.read_reg(0));
        println!("read completions = {}", link.completions(Oper::Read));
    }
}
