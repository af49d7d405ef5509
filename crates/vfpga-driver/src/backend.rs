//! Backend selection
//!
//! A [`Device`] pairs the two halves every backend provides: the kernel's
//! control registers and the data-movement link, wrapped in an
//! [`InvocationEngine`].

use crate::backends::software::{MajorityKernel, SoftwareLink, SoftwareRegisters};
use crate::backends::mmap::open_region;
use crate::config::BenchConfig;
use crate::csr::{ControlRegisters, RegisterAccess};
use crate::engine::{InvocationEngine, Link};
use crate::error::{Result, VfpgaError};
use std::str::FromStr;

/// Backend type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// In-process simulation
    Software,
    /// Mapped region device
    Mmio,
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software => write!(f, "Software (virtual vFPGA)"),
            Self::Mmio => write!(f, "MMIO"),
        }
    }
}

/// Backend selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendSelection {
    /// Mapped device if the node exists, software otherwise
    #[default]
    Auto,
    /// Force the software backend
    Software,
    /// Force the mapped device
    Mmio,
}

impl FromStr for BackendSelection {
    type Err = VfpgaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "software" | "sw" | "sim" => Ok(Self::Software),
            "mmio" | "hw" => Ok(Self::Mmio),
            other => Err(VfpgaError::config(format!("unknown backend '{other}'"))),
        }
    }
}

/// Control registers plus invocation engine of one vFPGA region
#[derive(Debug)]
pub struct Device {
    /// Kernel control registers
    pub csr: ControlRegisters<Box<dyn RegisterAccess>>,
    /// Descriptor engine
    pub engine: InvocationEngine<Box<dyn Link>>,
}

impl Device {
    /// Assemble a device from its halves
    pub fn new(regs: Box<dyn RegisterAccess>, link: Box<dyn Link>, config: &BenchConfig) -> Self {
        Self {
            csr: ControlRegisters::new(regs, config.kernel_base),
            engine: InvocationEngine::new(link).with_policy(config.completion_policy),
        }
    }

    /// Software device matching `config`'s input size and latency floor
    pub fn software(config: &BenchConfig) -> Self {
        let input_size = config.input_size;
        let regs = SoftwareRegisters::new().with_base(config.kernel_base);
        let link = SoftwareLink::with_kernels(|| Box::new(MajorityKernel::new(input_size)))
            .with_op_latency(config.sim_op_latency);
        Self::new(Box::new(regs), Box::new(link), config)
    }

    /// Backend the link belongs to
    pub fn backend_type(&self) -> BackendType {
        self.engine.link().backend_type()
    }
}

/// Open the device `config` asks for
///
/// # Errors
///
/// Returns an error if the mapped backend was forced and cannot be opened.
pub fn open_device(config: &BenchConfig) -> Result<Device> {
    match config.backend {
        BackendSelection::Software => Ok(Device::software(config)),
        BackendSelection::Mmio => {
            let (regs, link) = open_region(&config.device_path)?;
            Ok(Device::new(Box::new(regs), Box::new(link), config))
        }
        BackendSelection::Auto => match open_region(&config.device_path) {
            Ok((regs, link)) => {
                tracing::info!("Using MMIO backend at {}", config.device_path.display());
                Ok(Device::new(Box::new(regs), Box::new(link), config))
            }
            Err(e) => {
                tracing::info!("MMIO unavailable ({e}), using software backend");
                Ok(Device::software(config))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_parses_aliases() {
        assert_eq!("sim".parse::<BackendSelection>().unwrap(), BackendSelection::Software);
        assert_eq!("MMIO".parse::<BackendSelection>().unwrap(), BackendSelection::Mmio);
        assert!("pcie".parse::<BackendSelection>().is_err());
    }

    #[test]
    fn auto_falls_back_to_software() {
        let config = BenchConfig::default().with_device_path("/nonexistent/fpga_0_v0");
        let device = open_device(&config).unwrap();
        assert_eq!(device.backend_type(), BackendType::Software);
    }

    #[test]
    fn forced_mmio_reports_missing_device() {
        let config = BenchConfig::default()
            .with_backend(BackendSelection::Mmio)
            .with_device_path("/nonexistent/fpga_0_v0");
        assert!(matches!(
            open_device(&config),
            Err(VfpgaError::DeviceNotFound { .. })
        ));
    }
}
