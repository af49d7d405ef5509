//! Benchmark configuration

use crate::backend::BackendSelection;
use crate::bench::BenchMode;
use crate::buffer::BufferLayout;
use crate::error::{Result, VfpgaError};
use crate::wait::WaitPolicy;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use vfpga_chip::bar::DEFAULT_DEVICE_PATH;
use vfpga_chip::page::{AllocClass, DEFAULT_MAX_SIZE};
use vfpga_chip::regs::DEFAULT_MODE;

/// Everything one benchmark run needs
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// Invocation pattern
    pub mode: BenchMode,

    /// Timed batches (one result line each)
    pub batches: usize,

    /// Invocations per batch
    pub iterations: usize,

    /// Inputs per kernel batch
    pub n_inputs: usize,

    /// Bytes per input
    pub input_size: usize,

    /// Host buffer size in bytes (rounded up to whole pages)
    pub max_size: usize,

    /// Host buffer page class
    pub alloc_class: AllocClass,

    /// Lock the host buffer into RAM
    pub pin_buffer: bool,

    /// Byte fill of the input region before the run
    pub fill_byte: u8,

    /// Kernel base byte offset in the CSR window
    pub kernel_base: u64,

    /// Opaque kernel mode word
    pub kernel_mode: u64,

    /// Result log path
    pub output_path: PathBuf,

    /// Which backend to open
    pub backend: BackendSelection,

    /// Region device node for the mapped backend
    pub device_path: PathBuf,

    /// Round-trip floor of each simulated link operation
    pub sim_op_latency: Duration,

    /// Bound on the kernel done wait
    pub handshake_policy: WaitPolicy,

    /// Bound on completion waits
    pub completion_policy: WaitPolicy,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            mode: BenchMode::Async,
            batches: 100,
            iterations: 100,
            n_inputs: 1,
            input_size: 16,
            max_size: DEFAULT_MAX_SIZE,
            alloc_class: AllocClass::Reg4K,
            pin_buffer: true,
            fill_byte: 0xFF,
            kernel_base: 0,
            kernel_mode: DEFAULT_MODE,
            output_path: PathBuf::from("results.txt"),
            backend: BackendSelection::Auto,
            device_path: PathBuf::from(DEFAULT_DEVICE_PATH),
            sim_op_latency: Duration::from_nanos(200),
            handshake_policy: WaitPolicy::default(),
            completion_policy: WaitPolicy::default(),
        }
    }
}

impl BenchConfig {
    /// Set the mode
    #[must_use]
    pub fn with_mode(mut self, mode: BenchMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set batches and iterations per batch
    #[must_use]
    pub fn with_runs(mut self, batches: usize, iterations: usize) -> Self {
        self.batches = batches;
        self.iterations = iterations;
        self
    }

    /// Set the input shape
    #[must_use]
    pub fn with_inputs(mut self, n_inputs: usize, input_size: usize) -> Self {
        self.n_inputs = n_inputs;
        self.input_size = input_size;
        self
    }

    /// Set the host buffer size and page class
    #[must_use]
    pub fn with_buffer(mut self, max_size: usize, class: AllocClass) -> Self {
        self.max_size = max_size;
        self.alloc_class = class;
        self
    }

    /// Set the kernel base offset and mode word
    #[must_use]
    pub fn with_kernel(mut self, base: u64, mode: u64) -> Self {
        self.kernel_base = base;
        self.kernel_mode = mode;
        self
    }

    /// Set the result log path
    #[must_use]
    pub fn with_output(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    /// Set the backend
    #[must_use]
    pub fn with_backend(mut self, backend: BackendSelection) -> Self {
        self.backend = backend;
        self
    }

    /// Set the region device node
    #[must_use]
    pub fn with_device_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.device_path = path.into();
        self
    }

    /// Set the simulated per-operation floor
    #[must_use]
    pub fn with_sim_latency(mut self, latency: Duration) -> Self {
        self.sim_op_latency = latency;
        self
    }

    /// Set both wait policies
    #[must_use]
    pub fn with_policies(mut self, handshake: WaitPolicy, completion: WaitPolicy) -> Self {
        self.handshake_policy = handshake;
        self.completion_policy = completion;
        self
    }

    /// Input/output placement inside the host buffer
    pub const fn layout(&self) -> BufferLayout {
        BufferLayout::new(self.n_inputs, self.input_size)
    }

    /// Check the configuration is runnable
    ///
    /// # Errors
    ///
    /// Returns [`VfpgaError::Config`] for zero counts, a layout that does
    /// not fit `max_size`, or an unaligned kernel base.
    pub fn validate(&self) -> Result<()> {
        if self.batches == 0 || self.iterations == 0 {
            return Err(VfpgaError::config("batches and iterations must be non-zero"));
        }
        if self.n_inputs == 0 || self.input_size == 0 {
            return Err(VfpgaError::config("n_inputs and input_size must be non-zero"));
        }
        let needed = self.layout().total_len()?;
        if needed > self.max_size {
            return Err(VfpgaError::config(format!(
                "layout needs {needed} bytes, buffer is {} bytes",
                self.max_size
            )));
        }
        if self.kernel_base % 8 != 0 {
            return Err(VfpgaError::config(format!(
                "kernel base {:#x} is not 8-byte aligned",
                self.kernel_base
            )));
        }
        debug!(
            "Config: {} x {} {} invocations, {} input(s) of {} bytes",
            self.batches, self.iterations, self.mode, self.n_inputs, self.input_size
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_run() {
        let config = BenchConfig::default();
        assert_eq!((config.batches, config.iterations), (100, 100));
        assert_eq!(config.mode, BenchMode::Async);
        assert_eq!(config.kernel_mode, 0x8110);
        assert_eq!(config.alloc_class.pages_for(config.max_size), 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_iterations_rejected() {
        assert!(BenchConfig::default().with_runs(10, 0).validate().is_err());
    }

    #[test]
    fn oversized_layout_rejected() {
        let config = BenchConfig::default()
            .with_inputs(1024, 256)
            .with_buffer(64 * 1024, AllocClass::Reg4K);
        assert!(matches!(config.validate(), Err(VfpgaError::Config { .. })));
    }

    #[test]
    fn unaligned_base_rejected() {
        let config = BenchConfig::default().with_kernel(0x4, DEFAULT_MODE);
        assert!(config.validate().is_err());
    }
}
