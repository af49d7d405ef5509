//! Invocation-latency harness for reconfigurable FPGA regions (vFPGAs).
//!
//! The crate drives one vFPGA region through two narrow seams:
//!
//! - a bank of 64-bit kernel control registers ([`RegisterAccess`]), used
//!   to program the kernel and run its start handshake, and
//! - a descriptor link ([`Link`]) that moves host-buffer bytes to and from
//!   the card and counts completions per operation kind.
//!
//! On top of those sit the [`InvocationEngine`] and the [`Benchmark`] loop,
//! which times batches of READ/WRITE/TRANSFER invocations and logs one
//! elapsed-nanoseconds line per batch.
//!
//! # Backends
//!
//! ```text
//! Mmio:      /dev/fpga_<n>_v<m>, descriptor page + CSR window via mmap
//! Software:  in-process register file and link (tests, CI, dry runs)
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use vfpga_driver::{BenchConfig, BenchMode};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BenchConfig::default()
//!     .with_mode(BenchMode::Sync)
//!     .with_output("results.txt");
//! let summary = vfpga_driver::harness::run(&config)?;
//!
//! if let Some(stats) = summary.report.stats() {
//!     println!("p50 {} ns  p99 {} ns", stats.p50, stats.p99);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

mod backend;
pub mod backends;
mod bench;
mod buffer;
mod config;
mod csr;
mod descriptor;
mod engine;
mod error;
pub mod harness;
pub mod mmio;
mod results;
mod wait;

pub use backend::{open_device, BackendSelection, BackendType, Device};
pub use backends::{SoftwareLink, SoftwareRegisters};
pub use bench::{BenchMode, BenchReport, Benchmark, LatencySample, LatencyStats};
pub use buffer::{BufferLayout, HostBuffer, Region};
pub use config::BenchConfig;
pub use csr::{ControlRegisters, HandshakeState, KernelHandshake, RegisterAccess};
pub use descriptor::{Endpoint, Invoke, InvokeFlags, Oper, Paired, Single};
pub use engine::{InvocationEngine, Link};
pub use error::{Result, VfpgaError};
pub use results::ResultLog;
pub use wait::WaitPolicy;

/// Chip constants (re-exported from vfpga-chip).
pub mod chip {
    pub use vfpga_chip::page::AllocClass;
    pub use vfpga_chip::regs;
}

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        BenchConfig, BenchMode, Benchmark, ControlRegisters, HostBuffer, InvocationEngine, Invoke,
        InvokeFlags, KernelHandshake, Oper, Result, ResultLog, VfpgaError, WaitPolicy,
    };
}
