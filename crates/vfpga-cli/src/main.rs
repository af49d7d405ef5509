//! `vfpga`: command-line interface for vFPGA regions.
//!
//! ```text
//! USAGE:
//!   vfpga bench [--mode M] [--batches N] [--iterations N]   Timed invocation run
//!   vfpga handshake [--batch-size N] [--mode-word W]        Arm the kernel once
//!   vfpga csr-read <offset>                                 Read a kernel register
//!   vfpga csr-write <offset> <value>                        Write a kernel register
//!   vfpga info                                              Register map and device state
//! ```
//!
//! Offsets and values accept decimal or `0x` hex.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vfpga_chip::{bar, ctrl, page::AllocClass, regs};
use vfpga_driver::{
    open_device, BackendSelection, BenchConfig, BenchMode, KernelHandshake, VfpgaError,
    WaitPolicy,
};

#[derive(Parser)]
#[command(name = "vfpga", about = "vFPGA region register access and benchmarks", version)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Args)]
struct DeviceArgs {
    /// Backend: auto, software (sw) or mmio.
    #[arg(long, default_value = "auto")]
    backend: BackendSelection,
    /// Region device node.
    #[arg(long, default_value = bar::DEFAULT_DEVICE_PATH)]
    device: PathBuf,
    /// Kernel base byte offset in the CSR window.
    #[arg(long, default_value = "0", value_parser = parse_u64)]
    base: u64,
}

impl DeviceArgs {
    fn config(&self) -> BenchConfig {
        let defaults = BenchConfig::default();
        let mode = defaults.kernel_mode;
        defaults
            .with_backend(self.backend)
            .with_device_path(&self.device)
            .with_kernel(self.base, mode)
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the invocation latency benchmark and write the result log.
    Bench {
        #[command(flatten)]
        dev: DeviceArgs,
        /// Invocation pattern: sync, async or transfer.
        #[arg(long, default_value = "async")]
        mode: BenchMode,
        /// Timed batches (one result line each).
        #[arg(long, default_value_t = 100)]
        batches: usize,
        /// Invocations per batch.
        #[arg(long, default_value_t = 100)]
        iterations: usize,
        /// Inputs per kernel batch.
        #[arg(long, default_value_t = 1)]
        inputs: usize,
        /// Bytes per input.
        #[arg(long, default_value_t = 16)]
        input_size: usize,
        /// Result log path (truncated).
        #[arg(long, default_value = "results.txt")]
        output: PathBuf,
        /// Back the host buffer with 2 MiB huge pages.
        #[arg(long)]
        hugepages: bool,
        /// Give up on a wait after this many milliseconds.
        #[arg(long, default_value_t = 1000)]
        timeout_ms: u64,
    },
    /// Program batch size and mode, start the kernel and wait for done.
    Handshake {
        #[command(flatten)]
        dev: DeviceArgs,
        /// Value for the batch-size register.
        #[arg(long, default_value_t = 1)]
        batch_size: u64,
        /// Value for the mode register.
        #[arg(long, default_value = "0x8110", value_parser = parse_u64)]
        mode_word: u64,
        /// Status reads before giving up.
        #[arg(long, default_value_t = 1_000_000)]
        max_polls: u64,
    },
    /// Read one kernel register.
    CsrRead {
        #[command(flatten)]
        dev: DeviceArgs,
        /// Byte offset from the kernel base.
        #[arg(value_parser = parse_u64)]
        offset: u64,
    },
    /// Write one kernel register.
    CsrWrite {
        #[command(flatten)]
        dev: DeviceArgs,
        /// Byte offset from the kernel base.
        #[arg(value_parser = parse_u64)]
        offset: u64,
        /// Value to store.
        #[arg(value_parser = parse_u64)]
        value: u64,
    },
    /// Print the register map and which backend would be used.
    Info {
        #[command(flatten)]
        dev: DeviceArgs,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Cmd::Bench {
            dev,
            mode,
            batches,
            iterations,
            inputs,
            input_size,
            output,
            hugepages,
            timeout_ms,
        } => {
            let policy = WaitPolicy::default().with_timeout(Duration::from_millis(timeout_ms));
            let class = if hugepages { AllocClass::Huge2M } else { AllocClass::Reg4K };
            let max_size = dev.config().max_size;
            let config = dev
                .config()
                .with_mode(mode)
                .with_runs(batches, iterations)
                .with_inputs(inputs, input_size)
                .with_buffer(max_size, class)
                .with_output(output)
                .with_policies(policy, policy);
            cmd_bench(&config)?;
        }
        Cmd::Handshake {
            dev,
            batch_size,
            mode_word,
            max_polls,
        } => cmd_handshake(&dev, batch_size, mode_word, max_polls)?,
        Cmd::CsrRead { dev, offset } => cmd_csr_read(&dev, offset)?,
        Cmd::CsrWrite { dev, offset, value } => cmd_csr_write(&dev, offset, value)?,
        Cmd::Info { dev } => cmd_info(&dev)?,
    }

    Ok(())
}

fn cmd_bench(config: &BenchConfig) -> Result<()> {
    let summary = match vfpga_driver::harness::run(config) {
        Ok(summary) => summary,
        Err(e @ VfpgaError::AllocationFailed { .. }) => {
            eprintln!("Unable to allocate host memory: {e}");
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("benchmark failed"),
    };

    println!(
        "{} batches x {} {} invocations -> {}",
        config.batches,
        config.iterations,
        config.mode,
        config.output_path.display()
    );
    println!("  kernel done after {} polls", summary.handshake_polls);
    println!("  output {:02x?} -> {:02x?}", summary.output_before, summary.output_after);
    if let Some(stats) = summary.report.stats() {
        println!(
            "  batch ns: min {}  p50 {}  p95 {}  p99 {}  max {}",
            stats.min, stats.p50, stats.p95, stats.p99, stats.max
        );
    }
    if let Some(per) = summary.report.per_invocation_ns() {
        println!("  {per:.0} ns per invocation");
    }
    let aborted = summary.report.aborted();
    if aborted > 0 {
        println!("  {aborted} batch(es) aborted");
    }
    Ok(())
}

fn cmd_handshake(dev: &DeviceArgs, batch_size: u64, mode_word: u64, max_polls: u64) -> Result<()> {
    let mut device = open_device(&dev.config())?;
    let mut handshake = KernelHandshake::new();
    let policy = WaitPolicy::default().with_max_polls(max_polls);
    let polls = handshake.run(&mut device.csr, batch_size, mode_word, &policy)?;
    println!(
        "Kernel done after {polls} status polls (batch_size={batch_size}, mode={mode_word:#x}, {})",
        device.backend_type()
    );
    Ok(())
}

fn cmd_csr_read(dev: &DeviceArgs, offset: u64) -> Result<()> {
    let device = open_device(&dev.config())?;
    let value = device.csr.read(offset)?;
    let index = device.csr.index(offset)?;
    println!("csr[{offset:#06x}] (index {index}) = {value:#018x} ({value})");
    Ok(())
}

fn cmd_csr_write(dev: &DeviceArgs, offset: u64, value: u64) -> Result<()> {
    let mut device = open_device(&dev.config())?;
    tracing::debug!("csr write on {}", device.backend_type());
    device.csr.write(value, offset)?;
    println!("csr[{offset:#06x}] <- {value:#x}");
    Ok(())
}

fn cmd_info(dev: &DeviceArgs) -> Result<()> {
    println!("Kernel registers (base {:#x})", dev.base);
    println!("  STATUS      {:#06x}  bit0 start, bit1 done", regs::STATUS);
    println!("  BATCH_SIZE  {:#06x}", regs::BATCH_SIZE);
    println!("  CONFIG      {:#06x}  default mode {:#x}", regs::CONFIG, regs::DEFAULT_MODE);
    println!();
    println!("Descriptor page ({} registers)", ctrl::REG_COUNT);
    println!(
        "  ctrl @ {:#x}+{:#x}   csr @ {:#x}+{:#x}",
        bar::ctrl_page::OFFSET,
        bar::ctrl_page::SIZE,
        bar::csr_window::OFFSET,
        bar::csr_window::SIZE
    );
    println!();

    let present = dev.device.exists();
    println!(
        "Device {}: {}",
        dev.device.display(),
        if present { "present" } else { "missing" }
    );
    match open_device(&dev.config()) {
        Ok(device) => {
            let status = device.csr.read(regs::STATUS)?;
            println!("Backend: {}", device.backend_type());
            println!("STATUS = {status:#x}");
        }
        Err(e) => println!("Backend unavailable: {e}"),
    }
    Ok(())
}

fn parse_u64(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number '{s}': {e}"))
}
