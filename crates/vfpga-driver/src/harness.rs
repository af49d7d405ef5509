//! End-to-end benchmark run
//!
//! Allocates and fills the host buffer, arms the kernel, runs the
//! benchmark into the result log and captures the output region before and
//! after the run.

use crate::backend::{open_device, Device};
use crate::bench::{BenchReport, Benchmark};
use crate::buffer::HostBuffer;
use crate::config::BenchConfig;
use crate::csr::KernelHandshake;
use crate::error::Result;
use crate::results::ResultLog;
use std::io::Write;
use tracing::{info, warn};

/// What a full run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Batch samples and statistics
    pub report: BenchReport,
    /// Status reads until the kernel reported done
    pub handshake_polls: u64,
    /// Output region before the first batch
    pub output_before: Vec<u8>,
    /// Output region after the last batch
    pub output_after: Vec<u8>,
}

/// Allocate the host buffer for `config` and fill its input region
///
/// Pinning is best effort: a failed `mlock` is logged and the run goes on
/// with an unpinned buffer.
///
/// # Errors
///
/// Returns an allocation error, or a bounds error if the layout does not fit.
pub fn prepare_buffer(config: &BenchConfig) -> Result<HostBuffer> {
    let mut buffer = HostBuffer::for_bytes(config.alloc_class, config.max_size)?;
    if config.pin_buffer {
        if let Err(e) = buffer.pin() {
            warn!("Host buffer not pinned: {e}");
        }
    }
    let input = config.layout().input(&buffer)?;
    buffer.bytes_mut(input)?.fill(config.fill_byte);
    Ok(buffer)
}

/// Program the batch size and mode, start the kernel and wait for done
///
/// # Errors
///
/// Returns [`crate::VfpgaError::HandshakeTimeout`] if the kernel never
/// reports done.
pub fn arm_kernel(device: &mut Device, config: &BenchConfig) -> Result<u64> {
    let mut handshake = KernelHandshake::new();
    handshake.run(
        &mut device.csr,
        config.n_inputs as u64,
        config.kernel_mode,
        &config.handshake_policy,
    )
}

/// Run on an already opened device, logging into `log`
///
/// # Errors
///
/// Returns configuration, allocation, handshake, engine and log errors.
pub fn run_on<W: Write>(
    device: &mut Device,
    config: &BenchConfig,
    log: &mut ResultLog<W>,
) -> Result<RunSummary> {
    config.validate()?;
    run_validated(device, config, log)
}

fn run_validated<W: Write>(
    device: &mut Device,
    config: &BenchConfig,
    log: &mut ResultLog<W>,
) -> Result<RunSummary> {
    let mut buffer = prepare_buffer(config)?;
    let layout = config.layout();
    let benchmark = Benchmark::new(
        config.mode,
        &layout,
        &buffer,
        config.batches,
        config.iterations,
    )?;

    let handshake_polls = arm_kernel(device, config)?;
    info!("Kernel armed after {handshake_polls} status polls");

    let output = layout.output(&buffer)?;
    let output_before = buffer.bytes(output)?.to_vec();

    let report = benchmark.run(&mut device.engine, &mut buffer, log)?;

    let output_after = buffer.bytes(output)?.to_vec();
    Ok(RunSummary {
        report,
        handshake_polls,
        output_before,
        output_after,
    })
}

/// Open the configured device and run, writing the configured result log
///
/// # Errors
///
/// See [`open_device`] and [`run_on`]; also I/O errors creating the log.
pub fn run(config: &BenchConfig) -> Result<RunSummary> {
    config.validate()?;
    let mut device = open_device(config)?;
    let mut log = ResultLog::create(&config.output_path)?;
    let summary = run_validated(&mut device, config, &mut log)?;
    log.finish()?;
    info!(
        "Wrote {} results to {}",
        summary.report.samples.len(),
        config.output_path.display()
    );
    Ok(summary)
}
