//! Invocation latency benchmark: one mode, M batches of K invocations.
//!
//! Arms the kernel (batch size, mode word, start bit, wait for done), then
//! times each batch and writes one line per batch to the result log: the
//! elapsed nanoseconds, or `-1` if a completion wait gave up.
//!
//! The output region is printed before and after the run so a stuck
//! kernel (output never changes) is visible at a glance.
//!
//! Usage:
//!   cargo run --release --bin bench_invoke
//!   cargo run --release --bin bench_invoke -- --mode sync --batches 100 --iterations 100
//!   cargo run --release --bin bench_invoke -- --backend sw --output /tmp/results.txt
//!
//! Flags: --mode sync|async|transfer, --batches N, --iterations N,
//! --inputs N, --input-size N, --backend auto|sw|mmio, --device PATH,
//! --output PATH, --hugepages, --timeout-ms N.

use anyhow::Result;
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vfpga_driver::chip::AllocClass;
use vfpga_driver::{BackendSelection, BenchConfig, BenchMode, VfpgaError, WaitPolicy};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let defaults = BenchConfig::default();

    let mode: BenchMode = parse_arg(&args, "--mode", defaults.mode);
    let batches = parse_arg(&args, "--batches", defaults.batches);
    let iterations = parse_arg(&args, "--iterations", defaults.iterations);
    let n_inputs = parse_arg(&args, "--inputs", defaults.n_inputs);
    let input_size = parse_arg(&args, "--input-size", defaults.input_size);
    let backend: BackendSelection = parse_arg(&args, "--backend", defaults.backend);
    let timeout_ms = parse_arg(&args, "--timeout-ms", 1_000u64);
    let class = if args.iter().any(|a| a == "--hugepages") {
        AllocClass::Huge2M
    } else {
        AllocClass::Reg4K
    };

    let policy = WaitPolicy::default().with_timeout(Duration::from_millis(timeout_ms));
    let mut config = defaults
        .with_mode(mode)
        .with_runs(batches, iterations)
        .with_inputs(n_inputs, input_size)
        .with_backend(backend)
        .with_policies(policy, policy);
    config.alloc_class = class;
    if let Some(path) = string_arg(&args, "--device") {
        config = config.with_device_path(path);
    }
    if let Some(path) = string_arg(&args, "--output") {
        config = config.with_output(path);
    }

    println!("vFPGA invocation latency");
    println!("========================");
    println!("Mode        : {mode}");
    println!("Batches     : {batches} x {iterations} invocations");
    println!("Inputs      : {n_inputs} x {input_size} bytes");
    println!("Host buffer : {} pages ({class:?})", class.pages_for(config.max_size));
    println!("Results     : {}", config.output_path.display());
    println!();

    let summary = match vfpga_driver::harness::run(&config) {
        Ok(summary) => summary,
        Err(e @ VfpgaError::AllocationFailed { .. }) => {
            eprintln!("Unable to allocate host memory: {e}");
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    println!("Kernel done after {} status polls", summary.handshake_polls);
    println!("Output before : {:02x?}", summary.output_before);
    println!("Output after  : {:02x?}", summary.output_after);
    println!();

    if let Some(stats) = summary.report.stats() {
        println!("Batch latency ({iterations} invocations)");
        println!("-------------------------------");
        println!("  mean : {:.0} ns", stats.mean);
        println!("  min  : {} ns", stats.min);
        println!("  p50  : {} ns", stats.p50);
        println!("  p99  : {} ns", stats.p99);
        println!("  max  : {} ns", stats.max);
    }
    if let Some(per) = summary.report.per_invocation_ns() {
        println!("  per invocation : {per:.0} ns");
    }
    let aborted = summary.report.aborted();
    if aborted > 0 {
        println!("  aborted batches: {aborted}");
    }

    Ok(())
}

fn parse_arg<T: FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn string_arg(args: &[String], flag: &str) -> Option<String> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].clone())
}
