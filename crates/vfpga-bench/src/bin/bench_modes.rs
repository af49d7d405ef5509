//! Mode comparison: sync vs async vs transfer on the same kernel.
//!
//! Runs every mode back to back with the same shape and prints one row per
//! mode. Result logs go to `results_<mode>.txt` in the working directory.
//!
//! Usage:
//!   cargo run --release --bin bench_modes
//!   cargo run --release --bin bench_modes -- --batches 50 --iterations 1000 --backend sw

use anyhow::Result;
use std::str::FromStr;
use tracing_subscriber::EnvFilter;
use vfpga_driver::{BackendSelection, BenchConfig, BenchMode};

const DEFAULT_BATCHES: usize = 100;
const DEFAULT_ITERATIONS: usize = 100;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let batches = parse_arg(&args, "--batches", DEFAULT_BATCHES);
    let iterations = parse_arg(&args, "--iterations", DEFAULT_ITERATIONS);
    let backend: BackendSelection = parse_arg(&args, "--backend", BackendSelection::Auto);

    println!("vFPGA mode comparison");
    println!("=====================");
    println!("Batches : {batches} x {iterations} invocations");
    println!();
    println!(
        "  {:>9}  {:>12}  {:>12}  {:>12}  {:>12}  {:>8}",
        "mode", "ns/invoke", "p50 batch", "p99 batch", "invoke/s", "aborted"
    );

    for mode in BenchMode::ALL {
        let config = BenchConfig::default()
            .with_mode(mode)
            .with_runs(batches, iterations)
            .with_backend(backend)
            .with_output(format!("results_{mode}.txt"));

        let summary = vfpga_driver::harness::run(&config)?;
        let report = &summary.report;
        match (report.stats(), report.per_invocation_ns()) {
            (Some(stats), Some(per)) => println!(
                "  {:>9}  {:>12.0}  {:>12}  {:>12}  {:>12.0}  {:>8}",
                mode,
                per,
                stats.p50,
                stats.p99,
                1e9 / per,
                report.aborted()
            ),
            _ => println!("  {mode:>9}  every batch aborted"),
        }
    }

    Ok(())
}

fn parse_arg<T: FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
