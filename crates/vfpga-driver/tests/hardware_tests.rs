//! Region device tests
//!
//! Need a programmed vFPGA region at the default device node.

use std::path::Path;
use vfpga_driver::backends::open_region;
use vfpga_driver::prelude::*;
use vfpga_driver::{BackendSelection, BackendType};

#[test]
#[ignore] // Requires hardware
fn test_kernel_handshake_on_device() {
    let (regs, _link) = open_region(Path::new("/dev/fpga_0_v0")).expect("region device");
    let mut csr = ControlRegisters::new(regs, 0);
    let mut hs = KernelHandshake::new();
    let polls = hs
        .run(&mut csr, 1, 0x8110, &WaitPolicy::default())
        .expect("kernel done");
    println!("Kernel done after {polls} status polls");
}

#[test]
#[ignore] // Requires hardware
fn test_sync_benchmark_on_device() {
    let config = BenchConfig::default()
        .with_mode(BenchMode::Sync)
        .with_runs(10, 100)
        .with_backend(BackendSelection::Mmio)
        .with_output(std::env::temp_dir().join("vfpga-hw-results.txt"));

    let device = vfpga_driver::open_device(&config).expect("region device");
    assert_eq!(device.backend_type(), BackendType::Mmio);
    drop(device);

    let summary = vfpga_driver::harness::run(&config).expect("benchmark");
    let stats = summary.report.stats().expect("completed batches");
    println!("p50 {} ns, p99 {} ns", stats.p50, stats.p99);
}
