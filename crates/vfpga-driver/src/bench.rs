//! Benchmark loop
//!
//! A run is `batches` timed batches of `iterations` invocations each. The
//! descriptors are built once, up front, from the buffer layout; every
//! batch then only posts them. Each batch yields one [`LatencySample`]:
//! the wall-clock time of all its iterations, measured before completion
//! counters are cleared.
//!
//! | Mode | One iteration |
//! |------|---------------|
//! | `sync` | blocking READ of the input, blocking WRITE of the output |
//! | `async` | detached streaming READ of the input, blocking WRITE of the output |
//! | `transfer` | detached TRANSFER input to output, then wait for it |
//!
//! A batch cut short by a bounded wait is recorded as aborted and the run
//! moves on to the next batch. Any other error ends the run.

use crate::buffer::{BufferLayout, HostBuffer};
use crate::config::BenchConfig;
use crate::descriptor::{Invoke, InvokeFlags, Oper};
use crate::engine::{InvocationEngine, Link};
use crate::error::{Result, VfpgaError};
use crate::results::ResultLog;
use std::io::Write;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Invocation pattern, chosen once per run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BenchMode {
    /// Read then write, each awaited
    Sync,
    /// Read detached through the stream endpoint, write awaited
    #[default]
    Async,
    /// One detached transfer, then a completion wait
    Transfer,
}

impl BenchMode {
    /// All modes, in table order
    pub const ALL: [Self; 3] = [Self::Sync, Self::Async, Self::Transfer];
}

impl std::fmt::Display for BenchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async => write!(f, "async"),
            Self::Transfer => write!(f, "transfer"),
        }
    }
}

impl FromStr for BenchMode {
    type Err = VfpgaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            "transfer" => Ok(Self::Transfer),
            other => Err(VfpgaError::config(format!(
                "unknown mode '{other}' (expected sync, async or transfer)"
            ))),
        }
    }
}

/// Outcome of one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LatencySample {
    /// Batch ran to the end
    Completed {
        /// Wall-clock time of the batch
        elapsed_ns: u64,
    },
    /// A bounded wait gave up mid-batch
    Aborted {
        /// Error that ended the batch
        reason: String,
    },
}

impl LatencySample {
    /// Elapsed nanoseconds of a completed batch
    pub const fn elapsed_ns(&self) -> Option<u64> {
        match self {
            Self::Completed { elapsed_ns } => Some(*elapsed_ns),
            Self::Aborted { .. } => None,
        }
    }

    /// Whether the batch was aborted
    pub const fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }
}

#[derive(Debug, Clone)]
enum Step {
    Pair { read: Invoke, write: Invoke },
    Transfer(Invoke),
}

/// Prebuilt descriptors plus the run shape
#[derive(Debug, Clone)]
pub struct Benchmark {
    mode: BenchMode,
    batches: usize,
    iterations: usize,
    step: Step,
}

impl Benchmark {
    /// Build the descriptors for `mode` over `layout` in `buffer`
    ///
    /// # Errors
    ///
    /// Returns a bounds error if the layout does not fit the buffer.
    pub fn new(
        mode: BenchMode,
        layout: &BufferLayout,
        buffer: &HostBuffer,
        batches: usize,
        iterations: usize,
    ) -> Result<Self> {
        let input = layout.input(buffer)?;
        let output = layout.output(buffer)?;

        let step = match mode {
            BenchMode::Sync => Step::Pair {
                read: Invoke::read(input),
                write: Invoke::write(output),
            },
            BenchMode::Async => Step::Pair {
                read: Invoke::read(input)
                    .streaming()
                    .with_flags(InvokeFlags::detached()),
                write: Invoke::write(output),
            },
            BenchMode::Transfer => {
                Step::Transfer(Invoke::transfer(input, output).with_flags(InvokeFlags::detached()))
            }
        };

        Ok(Self {
            mode,
            batches,
            iterations,
            step,
        })
    }

    /// Build from a validated configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration or bounds error.
    pub fn from_config(config: &BenchConfig, buffer: &HostBuffer) -> Result<Self> {
        config.validate()?;
        Self::new(
            config.mode,
            &config.layout(),
            buffer,
            config.batches,
            config.iterations,
        )
    }

    /// Mode this benchmark runs
    pub const fn mode(&self) -> BenchMode {
        self.mode
    }

    /// Timed batches per run
    pub const fn batches(&self) -> usize {
        self.batches
    }

    /// Invocations per batch
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    fn iterate<L: Link>(
        &self,
        engine: &mut InvocationEngine<L>,
        buffer: &mut HostBuffer,
    ) -> Result<()> {
        match &self.step {
            Step::Pair { read, write } => {
                engine.invoke(buffer, read)?;
                engine.invoke(buffer, write)
            }
            Step::Transfer(transfer) => {
                engine.invoke(buffer, transfer)?;
                engine.wait_completed(Oper::Transfer).map(|_| ())
            }
        }
    }

    /// Time one batch of `iterations` invocations
    ///
    /// Completions are cleared after the end timestamp, whether or not the
    /// batch finished.
    ///
    /// # Errors
    ///
    /// Returns the first error of the batch.
    pub fn run_batch<L: Link>(
        &self,
        engine: &mut InvocationEngine<L>,
        buffer: &mut HostBuffer,
    ) -> Result<Duration> {
        let start = Instant::now();
        let outcome = (0..self.iterations).try_for_each(|_| self.iterate(engine, buffer));
        let elapsed = start.elapsed();
        engine.clear_completed();
        outcome.map(|()| elapsed)
    }

    /// Run every batch, logging one sample each
    ///
    /// # Errors
    ///
    /// Returns non-timeout errors from the engine and I/O errors from the
    /// log. Timeouts only abort the current batch.
    pub fn run<L: Link, W: Write>(
        &self,
        engine: &mut InvocationEngine<L>,
        buffer: &mut HostBuffer,
        log: &mut ResultLog<W>,
    ) -> Result<BenchReport> {
        info!(
            "Running {} batches x {} {} iterations on {}",
            self.batches,
            self.iterations,
            self.mode,
            engine.link().backend_type()
        );

        let mut samples = Vec::with_capacity(self.batches);
        for batch in 0..self.batches {
            let sample = match self.run_batch(engine, buffer) {
                Ok(elapsed) => LatencySample::Completed {
                    elapsed_ns: u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
                },
                Err(e) if e.is_timeout() => {
                    warn!("Batch {batch} aborted: {e}");
                    LatencySample::Aborted {
                        reason: e.to_string(),
                    }
                }
                Err(e) => return Err(e),
            };
            log.append(&sample)?;
            samples.push(sample);
        }
        log.flush()?;

        let report = BenchReport {
            mode: self.mode,
            iterations: self.iterations,
            samples,
        };
        debug!("{} batches done, {} aborted", report.samples.len(), report.aborted());
        Ok(report)
    }
}

/// Summary of completed batch latencies, in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    /// Fastest batch
    pub min: u64,
    /// Mean batch
    pub mean: f64,
    /// Median batch
    pub p50: u64,
    /// 95th percentile
    pub p95: u64,
    /// 99th percentile
    pub p99: u64,
    /// Slowest batch
    pub max: u64,
}

impl LatencyStats {
    /// Summarize `samples`; `None` if empty
    #[allow(clippy::cast_precision_loss)]
    pub fn from_ns(samples: &[u64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let n = sorted.len();
        let pct = |p: usize| sorted[(n * p / 100).min(n - 1)];
        Some(Self {
            min: sorted[0],
            mean: sorted.iter().map(|&v| v as f64).sum::<f64>() / n as f64,
            p50: pct(50),
            p95: pct(95),
            p99: pct(99),
            max: sorted[n - 1],
        })
    }
}

/// All samples of one run
#[derive(Debug, Clone)]
pub struct BenchReport {
    /// Mode that was run
    pub mode: BenchMode,
    /// Invocations per batch
    pub iterations: usize,
    /// One sample per batch, in order
    pub samples: Vec<LatencySample>,
}

impl BenchReport {
    /// Elapsed nanoseconds of the completed batches
    pub fn completed_ns(&self) -> Vec<u64> {
        self.samples.iter().filter_map(LatencySample::elapsed_ns).collect()
    }

    /// Number of aborted batches
    pub fn aborted(&self) -> usize {
        self.samples.iter().filter(|s| s.is_aborted()).count()
    }

    /// Batch latency summary
    pub fn stats(&self) -> Option<LatencyStats> {
        LatencyStats::from_ns(&self.completed_ns())
    }

    /// Mean nanoseconds per single invocation
    #[allow(clippy::cast_precision_loss)]
    pub fn per_invocation_ns(&self) -> Option<f64> {
        let stats = self.stats()?;
        Some(stats.mean / self.iterations.max(1) as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SoftwareLink;
    use crate::wait::WaitPolicy;
    use vfpga_chip::page::AllocClass;

    fn fixture(
        mode: BenchMode,
        link: SoftwareLink,
    ) -> (Benchmark, InvocationEngine<SoftwareLink>, HostBuffer) {
        let buffer = HostBuffer::allocate(AllocClass::Reg4K, 1).unwrap();
        let bench = Benchmark::new(mode, &BufferLayout::new(1, 16), &buffer, 4, 8).unwrap();
        let engine = InvocationEngine::new(link).with_policy(WaitPolicy::polls(256));
        (bench, engine, buffer)
    }

    #[test]
    fn mode_names_round_trip() {
        for mode in BenchMode::ALL {
            assert_eq!(mode.to_string().parse::<BenchMode>().unwrap(), mode);
        }
        assert!("burst".parse::<BenchMode>().is_err());
    }

    #[test]
    fn every_mode_posts_expected_descriptor_count() {
        let cases = [
            (BenchMode::Sync, 2),
            (BenchMode::Async, 2),
            (BenchMode::Transfer, 1),
        ];
        for (mode, per_iter) in cases {
            let (bench, mut engine, mut buf) = fixture(mode, SoftwareLink::new());
            bench.run_batch(&mut engine, &mut buf).unwrap();
            assert_eq!(engine.posted(), 8 * per_iter, "{mode}");
            for oper in Oper::ALL {
                assert_eq!(engine.expected(oper), 0);
            }
        }
    }

    #[test]
    fn timed_out_batch_logged_as_sentinel() {
        // Post 3 is the read of iteration 2 in the first batch.
        let (bench, mut engine, mut buf) =
            fixture(BenchMode::Sync, SoftwareLink::new().dropping(&[3]));
        let mut log = ResultLog::new(Vec::new());
        let report = bench.run(&mut engine, &mut buf, &mut log).unwrap();

        assert_eq!(report.samples.len(), 4);
        assert!(report.samples[0].is_aborted());
        assert_eq!(report.aborted(), 1);
        assert_eq!(report.completed_ns().len(), 3);

        let text = String::from_utf8(log.finish().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "-1");
        assert!(lines[1..].iter().all(|l| l.parse::<u64>().is_ok()));
    }

    #[test]
    fn percentiles_are_ordered() {
        let ns: Vec<u64> = (1..=100).rev().collect();
        let stats = LatencyStats::from_ns(&ns).unwrap();
        assert_eq!(stats.min, 1);
        assert_eq!(stats.max, 100);
        assert_eq!(stats.p50, 51);
        assert!(stats.p50 <= stats.p95 && stats.p95 <= stats.p99);
        assert!((stats.mean - 50.5).abs() < 1e-9);
        assert!(LatencyStats::from_ns(&[]).is_none());
    }
}
