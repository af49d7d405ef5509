// SPDX-License-Identifier: AGPL-3.0-only

//! Software (virtual vFPGA) backend
//!
//! Stands in for the card so the harness, its tests and CI run without
//! hardware:
//!
//! - [`SoftwareRegisters`] is a sparse register file with a kernel that
//!   raises the done bit a fixed number of status reads after being started
//!   (or never, to exercise timeouts).
//! - [`SoftwareLink`] executes descriptors against card memory and
//!   per-destination kernel streams, keeps completion counters, and can add
//!   a latency floor per descriptor, delay when completions become visible,
//!   or drop chosen descriptors entirely. Resetting every completion
//!   counter also drains the output FIFOs.
//!
//! ## Data path
//!
//! ```text
//! READ  (memory)  host region ──▶ card memory at the same offset
//! READ  (stream)  host region ──▶ kernel[dest] ──▶ output FIFO[dest]
//! WRITE (memory)  card memory ──▶ host region
//! WRITE (stream)  output FIFO[dest] ──▶ host region
//! TRANSFER        src ──▶ kernel[dest] ──▶ FIFO[dest] ──▶ dst
//! ```

use crate::backend::BackendType;
use crate::buffer::HostBuffer;
use crate::csr::RegisterAccess;
use crate::descriptor::{Endpoint, Invoke, Oper, Single};
use crate::engine::Link;
use crate::error::Result;
use bytes::{Buf, BytesMut};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::{Duration, Instant};
use tracing::debug;
use vfpga_chip::ctrl::MAX_DEST;
use vfpga_chip::regs;

// ── Register file ─────────────────────────────────────────────────────────────

/// Software register file with an emulated kernel start/done handshake
#[derive(Debug)]
pub struct SoftwareRegisters {
    regs: BTreeMap<u64, u64>,
    status_index: u64,
    done_after: Option<u64>,
    armed: bool,
    status_reads: Cell<u64>,
    writes: Vec<(u64, u64)>,
}

impl Default for SoftwareRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareRegisters {
    /// Register file whose kernel reports done on the first status read
    pub fn new() -> Self {
        Self {
            regs: BTreeMap::new(),
            status_index: regs::KERNEL_CTRL_OFFSET / regs::REG_BYTES,
            done_after: Some(1),
            armed: false,
            status_reads: Cell::new(0),
            writes: Vec::new(),
        }
    }

    /// Place the kernel's control block at byte offset `base`
    #[must_use]
    pub fn with_base(mut self, base: u64) -> Self {
        self.status_index = (base + regs::STATUS) / regs::REG_BYTES;
        self
    }

    /// Raise done on the `polls`-th status read after a start
    #[must_use]
    pub fn done_after(mut self, polls: u64) -> Self {
        self.done_after = Some(polls.max(1));
        self
    }

    /// Never raise done
    #[must_use]
    pub fn never_done(mut self) -> Self {
        self.done_after = None;
        self
    }

    /// Stored value of `index`, without kernel side effects
    pub fn peek(&self, index: u64) -> u64 {
        self.regs.get(&index).copied().unwrap_or(0)
    }

    /// Status reads since the last start
    pub fn status_reads(&self) -> u64 {
        self.status_reads.get()
    }

    /// Every write in order, as `(index, value)`
    pub fn write_log(&self) -> &[(u64, u64)] {
        &self.writes
    }
}

impl RegisterAccess for SoftwareRegisters {
    fn read_reg(&self, index: u64) -> u64 {
        let value = self.peek(index);
        if index != self.status_index || !self.armed {
            return value;
        }
        let reads = self.status_reads.get() + 1;
        self.status_reads.set(reads);
        match self.done_after {
            Some(n) if reads >= n => value | regs::status::DONE,
            _ => value & !regs::status::DONE,
        }
    }

    fn write_reg(&mut self, index: u64, value: u64) {
        self.writes.push((index, value));
        self.regs.insert(index, value);
        if index == self.status_index && value & regs::status::START != 0 {
            self.armed = true;
            self.status_reads.set(0);
        }
    }
}

// ── Kernel model ──────────────────────────────────────────────────────────────

/// Computation attached to a card stream
pub trait StreamKernel: Debug + Send {
    /// Consume `input` and append whatever output it produces to `out`
    fn process(&mut self, input: &[u8], out: &mut BytesMut);
}

/// Binary classifier stand-in: one output byte per `input_size` input bytes,
/// `1` when more than half of the input bits are set.
///
/// Partial inputs are carried over to the next call.
#[derive(Debug)]
pub struct MajorityKernel {
    input_size: usize,
    pending: BytesMut,
}

impl MajorityKernel {
    /// Kernel classifying inputs of `input_size` bytes
    pub fn new(input_size: usize) -> Self {
        Self {
            input_size: input_size.max(1),
            pending: BytesMut::new(),
        }
    }
}

impl StreamKernel for MajorityKernel {
    fn process(&mut self, input: &[u8], out: &mut BytesMut) {
        self.pending.extend_from_slice(input);
        while self.pending.len() >= self.input_size {
            let sample = self.pending.split_to(self.input_size);
            let ones: u32 = sample.iter().map(|b| b.count_ones()).sum();
            let bits = u32::try_from(self.input_size * 8).unwrap_or(u32::MAX);
            out.extend_from_slice(&[u8::from(ones * 2 > bits)]);
        }
    }
}

// ── Link ──────────────────────────────────────────────────────────────────────

const STREAMS: usize = MAX_DEST as usize + 1;

/// Software link executing descriptors in-process
#[derive(Debug)]
pub struct SoftwareLink {
    card_mem: Vec<u8>,
    kernels: Vec<Box<dyn StreamKernel>>,
    fifos: Vec<BytesMut>,
    posted: [u32; 3],
    visible: Cell<[u32; 3]>,
    lag: u32,
    countdown: Cell<u32>,
    op_latency: Duration,
    drop_posts: Vec<u64>,
    total_posts: u64,
    streamed: u64,
}

impl Default for SoftwareLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareLink {
    /// Link with 16-byte majority kernels on every stream, instant
    /// completion and no latency floor
    pub fn new() -> Self {
        Self::with_kernels(|| Box::new(MajorityKernel::new(16)))
    }

    /// Link with a kernel built by `make` on every stream
    pub fn with_kernels(mut make: impl FnMut() -> Box<dyn StreamKernel>) -> Self {
        Self {
            card_mem: Vec::new(),
            kernels: (0..STREAMS).map(|_| make()).collect(),
            fifos: (0..STREAMS).map(|_| BytesMut::new()).collect(),
            posted: [0; 3],
            visible: Cell::new([0; 3]),
            lag: 0,
            countdown: Cell::new(0),
            op_latency: Duration::ZERO,
            drop_posts: Vec::new(),
            total_posts: 0,
            streamed: 0,
        }
    }

    /// Spin for at least `latency` inside every post
    #[must_use]
    pub fn with_op_latency(mut self, latency: Duration) -> Self {
        self.op_latency = latency;
        self
    }

    /// Make completions visible only after `reads` counter reads
    #[must_use]
    pub fn with_completion_lag(mut self, reads: u32) -> Self {
        self.lag = reads;
        self
    }

    /// Never complete the given posts (1-based, counted over the link's life)
    #[must_use]
    pub fn dropping(mut self, posts: &[u64]) -> Self {
        self.drop_posts = posts.to_vec();
        self
    }

    /// Per-descriptor latency floor
    pub const fn op_latency(&self) -> Duration {
        self.op_latency
    }

    /// Descriptors posted over the link's life
    pub const fn total_posts(&self) -> u64 {
        self.total_posts
    }

    /// Bytes fed into kernel streams over the link's life
    pub const fn streamed_bytes(&self) -> u64 {
        self.streamed
    }

    /// Card memory contents
    pub fn card_memory(&self) -> &[u8] {
        &self.card_mem
    }

    /// Bytes waiting in the output FIFO of `dest`
    pub fn pending_output(&self, dest: u8) -> usize {
        self.fifos.get(usize::from(dest)).map_or(0, BytesMut::len)
    }

    fn card_slice(&mut self, offset: usize, len: usize) -> &mut [u8] {
        let end = offset + len;
        if self.card_mem.len() < end {
            self.card_mem.resize(end, 0);
        }
        &mut self.card_mem[offset..end]
    }

    fn stream_in(&mut self, dest: u8, data: &[u8]) {
        self.streamed += data.len() as u64;
        let i = usize::from(dest);
        self.kernels[i].process(data, &mut self.fifos[i]);
    }

    fn stream_out(&mut self, dest: u8, out: &mut [u8]) -> usize {
        let fifo = &mut self.fifos[usize::from(dest)];
        let n = fifo.len().min(out.len());
        fifo.copy_to_slice(&mut out[..n]);
        n
    }

    fn execute(&mut self, buffer: &mut HostBuffer, invoke: &Invoke) -> Result<()> {
        match invoke {
            Invoke::Read(Single {
                region,
                endpoint,
                flags,
            }) => {
                let data = buffer.bytes(*region)?;
                match endpoint {
                    Endpoint::Memory => self
                        .card_slice(region.offset(), region.len())
                        .copy_from_slice(data),
                    Endpoint::Stream => self.stream_in(flags.dest, data),
                }
            }
            Invoke::Write(Single {
                region,
                endpoint,
                flags,
            }) => match endpoint {
                Endpoint::Memory => {
                    let out = buffer.bytes_mut(*region)?;
                    out.copy_from_slice(self.card_slice(region.offset(), region.len()));
                }
                Endpoint::Stream => {
                    let out = buffer.bytes_mut(*region)?;
                    let n = self.stream_out(flags.dest, out);
                    if n < region.len() {
                        debug!("stream {} short by {} bytes", flags.dest, region.len() - n);
                    }
                }
            },
            Invoke::Transfer(p) => {
                let data = buffer.bytes(p.src)?.to_vec();
                self.stream_in(p.flags.dest, &data);
                let out = buffer.bytes_mut(p.dst)?;
                self.stream_out(p.flags.dest, out);
            }
        }
        Ok(())
    }
}

impl Link for SoftwareLink {
    fn post(&mut self, buffer: &mut HostBuffer, invoke: &Invoke) -> Result<()> {
        let start = Instant::now();
        self.total_posts += 1;
        self.execute(buffer, invoke)?;

        if self.drop_posts.contains(&self.total_posts) {
            debug!("dropping post #{} ({})", self.total_posts, invoke.oper());
        } else {
            let slot = &mut self.posted[invoke.oper().index()];
            *slot = slot.saturating_add(1);
            self.countdown.set(self.lag);
        }

        while start.elapsed() < self.op_latency {
            std::hint::spin_loop();
        }
        Ok(())
    }

    fn completions(&self, oper: Oper) -> u32 {
        let mut visible = self.visible.get();
        if visible != self.posted {
            let left = self.countdown.get();
            if left == 0 {
                visible = self.posted;
                self.visible.set(visible);
            } else {
                self.countdown.set(left - 1);
            }
        }
        visible[oper.index()]
    }

    fn reset_completions(&mut self, oper: Option<Oper>) {
        let mut visible = self.visible.get();
        match oper {
            Some(o) => {
                self.posted[o.index()] = 0;
                visible[o.index()] = 0;
            }
            None => {
                self.posted = [0; 3];
                visible = [0; 3];
                for fifo in &mut self.fifos {
                    fifo.clear();
                }
            }
        }
        self.visible.set(visible);
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Software
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::InvokeFlags;
    use vfpga_chip::page::AllocClass;

    fn buffer() -> HostBuffer {
        HostBuffer::allocate(AllocClass::Reg4K, 1).unwrap()
    }

    #[test]
    fn kernel_classifies_full_inputs_only() {
        let mut k = MajorityKernel::new(4);
        let mut out = BytesMut::new();
        k.process(&[0xFF, 0xFF, 0xFF], &mut out);
        assert!(out.is_empty());
        k.process(&[0xFF, 0x00, 0x00, 0x00, 0x01], &mut out);
        assert_eq!(&out[..], &[1, 0]);
    }

    #[test]
    fn memory_read_then_write_round_trips_through_card() {
        let mut link = SoftwareLink::new();
        let mut buf = buffer();
        let r = buf.region(32, 8).unwrap();
        buf.bytes_mut(r).unwrap().copy_from_slice(b"vfpga-rw");
        link.post(&mut buf, &Invoke::read(r)).unwrap();
        buf.bytes_mut(r).unwrap().fill(0);
        link.post(&mut buf, &Invoke::write(r)).unwrap();
        assert_eq!(buf.bytes(r).unwrap(), b"vfpga-rw");
        assert_eq!(link.completions(Oper::Read), 1);
        assert_eq!(link.completions(Oper::Write), 1);
    }

    #[test]
    fn streamed_input_produces_output_byte() {
        let mut link = SoftwareLink::new();
        let mut buf = buffer();
        let input = buf.region(0, 16).unwrap();
        let output = buf.region(16, 1).unwrap();
        buf.bytes_mut(input).unwrap().fill(0xFF);
        link.post(&mut buf, &Invoke::read(input).streaming()).unwrap();
        assert_eq!(link.pending_output(0), 1);
        link.post(&mut buf, &Invoke::write(output).streaming()).unwrap();
        assert_eq!(buf.bytes(output).unwrap(), &[1]);
        assert_eq!(link.pending_output(0), 0);
    }

    #[test]
    fn full_reset_drains_unread_stream_output() {
        let mut link = SoftwareLink::new();
        let mut buf = buffer();
        let input = buf.region(0, 16).unwrap();
        for _ in 0..10 {
            link.post(&mut buf, &Invoke::read(input).streaming()).unwrap();
        }
        assert_eq!(link.pending_output(0), 10);
        link.reset_completions(Some(Oper::Read));
        assert_eq!(link.pending_output(0), 10);
        link.reset_completions(None);
        assert_eq!(link.pending_output(0), 0);
        assert_eq!(link.streamed_bytes(), 160);
    }

    #[test]
    fn transfer_lands_kernel_output_in_destination() {
        let mut link = SoftwareLink::new();
        let mut buf = buffer();
        let src = buf.region(0, 32).unwrap();
        let dst = buf.region(32, 2).unwrap();
        buf.bytes_mut(src).unwrap()[..16].fill(0xFF);
        link.post(&mut buf, &Invoke::transfer(src, dst)).unwrap();
        assert_eq!(buf.bytes(dst).unwrap(), &[1, 0]);
        assert_eq!(link.completions(Oper::Transfer), 1);
    }

    #[test]
    fn streams_are_separated_by_destination() {
        let mut link = SoftwareLink::new();
        let mut buf = buffer();
        let input = buf.region(0, 16).unwrap();
        let d = Invoke::read(input)
            .streaming()
            .with_flags(InvokeFlags::default().with_dest(3));
        link.post(&mut buf, &d).unwrap();
        assert_eq!(link.pending_output(3), 1);
        assert_eq!(link.pending_output(0), 0);
    }

    #[test]
    fn dropped_post_never_completes() {
        let mut link = SoftwareLink::new().dropping(&[2]);
        let mut buf = buffer();
        let d = Invoke::read(buf.region(0, 1).unwrap());
        link.post(&mut buf, &d).unwrap();
        link.post(&mut buf, &d).unwrap();
        assert_eq!(link.completions(Oper::Read), 1);
        assert_eq!(link.total_posts(), 2);
    }

    #[test]
    fn latency_floor_is_honoured() {
        let mut link = SoftwareLink::new().with_op_latency(Duration::from_micros(200));
        let mut buf = buffer();
        let d = Invoke::read(buf.region(0, 1).unwrap());
        let t0 = Instant::now();
        link.post(&mut buf, &d).unwrap();
        assert!(t0.elapsed() >= Duration::from_micros(200));
    }

    #[test]
    fn reset_of_one_kind_keeps_others() {
        let mut link = SoftwareLink::new();
        let mut buf = buffer();
        let r = buf.region(0, 1).unwrap();
        link.post(&mut buf, &Invoke::read(r)).unwrap();
        link.post(&mut buf, &Invoke::write(r)).unwrap();
        link.reset_completions(Some(Oper::Read));
        assert_eq!(link.completions(Oper::Read), 0);
        assert_eq!(link.completions(Oper::Write), 1);
        link.reset_completions(None);
        assert_eq!(link.completions(Oper::Write), 0);
    }

    #[test]
    fn registers_record_writes_in_order() {
        let mut file = SoftwareRegisters::new();
        file.write_reg(2, 1);
        file.write_reg(3, 0x8110);
        assert_eq!(file.write_log(), &[(2, 1), (3, 0x8110)]);
        assert_eq!(file.peek(3), 0x8110);
    }

    #[test]
    fn status_done_only_after_start() {
        let mut file = SoftwareRegisters::new().done_after(2);
        assert_eq!(file.read_reg(0) & regs::status::DONE, 0);
        assert_eq!(file.status_reads(), 0);
        file.write_reg(0, regs::status::START);
        assert_eq!(file.read_reg(0) & regs::status::DONE, 0);
        assert_ne!(file.read_reg(0) & regs::status::DONE, 0);
    }

    #[test]
    fn relocated_kernel_base_moves_status() {
        let mut file = SoftwareRegisters::new().with_base(0x100);
        file.write_reg(0x100 / 8, regs::status::START);
        assert_ne!(file.read_reg(0x100 / 8) & regs::status::DONE, 0);
    }
}
