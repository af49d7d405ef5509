//! Kernel control registers and the start handshake
//!
//! Registers are 64 bits wide. A byte offset `o` relative to the kernel base
//! `b` addresses register index `(b + o) / 8`; backends only ever see indices.
//!
//! # Handshake
//!
//! ```text
//!   Idle ──start()──▶ Started ──wait_done()──▶ Done
//!    ▲                                          │
//!    └──────────────────reset()─────────────────┘
//! ```
//!
//! `start` writes the batch size, then the mode word, then the start bit.
//! `wait_done` polls the status register until the done bit is raised.

use crate::error::{Result, VfpgaError};
use crate::wait::{millis, poll_until, PollOutcome, WaitPolicy};
use std::fmt::Debug;
use vfpga_chip::regs;

/// Raw access to a bank of 64-bit registers by index
pub trait RegisterAccess: Debug + Send {
    /// Read register `index`
    fn read_reg(&self, index: u64) -> u64;

    /// Write `value` to register `index`
    fn write_reg(&mut self, index: u64, value: u64);

    /// Whether `index` addresses a register of this bank
    fn contains(&self, index: u64) -> bool {
        let _ = index;
        true
    }
}

impl<R: RegisterAccess + ?Sized> RegisterAccess for Box<R> {
    fn read_reg(&self, index: u64) -> u64 {
        (**self).read_reg(index)
    }

    fn write_reg(&mut self, index: u64, value: u64) {
        (**self).write_reg(index, value);
    }

    fn contains(&self, index: u64) -> bool {
        (**self).contains(index)
    }
}

/// Byte-offset view of a register bank relative to a kernel base
#[derive(Debug)]
pub struct ControlRegisters<R> {
    regs: R,
    base: u64,
}

impl<R: RegisterAccess> ControlRegisters<R> {
    /// Wrap `regs`, addressing relative to byte offset `base`
    pub const fn new(regs: R, base: u64) -> Self {
        Self { regs, base }
    }

    /// Kernel base byte offset
    pub const fn base(&self) -> u64 {
        self.base
    }

    /// Underlying register bank
    pub const fn inner(&self) -> &R {
        &self.regs
    }

    /// Underlying register bank, mutable
    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    /// Unwrap the register bank
    pub fn into_inner(self) -> R {
        self.regs
    }

    /// Register index addressed by `byte_offset`
    ///
    /// # Errors
    ///
    /// Returns [`VfpgaError::Misaligned`] if `base + byte_offset` is not a
    /// multiple of 8, or [`VfpgaError::RegisterOutOfRange`] if the index is
    /// past the end of the register bank.
    pub fn index(&self, byte_offset: u64) -> Result<u64> {
        let index = regs::reg_index(self.base, byte_offset).ok_or(VfpgaError::Misaligned {
            base: self.base,
            offset: byte_offset,
        })?;
        if !self.regs.contains(index) {
            return Err(VfpgaError::RegisterOutOfRange {
                base: self.base,
                offset: byte_offset,
            });
        }
        Ok(index)
    }

    /// Store `value` at `byte_offset`
    ///
    /// # Errors
    ///
    /// Returns [`VfpgaError::Misaligned`] for an unaligned offset or
    /// [`VfpgaError::RegisterOutOfRange`] for one past the bank.
    pub fn write(&mut self, value: u64, byte_offset: u64) -> Result<()> {
        let index = self.index(byte_offset)?;
        tracing::trace!("csr[{index}] <- {value:#x}");
        self.regs.write_reg(index, value);
        Ok(())
    }

    /// Load the register at `byte_offset`
    ///
    /// # Errors
    ///
    /// Returns [`VfpgaError::Misaligned`] for an unaligned offset or
    /// [`VfpgaError::RegisterOutOfRange`] for one past the bank.
    pub fn read(&self, byte_offset: u64) -> Result<u64> {
        let index = self.index(byte_offset)?;
        Ok(self.regs.read_reg(index))
    }
}

/// Handshake state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeState {
    /// Kernel not armed
    #[default]
    Idle,
    /// Start bit written, done not yet observed
    Started,
    /// Kernel reported done
    Done,
}

/// Kernel start handshake
#[derive(Debug, Default)]
pub struct KernelHandshake {
    state: HandshakeState,
    polls: u64,
}

impl KernelHandshake {
    /// New handshake in [`HandshakeState::Idle`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state
    pub const fn state(&self) -> HandshakeState {
        self.state
    }

    /// Status reads performed by the last successful [`Self::wait_done`]
    pub const fn polls(&self) -> u64 {
        self.polls
    }

    /// Configure and arm the kernel
    ///
    /// # Errors
    ///
    /// Returns [`VfpgaError::InvalidState`] unless idle, or a register
    /// addressing error.
    pub fn start<R: RegisterAccess>(
        &mut self,
        csr: &mut ControlRegisters<R>,
        batch_size: u64,
        mode: u64,
    ) -> Result<()> {
        if self.state != HandshakeState::Idle {
            return Err(VfpgaError::invalid_state(format!(
                "kernel start requested while {:?}",
                self.state
            )));
        }
        csr.write(batch_size, regs::BATCH_SIZE)?;
        csr.write(mode, regs::CONFIG)?;
        csr.write(regs::status::START, regs::STATUS)?;
        self.state = HandshakeState::Started;
        tracing::info!("Kernel started: batch_size={batch_size}, mode={mode:#x}");
        Ok(())
    }

    /// Poll the status register until the done bit is set
    ///
    /// Returns the number of status reads made. On timeout the handshake
    /// stays in [`HandshakeState::Started`] so the wait may be retried.
    ///
    /// # Errors
    ///
    /// Returns [`VfpgaError::InvalidState`] unless started, or
    /// [`VfpgaError::HandshakeTimeout`] once `policy` is exhausted.
    pub fn wait_done<R: RegisterAccess>(
        &mut self,
        csr: &ControlRegisters<R>,
        policy: &WaitPolicy,
    ) -> Result<u64> {
        if self.state != HandshakeState::Started {
            return Err(VfpgaError::invalid_state(format!(
                "waiting for kernel done while {:?}",
                self.state
            )));
        }
        let status = csr.index(regs::STATUS)?;
        match poll_until(policy, || csr.inner().read_reg(status) & regs::status::DONE != 0) {
            PollOutcome::Done { polls } => {
                self.state = HandshakeState::Done;
                self.polls = polls;
                tracing::debug!("Kernel done after {polls} status polls");
                Ok(polls)
            }
            PollOutcome::Expired { polls, elapsed } => {
                tracing::warn!("Kernel done bit not raised after {polls} polls");
                Err(VfpgaError::HandshakeTimeout {
                    polls,
                    elapsed_ms: millis(elapsed),
                })
            }
        }
    }

    /// `start` followed by `wait_done`
    ///
    /// # Errors
    ///
    /// See [`Self::start`] and [`Self::wait_done`].
    pub fn run<R: RegisterAccess>(
        &mut self,
        csr: &mut ControlRegisters<R>,
        batch_size: u64,
        mode: u64,
        policy: &WaitPolicy,
    ) -> Result<u64> {
        self.start(csr, batch_size, mode)?;
        self.wait_done(csr, policy)
    }

    /// Return to [`HandshakeState::Idle`] so the kernel can be re-armed
    pub fn reset(&mut self) {
        self.state = HandshakeState::Idle;
        self.polls = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SoftwareRegisters;

    #[test]
    fn byte_offsets_address_index_over_eight() {
        let mut csr = ControlRegisters::new(SoftwareRegisters::new(), 0);
        csr.write(0xAB, 0x18).unwrap();
        assert_eq!(csr.inner().peek(3), 0xAB);
        assert_eq!(csr.read(0x18).unwrap(), 0xAB);
    }

    #[test]
    fn base_is_added_before_dividing() {
        let mut csr = ControlRegisters::new(SoftwareRegisters::new(), 0x40);
        csr.write(7, 0x10).unwrap();
        assert_eq!(csr.inner().peek((0x40 + 0x10) / 8), 7);
        assert_eq!(csr.inner().peek(0x10 / 8), 0);
    }

    #[test]
    fn unaligned_offset_rejected() {
        let mut csr = ControlRegisters::new(SoftwareRegisters::new(), 0);
        assert!(matches!(
            csr.write(1, 0x4),
            Err(VfpgaError::Misaligned { offset: 4, .. })
        ));
        assert!(csr.read(0x9).is_err());
    }

    #[test]
    fn start_programs_parameters_then_start_bit() {
        let mut csr = ControlRegisters::new(SoftwareRegisters::new(), 0);
        let mut hs = KernelHandshake::new();
        hs.start(&mut csr, 1, regs::DEFAULT_MODE).unwrap();
        assert_eq!(hs.state(), HandshakeState::Started);
        assert_eq!(
            csr.inner().write_log(),
            &[(2, 1), (3, regs::DEFAULT_MODE), (0, regs::status::START)]
        );
    }

    #[test]
    fn done_after_exactly_five_polls() {
        let mut csr = ControlRegisters::new(SoftwareRegisters::new().done_after(5), 0);
        let mut hs = KernelHandshake::new();
        let polls = hs
            .run(&mut csr, 1, regs::DEFAULT_MODE, &WaitPolicy::polls(1_000))
            .unwrap();
        assert_eq!(polls, 5);
        assert_eq!(csr.inner().status_reads(), 5);
        assert_eq!(hs.state(), HandshakeState::Done);
    }

    #[test]
    fn stuck_kernel_times_out() {
        let mut csr = ControlRegisters::new(SoftwareRegisters::new().never_done(), 0);
        let mut hs = KernelHandshake::new();
        let err = hs
            .run(&mut csr, 1, regs::DEFAULT_MODE, &WaitPolicy::polls(50))
            .unwrap_err();
        assert!(matches!(err, VfpgaError::HandshakeTimeout { polls: 50, .. }));
        assert!(err.is_timeout());
        assert_eq!(hs.state(), HandshakeState::Started);
    }

    #[test]
    fn out_of_order_transitions_rejected() {
        let mut csr = ControlRegisters::new(SoftwareRegisters::new(), 0);
        let mut hs = KernelHandshake::new();
        assert!(hs.wait_done(&csr, &WaitPolicy::polls(1)).is_err());
        hs.run(&mut csr, 1, 0, &WaitPolicy::polls(10)).unwrap();
        assert!(hs.start(&mut csr, 1, 0).is_err());
        hs.reset();
        assert_eq!(hs.state(), HandshakeState::Idle);
        assert!(hs.start(&mut csr, 1, 0).is_ok());
    }
}
