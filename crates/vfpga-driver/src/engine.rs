//! Invocation engine
//!
//! The engine sits between the benchmark and a [`Link`]. It validates each
//! descriptor against the host buffer, applies the clear-stats and poll
//! flags, and keeps the number of completions it expects per operation kind
//! so that completion can be checked across several detached invocations.
//!
//! A polled invocation returns once the link reports as many completions of
//! that kind as have been posted since the last clear. A detached one
//! returns right after posting; the caller confirms completion later with
//! [`InvocationEngine::check_completed`] or
//! [`InvocationEngine::wait_completed`], or simply drains everything with
//! [`InvocationEngine::clear_completed`].

use crate::backend::BackendType;
use crate::buffer::HostBuffer;
use crate::descriptor::{Invoke, Oper};
use crate::error::{Result, VfpgaError};
use crate::wait::{millis, poll_until, PollOutcome, WaitPolicy};
use std::fmt::Debug;

/// Data-movement side of a device
///
/// Implementations post descriptors to the card and expose the card's
/// per-kind completion counters.
pub trait Link: Debug + Send {
    /// Hand one validated descriptor to the card
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor cannot be posted.
    fn post(&mut self, buffer: &mut HostBuffer, invoke: &Invoke) -> Result<()>;

    /// Completions of `oper` the card reports since the last reset
    fn completions(&self, oper: Oper) -> u32;

    /// Reset the counter of one kind, or all of them for `None`
    fn reset_completions(&mut self, oper: Option<Oper>);

    /// Backend type for logging
    fn backend_type(&self) -> BackendType;
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn post(&mut self, buffer: &mut HostBuffer, invoke: &Invoke) -> Result<()> {
        (**self).post(buffer, invoke)
    }

    fn completions(&self, oper: Oper) -> u32 {
        (**self).completions(oper)
    }

    fn reset_completions(&mut self, oper: Option<Oper>) {
        (**self).reset_completions(oper);
    }

    fn backend_type(&self) -> BackendType {
        (**self).backend_type()
    }
}

/// Issues descriptors and tracks their completion
#[derive(Debug)]
pub struct InvocationEngine<L> {
    link: L,
    expected: [u32; 3],
    policy: WaitPolicy,
    posted: u64,
}

impl<L: Link> InvocationEngine<L> {
    /// Engine over `link` with the default completion wait policy
    pub fn new(link: L) -> Self {
        Self {
            link,
            expected: [0; 3],
            policy: WaitPolicy::default(),
            posted: 0,
        }
    }

    /// Set the policy used by polled invocations and `wait_completed`
    #[must_use]
    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Completion wait policy
    pub const fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    /// Underlying link
    pub const fn link(&self) -> &L {
        &self.link
    }

    /// Underlying link, mutable
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Descriptors posted over the engine's lifetime
    pub const fn posted(&self) -> u64 {
        self.posted
    }

    /// Completions of `oper` expected since the last clear
    pub const fn expected(&self, oper: Oper) -> u32 {
        self.expected[oper.index()]
    }

    /// Completions of `oper` the link currently reports
    pub fn completions(&self, oper: Oper) -> u32 {
        self.link.completions(oper)
    }

    /// Issue one descriptor
    ///
    /// # Errors
    ///
    /// Returns a bounds error for a descriptor that does not fit `buffer`,
    /// any error from the link, or [`VfpgaError::CompletionTimeout`] when a
    /// polled invocation is not acknowledged within the policy.
    pub fn invoke(&mut self, buffer: &mut HostBuffer, invoke: &Invoke) -> Result<()> {
        invoke.validate(buffer)?;
        let oper = invoke.oper();
        let flags = *invoke.flags();

        if flags.clear_stats {
            self.link.reset_completions(Some(oper));
            self.expected[oper.index()] = 0;
        }

        self.link.post(buffer, invoke)?;
        self.posted += 1;
        let slot = &mut self.expected[oper.index()];
        *slot = slot.saturating_add(1);

        if flags.poll {
            self.wait_completed(oper)?;
        }
        Ok(())
    }

    /// Whether every `oper` posted since the last clear has completed
    pub fn check_completed(&self, oper: Oper) -> bool {
        self.link.completions(oper) >= self.expected[oper.index()]
    }

    /// Spin on [`Self::check_completed`] within the engine's policy
    ///
    /// Returns the number of checks made.
    ///
    /// # Errors
    ///
    /// Returns [`VfpgaError::CompletionTimeout`] once the policy is exhausted.
    pub fn wait_completed(&self, oper: Oper) -> Result<u64> {
        match poll_until(&self.policy, || self.check_completed(oper)) {
            PollOutcome::Done { polls } => Ok(polls),
            PollOutcome::Expired { polls, elapsed } => {
                tracing::warn!(
                    "{oper}: {} of {} completions after {polls} polls",
                    self.link.completions(oper),
                    self.expected[oper.index()]
                );
                Err(VfpgaError::CompletionTimeout {
                    oper,
                    polls,
                    elapsed_ms: millis(elapsed),
                })
            }
        }
    }

    /// Reset every completion counter and expectation
    pub fn clear_completed(&mut self) {
        self.link.reset_completions(None);
        self.expected = [0; 3];
    }

    /// Unwrap the link
    pub fn into_inner(self) -> L {
        self.link
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::software::SoftwareLink;
    use crate::descriptor::InvokeFlags;
    use vfpga_chip::page::AllocClass;

    fn setup() -> (InvocationEngine<SoftwareLink>, HostBuffer) {
        let engine = InvocationEngine::new(SoftwareLink::new()).with_policy(WaitPolicy::polls(64));
        let buffer = HostBuffer::allocate(AllocClass::Reg4K, 1).unwrap();
        (engine, buffer)
    }

    #[test]
    fn polled_invoke_returns_after_completion() {
        let (mut engine, mut buf) = setup();
        let d = Invoke::read(buf.region(0, 16).unwrap());
        engine.invoke(&mut buf, &d).unwrap();
        assert_eq!(engine.expected(Oper::Read), 1);
        assert!(engine.check_completed(Oper::Read));
    }

    #[test]
    fn clear_stats_restarts_expectation() {
        let (mut engine, mut buf) = setup();
        let d = Invoke::write(buf.region(16, 1).unwrap());
        for _ in 0..5 {
            engine.invoke(&mut buf, &d).unwrap();
        }
        assert_eq!(engine.expected(Oper::Write), 1);
        assert_eq!(engine.completions(Oper::Write), 1);
    }

    #[test]
    fn detached_invokes_accumulate() {
        let (mut engine, mut buf) = setup();
        let d = Invoke::read(buf.region(0, 16).unwrap())
            .streaming()
            .with_flags(InvokeFlags::detached());
        for _ in 0..4 {
            engine.invoke(&mut buf, &d).unwrap();
        }
        assert_eq!(engine.expected(Oper::Read), 4);
        assert_eq!(engine.wait_completed(Oper::Read).unwrap(), 1);
        assert_eq!(engine.completions(Oper::Read), 4);
    }

    #[test]
    fn lagging_completion_is_awaited() {
        let mut engine = InvocationEngine::new(SoftwareLink::new().with_completion_lag(3))
            .with_policy(WaitPolicy::polls(64));
        let mut buf = HostBuffer::allocate(AllocClass::Reg4K, 1).unwrap();
        let src = buf.region(0, 16).unwrap();
        let dst = buf.region(16, 1).unwrap();
        let d = Invoke::transfer(src, dst).with_flags(InvokeFlags::detached());
        engine.invoke(&mut buf, &d).unwrap();
        assert!(!engine.check_completed(Oper::Transfer));
        let polls = engine.wait_completed(Oper::Transfer).unwrap();
        assert!(polls > 1);
    }

    #[test]
    fn clear_completed_is_idempotent() {
        let (mut engine, mut buf) = setup();
        let d = Invoke::read(buf.region(0, 16).unwrap()).with_flags(InvokeFlags::detached());
        engine.invoke(&mut buf, &d).unwrap();
        engine.invoke(&mut buf, &d).unwrap();
        for _ in 0..2 {
            engine.clear_completed();
            for oper in Oper::ALL {
                assert_eq!(engine.completions(oper), 0);
                assert_eq!(engine.expected(oper), 0);
            }
        }
    }

    #[test]
    fn out_of_bounds_descriptor_never_posted() {
        let (mut engine, mut buf) = setup();
        let big = HostBuffer::allocate(AllocClass::Reg4K, 2).unwrap();
        let d = Invoke::read(big.region(4096, 16).unwrap());
        assert!(matches!(
            engine.invoke(&mut buf, &d),
            Err(VfpgaError::OutOfBounds { .. })
        ));
        assert_eq!(engine.posted(), 0);
        assert_eq!(engine.expected(Oper::Read), 0);
    }

    #[test]
    fn unacknowledged_poll_times_out() {
        let mut engine = InvocationEngine::new(SoftwareLink::new().dropping(&[1]))
            .with_policy(WaitPolicy::polls(32));
        let mut buf = HostBuffer::allocate(AllocClass::Reg4K, 1).unwrap();
        let d = Invoke::read(buf.region(0, 16).unwrap());
        let err = engine.invoke(&mut buf, &d).unwrap_err();
        assert!(matches!(
            err,
            VfpgaError::CompletionTimeout { oper: Oper::Read, polls: 32, .. }
        ));
    }
}
