//! # Stack Walking
//!
//! Captures the return addresses of the calling thread so an intercepted call
//! can be attributed to the code that made it. Frames are only ever
//! addresses; turning them into names is the job of
//! [`SymbolResolver`](crate::symbolization::SymbolResolver).
//!
//! ## Strategies
//!
//! - **Unwind metadata** (64-bit): every non-leaf function has a function
//!   table entry, so the unwinder restores the caller's registers exactly.
//!   Functions without an entry are leaves: their return address sits at the
//!   top of the stack.
//! - **Frame pointers** (32-bit): follow the saved frame-pointer chain; the
//!   return address lives one pointer above each saved frame pointer.
//!
//! ## Bounds
//!
//! A walk stops at the first of: `max` frames, a null instruction pointer,
//! a stack pointer outside the thread's stack, or an instruction pointer
//! whose first instruction bytes are unreadable.

use std::mem::size_of;

use apimon_common::MAX_INSTRUCTION_LENGTH;

use crate::platform::ProcessMemory;

const POINTER_SIZE: usize = size_of::<usize>();

/// Stack range of the calling thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackLimits {
    /// Lowest committed address (`StackLimit`)
    pub low: usize,

    /// One past the highest address (`StackBase`)
    pub high: usize,
}

impl StackLimits {
    /// Topmost stack pointer a walk accepts.
    ///
    /// The two highest slots hold the thread start frame and are never
    /// part of a trace.
    #[must_use]
    pub fn top(&self) -> usize {
        self.high.saturating_sub(2 * POINTER_SIZE)
    }

    #[must_use]
    pub fn contains(&self, sp: usize) -> bool {
        self.low <= sp && sp < self.top()
    }
}

/// Instruction, stack and frame pointer of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    pub ip: usize,
    pub sp: usize,
    pub fp: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindStrategy {
    /// Function table driven virtual unwind
    Metadata,

    /// Saved frame-pointer chain
    FramePointer,
}

/// Outcome of unwinding one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwindStep {
    /// Context now describes the caller
    Unwound,

    /// No function table entry covers the instruction pointer
    NoFunctionEntry,

    /// Unwinding is impossible from here
    Failed,
}

/// Execution context capture and frame unwinding
pub trait Unwinder: ProcessMemory {
    /// Saved register state of a thread
    type Context;

    /// Capture the calling thread's current context.
    ///
    /// Implementations capturing live registers should be
    /// `#[inline(always)]`: the context must describe the caller's frame.
    fn capture_context(&self) -> Self::Context;

    /// Stack bounds of the calling thread, from its environment block.
    fn stack_limits(&self) -> StackLimits;

    fn strategy(&self) -> UnwindStrategy;

    fn registers(&self, context: &Self::Context) -> Registers;

    fn set_registers(&self, context: &mut Self::Context, registers: Registers);

    /// Unwind one frame with the function table. Only used by
    /// [`UnwindStrategy::Metadata`].
    fn unwind_frame(&self, context: &mut Self::Context) -> UnwindStep;
}

/// Bounded return-address capture
pub struct StackWalker<'a, U> {
    unwinder: &'a U,
}

impl<'a, U: Unwinder> StackWalker<'a, U> {
    pub fn new(unwinder: &'a U) -> Self {
        Self { unwinder }
    }

    /// Record up to `max` return addresses, innermost first, into `out`.
    ///
    /// Walks from `context` when given (the context is consumed, the caller's
    /// copy is left untouched) or from the calling thread's current state.
    /// Returns the number of frames written.
    pub fn walk(&self, context: Option<U::Context>, out: &mut [usize], max: usize) -> usize {
        let limit = max.min(out.len());
        // Captured here rather than in a closure so the context describes a
        // frame that stays live for the whole walk
        let context = match context {
            Some(context) => context,
            None => self.unwinder.capture_context(),
        };
        let limits = self.unwinder.stack_limits();

        let count = match self.unwinder.strategy() {
            UnwindStrategy::Metadata => self.walk_metadata(context, limits, &mut out[..limit]),
            UnwindStrategy::FramePointer => self.walk_frame_pointers(&context, limits, &mut out[..limit]),
        };
        log::trace!("Captured {count} frames (stack {:#x}..{:#x})", limits.low, limits.high);
        count
    }

    fn walk_metadata(&self, mut context: U::Context, limits: StackLimits, out: &mut [usize]) -> usize {
        let mut count = 0;
        while count < out.len() {
            let regs = self.unwinder.registers(&context);
            if regs.ip == 0 || !limits.contains(regs.sp) {
                break;
            }
            out[count] = regs.ip;
            count += 1;

            if !self.unwinder.is_range_readable(regs.ip, MAX_INSTRUCTION_LENGTH) {
                break;
            }

            match self.unwinder.unwind_frame(&mut context) {
                UnwindStep::Unwound => {}
                UnwindStep::NoFunctionEntry => {
                    // Leaf function: return address is on top of the stack
                    let Some(ip) = self.unwinder.read_pointer(regs.sp) else {
                        break;
                    };
                    let sp = regs.sp + POINTER_SIZE;
                    self.unwinder.set_registers(&mut context, Registers { ip, sp, fp: regs.fp });
                }
                UnwindStep::Failed => break,
            }
        }
        count
    }

    fn walk_frame_pointers(&self, context: &U::Context, limits: StackLimits, out: &mut [usize]) -> usize {
        let mut count = 0;
        let mut fp = self.unwinder.registers(context).fp;
        while count < out.len() && limits.contains(fp) {
            let Some(ret) = self.unwinder.read_pointer(fp + POINTER_SIZE) else {
                break;
            };
            if ret == 0 {
                break;
            }
            let Some(next) = self.unwinder.read_pointer(fp) else {
                break;
            };
            out[count] = ret;
            count += 1;

            // Frames grow towards the stack base
            if next <= fp {
                break;
            }
            fp = next;
        }
        count
    }
}
