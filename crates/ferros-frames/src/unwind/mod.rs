//! # Unwinders
//!
//! An [`Unwinder`] knows how to get from one frame to the frame that called
//! it: it produces the frame's identity, the register values its caller
//! sees, and the caller's program counter and architecture.
//!
//! ## Binding
//!
//! A frame has no unwinder until something needs one. The
//! [`FrameCache`](crate::FrameCache) then probes its priority list in order
//! with [`Unwinder::sniff`]; the first unwinder that accepts the frame is bound
//! to it for the rest of the cache generation. The sentinel frame is always
//! bound to [`SentinelUnwinder`].
//!
//! ## Calling convention
//!
//! Every method receives the cache and a handle to the frame being unwound
//! (the *younger* frame). Unwinders read whatever they need through the
//! cache (`frame_register`, `frame_pc`, `target().read_u64`, ...), so values
//! they depend on are cached and the usual re-entrancy rules apply.

pub mod base;
pub mod sentinel;

use std::any::Any;
use std::fmt;

use gimli::Register;

pub use self::base::{DefaultFrameBase, FrameBase};
pub use self::sentinel::SentinelUnwinder;
use crate::cache::{FrameCache, FrameRef};
use crate::error::{FrameResult, UnwindError};
use crate::frame_id::FrameId;
use crate::types::{Address, Architecture, RegisterValue};

/// Kind of frame an unwinder produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType
{
    /// A regular function activation.
    Normal,
    /// A frame pushed by the debugger for an inferior function call.
    Dummy,
    /// A function inlined into its caller; shares the caller's stack slot.
    Inline,
    /// A function that was tail-called away and no longer has a frame.
    Tailcall,
    /// A signal trampoline.
    Sigtramp,
    /// Architecture-specific synthetic frame.
    Arch,
    /// The sentinel: the live target registers.
    Sentinel,
}

impl FrameType
{
    /// Returns `true` for inline and tail-call frames, which have no stack
    /// allocation of their own.
    #[must_use]
    pub const fn is_artificial(self) -> bool
    {
        matches!(self, FrameType::Inline | FrameType::Tailcall)
    }

    /// Symbolic name, as used in debug output.
    #[must_use]
    pub const fn name(self) -> &'static str
    {
        match self {
            FrameType::Normal => "NORMAL_FRAME",
            FrameType::Dummy => "DUMMY_FRAME",
            FrameType::Inline => "INLINE_FRAME",
            FrameType::Tailcall => "TAILCALL_FRAME",
            FrameType::Sigtramp => "SIGTRAMP_FRAME",
            FrameType::Arch => "ARCH_FRAME",
            FrameType::Sentinel => "SENTINEL_FRAME",
        }
    }
}

impl fmt::Display for FrameType
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

/// Why a frame has no predecessor.
///
/// Reasons after [`UnwindStopReason::Outermost`] are errors: the chain ended
/// because something looked wrong, not because the stack really ends there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnwindStopReason
{
    /// Not stopped; the predecessor exists (or hasn't been attempted).
    NoReason,
    /// The unwinder couldn't produce an identity.
    NullId,
    /// This is the outermost frame.
    Outermost,
    /// Registers or memory needed to unwind weren't available.
    Unavailable,
    /// The predecessor's identity is inner to this frame's: the unwind went
    /// backwards.
    InnerId,
    /// The predecessor's identity matches a frame already in the chain.
    SameId,
    /// This frame and the next save the PC in the same place.
    NoSavedPc,
    /// A target memory read failed while unwinding.
    MemoryError,
}

impl UnwindStopReason
{
    /// Symbolic name, as used in debug output.
    #[must_use]
    pub const fn name(self) -> &'static str
    {
        match self {
            UnwindStopReason::NoReason => "UNWIND_NO_REASON",
            UnwindStopReason::NullId => "UNWIND_NULL_ID",
            UnwindStopReason::Outermost => "UNWIND_OUTERMOST",
            UnwindStopReason::Unavailable => "UNWIND_UNAVAILABLE",
            UnwindStopReason::InnerId => "UNWIND_INNER_ID",
            UnwindStopReason::SameId => "UNWIND_SAME_ID",
            UnwindStopReason::NoSavedPc => "UNWIND_NO_SAVED_PC",
            UnwindStopReason::MemoryError => "UNWIND_MEMORY_ERROR",
        }
    }

    /// Human-readable explanation.
    #[must_use]
    pub const fn description(self) -> &'static str
    {
        match self {
            UnwindStopReason::NoReason => "no reason",
            UnwindStopReason::NullId => "unwinder did not report frame ID",
            UnwindStopReason::Outermost => "outermost",
            UnwindStopReason::Unavailable => "not enough registers or memory available to unwind further",
            UnwindStopReason::InnerId => "previous frame inner to this frame (corrupt stack?)",
            UnwindStopReason::SameId => "previous frame identical to this frame (corrupt stack?)",
            UnwindStopReason::NoSavedPc => "frame did not save the PC",
            UnwindStopReason::MemoryError => "<unavailable>",
        }
    }

    /// Returns `true` if unwinding stopped because something went wrong.
    #[must_use]
    pub const fn is_error(self) -> bool
    {
        !matches!(
            self,
            UnwindStopReason::NoReason | UnwindStopReason::NullId | UnwindStopReason::Outermost
        )
    }
}

impl fmt::Display for UnwindStopReason
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(self.description())
    }
}

/// Frame unwinder.
///
/// Implementations keep per-frame scratch data (a parsed prologue, a CFA
/// rule row, ...) in the frame's unwinder data slot, see
/// [`FrameCache::set_unwinder_data`]. The slot is handed back to
/// [`Unwinder::dealloc_cache`] when the cache is invalidated.
pub trait Unwinder
{
    /// Short name, used in logs.
    fn name(&self) -> &'static str;

    /// Kind of frames this unwinder produces.
    fn frame_type(&self) -> FrameType;

    /// Returns `true` if this unwinder can unwind `frame`.
    ///
    /// Must not ask for `frame`'s identity or predecessor. A
    /// `UnwindError::Unavailable` failure counts as "no".
    ///
    /// ## Errors
    ///
    /// Any failure other than unavailability aborts the search.
    fn sniff(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<bool>;

    /// Reason `frame` can't be unwound, or `NoReason`.
    ///
    /// ## Errors
    ///
    /// Failures reading the target.
    fn stop_reason(&self, _cache: &mut FrameCache, _frame: FrameRef) -> FrameResult<UnwindStopReason>
    {
        Ok(UnwindStopReason::NoReason)
    }

    /// Identity of `frame`; `None` when none can be produced (the frame gets
    /// [`FrameId::OUTER`]).
    ///
    /// ## Errors
    ///
    /// Failures reading the target.
    fn this_id(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<Option<FrameId>>;

    /// Value `register` has in the frame older than `frame`.
    ///
    /// ## Errors
    ///
    /// Failures reading the target. Registers that weren't saved should be
    /// reported as [`RegisterValue::not_saved`], not as errors.
    fn prev_register(&self, cache: &mut FrameCache, frame: FrameRef, register: Register) -> FrameResult<RegisterValue>;

    /// Program counter of the frame older than `frame`.
    ///
    /// The default unwinds the architecture's PC register.
    ///
    /// ## Errors
    ///
    /// `UnwindError::Unavailable` / `UnwindError::NotSaved` when the PC can't
    /// be produced; other failures reading the target.
    fn prev_pc(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<Address>
    {
        let arch = cache.unwind_arch(frame)?;
        let Some(pc) = arch.pc_register() else {
            return Err(UnwindError::Unavailable(format!("PC register on {arch}")).into());
        };
        let value = cache.unwind_register(frame, pc)?;
        Ok(Address::from(value.require(pc)?))
    }

    /// Architecture of the frame older than `frame`, if different.
    ///
    /// ## Errors
    ///
    /// Failures reading the target.
    fn prev_arch(&self, _cache: &mut FrameCache, _frame: FrameRef) -> FrameResult<Option<Architecture>>
    {
        Ok(None)
    }

    /// Release per-frame data stored by this unwinder.
    fn dealloc_cache(&self, _level: i32, _data: Box<dyn Any>) {}
}
