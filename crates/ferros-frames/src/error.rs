//! # Error Types
//!
//! Errors raised while building and walking the frame chain.
//!
//! Two layers exist:
//!
//! 1. [`UnwindError`]: what an unwinder or the target reports when a value
//!    can't be produced (memory read failed, register not saved, ...).
//! 2. [`FrameError`]: everything the frame cache itself can return, wrapping
//!    `UnwindError` for failures that aren't absorbed into a stop reason.
//!
//! Only `UnwindError::Memory` is absorbed: when it escapes an unwinder while a
//! frame's predecessor is being built, the frame gets the `MEMORY_ERROR` stop
//! reason and the walk ends gracefully. Everything else propagates.

use gimli::Register;
use thiserror::Error;

use crate::types::Address;

/// Failure reported by an unwinder or by the target while producing a value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnwindError
{
    /// A target memory read failed.
    ///
    /// This is the one failure that the frame cache turns into a stop reason
    /// rather than an error: a corrupt or partially unmapped stack must never
    /// take the debugger down with it.
    #[error("Cannot access memory at address {address}")]
    Memory
    {
        /// First address that couldn't be read.
        address: Address,
    },

    /// The value isn't available (e.g. not collected in a trace, or the
    /// thread is gone).
    #[error("{0} is not available")]
    Unavailable(String),

    /// The value was not saved by the callee.
    #[error("{0} was not saved")]
    NotSaved(String),

    /// Any other target-side failure.
    #[error("Target error: {0}")]
    Target(String),
}

/// Main error type for frame cache operations.
///
/// ## Error Categories
///
/// 1. **Preconditions**: `NoRegisters`, `NoStack`, `NoMemory`
/// 2. **Handle misuse**: `StaleFrame`
/// 3. **Unwinder selection**: `NoUnwinder`
/// 4. **Frame popping**: `CannotPopInitialFrame`, `CannotFindCaller`, `RegisterWrite`
/// 5. **Propagated unwind failures**: `Unwind`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError
{
    /// The target has no registers (e.g. no live process).
    #[error("No registers.")]
    NoRegisters,

    /// The target has no stack.
    #[error("No stack.")]
    NoStack,

    /// The target has no memory.
    #[error("No memory.")]
    NoMemory,

    /// A frame handle from an earlier cache generation was used.
    ///
    /// Handles are only valid until the next invalidation; re-find frames
    /// across invalidations with their [`crate::FrameId`] instead.
    #[error("Stale frame handle: frame belongs to generation {frame_generation}, cache is at {cache_generation}")]
    StaleFrame
    {
        /// Generation the handle was minted in.
        frame_generation: u32,
        /// Current cache generation.
        cache_generation: u32,
    },

    /// No unwinder in the priority list accepted the frame.
    #[error("No unwinder accepted frame #{level}")]
    NoUnwinder
    {
        /// Level of the frame.
        level: i32,
    },

    /// The innermost frame has no caller to pop to.
    #[error("Cannot pop the initial frame.")]
    CannotPopInitialFrame,

    /// Only artificial frames were found above the frame being popped.
    #[error("Cannot find the caller frame.")]
    CannotFindCaller,

    /// Writing a register back to the target failed.
    #[error("Failed to write register {}: {details}", register.0)]
    RegisterWrite
    {
        /// DWARF register number.
        register: Register,
        /// Underlying failure.
        details: String,
    },

    /// An unwinder or target failure that wasn't absorbed into a stop reason.
    #[error(transparent)]
    Unwind(#[from] UnwindError),
}

impl FrameError
{
    /// Returns `true` if this wraps a target memory read failure.
    #[must_use]
    pub const fn is_memory_error(&self) -> bool
    {
        matches!(self, FrameError::Unwind(UnwindError::Memory { .. }))
    }

    /// Returns `true` if this wraps a "value not available" failure.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool
    {
        matches!(self, FrameError::Unwind(UnwindError::Unavailable(_)))
    }

    /// Returns `true` if this wraps a "value not saved" failure.
    #[must_use]
    pub const fn is_not_saved(&self) -> bool
    {
        matches!(self, FrameError::Unwind(UnwindError::NotSaved(_)))
    }
}

/// Convenience type alias for `Result<T, FrameError>`
///
/// ```rust
/// use ferros_frames::error::FrameResult;
/// fn foo() -> FrameResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type FrameResult<T> = std::result::Result<T, FrameError>;
