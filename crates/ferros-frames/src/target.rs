//! # Target Access
//!
//! The live register and memory provider the frame cache unwinds from.
//!
//! The cache only ever touches the target in two places: the sentinel frame
//! reads live registers through it, and [`FrameCache::pop`](crate::FrameCache::pop)
//! writes a register snapshot back. Unwinders that need memory reach it
//! through [`FrameCache::target`](crate::FrameCache::target).
//!
//! ## Preconditions
//!
//! `has_registers`, `has_stack` and `has_memory` are checked (in that order)
//! before any unwinding begins, so a target without a live thread reports a
//! precondition error instead of a half-built chain.

use gimli::Register;

use crate::error::UnwindError;
use crate::types::{Address, Architecture};

/// Register and memory provider for the thread being unwound.
pub trait TargetAccess
{
    /// Returns `true` if the target has a register set to read.
    fn has_registers(&self) -> bool;

    /// Returns `true` if the target has a stack.
    fn has_stack(&self) -> bool
    {
        self.has_registers()
    }

    /// Returns `true` if the target's memory is readable.
    fn has_memory(&self) -> bool
    {
        self.has_registers()
    }

    /// Architecture of the innermost frame.
    fn architecture(&self) -> Architecture;

    /// Read a live register of the selected thread.
    ///
    /// ## Errors
    ///
    /// `UnwindError::Unavailable` when the register can't be read.
    fn read_register(&self, register: Register) -> Result<u64, UnwindError>;

    /// Write a live register of the selected thread.
    ///
    /// ## Errors
    ///
    /// Whatever the target reports; the cache wraps it in
    /// [`FrameError::RegisterWrite`](crate::FrameError::RegisterWrite).
    fn write_register(&mut self, register: Register, value: u64) -> Result<(), UnwindError>;

    /// Read `buf.len()` bytes at `address`.
    ///
    /// ## Errors
    ///
    /// `UnwindError::Memory` naming the address that couldn't be read.
    fn read_memory(&self, address: Address, buf: &mut [u8]) -> Result<(), UnwindError>;

    /// Write `data` at `address`.
    ///
    /// ## Errors
    ///
    /// `UnwindError::Memory` naming the address that couldn't be written.
    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<(), UnwindError>;

    /// Read a little-endian pointer-sized word.
    ///
    /// ## Errors
    ///
    /// See [`TargetAccess::read_memory`].
    fn read_u64(&self, address: Address) -> Result<u64, UnwindError>
    {
        let mut bytes = [0u8; 8];
        self.read_memory(address, &mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }
}
