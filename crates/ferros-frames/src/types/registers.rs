//! Unwound register values.

use std::fmt;

use gimli::Register;

use super::Address;
use crate::error::UnwindError;

/// Where an unwound register value lives, so it can be written back.
///
/// ## Variants
///
/// - `NotLval`: the value has no home (e.g. the register was never saved)
/// - `Memory`: saved in a stack slot at the given address
/// - `Register`: still live in (another) register of the younger frame
/// - `Computed`: derived from other values (e.g. the CFA), cannot be written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterLocation
{
    /// No location.
    NotLval,
    /// Saved in target memory.
    Memory(Address),
    /// Held in a register of the next (younger) frame.
    Register(Register),
    /// Computed on the fly, not writable.
    Computed,
}

impl RegisterLocation
{
    /// Returns `true` when two locations refer to the same save slot.
    ///
    /// Computed and location-less values never alias anything.
    #[must_use]
    pub fn same_slot(self, other: Self) -> bool
    {
        match (self, other) {
            (RegisterLocation::Memory(a), RegisterLocation::Memory(b)) => a == b,
            (RegisterLocation::Register(a), RegisterLocation::Register(b)) => a == b,
            _ => false,
        }
    }
}

/// Contents of an unwound register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterContents
{
    /// The value is known.
    Value(u64),
    /// The callee didn't preserve the register (it was "optimized out").
    NotSaved,
    /// The register (or the memory holding it) couldn't be read.
    Unavailable,
}

/// A register value as seen by a particular frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterValue
{
    /// The value itself, or why it's missing.
    pub contents: RegisterContents,
    /// Where the value is stored.
    pub location: RegisterLocation,
}

impl RegisterValue
{
    /// A known value stored at `location`.
    #[must_use]
    pub const fn value(value: u64, location: RegisterLocation) -> Self
    {
        Self {
            contents: RegisterContents::Value(value),
            location,
        }
    }

    /// A known value held in `register` of the younger frame.
    #[must_use]
    pub const fn in_register(value: u64, register: Register) -> Self
    {
        Self::value(value, RegisterLocation::Register(register))
    }

    /// A known value saved in memory at `address`.
    #[must_use]
    pub const fn in_memory(value: u64, address: Address) -> Self
    {
        Self::value(value, RegisterLocation::Memory(address))
    }

    /// A value that was not saved by the callee.
    #[must_use]
    pub const fn not_saved() -> Self
    {
        Self {
            contents: RegisterContents::NotSaved,
            location: RegisterLocation::NotLval,
        }
    }

    /// A value that can't be read.
    #[must_use]
    pub const fn unavailable(location: RegisterLocation) -> Self
    {
        Self {
            contents: RegisterContents::Unavailable,
            location,
        }
    }

    /// The raw value, if known.
    #[must_use]
    pub const fn as_u64(&self) -> Option<u64>
    {
        match self.contents {
            RegisterContents::Value(value) => Some(value),
            RegisterContents::NotSaved | RegisterContents::Unavailable => None,
        }
    }

    /// The raw value, or the error describing why it is missing.
    ///
    /// ## Errors
    ///
    /// `UnwindError::NotSaved` or `UnwindError::Unavailable` naming `register`.
    pub fn require(&self, register: Register) -> Result<u64, UnwindError>
    {
        match self.contents {
            RegisterContents::Value(value) => Ok(value),
            RegisterContents::NotSaved => Err(UnwindError::NotSaved(format!("register {}", register.0))),
            RegisterContents::Unavailable => Err(UnwindError::Unavailable(format!("register {}", register.0))),
        }
    }
}

impl fmt::Display for RegisterValue
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.contents {
            RegisterContents::Value(value) => write!(f, "0x{value:x}")?,
            RegisterContents::NotSaved => write!(f, "<not saved>")?,
            RegisterContents::Unavailable => write!(f, "<unavailable>")?,
        }
        match self.location {
            RegisterLocation::Memory(address) => write!(f, " address={address}"),
            RegisterLocation::Register(register) => write!(f, " register={}", register.0),
            RegisterLocation::Computed => write!(f, " computed"),
            RegisterLocation::NotLval => Ok(()),
        }
    }
}

/// A lazily computed per-frame value.
///
/// Used for the unwound program counter and function start caches: once a
/// value (or its absence) is known it is never recomputed for the lifetime of
/// the cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cached<T>
{
    /// Not yet computed.
    Unknown,
    /// Computed successfully.
    Value(T),
    /// The value was not saved by the callee.
    NotSaved,
    /// The value couldn't be read.
    Unavailable,
}

impl<T: Copy> Cached<T>
{
    /// Returns `true` until a computation has been recorded.
    pub fn is_unknown(&self) -> bool
    {
        matches!(self, Cached::Unknown)
    }

    /// The cached value, if one was computed successfully.
    pub fn value(&self) -> Option<T>
    {
        match self {
            Cached::Value(value) => Some(*value),
            Cached::Unknown | Cached::NotSaved | Cached::Unavailable => None,
        }
    }
}
