//! Target architecture description.
//!
//! The frame cache is architecture-neutral, but a handful of questions can only
//! be answered per architecture: which way the stack grows (for the "inner
//! than" safety net), which DWARF register holds the program counter (for the
//! saved-PC sanity check), and which registers make up a full register snapshot
//! (for popping frames).

use std::fmt;

use gimli::Register;

use super::Address;

/// CPU architecture of a frame.
///
/// Architectures can differ between adjacent frames (e.g. an interworking
/// trampoline), so every frame carries its own, obtained by unwinding the
/// younger frame. See [`crate::Unwinder::prev_arch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 64-bit ARM. DWARF numbering: X0-X30 = 0-30, SP = 31, PC = 32.
    Arm64,
    /// 64-bit x86. DWARF numbering: RAX..R15 = 0-15, RIP (return address) = 16.
    X86_64,
    /// Any other architecture; assumed to grow its stack downwards and to have
    /// no DWARF-numbered program counter.
    Unknown(&'static str),
}

impl Architecture
{
    /// Architecture of the running debugger binary.
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }

        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }

        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
        {
            Architecture::Unknown(std::env::consts::ARCH)
        }
    }

    /// Size of a pointer in bytes.
    #[must_use]
    pub const fn pointer_size_bytes(self) -> u8
    {
        match self {
            Architecture::Arm64 | Architecture::X86_64 | Architecture::Unknown(_) => 8,
        }
    }

    /// Returns `true` when pushing onto the stack decreases the stack pointer.
    #[must_use]
    pub const fn stack_grows_down(self) -> bool
    {
        match self {
            Architecture::Arm64 | Architecture::X86_64 | Architecture::Unknown(_) => true,
        }
    }

    /// Returns `true` if stack address `lhs` is strictly inner (younger,
    /// closer to the top of the stack) than `rhs`.
    #[must_use]
    pub const fn inner_than(self, lhs: Address, rhs: Address) -> bool
    {
        if self.stack_grows_down() {
            lhs.value() < rhs.value()
        } else {
            lhs.value() > rhs.value()
        }
    }

    /// DWARF register holding the program counter, if the architecture has one.
    #[must_use]
    pub const fn pc_register(self) -> Option<Register>
    {
        match self {
            Architecture::Arm64 => Some(Register(32)),
            Architecture::X86_64 => Some(Register(16)),
            Architecture::Unknown(_) => None,
        }
    }

    /// DWARF register holding the stack pointer, if known.
    #[must_use]
    pub const fn sp_register(self) -> Option<Register>
    {
        match self {
            Architecture::Arm64 => Some(Register(31)),
            Architecture::X86_64 => Some(Register(7)),
            Architecture::Unknown(_) => None,
        }
    }

    /// Every DWARF register that takes part in a frame's register snapshot.
    pub fn registers(self) -> impl Iterator<Item = Register>
    {
        let count: u16 = match self {
            Architecture::Arm64 => 33,
            Architecture::X86_64 => 17,
            Architecture::Unknown(_) => 0,
        };
        (0..count).map(Register)
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::Unknown(name) => write!(f, "{name}"),
        }
    }
}
