//! Frame identities.
//!
//! A [`FrameId`] names a frame well enough to find it again after the frame
//! chain has been thrown away and rebuilt (for example after the user steps).
//! It is built from the frame's stack address (usually the CFA), the start of
//! the function executing in it, and an optional architecture-specific
//! disambiguator.
//!
//! ## Comparison semantics
//!
//! Identity equality is deliberately not an equivalence relation:
//!
//! - The null identity ([`FrameId::NULL`]) compares unequal to everything,
//!   itself included, the way `NaN` does.
//! - An absent code or special address is a wildcard and matches anything on
//!   the other side.
//!
//! That's why `FrameId` implements `PartialEq` but neither `Eq` nor `Hash`;
//! the [`FrameStash`](crate::stash::FrameStash) hashes identities itself.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::symbols::SymbolResolver;
use crate::types::{Address, Architecture};

/// How much is known about a frame's stack address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackStatus
{
    /// No identity at all (the null identity).
    Invalid,
    /// `stack_addr` is meaningful.
    Valid,
    /// The stack address couldn't be read, but the frame still exists.
    Unavailable,
    /// The sentinel frame's identity.
    Sentinel,
    /// The outermost frame's identity, used when an unwinder can't produce one.
    Outer,
}

/// Identity of a stack frame.
///
/// ## Example
///
/// ```rust
/// use ferros_frames::types::Address;
/// use ferros_frames::FrameId;
///
/// let id = FrameId::build(Address::from(0x7ff0), Address::from(0x1000));
/// let wild = FrameId::build_wild(Address::from(0x7ff0));
///
/// assert!(id == id);
/// assert!(id == wild); // missing code address is a wildcard
/// assert!(FrameId::NULL != FrameId::NULL);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct FrameId
{
    stack_status: StackStatus,
    stack_addr: Address,
    code_addr: Option<Address>,
    special_addr: Option<Address>,
    artificial_depth: u32,
}

impl FrameId
{
    /// The null identity: "no frame".
    pub const NULL: Self = Self {
        stack_status: StackStatus::Invalid,
        stack_addr: Address::ZERO,
        code_addr: None,
        special_addr: None,
        artificial_depth: 0,
    };

    /// Identity of the sentinel frame.
    pub const SENTINEL: Self = Self {
        stack_status: StackStatus::Sentinel,
        stack_addr: Address::ZERO,
        code_addr: None,
        special_addr: None,
        artificial_depth: 1,
    };

    /// Identity given to frames whose unwinder can't produce one.
    pub const OUTER: Self = Self {
        stack_status: StackStatus::Outer,
        stack_addr: Address::ZERO,
        code_addr: None,
        special_addr: None,
        artificial_depth: 1,
    };

    /// Identity from a stack address and the start of the frame's function.
    #[must_use]
    pub const fn build(stack_addr: Address, code_addr: Address) -> Self
    {
        Self {
            stack_status: StackStatus::Valid,
            stack_addr,
            code_addr: Some(code_addr),
            special_addr: None,
            artificial_depth: 0,
        }
    }

    /// Identity with an additional architecture-specific disambiguator, for
    /// frames that share a stack address (frameless leaf functions, register
    /// windows, ...).
    #[must_use]
    pub const fn build_special(stack_addr: Address, code_addr: Address, special_addr: Address) -> Self
    {
        Self {
            stack_status: StackStatus::Valid,
            stack_addr,
            code_addr: Some(code_addr),
            special_addr: Some(special_addr),
            artificial_depth: 0,
        }
    }

    /// Identity for a frame whose stack address couldn't be read.
    #[must_use]
    pub const fn build_unavailable_stack(code_addr: Address) -> Self
    {
        Self {
            stack_status: StackStatus::Unavailable,
            stack_addr: Address::ZERO,
            code_addr: Some(code_addr),
            special_addr: None,
            artificial_depth: 0,
        }
    }

    /// Like [`FrameId::build_unavailable_stack`], with a disambiguator.
    #[must_use]
    pub const fn build_unavailable_stack_special(code_addr: Address, special_addr: Address) -> Self
    {
        Self {
            stack_status: StackStatus::Unavailable,
            stack_addr: Address::ZERO,
            code_addr: Some(code_addr),
            special_addr: Some(special_addr),
            artificial_depth: 0,
        }
    }

    /// Stack-only identity; code and special addresses are wildcards.
    #[must_use]
    pub const fn build_wild(stack_addr: Address) -> Self
    {
        Self {
            stack_status: StackStatus::Valid,
            stack_addr,
            code_addr: None,
            special_addr: None,
            artificial_depth: 0,
        }
    }

    /// The identity of an artificial frame one level deeper than `self`.
    ///
    /// Inline and tail-call unwinders derive their frame's identity from the
    /// real frame that hosts them and bump the depth to tell them apart.
    #[must_use]
    pub const fn one_artificial_deeper(self) -> Self
    {
        Self {
            artificial_depth: self.artificial_depth + 1,
            ..self
        }
    }

    /// Stack status.
    pub const fn stack_status(&self) -> StackStatus
    {
        self.stack_status
    }

    /// Stack address; meaningful only when the status is [`StackStatus::Valid`].
    pub const fn stack_addr(&self) -> Address
    {
        self.stack_addr
    }

    /// Code address, if present.
    pub const fn code_addr(&self) -> Option<Address>
    {
        self.code_addr
    }

    /// Special address, if present.
    pub const fn special_addr(&self) -> Option<Address>
    {
        self.special_addr
    }

    /// Artificial depth (0 for real frames).
    pub const fn artificial_depth(&self) -> u32
    {
        self.artificial_depth
    }

    /// Returns `true` for anything but the null identity.
    pub const fn is_valid(&self) -> bool
    {
        !matches!(self.stack_status, StackStatus::Invalid)
    }

    /// Returns `true` for a valid identity of an artificial (inline or
    /// tail-call) frame.
    pub const fn is_artificial(&self) -> bool
    {
        self.is_valid() && self.artificial_depth != 0
    }

    /// Returns `true` if `self` is provably inner (younger) than `other`.
    ///
    /// Only identities with valid stack addresses can be ordered; anything else
    /// answers `false`. Two artificial frames sharing one stack slot are
    /// ordered by the lexical nesting of their code blocks, as reported by
    /// `symbols`.
    ///
    /// This is a safety net, not a total order: stack ranges can be
    /// discontiguous (alternate signal stacks, split stacks), so it is only
    /// meaningful between adjacent normal frames.
    pub fn inner_than(&self, other: &FrameId, arch: Architecture, symbols: &dyn SymbolResolver) -> bool
    {
        if self.stack_status != StackStatus::Valid || other.stack_status != StackStatus::Valid {
            return false;
        }

        if self.artificial_depth > other.artificial_depth
            && self.stack_addr == other.stack_addr
            && self.code_addr.is_some() == other.code_addr.is_some()
            && self.special_addr == other.special_addr
        {
            // Same function, different inlined blocks.
            return match (self.code_addr, other.code_addr) {
                (Some(inner), Some(outer)) => symbols.block_contained_in(inner, outer).unwrap_or(false),
                _ => false,
            };
        }

        // Strict: frameless functions share a stack address with their
        // caller and are not inner.
        arch.inner_than(self.stack_addr, other.stack_addr)
    }

    /// Hash over the present addresses, consistent with identity equality
    /// for identities that carry the same set of optional addresses.
    pub(crate) fn stash_hash(&self) -> u64
    {
        let mut hasher = DefaultHasher::new();
        if self.stack_status == StackStatus::Valid {
            self.stack_addr.hash(&mut hasher);
        }
        if let Some(code) = self.code_addr {
            code.hash(&mut hasher);
        }
        if let Some(special) = self.special_addr {
            special.hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl PartialEq for FrameId
{
    fn eq(&self, other: &Self) -> bool
    {
        if self.stack_status == StackStatus::Invalid || other.stack_status == StackStatus::Invalid {
            return false;
        }
        if self.stack_status != other.stack_status || self.stack_addr != other.stack_addr {
            return false;
        }
        if let (Some(l), Some(r)) = (self.code_addr, other.code_addr) {
            if l != r {
                return false;
            }
        }
        if let (Some(l), Some(r)) = (self.special_addr, other.special_addr) {
            if l != r {
                return false;
            }
        }
        self.artificial_depth == other.artificial_depth
    }
}

impl fmt::Display for FrameId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{{")?;
        match self.stack_status {
            StackStatus::Invalid => write!(f, "!stack")?,
            StackStatus::Unavailable => write!(f, "stack=<unavailable>")?,
            StackStatus::Sentinel => write!(f, "stack=<sentinel>")?,
            StackStatus::Outer => write!(f, "stack=<outer>")?,
            StackStatus::Valid => write!(f, "stack=0x{:x}", self.stack_addr)?,
        }
        match self.code_addr {
            Some(code) => write!(f, ",code=0x{code:x}")?,
            None => write!(f, ",!code")?,
        }
        match self.special_addr {
            Some(special) => write!(f, ",special=0x{special:x}")?,
            None => write!(f, ",!special")?,
        }
        if self.artificial_depth != 0 {
            write!(f, ",artificial={}", self.artificial_depth)?;
        }
        write!(f, "}}")
    }
}
