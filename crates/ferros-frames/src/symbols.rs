//! # Symbol Resolution
//!
//! The frame cache needs very little from symbol tables, and only for policy:
//!
//! - where the function containing a PC starts (frame function caches)
//! - where `main` and the process entry point are (backtrace truncation)
//! - whether a PC is inside a stack-switching runtime helper such as
//!   `__morestack` (the "inner id" sanity check tolerates those)
//! - how lexical blocks nest (ordering inline frames that share a stack slot)
//!
//! [`SymbolResolver`] captures exactly that. [`SymbolMap`] is a small
//! in-memory implementation, useful when symbols come from somewhere that has
//! already been parsed (a symbol server, a core-file note, tests).

use std::collections::BTreeMap;

use rustc_demangle::demangle;

use crate::types::Address;

/// Runtime helpers known to continue execution on a different stack.
const STACK_SWITCH_HELPERS: &[&str] = &["__morestack"];

/// Address-to-symbol queries used by the frame cache.
pub trait SymbolResolver
{
    /// Start address of the function containing `pc`.
    fn function_start(&self, pc: Address) -> Option<Address>;

    /// Demangled name of the function containing `pc`.
    fn function_name(&self, _pc: Address) -> Option<String>
    {
        None
    }

    /// Start address of the program's `main` function.
    fn main_function(&self) -> Option<Address>
    {
        None
    }

    /// The process entry point.
    fn entry_point(&self) -> Option<Address>
    {
        None
    }

    /// Returns `true` if `pc` is inside a runtime helper that can continue
    /// the stack anywhere (so unwinding may legitimately move "backwards").
    fn is_stack_switch_helper(&self, pc: Address) -> bool
    {
        self.function_name(pc)
            .is_some_and(|name| STACK_SWITCH_HELPERS.contains(&name.as_str()))
    }

    /// Whether the innermost lexical block at `inner_pc` is the same as, or
    /// nested inside, the innermost block at `outer_pc`.
    ///
    /// `None` when either address has no block information.
    fn block_contained_in(&self, _inner_pc: Address, _outer_pc: Address) -> Option<bool>
    {
        None
    }
}

/// A resolver that knows nothing; every policy that depends on symbols is
/// skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbols;

impl SymbolResolver for NoSymbols
{
    fn function_start(&self, _pc: Address) -> Option<Address>
    {
        None
    }
}

#[derive(Debug, Clone)]
struct FunctionSymbol
{
    size: u64,
    linkage_name: String,
    demangled: String,
}

/// In-memory symbol table: function ranges, lexical blocks, `main` and the
/// entry point.
///
/// ## Example
///
/// ```rust
/// use ferros_frames::symbols::{SymbolMap, SymbolResolver};
/// use ferros_frames::types::Address;
///
/// let mut symbols = SymbolMap::new();
/// symbols.add_function("main", Address::from(0x1000), 0x80);
/// assert_eq!(symbols.function_start(Address::from(0x1042)), Some(Address::from(0x1000)));
/// assert_eq!(symbols.main_function(), Some(Address::from(0x1000)));
/// ```
#[derive(Debug, Clone)]
pub struct SymbolMap
{
    functions: BTreeMap<Address, FunctionSymbol>,
    blocks: Vec<(Address, u64)>,
    entry_point: Option<Address>,
    main_name: String,
}

impl Default for SymbolMap
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl SymbolMap
{
    /// Create an empty map that looks for a function called `main`.
    #[must_use]
    pub fn new() -> Self
    {
        Self {
            functions: BTreeMap::new(),
            blocks: Vec::new(),
            entry_point: None,
            main_name: "main".to_string(),
        }
    }

    /// Use a different name for the program's main function.
    #[must_use]
    pub fn with_main_name(mut self, name: impl Into<String>) -> Self
    {
        self.main_name = name.into();
        self
    }

    /// Register a function. `name` may be a mangled linkage name; lookups by
    /// name compare the demangled form without its hash suffix.
    pub fn add_function(&mut self, name: &str, start: Address, size: u64)
    {
        let demangled = format!("{:#}", demangle(name));
        self.functions.insert(
            start,
            FunctionSymbol {
                size,
                linkage_name: name.to_string(),
                demangled,
            },
        );
    }

    /// Register a lexical block (e.g. an inlined call site) inside a function.
    pub fn add_block(&mut self, start: Address, size: u64)
    {
        self.blocks.push((start, size));
    }

    /// Set the process entry point.
    pub fn set_entry_point(&mut self, entry: Address)
    {
        self.entry_point = Some(entry);
    }

    /// Linkage (possibly mangled) name of the function containing `pc`.
    pub fn linkage_name(&self, pc: Address) -> Option<&str>
    {
        self.function_at(pc).map(|(_, function)| function.linkage_name.as_str())
    }

    fn function_at(&self, pc: Address) -> Option<(Address, &FunctionSymbol)>
    {
        let (start, function) = self.functions.range(..=pc).next_back()?;
        (pc.value() - start.value() < function.size).then_some((*start, function))
    }

    /// Innermost block (function or lexical block) containing `pc`.
    fn innermost_block(&self, pc: Address) -> Option<(Address, u64)>
    {
        let (start, function) = self.function_at(pc)?;
        let function_end = start.value() + function.size;
        let innermost = self
            .blocks
            .iter()
            .filter(|(block_start, size)| {
                *block_start >= start
                    && block_start.value() + size <= function_end
                    && pc >= *block_start
                    && pc.value() - block_start.value() < *size
            })
            .min_by_key(|(_, size)| *size)
            .copied();
        Some(innermost.unwrap_or((start, function.size)))
    }
}

impl SymbolResolver for SymbolMap
{
    fn function_start(&self, pc: Address) -> Option<Address>
    {
        self.function_at(pc).map(|(start, _)| start)
    }

    fn function_name(&self, pc: Address) -> Option<String>
    {
        self.function_at(pc).map(|(_, function)| function.demangled.clone())
    }

    fn main_function(&self) -> Option<Address>
    {
        self.functions
            .iter()
            .find(|(_, function)| function.demangled == self.main_name)
            .map(|(start, _)| *start)
    }

    fn entry_point(&self) -> Option<Address>
    {
        self.entry_point
    }

    fn block_contained_in(&self, inner_pc: Address, outer_pc: Address) -> Option<bool>
    {
        let (inner_start, inner_size) = self.innermost_block(inner_pc)?;
        let (outer_start, outer_size) = self.innermost_block(outer_pc)?;
        Some(inner_start >= outer_start && inner_start.value() + inner_size <= outer_start.value() + outer_size)
    }
}
