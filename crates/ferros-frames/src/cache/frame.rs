//! Frame nodes and handles.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use gimli::Register;

use crate::frame_id::FrameId;
use crate::types::{Address, Architecture, Cached, RegisterValue};
use crate::unwind::{UnwindStopReason, Unwinder};

/// Level of the sentinel frame.
pub const SENTINEL_LEVEL: i32 = -1;

/// Opaque handle to a frame in a [`FrameCache`](super::FrameCache).
///
/// Handles are cheap to copy and carry the cache generation they were
/// minted in. Once the cache is invalidated every older handle is stale, and
/// using one returns [`FrameError::StaleFrame`](crate::FrameError::StaleFrame).
/// Keep a [`FrameId`] to find the same frame again after an invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameRef
{
    pub(crate) generation: u32,
    pub(crate) index: u32,
}

impl FrameRef
{
    /// Cache generation this handle belongs to.
    pub const fn generation(self) -> u32
    {
        self.generation
    }
}

/// Identity computation state of a frame.
#[derive(Debug, Clone, Copy)]
pub(crate) enum IdState
{
    NotComputed,
    Computing,
    Computed(FrameId),
}

/// One frame in the arena.
///
/// Fields prefixed `prev_` describe the *older* frame as seen from this one:
/// they are filled in by this frame's unwinder.
pub(crate) struct FrameNode
{
    pub(crate) level: i32,
    pub(crate) next: Option<u32>,
    pub(crate) prev: Option<u32>,
    pub(crate) unwinder: Option<Rc<dyn Unwinder>>,
    pub(crate) unwinder_data: Option<Box<dyn Any>>,
    pub(crate) base_data: Option<Box<dyn Any>>,
    pub(crate) this_id: IdState,
    pub(crate) registers: HashMap<Register, RegisterValue>,
    pub(crate) prev_pc: Cached<Address>,
    pub(crate) prev_func: Cached<Option<Address>>,
    pub(crate) prev_arch: Option<Architecture>,
    pub(crate) prev_attempted: bool,
    pub(crate) stop_reason: UnwindStopReason,
    pub(crate) stop_string: Option<String>,
}

impl FrameNode
{
    pub(crate) fn new(level: i32) -> Self
    {
        Self {
            level,
            next: None,
            prev: None,
            unwinder: None,
            unwinder_data: None,
            base_data: None,
            this_id: IdState::NotComputed,
            registers: HashMap::new(),
            prev_pc: Cached::Unknown,
            prev_func: Cached::Unknown,
            prev_arch: None,
            prev_attempted: false,
            stop_reason: UnwindStopReason::NoReason,
            stop_string: None,
        }
    }
}

/// Debug rendering of a frame, produced by [`FrameCache::display`](super::FrameCache::display).
///
/// Only reads what has already been computed; it never unwinds.
pub struct FrameDisplay<'a>
{
    pub(crate) node: &'a FrameNode,
    pub(crate) next: Option<&'a FrameNode>,
}

impl fmt::Display for FrameDisplay<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{{level={},", self.node.level)?;
        match &self.node.unwinder {
            Some(unwinder) => write!(f, "type={},unwinder=\"{}\",", unwinder.frame_type(), unwinder.name())?,
            None => write!(f, "type=<unknown>,unwinder=<unknown>,")?,
        }

        write!(f, "pc=")?;
        match self.next.map(|next| next.prev_pc) {
            Some(Cached::Value(pc)) => write!(f, "0x{pc:x}")?,
            Some(Cached::NotSaved) => write!(f, "<not saved>")?,
            Some(Cached::Unavailable) => write!(f, "<unavailable>")?,
            Some(Cached::Unknown) | None => write!(f, "<unknown>")?,
        }

        write!(f, ",id=")?;
        match self.node.this_id {
            IdState::NotComputed => write!(f, "<not computed>")?,
            IdState::Computing => write!(f, "<computing>")?,
            IdState::Computed(id) => write!(f, "{id}")?,
        }

        write!(f, ",func=")?;
        match self.next.map(|next| next.prev_func) {
            Some(Cached::Value(Some(func))) => write!(f, "0x{func:x}")?,
            _ => write!(f, "<unknown>")?,
        }
        write!(f, "}}")
    }
}
