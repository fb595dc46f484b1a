//! Frame base providers.
//!
//! Debug info describes locals and arguments relative to a frame base. A
//! [`FrameBase`] computes those anchors for a frame; [`DefaultFrameBase`]
//! uses the stack address of the frame's identity, which is the CFA for most
//! unwinders.

use std::any::Any;

use crate::cache::{FrameCache, FrameRef};
use crate::error::FrameResult;
use crate::types::Address;

/// Computes a frame's base, locals and arguments addresses.
pub trait FrameBase
{
    /// Base address of `frame`.
    ///
    /// ## Errors
    ///
    /// Failures unwinding or reading the target.
    fn base_address(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<Address>;

    /// Address locals are described relative to.
    ///
    /// ## Errors
    ///
    /// Failures unwinding or reading the target.
    fn locals_address(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<Address>
    {
        self.base_address(cache, frame)
    }

    /// Address arguments are described relative to.
    ///
    /// ## Errors
    ///
    /// Failures unwinding or reading the target.
    fn args_address(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<Address>
    {
        self.base_address(cache, frame)
    }

    /// Release per-frame data stored in the frame's base data slot.
    fn dealloc_cache(&self, _level: i32, _data: Box<dyn Any>) {}
}

/// Frame base taken from the frame identity's stack address.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFrameBase;

impl FrameBase for DefaultFrameBase
{
    fn base_address(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<Address>
    {
        Ok(cache.get_identity(frame)?.stack_addr())
    }
}
