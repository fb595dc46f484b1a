//! The sentinel unwinder.
//!
//! The sentinel frame sits one step younger than the innermost real frame.
//! "Unwinding" it means reading the live registers of the target, so the
//! innermost frame is unwound exactly like every other frame.

use gimli::Register;

use super::{FrameType, Unwinder};
use crate::cache::{FrameCache, FrameRef};
use crate::error::{FrameResult, UnwindError};
use crate::frame_id::FrameId;
use crate::types::{Architecture, RegisterLocation, RegisterValue};

/// Unwinder bound to the sentinel frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct SentinelUnwinder;

impl Unwinder for SentinelUnwinder
{
    fn name(&self) -> &'static str
    {
        "sentinel"
    }

    fn frame_type(&self) -> FrameType
    {
        FrameType::Sentinel
    }

    fn sniff(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<bool>
    {
        Ok(cache.sentinel() == Some(frame))
    }

    fn this_id(&self, _cache: &mut FrameCache, _frame: FrameRef) -> FrameResult<Option<FrameId>>
    {
        Ok(Some(FrameId::SENTINEL))
    }

    fn prev_register(&self, cache: &mut FrameCache, _frame: FrameRef, register: Register) -> FrameResult<RegisterValue>
    {
        match cache.target().read_register(register) {
            Ok(value) => Ok(RegisterValue::in_register(value, register)),
            Err(UnwindError::Unavailable(_)) => Ok(RegisterValue::unavailable(RegisterLocation::Register(register))),
            Err(err) => Err(err.into()),
        }
    }

    fn prev_arch(&self, cache: &mut FrameCache, _frame: FrameRef) -> FrameResult<Option<Architecture>>
    {
        Ok(Some(cache.target().architecture()))
    }
}
