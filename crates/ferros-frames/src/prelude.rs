//! Common module for library exports

pub use gimli::Register;

pub use crate::cache::{FrameCache, FrameRef};
pub use crate::config::{BacktraceLimit, BacktraceOptions};
pub use crate::error::{FrameError, FrameResult, UnwindError};
pub use crate::frame_id::{FrameId, StackStatus};
pub use crate::symbols::{SymbolMap, SymbolResolver};
pub use crate::target::TargetAccess;
pub use crate::types::{Address, Architecture, RegisterContents, RegisterLocation, RegisterValue};
pub use crate::unwind::{FrameBase, FrameType, UnwindStopReason, Unwinder};
