//! # ferros-frames
//!
//! Lazy stack-frame cache for the Ferros debugger.
//!
//! When a thread stops, the debugger needs its call stack, but usually only
//! the top few frames. This crate builds the chain of frames on demand:
//!
//! - a synthetic *sentinel* frame wraps the live registers of the target
//! - each older frame is produced by asking an [`Unwinder`] how the younger
//!   one was called
//! - every frame gets a [`FrameId`] so it can be found again after the chain
//!   is rebuilt
//! - stack corruption (cycles, unwinding backwards, unreadable memory) ends
//!   the chain with an [`UnwindStopReason`] instead of an error
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use ferros_frames::prelude::*;
//!
//! let mut cache = FrameCache::new(Box::new(target), Box::new(symbols), vec![Rc::new(my_unwinder)]);
//! let current = cache.current_frame()?;
//! let caller = cache.get_previous(current, true)?;
//! ```
//!
//! ## Environment Variables
//!
//! - `FERROS_BACKTRACE_LIMIT`, `FERROS_BACKTRACE_PAST_MAIN`,
//!   `FERROS_BACKTRACE_PAST_ENTRY`: see [`config`]
//!
//! Frame cache tracing is emitted under the `ferros_frames` target; see
//! `ferros-utils` for subscriber setup.

pub mod cache;
pub mod config;
pub mod error;
pub mod frame_id;
pub mod prelude;
pub mod stash;
pub mod symbols;
pub mod target;
pub mod types;
pub mod unwind;

pub use cache::{FrameCache, FrameRef};
pub use error::{FrameError, FrameResult, UnwindError};
pub use frame_id::{FrameId, StackStatus};
pub use unwind::{FrameBase, FrameType, UnwindStopReason, Unwinder};
