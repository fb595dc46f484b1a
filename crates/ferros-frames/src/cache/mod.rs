//! # Frame Cache
//!
//! The frame cache owns every frame of the stopped thread: a chain anchored by
//! a synthetic *sentinel* frame (the live registers), extended outward one
//! frame at a time as callers ask for predecessors.
//!
//! ## Lifecycle
//!
//! Frames live in an arena tagged with a generation number. Nothing is ever
//! freed individually: [`FrameCache::invalidate`] drops the whole chain, runs
//! the per-frame cleanup hooks and bumps the generation, which turns every
//! outstanding [`FrameRef`] stale. Whoever resumes the target must invalidate
//! before unwinding again.
//!
//! ## Example
//!
//! ```rust,ignore
//! let mut cache = FrameCache::new(target, symbols, vec![Rc::new(DwarfUnwinder::new())]);
//! let mut frame = cache.current_frame()?;
//! loop {
//!     println!("#{} {:?}", cache.level(frame)?, cache.frame_pc_if_available(frame)?);
//!     match cache.get_previous(frame, true)? {
//!         Some(prev) => frame = prev,
//!         None => break,
//!     }
//! }
//! ```

mod frame;
mod materialize;
mod registers;

use std::rc::Rc;

use tracing::{debug, trace, warn};

pub use self::frame::{FrameDisplay, FrameRef, SENTINEL_LEVEL};
pub(crate) use self::frame::{FrameNode, IdState};
use crate::config::BacktraceOptions;
use crate::error::{FrameError, FrameResult};
use crate::frame_id::FrameId;
use crate::stash::FrameStash;
use crate::symbols::SymbolResolver;
use crate::target::TargetAccess;
use crate::types::Address;
use crate::unwind::{DefaultFrameBase, FrameBase, FrameType, SentinelUnwinder, UnwindStopReason, Unwinder};

/// Frame chain, identity stash and selection for one stopped thread.
pub struct FrameCache
{
    target: Box<dyn TargetAccess>,
    symbols: Box<dyn SymbolResolver>,
    unwinders: Vec<Rc<dyn Unwinder>>,
    sentinel_unwinder: Rc<dyn Unwinder>,
    base: Rc<dyn FrameBase>,
    options: BacktraceOptions,
    frames: Vec<FrameNode>,
    stash: FrameStash<u32>,
    generation: u32,
    sentinel: Option<u32>,
    selected: Option<u32>,
}

impl FrameCache
{
    /// Create an empty cache.
    ///
    /// `unwinders` is the priority list probed, in order, for every frame.
    pub fn new(
        target: Box<dyn TargetAccess>,
        symbols: Box<dyn SymbolResolver>,
        unwinders: Vec<Rc<dyn Unwinder>>,
    ) -> Self
    {
        Self {
            target,
            symbols,
            unwinders,
            sentinel_unwinder: Rc::new(SentinelUnwinder),
            base: Rc::new(DefaultFrameBase),
            options: BacktraceOptions::default(),
            frames: Vec::new(),
            stash: FrameStash::new(),
            generation: 0,
            sentinel: None,
            selected: None,
        }
    }

    /// Use `options` for policy-filtered walks.
    #[must_use]
    pub fn with_options(mut self, options: BacktraceOptions) -> Self
    {
        self.options = options;
        self
    }

    /// Use `base` to compute frame base addresses.
    #[must_use]
    pub fn with_frame_base(mut self, base: Rc<dyn FrameBase>) -> Self
    {
        self.base = base;
        self
    }

    /// Current backtrace options.
    pub fn options(&self) -> BacktraceOptions
    {
        self.options
    }

    /// Change the backtrace options. Takes effect on the next walk.
    pub fn set_options(&mut self, options: BacktraceOptions)
    {
        self.options = options;
    }

    /// The register and memory provider.
    pub fn target(&self) -> &dyn TargetAccess
    {
        self.target.as_ref()
    }

    /// Mutable access to the provider.
    ///
    /// Writing registers or memory through it invalidates what the cache
    /// knows; call [`FrameCache::invalidate`] afterwards.
    pub fn target_mut(&mut self) -> &mut dyn TargetAccess
    {
        self.target.as_mut()
    }

    /// The symbol resolver.
    pub fn symbols(&self) -> &dyn SymbolResolver
    {
        self.symbols.as_ref()
    }

    /// Current generation; bumped by every invalidation.
    pub fn generation(&self) -> u32
    {
        self.generation
    }

    /// Number of frames stashed by identity.
    pub fn stash_len(&self) -> usize
    {
        self.stash.len()
    }

    /// Handle to the sentinel frame, if the chain has been started.
    pub fn sentinel(&self) -> Option<FrameRef>
    {
        self.sentinel.map(|index| self.handle(index))
    }

    fn handle(&self, index: u32) -> FrameRef
    {
        FrameRef {
            generation: self.generation,
            index,
        }
    }

    pub(crate) fn node(&self, frame: FrameRef) -> FrameResult<&FrameNode>
    {
        if frame.generation != self.generation {
            return Err(FrameError::StaleFrame {
                frame_generation: frame.generation,
                cache_generation: self.generation,
            });
        }
        self.frames.get(frame.index as usize).ok_or(FrameError::StaleFrame {
            frame_generation: frame.generation,
            cache_generation: self.generation,
        })
    }

    pub(crate) fn node_mut(&mut self, frame: FrameRef) -> FrameResult<&mut FrameNode>
    {
        let cache_generation = self.generation;
        if frame.generation != cache_generation {
            return Err(FrameError::StaleFrame {
                frame_generation: frame.generation,
                cache_generation,
            });
        }
        self.frames.get_mut(frame.index as usize).ok_or(FrameError::StaleFrame {
            frame_generation: frame.generation,
            cache_generation,
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn push_node(&mut self, node: FrameNode) -> FrameRef
    {
        let index = self.frames.len() as u32;
        self.frames.push(node);
        self.handle(index)
    }

    /// Level of `frame`: 0 for the innermost frame, [`SENTINEL_LEVEL`] for
    /// the sentinel.
    ///
    /// ## Errors
    ///
    /// `FrameError::StaleFrame` for a handle from an earlier generation.
    pub fn level(&self, frame: FrameRef) -> FrameResult<i32>
    {
        Ok(self.node(frame)?.level)
    }

    /// The younger neighbour of `frame`; `None` for the innermost frame (the
    /// sentinel is never exposed this way).
    ///
    /// ## Errors
    ///
    /// `FrameError::StaleFrame` for a handle from an earlier generation.
    pub fn get_next(&self, frame: FrameRef) -> FrameResult<Option<FrameRef>>
    {
        let node = self.node(frame)?;
        if node.level > 0 {
            Ok(node.next.map(|index| self.handle(index)))
        } else {
            Ok(None)
        }
    }

    /// The younger neighbour including the sentinel. Every linked frame has
    /// one; the sentinel is its own.
    pub(crate) fn next_of(&self, frame: FrameRef) -> FrameResult<FrameRef>
    {
        let node = self.node(frame)?;
        match node.next {
            Some(index) => Ok(self.handle(index)),
            None => panic!("frame #{} is not linked into the frame chain", node.level),
        }
    }

    /// Render `frame` for debug output without computing anything.
    ///
    /// ## Errors
    ///
    /// `FrameError::StaleFrame` for a handle from an earlier generation.
    pub fn display(&self, frame: FrameRef) -> FrameResult<FrameDisplay<'_>>
    {
        let node = self.node(frame)?;
        let next = node.next.and_then(|index| self.frames.get(index as usize));
        Ok(FrameDisplay { node, next })
    }

    /// Stored unwinder data for `frame`, if it has the requested type.
    ///
    /// ## Errors
    ///
    /// `FrameError::StaleFrame` for a handle from an earlier generation.
    pub fn unwinder_data<T: 'static>(&self, frame: FrameRef) -> FrameResult<Option<&T>>
    {
        Ok(self.node(frame)?.unwinder_data.as_ref().and_then(|data| data.downcast_ref::<T>()))
    }

    /// Store unwinder data for `frame`, replacing anything stored before.
    ///
    /// ## Errors
    ///
    /// `FrameError::StaleFrame` for a handle from an earlier generation.
    pub fn set_unwinder_data<T: 'static>(&mut self, frame: FrameRef, data: T) -> FrameResult<()>
    {
        self.node_mut(frame)?.unwinder_data = Some(Box::new(data));
        Ok(())
    }

    /// Stored frame-base data for `frame`, if it has the requested type.
    ///
    /// ## Errors
    ///
    /// `FrameError::StaleFrame` for a handle from an earlier generation.
    pub fn base_data<T: 'static>(&self, frame: FrameRef) -> FrameResult<Option<&T>>
    {
        Ok(self.node(frame)?.base_data.as_ref().and_then(|data| data.downcast_ref::<T>()))
    }

    /// Store frame-base data for `frame`.
    ///
    /// ## Errors
    ///
    /// `FrameError::StaleFrame` for a handle from an earlier generation.
    pub fn set_base_data<T: 'static>(&mut self, frame: FrameRef, data: T) -> FrameResult<()>
    {
        self.node_mut(frame)?.base_data = Some(Box::new(data));
        Ok(())
    }

    /// Returns `true` if the target has registers, a stack and memory.
    pub fn has_stack_frames(&self) -> bool
    {
        self.target.has_registers() && self.target.has_stack() && self.target.has_memory()
    }

    fn check_target(&self) -> FrameResult<()>
    {
        if !self.target.has_registers() {
            return Err(FrameError::NoRegisters);
        }
        if !self.target.has_stack() {
            return Err(FrameError::NoStack);
        }
        if !self.target.has_memory() {
            return Err(FrameError::NoMemory);
        }
        Ok(())
    }

    fn create_sentinel(&mut self) -> FrameRef
    {
        let mut node = FrameNode::new(SENTINEL_LEVEL);
        node.unwinder = Some(Rc::clone(&self.sentinel_unwinder));
        node.this_id = IdState::Computed(FrameId::SENTINEL);
        let sentinel = self.push_node(node);
        self.frames[sentinel.index as usize].next = Some(sentinel.index);
        self.sentinel = Some(sentinel.index);
        trace!(generation = self.generation, "created sentinel frame");
        sentinel
    }

    /// The innermost frame (level 0), creating the sentinel if needed.
    ///
    /// ## Errors
    ///
    /// `NoRegisters`, `NoStack` or `NoMemory` when the target can't be
    /// unwound at all.
    ///
    /// ## Panics
    ///
    /// Panics if the sentinel frame yields no innermost frame.
    pub fn current_frame(&mut self) -> FrameResult<FrameRef>
    {
        self.check_target()?;

        let sentinel = match self.sentinel {
            Some(index) => self.handle(index),
            None => self.create_sentinel(),
        };

        match self.materialize(sentinel)? {
            Some(current) => Ok(current),
            None => panic!("the sentinel frame did not produce an innermost frame"),
        }
    }

    /// Throw every frame away.
    ///
    /// Runs unwinder and frame-base cleanup hooks for every allocated frame,
    /// empties the stash, clears the selection and bumps
    /// the generation, so all outstanding handles become stale.
    pub fn invalidate(&mut self)
    {
        self.generation = self.generation.wrapping_add(1);

        // Frames dropped from the chain (a rejected cycle, say) still hold data.
        for node in &mut self.frames {
            if let Some(data) = node.unwinder_data.take() {
                if let Some(unwinder) = &node.unwinder {
                    unwinder.dealloc_cache(node.level, data);
                }
            }
            if let Some(data) = node.base_data.take() {
                self.base.dealloc_cache(node.level, data);
            }
        }

        let had_frames = self.sentinel.is_some();
        self.frames.clear();
        self.stash.clear();
        self.sentinel = None;
        self.selected = None;

        debug!(generation = self.generation, had_frames, "frame cache invalidated");
    }

    /// Find the frame with identity `id`.
    ///
    /// Tries the stash first, then walks outward from the innermost frame
    /// (applying backtrace policy). The walk gives up early once stack
    /// addresses show that no older frame can match.
    ///
    /// ## Errors
    ///
    /// Failures unwinding the chain.
    pub fn find_by_id(&mut self, id: FrameId) -> FrameResult<Option<FrameRef>>
    {
        if !id.is_valid() {
            return Ok(None);
        }

        if id == FrameId::SENTINEL {
            return Ok(self.sentinel());
        }

        if let Some(&index) = self.stash.find(&id) {
            trace!(%id, "frame found in stash");
            return Ok(Some(self.handle(index)));
        }

        let mut frame = self.current_frame()?;
        loop {
            let this_id = self.get_identity(frame)?;
            if id == this_id {
                return Ok(Some(frame));
            }

            let Some(prev) = self.get_previous(frame, true)? else {
                return Ok(None);
            };

            // Stack addresses only order adjacent normal frames.
            if self.frame_type(frame)? == FrameType::Normal {
                let this_arch = self.frame_arch(frame)?;
                let prev_arch = self.frame_arch(prev)?;
                let prev_id = self.get_identity(prev)?;
                if !id.inner_than(&this_id, this_arch, self.symbols.as_ref())
                    && id.inner_than(&prev_id, prev_arch, self.symbols.as_ref())
                {
                    trace!(%id, "frame can't be further out, stopping search");
                    return Ok(None);
                }
            }

            frame = prev;
        }
    }

    /// Identity of the policy-filtered predecessor of the frame with
    /// identity `id`, or the null identity.
    ///
    /// ## Errors
    ///
    /// Failures unwinding the chain.
    pub fn previous_id_of(&mut self, id: FrameId) -> FrameResult<FrameId>
    {
        let Some(frame) = self.find_by_id(id)? else {
            return Ok(FrameId::NULL);
        };
        match self.get_previous(frame, true)? {
            Some(prev) => self.get_identity(prev),
            None => Ok(FrameId::NULL),
        }
    }

    /// Why `frame` has no predecessor, attempting the unwind if needed.
    ///
    /// ## Errors
    ///
    /// Failures unwinding `frame`.
    pub fn stop_reason(&mut self, frame: FrameRef) -> FrameResult<UnwindStopReason>
    {
        self.prev_always(frame)?;
        Ok(self.node(frame)?.stop_reason)
    }

    /// Human-readable stop reason, preferring the captured diagnostic.
    ///
    /// ## Errors
    ///
    /// Failures unwinding `frame`.
    pub fn stop_reason_string(&mut self, frame: FrameRef) -> FrameResult<String>
    {
        let reason = self.stop_reason(frame)?;
        let node = self.node(frame)?;
        Ok(node
            .stop_string
            .clone()
            .unwrap_or_else(|| reason.description().to_string()))
    }

    /// Base address of `frame`, via the frame base provider.
    ///
    /// ## Errors
    ///
    /// Failures unwinding `frame`.
    pub fn frame_base_address(&mut self, frame: FrameRef) -> FrameResult<Address>
    {
        let base = Rc::clone(&self.base);
        base.base_address(self, frame)
    }

    /// Locals anchor of `frame`.
    ///
    /// ## Errors
    ///
    /// Failures unwinding `frame`.
    pub fn frame_locals_address(&mut self, frame: FrameRef) -> FrameResult<Address>
    {
        let base = Rc::clone(&self.base);
        base.locals_address(self, frame)
    }

    /// Arguments anchor of `frame`.
    ///
    /// ## Errors
    ///
    /// Failures unwinding `frame`.
    pub fn frame_args_address(&mut self, frame: FrameRef) -> FrameResult<Address>
    {
        let base = Rc::clone(&self.base);
        base.args_address(self, frame)
    }

    /// Make `frame` the selected frame, or clear the selection.
    ///
    /// ## Errors
    ///
    /// `FrameError::StaleFrame` for a handle from an earlier generation.
    pub fn select_frame(&mut self, frame: Option<FrameRef>) -> FrameResult<()>
    {
        self.selected = match frame {
            Some(frame) => {
                self.node(frame)?;
                Some(frame.index)
            }
            None => None,
        };
        Ok(())
    }

    /// The selected frame, selecting the innermost frame if nothing is.
    ///
    /// ## Errors
    ///
    /// See [`FrameCache::current_frame`].
    pub fn selected_frame(&mut self) -> FrameResult<FrameRef>
    {
        if let Some(index) = self.selected {
            return Ok(self.handle(index));
        }
        let current = self.current_frame()?;
        self.selected = Some(current.index);
        Ok(current)
    }

    /// The selected frame, without selecting one.
    pub fn selected_frame_if_set(&self) -> Option<FrameRef>
    {
        self.selected.map(|index| self.handle(index))
    }

    /// Identity of the selected frame; the null identity if none is selected.
    ///
    /// ## Errors
    ///
    /// Failures computing the identity.
    pub fn selected_frame_id(&mut self) -> FrameResult<FrameId>
    {
        match self.selected_frame_if_set() {
            Some(frame) => self.get_identity(frame),
            None => Ok(FrameId::NULL),
        }
    }

    /// Re-select the frame with identity `id` after the chain was rebuilt.
    ///
    /// If the frame can't be found the selection is left empty.
    ///
    /// ## Errors
    ///
    /// Failures unwinding the chain.
    pub fn restore_selected_frame(&mut self, id: FrameId) -> FrameResult<()>
    {
        match self.find_by_id(id)? {
            Some(frame) => self.select_frame(Some(frame)),
            None => {
                warn!(%id, "Unable to restore previously selected frame");
                self.selected = None;
                Ok(())
            }
        }
    }

    /// Pop `frame`: make its caller the innermost frame by writing the
    /// caller's registers back to the target.
    ///
    /// Tail-call frames above `frame` are skipped; they already returned.
    /// All caller registers are read before any is written, then the cache
    /// is invalidated, also when a write fails.
    ///
    /// ## Errors
    ///
    /// `CannotPopInitialFrame` if `frame` has no caller, `CannotFindCaller`
    /// if only tail-call frames follow, `RegisterWrite` if the target rejects
    /// a register.
    pub fn pop(&mut self, frame: FrameRef) -> FrameResult<()>
    {
        let Some(mut caller) = self.prev_always(frame)? else {
            return Err(FrameError::CannotPopInitialFrame);
        };

        while self.frame_type(caller)? == FrameType::Tailcall {
            caller = match self.get_previous(caller, true)? {
                Some(prev) => prev,
                None => return Err(FrameError::CannotFindCaller),
            };
        }

        let arch = self.frame_arch(caller)?;
        let mut snapshot = Vec::new();
        for register in arch.registers() {
            let value = self.frame_register(caller, register)?;
            snapshot.push((register, value.as_u64()));
        }

        debug!(level = self.level(frame)?, registers = snapshot.len(), "popping frame");

        let written = snapshot
            .into_iter()
            .filter_map(|(register, value)| Some((register, value?)))
            .try_for_each(|(register, value)| {
                self.target
                    .write_register(register, value)
                    .map_err(|err| FrameError::RegisterWrite {
                        register,
                        details: err.to_string(),
                    })
            });

        // Some registers may have changed even if a later write failed.
        self.invalidate();
        written
    }

    pub(crate) fn release_unwinder(&mut self, frame: FrameRef) -> FrameResult<()>
    {
        let node = self.node_mut(frame)?;
        let level = node.level;
        let unwinder = node.unwinder.take();
        let data = node.unwinder_data.take();
        if let (Some(unwinder), Some(data)) = (unwinder, data) {
            unwinder.dealloc_cache(level, data);
        }
        Ok(())
    }
}
