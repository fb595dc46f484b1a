//! Building the frame chain.
//!
//! ## Predecessor states
//!
//! A frame's predecessor is attempted at most once per generation. The
//! attempt is recorded *before* any unwinder runs, so a re-entrant request
//! for the same predecessor (an unwinder looking up a symbol that needs the
//! selected frame, say) sees "attempted, nothing yet" instead of recursing.
//!
//! Once attempted, the frame carries a stop reason. Structural problems
//! (`SameId`, `InnerId`, `NoSavedPc`) and memory read failures end the chain
//! with a reason; backtrace policy (main, entry point, limit, zero PC) ends a
//! walk without touching the frame, so relaxing the policy later just works.

use std::rc::Rc;

use tracing::{debug, trace};

use super::{FrameCache, FrameNode, FrameRef, IdState};
use crate::error::{FrameError, FrameResult, UnwindError};
use crate::frame_id::FrameId;
use crate::types::{Address, Cached};
use crate::unwind::{FrameType, UnwindStopReason, Unwinder};

impl FrameCache
{
    /// Bind an unwinder to `frame` if it has none, probing the priority list.
    pub(crate) fn ensure_unwinder(&mut self, frame: FrameRef) -> FrameResult<Rc<dyn Unwinder>>
    {
        let node = self.node(frame)?;
        if let Some(unwinder) = &node.unwinder {
            return Ok(Rc::clone(unwinder));
        }
        let level = node.level;

        let candidates = self.unwinders.clone();
        for candidate in candidates {
            // Bound while probing so nested queries see the candidate.
            self.node_mut(frame)?.unwinder = Some(Rc::clone(&candidate));

            match candidate.sniff(self, frame) {
                Ok(true) => {
                    trace!(level, unwinder = candidate.name(), "unwinder bound");
                    return Ok(candidate);
                }
                Ok(false) => {}
                Err(FrameError::Unwind(UnwindError::Unavailable(what))) => {
                    trace!(level, unwinder = candidate.name(), %what, "sniffer lacked data, skipping");
                }
                Err(err) => {
                    self.release_unwinder(frame)?;
                    return Err(err);
                }
            }

            self.release_unwinder(frame)?;
            // The function cache depends on the unwinder (address_in_block).
            self.node_mut(frame)?.prev_func = Cached::Unknown;
        }

        Err(FrameError::NoUnwinder { level })
    }

    /// Type of `frame`, binding its unwinder if needed.
    ///
    /// ## Errors
    ///
    /// `FrameError::NoUnwinder` if no unwinder accepts the frame.
    pub fn frame_type(&mut self, frame: FrameRef) -> FrameResult<FrameType>
    {
        Ok(self.ensure_unwinder(frame)?.frame_type())
    }

    /// Identity of `frame`.
    ///
    /// Identities of older frames are computed when they're linked in; the
    /// innermost frame's identity is computed (and stashed) on first request.
    ///
    /// ## Errors
    ///
    /// Whatever the unwinder reports while computing the identity.
    ///
    /// ## Panics
    ///
    /// Panics when called re-entrantly for a frame whose identity is being
    /// computed: an unwinder must never depend on the identity it produces.
    pub fn get_identity(&mut self, frame: FrameRef) -> FrameResult<FrameId>
    {
        let node = self.node(frame)?;
        match node.this_id {
            IdState::Computed(id) => return Ok(id),
            IdState::Computing => panic!(
                "re-entrant identity computation for frame #{}",
                node.level
            ),
            IdState::NotComputed => {}
        }

        let level = node.level;
        assert!(level == 0, "frame #{level} was linked without an identity");

        let id = self.compute_identity(frame)?;
        let stashed = self.stash.insert(id, frame.index);
        assert!(stashed, "innermost frame {id} collides with a stashed frame");
        Ok(id)
    }

    fn compute_identity(&mut self, frame: FrameRef) -> FrameResult<FrameId>
    {
        let entry_generation = self.generation;
        let node = self.node_mut(frame)?;
        assert!(matches!(node.this_id, IdState::NotComputed));
        node.this_id = IdState::Computing;
        let level = node.level;

        match self.compute_identity_inner(frame) {
            Ok(id) => {
                self.node_mut(frame)?.this_id = IdState::Computed(id);
                trace!(level, %id, "computed frame identity");
                Ok(id)
            }
            Err(err) => {
                // A nested invalidation already threw this frame away.
                if self.generation == entry_generation {
                    self.node_mut(frame)?.this_id = IdState::NotComputed;
                }
                Err(err)
            }
        }
    }

    fn compute_identity_inner(&mut self, frame: FrameRef) -> FrameResult<FrameId>
    {
        let unwinder = self.ensure_unwinder(frame)?;
        let id = unwinder.this_id(self, frame)?.unwrap_or(FrameId::OUTER);
        assert!(id.is_valid(), "unwinder {} produced the null identity", unwinder.name());
        Ok(id)
    }

    /// Allocate the frame older than `frame` and link it in.
    fn link_prev(&mut self, frame: FrameRef) -> FrameResult<FrameRef>
    {
        let mut prev = FrameNode::new(self.node(frame)?.level + 1);
        prev.next = Some(frame.index);
        let prev = self.push_node(prev);
        self.node_mut(frame)?.prev = Some(prev.index);
        Ok(prev)
    }

    fn unlink_prev(&mut self, frame: FrameRef, prev: FrameRef) -> FrameResult<()>
    {
        self.node_mut(prev)?.next = None;
        self.node_mut(frame)?.prev = None;
        Ok(())
    }

    /// Link in the predecessor of `frame`, refusing it if its identity is
    /// already in the chain.
    fn prev_if_no_cycle(&mut self, frame: FrameRef) -> FrameResult<Option<FrameRef>>
    {
        let prev = self.link_prev(frame)?;

        // The innermost frame's identity is computed lazily: unwinding the
        // sentinel must always produce a frame.
        if self.node(prev)?.level == 0 {
            return Ok(Some(prev));
        }

        let entry_generation = self.generation;
        match self.compute_identity(prev) {
            Ok(id) => {
                if self.stash.insert(id, prev.index) {
                    return Ok(Some(prev));
                }
                let node = self.node_mut(frame)?;
                node.stop_reason = UnwindStopReason::SameId;
                debug!(level = node.level, %id, "previous frame has the same identity, stopping");
                self.unlink_prev(frame, prev)?;
                Ok(None)
            }
            Err(err) => {
                if self.generation == entry_generation {
                    self.unlink_prev(frame, prev)?;
                }
                Err(err)
            }
        }
    }

    fn stop(&mut self, frame: FrameRef, reason: UnwindStopReason) -> FrameResult<Option<FrameRef>>
    {
        let node = self.node_mut(frame)?;
        node.stop_reason = reason;
        node.prev = None;
        debug!(level = node.level, reason = reason.name(), "unwinding stopped");
        Ok(None)
    }

    /// Produce the predecessor of `frame`, without backtrace policy and
    /// without absorbing memory errors.
    pub(crate) fn materialize(&mut self, frame: FrameRef) -> FrameResult<Option<FrameRef>>
    {
        let node = self.node(frame)?;
        if node.prev_attempted {
            trace!(level = node.level, "previous frame cached");
            return Ok(node.prev.map(|index| self.handle(index)));
        }

        let unwinder = self.ensure_unwinder(frame)?;

        let node = self.node_mut(frame)?;
        node.prev_attempted = true;
        node.stop_reason = UnwindStopReason::NoReason;
        let level = node.level;

        // The checks below were done when the real frame hosting this
        // inlined one was unwound.
        let this_type = unwinder.frame_type();
        if this_type == FrameType::Inline {
            return self.prev_if_no_cycle(frame);
        }

        let reason = unwinder.stop_reason(self, frame)?;
        if reason != UnwindStopReason::NoReason {
            return self.stop(frame, reason);
        }

        let next = self.next_of(frame)?;

        if this_type == FrameType::Normal && self.frame_type(next)? == FrameType::Normal {
            let this_id = self.get_identity(frame)?;
            let next_id = self.get_identity(next)?;
            let arch = self.frame_arch(next)?;
            if this_id.inner_than(&next_id, arch, self.symbols.as_ref()) {
                let pc = self.address_in_block(frame)?;
                if self.symbols.is_stack_switch_helper(pc) {
                    trace!(level, %pc, "inner identity inside a stack-switch helper, continuing");
                } else {
                    return self.stop(frame, UnwindStopReason::InnerId);
                }
            }
        }

        if level > 0 && this_type == FrameType::Normal {
            let arch = self.frame_arch(frame)?;
            if let Some(pc_register) = arch.pc_register() {
                let next_type = self.frame_type(next)?;
                if matches!(next_type, FrameType::Normal | FrameType::Inline) {
                    let this_slot = self.register_save_location(frame, pc_register)?;
                    let next_slot = self.register_save_location(next, pc_register)?;
                    if this_slot.same_slot(next_slot) {
                        return self.stop(frame, UnwindStopReason::NoSavedPc);
                    }
                }
            }
        }

        self.prev_if_no_cycle(frame)
    }

    /// End the chain at `frame` after a memory read failure, taking back a
    /// predecessor that was already linked in.
    fn stop_on_memory_error(&mut self, frame: FrameRef, err: &FrameError) -> FrameResult<Option<FrameRef>>
    {
        if let Some(index) = self.node(frame)?.prev {
            let prev = self.handle(index);
            if let IdState::Computed(id) = self.node(prev)?.this_id {
                if self.stash.find(&id) == Some(&index) {
                    self.stash.remove(&id);
                }
            }
            self.unlink_prev(frame, prev)?;
        }

        let node = self.node_mut(frame)?;
        node.prev_attempted = true;
        node.stop_reason = UnwindStopReason::MemoryError;
        node.stop_string = Some(err.to_string());
        debug!(level = node.level, error = %err, "unwinding stopped by memory error");
        Ok(None)
    }

    /// Predecessor of `frame` without backtrace policy.
    ///
    /// Memory read failures end the chain with
    /// [`UnwindStopReason::MemoryError`] and the failure's message as the
    /// stop diagnostic.
    ///
    /// ## Errors
    ///
    /// Any other failure while unwinding.
    pub fn prev_always(&mut self, frame: FrameRef) -> FrameResult<Option<FrameRef>>
    {
        match self.materialize(frame) {
            Err(err) if err.is_memory_error() => self.stop_on_memory_error(frame, &err),
            result => result,
        }
    }

    /// Predecessor (caller) of `frame`.
    ///
    /// With `apply_policy`, the walk also ends (without marking the frame)
    /// when `frame` is `main` and unwinding past main is off, when the
    /// backtrace limit is reached, when the predecessor is the entry
    /// function and unwinding past the entry point is off, or when a normal
    /// frame's caller has a zero PC. A memory read failure while checking
    /// the policy ends the chain at `frame` like one during unwinding.
    ///
    /// ## Errors
    ///
    /// Failures while unwinding other than memory read failures.
    pub fn get_previous(&mut self, frame: FrameRef, apply_policy: bool) -> FrameResult<Option<FrameRef>>
    {
        if !apply_policy {
            return self.prev_always(frame);
        }

        match self.prev_with_policy(frame) {
            Err(err) if err.is_memory_error() => self.stop_on_memory_error(frame, &err),
            result => result,
        }
    }

    fn prev_with_policy(&mut self, frame: FrameRef) -> FrameResult<Option<FrameRef>>
    {
        let level = self.level(frame)?;

        // Stash the innermost frame before its predecessor, or cycle
        // detection can't see a loop back to it.
        if level == 0 {
            self.get_identity(frame)?;
        }

        let this_type = self.frame_type(frame)?;
        let this_pc = self.frame_pc_if_available(frame)?;
        let options = self.options;

        if level >= 0
            && this_type == FrameType::Normal
            && !options.past_main
            && this_pc.is_some()
            && self.inside_main_func(frame)?
        {
            debug!(level, "inside main func, stopping");
            return Ok(None);
        }

        if options.limit.reached_at(level) {
            debug!(level, limit = %options.limit, "backtrace limit exceeded, stopping");
            return Ok(None);
        }

        let Some(prev) = self.prev_always(frame)? else {
            return Ok(None);
        };

        let prev_type = self.frame_type(prev)?;
        let prev_pc = self.frame_pc_if_available(prev)?;

        if prev_type == FrameType::Normal
            && !options.past_entry
            && prev_pc.is_some()
            && self.inside_entry_func(prev)?
        {
            debug!(level, "previous frame is the entry function, stopping");
            return Ok(None);
        }

        if this_type == FrameType::Normal && prev_type == FrameType::Normal && prev_pc == Some(Address::ZERO)
        {
            debug!(level, "previous frame has a zero PC, stopping");
            return Ok(None);
        }

        Ok(Some(prev))
    }

    fn inside_main_func(&mut self, frame: FrameRef) -> FrameResult<bool>
    {
        let Some(main) = self.symbols.main_function() else {
            return Ok(false);
        };
        Ok(self.frame_function(frame)? == Some(main))
    }

    fn inside_entry_func(&mut self, frame: FrameRef) -> FrameResult<bool>
    {
        let Some(entry) = self.symbols.entry_point() else {
            return Ok(false);
        };
        Ok(self.frame_function(frame)? == Some(entry))
    }

    /// Skip inline and tail-call frames, returning the first real frame at or
    /// beyond `frame`; `None` if the chain ends first.
    ///
    /// ## Errors
    ///
    /// Failures while unwinding.
    pub fn skip_artificial_frames(&mut self, frame: FrameRef) -> FrameResult<Option<FrameRef>>
    {
        let mut frame = frame;
        while self.frame_type(frame)?.is_artificial() {
            match self.prev_always(frame)? {
                Some(prev) => frame = prev,
                None => return Ok(None),
            }
        }
        Ok(Some(frame))
    }

    /// Identity of the first real frame at or beyond `frame`, or the null
    /// identity.
    ///
    /// ## Errors
    ///
    /// Failures while unwinding.
    pub fn stack_frame_id(&mut self, frame: FrameRef) -> FrameResult<FrameId>
    {
        match self.skip_artificial_frames(frame)? {
            Some(real) => self.get_identity(real),
            None => Ok(FrameId::NULL),
        }
    }

    /// Identity of the real caller of `frame`, skipping artificial frames on
    /// both sides. Ignores backtrace policy.
    ///
    /// ## Errors
    ///
    /// Failures while unwinding.
    pub fn caller_id(&mut self, frame: FrameRef) -> FrameResult<FrameId>
    {
        let Some(real) = self.skip_artificial_frames(frame)? else {
            return Ok(FrameId::NULL);
        };
        match self.prev_always(real)? {
            Some(caller) => self.stack_frame_id(caller),
            None => Ok(FrameId::NULL),
        }
    }

    /// PC the first real frame at or beyond `frame` returns to; `None` when
    /// the chain holds only artificial frames.
    ///
    /// ## Errors
    ///
    /// Failures while unwinding, including an unavailable PC.
    pub fn caller_pc(&mut self, frame: FrameRef) -> FrameResult<Option<Address>>
    {
        match self.skip_artificial_frames(frame)? {
            Some(real) => Ok(Some(self.unwind_pc(real)?)),
            None => Ok(None),
        }
    }
}
