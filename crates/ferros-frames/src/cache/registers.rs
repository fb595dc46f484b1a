//! Register, PC, function and architecture caches.
//!
//! Values describing the *older* frame are cached on the younger one: the
//! PC of frame N lives in frame N-1's `prev_pc`, its function in
//! `prev_func`, its registers in `registers`. The sentinel plays frame -1, so
//! the innermost frame works the same way.

use gimli::Register;
use tracing::trace;

use super::{FrameCache, FrameRef};
use crate::error::{FrameError, FrameResult, UnwindError};
use crate::types::{Address, Architecture, Cached, RegisterContents, RegisterLocation, RegisterValue};
use crate::unwind::FrameType;

impl FrameCache
{
    /// Value `register` has in the frame older than `next`, as unwound by
    /// `next`'s unwinder. Cached per frame and register.
    ///
    /// ## Errors
    ///
    /// Failures reading the target. Unsaved or unavailable registers are
    /// values, not errors.
    pub fn unwind_register(&mut self, next: FrameRef, register: Register) -> FrameResult<RegisterValue>
    {
        if let Some(value) = self.node(next)?.registers.get(&register) {
            return Ok(*value);
        }

        let unwinder = self.ensure_unwinder(next)?;
        let value = unwinder.prev_register(self, next, register)?;

        let node = self.node_mut(next)?;
        trace!(level = node.level, register = register.0, %value, "unwound register");
        node.registers.insert(register, value);
        Ok(value)
    }

    /// Value of `register` in `frame`.
    ///
    /// ## Errors
    ///
    /// See [`FrameCache::unwind_register`].
    pub fn frame_register(&mut self, frame: FrameRef, register: Register) -> FrameResult<RegisterValue>
    {
        let next = self.next_of(frame)?;
        self.unwind_register(next, register)
    }

    /// Raw value of `register` in `frame`.
    ///
    /// ## Errors
    ///
    /// `UnwindError::NotSaved` or `UnwindError::Unavailable` when there is no
    /// value, plus anything [`FrameCache::unwind_register`] reports.
    pub fn frame_register_u64(&mut self, frame: FrameRef, register: Register) -> FrameResult<u64>
    {
        Ok(self.frame_register(frame, register)?.require(register)?)
    }

    /// Where `frame`'s unwinder found the caller's `register`, following
    /// register-to-register moves through younger frames until a memory slot
    /// (or the innermost frame) is reached.
    ///
    /// ## Errors
    ///
    /// See [`FrameCache::unwind_register`].
    pub fn register_save_location(&mut self, frame: FrameRef, register: Register) -> FrameResult<RegisterLocation>
    {
        assert!(self.level(frame)? >= 0, "the sentinel has no save locations");

        let mut frame = frame;
        let mut register = register;
        loop {
            let value = self.unwind_register(frame, register)?;
            if value.contents == RegisterContents::NotSaved {
                return Ok(value.location);
            }
            let RegisterLocation::Register(real) = value.location else {
                return Ok(value.location);
            };
            match self.get_next(frame)? {
                Some(next) => {
                    register = real;
                    frame = next;
                }
                None => return Ok(value.location),
            }
        }
    }

    /// PC of the frame older than `this`. Cached, including "not saved" and
    /// "unavailable" outcomes.
    ///
    /// ## Errors
    ///
    /// `UnwindError::Unavailable` or `UnwindError::NotSaved` when there is no
    /// PC, plus any other failure the unwinder reports.
    pub fn unwind_pc(&mut self, this: FrameRef) -> FrameResult<Address>
    {
        if self.node(this)?.prev_pc.is_unknown() {
            let unwinder = self.ensure_unwinder(this)?;
            let cached = match unwinder.prev_pc(self, this) {
                Ok(pc) => Cached::Value(pc),
                Err(err) if err.is_unavailable() => Cached::Unavailable,
                Err(err) if err.is_not_saved() => Cached::NotSaved,
                Err(err) => return Err(err),
            };
            let node = self.node_mut(this)?;
            node.prev_pc = cached;
            trace!(level = node.level, pc = ?cached, "unwound PC");
        }

        match self.node(this)?.prev_pc {
            Cached::Value(pc) => Ok(pc),
            Cached::Unavailable => Err(UnwindError::Unavailable("PC".to_string()).into()),
            Cached::NotSaved => Err(UnwindError::NotSaved("PC".to_string()).into()),
            Cached::Unknown => unreachable!("PC cache filled above"),
        }
    }

    /// Program counter of `frame` (its resume address).
    ///
    /// ## Errors
    ///
    /// See [`FrameCache::unwind_pc`].
    pub fn frame_pc(&mut self, frame: FrameRef) -> FrameResult<Address>
    {
        let next = self.next_of(frame)?;
        self.unwind_pc(next)
    }

    /// Program counter of `frame`, or `None` if it is unavailable.
    ///
    /// ## Errors
    ///
    /// Failures other than unavailability.
    pub fn frame_pc_if_available(&mut self, frame: FrameRef) -> FrameResult<Option<Address>>
    {
        match self.frame_pc(frame) {
            Ok(pc) => Ok(Some(pc)),
            Err(err) if err.is_unavailable() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// An address inside the code block `frame` is executing.
    ///
    /// A caller's resume address can be the first instruction after the
    /// function when the call was its last instruction (a call to a
    /// no-return function), so it is backed up by one whenever `frame` was
    /// really called by the next real frame. Signal trampolines, dummy
    /// frames and the sentinel interrupt rather than call, so their callers'
    /// PCs are used as is.
    ///
    /// ## Errors
    ///
    /// See [`FrameCache::unwind_pc`].
    pub fn address_in_block(&mut self, frame: FrameRef) -> FrameResult<Address>
    {
        let pc = self.frame_pc(frame)?;

        let mut next = self.next_of(frame)?;
        while self.frame_type(next)? == FrameType::Inline {
            next = self.next_of(next)?;
        }

        let next_type = self.frame_type(next)?;
        let this_type = self.frame_type(frame)?;
        if matches!(next_type, FrameType::Normal | FrameType::Tailcall)
            && matches!(this_type, FrameType::Normal | FrameType::Tailcall | FrameType::Inline)
        {
            return Ok(pc - 1);
        }
        Ok(pc)
    }

    /// Start of the function `frame` is executing, cached on the next frame.
    ///
    /// `None` when the symbol resolver doesn't know the address.
    ///
    /// ## Errors
    ///
    /// `UnwindError::Unavailable` when the PC is unavailable, plus other
    /// unwinding failures.
    pub fn frame_function(&mut self, frame: FrameRef) -> FrameResult<Option<Address>>
    {
        match self.frame_function_cached(frame)? {
            Cached::Value(start) => Ok(start),
            _ => Err(UnwindError::Unavailable("PC".to_string()).into()),
        }
    }

    /// Like [`FrameCache::frame_function`], with an unavailable PC reported
    /// as `None`.
    ///
    /// ## Errors
    ///
    /// Unwinding failures other than unavailability.
    pub fn frame_function_if_available(&mut self, frame: FrameRef) -> FrameResult<Option<Address>>
    {
        Ok(self.frame_function_cached(frame)?.value().flatten())
    }

    fn frame_function_cached(&mut self, frame: FrameRef) -> FrameResult<Cached<Option<Address>>>
    {
        let next = self.next_of(frame)?;
        let cached = self.node(next)?.prev_func;
        if !cached.is_unknown() {
            return Ok(cached);
        }

        let cached = match self.address_in_block(frame) {
            Ok(address) => Cached::Value(self.symbols.function_start(address)),
            Err(err) if err.is_unavailable() => Cached::Unavailable,
            Err(err) => return Err(err),
        };
        self.node_mut(next)?.prev_func = cached;
        trace!(level = self.level(frame)?, func = ?cached, "resolved frame function");
        Ok(cached)
    }

    /// Stack pointer of `frame`.
    ///
    /// ## Errors
    ///
    /// `UnwindError::Unavailable` when the architecture has no known stack
    /// pointer register, plus register unwinding failures.
    pub fn frame_sp(&mut self, frame: FrameRef) -> FrameResult<Address>
    {
        let arch = self.frame_arch(frame)?;
        let Some(sp) = arch.sp_register() else {
            return Err(FrameError::Unwind(UnwindError::Unavailable(format!("stack pointer on {arch}"))));
        };
        Ok(Address::from(self.frame_register_u64(frame, sp)?))
    }

    /// Architecture of the frame older than `next`. Defaults to `next`'s own
    /// architecture when the unwinder doesn't say.
    ///
    /// ## Errors
    ///
    /// Failures the unwinder reports.
    pub fn unwind_arch(&mut self, next: FrameRef) -> FrameResult<Architecture>
    {
        if let Some(arch) = self.node(next)?.prev_arch {
            return Ok(arch);
        }

        let unwinder = self.ensure_unwinder(next)?;
        let arch = match unwinder.prev_arch(self, next)? {
            Some(arch) => arch,
            None => self.frame_arch(next)?,
        };
        self.node_mut(next)?.prev_arch = Some(arch);
        Ok(arch)
    }

    /// Architecture of `frame`. The sentinel's is the target's.
    ///
    /// ## Errors
    ///
    /// See [`FrameCache::unwind_arch`].
    pub fn frame_arch(&mut self, frame: FrameRef) -> FrameResult<Architecture>
    {
        let next = self.next_of(frame)?;
        self.unwind_arch(next)
    }
}
