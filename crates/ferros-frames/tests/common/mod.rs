//! Scripted target for frame cache tests.
//!
//! The scripted stack follows a plain x86-64 frame-pointer ABI:
//!
//! - `[fp]` holds the caller's frame pointer
//! - `[fp + 8]` holds the return address (the caller's PC)
//! - the CFA, and so the frame's stack address, is `fp + 16`
//!
//! Frame `i` (0 = innermost) runs function `i`, which starts at
//! `function_start(i)`. The outermost frame's saved frame pointer is zero,
//! which [`FpUnwinder`] reports as the outermost frame.
//!
//! Tests corrupt the stack by poking or removing memory words; a removed word
//! reads as a memory error.

#![allow(dead_code)]

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use ferros_frames::prelude::*;

pub const PC: Register = Register(16);
pub const SP: Register = Register(7);
pub const FP: Register = Register(6);

pub const STACK_TOP: u64 = 0x7fff_0000;
pub const FRAME_SIZE: u64 = 0x100;
pub const CODE_BASE: u64 = 0x40_0000;
pub const FUNCTION_SIZE: u64 = 0x100;

/// Install a test subscriber so failing tests show frame-cache traces.
pub fn init_logging()
{
    ferros_utils::init_test_logging();
}

/// Live state of the scripted thread.
#[derive(Debug, Default)]
pub struct TargetState
{
    pub alive: bool,
    pub registers: HashMap<u16, u64>,
    pub memory: HashMap<u64, u64>,
    pub register_writes: Vec<(u16, u64)>,
    /// Registers the target refuses to write.
    pub read_only: HashSet<u16>,
}

/// [`TargetAccess`] over a shared [`TargetState`].
#[derive(Debug, Clone)]
pub struct ScriptedTarget
{
    pub state: Rc<RefCell<TargetState>>,
}

impl TargetAccess for ScriptedTarget
{
    fn has_registers(&self) -> bool
    {
        self.state.borrow().alive
    }

    fn architecture(&self) -> Architecture
    {
        Architecture::X86_64
    }

    fn read_register(&self, register: Register) -> Result<u64, UnwindError>
    {
        self.state
            .borrow()
            .registers
            .get(&register.0)
            .copied()
            .ok_or_else(|| UnwindError::Unavailable(format!("register {}", register.0)))
    }

    fn write_register(&mut self, register: Register, value: u64) -> Result<(), UnwindError>
    {
        let mut state = self.state.borrow_mut();
        if state.read_only.contains(&register.0) {
            return Err(UnwindError::Target(format!("register {} is read-only", register.0)));
        }
        state.registers.insert(register.0, value);
        state.register_writes.push((register.0, value));
        Ok(())
    }

    fn read_memory(&self, address: Address, buf: &mut [u8]) -> Result<(), UnwindError>
    {
        if buf.len() != 8 {
            return Err(UnwindError::Target(format!("unsupported read of {} bytes", buf.len())));
        }
        let word = self
            .state
            .borrow()
            .memory
            .get(&address.value())
            .copied()
            .ok_or(UnwindError::Memory { address })?;
        buf.copy_from_slice(&word.to_le_bytes());
        Ok(())
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<(), UnwindError>
    {
        let bytes: [u8; 8] = data
            .try_into()
            .map_err(|_| UnwindError::Target(format!("unsupported write of {} bytes", data.len())))?;
        self.state
            .borrow_mut()
            .memory
            .insert(address.value(), u64::from_le_bytes(bytes));
        Ok(())
    }
}

/// How often each unwinder method ran.
#[derive(Debug, Default)]
pub struct CallCounts
{
    pub sniff: Cell<usize>,
    pub stop_reason: Cell<usize>,
    pub this_id: Cell<usize>,
    pub prev_register: Cell<usize>,
    pub dealloc: Cell<usize>,
}

impl CallCounts
{
    fn bump(counter: &Cell<usize>)
    {
        counter.set(counter.get() + 1);
    }

    /// Calls that do unwinding work.
    pub fn total(&self) -> usize
    {
        self.sniff.get() + self.stop_reason.get() + self.this_id.get() + self.prev_register.get()
    }
}

/// Frame-pointer unwinder for the scripted ABI. Accepts every frame.
#[derive(Debug, Default)]
pub struct FpUnwinder
{
    pub calls: CallCounts,
}

impl FpUnwinder
{
    fn frame_pointer(cache: &mut FrameCache, frame: FrameRef) -> FrameResult<u64>
    {
        cache.frame_register_u64(frame, FP)
    }
}

impl Unwinder for FpUnwinder
{
    fn name(&self) -> &'static str
    {
        "frame-pointer"
    }

    fn frame_type(&self) -> FrameType
    {
        FrameType::Normal
    }

    fn sniff(&self, _cache: &mut FrameCache, _frame: FrameRef) -> FrameResult<bool>
    {
        CallCounts::bump(&self.calls.sniff);
        Ok(true)
    }

    fn stop_reason(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<UnwindStopReason>
    {
        CallCounts::bump(&self.calls.stop_reason);
        let fp = Self::frame_pointer(cache, frame)?;
        if fp == 0 || cache.target().read_u64(Address::from(fp))? == 0 {
            return Ok(UnwindStopReason::Outermost);
        }
        Ok(UnwindStopReason::NoReason)
    }

    fn this_id(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<Option<FrameId>>
    {
        CallCounts::bump(&self.calls.this_id);
        let fp = Self::frame_pointer(cache, frame)?;
        let code = match cache.frame_function(frame)? {
            Some(start) => start,
            None => cache.frame_pc(frame)?,
        };
        cache.set_unwinder_data(frame, fp)?;
        Ok(Some(FrameId::build(Address::from(fp + 16), code)))
    }

    fn prev_register(&self, cache: &mut FrameCache, frame: FrameRef, register: Register) -> FrameResult<RegisterValue>
    {
        CallCounts::bump(&self.calls.prev_register);
        let fp = Address::from(Self::frame_pointer(cache, frame)?);
        match register {
            PC => Ok(RegisterValue::in_memory(cache.target().read_u64(fp + 8)?, fp + 8)),
            FP => Ok(RegisterValue::in_memory(cache.target().read_u64(fp)?, fp)),
            SP => Ok(RegisterValue::value((fp + 16).value(), RegisterLocation::Computed)),
            other => cache.frame_register(frame, other),
        }
    }

    fn dealloc_cache(&self, _level: i32, data: Box<dyn Any>)
    {
        assert!(data.downcast_ref::<u64>().is_some());
        CallCounts::bump(&self.calls.dealloc);
    }
}

/// Frame-pointer unwinder whose identities carry no code address, so
/// nothing reads the caller's PC while linking a frame in. The PC the frame
/// at `unreadable_pc_level` returns to can't be read.
#[derive(Debug)]
pub struct CfaOnlyUnwinder
{
    pub inner: FpUnwinder,
    pub unreadable_pc_level: i32,
    pub unreadable_pc: u64,
}

impl Unwinder for CfaOnlyUnwinder
{
    fn name(&self) -> &'static str
    {
        "cfa-only"
    }

    fn frame_type(&self) -> FrameType
    {
        FrameType::Normal
    }

    fn sniff(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<bool>
    {
        self.inner.sniff(cache, frame)
    }

    fn stop_reason(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<UnwindStopReason>
    {
        self.inner.stop_reason(cache, frame)
    }

    fn this_id(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<Option<FrameId>>
    {
        let fp = cache.frame_register_u64(frame, FP)?;
        Ok(Some(FrameId::build_wild(Address::from(fp + 16))))
    }

    fn prev_register(&self, cache: &mut FrameCache, frame: FrameRef, register: Register) -> FrameResult<RegisterValue>
    {
        self.inner.prev_register(cache, frame, register)
    }

    fn prev_pc(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<Address>
    {
        if cache.level(frame)? == self.unreadable_pc_level {
            return Err(UnwindError::Memory {
                address: Address::from(self.unreadable_pc),
            }
            .into());
        }
        let value = cache.unwind_register(frame, PC)?;
        Ok(Address::from(value.require(PC)?))
    }
}

/// Frame-pointer unwinder that asks for the predecessor of the frame it is
/// unwinding, recording whether one was visible.
#[derive(Debug, Default)]
pub struct PeekingUnwinder
{
    pub inner: FpUnwinder,
    pub saw_predecessor: RefCell<Vec<bool>>,
}

impl Unwinder for PeekingUnwinder
{
    fn name(&self) -> &'static str
    {
        "peeking"
    }

    fn frame_type(&self) -> FrameType
    {
        FrameType::Normal
    }

    fn sniff(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<bool>
    {
        self.inner.sniff(cache, frame)
    }

    fn stop_reason(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<UnwindStopReason>
    {
        let prev = cache.prev_always(frame)?;
        self.saw_predecessor.borrow_mut().push(prev.is_some());
        self.inner.stop_reason(cache, frame)
    }

    fn this_id(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<Option<FrameId>>
    {
        self.inner.this_id(cache, frame)
    }

    fn prev_register(&self, cache: &mut FrameCache, frame: FrameRef, register: Register) -> FrameResult<RegisterValue>
    {
        self.inner.prev_register(cache, frame, register)
    }

    fn dealloc_cache(&self, level: i32, data: Box<dyn Any>)
    {
        self.inner.dealloc_cache(level, data);
    }
}

/// Frame-pointer unwinder that, the first time it computes the identity of
/// the frame at `level`, throws the whole cache away and fails.
#[derive(Debug, Default)]
pub struct InvalidatingUnwinder
{
    pub inner: FpUnwinder,
    pub level: i32,
    pub fired: Cell<bool>,
}

impl Unwinder for InvalidatingUnwinder
{
    fn name(&self) -> &'static str
    {
        "invalidating"
    }

    fn frame_type(&self) -> FrameType
    {
        FrameType::Normal
    }

    fn sniff(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<bool>
    {
        self.inner.sniff(cache, frame)
    }

    fn stop_reason(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<UnwindStopReason>
    {
        self.inner.stop_reason(cache, frame)
    }

    fn this_id(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<Option<FrameId>>
    {
        if !self.fired.get() && cache.level(frame)? == self.level {
            self.fired.set(true);
            cache.invalidate();
            return Err(UnwindError::Target("thread resumed".to_string()).into());
        }
        self.inner.this_id(cache, frame)
    }

    fn prev_register(&self, cache: &mut FrameCache, frame: FrameRef, register: Register) -> FrameResult<RegisterValue>
    {
        self.inner.prev_register(cache, frame, register)
    }

    fn dealloc_cache(&self, level: i32, data: Box<dyn Any>)
    {
        self.inner.dealloc_cache(level, data);
    }
}

/// Computes a frame's identity from that same identity.
#[derive(Debug, Default)]
pub struct SelfReferentialUnwinder;

impl Unwinder for SelfReferentialUnwinder
{
    fn name(&self) -> &'static str
    {
        "self-referential"
    }

    fn frame_type(&self) -> FrameType
    {
        FrameType::Normal
    }

    fn sniff(&self, _cache: &mut FrameCache, _frame: FrameRef) -> FrameResult<bool>
    {
        Ok(true)
    }

    fn this_id(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<Option<FrameId>>
    {
        cache.get_identity(frame).map(Some)
    }

    fn prev_register(&self, cache: &mut FrameCache, frame: FrameRef, register: Register) -> FrameResult<RegisterValue>
    {
        cache.frame_register(frame, register)
    }
}

/// Turns the innermost frame into an inlined call when its PC lies inside
/// `block`. The hosting real frame is unwound by the next unwinder.
#[derive(Debug)]
pub struct InlineUnwinder
{
    pub block_start: Address,
    pub block_size: u64,
}

impl Unwinder for InlineUnwinder
{
    fn name(&self) -> &'static str
    {
        "inline"
    }

    fn frame_type(&self) -> FrameType
    {
        FrameType::Inline
    }

    fn sniff(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<bool>
    {
        if cache.level(frame)? != 0 {
            return Ok(false);
        }
        let pc = cache.frame_pc(frame)?;
        Ok(pc >= self.block_start && pc.value() - self.block_start.value() < self.block_size)
    }

    fn this_id(&self, cache: &mut FrameCache, frame: FrameRef) -> FrameResult<Option<FrameId>>
    {
        let Some(host) = cache.prev_always(frame)? else {
            return Ok(None);
        };
        let host_id = cache.get_identity(host)?;
        Ok(Some(
            FrameId::build(host_id.stack_addr(), self.block_start).one_artificial_deeper(),
        ))
    }

    fn prev_register(&self, cache: &mut FrameCache, frame: FrameRef, register: Register) -> FrameResult<RegisterValue>
    {
        cache.frame_register(frame, register)
    }
}

/// Accepts nothing.
#[derive(Debug, Default)]
pub struct RejectingUnwinder;

impl Unwinder for RejectingUnwinder
{
    fn name(&self) -> &'static str
    {
        "rejecting"
    }

    fn frame_type(&self) -> FrameType
    {
        FrameType::Normal
    }

    fn sniff(&self, _cache: &mut FrameCache, _frame: FrameRef) -> FrameResult<bool>
    {
        Ok(false)
    }

    fn this_id(&self, _cache: &mut FrameCache, _frame: FrameRef) -> FrameResult<Option<FrameId>>
    {
        unreachable!("never bound")
    }

    fn prev_register(&self, _cache: &mut FrameCache, _frame: FrameRef, _register: Register) -> FrameResult<RegisterValue>
    {
        unreachable!("never bound")
    }
}

/// Sniffer that can't read what it needs.
#[derive(Debug, Default)]
pub struct UnavailableSniffer;

impl Unwinder for UnavailableSniffer
{
    fn name(&self) -> &'static str
    {
        "unavailable"
    }

    fn frame_type(&self) -> FrameType
    {
        FrameType::Sigtramp
    }

    fn sniff(&self, _cache: &mut FrameCache, _frame: FrameRef) -> FrameResult<bool>
    {
        Err(UnwindError::Unavailable("signal context".to_string()).into())
    }

    fn this_id(&self, _cache: &mut FrameCache, _frame: FrameRef) -> FrameResult<Option<FrameId>>
    {
        unreachable!("never bound")
    }

    fn prev_register(&self, _cache: &mut FrameCache, _frame: FrameRef, _register: Register) -> FrameResult<RegisterValue>
    {
        unreachable!("never bound")
    }
}

/// A scripted stack of `names.len()` frames.
pub struct Scenario
{
    pub state: Rc<RefCell<TargetState>>,
    pub symbols: SymbolMap,
    pub depth: usize,
}

impl Scenario
{
    /// Frame `i` runs `names[i]`, innermost first.
    pub fn new(names: &[&str]) -> Self
    {
        init_logging();

        let depth = names.len();
        let mut symbols = SymbolMap::new();
        for (i, name) in names.iter().enumerate() {
            symbols.add_function(name, Address::from(Self::function_start(i)), FUNCTION_SIZE);
        }

        let mut state = TargetState {
            alive: true,
            ..TargetState::default()
        };
        for i in 0..depth {
            let fp = Self::fp_for(depth, i);
            let (saved_fp, saved_pc) = if i + 1 < depth {
                (Self::fp_for(depth, i + 1), Self::pc(i + 1))
            } else {
                (0, 0)
            };
            state.memory.insert(fp, saved_fp);
            state.memory.insert(fp + 8, saved_pc);
        }
        let fp0 = Self::fp_for(depth, 0);
        state.registers.insert(PC.0, Self::pc(0));
        state.registers.insert(FP.0, fp0);
        state.registers.insert(SP.0, fp0 - 0x20);

        Self {
            state: Rc::new(RefCell::new(state)),
            symbols,
            depth,
        }
    }

    fn fp_for(depth: usize, i: usize) -> u64
    {
        STACK_TOP - FRAME_SIZE * (depth - i) as u64
    }

    pub fn function_start(i: usize) -> u64
    {
        CODE_BASE + 0x1000 * i as u64
    }

    /// PC of frame `i` (a return address for `i > 0`).
    pub fn pc(i: usize) -> u64
    {
        Self::function_start(i) + 0x20
    }

    pub fn fp(&self, i: usize) -> u64
    {
        Self::fp_for(self.depth, i)
    }

    pub fn cfa(&self, i: usize) -> u64
    {
        self.fp(i) + 16
    }

    /// Identity the frame-pointer unwinder gives frame `i`.
    pub fn expected_id(&self, i: usize) -> FrameId
    {
        FrameId::build(Address::from(self.cfa(i)), Address::from(Self::function_start(i)))
    }

    pub fn poke(&self, address: u64, value: u64)
    {
        self.state.borrow_mut().memory.insert(address, value);
    }

    /// Make `address` unreadable.
    pub fn forget(&self, address: u64)
    {
        self.state.borrow_mut().memory.remove(&address);
    }

    pub fn set_entry_point(&mut self, i: usize)
    {
        self.symbols.set_entry_point(Address::from(Self::function_start(i)));
    }

    pub fn target(&self) -> ScriptedTarget
    {
        ScriptedTarget {
            state: Rc::clone(&self.state),
        }
    }

    pub fn cache_with(&self, unwinders: Vec<Rc<dyn Unwinder>>) -> FrameCache
    {
        FrameCache::new(Box::new(self.target()), Box::new(self.symbols.clone()), unwinders)
    }

    /// A cache unwinding with a fresh [`FpUnwinder`], which is returned for
    /// call counting.
    pub fn cache(&self) -> (FrameCache, Rc<FpUnwinder>)
    {
        let unwinder = Rc::new(FpUnwinder::default());
        let cache = self.cache_with(vec![unwinder.clone() as Rc<dyn Unwinder>]);
        (cache, unwinder)
    }
}

/// Walk from the innermost frame with policy applied, returning every frame.
pub fn walk(cache: &mut FrameCache) -> Vec<FrameRef>
{
    let mut frames = vec![cache.current_frame().unwrap()];
    while let Some(prev) = cache.get_previous(*frames.last().unwrap(), true).unwrap() {
        frames.push(prev);
    }
    frames
}
