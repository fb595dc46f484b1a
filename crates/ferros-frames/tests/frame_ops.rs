//! Tests for popping, selection, preconditions, inline frames and unwinder
//! selection

mod common;

use std::rc::Rc;

use common::{walk, FpUnwinder, InlineUnwinder, RejectingUnwinder, Scenario, UnavailableSniffer, FP, PC, SP};
use ferros_frames::prelude::*;
use pretty_assertions::assert_eq;

#[test]
fn test_pop_writes_caller_registers()
{
    let scenario = Scenario::new(&["a", "b", "c"]);
    let (mut cache, _) = scenario.cache();

    let frames = walk(&mut cache);
    let generation = cache.generation();
    cache.pop(frames[0]).unwrap();

    {
        let state = scenario.state.borrow();
        assert_eq!(state.registers[&PC.0], Scenario::pc(1));
        assert_eq!(state.registers[&FP.0], scenario.fp(1));
        assert_eq!(state.registers[&SP.0], scenario.cfa(0));
        // Registers the caller couldn't recover are left alone.
        assert_eq!(state.register_writes.len(), 3);
    }

    assert_eq!(cache.generation(), generation + 1);
    assert!(cache.level(frames[0]).is_err());

    let current = cache.current_frame().unwrap();
    assert_eq!(cache.get_identity(current).unwrap(), scenario.expected_id(1));
    assert_eq!(walk(&mut cache).len(), 2);
}

#[test]
fn test_failed_pop_still_invalidates()
{
    let scenario = Scenario::new(&["a", "b", "c"]);
    scenario.state.borrow_mut().read_only.insert(SP.0);
    let (mut cache, _) = scenario.cache();

    let frames = walk(&mut cache);
    let generation = cache.generation();

    let err = cache.pop(frames[0]).unwrap_err();
    assert!(matches!(err, FrameError::RegisterWrite { register, .. } if register == SP));

    // FP went out before SP was refused.
    assert_eq!(scenario.state.borrow().register_writes, vec![(FP.0, scenario.fp(1))]);
    assert_eq!(cache.generation(), generation + 1);
    assert!(matches!(cache.level(frames[0]), Err(FrameError::StaleFrame { .. })));

    let current = cache.current_frame().unwrap();
    assert_eq!(cache.frame_register_u64(current, FP).unwrap(), scenario.fp(1));
}

#[test]
fn test_pop_middle_frame()
{
    let scenario = Scenario::new(&["a", "b", "c", "d"]);
    let (mut cache, _) = scenario.cache();

    let frames = walk(&mut cache);
    cache.pop(frames[1]).unwrap();

    let current = cache.current_frame().unwrap();
    assert_eq!(cache.get_identity(current).unwrap(), scenario.expected_id(2));
}

#[test]
fn test_pop_outermost_frame_fails()
{
    let scenario = Scenario::new(&["a", "b"]);
    let (mut cache, _) = scenario.cache();

    let frames = walk(&mut cache);
    let generation = cache.generation();

    assert_eq!(cache.pop(frames[1]).unwrap_err(), FrameError::CannotPopInitialFrame);
    assert_eq!(cache.generation(), generation);
    assert!(scenario.state.borrow().register_writes.is_empty());
}

#[test]
fn test_selection_defaults_to_current_frame()
{
    let scenario = Scenario::new(&["a", "b", "c"]);
    let (mut cache, _) = scenario.cache();

    assert_eq!(cache.selected_frame_if_set(), None);
    assert!(!cache.selected_frame_id().unwrap().is_valid());

    let selected = cache.selected_frame().unwrap();
    assert_eq!(selected, cache.current_frame().unwrap());
    assert_eq!(cache.selected_frame_if_set(), Some(selected));
}

#[test]
fn test_selection_survives_invalidation_by_id()
{
    let scenario = Scenario::new(&["a", "b", "c", "d"]);
    let (mut cache, _) = scenario.cache();

    let frames = walk(&mut cache);
    cache.select_frame(Some(frames[2])).unwrap();
    let id = cache.selected_frame_id().unwrap();
    assert_eq!(id, scenario.expected_id(2));

    cache.invalidate();
    assert_eq!(cache.selected_frame_if_set(), None);

    cache.restore_selected_frame(id).unwrap();
    let restored = cache.selected_frame_if_set().unwrap();
    assert_eq!(cache.level(restored).unwrap(), 2);
    assert_eq!(cache.get_identity(restored).unwrap(), id);
}

#[test]
fn test_restore_unknown_selection_clears_it()
{
    let scenario = Scenario::new(&["a", "b"]);
    let (mut cache, _) = scenario.cache();

    let current = cache.current_frame().unwrap();
    cache.select_frame(Some(current)).unwrap();

    let gone = FrameId::build(Address::from(common::STACK_TOP + 0x1000), Address::from(0x1));
    cache.restore_selected_frame(gone).unwrap();
    assert_eq!(cache.selected_frame_if_set(), None);
}

#[test]
fn test_select_stale_frame_fails()
{
    let scenario = Scenario::new(&["a", "b"]);
    let (mut cache, _) = scenario.cache();

    let current = cache.current_frame().unwrap();
    cache.invalidate();
    assert!(matches!(
        cache.select_frame(Some(current)),
        Err(FrameError::StaleFrame { .. })
    ));
    cache.select_frame(None).unwrap();
}

#[test]
fn test_no_registers()
{
    let scenario = Scenario::new(&["a", "b"]);
    scenario.state.borrow_mut().alive = false;
    let (mut cache, _) = scenario.cache();

    assert!(!cache.has_stack_frames());
    assert_eq!(cache.current_frame().unwrap_err(), FrameError::NoRegisters);
    assert_eq!(cache.selected_frame().unwrap_err(), FrameError::NoRegisters);
    assert_eq!(cache.sentinel(), None);
}

#[test]
fn test_no_unwinder_accepts_frame()
{
    let scenario = Scenario::new(&["a", "b"]);
    let mut cache = scenario.cache_with(vec![Rc::new(RejectingUnwinder) as Rc<dyn Unwinder>]);

    let current = cache.current_frame().unwrap();
    assert_eq!(cache.get_identity(current).unwrap_err(), FrameError::NoUnwinder { level: 0 });

    // The failed attempt leaves the frame as it was.
    assert_eq!(cache.get_identity(current).unwrap_err(), FrameError::NoUnwinder { level: 0 });
    assert_eq!(cache.frame_type(current).unwrap_err(), FrameError::NoUnwinder { level: 0 });
}

#[test]
fn test_sniffer_without_data_is_skipped()
{
    let scenario = Scenario::new(&["a", "b", "c"]);
    let fp = Rc::new(FpUnwinder::default());
    let mut cache = scenario.cache_with(vec![Rc::new(UnavailableSniffer) as Rc<dyn Unwinder>, fp.clone()]);

    let frames = walk(&mut cache);
    assert_eq!(frames.len(), 3);
    for frame in frames {
        assert_eq!(cache.frame_type(frame).unwrap(), FrameType::Normal);
    }
    assert_eq!(fp.calls.sniff.get(), 3);
}

#[test]
fn test_unwinders_are_probed_in_priority_order()
{
    let scenario = Scenario::new(&["a", "b"]);
    let first = Rc::new(FpUnwinder::default());
    let second = Rc::new(FpUnwinder::default());
    let mut cache = scenario.cache_with(vec![first.clone() as Rc<dyn Unwinder>, second.clone()]);

    assert_eq!(walk(&mut cache).len(), 2);
    assert_eq!(first.calls.sniff.get(), 2);
    assert_eq!(second.calls.total(), 0);
}

fn inline_scenario() -> (Scenario, FrameCache, Address)
{
    let scenario = Scenario::new(&["host", "b", "c"]);
    let block_start = Address::from(Scenario::function_start(0) + 0x10);
    let inline = Rc::new(InlineUnwinder {
        block_start,
        block_size: 0x20,
    });
    let cache = scenario.cache_with(vec![inline as Rc<dyn Unwinder>, Rc::new(FpUnwinder::default())]);
    (scenario, cache, block_start)
}

#[test]
fn test_inline_frame_shares_host_stack_slot()
{
    let (scenario, mut cache, block_start) = inline_scenario();

    let frames = walk(&mut cache);
    assert_eq!(frames.len(), 4);
    assert_eq!(cache.frame_type(frames[0]).unwrap(), FrameType::Inline);
    assert_eq!(cache.frame_type(frames[1]).unwrap(), FrameType::Normal);

    let inline_id = cache.get_identity(frames[0]).unwrap();
    assert!(inline_id.is_artificial());
    assert_eq!(inline_id, FrameId::build(Address::from(scenario.cfa(0)), block_start).one_artificial_deeper());
    assert_eq!(cache.get_identity(frames[1]).unwrap(), scenario.expected_id(0));

    // Both frames resume at the same PC; the host isn't backed up by one.
    assert_eq!(cache.frame_pc(frames[1]).unwrap(), Address::from(Scenario::pc(0)));
    assert_eq!(cache.address_in_block(frames[1]).unwrap(), Address::from(Scenario::pc(0)));

    assert_eq!(cache.get_identity(frames[3]).unwrap(), scenario.expected_id(2));
}

#[test]
fn test_artificial_frames_are_skipped()
{
    let (scenario, mut cache, _) = inline_scenario();

    let current = cache.current_frame().unwrap();
    let host = cache.skip_artificial_frames(current).unwrap().unwrap();
    assert_eq!(cache.level(host).unwrap(), 1);

    assert_eq!(cache.stack_frame_id(current).unwrap(), scenario.expected_id(0));
    assert_eq!(cache.caller_id(current).unwrap(), scenario.expected_id(1));
    assert_eq!(cache.caller_pc(current).unwrap(), Some(Address::from(Scenario::pc(1))));
}

#[test]
fn test_caller_helpers_without_artificial_frames()
{
    let scenario = Scenario::new(&["a", "b", "c"]);
    let (mut cache, _) = scenario.cache();

    let frames = walk(&mut cache);
    assert_eq!(cache.skip_artificial_frames(frames[1]).unwrap(), Some(frames[1]));
    assert_eq!(cache.caller_id(frames[0]).unwrap(), scenario.expected_id(1));
    assert!(!cache.caller_id(frames[2]).unwrap().is_valid());
    assert_eq!(cache.caller_pc(frames[1]).unwrap(), Some(Address::from(Scenario::pc(2))));
}
