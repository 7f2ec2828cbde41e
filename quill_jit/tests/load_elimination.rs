//! Load elimination over hand-built graphs.
//!
//! Coverage:
//! - Store-to-load and load-to-load forwarding
//! - Truncation and sign/zero extension for narrower loads
//! - Aliasing between fresh, constant and arbitrary objects
//! - Overlapping field widths
//! - State intersection at merges and the loop-header policy
//! - Calls, debug instructions and allocations on the effect chain

use quill_jit::ir::{ExternalRef, Graph, MachineType, NodeId, Operator, WordOp};
use quill_jit::opt::{LoadElimination, OptimizationPass};

// =============================================================================
// Helpers
// =============================================================================

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn run(g: &mut Graph) -> LoadElimination {
    init_logging();
    let mut pass = LoadElimination::new();
    pass.run(g);
    assert!(g.verify().is_ok(), "graph malformed after load elimination");
    pass
}

/// Value returned by `ret`.
fn returned(g: &Graph, ret: NodeId) -> NodeId {
    g.node(ret).value_input(0).unwrap()
}

// =============================================================================
// Forwarding
// =============================================================================

#[test]
fn test_store_then_load_forwards_value() {
    let mut g = Graph::new();
    let object = g.parameter(0);
    let value = g.parameter(1);
    let offset = g.int32_constant(16);
    let store = g.store_to_object(MachineType::ANY_TAGGED, object, offset, value, g.start, g.start);
    let load = g.load_from_object(MachineType::ANY_TAGGED, object, offset, store, g.start);
    let ret = g.return_value(load, load, g.start);

    let pass = run(&mut g);

    assert_eq!(returned(&g, ret), value);
    assert_eq!(g.node(ret).effect_input(0), Some(store));
    assert!(g.node(load).is_dead());
    assert_eq!(pass.stats().loads_eliminated, 1);
    assert_eq!(pass.stats().conversions_inserted, 0);
}

#[test]
fn test_second_load_reuses_first() {
    let mut g = Graph::new();
    let object = g.parameter(0);
    let offset = g.int32_constant(8);
    let first = g.load_from_object(MachineType::INT32, object, offset, g.start, g.start);
    let second = g.load_from_object(MachineType::INT32, object, offset, first, g.start);
    let sum = g.int32_add(first, second);
    let ret = g.return_value(sum, second, g.start);

    run(&mut g);

    assert!(!g.node(first).is_dead());
    assert!(g.node(second).is_dead());
    assert_eq!(g.node(sum).inputs.as_slice(), &[first, first]);
    assert_eq!(g.node(ret).effect_input(0), Some(first));
}

#[test]
fn test_different_offsets_not_forwarded() {
    let mut g = Graph::new();
    let object = g.parameter(0);
    let value = g.parameter(1);
    let off8 = g.int32_constant(8);
    let off16 = g.int32_constant(16);
    let store = g.store_to_object(MachineType::ANY_TAGGED, object, off8, value, g.start, g.start);
    let load = g.load_from_object(MachineType::ANY_TAGGED, object, off16, store, g.start);
    let ret = g.return_value(load, load, g.start);

    let pass = run(&mut g);

    assert_eq!(returned(&g, ret), load);
    assert_eq!(pass.stats().loads_eliminated, 0);
}

#[test]
fn test_unknown_offset_forwarded_by_identity() {
    let mut g = Graph::new();
    let object = g.parameter(0);
    let value = g.parameter(1);
    let offset = g.parameter(2);
    let store = g.store_to_object(MachineType::INT32, object, offset, value, g.start, g.start);
    let load = g.load_from_object(MachineType::INT32, object, offset, store, g.start);
    let ret = g.return_value(load, load, g.start);

    run(&mut g);

    assert_eq!(returned(&g, ret), value);
}

// =============================================================================
// Representation Changes
// =============================================================================

#[test]
fn test_narrow_signed_load_sign_extends() {
    let mut g = Graph::new();
    let object = g.parameter(0);
    let value = g.parameter(1);
    let offset = g.int32_constant(8);
    let store = g.store_to_object(MachineType::INT32, object, offset, value, g.start, g.start);
    let load = g.load_from_object(MachineType::INT8, object, offset, store, g.start);
    let ret = g.return_value(load, load, g.start);

    let pass = run(&mut g);

    let sar = returned(&g, ret);
    assert_eq!(g.op(sar), Operator::Word(WordOp::Word32Sar));
    let shl = g.node(sar).inputs[0];
    let shift = g.node(sar).inputs[1];
    assert_eq!(g.op(shl), Operator::Word(WordOp::Word32Shl));
    assert_eq!(g.node(shl).inputs.as_slice(), &[value, shift]);
    assert_eq!(g.node(shift).as_int_constant(), Some(24));
    assert_eq!(pass.stats().loads_eliminated, 1);
}

#[test]
fn test_narrow_unsigned_load_masks() {
    let mut g = Graph::new();
    let object = g.parameter(0);
    let value = g.parameter(1);
    let offset = g.int32_constant(8);
    let store = g.store_to_object(MachineType::UINT32, object, offset, value, g.start, g.start);
    let load = g.load_from_object(MachineType::UINT16, object, offset, store, g.start);
    let ret = g.return_value(load, load, g.start);

    run(&mut g);

    let and = returned(&g, ret);
    assert_eq!(g.op(and), Operator::Word(WordOp::Word32And));
    assert_eq!(g.node(and).inputs[0], value);
    let mask = g.node(and).inputs[1];
    assert_eq!(g.node(mask).as_int_constant(), Some(0xFFFF));
}

#[test]
fn test_word64_value_truncated() {
    let mut g = Graph::new();
    let object = g.parameter(0);
    let value = g.parameter(1);
    let offset = g.int32_constant(8);
    let store = g.store_to_object(MachineType::INT64, object, offset, value, g.start, g.start);
    let load = g.load_from_object(MachineType::INT32, object, offset, store, g.start);
    let ret = g.return_value(load, load, g.start);

    run(&mut g);

    let trunc = returned(&g, ret);
    assert_eq!(g.op(trunc), Operator::Word(WordOp::TruncateInt64ToInt32));
    assert_eq!(g.node(trunc).inputs[0], value);
}

#[test]
fn test_word64_to_byte_truncates_then_masks() {
    let mut g = Graph::new();
    let object = g.parameter(0);
    let value = g.parameter(1);
    let offset = g.int32_constant(8);
    let store = g.store_to_object(MachineType::UINT64, object, offset, value, g.start, g.start);
    let load = g.load_from_object(MachineType::UINT8, object, offset, store, g.start);
    let ret = g.return_value(load, load, g.start);

    let pass = run(&mut g);

    let and = returned(&g, ret);
    assert_eq!(g.op(and), Operator::Word(WordOp::Word32And));
    let trunc = g.node(and).inputs[0];
    assert_eq!(g.op(trunc), Operator::Word(WordOp::TruncateInt64ToInt32));
    assert_eq!(g.node(trunc).inputs[0], value);
    assert_eq!(g.node(g.node(and).inputs[1]).as_int_constant(), Some(0xFF));
    assert_eq!(pass.stats().conversions_inserted, 2);
}

#[test]
fn test_wider_load_not_forwarded() {
    let mut g = Graph::new();
    let object = g.parameter(0);
    let value = g.parameter(1);
    let offset = g.int32_constant(8);
    let store = g.store_to_object(MachineType::UINT8, object, offset, value, g.start, g.start);
    let load = g.load_from_object(MachineType::UINT32, object, offset, store, g.start);
    let ret = g.return_value(load, load, g.start);

    run(&mut g);

    assert_eq!(returned(&g, ret), load);
}

#[test]
fn test_float_not_forwarded_to_integer() {
    let mut g = Graph::new();
    let object = g.parameter(0);
    let value = g.parameter(1);
    let offset = g.int32_constant(8);
    let store = g.store_to_object(MachineType::FLOAT64, object, offset, value, g.start, g.start);
    let load = g.load_from_object(MachineType::INT64, object, offset, store, g.start);
    let ret = g.return_value(load, load, g.start);

    run(&mut g);

    assert_eq!(returned(&g, ret), load);
}

// =============================================================================
// Aliasing
// =============================================================================

#[test]
fn test_arbitrary_store_invalidates_fresh_objects() {
    let mut g = Graph::new();
    let size = g.int32_constant(32);
    let first = g.allocate(size, g.start, g.start);
    let second = g.allocate(size, first, g.start);
    let holder = g.parameter(0);
    let zero = g.int32_constant(0);
    let offset = g.int32_constant(8);
    let v1 = g.parameter(1);
    let v2 = g.parameter(2);

    let arbitrary = g.load_from_object(MachineType::TAGGED_POINTER, holder, zero, second, g.start);
    let s1 = g.store_to_object(MachineType::ANY_TAGGED, first, offset, v1, arbitrary, g.start);
    let s2 = g.store_to_object(MachineType::ANY_TAGGED, second, offset, v1, s1, g.start);
    let clobber = g.store_to_object(MachineType::ANY_TAGGED, arbitrary, offset, v2, s2, g.start);
    let load = g.load_from_object(MachineType::ANY_TAGGED, second, offset, clobber, g.start);
    let ret = g.return_value(load, load, g.start);

    run(&mut g);

    assert_eq!(returned(&g, ret), load);
    assert!(!g.node(load).is_dead());
}

#[test]
fn test_fresh_store_preserves_other_fresh_object() {
    let mut g = Graph::new();
    let size = g.int32_constant(32);
    let first = g.allocate(size, g.start, g.start);
    let second = g.allocate(size, first, g.start);
    let offset = g.int32_constant(8);
    let v1 = g.parameter(0);
    let v2 = g.parameter(1);

    let s1 = g.store_to_object(MachineType::ANY_TAGGED, first, offset, v1, second, g.start);
    let s2 = g.store_to_object(MachineType::ANY_TAGGED, second, offset, v2, s1, g.start);
    let load = g.load_from_object(MachineType::ANY_TAGGED, first, offset, s2, g.start);
    let ret = g.return_value(load, load, g.start);

    run(&mut g);

    assert_eq!(returned(&g, ret), v1);
}

#[test]
fn test_constant_store_keeps_fresh_entries() {
    let mut g = Graph::new();
    let size = g.int32_constant(32);
    let fresh = g.allocate(size, g.start, g.start);
    let param = g.parameter(0);
    let offset = g.int32_constant(8);
    let v1 = g.parameter(1);
    let v2 = g.parameter(2);

    let s1 = g.store_to_object(MachineType::ANY_TAGGED, fresh, offset, v1, fresh, g.start);
    let s2 = g.store_to_object(MachineType::ANY_TAGGED, param, offset, v2, s1, g.start);
    let load = g.load_from_object(MachineType::ANY_TAGGED, fresh, offset, s2, g.start);
    let ret = g.return_value(load, load, g.start);

    run(&mut g);

    assert_eq!(returned(&g, ret), v1);
}

#[test]
fn test_constant_objects_may_alias() {
    let mut g = Graph::new();
    let a = g.parameter(0);
    let b = g.parameter(1);
    let offset = g.int32_constant(8);
    let v1 = g.parameter(2);
    let v2 = g.parameter(3);

    let s1 = g.store_to_object(MachineType::ANY_TAGGED, a, offset, v1, g.start, g.start);
    let s2 = g.store_to_object(MachineType::ANY_TAGGED, b, offset, v2, s1, g.start);
    let load = g.load_from_object(MachineType::ANY_TAGGED, a, offset, s2, g.start);
    let ret = g.return_value(load, load, g.start);

    run(&mut g);

    assert_eq!(returned(&g, ret), load);
}

#[test]
fn test_overlapping_store_kills_wider_field() {
    let mut g = Graph::new();
    let a = g.parameter(0);
    let b = g.parameter(1);
    let off8 = g.int32_constant(8);
    let off12 = g.int32_constant(12);
    let wide = g.parameter(2);
    let narrow = g.parameter(3);

    let s1 = g.store_to_object(MachineType::INT64, a, off8, wide, g.start, g.start);
    let s2 = g.store_to_object(MachineType::INT32, b, off12, narrow, s1, g.start);
    let load = g.load_from_object(MachineType::INT64, a, off8, s2, g.start);
    let ret = g.return_value(load, load, g.start);

    run(&mut g);

    assert_eq!(returned(&g, ret), load);
}

#[test]
fn test_adjacent_store_keeps_field() {
    let mut g = Graph::new();
    let a = g.parameter(0);
    let b = g.parameter(1);
    let off8 = g.int32_constant(8);
    let off16 = g.int32_constant(16);
    let wide = g.parameter(2);
    let other = g.parameter(3);

    let s1 = g.store_to_object(MachineType::INT64, a, off8, wide, g.start, g.start);
    let s2 = g.store_to_object(MachineType::INT64, b, off16, other, s1, g.start);
    let load = g.load_from_object(MachineType::INT64, a, off8, s2, g.start);
    let ret = g.return_value(load, load, g.start);

    run(&mut g);

    assert_eq!(returned(&g, ret), wide);
}

#[test]
fn test_unknown_offset_store_to_constant_clears_constants() {
    let mut g = Graph::new();
    let a = g.parameter(0);
    let b = g.parameter(1);
    let offset = g.int32_constant(8);
    let dynamic = g.parameter(2);
    let v1 = g.parameter(3);
    let v2 = g.parameter(4);

    let s1 = g.store_to_object(MachineType::ANY_TAGGED, a, offset, v1, g.start, g.start);
    let s2 = g.store_to_object(MachineType::ANY_TAGGED, b, dynamic, v2, s1, g.start);
    let load = g.load_from_object(MachineType::ANY_TAGGED, a, offset, s2, g.start);
    let ret = g.return_value(load, load, g.start);

    run(&mut g);

    assert_eq!(returned(&g, ret), load);
}

// =============================================================================
// Effect Chain Nodes
// =============================================================================

/// Store `value` to `object.8`, run `between` on the chain, then load it back.
/// Returns `(value, load, return)`.
fn store_between_load(
    between: impl FnOnce(&mut Graph, NodeId, NodeId) -> NodeId,
) -> (Graph, NodeId, NodeId, NodeId) {
    let mut g = Graph::new();
    let object = g.parameter(0);
    let value = g.parameter(1);
    let offset = g.int32_constant(8);
    let store = g.store_to_object(MachineType::ANY_TAGGED, object, offset, value, g.start, g.start);
    let effect = between(&mut g, object, store);
    let load = g.load_from_object(MachineType::ANY_TAGGED, object, offset, effect, g.start);
    let ret = g.return_value(load, load, g.start);
    (g, value, load, ret)
}

#[test]
fn test_check_object_type_call_preserves_state() {
    let (mut g, value, _, ret) = store_between_load(|g, object, effect| {
        let target = g.external_constant(ExternalRef::CheckObjectType);
        g.call(target, &[object], false, effect, g.start)
    });
    run(&mut g);
    assert_eq!(returned(&g, ret), value);
}

#[test]
fn test_writing_call_resets_state() {
    let (mut g, _, load, ret) = store_between_load(|g, object, effect| {
        let target = g.external_constant(ExternalRef::Runtime(7));
        g.call(target, &[object], false, effect, g.start)
    });
    run(&mut g);
    assert_eq!(returned(&g, ret), load);
}

#[test]
fn test_non_writing_call_preserves_state() {
    let (mut g, value, _, ret) = store_between_load(|g, object, effect| {
        let target = g.external_constant(ExternalRef::Runtime(7));
        g.call(target, &[object], true, effect, g.start)
    });
    run(&mut g);
    assert_eq!(returned(&g, ret), value);
}

#[test]
fn test_debug_instructions_preserve_state() {
    let (mut g, value, _, ret) = store_between_load(|g, _, effect| {
        let brk = g.debug_break(effect, g.start);
        let message = g.heap_constant(3);
        g.abort_csa_assert(message, brk, g.start)
    });
    run(&mut g);
    assert_eq!(returned(&g, ret), value);
}

#[test]
fn test_allocation_resets_state() {
    let (mut g, _, load, ret) = store_between_load(|g, _, effect| {
        let size = g.int32_constant(16);
        g.allocate(size, effect, g.start)
    });
    run(&mut g);
    assert_eq!(returned(&g, ret), load);
}

// =============================================================================
// Merges
// =============================================================================

/// Diamond on parameter 9. `left` and `right` extend the chain in each arm.
/// Returns `(graph, load after merge, return)`.
fn diamond(
    before: impl FnOnce(&mut Graph, NodeId, NodeId) -> NodeId,
    left: impl FnOnce(&mut Graph, NodeId, NodeId, NodeId) -> NodeId,
    right: impl FnOnce(&mut Graph, NodeId, NodeId, NodeId) -> NodeId,
) -> (Graph, NodeId, NodeId) {
    let mut g = Graph::new();
    let object = g.parameter(0);
    let offset = g.int32_constant(4);
    let cond = g.parameter(9);

    let effect = before(&mut g, object, offset);
    let branch = g.branch(cond, g.start);
    let if_true = g.if_true(branch);
    let if_false = g.if_false(branch);
    let etrue = left(&mut g, object, offset, effect);
    let efalse = right(&mut g, object, offset, effect);
    let merge = g.merge(&[if_true, if_false]);
    let phi = g.effect_phi(&[etrue, efalse], merge);

    let load = g.load_from_object(MachineType::ANY_TAGGED, object, offset, phi, merge);
    let ret = g.return_value(load, load, merge);
    (g, load, ret)
}

#[test]
fn test_merge_drops_conflicting_entries() {
    let (mut g, load, ret) = diamond(
        |g, _, _| g.start,
        |g, object, offset, effect| {
            let a = g.parameter(1);
            g.store_to_object(MachineType::ANY_TAGGED, object, offset, a, effect, g.start)
        },
        |g, object, offset, effect| {
            let b = g.parameter(2);
            g.store_to_object(MachineType::ANY_TAGGED, object, offset, b, effect, g.start)
        },
    );
    let pass = run(&mut g);

    assert_eq!(returned(&g, ret), load);
    assert_eq!(pass.stats().loads_eliminated, 0);
}

#[test]
fn test_merge_keeps_agreeing_entries() {
    let mut value = None;
    let (mut g, _, ret) = diamond(
        |g, object, offset| {
            let v = g.parameter(1);
            value = Some(v);
            g.store_to_object(MachineType::ANY_TAGGED, object, offset, v, g.start, g.start)
        },
        |g, _, _, effect| g.debug_break(effect, g.start),
        |_, _, _, effect| effect,
    );
    run(&mut g);

    assert_eq!(Some(returned(&g, ret)), value);
}

#[test]
fn test_merge_same_value_both_arms() {
    let mut value = None;
    let (mut g, _, ret) = diamond(
        |g, _, _| {
            value = Some(g.parameter(1));
            g.start
        },
        |g, object, offset, effect| {
            let v = g.parameter(1);
            g.store_to_object(MachineType::ANY_TAGGED, object, offset, v, effect, g.start)
        },
        |g, object, offset, effect| {
            let v = g.parameter(1);
            g.store_to_object(MachineType::ANY_TAGGED, object, offset, v, effect, g.start)
        },
    );
    run(&mut g);

    // Distinct parameter nodes are distinct values.
    assert_ne!(Some(returned(&g, ret)), value);
}

// =============================================================================
// Loops
// =============================================================================

/// Store before a loop; the body loads the field and optionally stores a
/// new value. Returns `(graph, stored value, body load, return)`.
fn loop_with_body(store_in_body: bool) -> (Graph, NodeId, NodeId, NodeId) {
    let mut g = Graph::new();
    let object = g.parameter(0);
    let value = g.parameter(1);
    let other = g.parameter(2);
    let cond = g.parameter(9);
    let offset = g.int32_constant(8);

    let entry = g.store_to_object(MachineType::ANY_TAGGED, object, offset, value, g.start, g.start);
    let header = g.loop_header(g.start);
    let phi = g.effect_phi(&[entry, entry], header);

    let load = g.load_from_object(MachineType::ANY_TAGGED, object, offset, phi, header);
    let mut back_effect = load;
    if store_in_body {
        back_effect = g.store_to_object(MachineType::ANY_TAGGED, object, offset, other, load, header);
    }
    let branch = g.branch(cond, header);
    let back = g.if_true(branch);
    let exit = g.if_false(branch);
    g.replace_input(header, 1, back);
    g.replace_input(phi, 1, back_effect);

    let ret = g.return_value(load, back_effect, exit);
    (g, value, load, ret)
}

#[test]
fn test_loop_without_writes_keeps_entry_state() {
    let (mut g, value, load, ret) = loop_with_body(false);
    let pass = run(&mut g);

    assert!(g.node(load).is_dead());
    assert_eq!(returned(&g, ret), value);
    assert_eq!(pass.stats().loop_states_reset, 0);
}

#[test]
fn test_loop_with_store_resets_state() {
    let (mut g, _, load, ret) = loop_with_body(true);
    let pass = run(&mut g);

    assert!(!g.node(load).is_dead());
    assert_eq!(returned(&g, ret), load);
    assert!(pass.stats().loop_states_reset >= 1);
}

#[test]
fn test_rerun_is_stable() {
    let (mut g, value, _, ret) = store_between_load(|_, _, effect| effect);
    let mut pass = LoadElimination::new();
    assert!(pass.run(&mut g));
    assert!(!pass.run(&mut g));
    assert_eq!(returned(&g, ret), value);
}
