//! End-to-end scavenge tests.
//!
//! Coverage:
//! - Exactly-once evacuation of shared, cyclic, and chained object graphs
//! - Forwarding consistency across roots and heap slots
//! - Remembered-set maintenance and absence of from-space pointers
//! - Promotion queue draining across cycles
//! - Parallel workers over a large graph

use quill_gc::verify::verify_heap;
use quill_gc::{
    Address, GcConfig, Generation, Heap, RootSet, Scavenger, Shape, ShapeId, Space, Tagged,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::Ordering;

// =============================================================================
// Helpers
// =============================================================================

/// Node layout: header, `next`, `other`, payload Smi.
const NEXT: usize = 8;
const OTHER: usize = 16;
const PAYLOAD: usize = 24;
const NODE_SIZE: usize = 32;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn setup(config: GcConfig) -> (Heap, ShapeId) {
    init_logging();
    let mut heap = Heap::new(config).unwrap();
    let node = heap.register_shape(Shape::fixed("node", NODE_SIZE)).unwrap();
    (heap, node)
}

fn new_node(heap: &Heap, shape: ShapeId, generation: Generation, payload: i64) -> Address {
    let node = heap.allocate(shape, 0, generation).unwrap();
    heap.write_field(node, PAYLOAD, Tagged::from_smi(payload));
    node
}

fn link(heap: &Heap, from: Address, offset: usize, to: Address) {
    heap.write_field(from, offset, Tagged::from_address(to));
}

fn field(heap: &Heap, object: Address, offset: usize) -> Option<Address> {
    heap.read_field(object, offset).as_address()
}

fn payload(heap: &Heap, object: Address) -> Option<i64> {
    heap.read_field(object, PAYLOAD).as_smi()
}

/// Every heap object reachable from the roots.
fn reachable(heap: &Heap, roots: &RootSet) -> FxHashSet<Address> {
    let mut seen = FxHashSet::default();
    let mut stack: Vec<Address> = roots.iter().filter_map(Tagged::as_address).collect();
    while let Some(object) = stack.pop() {
        if !heap.contains(object) || !seen.insert(object) {
            continue;
        }
        for offset in [NEXT, OTHER] {
            if let Some(child) = field(heap, object, offset) {
                stack.push(child);
            }
        }
    }
    seen
}

fn count_objects(heap: &Heap, space: Space, shape: ShapeId) -> usize {
    let mut count = 0;
    heap.for_each_object(space, |_, id, _| {
        if id == shape {
            count += 1;
        }
    })
    .unwrap();
    count
}

// =============================================================================
// End-to-End Chain
// =============================================================================

#[test]
fn test_chain_copied_in_order() {
    let (mut heap, node) = setup(GcConfig::for_testing());
    let a = new_node(&heap, node, Generation::Young, 1);
    let b = new_node(&heap, node, Generation::Young, 2);
    let c = new_node(&heap, node, Generation::Young, 3);
    link(&heap, a, NEXT, b);
    link(&heap, b, NEXT, c);

    let mut roots = RootSet::new();
    roots.push_object(a);
    let result = Scavenger::new().scavenge(&mut heap, &roots);

    assert_eq!(result.objects_copied, 3);
    assert_eq!(result.objects_promoted, 0);
    assert_eq!(result.bytes_copied, 3 * NODE_SIZE);

    let a2 = roots.object(0).unwrap();
    assert_ne!(a2, a);
    assert!(heap.is_in_to_space(a2));
    let b2 = field(&heap, a2, NEXT).unwrap();
    let c2 = field(&heap, b2, NEXT).unwrap();
    assert!(heap.is_in_to_space(b2));
    assert!(heap.is_in_to_space(c2));
    assert_eq!(field(&heap, c2, NEXT), None);
    assert_eq!(
        [payload(&heap, a2), payload(&heap, b2), payload(&heap, c2)],
        [Some(1), Some(2), Some(3)]
    );

    assert_eq!(heap.from_space().allocated(), 0);
    assert_eq!(count_objects(&heap, Space::To, node), 3);
}

// =============================================================================
// Exactly-Once Evacuation
// =============================================================================

#[test]
fn test_shared_and_cyclic_graph_evacuated_once() {
    let (mut heap, node) = setup(GcConfig::for_testing());
    // a -> b, a -> c, b -> d, c -> d, d -> a (cycle)
    let a = new_node(&heap, node, Generation::Young, 0);
    let b = new_node(&heap, node, Generation::Young, 1);
    let c = new_node(&heap, node, Generation::Young, 2);
    let d = new_node(&heap, node, Generation::Young, 3);
    new_node(&heap, node, Generation::Young, 99); // garbage
    link(&heap, a, NEXT, b);
    link(&heap, a, OTHER, c);
    link(&heap, b, NEXT, d);
    link(&heap, c, NEXT, d);
    link(&heap, d, NEXT, a);

    let mut roots = RootSet::new();
    roots.push_object(a);
    roots.push_object(d);
    let result = Scavenger::new().scavenge(&mut heap, &roots);

    let live = reachable(&heap, &roots);
    assert_eq!(live.len(), 4);
    assert_eq!(result.survivors(), 4);
    assert_eq!(count_objects(&heap, Space::To, node), 4);
    assert!(live.iter().all(|&o| heap.is_in_to_space(o)));

    let payloads: FxHashSet<i64> = live.iter().filter_map(|&o| payload(&heap, o)).collect();
    let expected: FxHashSet<i64> = [0, 1, 2, 3].into_iter().collect();
    assert_eq!(payloads, expected);
}

#[test]
fn test_forwarding_consistency() {
    let (mut heap, node) = setup(GcConfig::for_testing());
    let shared = new_node(&heap, node, Generation::Young, 7);
    let x = new_node(&heap, node, Generation::Young, 1);
    let y = new_node(&heap, node, Generation::Young, 2);
    link(&heap, x, NEXT, shared);
    link(&heap, y, OTHER, shared);

    let old_holder = new_node(&heap, node, Generation::Old, 3);
    link(&heap, old_holder, NEXT, shared);

    let mut roots = RootSet::new();
    roots.push_object(shared);
    roots.push_object(x);
    roots.push_object(y);
    roots.push_object(shared);
    roots.push_object(old_holder);
    Scavenger::new().scavenge(&mut heap, &roots);

    let moved = roots.object(0).unwrap();
    assert_eq!(roots.object(3), Some(moved));
    assert_eq!(field(&heap, roots.object(1).unwrap(), NEXT), Some(moved));
    assert_eq!(field(&heap, roots.object(2).unwrap(), OTHER), Some(moved));
    assert_eq!(field(&heap, old_holder, NEXT), Some(moved));
    assert_eq!(roots.object(4), Some(old_holder));
    assert_eq!(payload(&heap, moved), Some(7));
}

// =============================================================================
// Remembered Set
// =============================================================================

#[test]
fn test_no_from_space_pointers_after_scavenge() {
    let (mut heap, node) = setup(GcConfig::for_testing());
    let holder = new_node(&heap, node, Generation::Old, 0);
    let young = new_node(&heap, node, Generation::Young, 1);
    let unreferenced_old = new_node(&heap, node, Generation::Old, 2);
    link(&heap, holder, NEXT, young);
    link(&heap, holder, OTHER, unreferenced_old);
    assert_eq!(heap.remembered_set().snapshot(), vec![holder.offset(NEXT)]);

    let roots = RootSet::new();
    let mut scavenger = Scavenger::new();
    let first = scavenger.scavenge(&mut heap, &roots);

    // Reachable only through the remembered slot.
    let moved = field(&heap, holder, NEXT).unwrap();
    assert!(heap.is_in_to_space(moved));
    assert_eq!(first.remembered_in, 1);
    assert_eq!(first.remembered_out, 1);
    assert_eq!(verify_heap(&heap, &roots), Ok(()));

    // Second cycle promotes it; the slot no longer needs remembering.
    let second = scavenger.scavenge(&mut heap, &roots);
    let promoted = field(&heap, holder, NEXT).unwrap();
    assert!(heap.in_old(promoted));
    assert_eq!(second.objects_promoted, 1);
    assert_eq!(second.remembered_out, 0);
    assert!(heap.remembered_set().is_empty());
    assert_eq!(payload(&heap, promoted), Some(1));
}

#[test]
fn test_stale_remembered_slot_dropped() {
    let (mut heap, node) = setup(GcConfig::for_testing());
    let holder = new_node(&heap, node, Generation::Old, 0);
    let young = new_node(&heap, node, Generation::Young, 1);
    link(&heap, holder, NEXT, young);
    heap.write_field(holder, NEXT, Tagged::from_smi(0));

    let result = Scavenger::new().scavenge(&mut heap, &RootSet::new());
    assert_eq!(result.remembered_in, 1);
    assert_eq!(result.remembered_out, 0);
    assert_eq!(result.survivors(), 0);
}

// =============================================================================
// Promotion
// =============================================================================

#[test]
fn test_promotion_queue_drains_chain() {
    let (mut heap, node) = setup(GcConfig::for_testing());
    let mut roots = RootSet::new();
    let head = new_node(&heap, node, Generation::Young, 0);
    let mut prev = head;
    for i in 1..20 {
        let next = new_node(&heap, node, Generation::Young, i);
        link(&heap, prev, NEXT, next);
        prev = next;
    }
    roots.push_object(head);

    let mut scavenger = Scavenger::new();
    let first = scavenger.scavenge(&mut heap, &roots);
    assert_eq!(first.objects_copied, 20);

    // A young object allocated after the first cycle, hung off the tail.
    let tail = reachable(&heap, &roots)
        .into_iter()
        .find(|&o| payload(&heap, o) == Some(19))
        .unwrap();
    let fresh = new_node(&heap, node, Generation::Young, 20);
    link(&heap, tail, NEXT, fresh);

    let second = scavenger.scavenge(&mut heap, &roots);
    assert_eq!(second.objects_promoted, 20);
    assert_eq!(second.objects_copied, 1);
    assert_eq!(second.promotion_queue_processed, 20);

    // The promoted tail now holds an old→young slot.
    let tail = reachable(&heap, &roots)
        .into_iter()
        .find(|&o| payload(&heap, o) == Some(19))
        .unwrap();
    assert!(heap.in_old(tail));
    assert_eq!(heap.remembered_set().snapshot(), vec![tail.offset(NEXT)]);

    let mut walked = Vec::new();
    let mut cursor = roots.object(0);
    while let Some(object) = cursor {
        walked.push(payload(&heap, object).unwrap());
        cursor = field(&heap, object, NEXT);
    }
    assert_eq!(walked, (0..=20).collect::<Vec<_>>());
}

#[test]
fn test_lifetime_stats_accumulate() {
    let (mut heap, node) = setup(GcConfig::for_testing());
    let mut roots = RootSet::new();
    roots.push_object(new_node(&heap, node, Generation::Young, 0));

    let mut scavenger = Scavenger::new();
    scavenger.scavenge(&mut heap, &roots);
    scavenger.scavenge(&mut heap, &roots);

    let stats = heap.stats();
    assert_eq!(stats.scavenges.load(Ordering::Relaxed), 2);
    assert_eq!(stats.objects_copied.load(Ordering::Relaxed), 1);
    assert_eq!(stats.objects_promoted.load(Ordering::Relaxed), 1);
}

// =============================================================================
// Parallel Workers
// =============================================================================

#[test]
fn test_parallel_scavenge_large_graph() {
    let config = GcConfig {
        semispace_size: 1024 * 1024,
        old_space_size: 4 * 1024 * 1024,
        page_size: 64 * 1024,
        lab_size: 4 * 1024,
        worker_threads: 4,
        ..GcConfig::for_testing()
    };
    let (mut heap, node) = setup(config);

    // Many roots into a densely shared graph so workers race on objects.
    let count = 4000;
    let nodes: Vec<Address> = (0..count)
        .map(|i| new_node(&heap, node, Generation::Young, i as i64))
        .collect();
    for (i, &n) in nodes.iter().enumerate() {
        link(&heap, n, NEXT, nodes[(i + 1) % count]);
        link(&heap, n, OTHER, nodes[(i * 7 + 3) % count]);
    }
    let mut roots = RootSet::new();
    for &n in nodes.iter().step_by(3) {
        roots.push_object(n);
    }

    let mut scavenger = Scavenger::new();
    for cycle in 0..2 {
        let result = scavenger.scavenge(&mut heap, &roots);
        assert_eq!(result.survivors(), count);
        if cycle == 1 {
            assert_eq!(result.objects_promoted, count);
        }

        let live = reachable(&heap, &roots);
        assert_eq!(live.len(), count);
        let mut by_payload: FxHashMap<i64, Address> = FxHashMap::default();
        for &object in &live {
            assert!(!heap.is_in_from_space(object));
            assert!(by_payload.insert(payload(&heap, object).unwrap(), object).is_none());
        }
        for i in 0..count {
            let object = by_payload[&(i as i64)];
            assert_eq!(field(&heap, object, NEXT), Some(by_payload[&(((i + 1) % count) as i64)]));
            assert_eq!(
                field(&heap, object, OTHER),
                Some(by_payload[&(((i * 7 + 3) % count) as i64)])
            );
        }
    }
    assert_eq!(count_objects(&heap, Space::Old, node), count);
    assert_eq!(count_objects(&heap, Space::To, node), 0);
}
