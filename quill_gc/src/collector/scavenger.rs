//! Young-generation scavenger.
//!
//! A scavenge evacuates every live object out of from-space, either into
//! to-space (a semispace copy) or into old space (a promotion), and
//! rewrites every slot that referenced it.
//!
//! # Slot States
//!
//! Each visited slot is in one of three states:
//!
//! 1. **Unvisited from-space object**: evacuate it and point the slot at
//!    the copy.
//! 2. **Forwarded**: the header already holds the new address; point the
//!    slot there.
//! 3. **Anything else** (old object, to-space object, Smi): leave it.
//!
//! # Algorithm
//!
//! ```text
//! flip semispaces
//! drain remembered set
//! workers (parallel, disjoint partitions):
//!     scavenge root slots
//!     scavenge remembered slots, keep those still pointing young
//!     loop until no worker has work:
//!         scan copied objects      (work list)
//!         scan promoted objects    (promotion queue)
//! re-insert kept slots, age to-space, wipe from-space
//! ```
//!
//! # Concurrency
//!
//! Forwarding is installed with a compare-and-swap on the source header.
//! A worker that loses the race turns its copy into filler and adopts the
//! winner's address, so every object is evacuated exactly once. Slot
//! updates are CAS operations that only succeed while the slot still holds
//! the value that was read.

use super::lab::LocalAllocationBuffer;
use super::promotion_queue::PromotionQueue;
use super::worklist::{Local, WorkList};
use crate::error::{fatal, FatalHeapError};
use crate::heap::Heap;
use crate::object::{BodyContents, ObjectKind, Shape};
use crate::roots::RootProvider;
use crate::stats::{GcTimer, ScavengeResult};
use crate::tagged::{Address, MapWord, Tagged};
use crate::verify;

use std::sync::atomic::{AtomicUsize, Ordering};

/// Attempts for a slot update before giving up on a contended slot.
const MAX_SLOT_RETRIES: usize = 16;

/// Where a slot points after it has been processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotTarget {
    /// Not a heap reference.
    NotPointer,
    /// A young-generation object.
    Young,
    /// An old-generation object.
    Old,
}

/// Young-generation copying collector.
#[derive(Debug, Default)]
pub struct Scavenger {
    cycles: usize,
}

impl Scavenger {
    /// Create a new scavenger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed scavenges.
    pub fn cycles(&self) -> usize {
        self.cycles
    }

    /// Perform a scavenge.
    ///
    /// Runs to completion. Heap-invariant violations terminate the process.
    pub fn scavenge(&mut self, heap: &mut Heap, roots: &dyn RootProvider) -> ScavengeResult {
        let timer = GcTimer::start("scavenge");
        let young_before = heap.to_space().allocated();

        heap.flip();
        let remembered = heap.remembered_set().drain();
        let workers = heap.config().worker_threads;

        let mut result = ScavengeResult {
            remembered_in: remembered.len(),
            ..Default::default()
        };

        let copied = WorkList::new();
        let promotion_queue = PromotionQueue::new();
        let mut kept_slots = Vec::new();
        {
            let shared: &Heap = heap;
            let context = Context {
                heap: shared,
                roots,
                remembered: &remembered,
                copied: &copied,
                promotion_queue: &promotion_queue,
                active: AtomicUsize::new(workers),
                workers,
                promote_survivors: shared.config().promote_survivors,
                age_mark: shared.from_space().age_mark(),
                lab_size: shared.config().lab_size,
                marking: shared.is_marking(),
                empty_sentinel: shared.empty_sentinel(),
            };

            let outputs: Vec<WorkerOutput> = std::thread::scope(|s| {
                let context = &context;
                let handles: Vec<_> = (1..workers)
                    .map(|id| s.spawn(move || Worker::new(context, id).run()))
                    .collect();
                let mut outputs = vec![Worker::new(context, 0).run()];
                for handle in handles {
                    match handle.join() {
                        Ok(output) => outputs.push(output),
                        Err(panic) => std::panic::resume_unwind(panic),
                    }
                }
                outputs
            });

            for output in outputs {
                result.merge(&output.result);
                kept_slots.extend(output.remembered);
            }
        }

        debug_assert!(promotion_queue.is_empty(), "promotion queue not drained");
        debug_assert_eq!(promotion_queue.inserted(), promotion_queue.processed());
        debug_assert!(copied.is_empty(), "copied work list not drained");

        heap.remembered_set().extend(kept_slots);
        result.remembered_out = heap.remembered_set().snapshot().len();
        heap.finish_scavenge();

        if heap.config().verify_heap {
            if let Err(errors) = verify::verify_heap(heap, roots) {
                let report = errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                fatal(FatalHeapError::Verification(report));
            }
        }

        result.duration = timer.stop();
        heap.stats().record_scavenge(&result);
        self.cycles += 1;

        let summary = format!(
            "scavenge #{}: {} young bytes -> copied {} ({} objects), promoted {} ({} objects), \
             remembered {} -> {}, {:?}",
            self.cycles,
            young_before,
            result.bytes_copied,
            result.objects_copied,
            result.bytes_promoted,
            result.objects_promoted,
            result.remembered_in,
            result.remembered_out,
            result.duration,
        );
        if heap.config().trace {
            log::info!("{summary}");
        } else {
            log::debug!("{summary}");
        }
        result
    }
}

// =============================================================================
// Shared Context
// =============================================================================

/// State shared by all workers of one scavenge.
struct Context<'a> {
    heap: &'a Heap,
    roots: &'a dyn RootProvider,
    remembered: &'a [Address],
    copied: &'a WorkList<Address>,
    promotion_queue: &'a PromotionQueue,
    /// Workers currently holding or looking for work.
    active: AtomicUsize,
    workers: usize,
    promote_survivors: bool,
    age_mark: Address,
    lab_size: usize,
    marking: bool,
    empty_sentinel: Option<Tagged>,
}

impl Context<'_> {
    fn has_global_work(&self) -> bool {
        !self.copied.is_empty() || !self.promotion_queue.is_empty()
    }
}

struct WorkerOutput {
    result: ScavengeResult,
    remembered: Vec<Address>,
}

// =============================================================================
// Worker
// =============================================================================

struct Worker<'a> {
    id: usize,
    ctx: &'a Context<'a>,
    heap: &'a Heap,
    copied: Local<'a, Address>,
    lab: LocalAllocationBuffer,
    result: ScavengeResult,
    /// Old-space slots that still point young after processing.
    remembered: Vec<Address>,
}

impl<'a> Worker<'a> {
    fn new(ctx: &'a Context<'a>, id: usize) -> Self {
        Self {
            id,
            ctx,
            heap: ctx.heap,
            copied: ctx.copied.local(),
            lab: LocalAllocationBuffer::empty(),
            result: ScavengeResult::default(),
            remembered: Vec::new(),
        }
    }

    fn run(mut self) -> WorkerOutput {
        let ctx = self.ctx;

        ctx.roots.visit_roots(self.id, ctx.workers, &mut |slot| {
            self.result.roots_visited += 1;
            self.scavenge_pointer(slot);
        });

        let chunk = ctx.remembered.len().div_ceil(ctx.workers).max(1);
        if let Some(slots) = ctx.remembered.chunks(chunk).nth(self.id) {
            for &slot in slots {
                self.check_and_scavenge_slot(slot);
            }
        }

        self.process_until_done();
        self.lab.close(self.heap);

        WorkerOutput {
            result: self.result,
            remembered: self.remembered,
        }
    }

    /// Drain local and global work until every worker is idle.
    fn process_until_done(&mut self) {
        let ctx = self.ctx;
        loop {
            self.drain();
            self.copied.publish();

            ctx.active.fetch_sub(1, Ordering::AcqRel);
            loop {
                if ctx.has_global_work() {
                    ctx.active.fetch_add(1, Ordering::AcqRel);
                    break;
                }
                if ctx.active.load(Ordering::Acquire) == 0 {
                    return;
                }
                std::hint::spin_loop();
                std::thread::yield_now();
            }
        }
    }

    fn drain(&mut self) {
        loop {
            while let Some(object) = self.copied.pop() {
                self.scan_object(object, false);
            }
            match self.ctx.promotion_queue.remove() {
                Some(entry) => {
                    self.result.promotion_queue_processed += 1;
                    self.scan_object(entry.target, true);
                }
                None => break,
            }
        }
    }

    // =========================================================================
    // Slots
    // =========================================================================

    /// Process one remembered slot, keeping it only if it still points
    /// into the young generation.
    fn check_and_scavenge_slot(&mut self, slot_address: Address) {
        let heap = self.heap;
        let Some(slot) = heap.slot(slot_address) else {
            fatal(FatalHeapError::CorruptHeader {
                object: slot_address,
                raw: 0,
            });
        };
        if self.scavenge_pointer(slot) == SlotTarget::Young {
            self.remembered.push(slot_address);
        }
    }

    /// Scavenge the object a slot references and redirect the slot.
    fn scavenge_pointer(&mut self, slot: &AtomicUsize) -> SlotTarget {
        let old = slot.load(Ordering::Acquire);
        let Some(object) = Tagged::from_raw(old).as_address() else {
            return SlotTarget::NotPointer;
        };
        if !self.heap.is_in_from_space(object) {
            return self.classify(object);
        }

        let target = self.scavenge_object(object);
        update_slot(slot, old, Tagged::from_address(target).raw());
        self.classify(target)
    }

    #[inline]
    fn classify(&self, object: Address) -> SlotTarget {
        if self.heap.in_young(object) {
            SlotTarget::Young
        } else {
            SlotTarget::Old
        }
    }

    // =========================================================================
    // Evacuation
    // =========================================================================

    /// New address of a from-space object, evacuating it if necessary.
    fn scavenge_object(&mut self, object: Address) -> Address {
        let heap = self.heap;
        let raw = heap.header(object).load(Ordering::Acquire);
        match MapWord::decode(raw) {
            MapWord::Forwarded(target) => target,
            MapWord::Shape(id) => {
                let shape = match heap.shape(object, id) {
                    Ok(shape) => shape,
                    Err(e) => fatal(e),
                };
                self.evacuate(object, shape, raw)
            }
        }
    }

    fn evacuate(&mut self, object: Address, shape: &Shape, raw: usize) -> Address {
        if !self.ctx.marking {
            match shape.kind {
                ObjectKind::ShortcutCandidate { first, second } => {
                    if let Some(target) = self.try_shortcut(object, raw, first, second) {
                        return target;
                    }
                }
                ObjectKind::ThinReference { target } => {
                    if let Some(actual) = self.try_thin_reference(object, raw, target) {
                        return actual;
                    }
                }
                _ => {}
            }
        }

        let target = self.evacuate_default(object, shape, raw);
        if let ObjectKind::Function { code_entry } = shape.kind {
            if self.ctx.marking {
                self.heap.record_slot(target.offset(code_entry));
            }
        }
        target
    }

    /// Collapse a pair whose second half is empty onto its first half.
    fn try_shortcut(
        &mut self,
        object: Address,
        raw: usize,
        first: usize,
        second: usize,
    ) -> Option<Address> {
        let sentinel = self.ctx.empty_sentinel?;
        if self.heap.read_field(object, second) != sentinel {
            return None;
        }
        let first_object = self.heap.read_field(object, first).as_address()?;
        if first_object == object {
            return None;
        }
        let target = if self.heap.is_in_from_space(first_object) {
            self.evacuate_shortcut_target(first_object)
        } else {
            first_object
        };
        log::trace!("scavenge: shortcut {object} -> {target}");
        self.result.shortcuts += 1;
        Some(self.install_forwarding(object, raw, target))
    }

    /// Evacuate the first half of a shortcut without dispatching on its kind,
    /// so chains and cycles of candidates never recurse.
    fn evacuate_shortcut_target(&mut self, object: Address) -> Address {
        let heap = self.heap;
        let raw = heap.header(object).load(Ordering::Acquire);
        match MapWord::decode(raw) {
            MapWord::Forwarded(target) => target,
            MapWord::Shape(id) => {
                let shape = match heap.shape(object, id) {
                    Ok(shape) => shape,
                    Err(e) => fatal(e),
                };
                self.evacuate_default(object, shape, raw)
            }
        }
    }

    /// Resolve an indirection to its old-space target.
    fn try_thin_reference(&mut self, object: Address, raw: usize, target: usize) -> Option<Address> {
        let actual = self.heap.read_field(object, target).as_address()?;
        if !self.heap.in_old(actual) {
            return None;
        }
        self.result.shortcuts += 1;
        Some(self.install_forwarding(object, raw, actual))
    }

    fn evacuate_default(&mut self, object: Address, shape: &Shape, raw: usize) -> Address {
        let size = match self.heap.size_with_shape(object, shape) {
            Ok(size) => size,
            Err(e) => fatal(e),
        };
        let contents = shape.contents();

        if !self.should_be_promoted(object) {
            if let Some(target) = self.semispace_copy(object, shape, size, raw, contents) {
                return target;
            }
        }
        if let Some(target) = self.promote(object, shape, size, raw, contents) {
            return target;
        }
        if let Some(target) = self.semispace_copy(object, shape, size, raw, contents) {
            return target;
        }

        log::error!(
            "scavenge: cannot evacuate {} ({}, {size} bytes)",
            object,
            shape.name
        );
        fatal(FatalHeapError::OutOfMemory { object, size })
    }

    #[inline]
    fn should_be_promoted(&self, object: Address) -> bool {
        self.ctx.promote_survivors && object < self.ctx.age_mark
    }

    fn semispace_copy(
        &mut self,
        object: Address,
        shape: &Shape,
        size: usize,
        raw: usize,
        contents: BodyContents,
    ) -> Option<Address> {
        let target = self.allocate_in_to_space(size, shape)?;
        let winner = self.migrate(object, target, size, raw);
        if winner != target {
            self.abandon(target, size);
            return Some(winner);
        }

        log::trace!("scavenge: copy {object} -> {target} ({size} bytes)");
        self.result.objects_copied += 1;
        self.result.bytes_copied += size;
        if contents == BodyContents::Pointer {
            self.copied.push(target);
        }
        Some(target)
    }

    fn promote(
        &mut self,
        object: Address,
        shape: &Shape,
        size: usize,
        raw: usize,
        contents: BodyContents,
    ) -> Option<Address> {
        let target = self.heap.allocate_old(size, shape.alignment).ok()?;
        let winner = self.migrate(object, target, size, raw);
        if winner != target {
            self.abandon(target, size);
            return Some(winner);
        }

        log::trace!("scavenge: promote {object} -> {target} ({size} bytes)");
        self.result.objects_promoted += 1;
        self.result.bytes_promoted += size;
        if contents == BodyContents::Pointer {
            self.ctx.promotion_queue.insert(target, size);
        }
        Some(target)
    }

    /// Allocate a copy target in to-space, through the LAB for small objects.
    fn allocate_in_to_space(&mut self, size: usize, shape: &Shape) -> Option<Address> {
        let heap = self.heap;
        if size <= self.ctx.lab_size / 2 {
            if let Some(target) = self.lab.allocate(heap, size, shape.alignment) {
                self.lab.check_copy_target(target, size);
                return Some(target);
            }
            if self.lab.refill(heap, heap.to_space(), self.ctx.lab_size) {
                if let Some(target) = self.lab.allocate(heap, size, shape.alignment) {
                    self.lab.check_copy_target(target, size);
                    return Some(target);
                }
            }
        }
        heap.allocate_young(size, shape.alignment).ok()
    }

    /// Copy the body, then race to install forwarding. Returns the address
    /// every slot must use from now on.
    fn migrate(&self, source: Address, target: Address, size: usize, raw: usize) -> Address {
        self.heap.copy_body(source, target, size);
        self.heap.header(target).store(raw, Ordering::Relaxed);
        self.install_forwarding(source, raw, target)
    }

    fn install_forwarding(&self, source: Address, raw: usize, target: Address) -> Address {
        let forwarding = MapWord::Forwarded(target).encode();
        match self.heap.header(source).compare_exchange(
            raw,
            forwarding,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => target,
            Err(actual) => match MapWord::decode(actual) {
                MapWord::Forwarded(winner) => winner,
                MapWord::Shape(_) => fatal(FatalHeapError::CorruptHeader {
                    object: source,
                    raw: actual,
                }),
            },
        }
    }

    fn abandon(&mut self, copy: Address, size: usize) {
        self.heap.create_filler(copy, size);
        self.result.bytes_abandoned += size;
    }

    // =========================================================================
    // Scanning
    // =========================================================================

    /// Visit every pointer slot of an evacuated object.
    ///
    /// Slots of promoted objects that still point young are remembered.
    fn scan_object(&mut self, object: Address, promoted: bool) {
        let heap = self.heap;
        let (_, shape) = match heap.shape_of(object) {
            Ok(found) => found,
            Err(e) => fatal(e),
        };
        let size = match heap.size_with_shape(object, shape) {
            Ok(size) => size,
            Err(e) => fatal(e),
        };
        for offset in shape.pointer_slots(size) {
            let slot_address = object.offset(offset);
            let Some(slot) = heap.slot(slot_address) else {
                continue;
            };
            if self.scavenge_pointer(slot) == SlotTarget::Young && promoted {
                self.remembered.push(slot_address);
            }
        }
    }
}

/// Redirect `slot` from `old` to `new`, only while it still holds `old`.
#[inline]
fn update_slot(slot: &AtomicUsize, old: usize, new: usize) {
    for _ in 0..MAX_SLOT_RETRIES {
        match slot.compare_exchange_weak(old, new, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return,
            Err(actual) if actual == old => continue,
            Err(_) => return,
        }
    }
    // Spurious failures only; a strong exchange settles it.
    let _ = slot.compare_exchange(old, new, Ordering::AcqRel, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GcConfig;
    use crate::heap::{Generation, Space};
    use crate::object::{BodyRegion, RegionEnd, ShapeId};
    use crate::roots::RootSet;

    fn heap() -> Heap {
        Heap::new(GcConfig::for_testing()).unwrap()
    }

    #[test]
    fn test_update_slot_respects_concurrent_writer() {
        let slot = AtomicUsize::new(10);
        update_slot(&slot, 10, 20);
        assert_eq!(slot.load(Ordering::Relaxed), 20);
        update_slot(&slot, 10, 30);
        assert_eq!(slot.load(Ordering::Relaxed), 20);
    }

    #[test]
    fn test_unreachable_objects_are_dropped() {
        let mut heap = heap();
        let pair = heap.register_shape(Shape::fixed("pair", 24)).unwrap();
        let live = heap.allocate(pair, 0, Generation::Young).unwrap();
        heap.allocate(pair, 0, Generation::Young).unwrap();

        let mut roots = RootSet::new();
        roots.push_object(live);
        let result = Scavenger::new().scavenge(&mut heap, &roots);

        assert_eq!(result.objects_copied, 1);
        assert_eq!(result.bytes_copied, 24);
        assert!(heap.is_in_to_space(roots.object(0).unwrap()));
        assert_eq!(heap.from_space().allocated(), 0);
    }

    #[test]
    fn test_smi_roots_untouched() {
        let mut heap = heap();
        let mut roots = RootSet::new();
        roots.push(Tagged::from_smi(99));
        let result = Scavenger::new().scavenge(&mut heap, &roots);
        assert_eq!(roots.get(0).and_then(Tagged::as_smi), Some(99));
        assert_eq!(result.survivors(), 0);
        assert_eq!(result.roots_visited, 1);
    }

    #[test]
    fn test_survivors_promoted_on_second_cycle() {
        let mut heap = heap();
        let pair = heap.register_shape(Shape::fixed("pair", 24)).unwrap();
        let obj = heap.allocate(pair, 0, Generation::Young).unwrap();
        let mut roots = RootSet::new();
        roots.push_object(obj);

        let mut scavenger = Scavenger::new();
        let first = scavenger.scavenge(&mut heap, &roots);
        assert_eq!(first.objects_copied, 1);
        assert!(heap.in_young(roots.object(0).unwrap()));

        let second = scavenger.scavenge(&mut heap, &roots);
        assert_eq!(second.objects_promoted, 1);
        assert!(heap.in_old(roots.object(0).unwrap()));
        assert_eq!(scavenger.cycles(), 2);
    }

    #[test]
    fn test_data_only_objects_not_queued() {
        let mut heap = heap();
        let bytes = heap.register_shape(Shape::byte_array("bytes")).unwrap();
        let obj = heap.allocate(bytes, 100, Generation::Young).unwrap();
        heap.write_word(obj.offset(16), 0xdead_beef);
        let mut roots = RootSet::new();
        roots.push_object(obj);

        let mut scavenger = Scavenger::new();
        scavenger.scavenge(&mut heap, &roots);
        let result = scavenger.scavenge(&mut heap, &roots);

        assert_eq!(result.objects_promoted, 1);
        assert_eq!(result.promotion_queue_processed, 0);
        let moved = roots.object(0).unwrap();
        assert_eq!(heap.read_word(moved.offset(16)), 0xdead_beef);
        assert_eq!(heap.size_of(moved).unwrap(), 120);
    }

    #[test]
    fn test_shortcut_candidate_collapses() {
        let mut heap = heap();
        let pair = heap.register_shape(Shape::fixed("pair", 24)).unwrap();
        let cons = heap
            .register_shape(
                Shape::fixed("cons", 24).kind(ObjectKind::ShortcutCandidate {
                    first: 8,
                    second: 16,
                }),
            )
            .unwrap();
        let empty = heap.allocate(pair, 0, Generation::Old).unwrap();
        heap.set_empty_sentinel(Tagged::from_address(empty));

        let leaf = heap.allocate(pair, 0, Generation::Young).unwrap();
        heap.write_field(leaf, 8, Tagged::from_smi(5));
        let candidate = heap.allocate(cons, 0, Generation::Young).unwrap();
        heap.write_field(candidate, 8, Tagged::from_address(leaf));
        heap.write_field(candidate, 16, Tagged::from_address(empty));

        let mut roots = RootSet::new();
        roots.push_object(candidate);
        roots.push_object(leaf);
        let result = Scavenger::new().scavenge(&mut heap, &roots);

        assert_eq!(result.shortcuts, 1);
        assert_eq!(result.objects_copied, 1);
        assert_eq!(roots.object(0), roots.object(1));
        let leaf_copy = roots.object(0).unwrap();
        assert_eq!(heap.read_field(leaf_copy, 8).as_smi(), Some(5));
    }

    /// Registers `pair` and `cons` and installs an old empty sentinel.
    fn shortcut_heap(config: GcConfig) -> (Heap, ShapeId, ShapeId, Address) {
        let mut heap = Heap::new(config).unwrap();
        let pair = heap.register_shape(Shape::fixed("pair", 24)).unwrap();
        let cons = heap
            .register_shape(
                Shape::fixed("cons", 24).kind(ObjectKind::ShortcutCandidate {
                    first: 8,
                    second: 16,
                }),
            )
            .unwrap();
        let empty = heap.allocate(pair, 0, Generation::Old).unwrap();
        heap.set_empty_sentinel(Tagged::from_address(empty));
        (heap, pair, cons, empty)
    }

    #[test]
    fn test_shortcut_cycle_terminates() {
        let (mut heap, _, cons, empty) = shortcut_heap(GcConfig::for_testing());
        let a = heap.allocate(cons, 0, Generation::Young).unwrap();
        let b = heap.allocate(cons, 0, Generation::Young).unwrap();
        for (object, first) in [(a, b), (b, a)] {
            heap.write_field(object, 8, Tagged::from_address(first));
            heap.write_field(object, 16, Tagged::from_address(empty));
        }

        let mut roots = RootSet::new();
        roots.push_object(a);
        let result = Scavenger::new().scavenge(&mut heap, &roots);

        assert_eq!(result.shortcuts, 1);
        assert_eq!(result.objects_copied, 1);
        let b_copy = roots.object(0).unwrap();
        assert!(heap.is_in_to_space(b_copy));
        assert_eq!(heap.read_field(b_copy, 8).as_address(), Some(b_copy));
        assert_eq!(heap.read_field(b_copy, 16).as_address(), Some(empty));
    }

    #[test]
    fn test_long_shortcut_chain_does_not_recurse() {
        const LEN: usize = 50_000;
        let config = GcConfig {
            semispace_size: 4 * 1024 * 1024,
            old_space_size: 8 * 1024 * 1024,
            ..GcConfig::for_testing()
        };
        let (mut heap, pair, cons, empty) = shortcut_heap(config);
        let leaf = heap.allocate(pair, 0, Generation::Young).unwrap();
        heap.write_field(leaf, 8, Tagged::from_smi(7));

        let mut next = leaf;
        for _ in 0..LEN {
            let link = heap.allocate(cons, 0, Generation::Young).unwrap();
            heap.write_field(link, 8, Tagged::from_address(next));
            heap.write_field(link, 16, Tagged::from_address(empty));
            next = link;
        }

        let mut roots = RootSet::new();
        roots.push_object(next);
        let result = Scavenger::new().scavenge(&mut heap, &roots);
        assert!(result.shortcuts > 0);

        let mut object = roots.object(0).unwrap();
        let mut steps = 0;
        while let Some(first) = heap.read_field(object, 8).as_address() {
            assert!(!heap.is_in_from_space(first));
            object = first;
            steps += 1;
            assert!(steps <= LEN);
        }
        assert_eq!(heap.read_field(object, 8).as_smi(), Some(7));
    }

    #[test]
    fn test_shortcut_disabled_while_marking() {
        let mut heap = heap();
        let pair = heap.register_shape(Shape::fixed("pair", 24)).unwrap();
        let cons = heap
            .register_shape(
                Shape::fixed("cons", 24).kind(ObjectKind::ShortcutCandidate {
                    first: 8,
                    second: 16,
                }),
            )
            .unwrap();
        let empty = heap.allocate(pair, 0, Generation::Old).unwrap();
        heap.set_empty_sentinel(Tagged::from_address(empty));
        heap.set_marking(true);

        let leaf = heap.allocate(pair, 0, Generation::Young).unwrap();
        let candidate = heap.allocate(cons, 0, Generation::Young).unwrap();
        heap.write_field(candidate, 8, Tagged::from_address(leaf));
        heap.write_field(candidate, 16, Tagged::from_address(empty));

        let mut roots = RootSet::new();
        roots.push_object(candidate);
        let result = Scavenger::new().scavenge(&mut heap, &roots);

        assert_eq!(result.shortcuts, 0);
        assert_eq!(result.objects_copied, 2);
    }

    #[test]
    fn test_thin_reference_resolves_to_old_target() {
        let mut heap = heap();
        let pair = heap.register_shape(Shape::fixed("pair", 24)).unwrap();
        let thin = heap
            .register_shape(
                Shape::fixed("thin", 16).kind(ObjectKind::ThinReference { target: 8 }),
            )
            .unwrap();
        let actual = heap.allocate(pair, 0, Generation::Old).unwrap();
        let indirection = heap.allocate(thin, 0, Generation::Young).unwrap();
        heap.write_field(indirection, 8, Tagged::from_address(actual));

        let mut roots = RootSet::new();
        roots.push_object(indirection);
        let result = Scavenger::new().scavenge(&mut heap, &roots);

        assert_eq!(roots.object(0), Some(actual));
        assert_eq!(result.survivors(), 0);
    }

    #[test]
    fn test_function_code_entry_recorded_while_marking() {
        let mut heap = heap();
        let function = heap
            .register_shape(
                Shape::with_regions(
                    "function",
                    32,
                    [BodyRegion::pointers(8, RegionEnd::ObjectEnd)],
                )
                .kind(ObjectKind::Function { code_entry: 16 }),
            )
            .unwrap();
        let f = heap.allocate(function, 0, Generation::Young).unwrap();
        let mut roots = RootSet::new();
        roots.push_object(f);

        heap.set_marking(true);
        Scavenger::new().scavenge(&mut heap, &roots);

        let moved = roots.object(0).unwrap();
        assert_eq!(heap.take_recorded_slots(), vec![moved.offset(16)]);
    }

    #[test]
    fn test_to_space_overflow_promotes() {
        let config = GcConfig {
            promote_survivors: false,
            ..GcConfig::for_testing()
        };
        let mut heap = Heap::new(config).unwrap();
        // Two chunks per LAB; each LAB wastes a 16-byte tail.
        let chunk = heap
            .register_shape(Shape::with_regions("chunk", 504, []))
            .unwrap();
        let mut roots = RootSet::new();
        while let Ok(obj) = heap.allocate(chunk, 0, Generation::Young) {
            roots.push_object(obj);
        }
        assert_eq!(roots.len(), 130);

        let result = Scavenger::new().scavenge(&mut heap, &roots);
        assert_eq!(result.objects_copied, 128);
        assert_eq!(result.objects_promoted, 2);
        assert_eq!(heap.old_space().usage(), 2 * 504);

        let mut young = 0;
        heap.for_each_object(Space::To, |_, id, _| {
            if id == chunk {
                young += 1;
            }
        })
        .unwrap();
        assert_eq!(young, 128);
    }
}
