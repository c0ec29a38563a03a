//! Slab-chain allocator backing every op built for one compilation unit.
//!
//! An [`OpArena`] owns a growable chain of slabs. Nodes are handed out as
//! packed 32-bit [`OpRef`] handles (slab index plus cell offset), freed slots
//! are recycled through per-size-class free lists, and the chain as a whole
//! is reference counted so its storage can be released exactly once, either
//! explicitly by its owning compilation unit or automatically when the last
//! outstanding op is freed.
//!
//! Units that do not use the arena (one-off fragments built outside any
//! compilation unit) are served from a plain heap region instead; such
//! handles carry a reserved slab index and never touch the chain refcount.

use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::ArenaError;
use crate::optree::node::{Op, OpKind, Want};

/// Bits of an [`OpRef`] used for the cell offset within a slab.
const CELL_BITS: u32 = 20;
/// Bits of an [`OpRef`] used for the slab index.
const SLAB_BITS: u32 = 12;
const CELL_MASK: u32 = (1 << CELL_BITS) - 1;
/// Reserved slab index marking heap-region handles.
const HEAP_SLAB: u32 = (1 << SLAB_BITS) - 1;

/// Hard maximum slab capacity, in cells. Bounded by the offset width of the
/// packed handle encoding.
pub const MAX_SLAB_CELLS: usize = 1 << CELL_BITS;
/// Width of the per-size-class free-list index. Requesting more cells than
/// this for a single op is fatal.
pub const MAX_SIZE_CLASSES: usize = 16;

const MAX_SLABS: usize = HEAP_SLAB as usize;

/// Reference to an op in an [`OpArena`].
///
/// A 32-bit packed handle, half the size of a pointer. The slab index lives
/// in the upper bits and the cell offset in the lower bits; the reserved
/// slab index marks heap-region handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpRef(u32);

impl OpRef {
    pub(crate) fn slab_cell(slab: u32, cell: u32) -> Self {
        debug_assert!(slab < HEAP_SLAB && cell <= CELL_MASK);
        Self((slab << CELL_BITS) | cell)
    }

    pub(crate) fn heap(index: u32) -> Self {
        debug_assert!(index <= CELL_MASK);
        Self((HEAP_SLAB << CELL_BITS) | index)
    }

    pub(crate) fn slab(self) -> u32 {
        self.0 >> CELL_BITS
    }

    pub(crate) fn cell(self) -> u32 {
        self.0 & CELL_MASK
    }

    /// Whether this handle points into a slab chain rather than the heap
    /// region. Heap ops bypass free lists and chain refcounting entirely.
    pub fn is_arena_owned(self) -> bool {
        self.slab() != HEAP_SLAB
    }

    /// Returns the raw packed representation.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for OpRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_arena_owned() {
            write!(f, "OpRef({}:{})", self.slab(), self.cell())
        } else {
            write!(f, "OpRef(heap:{})", self.cell())
        }
    }
}

/// Panic helper for handle misuse and structural corruption (cold path).
#[cold]
#[inline(never)]
pub(crate) fn corruption(r: OpRef, what: &str) -> ! {
    panic!("op tree corruption: {r} {what}")
}

#[cold]
#[inline(never)]
fn released_chain() -> ! {
    panic!("op arena used after its slab chain was released")
}

#[cold]
#[inline(never)]
pub(crate) fn size_class_overflow(cells: usize) -> ! {
    panic!("op size class of {cells} cells exceeds the free-list index width ({MAX_SIZE_CLASSES})")
}

#[cold]
#[inline(never)]
fn storage_exhausted(what: &str) -> ! {
    panic!("op arena storage exhausted: {what}")
}

#[cold]
#[inline(never)]
fn release_outstanding(live: usize) -> ! {
    panic!("slab chain released while {live} ops are still live")
}

#[cold]
#[inline(never)]
fn refcount_underflow() -> ! {
    panic!("slab chain reference count underflow")
}

/// Tunable allocator bounds. Growth is geometric (doubling) from
/// `first_slab_cells` up to `max_slab_cells`; both are measured in cells,
/// the arena's allocation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Capacity of the first slab in the chain.
    pub first_slab_cells: usize,
    /// Upper bound for slab capacity; growth stops doubling here.
    pub max_slab_cells: usize,
    /// Hardened mode: slabs may be toggled read-only after compilation and
    /// stray mutation panics instead of corrupting the tree.
    pub hardened: bool,
    /// Whether this unit uses the slab chain at all. When false every
    /// allocation is served from the heap region.
    pub slabbed: bool,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            first_slab_cells: 64,
            max_slab_cells: 4096,
            hardened: false,
            slabbed: true,
        }
    }
}

impl ArenaConfig {
    /// Configuration for fragments built outside any compilation unit.
    pub fn heap() -> Self {
        Self {
            slabbed: false,
            ..Self::default()
        }
    }

    /// Hardened slab configuration; see [`OpArena::protect`].
    pub fn hardened() -> Self {
        Self {
            hardened: true,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), ArenaError> {
        if !self.slabbed {
            return Ok(());
        }
        if self.first_slab_cells < MAX_SIZE_CLASSES {
            return Err(ArenaError::SlabTooSmall {
                got: self.first_slab_cells,
                min: MAX_SIZE_CLASSES,
            });
        }
        if self.max_slab_cells > MAX_SLAB_CELLS {
            return Err(ArenaError::SlabTooLarge {
                got: self.max_slab_cells,
                max: MAX_SLAB_CELLS,
            });
        }
        if self.first_slab_cells > self.max_slab_cells {
            return Err(ArenaError::GrowthBounds {
                first: self.first_slab_cells,
                max: self.max_slab_cells,
            });
        }
        Ok(())
    }
}

/// Point-in-time allocator counters, mostly for tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArenaStats {
    pub slabs: usize,
    pub committed_cells: usize,
    pub in_use_cells: usize,
    pub live_ops: usize,
    pub refs: usize,
}

/// One cell of slab storage.
///
/// An allocation of size class `n` occupies one head cell followed by
/// `n - 1` interior cells. Freed and retired heads stay tagged with their
/// size class so the region can be recycled for the same class later.
#[derive(Debug, Clone)]
enum OpSlot {
    Live(Op),
    Interior,
    Free { cells: usize },
    Retired { cells: usize },
}

struct Slab {
    cells: Vec<OpSlot>,
    capacity: usize,
    writable: bool,
}

impl Slab {
    fn new(capacity: usize) -> Self {
        Self {
            cells: Vec::with_capacity(capacity),
            capacity,
            writable: true,
        }
    }

    fn remaining(&self) -> usize {
        self.capacity - self.cells.len()
    }
}

/// The node store and allocator for one compilation unit.
///
/// # Example
///
/// ```rust,ignore
/// let mut arena = OpArena::new(ArenaConfig::default())?;
/// let op = arena.alloc(OpKind::Stub, Want::Void);
/// free_subtree(&mut arena, Some(op));
/// arena.release();
/// ```
pub struct OpArena {
    slabs: Vec<Slab>,
    /// Free lists indexed by size class (cell count); index 0 is unused.
    free_lists: [Vec<OpRef>; MAX_SIZE_CLASSES + 1],
    heap: Vec<Option<Op>>,
    /// One count held by the owning unit plus one per live arena-owned op.
    refs: usize,
    live_ops: usize,
    in_use_cells: usize,
    released: bool,
    config: ArenaConfig,
    /// Externally shared subtree roots and their owner counts.
    shared: FxHashMap<OpRef, AtomicU32>,
}

impl OpArena {
    pub fn new(config: ArenaConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        let mut slabs = Vec::new();
        if config.slabbed {
            slabs.push(Slab::new(config.first_slab_cells));
        }
        Ok(Self {
            slabs,
            free_lists: std::array::from_fn(|_| Vec::new()),
            heap: Vec::new(),
            refs: 1,
            live_ops: 0,
            in_use_cells: 0,
            released: false,
            config,
            shared: FxHashMap::default(),
        })
    }

    fn check_released(&self) {
        if self.released {
            released_chain();
        }
    }

    /// Allocates a default-initialized op of `kind`.
    pub fn alloc(&mut self, kind: OpKind, want: Want) -> OpRef {
        self.alloc_op(Op::new(kind, want))
    }

    /// Allocates a fully built op and returns its handle.
    ///
    /// Reuses a freed slot of the exact size class when one is available
    /// (most recently freed first), otherwise bump-allocates from the newest
    /// slab, growing the chain geometrically when it runs out of room.
    pub fn alloc_op(&mut self, op: Op) -> OpRef {
        self.check_released();
        let cells = op.cells();
        debug_assert!(cells >= 1 && cells <= MAX_SIZE_CLASSES);

        if !self.config.slabbed {
            if self.heap.len() > CELL_MASK as usize {
                storage_exhausted("heap region is full");
            }
            let index = self.heap.len() as u32;
            self.heap.push(Some(op));
            self.live_ops += 1;
            return OpRef::heap(index);
        }

        if let Some(r) = self.free_lists[cells].pop() {
            // Recycled region: the interior cells are already in place, only
            // the head needs to be rewritten.
            self.slabs[r.slab() as usize].cells[r.cell() as usize] = OpSlot::Live(op);
            self.note_alloc(cells);
            return r;
        }

        if self.slabs.last().is_none_or(|s| s.remaining() < cells) {
            self.grow(cells);
        }
        let slab_index = self.slabs.len() - 1;
        let slab = &mut self.slabs[slab_index];
        let cell = slab.cells.len() as u32;
        slab.cells.push(OpSlot::Live(op));
        for _ in 1..cells {
            slab.cells.push(OpSlot::Interior);
        }
        self.note_alloc(cells);
        OpRef::slab_cell(slab_index as u32, cell)
    }

    fn note_alloc(&mut self, cells: usize) {
        self.refs += 1;
        self.live_ops += 1;
        self.in_use_cells += cells;
    }

    /// Adds a slab large enough for `request` cells, salvaging whatever is
    /// left of the current slab as a retired free-list entry first.
    fn grow(&mut self, request: usize) {
        let num_slabs = self.slabs.len();
        if let Some(slab) = self.slabs.last_mut() {
            let rest = slab.remaining();
            if rest > 0 {
                let cell = slab.cells.len() as u32;
                slab.cells.push(OpSlot::Retired { cells: rest });
                for _ in 1..rest {
                    slab.cells.push(OpSlot::Interior);
                }
                self.free_lists[rest].push(OpRef::slab_cell((num_slabs - 1) as u32, cell));
            }
        }
        if self.slabs.len() >= MAX_SLABS {
            storage_exhausted("slab index width");
        }
        let prev = self
            .slabs
            .last()
            .map_or(self.config.first_slab_cells, |s| s.capacity);
        let capacity = (prev * 2).min(self.config.max_slab_cells).max(request);
        debug!(capacity, slabs = self.slabs.len() + 1, "growing slab chain");
        self.slabs.push(Slab::new(capacity));
    }

    fn slot(&self, r: OpRef) -> Option<&OpSlot> {
        self.slabs
            .get(r.slab() as usize)
            .and_then(|s| s.cells.get(r.cell() as usize))
    }

    /// Returns the op behind `r`.
    ///
    /// # Panics
    ///
    /// Panics on freed or malformed handles and on a released chain.
    #[inline]
    pub fn get(&self, r: OpRef) -> &Op {
        self.check_released();
        if !r.is_arena_owned() {
            return match self.heap.get(r.cell() as usize) {
                Some(Some(op)) => op,
                _ => corruption(r, "is not a live heap op"),
            };
        }
        match self.slot(r) {
            Some(OpSlot::Live(op)) => op,
            _ => corruption(r, "is not a live op head"),
        }
    }

    /// Mutable access to the op behind `r`.
    ///
    /// # Panics
    ///
    /// Panics like [`OpArena::get`], and additionally when the containing
    /// slab has been protected; structural edits after [`OpArena::protect`]
    /// are exactly the mutations hardened mode exists to catch.
    #[inline]
    pub fn get_mut(&mut self, r: OpRef) -> &mut Op {
        self.check_released();
        if !r.is_arena_owned() {
            return match self.heap.get_mut(r.cell() as usize) {
                Some(Some(op)) => op,
                _ => corruption(r, "is not a live heap op"),
            };
        }
        let slab = match self.slabs.get_mut(r.slab() as usize) {
            Some(slab) => slab,
            None => corruption(r, "points past the slab chain"),
        };
        if !slab.writable {
            corruption(r, "mutated while its slab is write-protected");
        }
        match slab.cells.get_mut(r.cell() as usize) {
            Some(OpSlot::Live(op)) => op,
            _ => corruption(r, "is not a live op head"),
        }
    }

    /// Whether `r` currently addresses a live op.
    pub fn is_live(&self, r: OpRef) -> bool {
        self.check_released();
        if !r.is_arena_owned() {
            return matches!(self.heap.get(r.cell() as usize), Some(Some(_)));
        }
        matches!(self.slot(r), Some(OpSlot::Live(_)))
    }

    /// Frees one op, without touching its children. No-op when `r` was
    /// already freed. The slot joins the free list for its size class and
    /// the chain refcount drops; the chain auto-releases when the count
    /// reaches zero (the owner already disowned it and this was the last
    /// live op).
    pub fn free_op(&mut self, r: OpRef) {
        self.check_released();
        if !r.is_arena_owned() {
            // Heap ops go straight back to the allocator.
            if let Some(slot) = self.heap.get_mut(r.cell() as usize) {
                if slot.take().is_some() {
                    self.live_ops -= 1;
                }
            }
            return;
        }

        let slab_index = r.slab() as usize;
        let Some(slab) = self.slabs.get_mut(slab_index) else {
            corruption(r, "points past the slab chain");
        };
        let was_writable = slab.writable;
        slab.writable = true;
        let cells = match slab.cells.get(r.cell() as usize) {
            Some(OpSlot::Live(op)) => op.cells(),
            Some(OpSlot::Free { .. } | OpSlot::Retired { .. }) => {
                slab.writable = was_writable;
                return;
            }
            _ => corruption(r, "is not an op head"),
        };
        // Dropping the op here releases its payload.
        slab.cells[r.cell() as usize] = OpSlot::Free { cells };
        slab.writable = was_writable;

        self.free_lists[cells].push(r);
        self.live_ops -= 1;
        self.in_use_cells -= cells;
        self.shared.remove(&r);
        trace!(op = %r, cells, "op freed");

        if self.refs == 0 {
            refcount_underflow();
        }
        self.refs -= 1;
        if self.refs == 0 {
            self.release_storage();
        }
    }

    /// Releases the whole chain. The owner must be the only remaining
    /// reference; releasing with live ops outstanding is a fatal contract
    /// violation.
    pub fn release(&mut self) {
        self.check_released();
        if self.refs != 1 {
            release_outstanding(self.refs - 1);
        }
        self.release_storage();
    }

    /// Drops the owning unit's count without requiring the ops to be gone.
    /// The chain then survives until the last outstanding op is freed.
    pub fn disown(&mut self) {
        self.check_released();
        if self.refs == 0 {
            refcount_underflow();
        }
        self.refs -= 1;
        if self.refs == 0 {
            self.release_storage();
        }
    }

    /// Abort path for the owning unit: force-frees every outstanding op and
    /// then releases the chain, so half-built trees are not leaked.
    pub fn force_release(&mut self) {
        self.check_released();
        debug!(live = self.live_ops, "force-releasing slab chain");
        for slab_index in 0..self.slabs.len() {
            let mut cell = 0;
            while cell < self.slabs[slab_index].cells.len() {
                let r = OpRef::slab_cell(slab_index as u32, cell as u32);
                let (step, live) = match &self.slabs[slab_index].cells[cell] {
                    OpSlot::Live(op) => (op.cells(), true),
                    OpSlot::Free { cells } | OpSlot::Retired { cells } => (*cells, false),
                    OpSlot::Interior => corruption(r, "interior cell with no live head"),
                };
                if live {
                    self.free_op(r);
                }
                cell += step;
            }
        }
        self.heap.clear();
        self.live_ops = 0;
        self.release();
    }

    fn release_storage(&mut self) {
        debug!(slabs = self.slabs.len(), "releasing slab chain");
        self.slabs = Vec::new();
        self.free_lists = std::array::from_fn(|_| Vec::new());
        self.heap = Vec::new();
        self.shared.clear();
        self.refs = 0;
        self.live_ops = 0;
        self.in_use_cells = 0;
        self.released = true;
    }

    /// Marks every slab read-only. Hardened configurations only; a no-op
    /// otherwise.
    pub fn protect(&mut self) {
        if !self.config.hardened {
            return;
        }
        for slab in &mut self.slabs {
            slab.writable = false;
        }
    }

    /// Makes every slab writable again.
    pub fn unprotect(&mut self) {
        for slab in &mut self.slabs {
            slab.writable = true;
        }
    }

    /// Registers one more external owner of the subtree rooted at `root`
    /// and returns the new owner count. An unshared root implicitly has one
    /// owner, so the first call yields 2.
    ///
    /// Counts are atomic; they are the only structural state that may be
    /// observed from more than one interpreter at a time.
    pub fn retain_subtree(&mut self, root: OpRef) -> u32 {
        self.check_released();
        debug_assert!(self.is_live(root), "retain of a freed subtree root");
        match self.shared.entry(root) {
            Entry::Occupied(e) => e.get().fetch_add(1, Ordering::Relaxed) + 1,
            Entry::Vacant(v) => {
                v.insert(AtomicU32::new(2));
                2
            }
        }
    }

    /// Current owner count of a shared root, if it is shared at all.
    pub fn shared_count(&self, root: OpRef) -> Option<u32> {
        self.shared.get(&root).map(|c| c.load(Ordering::Relaxed))
    }

    /// Drops one owner of `root`. Returns true when the caller now holds
    /// the last reference and teardown should proceed.
    pub(crate) fn shared_release(&mut self, root: OpRef) -> bool {
        if let Some(count) = self.shared.get(&root) {
            let prev = count.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(prev > 0, "shared subtree count underflow");
            if prev > 1 {
                return false;
            }
            self.shared.remove(&root);
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn slab_count(&self) -> usize {
        self.slabs.len()
    }

    /// Total capacity of every slab in the chain, in cells.
    pub fn committed_cells(&self) -> usize {
        self.slabs.iter().map(|s| s.capacity).sum()
    }

    /// Cells currently occupied by live ops.
    pub fn in_use_cells(&self) -> usize {
        self.in_use_cells
    }

    /// Live ops, counting both slab and heap storage.
    pub fn live_ops(&self) -> usize {
        self.live_ops
    }

    /// Chain reference count: one for the owning unit plus one per live
    /// arena-owned op.
    pub fn refs(&self) -> usize {
        self.refs
    }

    pub fn stats(&self) -> ArenaStats {
        ArenaStats {
            slabs: self.slabs.len(),
            committed_cells: self.committed_cells(),
            in_use_cells: self.in_use_cells,
            live_ops: self.live_ops,
            refs: self.refs,
        }
    }
}

impl fmt::Debug for OpArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OpArena {{ {} slabs, {}/{} cells, {} live ops, refs {} }}",
            self.slabs.len(),
            self.in_use_cells,
            self.committed_cells(),
            self.live_ops,
            self.refs
        )
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;
    use crate::optree::node::{OpPayload, Value};

    fn small_arena() -> OpArena {
        OpArena::new(ArenaConfig {
            first_slab_cells: 64,
            max_slab_cells: 256,
            ..ArenaConfig::default()
        })
        .unwrap()
    }

    #[rstest]
    #[case::too_small(ArenaConfig { first_slab_cells: 8, ..ArenaConfig::default() }, ArenaError::SlabTooSmall { got: 8, min: MAX_SIZE_CLASSES })]
    #[case::too_large(ArenaConfig { max_slab_cells: MAX_SLAB_CELLS + 1, ..ArenaConfig::default() }, ArenaError::SlabTooLarge { got: MAX_SLAB_CELLS + 1, max: MAX_SLAB_CELLS })]
    #[case::inverted(ArenaConfig { first_slab_cells: 512, max_slab_cells: 128, ..ArenaConfig::default() }, ArenaError::GrowthBounds { first: 512, max: 128 })]
    fn test_config_validation(#[case] config: ArenaConfig, #[case] expected: ArenaError) {
        assert_eq!(OpArena::new(config).unwrap_err(), expected);
    }

    #[test]
    fn test_heap_config_skips_slab_validation() {
        let config = ArenaConfig {
            first_slab_cells: 0,
            ..ArenaConfig::heap()
        };
        let arena = OpArena::new(config).unwrap();
        assert_eq!(arena.slab_count(), 0);
    }

    #[test]
    fn test_second_slab_after_first_fills() {
        let mut arena = small_arena();
        // Stub is a one-cell op, so the first slab holds exactly 64 of them.
        for _ in 0..64 {
            arena.alloc(OpKind::Stub, Want::Void);
        }
        assert_eq!(arena.slab_count(), 1);
        assert_eq!(arena.in_use_cells(), 64);

        let r = arena.alloc(OpKind::Stub, Want::Void);
        assert_eq!(arena.slab_count(), 2);
        assert_eq!(r.slab(), 1);
        assert_eq!(arena.committed_cells(), 64 + 128);
    }

    #[test]
    fn test_growth_is_bounded() {
        let mut arena = OpArena::new(ArenaConfig {
            first_slab_cells: 16,
            max_slab_cells: 32,
            ..ArenaConfig::default()
        })
        .unwrap();
        for _ in 0..200 {
            arena.alloc(OpKind::Stub, Want::Void);
        }
        // 16, then 32 for every slab after the doubling cap.
        assert!(arena.slabs.iter().skip(1).all(|s| s.capacity == 32));
    }

    #[test]
    fn test_free_then_realloc_reuses_slot() {
        let mut arena = small_arena();
        let a = arena.alloc(OpKind::Stub, Want::Void);
        let b = arena.alloc(OpKind::Const, Want::Scalar);
        arena.free_op(b);
        arena.free_op(a);

        // Most recently freed of the same class comes back first.
        let again = arena.alloc(OpKind::Null, Want::Void);
        assert_eq!(again, a);
        let again = arena.alloc(OpKind::Const, Want::Scalar);
        assert_eq!(again, b);
    }

    #[test]
    fn test_free_is_per_size_class() {
        let mut arena = small_arena();
        let one_cell = arena.alloc(OpKind::Stub, Want::Void);
        arena.free_op(one_cell);
        // A three-cell op must not reuse the one-cell slot.
        let binop = arena.alloc(OpKind::Add, Want::Scalar);
        assert_ne!(binop, one_cell);
    }

    #[test]
    fn test_salvaged_tail_is_recycled() {
        let mut arena = small_arena();
        for _ in 0..63 {
            arena.alloc(OpKind::Stub, Want::Void);
        }
        // One cell left; a three-cell request retires it and grows the chain.
        let big = arena.alloc(OpKind::Add, Want::Scalar);
        assert_eq!(big.slab(), 1);
        // The retired cell is handed back to the next one-cell request.
        let small = arena.alloc(OpKind::Stub, Want::Void);
        assert_eq!((small.slab(), small.cell()), (0, 63));
    }

    #[test]
    fn test_refs_track_live_ops() {
        let mut arena = small_arena();
        assert_eq!(arena.refs(), 1);
        let a = arena.alloc(OpKind::Stub, Want::Void);
        let b = arena.alloc(OpKind::Stub, Want::Void);
        assert_eq!(arena.refs(), 3);
        arena.free_op(a);
        arena.free_op(a); // double free is a no-op
        assert_eq!(arena.refs(), 2);
        arena.free_op(b);
        assert_eq!(arena.refs(), 1);
    }

    #[test]
    #[should_panic(expected = "still live")]
    fn test_release_with_outstanding_ops_panics() {
        let mut arena = small_arena();
        arena.alloc(OpKind::Stub, Want::Void);
        arena.release();
    }

    #[test]
    #[should_panic(expected = "after its slab chain was released")]
    fn test_use_after_release_panics() {
        let mut arena = small_arena();
        let r = arena.alloc(OpKind::Stub, Want::Void);
        arena.free_op(r);
        arena.release();
        let _ = arena.get(r);
    }

    #[test]
    fn test_disown_defers_release_to_last_free() {
        let mut arena = small_arena();
        let a = arena.alloc(OpKind::Stub, Want::Void);
        let b = arena.alloc(OpKind::Stub, Want::Void);
        arena.disown();
        assert!(!arena.is_released());
        arena.free_op(a);
        assert!(!arena.is_released());
        arena.free_op(b);
        assert!(arena.is_released());
    }

    #[test]
    fn test_force_release_frees_everything() {
        let mut arena = small_arena();
        for _ in 0..10 {
            arena.alloc(OpKind::Stub, Want::Void);
        }
        arena.alloc(OpKind::Add, Want::Scalar);
        arena.force_release();
        assert!(arena.is_released());
    }

    #[test]
    #[should_panic(expected = "write-protected")]
    fn test_protected_slab_rejects_mutation() {
        let mut arena = OpArena::new(ArenaConfig::hardened()).unwrap();
        let r = arena.alloc(OpKind::Stub, Want::Void);
        arena.protect();
        arena.get_mut(r).set_private(1);
    }

    #[test]
    fn test_protected_slab_still_frees() {
        let mut arena = OpArena::new(ArenaConfig::hardened()).unwrap();
        let r = arena.alloc(OpKind::Stub, Want::Void);
        arena.protect();
        // Sanctioned teardown transitions the slab to writable and back.
        arena.free_op(r);
        assert_eq!(arena.live_ops(), 0);
        arena.unprotect();
        let again = arena.alloc(OpKind::Stub, Want::Void);
        assert_eq!(again, r);
    }

    #[test]
    fn test_heap_mode_bypasses_chain() {
        let mut arena = OpArena::new(ArenaConfig::heap()).unwrap();
        let r = arena.alloc(OpKind::Stub, Want::Void);
        assert!(!r.is_arena_owned());
        assert_eq!(arena.refs(), 1);
        assert_eq!(arena.committed_cells(), 0);
        arena.free_op(r);
        assert_eq!(arena.live_ops(), 0);
        // Heap frees never auto-release the unit.
        assert!(!arena.is_released());
    }

    #[test]
    fn test_alloc_op_keeps_payload() {
        let mut arena = small_arena();
        let r = arena.alloc_op(Op::with_payload(
            OpKind::Const,
            Want::Scalar,
            OpPayload::Value(Value::Int(42)),
        ));
        assert_eq!(
            arena.get(r).payload(),
            &OpPayload::Value(Value::Int(42))
        );
    }

    #[test]
    fn test_stats_snapshot() {
        let mut arena = small_arena();
        arena.alloc(OpKind::Add, Want::Scalar);
        let stats = arena.stats();
        assert_eq!(
            stats,
            ArenaStats {
                slabs: 1,
                committed_cells: 64,
                in_use_cells: 3,
                live_ops: 1,
                refs: 2,
            }
        );
    }

    #[test]
    fn test_retain_subtree_counts_owners() {
        let mut arena = small_arena();
        let root = arena.alloc(OpKind::Stub, Want::Void);
        assert_eq!(arena.shared_count(root), None);
        assert_eq!(arena.retain_subtree(root), 2);
        assert_eq!(arena.retain_subtree(root), 3);
        assert_eq!(arena.shared_count(root), Some(3));
    }

    proptest! {
        #[test]
        fn in_use_never_exceeds_committed(actions in prop::collection::vec(0u8..6, 1..256)) {
            let mut arena = OpArena::new(ArenaConfig {
                first_slab_cells: 16,
                max_slab_cells: 64,
                ..ArenaConfig::default()
            }).unwrap();
            let mut live = Vec::new();
            for action in actions {
                match action {
                    0 => live.push(arena.alloc(OpKind::Stub, Want::Void)),
                    1 => live.push(arena.alloc(OpKind::Const, Want::Scalar)),
                    2 => live.push(arena.alloc(OpKind::Add, Want::Scalar)),
                    3 => live.push(arena.alloc(OpKind::Loop, Want::Void)),
                    4 => live.push(arena.alloc(OpKind::Neg, Want::Scalar)),
                    _ => {
                        if let Some(r) = live.pop() {
                            arena.free_op(r);
                        }
                    }
                }
                prop_assert!(arena.in_use_cells() <= arena.committed_cells());
            }
            for r in live {
                arena.free_op(r);
            }
            prop_assert_eq!(arena.in_use_cells(), 0);
            prop_assert_eq!(arena.refs(), 1);
        }
    }
}
