//! The construction surface the producer (a parser or grammar reducer)
//! drives: allocate-and-initialize by opcode class, assemble lists, and
//! retire ops in place.
//!
//! Children handed to a constructor must be detached roots (or detached
//! sibling chains where documented); ownership transfers to the new parent.
//! All child-list editing bottoms out in [`splice`].

use smallvec::SmallVec;

use crate::arena::{OpArena, OpRef};
use crate::optree::node::{Op, OpClass, OpKind, OpPayload, SiblingLink, Value, Want};
use crate::optree::splice::{SPLICE_ALL, splice};

/// Allocates a childless base-class op.
pub fn new_op(arena: &mut OpArena, kind: OpKind, want: Want) -> OpRef {
    debug_assert_eq!(kind.class(), OpClass::Base);
    arena.alloc(kind, want)
}

/// Allocates a unary op around an optional child subtree.
pub fn new_unop(arena: &mut OpArena, kind: OpKind, want: Want, first: Option<OpRef>) -> OpRef {
    debug_assert_eq!(kind.class(), OpClass::Unary);
    let op = arena.alloc(kind, want);
    attach(arena, op, first, None);
    op
}

/// Allocates a binary op over two child subtrees.
pub fn new_binop(arena: &mut OpArena, kind: OpKind, want: Want, left: OpRef, right: OpRef) -> OpRef {
    debug_assert_eq!(kind.class(), OpClass::Binary);
    let op = arena.alloc(kind, want);
    attach(arena, op, Some(left), Some(right));
    op
}

/// Allocates a list op. `first` and `last` may each be a single detached
/// subtree; passing both makes them the two children, passing one makes it
/// the only child, passing neither builds an empty container.
pub fn new_listop(
    arena: &mut OpArena,
    kind: OpKind,
    want: Want,
    first: Option<OpRef>,
    last: Option<OpRef>,
) -> OpRef {
    debug_assert_eq!(kind.class(), OpClass::List);
    let op = arena.alloc(kind, want);
    attach(arena, op, first, last);
    op
}

/// Allocates a loop op; jump targets start empty and are filled in by the
/// finalizer via [`Op::set_loop_targets`] once the body is linked.
pub fn new_loopop(
    arena: &mut OpArena,
    kind: OpKind,
    want: Want,
    first: Option<OpRef>,
    last: Option<OpRef>,
) -> OpRef {
    debug_assert_eq!(kind.class(), OpClass::Loop);
    let op = arena.alloc(kind, want);
    attach(arena, op, first, last);
    op
}

/// Allocates a value-class leaf carrying a constant.
pub fn new_valop(arena: &mut OpArena, kind: OpKind, want: Want, value: Value) -> OpRef {
    debug_assert_eq!(kind.class(), OpClass::Value);
    arena.alloc_op(Op::with_payload(kind, want, OpPayload::Value(value)))
}

/// Allocates a slot-class leaf referring to a variable slot.
pub fn new_slotop(arena: &mut OpArena, kind: OpKind, want: Want, slot: u32) -> OpRef {
    debug_assert_eq!(kind.class(), OpClass::Slot);
    arena.alloc_op(Op::with_payload(kind, want, OpPayload::Slot(slot)))
}

/// Allocates an aux-class op carrying an opaque table. The table length
/// feeds the op's size class; oversized tables are fatal.
pub fn new_auxop(
    arena: &mut OpArena,
    kind: OpKind,
    want: Want,
    first: Option<OpRef>,
    items: &[u64],
) -> OpRef {
    debug_assert_eq!(kind.class(), OpClass::Aux);
    let op = arena.alloc_op(Op::with_payload(
        kind,
        want,
        OpPayload::Aux(SmallVec::from_slice(items)),
    ));
    attach(arena, op, first, None);
    op
}

/// Wires up to two detached subtrees as the children of `parent`.
fn attach(arena: &mut OpArena, parent: OpRef, first: Option<OpRef>, last: Option<OpRef>) {
    let (first, last) = match (first, last) {
        (None, None) => return,
        (Some(f), None) | (None, Some(f)) => (f, f),
        (Some(f), Some(l)) => (f, l),
    };
    debug_assert!(
        arena.get(first).sibling_link() == SiblingLink::Last(None)
            && arena.get(last).sibling_link() == SiblingLink::Last(None),
        "constructor children must be detached roots"
    );
    if first != last {
        arena.get_mut(first).set_sibling(SiblingLink::Sibling(last));
    }
    arena.get_mut(last).set_sibling(SiblingLink::Last(Some(parent)));
    arena.get_mut(parent).set_first_child(Some(first));
    arena.get_mut(parent).set_last_child(Some(last));
}

/// Appends `item` to `list`, reusing `list` when it already is a `kind`
/// container and wrapping both in a fresh one otherwise. Either side may be
/// absent, in which case the other is returned as-is.
pub fn append_elem(
    arena: &mut OpArena,
    kind: OpKind,
    list: Option<OpRef>,
    item: Option<OpRef>,
) -> Option<OpRef> {
    let Some(list) = list else {
        return item;
    };
    let Some(item) = item else {
        return Some(list);
    };
    if arena.get(list).kind() != kind {
        return Some(new_listop(arena, kind, Want::Void, Some(list), Some(item)));
    }
    let anchor = arena.get(list).last_child();
    splice(arena, list, anchor, 0, Some(item));
    Some(list)
}

/// Prepends `item` to `list`; the mirror image of [`append_elem`].
pub fn prepend_elem(
    arena: &mut OpArena,
    kind: OpKind,
    item: Option<OpRef>,
    list: Option<OpRef>,
) -> Option<OpRef> {
    let Some(item) = item else {
        return list;
    };
    let Some(list) = list else {
        return Some(item);
    };
    if arena.get(list).kind() != kind {
        return Some(new_listop(arena, kind, Want::Void, Some(item), Some(list)));
    }
    splice(arena, list, None, 0, Some(item));
    Some(list)
}

/// Concatenates two containers of the same kind, moving `last`'s children
/// onto the end of `first` and freeing the emptied shell.
pub fn append_list(
    arena: &mut OpArena,
    kind: OpKind,
    first: Option<OpRef>,
    last: Option<OpRef>,
) -> Option<OpRef> {
    let Some(first) = first else {
        return last;
    };
    let Some(last) = last else {
        return Some(first);
    };
    if arena.get(first).kind() != kind {
        return prepend_elem(arena, kind, Some(first), Some(last));
    }
    if arena.get(last).kind() != kind {
        return append_elem(arena, kind, Some(first), Some(last));
    }
    let moved = splice(arena, last, None, SPLICE_ALL, None);
    let anchor = arena.get(first).last_child();
    splice(arena, first, anchor, 0, moved);
    arena.free_op(last);
    Some(first)
}

/// Converts an assembled generic list into a specific list-class opcode,
/// retyping in place when possible and wrapping otherwise.
pub fn convert_list(arena: &mut OpArena, kind: OpKind, want: Want, o: Option<OpRef>) -> OpRef {
    debug_assert_eq!(kind.class(), OpClass::List);
    let Some(o) = o else {
        return new_listop(arena, kind, want, None, None);
    };
    if arena.get(o).kind() == OpKind::List {
        let op = arena.get_mut(o);
        op.set_kind(kind);
        op.set_want(want);
        o
    } else {
        new_listop(arena, kind, want, Some(o), None)
    }
}

/// Neutralizes an op in place: the node becomes inert but keeps its slot,
/// children and links so surrounding references stay valid. The private
/// byte remembers the former opcode.
pub fn neutralize(arena: &mut OpArena, o: OpRef) {
    let op = arena.get_mut(o);
    op.set_private(op.kind() as u8);
    op.set_kind(OpKind::Null);
}
