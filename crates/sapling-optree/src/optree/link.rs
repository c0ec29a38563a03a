//! Execution-order linking: turning tree shape into the singly linked
//! sequence the evaluator follows at runtime.
//!
//! Linking establishes postfix order: an op runs after all of its children,
//! children run in sibling order. Within a linked subtree every op's
//! execution reference points at its true successor except the root's,
//! which carries the self-loop placeholder meaning "linked, but not yet
//! embedded in anything larger". Embedding later rewrites just that one
//! reference, so a subtree can be built and linked in isolation and spliced
//! into a surrounding sequence without revisiting its interior.
//!
//! Both walks are iterative over the structural references already in the
//! tree; trees can be arbitrarily deep and must not grow the call stack.

use tracing::trace;

use crate::arena::{OpArena, OpRef};
use crate::optree::node::SiblingLink;

/// First op executed in the subtree rooted at `op`: the deepest, leftmost
/// descendant. Purely structural, so it is valid before and after linking.
pub fn entry(arena: &OpArena, op: OpRef) -> OpRef {
    let mut cur = op;
    while let Some(kid) = arena.get(cur).first_child() {
        cur = kid;
    }
    cur
}

/// Links the subtree rooted at `root` into execution order and returns its
/// entry point.
///
/// Idempotent: a root that already carries an execution reference, whether
/// the self-loop or a real successor, is returned unchanged. Child subtrees
/// that were linked earlier are spliced in by rewriting their root
/// reference only.
pub fn link(arena: &mut OpArena, root: OpRef) -> OpRef {
    if arena.get(root).next().is_some() {
        return entry(arena, root);
    }

    let mut o = root;
    let mut went_up = false;
    loop {
        if !went_up && arena.get(o).next().is_none() {
            if let Some(kid) = arena.get(o).first_child() {
                o = kid;
                continue;
            }
        }
        // The subtree below o is complete: a leaf, a previously linked
        // subtree, or a parent whose children were just finished.
        if o == root {
            break;
        }
        match arena.get(o).sibling_link() {
            SiblingLink::Sibling(s) => {
                o = s;
                went_up = false;
            }
            SiblingLink::Last(Some(parent)) => {
                thread_children(arena, parent);
                o = parent;
                went_up = true;
            }
            SiblingLink::Last(None) => {
                unreachable!("detached node inside the subtree being linked")
            }
        }
    }

    // Self-loop: linked, awaiting a real successor from an embedder.
    arena.get_mut(root).set_next(Some(root));
    let e = entry(arena, root);
    trace!(root = %root, entry = %e, "linked subtree");
    e
}

/// Splices the already linked child subtrees of `parent` into one sequence:
/// each child's root runs on into the next child's entry, the last child
/// runs on into the parent.
fn thread_children(arena: &mut OpArena, parent: OpRef) {
    let mut kid = arena.get(parent).first_child();
    while let Some(k) = kid {
        let successor = match arena.get(k).sibling_link() {
            SiblingLink::Sibling(s) => {
                kid = Some(s);
                entry(arena, s)
            }
            SiblingLink::Last(_) => {
                kid = None;
                parent
            }
        };
        arena.get_mut(k).set_next(Some(successor));
    }
}

/// Embeds a linked subtree into a larger sequence: overwrites the root's
/// self-loop with its real `successor` and returns the subtree's entry
/// point for the embedder to jump to. Links the subtree first if that has
/// not happened yet.
pub fn embed(arena: &mut OpArena, root: OpRef, successor: OpRef) -> OpRef {
    if arena.get(root).next().is_none() {
        link(arena, root);
    }
    let e = entry(arena, root);
    arena.get_mut(root).set_next(Some(successor));
    e
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::{ArenaConfig, OpArena};
    use crate::optree::build::{new_binop, new_listop, new_unop, new_valop};
    use crate::optree::node::{OpKind, Value, Want, subtree};

    fn arena() -> OpArena {
        OpArena::new(ArenaConfig::default()).unwrap()
    }

    /// Follows execution references from the entry until the root's
    /// reference stops pointing inward.
    fn execution_order(arena: &OpArena, root: OpRef) -> Vec<OpRef> {
        let mut order = vec![entry(arena, root)];
        loop {
            let cur = *order.last().unwrap();
            if cur == root {
                break;
            }
            order.push(arena.get(cur).next().unwrap());
        }
        order
    }

    #[test]
    fn test_link_two_leaf_children() {
        let mut arena = arena();
        let y = new_valop(&mut arena, OpKind::Const, Want::Scalar, Value::Int(1));
        let z = new_valop(&mut arena, OpKind::Const, Want::Scalar, Value::Int(2));
        let x = new_binop(&mut arena, OpKind::Add, Want::Scalar, y, z);

        let entry_point = link(&mut arena, x);
        assert_eq!(entry_point, y);
        assert_eq!(arena.get(y).next(), Some(z));
        assert_eq!(arena.get(z).next(), Some(x));
        // The root loops on itself until embedded.
        assert_eq!(arena.get(x).next(), Some(x));

        let w = arena.alloc(OpKind::Stub, Want::Void);
        assert_eq!(embed(&mut arena, x, w), y);
        assert_eq!(arena.get(x).next(), Some(w));
    }

    #[test]
    fn test_link_single_leaf() {
        let mut arena = arena();
        let leaf = arena.alloc(OpKind::Stub, Want::Void);
        assert_eq!(link(&mut arena, leaf), leaf);
        assert_eq!(arena.get(leaf).next(), Some(leaf));
    }

    #[test]
    fn test_link_is_idempotent() {
        let mut arena = arena();
        let y = arena.alloc(OpKind::Stub, Want::Void);
        let z = arena.alloc(OpKind::Stub, Want::Void);
        let x = new_listop(&mut arena, OpKind::List, Want::List, Some(y), Some(z));

        let first = link(&mut arena, x);
        let snapshot: Vec<_> = subtree(&arena, x)
            .map(|r| arena.get(r).next())
            .collect();
        let second = link(&mut arena, x);
        let after: Vec<_> = subtree(&arena, x)
            .map(|r| arena.get(r).next())
            .collect();

        assert_eq!(first, second);
        assert_eq!(snapshot, after);
    }

    #[test]
    fn test_execution_order_is_postfix() {
        let mut arena = arena();
        let one = new_valop(&mut arena, OpKind::Const, Want::Scalar, Value::Int(1));
        let two = new_valop(&mut arena, OpKind::Const, Want::Scalar, Value::Int(2));
        let add = new_binop(&mut arena, OpKind::Add, Want::Scalar, one, two);
        let neg = new_unop(&mut arena, OpKind::Neg, Want::Scalar, Some(add));
        let three = new_valop(&mut arena, OpKind::Const, Want::Scalar, Value::Int(3));
        let root = new_listop(&mut arena, OpKind::Seq, Want::Void, Some(neg), Some(three));

        link(&mut arena, root);
        assert_eq!(
            execution_order(&arena, root),
            vec![one, two, add, neg, three, root]
        );
    }

    #[test]
    fn test_prelinked_subtree_is_spliced_not_revisited() {
        let mut arena = arena();
        let a = arena.alloc(OpKind::Stub, Want::Void);
        let b = arena.alloc(OpKind::Stub, Want::Void);
        let inner = new_listop(&mut arena, OpKind::List, Want::List, Some(a), Some(b));
        link(&mut arena, inner);
        assert_eq!(arena.get(inner).next(), Some(inner));

        let tail = arena.alloc(OpKind::Stub, Want::Void);
        let outer = new_listop(&mut arena, OpKind::Seq, Want::Void, Some(inner), Some(tail));
        let entry_point = link(&mut arena, outer);

        assert_eq!(entry_point, a);
        // Only the inner root's reference was rewritten.
        assert_eq!(arena.get(a).next(), Some(b));
        assert_eq!(arena.get(b).next(), Some(inner));
        assert_eq!(arena.get(inner).next(), Some(tail));
        assert_eq!(arena.get(tail).next(), Some(outer));
        assert_eq!(arena.get(outer).next(), Some(outer));
    }

    #[test]
    fn test_link_deep_chain_does_not_recurse() {
        let mut arena = OpArena::new(ArenaConfig {
            max_slab_cells: 4096,
            ..ArenaConfig::default()
        })
        .unwrap();
        let mut root = arena.alloc(OpKind::Stub, Want::Void);
        for _ in 0..10_000 {
            root = new_unop(&mut arena, OpKind::Neg, Want::Scalar, Some(root));
        }
        let entry_point = link(&mut arena, root);
        assert_eq!(arena.get(entry_point).kind(), OpKind::Stub);
        assert_eq!(arena.get(root).next(), Some(root));
    }
}
