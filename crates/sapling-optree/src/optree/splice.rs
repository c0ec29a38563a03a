//! Tree surgery: the single primitive for inserting and removing contiguous
//! runs of children.
//!
//! Every higher-level edit (append, prepend, wrap, replace) bottoms out in
//! [`splice`], which owns all first/last-child and sibling-link
//! bookkeeping.

use crate::arena::{OpArena, OpRef};
use crate::optree::node::{SiblingLink, last_sibling_of, parent_of};

/// `delete_count` sentinel: delete every sibling after the anchor.
pub const SPLICE_ALL: usize = usize::MAX;

/// Edits the child list of `parent` in place.
///
/// * `after` - existing child after which to operate; `None` means the
///   start of the list.
/// * `delete_count` - how many siblings to remove, starting right after
///   `after`; `0` removes nothing, [`SPLICE_ALL`] removes all remaining.
/// * `insert` - head of an independently built sibling chain to splice in;
///   ownership transfers to `parent`.
///
/// Returns the head of the removed chain, detached and properly terminated,
/// or `None` when nothing was removed. Removed nodes are not freed and
/// execution-order references are never touched; both are the caller's
/// business.
///
/// # Example
///
/// ```rust,ignore
/// // replace B in A-B-C with the chain X-Y
/// let removed = splice(&mut arena, parent, Some(a), 1, Some(x));
/// free_subtree(&mut arena, removed);
/// ```
pub fn splice(
    arena: &mut OpArena,
    parent: OpRef,
    after: Option<OpRef>,
    delete_count: usize,
    insert: Option<OpRef>,
) -> Option<OpRef> {
    debug_assert!(
        after.is_none_or(|a| parent_of(arena, a) == Some(parent)),
        "splice anchor is not a child of the given parent"
    );

    let first = match after {
        Some(a) => arena.get(a).sibling_link().sibling(),
        None => arena.get(parent).first_child(),
    };

    // Detach the doomed run, remembering what follows it.
    let mut removed = None;
    let rest = if delete_count > 0 && first.is_some() {
        let head = first.unwrap();
        let mut last_del = head;
        let mut n = delete_count - 1;
        while n > 0 {
            match arena.get(last_del).sibling_link() {
                SiblingLink::Sibling(s) => {
                    last_del = s;
                    n -= 1;
                }
                SiblingLink::Last(_) => break,
            }
        }
        let rest = arena.get(last_del).sibling_link().sibling();
        arena.get_mut(last_del).set_sibling(SiblingLink::Last(None));
        removed = Some(head);
        rest
    } else {
        first
    };

    let ins_last = insert.map(|head| last_sibling_of(arena, head));

    // Wire the predecessor to the insertion (or to whatever survived).
    let link_head = insert.or(rest);
    match after {
        Some(a) => {
            let link = match link_head {
                Some(h) => SiblingLink::Sibling(h),
                None => SiblingLink::Last(Some(parent)),
            };
            arena.get_mut(a).set_sibling(link);
        }
        None => arena.get_mut(parent).set_first_child(link_head),
    }

    // Wire the insertion tail to the survivors.
    if let Some(l) = ins_last {
        let link = match rest {
            Some(r) => SiblingLink::Sibling(r),
            None => SiblingLink::Last(Some(parent)),
        };
        arena.get_mut(l).set_sibling(link);
    }

    // The last child only changed when the edit reached the end of the list.
    if rest.is_none() {
        let new_last = ins_last.or(after);
        arena.get_mut(parent).set_last_child(new_last);
    }

    removed
}
