//! Whole-subtree teardown.
//!
//! The walk is iterative post-order over the structural references already
//! in the tree: descend to a leaf, then either step to the next sibling or
//! climb to the now fully processed parent and free it, stopping once the
//! climb passes the original root. Children are always freed before their
//! parent, and the next node is picked before the current one is freed
//! because a freed slot's links are gone.
//!
//! Subtree roots shared across owners (compiled-unit bodies captured by
//! more than one closure) are counted; teardown of such a root, or of a
//! tree that contains one, only drops an owner until the last one performs
//! the real walk.

use tracing::trace;

use crate::arena::{OpArena, OpRef};
use crate::optree::node::SiblingLink;

/// Frees `root` and every descendant that was not detached first.
///
/// Safe to call with `None` or an already freed handle; both are no-ops.
/// Ops are returned to their chain's per-size-class free lists, which may
/// auto-release the chain itself if its owner already disowned it.
pub fn free_subtree(arena: &mut OpArena, root: Option<OpRef>) {
    let Some(top) = root else {
        return;
    };
    if !arena.is_live(top) {
        return;
    }
    if !arena.shared_release(top) {
        trace!(root = %top, "shared subtree survives teardown");
        return;
    }

    let mut next_op = Some(top);
    let mut went_up = false;
    while let Some(o) = next_op {
        let mut free_this = true;
        if !went_up {
            if o != top && !arena.shared_release(o) {
                // Another owner still holds this subtree; skip it whole.
                free_this = false;
            } else if let Some(kid) = arena.get(o).first_child() {
                next_op = Some(kid);
                continue;
            }
        }

        // Pick the next node first; o's links are unreadable once freed.
        if o == top {
            next_op = None;
        } else {
            match arena.get(o).sibling_link() {
                SiblingLink::Sibling(s) => {
                    next_op = Some(s);
                    went_up = false;
                }
                SiblingLink::Last(parent) => {
                    next_op = parent;
                    went_up = true;
                }
            }
        }

        if free_this {
            arena.free_op(o);
        }
    }
}
