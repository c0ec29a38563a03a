//! Op-tree visualization for debugging and tests.

use std::fmt::Write;

use itertools::Itertools;

use crate::arena::{OpArena, OpRef};
use crate::optree::node::{Op, OpPayload, SiblingLink};

/// Dumps the subtree rooted at `root` as an indented, human-readable
/// string, one line per op with its payload and execution successor.
///
/// Output format:
/// ```text
/// === op tree dump (root: OpRef(0:5)) ===
/// OpRef(0:5) seq void next=self
///   OpRef(0:2) add scalar next=OpRef(0:5)
///     OpRef(0:0) const scalar 1 next=OpRef(0:1)
/// ```
///
/// The walk reuses the structural references, so dumping an arbitrarily
/// deep tree costs no call stack.
pub fn dump_tree(arena: &OpArena, root: OpRef) -> String {
    let mut output = String::new();
    writeln!(&mut output, "=== op tree dump (root: {root}) ===").unwrap();

    let mut depth = 0usize;
    let mut cur = Some(root);
    while let Some(r) = cur {
        let op = arena.get(r);
        writeln!(
            &mut output,
            "{}{} {}{}",
            "  ".repeat(depth),
            r,
            format_op_brief(op),
            format_next(r, op)
        )
        .unwrap();

        cur = if let Some(kid) = op.first_child() {
            depth += 1;
            Some(kid)
        } else if r == root {
            None
        } else {
            let mut c = r;
            loop {
                match arena.get(c).sibling_link() {
                    SiblingLink::Sibling(s) => break Some(s),
                    SiblingLink::Last(Some(p)) if p != root => {
                        c = p;
                        depth -= 1;
                    }
                    SiblingLink::Last(_) => break None,
                }
            }
        };
    }

    output
}

fn format_op_brief(op: &Op) -> String {
    let detail = match op.payload() {
        OpPayload::Value(v) => format!(" {v}"),
        OpPayload::Slot(slot) => format!(" slot={slot}"),
        OpPayload::Aux(items) => format!(" aux=[{}]", items.iter().join(", ")),
        _ => String::new(),
    };
    format!("{} {}{}", op.kind(), op.want(), detail)
}

fn format_next(r: OpRef, op: &Op) -> String {
    match op.next() {
        None => String::new(),
        Some(n) if n == r => " next=self".to_string(),
        Some(n) => format!(" next={n}"),
    }
}
