//! The threaded tree model: node layout and structural reference rules.
//!
//! Every op carries an owning child reference and one more structural link
//! whose meaning is carried by its variant tag: either the next sibling, or,
//! on the last sibling, a non-owning back-reference to the parent. Parent
//! lookup is therefore computed by walking to the end of the sibling chain,
//! which trades an occasional O(siblings) scan for one reference less per
//! node; trees dominate the compiler's memory footprint and parent lookups
//! are rare.
//!
//! A third, independent reference threads the execution order through the
//! tree (see [`crate::optree::link`]). It is `None` while a node is
//! unlinked, the node's own handle while its subtree is linked but not yet
//! embedded anywhere, and the real successor once embedded.

use std::fmt;

use smallvec::SmallVec;
use smol_str::SmolStr;

use crate::arena::{OpArena, OpRef};

/// Opcode tag. The catalog is deliberately generic; the engine cares about
/// an op's class (its storage shape), not what the opcode means at runtime.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// A neutralized op, kept in place so surrounding links stay valid.
    Null = 0,
    Stub,
    Const,
    LoadSlot,
    StoreSlot,
    Neg,
    Not,
    Return,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    List,
    Seq,
    Call,
    Scope,
    Cond,
    Loop,
    Dispatch,
}

/// Storage class of an op, keyed by opcode. The class decides the payload
/// shape and with it the node's size class in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Base,
    Unary,
    Binary,
    List,
    Loop,
    Value,
    Slot,
    Aux,
}

impl OpKind {
    pub const fn class(self) -> OpClass {
        match self {
            OpKind::Null | OpKind::Stub => OpClass::Base,
            OpKind::Const => OpClass::Value,
            OpKind::LoadSlot | OpKind::StoreSlot => OpClass::Slot,
            OpKind::Neg | OpKind::Not | OpKind::Return => OpClass::Unary,
            OpKind::Add | OpKind::Sub | OpKind::Mul | OpKind::Div | OpKind::And | OpKind::Or => {
                OpClass::Binary
            }
            OpKind::List | OpKind::Seq | OpKind::Call | OpKind::Scope | OpKind::Cond => {
                OpClass::List
            }
            OpKind::Loop => OpClass::Loop,
            OpKind::Dispatch => OpClass::Aux,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            OpKind::Null => "null",
            OpKind::Stub => "stub",
            OpKind::Const => "const",
            OpKind::LoadSlot => "loadslot",
            OpKind::StoreSlot => "storeslot",
            OpKind::Neg => "neg",
            OpKind::Not => "not",
            OpKind::Return => "return",
            OpKind::Add => "add",
            OpKind::Sub => "sub",
            OpKind::Mul => "mul",
            OpKind::Div => "div",
            OpKind::And => "and",
            OpKind::Or => "or",
            OpKind::List => "list",
            OpKind::Seq => "seq",
            OpKind::Call => "call",
            OpKind::Scope => "scope",
            OpKind::Cond => "cond",
            OpKind::Loop => "loop",
            OpKind::Dispatch => "dispatch",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Evaluation context requested from an op by its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Want {
    #[default]
    Void,
    Scalar,
    List,
}

impl fmt::Display for Want {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Want::Void => "void",
            Want::Scalar => "scalar",
            Want::List => "list",
        };
        write!(f, "{name}")
    }
}

/// Constant payload of a value-class op.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Unit,
    Int(i64),
    Float(f64),
    Str(SmolStr),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s:?}"),
        }
    }
}

/// The second structural reference of a node.
///
/// Exactly one interpretation applies at a time, selected by the variant:
/// a non-owning link to the next sibling, or, on the last sibling, a
/// non-owning back-reference to the parent. `Last(None)` marks the
/// outermost node of a detached tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiblingLink {
    Sibling(OpRef),
    Last(Option<OpRef>),
}

impl SiblingLink {
    /// The next sibling, if there is one.
    pub fn sibling(self) -> Option<OpRef> {
        match self {
            SiblingLink::Sibling(s) => Some(s),
            SiblingLink::Last(_) => None,
        }
    }

    /// The parent back-reference; only the last sibling carries one.
    pub fn parent(self) -> Option<OpRef> {
        match self {
            SiblingLink::Sibling(_) => None,
            SiblingLink::Last(p) => p,
        }
    }

    pub fn has_sibling(self) -> bool {
        matches!(self, SiblingLink::Sibling(_))
    }
}

/// Class-specific payload. Binary, list and loop classes track their last
/// child so appends stay O(1); loop ops additionally carry the jump targets
/// the finalizer fills in; value, slot and aux classes carry operand data.
#[derive(Debug, Clone, PartialEq)]
pub enum OpPayload {
    Base,
    Unary,
    Binary {
        last_child: Option<OpRef>,
    },
    List {
        last_child: Option<OpRef>,
    },
    Loop {
        last_child: Option<OpRef>,
        redo: Option<OpRef>,
        next: Option<OpRef>,
        last: Option<OpRef>,
    },
    Value(Value),
    Slot(u32),
    Aux(SmallVec<[u64; 4]>),
}

impl OpPayload {
    pub fn for_class(class: OpClass) -> Self {
        match class {
            OpClass::Base => OpPayload::Base,
            OpClass::Unary => OpPayload::Unary,
            OpClass::Binary => OpPayload::Binary { last_child: None },
            OpClass::List => OpPayload::List { last_child: None },
            OpClass::Loop => OpPayload::Loop {
                last_child: None,
                redo: None,
                next: None,
                last: None,
            },
            OpClass::Value => OpPayload::Value(Value::Unit),
            OpClass::Slot => OpPayload::Slot(0),
            OpClass::Aux => OpPayload::Aux(SmallVec::new()),
        }
    }

    /// Size class of a node carrying this payload, in cells.
    pub fn cells(&self) -> usize {
        match self {
            OpPayload::Base => 1,
            OpPayload::Unary | OpPayload::Value(_) | OpPayload::Slot(_) => 2,
            OpPayload::Binary { .. } | OpPayload::List { .. } => 3,
            OpPayload::Loop { .. } => 5,
            OpPayload::Aux(items) => 2 + items.len(),
        }
    }

    fn matches_class(&self, class: OpClass) -> bool {
        matches!(
            (self, class),
            (OpPayload::Base, OpClass::Base)
                | (OpPayload::Unary, OpClass::Unary)
                | (OpPayload::Binary { .. }, OpClass::Binary)
                | (OpPayload::List { .. }, OpClass::List)
                | (OpPayload::Loop { .. }, OpClass::Loop)
                | (OpPayload::Value(_), OpClass::Value)
                | (OpPayload::Slot(_), OpClass::Slot)
                | (OpPayload::Aux(_), OpClass::Aux)
        )
    }
}

/// One IR instruction site.
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    kind: OpKind,
    want: Want,
    private: u8,
    /// Cell count, fixed at construction so teardown accounting cannot
    /// drift even if the opcode is later neutralized.
    cells: u8,
    first_child: Option<OpRef>,
    sibling: SiblingLink,
    next: Option<OpRef>,
    payload: OpPayload,
}

impl Op {
    /// Builds an op with the default payload for its class.
    pub fn new(kind: OpKind, want: Want) -> Self {
        Self::with_payload(kind, want, OpPayload::for_class(kind.class()))
    }

    pub fn with_payload(kind: OpKind, want: Want, payload: OpPayload) -> Self {
        debug_assert!(
            payload.matches_class(kind.class()),
            "payload does not match the class of {kind}"
        );
        let cells = payload.cells();
        if cells > crate::arena::MAX_SIZE_CLASSES {
            crate::arena::size_class_overflow(cells);
        }
        Self {
            kind,
            want,
            private: 0,
            cells: cells as u8,
            first_child: None,
            sibling: SiblingLink::Last(None),
            next: None,
            payload,
        }
    }

    pub fn kind(&self) -> OpKind {
        self.kind
    }

    pub fn want(&self) -> Want {
        self.want
    }

    pub fn private(&self) -> u8 {
        self.private
    }

    pub fn set_private(&mut self, private: u8) {
        self.private = private;
    }

    pub(crate) fn set_kind(&mut self, kind: OpKind) {
        self.kind = kind;
    }

    pub(crate) fn set_want(&mut self, want: Want) {
        self.want = want;
    }

    /// Size class in cells, fixed at construction.
    pub fn cells(&self) -> usize {
        self.cells as usize
    }

    pub fn first_child(&self) -> Option<OpRef> {
        self.first_child
    }

    /// An op has children exactly when its child reference is set.
    pub fn has_children(&self) -> bool {
        self.first_child.is_some()
    }

    pub(crate) fn set_first_child(&mut self, child: Option<OpRef>) {
        self.first_child = child;
    }

    pub fn sibling_link(&self) -> SiblingLink {
        self.sibling
    }

    pub(crate) fn set_sibling(&mut self, link: SiblingLink) {
        self.sibling = link;
    }

    /// Execution-order reference; see the module docs for its three states.
    pub fn next(&self) -> Option<OpRef> {
        self.next
    }

    pub(crate) fn set_next(&mut self, next: Option<OpRef>) {
        self.next = next;
    }

    pub fn payload(&self) -> &OpPayload {
        &self.payload
    }

    /// Last child, for the classes that track one.
    pub fn last_child(&self) -> Option<OpRef> {
        match &self.payload {
            OpPayload::Binary { last_child }
            | OpPayload::List { last_child }
            | OpPayload::Loop { last_child, .. } => *last_child,
            _ => None,
        }
    }

    /// Updates last-child bookkeeping; a no-op for classes without it.
    pub(crate) fn set_last_child(&mut self, last: Option<OpRef>) {
        match &mut self.payload {
            OpPayload::Binary { last_child }
            | OpPayload::List { last_child }
            | OpPayload::Loop { last_child, .. } => *last_child = last,
            _ => {}
        }
    }

    /// Loop jump targets, set by the finalizer once the body is linked.
    pub fn set_loop_targets(&mut self, redo: Option<OpRef>, next: Option<OpRef>, last: Option<OpRef>) {
        if let OpPayload::Loop {
            redo: r,
            next: n,
            last: l,
            ..
        } = &mut self.payload
        {
            *r = redo;
            *n = next;
            *l = last;
        }
    }
}

/// Computes the parent of `op`: walk forward to the last sibling and read
/// its back-reference. Returns `None` for the outermost node of a tree.
pub fn parent_of(arena: &OpArena, op: OpRef) -> Option<OpRef> {
    let mut cur = op;
    loop {
        match arena.get(cur).sibling_link() {
            SiblingLink::Sibling(s) => cur = s,
            SiblingLink::Last(parent) => return parent,
        }
    }
}

/// Walks to the end of the sibling chain starting at `op`.
pub fn last_sibling_of(arena: &OpArena, op: OpRef) -> OpRef {
    let mut cur = op;
    while let SiblingLink::Sibling(s) = arena.get(cur).sibling_link() {
        cur = s;
    }
    cur
}

/// Iterates over the direct children of `parent`.
pub fn children(arena: &OpArena, parent: OpRef) -> Children<'_> {
    Children {
        arena,
        cur: arena.get(parent).first_child(),
    }
}

pub struct Children<'a> {
    arena: &'a OpArena,
    cur: Option<OpRef>,
}

impl Iterator for Children<'_> {
    type Item = OpRef;

    fn next(&mut self) -> Option<OpRef> {
        let r = self.cur?;
        self.cur = self.arena.get(r).sibling_link().sibling();
        Some(r)
    }
}

/// Iterates over every node of the subtree rooted at `root` in preorder,
/// visiting each exactly once. The walk uses only the child and
/// sibling-or-parent references already present, so arbitrarily deep trees
/// cost no call stack.
pub fn subtree(arena: &OpArena, root: OpRef) -> Subtree<'_> {
    Subtree {
        arena,
        root,
        cur: Some(root),
    }
}

pub struct Subtree<'a> {
    arena: &'a OpArena,
    root: OpRef,
    cur: Option<OpRef>,
}

impl Iterator for Subtree<'_> {
    type Item = OpRef;

    fn next(&mut self) -> Option<OpRef> {
        let r = self.cur?;
        // Descend first, then move right, then climb until something is to
        // the right or the walk passes the root.
        self.cur = if let Some(kid) = self.arena.get(r).first_child() {
            Some(kid)
        } else if r == self.root {
            None
        } else {
            let mut cur = r;
            loop {
                match self.arena.get(cur).sibling_link() {
                    SiblingLink::Sibling(s) => break Some(s),
                    SiblingLink::Last(Some(p)) if p != self.root => cur = p,
                    SiblingLink::Last(_) => break None,
                }
            }
        };
        Some(r)
    }
}
