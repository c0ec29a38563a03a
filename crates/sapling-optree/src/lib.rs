//! `sapling-optree` is the IR op-tree engine of the sapling compiler
//! toolkit: a slab-chain node arena plus the threaded-tree algorithms that
//! build, edit, sequence and destroy the op trees a compilation unit
//! produces.
//!
//! ## Examples
//!
//! ```rs
//! use sapling_optree::{
//!     ArenaConfig, OpArena, OpKind, Value, Want,
//!     free_subtree, link, new_binop, new_valop,
//! };
//!
//! let mut arena = OpArena::new(ArenaConfig::default())?;
//! let one = new_valop(&mut arena, OpKind::Const, Want::Scalar, Value::Int(1));
//! let two = new_valop(&mut arena, OpKind::Const, Want::Scalar, Value::Int(2));
//! let add = new_binop(&mut arena, OpKind::Add, Want::Scalar, one, two);
//!
//! // Execution order is threaded through the finished tree.
//! let entry = link(&mut arena, add);
//! assert_eq!(entry, one);
//!
//! // Teardown recycles every slot and the chain can be released.
//! free_subtree(&mut arena, Some(add));
//! arena.release();
//! ```
mod arena;
mod error;
mod optree;

pub use arena::{ArenaConfig, ArenaStats, MAX_SIZE_CLASSES, MAX_SLAB_CELLS, OpArena, OpRef};
pub use error::ArenaError;
pub use optree::build::{
    append_elem, append_list, convert_list, neutralize, new_auxop, new_binop, new_listop,
    new_loopop, new_op, new_slotop, new_unop, new_valop, prepend_elem,
};
pub use optree::debug::dump_tree;
pub use optree::free::free_subtree;
pub use optree::link::{embed, entry, link};
pub use optree::node::{
    Children, Op, OpClass, OpKind, OpPayload, SiblingLink, Subtree, Value, Want, children,
    last_sibling_of, parent_of, subtree,
};
pub use optree::splice::{SPLICE_ALL, splice};
