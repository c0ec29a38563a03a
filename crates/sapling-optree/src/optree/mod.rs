//! The threaded op tree: node model, surgery, execution-order linking and
//! teardown, built on the slab-chain arena.
//!
//! # Architecture
//!
//! ```text
//! Producer (parser / grammar reducer)
//!     ↓ build::new_*  (construction surface)
//! OpArena (slab chain, free lists, refcount)
//!     ↓ splice::splice  (all child-list edits)
//! Threaded tree (child + sibling-or-parent references)
//!     ↓ link::link / link::embed  (postfix execution order)
//! Consumer (optimizer / finalizer / evaluator)
//!     ↓ free::free_subtree  (iterative teardown)
//! OpArena (slots recycled, chain auto-released)
//! ```
//!
//! Tree shape and execution order are two independent reference systems
//! over the same nodes: surgery never touches execution references and
//! linking never touches tree shape.

pub mod build;
pub mod debug;
pub mod free;
pub mod link;
pub mod node;
pub mod splice;
