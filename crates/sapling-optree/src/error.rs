use miette::Diagnostic;
use thiserror::Error;

/// Configuration errors reported when an [`crate::OpArena`] is built.
///
/// Everything that can go wrong after construction (exhausted storage,
/// releasing a chain with live nodes, touching a released chain) is a fatal
/// contract violation and aborts instead of returning an error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArenaError {
    #[error("first slab of {got} cells cannot hold the largest size class ({min})")]
    SlabTooSmall { got: usize, min: usize },
    #[error("slab size of {got} cells exceeds the hard maximum of {max}")]
    SlabTooLarge { got: usize, max: usize },
    #[error("slab growth bounds are inverted: first slab {first} exceeds maximum {max}")]
    GrowthBounds { first: usize, max: usize },
}

impl Diagnostic for ArenaError {
    fn code<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        let c = match self {
            ArenaError::SlabTooSmall { .. } => "ArenaError::SlabTooSmall",
            ArenaError::SlabTooLarge { .. } => "ArenaError::SlabTooLarge",
            ArenaError::GrowthBounds { .. } => "ArenaError::GrowthBounds",
        };
        Some(Box::new(c))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        let msg = match self {
            ArenaError::SlabTooSmall { min, .. } => {
                format!("Raise `first_slab_cells` to at least {min}.")
            }
            ArenaError::SlabTooLarge { max, .. } => {
                format!("Lower `max_slab_cells` to at most {max}; cell offsets are packed into 32-bit handles.")
            }
            ArenaError::GrowthBounds { .. } => {
                "Make `max_slab_cells` at least as large as `first_slab_cells`.".to_string()
            }
        };
        Some(Box::new(msg))
    }
}
