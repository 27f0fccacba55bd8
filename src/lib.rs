//! chswitch: coordinated radio channel switching for tree-structured meshes
//!
//! A node that decides to move to a new channel announces it to its tree
//! neighbors, has them probe it on the candidate channel, reports the probe
//! tallies, and confirms the decided channel until each neighbor
//! acknowledges it or the retry budget runs out.
pub mod coordination;
pub mod core;
pub mod network;
pub mod node;
pub mod protocol;

mod testing;

// Re-export commonly used items
pub use crate::coordination::{CoordinationEvent, Phase};
pub use crate::core::{Channel, Config, Error, Result};
pub use crate::node::{Node, NodeHandle};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
