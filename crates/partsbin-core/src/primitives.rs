//! # Catalog Primitives
//!
//! Hardcoded runtime constants for the partsbin catalog.
//!
//! These limits are compiled into the binary and are immutable at runtime.

use crate::NodeId;

/// The well-known id of the root node of every tree kind.
///
/// Opening a store creates the three roots if they are missing.
pub const ROOT_NODE: NodeId = NodeId(0);

/// How many ancestors a single backend round-trip may fetch.
///
/// Ancestor paths longer than this continue with a further fetch that
/// starts at the last node returned.
pub const PARENT_QUERY_DEPTH: usize = 63;

/// Largest depth accepted by a descendants query (inclusive).
pub const MAX_DESCENDANT_DEPTH: usize = 64;

/// Hard ceiling on ancestor walks.
///
/// Acyclicity is enforced on every reparent, so a walk that goes deeper than
/// this means the stored tree is corrupt.
pub const MAX_TREE_HEIGHT: usize = 4096;

/// Maximum length (in characters) of string values, unit labels and keys.
pub const MAX_STRING_LENGTH: usize = 255;

/// Maximum length of a tree node name.
pub const MAX_NAME_LENGTH: usize = 255;

/// Maximum length of a template name format.
pub const MAX_NAME_FORMAT_LENGTH: usize = 255;

/// Maximum length (in characters) of a filter expression.
pub const MAX_QUERY_LENGTH: usize = 4096;

/// Maximum bracket nesting of a filter expression.
pub const MAX_QUERY_NESTING: usize = 64;

/// How often a find-or-insert retries after losing a uniqueness race.
pub const MAX_INSERT_RETRIES: usize = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_limits() {
        assert_eq!(PARENT_QUERY_DEPTH, 63);
        assert_eq!(MAX_DESCENDANT_DEPTH, 64);
    }

    #[test]
    fn root_is_zero() {
        assert_eq!(ROOT_NODE, NodeId(0));
    }
}
