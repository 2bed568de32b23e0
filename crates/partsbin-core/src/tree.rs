//! # Tree Hierarchy
//!
//! Operations over the three parent-linked trees (categories, containers,
//! templates).
//!
//! - Every tree has exactly one root, which is never moved or deleted
//! - Reparenting rejects the node itself and any of its descendants
//! - Ancestor walks fetch `PARENT_QUERY_DEPTH` nodes per store call

use crate::primitives::{MAX_DESCENDANT_DEPTH, MAX_NAME_LENGTH, MAX_TREE_HEIGHT, PARENT_QUERY_DEPTH};
use crate::store::CatalogStore;
use crate::template::Templates;
use crate::{CatalogError, NodeId, TreeKind, TreeNode};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// A node with its descendants up to a depth, as an adjacency map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subtree {
    pub kind: TreeKind,
    pub root: NodeId,
    /// Every node in the subtree, the root included.
    pub nodes: BTreeMap<NodeId, TreeNode>,
    /// Parent id -> child ids, ordered by id. Leaves have no entry.
    pub children: BTreeMap<NodeId, Vec<NodeId>>,
}

impl Subtree {
    /// Child ids of `id` (empty for leaves and nodes outside the subtree).
    #[must_use]
    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// The Tree groups the hierarchy operations, generic over the store.
pub struct Tree;

impl Tree {
    fn validate_name(name: &str) -> Result<(), CatalogError> {
        if name.trim().is_empty() {
            return Err(CatalogError::InvalidArgument(
                "node names must not be empty".to_string(),
            ));
        }
        if name.chars().count() > MAX_NAME_LENGTH {
            return Err(CatalogError::InvalidArgument(format!(
                "node names are limited to {} characters",
                MAX_NAME_LENGTH
            )));
        }
        Ok(())
    }

    /// Lookup a node. Fails with `NotFound`.
    pub fn node<S: CatalogStore + ?Sized>(
        store: &S,
        kind: TreeKind,
        id: NodeId,
    ) -> Result<TreeNode, CatalogError> {
        store
            .node(kind, id)?
            .ok_or_else(|| CatalogError::NotFound(format!("{} {}", kind, id)))
    }

    /// The nodes from the root down to `id`, both inclusive.
    pub fn ancestor_path<S: CatalogStore + ?Sized>(
        store: &S,
        kind: TreeKind,
        id: NodeId,
    ) -> Result<Vec<TreeNode>, CatalogError> {
        let mut path: Vec<TreeNode> = Vec::new();
        let mut next = Some(id);

        while let Some(start) = next {
            let batch = store.ancestors(kind, start, PARENT_QUERY_DEPTH)?;
            let Some(last) = batch.last() else {
                return Err(if path.is_empty() {
                    CatalogError::NotFound(format!("{} {}", kind, id))
                } else {
                    CatalogError::Storage(format!("{} {} has a dangling parent", kind, start))
                });
            };

            next = last.parent;
            if next.is_some() && batch.len() < PARENT_QUERY_DEPTH {
                return Err(CatalogError::Storage(format!(
                    "{} {} has a dangling parent",
                    kind, last.id
                )));
            }

            path.extend(batch);
            if path.len() > MAX_TREE_HEIGHT {
                return Err(CatalogError::Storage(format!(
                    "ancestors of {} {} exceed {} levels",
                    kind, id, MAX_TREE_HEIGHT
                )));
            }
        }

        path.reverse();
        Ok(path)
    }

    /// `id` and its descendants up to `depth` layers below it.
    ///
    /// One store call per layer. `depth` must be in `1..=64`.
    pub fn descendants<S: CatalogStore + ?Sized>(
        store: &S,
        kind: TreeKind,
        id: NodeId,
        depth: usize,
    ) -> Result<Subtree, CatalogError> {
        if !(1..=MAX_DESCENDANT_DEPTH).contains(&depth) {
            return Err(CatalogError::InvalidArgument(format!(
                "depth must be between 1 and {}, got {}",
                MAX_DESCENDANT_DEPTH, depth
            )));
        }

        let root = Self::node(store, kind, id)?;
        let mut subtree = Subtree {
            kind,
            root: id,
            nodes: BTreeMap::from([(id, root)]),
            children: BTreeMap::new(),
        };

        let mut frontier = BTreeSet::from([id]);
        for _ in 0..depth {
            if frontier.is_empty() {
                break;
            }
            let layer = store.children_of(kind, &frontier)?;
            frontier = BTreeSet::new();
            for child in layer {
                let Some(parent) = child.parent else {
                    continue;
                };
                subtree.children.entry(parent).or_default().push(child.id);
                frontier.insert(child.id);
                subtree.nodes.insert(child.id, child);
            }
        }
        Ok(subtree)
    }

    /// Create a node under `parent`.
    pub fn create<S: CatalogStore + ?Sized>(
        store: &mut S,
        kind: TreeKind,
        name: &str,
        parent: NodeId,
    ) -> Result<TreeNode, CatalogError> {
        Self::validate_name(name)?;
        Self::node(store, kind, parent)?;
        store.insert_node(kind, name, parent)
    }

    /// Rename a non-root node.
    pub fn rename<S: CatalogStore + ?Sized>(
        store: &mut S,
        kind: TreeKind,
        id: NodeId,
        name: &str,
    ) -> Result<TreeNode, CatalogError> {
        Self::validate_name(name)?;
        let mut node = Self::node(store, kind, id)?;
        if node.is_root() {
            return Err(CatalogError::InvalidOperation(format!(
                "the root {} cannot be renamed",
                kind
            )));
        }
        node.name = name.to_string();
        store.update_node(&node)?;
        Ok(node)
    }

    /// Move `id` under `new_parent`.
    ///
    /// Fails with `InvalidOperation` for the root, for `new_parent == id` and
    /// for any descendant of `id`. Moving a template also checks that the
    /// moved name formats stay valid under the new inherited fields.
    pub fn reparent<S: CatalogStore + ?Sized>(
        store: &mut S,
        kind: TreeKind,
        id: NodeId,
        new_parent: NodeId,
    ) -> Result<TreeNode, CatalogError> {
        let mut node = Self::node(store, kind, id)?;
        if node.is_root() {
            return Err(CatalogError::InvalidOperation(format!(
                "the root {} cannot be moved",
                kind
            )));
        }
        if new_parent == id {
            return Err(CatalogError::InvalidOperation(format!(
                "{} {} cannot be its own parent",
                kind, id
            )));
        }

        let path = Self::ancestor_path(store, kind, new_parent)?;
        if path.iter().any(|ancestor| ancestor.id == id) {
            return Err(CatalogError::InvalidOperation(format!(
                "{} {} is a descendant of {} {}",
                kind, new_parent, kind, id
            )));
        }

        if kind == TreeKind::Template {
            Templates::check_move(store, id, new_parent)?;
        }

        node.parent = Some(new_parent);
        store.update_node(&node)?;
        Ok(node)
    }

    /// Delete a non-root node; its children and owned records move to its
    /// parent.
    pub fn delete<S: CatalogStore + ?Sized>(
        store: &mut S,
        kind: TreeKind,
        id: NodeId,
    ) -> Result<(), CatalogError> {
        store.remove_node(kind, id)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::ROOT_NODE;
    use crate::store::MemoryStore;

    /// A straight chain root -> 1 -> 2 -> ... -> n; returns the ids.
    fn chain(store: &mut MemoryStore, n: usize) -> Vec<NodeId> {
        let mut ids = Vec::new();
        let mut parent = ROOT_NODE;
        for i in 0..n {
            let node = Tree::create(store, TreeKind::Container, &format!("n{i}"), parent)
                .expect("create");
            parent = node.id;
            ids.push(node.id);
        }
        ids
    }

    #[test]
    fn ancestor_path_is_root_first() {
        let mut store = MemoryStore::new();
        let ids = chain(&mut store, 3);
        let path = Tree::ancestor_path(&store, TreeKind::Container, ids[2]).expect("path");
        let got: Vec<NodeId> = path.iter().map(|n| n.id).collect();
        assert_eq!(got, vec![ROOT_NODE, ids[0], ids[1], ids[2]]);
        assert!(path[0].is_root());
    }

    #[test]
    fn ancestor_path_crosses_batches() {
        let mut store = MemoryStore::new();
        let ids = chain(&mut store, 150);
        let path = Tree::ancestor_path(&store, TreeKind::Container, ids[149]).expect("path");
        assert_eq!(path.len(), 151);
        assert_eq!(path[0].id, ROOT_NODE);
        assert_eq!(path[150].id, ids[149]);

        // Exactly one batch long, ending at the root.
        let path = Tree::ancestor_path(&store, TreeKind::Container, ids[61]).expect("path");
        assert_eq!(path.len(), PARENT_QUERY_DEPTH);
    }

    #[test]
    fn ancestor_path_of_missing_node() {
        let store = MemoryStore::new();
        assert!(matches!(
            Tree::ancestor_path(&store, TreeKind::Category, NodeId(9)),
            Err(CatalogError::NotFound(_))
        ));
    }

    #[test]
    fn descendants_depth_bounds() {
        let mut store = MemoryStore::new();
        chain(&mut store, 2);
        for depth in [0, 65] {
            assert!(matches!(
                Tree::descendants(&store, TreeKind::Container, ROOT_NODE, depth),
                Err(CatalogError::InvalidArgument(_))
            ));
        }
        assert!(Tree::descendants(&store, TreeKind::Container, ROOT_NODE, 64).is_ok());
    }

    #[test]
    fn descendants_stop_at_depth() {
        let mut store = MemoryStore::new();
        let ids = chain(&mut store, 3);
        let sibling =
            Tree::create(&mut store, TreeKind::Container, "sibling", ROOT_NODE).expect("create");

        let subtree = Tree::descendants(&store, TreeKind::Container, ROOT_NODE, 2).expect("tree");
        assert_eq!(subtree.nodes.len(), 4);
        assert_eq!(subtree.children_of(ROOT_NODE), &[ids[0], sibling.id]);
        assert_eq!(subtree.children_of(ids[0]), &[ids[1]]);
        assert!(subtree.children_of(ids[1]).is_empty());
    }

    #[test]
    fn reparent_rejects_cycles_and_root() {
        let mut store = MemoryStore::new();
        let ids = chain(&mut store, 3);
        let kind = TreeKind::Container;

        assert!(matches!(
            Tree::reparent(&mut store, kind, ids[0], ids[0]),
            Err(CatalogError::InvalidOperation(_))
        ));
        assert!(matches!(
            Tree::reparent(&mut store, kind, ids[0], ids[1]),
            Err(CatalogError::InvalidOperation(_))
        ));
        assert!(matches!(
            Tree::reparent(&mut store, kind, ids[0], ids[2]),
            Err(CatalogError::InvalidOperation(_))
        ));
        assert!(matches!(
            Tree::reparent(&mut store, kind, ROOT_NODE, ids[0]),
            Err(CatalogError::InvalidOperation(_))
        ));

        let moved = Tree::reparent(&mut store, kind, ids[2], ROOT_NODE).expect("move");
        assert_eq!(moved.parent, Some(ROOT_NODE));
    }

    #[test]
    fn create_validates() {
        let mut store = MemoryStore::new();
        assert!(matches!(
            Tree::create(&mut store, TreeKind::Category, "  ", ROOT_NODE),
            Err(CatalogError::InvalidArgument(_))
        ));
        assert!(matches!(
            Tree::create(&mut store, TreeKind::Category, "x", NodeId(42)),
            Err(CatalogError::NotFound(_))
        ));
    }

    #[test]
    fn delete_moves_children_up() {
        let mut store = MemoryStore::new();
        let ids = chain(&mut store, 3);
        Tree::delete(&mut store, TreeKind::Container, ids[1]).expect("delete");
        let node = Tree::node(&store, TreeKind::Container, ids[2]).expect("node");
        assert_eq!(node.parent, Some(ids[0]));
        assert!(Tree::delete(&mut store, TreeKind::Container, ROOT_NODE).is_err());
    }
}
