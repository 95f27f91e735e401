//! B+Tree engine: descent, upsert, split, and vacuum.
//!
//! The tree keeps resident nodes in a map keyed by page id; the root is
//! resident for the life of the open database and always lives at page 1.
//! Internal nodes reference children by page id, and a child is faulted in
//! through the pager the first time a descent reaches it. There is no
//! eviction: the resident set grows until close.

use crate::node::{child_id_value, Node, NodeType, Pair};
use crate::page::{CELL_HEADER_SIZE, POINTER_SIZE, ROOT_PAGE_ID};
use crate::pager::Pager;
use bytes::Bytes;
use loam_common::{LoamError, Result, StorageConfig};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, trace};

/// Outcome of an upsert. The split flag is advisory, for metrics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    /// True when the mutation overflowed a node and triggered a split.
    pub split: bool,
}

/// The B+Tree storage engine over a single database file.
///
/// The engine expects one operation at a time; the public database handle
/// serializes callers through its lock.
pub struct BTree {
    pager: Pager,
    /// Resident nodes keyed by page id.
    nodes: HashMap<u32, Node>,
    /// Highest assigned page id. The one value readable without the
    /// database lock.
    node_count: AtomicU32,
}

impl BTree {
    /// Opens the tree backed by the configured file, creating it if missing.
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let node_count = AtomicU32::new(0);
        let (pager, root) = Pager::open(config, &node_count)?;

        let mut nodes = HashMap::new();
        nodes.insert(root.id, root);

        Ok(Self {
            pager,
            nodes,
            node_count,
        })
    }

    /// Page size the backing file is laid out with.
    pub fn page_size(&self) -> usize {
        self.pager.page_size()
    }

    /// Highest page id assigned so far.
    pub fn node_count(&self) -> u32 {
        self.node_count.load(Ordering::SeqCst)
    }

    /// Number of resident nodes.
    pub fn resident_len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns a resident node, if any.
    pub fn node(&self, page_id: u32) -> Option<&Node> {
        self.nodes.get(&page_id)
    }

    /// Returns the root node.
    pub fn root(&self) -> Result<&Node> {
        self.resident(ROOT_PAGE_ID)
    }

    fn resident(&self, page_id: u32) -> Result<&Node> {
        self.nodes
            .get(&page_id)
            .ok_or_else(|| LoamError::Internal(format!("node {page_id} is not resident")))
    }

    fn resident_mut(&mut self, page_id: u32) -> Result<&mut Node> {
        self.nodes
            .get_mut(&page_id)
            .ok_or_else(|| LoamError::Internal(format!("node {page_id} is not resident")))
    }

    /// Assigns the next page id.
    fn next_page_id(&self) -> u32 {
        self.node_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Looks up a key and returns its value.
    pub fn find(&mut self, key: &[u8]) -> Result<Bytes> {
        let (leaf_id, pos, found) = self.locate(key)?;
        if !found {
            return Err(LoamError::KeyNotFound);
        }
        Ok(self.resident(leaf_id)?.pairs[pos].value.clone())
    }

    /// Inserts or updates a key, splitting the leaf (and transitively its
    /// ancestors) when the mutation drives its free space negative.
    pub fn upsert(&mut self, key: &[u8], value: &[u8]) -> Result<UpsertOutcome> {
        let (leaf_id, pos, found) = self.locate(key)?;
        let overflowed = {
            let leaf = self.resident_mut(leaf_id)?;
            if found {
                let old_len = leaf.pairs[pos].value.len() as i32;
                leaf.pairs[pos].value = Bytes::copy_from_slice(value);
                leaf.free_length += old_len - value.len() as i32;
            } else {
                leaf.pairs.insert(
                    pos,
                    Pair::new(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value)),
                );
                leaf.free_length -=
                    (POINTER_SIZE + CELL_HEADER_SIZE + key.len() + value.len()) as i32;
            }
            leaf.dirty = true;
            leaf.free_length < 0
        };

        if overflowed {
            debug!(node = leaf_id, "node overflow, splitting");
            self.split(leaf_id)?;
            return Ok(UpsertOutcome { split: true });
        }
        Ok(UpsertOutcome { split: false })
    }

    /// Reserved: deletion is not implemented yet. The call succeeds without
    /// touching the tree; a future revision adds rebalance/merge semantics.
    pub fn remove(&mut self, _key: &[u8]) -> Result<()> {
        Ok(())
    }

    /// Flushes the dirty subtree and releases the backing file.
    pub fn close(mut self) -> Result<()> {
        info!("closing database");
        self.vacuum()
    }

    /// Depth-first flush of every dirty resident node. Stub children were
    /// never mutated and are skipped.
    pub fn vacuum(&mut self) -> Result<()> {
        self.flush_subtree(ROOT_PAGE_ID)
    }

    fn flush_subtree(&mut self, page_id: u32) -> Result<()> {
        let children = {
            let node = self
                .nodes
                .get_mut(&page_id)
                .ok_or_else(|| LoamError::Internal(format!("node {page_id} is not resident")))?;
            if node.dirty {
                self.pager.write_node(node)?;
                node.dirty = false;
            }
            if node.node_type.is_internal() {
                node.children.clone()
            } else {
                Vec::new()
            }
        };

        for child_id in children {
            if self.nodes.contains_key(&child_id) {
                self.flush_subtree(child_id)?;
            }
        }
        Ok(())
    }

    /// Root-to-leaf descent. Returns the leaf owning the key's slot, the
    /// position within its pair list, and whether the key was found there.
    ///
    /// At internal nodes the binary-search position selects the child slot;
    /// an exact separator hit descends one slot right, because a child holds
    /// keys greater than or equal to the separator on its left.
    fn locate(&mut self, key: &[u8]) -> Result<(u32, usize, bool)> {
        let mut id = ROOT_PAGE_ID;
        loop {
            let child_id = {
                let node = self.resident(id)?;
                let (pos, found) = match node.search(key) {
                    Ok(pos) => (pos, true),
                    Err(pos) => (pos, false),
                };
                trace!(node = id, pairs = node.pairs.len(), "descending");

                if node.node_type.is_leaf() {
                    return Ok((id, pos, found));
                }

                let slot = if found { pos + 1 } else { pos };
                *node.children.get(slot).ok_or_else(|| {
                    LoamError::Internal(format!("internal node {id} missing child slot {slot}"))
                })?
            };

            if child_id == 0 || child_id > self.node_count() {
                return Err(LoamError::PageCorrupted {
                    page_id: id,
                    reason: format!("child page id {child_id} out of range"),
                });
            }

            if !self.nodes.contains_key(&child_id) {
                let mut child = self.pager.read_node(child_id)?;
                child.parent = Some(id);
                self.nodes.insert(child_id, child);
            }
            id = child_id;
        }
    }

    /// Splits an overfull node, cascading toward the root when the parent
    /// overflows in turn. The root never moves off page 1.
    fn split(&mut self, page_id: u32) -> Result<()> {
        if page_id == ROOT_PAGE_ID {
            self.split_root()
        } else {
            self.split_non_root(page_id)
        }
    }

    /// Carves the upper half of a node into a fresh sibling and wires the
    /// separator into the parent. Leaf splits copy the separator key up (the
    /// pair itself stays in the sibling); internal splits move the separator
    /// pair up, so both halves keep one more child than they have pairs.
    fn split_non_root(&mut self, page_id: u32) -> Result<()> {
        let page_size = self.pager.page_size();
        let sibling_id = self.next_page_id();

        let (parent_id, sep_key, sibling) = {
            let node = self.resident_mut(page_id)?;
            let parent_id = node
                .parent
                .ok_or_else(|| LoamError::Internal(format!("node {page_id} has no parent")))?;
            let mid = node.pairs.len() / 2;

            let (sep_key, right_pairs, right_children) = if node.node_type.is_internal() {
                let right_pairs = node.pairs.split_off(mid + 1);
                let separator = node
                    .pairs
                    .pop()
                    .ok_or_else(|| LoamError::Internal(format!("node {page_id} split empty")))?;
                let right_children = node.children.split_off(mid + 1);
                (separator.key, right_pairs, right_children)
            } else {
                let right_pairs = node.pairs.split_off(mid);
                let sep_key = right_pairs[0].key.clone();
                (sep_key, right_pairs, Vec::new())
            };

            let mut sibling = Node {
                id: sibling_id,
                node_type: node.node_type,
                parent: Some(parent_id),
                pairs: right_pairs,
                children: right_children,
                dirty: true,
                free_length: 0,
            };
            sibling.recompute_free_length(page_size);

            node.dirty = true;
            node.recompute_free_length(page_size);
            (parent_id, sep_key, sibling)
        };

        debug!(
            node = page_id,
            sibling = sibling_id,
            parent = parent_id,
            "split node"
        );

        self.adopt_children(&sibling);
        self.nodes.insert(sibling_id, sibling);

        let parent_overflowed = {
            let parent = self.resident_mut(parent_id)?;
            let pos = parent.search(&sep_key).unwrap_or_else(|pos| pos);
            parent
                .pairs
                .insert(pos, Pair::new(sep_key, child_id_value(page_id)));
            parent.children.insert(pos + 1, sibling_id);
            // the displaced separator's left child is now the sibling
            if pos + 1 < parent.pairs.len() {
                parent.pairs[pos + 1].value = child_id_value(sibling_id);
            }
            parent.dirty = true;
            parent.recompute_free_length(page_size);
            parent.free_length < 0
        };

        if parent_overflowed {
            self.split(parent_id)?;
        }
        Ok(())
    }

    /// Splits the root in place: its payload moves into two fresh siblings
    /// and page 1 is rewritten as an internal root holding the one separator,
    /// with the right sibling serving as the right-most child.
    fn split_root(&mut self) -> Result<()> {
        let page_size = self.pager.page_size();
        let left_id = self.next_page_id();
        let right_id = self.next_page_id();

        let (child_type, left_pairs, right_pairs, left_children, right_children) = {
            let root = self.resident_mut(ROOT_PAGE_ID)?;
            let mid = root.pairs.len() / 2;
            let child_type = root.node_type.without_root();

            let (sep_key, right_pairs, right_children, left_children) =
                if root.node_type.is_internal() {
                    let right_pairs = root.pairs.split_off(mid + 1);
                    let separator = root
                        .pairs
                        .pop()
                        .ok_or_else(|| LoamError::Internal("root split empty".to_string()))?;
                    let right_children = root.children.split_off(mid + 1);
                    let left_children = std::mem::take(&mut root.children);
                    (separator.key, right_pairs, right_children, left_children)
                } else {
                    let right_pairs = root.pairs.split_off(mid);
                    let sep_key = right_pairs[0].key.clone();
                    (sep_key, right_pairs, Vec::new(), Vec::new())
                };
            let left_pairs = std::mem::take(&mut root.pairs);

            root.node_type = NodeType::new(NodeType::ROOT | NodeType::INTERNAL);
            root.pairs = vec![Pair::new(sep_key, child_id_value(left_id))];
            root.children = vec![left_id, right_id];
            root.dirty = true;
            root.recompute_free_length(page_size);

            (
                child_type,
                left_pairs,
                right_pairs,
                left_children,
                right_children,
            )
        };

        debug!(left = left_id, right = right_id, "split root");

        let mut left = Node {
            id: left_id,
            node_type: child_type,
            parent: Some(ROOT_PAGE_ID),
            pairs: left_pairs,
            children: left_children,
            dirty: true,
            free_length: 0,
        };
        left.recompute_free_length(page_size);

        let mut right = Node {
            id: right_id,
            node_type: child_type,
            parent: Some(ROOT_PAGE_ID),
            pairs: right_pairs,
            children: right_children,
            dirty: true,
            free_length: 0,
        };
        right.recompute_free_length(page_size);

        self.adopt_children(&left);
        self.adopt_children(&right);
        self.nodes.insert(left_id, left);
        self.nodes.insert(right_id, right);
        Ok(())
    }

    /// Points resident children at their new owner after a split moves them.
    fn adopt_children(&mut self, node: &Node) {
        for child_id in &node.children {
            if let Some(child) = self.nodes.get_mut(child_id) {
                child.parent = Some(node.id);
            }
        }
    }
}
