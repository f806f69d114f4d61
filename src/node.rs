//! Tree nodes and the copy-on-write mutation algebra.
//!
//! A node is immutable once hashed; `set`/`remove` rebuild the touched
//! path and leave every untouched branch referenced by content hash.
//! Rebalancing happens on the way back up the modified path, using the
//! stored child heights.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use crate::encoding;
use crate::error::{Error, Result};
use crate::hash::{Hash, HASH_SIZE};
use crate::nodedb::NodeDb;

pub(crate) const MAX_HEIGHT: u8 = 127;

/// Reference to a subtree: staged in memory during a write, or persisted
/// and addressed by content hash.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Child {
    Staged(Box<Node>),
    Saved(Hash),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NodeKind {
    Leaf { value: Vec<u8> },
    Inner { left: Child, right: Child },
}

/// A tree node. `key` is the stored key for a leaf and the smallest key
/// of the right subtree for an inner node.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Node {
    pub(crate) key: Vec<u8>,
    pub(crate) version: u64,
    pub(crate) height: u8,
    pub(crate) size: u64,
    pub(crate) hash: Option<Hash>,
    pub(crate) persisted: bool,
    pub(crate) kind: NodeKind,
}

/// Resolved view of a [`Child`]: borrowed when staged, shared when it
/// came out of the node cache.
pub(crate) enum NodeRef<'a> {
    Borrowed(&'a Node),
    Shared(Arc<Node>),
}

impl Deref for NodeRef<'_> {
    type Target = Node;

    fn deref(&self) -> &Node {
        match self {
            NodeRef::Borrowed(node) => node,
            NodeRef::Shared(node) => node,
        }
    }
}

/// State threaded through one mutation: the staging version, the node
/// source, and the orphan set of the session (hash → creation version).
pub(crate) struct MutationCtx<'a> {
    pub(crate) ndb: &'a NodeDb,
    pub(crate) version: u64,
    pub(crate) orphans: &'a mut HashMap<Hash, u64>,
}

impl MutationCtx<'_> {
    /// Records a node that is about to become unreachable. Staged nodes
    /// were never written and simply vanish.
    fn orphan(&mut self, node: &Node) {
        self.orphan_parts(node.persisted, node.hash, node.version);
    }

    fn orphan_parts(&mut self, persisted: bool, hash: Option<Hash>, version: u64) {
        if persisted {
            if let Some(hash) = hash {
                self.orphans.insert(hash, version);
            }
        }
    }

    /// Produces a uniquely-owned node to rebuild from. Persisted nodes
    /// are cloned; the clone keeps its hash and persisted flag so orphan
    /// bookkeeping still sees the original identity.
    pub(crate) fn take_for_edit(&self, child: Child) -> Result<Box<Node>> {
        match child {
            Child::Staged(node) => Ok(node),
            Child::Saved(hash) => Ok(Box::new((*self.ndb.get_node(&hash)?).clone())),
        }
    }
}

impl Node {
    pub(crate) fn leaf(key: Vec<u8>, value: Vec<u8>, version: u64) -> Self {
        Self {
            key,
            version,
            height: 0,
            size: 1,
            hash: None,
            persisted: false,
            kind: NodeKind::Leaf { value },
        }
    }

    /// Builds a staged inner node over two children, recomputing height
    /// and size from the (possibly loaded) child headers.
    fn join(key: Vec<u8>, left: Child, right: Child, ctx: &MutationCtx<'_>) -> Result<Self> {
        let (left_height, left_size) = ctx.ndb.child_header(&left)?;
        let (right_height, right_size) = ctx.ndb.child_header(&right)?;
        Ok(Self {
            key,
            version: ctx.version,
            height: 1 + left_height.max(right_height),
            size: left_size + right_size,
            hash: None,
            persisted: false,
            kind: NodeKind::Inner { left, right },
        })
    }

    pub(crate) fn is_leaf(&self) -> bool {
        self.height == 0
    }

    /// Wraps the node back into a child reference, by hash if it is
    /// already persisted.
    pub(crate) fn into_child(self: Box<Self>) -> Child {
        match (self.persisted, self.hash) {
            (true, Some(hash)) => Child::Saved(hash),
            _ => Child::Staged(self),
        }
    }

    fn balance_factor(&self, ndb: &NodeDb) -> Result<i32> {
        match &self.kind {
            NodeKind::Leaf { .. } => Ok(0),
            NodeKind::Inner { left, right } => {
                let (left_height, _) = ndb.child_header(left)?;
                let (right_height, _) = ndb.child_header(right)?;
                Ok(i32::from(left_height) - i32::from(right_height))
            }
        }
    }

    /// Copy-on-write insert or replace. Returns the rebuilt subtree and
    /// whether an existing key's value was replaced.
    pub(crate) fn set(
        self: Box<Self>,
        key: &[u8],
        value: &[u8],
        ctx: &mut MutationCtx<'_>,
    ) -> Result<(Box<Node>, bool)> {
        if !self.is_leaf() {
            // Inner nodes on the descent path are always replaced.
            ctx.orphan(&self);
        }
        match self.kind {
            NodeKind::Leaf { .. } => match key.cmp(self.key.as_slice()) {
                Ordering::Less => {
                    let leaf = Node::leaf(key.to_vec(), value.to_vec(), ctx.version);
                    let split_key = self.key.clone();
                    let joined = Node::join(
                        split_key,
                        Child::Staged(Box::new(leaf)),
                        self.into_child(),
                        ctx,
                    )?;
                    Ok((Box::new(joined), false))
                }
                Ordering::Greater => {
                    let leaf = Node::leaf(key.to_vec(), value.to_vec(), ctx.version);
                    let joined = Node::join(
                        key.to_vec(),
                        self.into_child(),
                        Child::Staged(Box::new(leaf)),
                        ctx,
                    )?;
                    Ok((Box::new(joined), false))
                }
                Ordering::Equal => {
                    ctx.orphan(&self);
                    let leaf = Node::leaf(key.to_vec(), value.to_vec(), ctx.version);
                    Ok((Box::new(leaf), true))
                }
            },
            NodeKind::Inner { left, right } => {
                let node_key = self.key;
                if key < node_key.as_slice() {
                    let child = ctx.take_for_edit(left)?;
                    let (new_left, updated) = child.set(key, value, ctx)?;
                    let joined = Node::join(node_key, Child::Staged(new_left), right, ctx)?;
                    if updated {
                        Ok((Box::new(joined), true))
                    } else {
                        Ok((Box::new(joined).balance(ctx)?, false))
                    }
                } else {
                    let child = ctx.take_for_edit(right)?;
                    let (new_right, updated) = child.set(key, value, ctx)?;
                    let joined = Node::join(node_key, left, Child::Staged(new_right), ctx)?;
                    if updated {
                        Ok((Box::new(joined), true))
                    } else {
                        Ok((Box::new(joined).balance(ctx)?, false))
                    }
                }
            }
        }
    }

    /// AVL rebalance after a modifying descent, using stored heights.
    fn balance(self: Box<Self>, ctx: &mut MutationCtx<'_>) -> Result<Box<Node>> {
        let factor = self.balance_factor(ctx.ndb)?;
        if factor.abs() <= 1 {
            return Ok(self);
        }
        let key = self.key;
        let NodeKind::Inner { left, right } = self.kind else {
            return Err(Error::Corruption("leaf reached AVL balance".to_string()));
        };
        if factor > 1 {
            let left_factor = ctx.ndb.resolve(&left)?.balance_factor(ctx.ndb)?;
            if left_factor >= 0 {
                // Left-left: single right rotation.
                Node::rotate_right(key, left, right, ctx)
            } else {
                // Left-right: rotate the left child left, then self right.
                let pivot = ctx.take_for_edit(left)?;
                let rotated = pivot.rotate_self_left(ctx)?;
                Node::rotate_right(key, Child::Staged(rotated), right, ctx)
            }
        } else {
            let right_factor = ctx.ndb.resolve(&right)?.balance_factor(ctx.ndb)?;
            if right_factor <= 0 {
                // Right-right: single left rotation.
                Node::rotate_left(key, left, right, ctx)
            } else {
                // Right-left: rotate the right child right, then self left.
                let pivot = ctx.take_for_edit(right)?;
                let rotated = pivot.rotate_self_right(ctx)?;
                Node::rotate_left(key, left, Child::Staged(rotated), ctx)
            }
        }
    }

    /// Right rotation of the subtree `(key, left, right)`: the left child
    /// becomes the new subtree root.
    fn rotate_right(
        key: Vec<u8>,
        left: Child,
        right: Child,
        ctx: &mut MutationCtx<'_>,
    ) -> Result<Box<Node>> {
        let pivot = ctx.take_for_edit(left)?;
        ctx.orphan(&pivot);
        let pivot_key = pivot.key;
        let NodeKind::Inner {
            left: pivot_left,
            right: pivot_right,
        } = pivot.kind
        else {
            return Err(Error::Corruption(
                "right rotation requires an inner left child".to_string(),
            ));
        };
        let lowered = Node::join(key, pivot_right, right, ctx)?;
        let raised = Node::join(pivot_key, pivot_left, Child::Staged(Box::new(lowered)), ctx)?;
        Ok(Box::new(raised))
    }

    /// Left rotation of the subtree `(key, left, right)`: the right child
    /// becomes the new subtree root.
    fn rotate_left(
        key: Vec<u8>,
        left: Child,
        right: Child,
        ctx: &mut MutationCtx<'_>,
    ) -> Result<Box<Node>> {
        let pivot = ctx.take_for_edit(right)?;
        ctx.orphan(&pivot);
        let pivot_key = pivot.key;
        let NodeKind::Inner {
            left: pivot_left,
            right: pivot_right,
        } = pivot.kind
        else {
            return Err(Error::Corruption(
                "left rotation requires an inner right child".to_string(),
            ));
        };
        let lowered = Node::join(key, left, pivot_left, ctx)?;
        let raised = Node::join(pivot_key, Child::Staged(Box::new(lowered)), pivot_right, ctx)?;
        Ok(Box::new(raised))
    }

    fn rotate_self_left(self: Box<Self>, ctx: &mut MutationCtx<'_>) -> Result<Box<Node>> {
        ctx.orphan(&self);
        let key = self.key;
        let NodeKind::Inner { left, right } = self.kind else {
            return Err(Error::Corruption("cannot rotate a leaf".to_string()));
        };
        Node::rotate_left(key, left, right, ctx)
    }

    fn rotate_self_right(self: Box<Self>, ctx: &mut MutationCtx<'_>) -> Result<Box<Node>> {
        ctx.orphan(&self);
        let key = self.key;
        let NodeKind::Inner { left, right } = self.kind else {
            return Err(Error::Corruption("cannot rotate a leaf".to_string()));
        };
        Node::rotate_right(key, left, right, ctx)
    }
}

/// Copy-on-write delete.
///
/// Returns `(subtree, new_key, removed_value)`:
/// - `removed_value` is `None` when the key was not found, and the
///   returned subtree is the original child untouched;
/// - `subtree` is `None` when the removed leaf was the entire subtree;
/// - `new_key` propagates the new smallest key of a right branch when
///   the leftmost leaf under it was deleted, so ancestors can fix their
///   routing keys.
pub(crate) fn remove_child(
    child: Child,
    key: &[u8],
    ctx: &mut MutationCtx<'_>,
) -> Result<(Option<Child>, Option<Vec<u8>>, Option<Vec<u8>>)> {
    {
        let node = ctx.ndb.resolve(&child)?;
        if let NodeKind::Leaf { value } = &node.kind {
            if key == node.key.as_slice() {
                let value = value.clone();
                ctx.orphan(&node);
                return Ok((None, None, Some(value)));
            }
            drop(node);
            return Ok((Some(child), None, None));
        }
    }

    let node = ctx.take_for_edit(child)?;
    let Node {
        key: node_key,
        version,
        height,
        size,
        hash,
        persisted,
        kind,
    } = *node;
    let NodeKind::Inner { left, right } = kind else {
        return Err(Error::Corruption("leaf in inner removal path".to_string()));
    };

    if key < node_key.as_slice() {
        let (new_left, new_key, value) = remove_child(left, key, ctx)?;
        let Some(value) = value else {
            let Some(new_left) = new_left else {
                return Err(Error::Corruption("lost subtree on missed removal".to_string()));
            };
            let original = Box::new(Node {
                key: node_key,
                version,
                height,
                size,
                hash,
                persisted,
                kind: NodeKind::Inner {
                    left: new_left,
                    right,
                },
            });
            return Ok((Some(original.into_child()), None, None));
        };
        ctx.orphan_parts(persisted, hash, version);
        match new_left {
            // The left branch was a single leaf; the right branch takes
            // this position and the split key travels upward.
            None => Ok((Some(right), Some(node_key), Some(value))),
            Some(new_left) => {
                let joined = Node::join(node_key, new_left, right, ctx)?;
                let balanced = Box::new(joined).balance(ctx)?;
                Ok((Some(Child::Staged(balanced)), new_key, Some(value)))
            }
        }
    } else {
        let (new_right, new_key, value) = remove_child(right, key, ctx)?;
        let Some(value) = value else {
            let Some(new_right) = new_right else {
                return Err(Error::Corruption("lost subtree on missed removal".to_string()));
            };
            let original = Box::new(Node {
                key: node_key,
                version,
                height,
                size,
                hash,
                persisted,
                kind: NodeKind::Inner {
                    left,
                    right: new_right,
                },
            });
            return Ok((Some(original.into_child()), None, None));
        };
        ctx.orphan_parts(persisted, hash, version);
        match new_right {
            None => Ok((Some(left), None, Some(value))),
            Some(new_right) => {
                let routing_key = new_key.unwrap_or(node_key);
                let joined = Node::join(routing_key, left, new_right, ctx)?;
                let balanced = Box::new(joined).balance(ctx)?;
                Ok((Some(Child::Staged(balanced)), None, Some(value)))
            }
        }
    }
}

/// Recursive lookup returning the leaf rank alongside the value; the
/// rank is meaningful even on a miss (the index the key would occupy).
pub(crate) fn get_with_index(
    ndb: &NodeDb,
    child: &Child,
    key: &[u8],
) -> Result<(u64, Option<Vec<u8>>)> {
    let node = ndb.resolve(child)?;
    match &node.kind {
        NodeKind::Leaf { value } => match key.cmp(node.key.as_slice()) {
            Ordering::Less => Ok((0, None)),
            Ordering::Equal => Ok((0, Some(value.clone()))),
            Ordering::Greater => Ok((1, None)),
        },
        NodeKind::Inner { left, right } => {
            if key < node.key.as_slice() {
                get_with_index(ndb, left, key)
            } else {
                let left_size = ndb.child_header(left)?.1;
                let (index, value) = get_with_index(ndb, right, key)?;
                Ok((index + left_size, value))
            }
        }
    }
}

/// Rank-indexed access via the subtree sizes.
pub(crate) fn get_by_index(
    ndb: &NodeDb,
    child: &Child,
    index: u64,
) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    let node = ndb.resolve(child)?;
    match &node.kind {
        NodeKind::Leaf { value } => {
            if index == 0 {
                Ok(Some((node.key.clone(), value.clone())))
            } else {
                Ok(None)
            }
        }
        NodeKind::Inner { left, right } => {
            let left_size = ndb.child_header(left)?.1;
            if index < left_size {
                get_by_index(ndb, left, index)
            } else {
                get_by_index(ndb, right, index - left_size)
            }
        }
    }
}

/// In-order walk over the leaves intersecting `[start, end)`; either
/// bound may be open. Returns true as soon as the callback asks to stop.
pub(crate) fn iterate_range(
    ndb: &NodeDb,
    child: &Child,
    start: Option<&[u8]>,
    end: Option<&[u8]>,
    ascending: bool,
    f: &mut dyn FnMut(&[u8], &[u8]) -> bool,
) -> Result<bool> {
    let node = ndb.resolve(child)?;
    match &node.kind {
        NodeKind::Leaf { value } => {
            let after_start = start.map_or(true, |s| s <= node.key.as_slice());
            let before_end = end.map_or(true, |e| node.key.as_slice() < e);
            if after_start && before_end {
                Ok(f(&node.key, value))
            } else {
                Ok(false)
            }
        }
        NodeKind::Inner { left, right } => {
            // Left subtree keys are < node.key, right subtree keys >= node.key.
            let descend_left = start.map_or(true, |s| s < node.key.as_slice());
            let descend_right = end.map_or(true, |e| node.key.as_slice() < e);
            let (first, first_on, second, second_on) = if ascending {
                (left, descend_left, right, descend_right)
            } else {
                (right, descend_right, left, descend_left)
            };
            if first_on && iterate_range(ndb, first, start, end, ascending, f)? {
                return Ok(true);
            }
            if second_on {
                return iterate_range(ndb, second, start, end, ascending, f);
            }
            Ok(false)
        }
    }
}

/// Hash preimage of a leaf; the value enters as its own SHA-256 so a
/// proof can carry the value hash instead of the value.
pub(crate) fn leaf_hash(key: &[u8], value: &[u8], version: u64) -> Hash {
    leaf_hash_from_value_hash(key, &Hash::of(value), version)
}

pub(crate) fn leaf_hash_from_value_hash(key: &[u8], value_hash: &Hash, version: u64) -> Hash {
    let mut buf = Vec::new();
    encoding::write_varint(&mut buf, 0);
    encoding::write_varint(&mut buf, 1);
    encoding::write_varint(&mut buf, version as i64);
    encoding::write_bytes(&mut buf, key);
    encoding::write_bytes(&mut buf, value_hash.as_ref());
    Hash::of(&buf)
}

/// Hash preimage of an inner node; depends only on the child hashes so
/// identical subtrees collapse to one stored node.
pub(crate) fn inner_hash(height: u8, size: u64, version: u64, left: &Hash, right: &Hash) -> Hash {
    let mut buf = Vec::new();
    encoding::write_varint(&mut buf, i64::from(height));
    encoding::write_varint(&mut buf, size as i64);
    encoding::write_varint(&mut buf, version as i64);
    encoding::write_bytes(&mut buf, left.as_ref());
    encoding::write_bytes(&mut buf, right.as_ref());
    Hash::of(&buf)
}

impl Node {
    /// Canonical storage encoding: the hash preimage shape, except that
    /// a leaf stores its full value so it can be rehydrated.
    ///
    /// Only valid once the children are saved (referenced by hash).
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        encoding::write_varint(&mut buf, i64::from(self.height));
        encoding::write_varint(&mut buf, self.size as i64);
        encoding::write_varint(&mut buf, self.version as i64);
        encoding::write_bytes(&mut buf, &self.key);
        match &self.kind {
            NodeKind::Leaf { value } => encoding::write_bytes(&mut buf, value),
            NodeKind::Inner { left, right } => {
                let (Child::Saved(left), Child::Saved(right)) = (left, right) else {
                    return Err(Error::Corruption(
                        "encoding an inner node with staged children".to_string(),
                    ));
                };
                encoding::write_bytes(&mut buf, left.as_ref());
                encoding::write_bytes(&mut buf, right.as_ref());
            }
        }
        Ok(buf)
    }

    /// Decodes a stored node. The content hash is not part of the
    /// encoding; the caller owns it (it is the storage key).
    pub(crate) fn decode(bytes: &[u8]) -> Result<Node> {
        let mut cur = bytes;
        let height = decode_height(&mut cur)?;
        let size = decode_size(&mut cur)?;
        let version = decode_version(&mut cur)?;
        let key = encoding::read_bytes(&mut cur)?;
        let node = if height == 0 {
            let value = encoding::read_bytes(&mut cur)?;
            if size != 1 {
                return Err(Error::Deserialization(format!(
                    "leaf node with size {}",
                    size
                )));
            }
            Node {
                key,
                version,
                height,
                size,
                hash: None,
                persisted: false,
                kind: NodeKind::Leaf { value },
            }
        } else {
            let left = decode_child_hash(&mut cur)?;
            let right = decode_child_hash(&mut cur)?;
            if size < 2 {
                return Err(Error::Deserialization(format!(
                    "inner node of height {} with size {}",
                    height, size
                )));
            }
            Node {
                key,
                version,
                height,
                size,
                hash: None,
                persisted: false,
                kind: NodeKind::Inner {
                    left: Child::Saved(left),
                    right: Child::Saved(right),
                },
            }
        };
        encoding::expect_done(cur)?;
        if node.key.is_empty() {
            return Err(Error::Deserialization("node with empty key".to_string()));
        }
        if node.version == 0 {
            return Err(Error::Deserialization("node with version 0".to_string()));
        }
        Ok(node)
    }
}

fn decode_height(cur: &mut &[u8]) -> Result<u8> {
    let raw = encoding::read_varint(cur)?;
    u8::try_from(raw)
        .ok()
        .filter(|height| *height <= MAX_HEIGHT)
        .ok_or_else(|| Error::Deserialization(format!("invalid node height {}", raw)))
}

fn decode_size(cur: &mut &[u8]) -> Result<u64> {
    let raw = encoding::read_varint(cur)?;
    u64::try_from(raw).map_err(|_| Error::Deserialization(format!("invalid node size {}", raw)))
}

pub(crate) fn decode_version(cur: &mut &[u8]) -> Result<u64> {
    let raw = encoding::read_varint(cur)?;
    u64::try_from(raw).map_err(|_| Error::Deserialization(format!("invalid version {}", raw)))
}

fn decode_child_hash(cur: &mut &[u8]) -> Result<Hash> {
    let bytes = encoding::read_bytes(cur)?;
    if bytes.len() != HASH_SIZE {
        return Err(Error::Deserialization(format!(
            "child hash of {} bytes",
            bytes.len()
        )));
    }
    Ok(Hash::from_slice(&bytes))
}
