//! Merkle range proofs.
//!
//! A [`RangeProof`] captures one or more contiguous leaves together with
//! the inner-node spines needed to refold them into the root hash. The
//! same object proves existence (a captured leaf carries the key) and
//! absence (the key falls strictly between two captured adjacent leaves,
//! or beyond a proven edge of the tree).

use proptest::collection::vec;
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::node::{
    inner_hash, leaf_hash_from_value_hash, Child, NodeKind,
};
use crate::nodedb::NodeDb;

mod wire;

pub use wire::ProofOp;

/// One inner-node frame on a root-to-leaf path. Exactly one side is
/// elided: the side the path (or the folded subtree) descends into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofInnerNode {
    pub height: u8,
    pub size: u64,
    pub version: u64,
    pub left: Option<Hash>,
    pub right: Option<Hash>,
}

impl ProofInnerNode {
    /// Refolds a child hash through this frame, placing it on the
    /// elided side.
    fn fold(&self, child: &Hash) -> Result<Hash> {
        match (&self.left, &self.right) {
            (None, Some(right)) => Ok(inner_hash(
                self.height,
                self.size,
                self.version,
                child,
                right,
            )),
            (Some(left), None) => Ok(inner_hash(
                self.height,
                self.size,
                self.version,
                left,
                child,
            )),
            _ => Err(Error::InvalidProof(
                "path frame must elide exactly one side".to_string(),
            )),
        }
    }
}

impl Arbitrary for ProofInnerNode {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        (
            1..=127u8,
            2..i64::MAX as u64,
            1..i64::MAX as u64,
            any::<Hash>(),
            any::<bool>(),
        )
            .prop_map(|(height, size, version, hash, left_elided)| {
                let (left, right) = if left_elided {
                    (None, Some(hash))
                } else {
                    (Some(hash), None)
                };
                ProofInnerNode {
                    height,
                    size,
                    version,
                    left,
                    right,
                }
            })
            .boxed()
    }
}

/// A captured leaf. The proof carries the hash of the value, not the
/// value; the leaf preimage is reconstructed from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofLeaf {
    pub key: Vec<u8>,
    pub value_hash: Hash,
    pub version: u64,
}

impl ProofLeaf {
    fn hash(&self) -> Hash {
        leaf_hash_from_value_hash(&self.key, &self.value_hash, self.version)
    }
}

impl Arbitrary for ProofLeaf {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        (vec(any::<u8>(), 1..48), any::<Hash>(), 1..i64::MAX as u64)
            .prop_map(|(key, value_hash, version)| ProofLeaf {
                key,
                value_hash,
                version,
            })
            .boxed()
    }
}

/// Inner frames from the root (first) toward a leaf (last).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathToLeaf(pub Vec<ProofInnerNode>);

/// Refolds a leaf hash through a run of frames, leaf-most frame first.
fn fold_frames(frames: &[ProofInnerNode], leaf: Hash) -> Result<Hash> {
    let mut hash = leaf;
    for frame in frames.iter().rev() {
        hash = frame.fold(&hash)?;
    }
    Ok(hash)
}

impl PathToLeaf {

    /// True when the path never descends right: its leaf is the first
    /// leaf of the tree.
    fn is_leftmost(&self) -> bool {
        self.0.iter().all(|frame| frame.left.is_none())
    }

    /// True when the path never descends left: its leaf is the last
    /// leaf of the tree.
    fn is_rightmost(&self) -> bool {
        self.0.iter().all(|frame| frame.right.is_none())
    }
}

impl Arbitrary for PathToLeaf {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        vec(any::<ProofInnerNode>(), 0..6).prop_map(PathToLeaf).boxed()
    }
}

/// Proof for a contiguous run of leaves against one root hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeProof {
    /// Path from the root to the first captured leaf.
    pub left_path: PathToLeaf,
    /// Spines between each later leaf and the structure captured before
    /// it; always left-elided.
    pub inner_nodes: Vec<PathToLeaf>,
    /// The captured leaves, in ascending key order.
    pub leaves: Vec<ProofLeaf>,
}

impl Arbitrary for RangeProof {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        (
            any::<PathToLeaf>(),
            vec(any::<PathToLeaf>(), 0..4),
            vec(any::<ProofLeaf>(), 1..6),
        )
            .prop_map(|(left_path, inner_nodes, leaves)| RangeProof {
                left_path,
                inner_nodes,
                leaves,
            })
            .boxed()
    }
}

/// Cursor state for the bottom-up refold.
struct Refold<'a> {
    leaves: &'a [ProofLeaf],
    spines: &'a [PathToLeaf],
    leaf_idx: usize,
    spine_idx: usize,
}

impl Refold<'_> {
    /// Folds the next leaf up `path`, then grafts the remaining leaves
    /// onto the unconsumed right hashes of `path`, leaf-most first.
    ///
    /// Returns `(subtree hash, tree_end, done)`: `tree_end` is true iff
    /// the final captured leaf is the last leaf of the whole tree, and
    /// `done` when every leaf has been consumed.
    fn compute(&mut self, path: &[ProofInnerNode], rightmost: bool) -> Result<(Hash, bool, bool)> {
        let leaf = &self.leaves[self.leaf_idx];
        self.leaf_idx += 1;
        let hash = fold_frames(path, leaf.hash())?;

        if self.leaf_idx == self.leaves.len() {
            let tree_end = rightmost && path.iter().all(|frame| frame.right.is_none());
            return Ok((hash, tree_end, true));
        }

        let mut upper = path;
        while let Some((frame, rest)) = upper.split_last() {
            upper = rest;
            let Some(expected) = frame.right else {
                continue;
            };
            let spine = self
                .spines
                .get(self.spine_idx)
                .ok_or_else(|| Error::InvalidProof("not enough inner paths".to_string()))?;
            self.spine_idx += 1;

            let spine_rightmost =
                rightmost && upper.iter().all(|frame| frame.right.is_none());
            let (derived, tree_end, done) = self.compute(&spine.0, spine_rightmost)?;
            if derived != expected {
                return Err(Error::InvalidProof(
                    "subtree hash does not match the captured sibling".to_string(),
                ));
            }
            if done {
                return Ok((hash, tree_end, true));
            }
        }

        Ok((hash, false, false))
    }
}

impl RangeProof {
    /// Recomputes the root hash and checks the structural invariants.
    /// Returns the root together with whether the proof reaches the end
    /// of the tree.
    fn compute_root(&self) -> Result<(Hash, bool)> {
        if self.leaves.is_empty() {
            return Err(Error::InvalidProof("proof captures no leaves".to_string()));
        }
        if self.inner_nodes.len() + 1 != self.leaves.len() {
            return Err(Error::InvalidProof(format!(
                "{} inner paths for {} leaves",
                self.inner_nodes.len(),
                self.leaves.len()
            )));
        }
        for pair in self.leaves.windows(2) {
            if pair[0].key >= pair[1].key {
                return Err(Error::InvalidProof(
                    "leaf keys are not strictly ascending".to_string(),
                ));
            }
        }
        // A spine frame with a left sibling would let non-adjacent
        // leaves masquerade as neighbours; only the left path may carry
        // left hashes.
        for spine in &self.inner_nodes {
            if spine.0.iter().any(|frame| frame.left.is_some()) {
                return Err(Error::InvalidProof(
                    "inner path frame carries a left sibling".to_string(),
                ));
            }
        }

        let mut refold = Refold {
            leaves: &self.leaves,
            spines: &self.inner_nodes,
            leaf_idx: 0,
            spine_idx: 0,
        };
        let (hash, tree_end, done) = refold.compute(&self.left_path.0, true)?;
        if !done {
            return Err(Error::InvalidProof("leftover leaves".to_string()));
        }
        Ok((hash, tree_end))
    }

    /// Verifies the proof against an expected root hash.
    pub fn verify(&self, root: &Hash) -> Result<()> {
        self.verify_root(root).map(|_| ())
    }

    fn verify_root(&self, root: &Hash) -> Result<bool> {
        let (computed, tree_end) = self.compute_root()?;
        if computed != *root {
            return Err(Error::InvalidRoot);
        }
        Ok(tree_end)
    }

    /// Verifies that `key` maps to `value` under `root`.
    pub fn verify_item(&self, key: &[u8], value: &[u8], root: &Hash) -> Result<()> {
        if key.is_empty() || value.is_empty() {
            return Err(Error::InvalidInputs(
                "existence proofs need a key and a value".to_string(),
            ));
        }
        self.verify(root)?;
        let leaf = self
            .leaves
            .iter()
            .find(|leaf| leaf.key == key)
            .ok_or_else(|| Error::InvalidProof("key is not captured by the proof".to_string()))?;
        if leaf.value_hash != Hash::of(value) {
            return Err(Error::InvalidProof(
                "captured value hash differs".to_string(),
            ));
        }
        Ok(())
    }

    /// Verifies that `key` is absent under `root`.
    pub fn verify_absence(&self, key: &[u8], root: &Hash) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidInputs("absence proofs need a key".to_string()));
        }
        let tree_end = self.verify_root(root)?;

        let first = &self.leaves[0];
        match key.cmp(first.key.as_slice()) {
            std::cmp::Ordering::Less => {
                if self.left_path.is_leftmost() {
                    return Ok(());
                }
                return Err(Error::InvalidProof(
                    "key below the range but the first leaf is not leftmost".to_string(),
                ));
            }
            std::cmp::Ordering::Equal => {
                return Err(Error::InvalidProof(
                    "key is present at the first captured leaf".to_string(),
                ));
            }
            std::cmp::Ordering::Greater => {}
        }

        // Covers the bare single-leaf tree too: an empty path is
        // trivially rightmost.
        if self.left_path.is_rightmost() {
            return Ok(());
        }

        for leaf in &self.leaves[1..] {
            match key.cmp(leaf.key.as_slice()) {
                // Strictly between two adjacent captured leaves.
                std::cmp::Ordering::Less => return Ok(()),
                std::cmp::Ordering::Equal => {
                    return Err(Error::InvalidProof(
                        "key is present at a captured leaf".to_string(),
                    ));
                }
                std::cmp::Ordering::Greater => continue,
            }
        }

        if tree_end {
            return Ok(());
        }
        Err(Error::InvalidProof(
            "key is beyond the captured range".to_string(),
        ))
    }
}

/// The least byte string strictly greater than `key`.
pub(crate) fn key_after(key: &[u8]) -> Vec<u8> {
    let mut next = key.to_vec();
    next.push(0x00);
    next
}

struct LeafSeen {
    key: Vec<u8>,
    value: Vec<u8>,
    version: u64,
}

fn child_hash(child: &Child) -> Result<Hash> {
    match child {
        Child::Saved(hash) => Ok(*hash),
        Child::Staged(node) => node
            .hash
            .ok_or_else(|| Error::InvalidInputs("proofs require a committed tree".to_string())),
    }
}

/// Descends toward `key` (toward the leftmost leaf when `None`),
/// recording the path frames with the descent side elided. Lands on the
/// leaf adjacent to where `key` would live: the key's own leaf when
/// present, otherwise its in-order predecessor (or the leftmost leaf
/// when the key precedes the whole tree).
fn path_to_leaf(
    ndb: &NodeDb,
    child: &Child,
    key: Option<&[u8]>,
    path: &mut Vec<ProofInnerNode>,
) -> Result<LeafSeen> {
    let node = ndb.resolve(child)?;
    match &node.kind {
        NodeKind::Leaf { value } => Ok(LeafSeen {
            key: node.key.clone(),
            value: value.clone(),
            version: node.version,
        }),
        NodeKind::Inner { left, right } => {
            if key.map_or(true, |key| key < node.key.as_slice()) {
                path.push(ProofInnerNode {
                    height: node.height,
                    size: node.size,
                    version: node.version,
                    left: None,
                    right: Some(child_hash(right)?),
                });
                path_to_leaf(ndb, left, key, path)
            } else {
                path.push(ProofInnerNode {
                    height: node.height,
                    size: node.size,
                    version: node.version,
                    left: Some(child_hash(left)?),
                    right: None,
                });
                path_to_leaf(ndb, right, key, path)
            }
        }
    }
}

struct ProofScan<'a> {
    ndb: &'a NodeDb,
    start: Vec<u8>,
    end: Option<&'a [u8]>,
    limit: usize,
    path: &'a [ProofInnerNode],
    path_cursor: Option<usize>,
    spine: Vec<ProofInnerNode>,
    spines: Vec<PathToLeaf>,
    leaves: Vec<ProofLeaf>,
    pairs: Vec<(Vec<u8>, Vec<u8>)>,
    leaf_count: usize,
}

impl ProofScan<'_> {
    /// Pre-order walk over `[start, ∞)` collecting the leaves after the
    /// left boundary and the spine frames between them. Nodes matching
    /// the already-captured left path are skipped; everything after the
    /// divergence point contributes frames. Returns true to stop.
    fn scan(&mut self, child: &Child) -> Result<bool> {
        let node = self.ndb.resolve(child)?;
        match &node.kind {
            NodeKind::Leaf { value } => {
                if node.key.as_slice() < self.start.as_slice() {
                    // The left boundary leaf itself sits below start.
                    return Ok(false);
                }
                self.spines.push(PathToLeaf(std::mem::take(&mut self.spine)));
                self.leaves.push(ProofLeaf {
                    key: node.key.clone(),
                    value_hash: Hash::of(value),
                    version: node.version,
                });
                self.leaf_count += 1;
                if self.limit > 0 && self.leaf_count >= self.limit {
                    return Ok(true);
                }
                if let Some(end) = self.end {
                    // At or past the exclusive end: boundary witness only.
                    if node.key.as_slice() >= end {
                        return Ok(true);
                    }
                }
                self.pairs.push((node.key.clone(), value.clone()));
                if let Some(end) = self.end {
                    if key_after(&node.key).as_slice() >= end {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            NodeKind::Inner { left, right } => {
                match self.path_cursor {
                    Some(cursor) if cursor < self.path.len() => {
                        let frame = &self.path[cursor];
                        let left_matches = match frame.left {
                            Some(hash) => child_hash(left)? == hash,
                            None => true,
                        };
                        let right_matches = match frame.right {
                            Some(hash) => child_hash(right)? == hash,
                            None => true,
                        };
                        if frame.height == node.height && left_matches && right_matches {
                            self.path_cursor = Some(cursor + 1);
                        } else {
                            self.path_cursor = None;
                        }
                    }
                    Some(_) => self.path_cursor = None,
                    None => {}
                }
                if self.path_cursor.is_none() {
                    self.spine.push(ProofInnerNode {
                        height: node.height,
                        size: node.size,
                        version: node.version,
                        left: None,
                        right: Some(child_hash(right)?),
                    });
                }

                if self.start.as_slice() < node.key.as_slice() && self.scan(left)? {
                    return Ok(true);
                }
                self.scan(right)
            }
        }
    }
}

/// Builds a proof for the leaves of `[start, end)` (open bounds allowed)
/// plus the boundary witnesses, together with the in-range pairs.
/// `limit` caps the captured leaves; 0 means unlimited.
pub(crate) fn build_range_proof(
    ndb: &NodeDb,
    root: &Child,
    start: Option<&[u8]>,
    end: Option<&[u8]>,
    limit: usize,
) -> Result<(RangeProof, Vec<(Vec<u8>, Vec<u8>)>)> {
    let mut frames = Vec::new();
    let left = path_to_leaf(ndb, root, start, &mut frames)?;

    let mut pairs = Vec::new();
    let start_ok = start.map_or(true, |s| s <= left.key.as_slice());
    let end_ok = end.map_or(true, |e| left.key.as_slice() < e);
    if start_ok && end_ok {
        pairs.push((left.key.clone(), left.value.clone()));
    }
    let first_leaf = ProofLeaf {
        key: left.key.clone(),
        value_hash: Hash::of(&left.value),
        version: left.version,
    };

    let single = |frames: Vec<ProofInnerNode>, pairs: Vec<(Vec<u8>, Vec<u8>)>| {
        (
            RangeProof {
                left_path: PathToLeaf(frames),
                inner_nodes: Vec::new(),
                leaves: vec![first_leaf.clone()],
            },
            pairs,
        )
    };

    if frames.iter().all(|frame| frame.right.is_none()) {
        // The boundary leaf is the last leaf of the tree.
        return Ok(single(frames, pairs));
    }
    if limit == 1 {
        return Ok(single(frames, pairs));
    }
    if let Some(end) = end {
        if key_after(&left.key).as_slice() >= end {
            return Ok(single(frames, pairs));
        }
    }

    let mut scan = ProofScan {
        ndb,
        start: key_after(&left.key),
        end,
        limit,
        path: &frames,
        path_cursor: Some(0),
        spine: Vec::new(),
        spines: Vec::new(),
        leaves: Vec::new(),
        pairs: Vec::new(),
        leaf_count: 1,
    };
    scan.scan(root)?;

    let ProofScan {
        spines,
        leaves: later_leaves,
        pairs: later_pairs,
        ..
    } = scan;

    let mut leaves = vec![first_leaf];
    leaves.extend(later_leaves);
    pairs.extend(later_pairs);

    Ok((
        RangeProof {
            left_path: PathToLeaf(frames),
            inner_nodes: spines,
            leaves,
        },
        pairs,
    ))
}
