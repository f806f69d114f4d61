use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::node::{self, Child};
use crate::nodedb::NodeDb;
use crate::proof::{build_range_proof, key_after, RangeProof};

/// Read-only view of one committed version.
///
/// Cheap to clone and safe to share across threads; all state lives in
/// the node database behind an `Arc`, and nodes themselves are immutable
/// once committed.
#[derive(Clone)]
pub struct ImmutableTree {
    ndb: Arc<NodeDb>,
    root: Option<Hash>,
    version: u64,
}

impl ImmutableTree {
    pub(crate) fn new(ndb: Arc<NodeDb>, root: Option<Hash>, version: u64) -> Self {
        Self { ndb, root, version }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Root hash of this version; `None` for a committed empty tree.
    pub fn root_hash(&self) -> Option<Hash> {
        self.root
    }

    fn root_child(&self) -> Option<Child> {
        self.root.map(Child::Saved)
    }

    /// Number of leaves.
    pub fn size(&self) -> Result<u64> {
        match self.root_child() {
            Some(child) => Ok(self.ndb.child_header(&child)?.1),
            None => Ok(0),
        }
    }

    /// Height of the root node; 0 for an empty or single-leaf tree.
    pub fn height(&self) -> Result<u8> {
        match self.root_child() {
            Some(child) => Ok(self.ndb.child_header(&child)?.0),
            None => Ok(0),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.get_with_index(key)?.1)
    }

    /// Value lookup that also reports the leaf rank; on a miss the rank
    /// is the index the key would occupy.
    pub fn get_with_index(&self, key: &[u8]) -> Result<(u64, Option<Vec<u8>>)> {
        match self.root_child() {
            Some(child) => node::get_with_index(&self.ndb, &child, key),
            None => Ok((0, None)),
        }
    }

    /// Key and value of the leaf at `index`, in key order.
    pub fn get_by_index(&self, index: u64) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match self.root_child() {
            Some(child) => node::get_by_index(&self.ndb, &child, index),
            None => Ok(None),
        }
    }

    pub fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Visits every leaf in key order (or reverse); the callback returns
    /// true to stop early. Returns whether the walk was stopped.
    pub fn iterate(&self, ascending: bool, mut f: impl FnMut(&[u8], &[u8]) -> bool) -> Result<bool> {
        match self.root_child() {
            Some(child) => node::iterate_range(&self.ndb, &child, None, None, ascending, &mut f),
            None => Ok(false),
        }
    }

    /// Visits the leaves of `[start, end)`; either bound may be open.
    pub fn iterate_range(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        ascending: bool,
        mut f: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<bool> {
        match self.root_child() {
            Some(child) => node::iterate_range(&self.ndb, &child, start, end, ascending, &mut f),
            None => Ok(false),
        }
    }

    /// Value of `key` (when present) plus a proof of its existence or
    /// absence under this version's root.
    pub fn get_with_proof(&self, key: &[u8]) -> Result<(Option<Vec<u8>>, RangeProof)> {
        if key.is_empty() {
            return Err(Error::InvalidInputs("key is empty".to_string()));
        }
        let Some(child) = self.root_child() else {
            return Err(Error::EmptyTree);
        };
        let end = key_after(key);
        let (proof, pairs) = build_range_proof(&self.ndb, &child, Some(key), Some(&end), 2)?;
        let value = match pairs.into_iter().next() {
            Some((leaf_key, value)) if leaf_key == key => Some(value),
            _ => None,
        };
        Ok((value, proof))
    }

    /// The key/value pairs of `[start, end)` plus a proof covering the
    /// interval. `limit` caps the captured leaves; 0 means unlimited.
    pub fn get_range_with_proof(
        &self,
        start: Option<&[u8]>,
        end: Option<&[u8]>,
        limit: usize,
    ) -> Result<(Vec<(Vec<u8>, Vec<u8>)>, RangeProof)> {
        if let (Some(start), Some(end)) = (start, end) {
            if start >= end {
                return Err(Error::InvalidInputs(
                    "range start must precede its end".to_string(),
                ));
            }
        }
        let Some(child) = self.root_child() else {
            return Err(Error::EmptyTree);
        };
        let (proof, pairs) = build_range_proof(&self.ndb, &child, start, end, limit)?;
        Ok((pairs, proof))
    }

    pub(crate) fn ndb(&self) -> &Arc<NodeDb> {
        &self.ndb
    }
}
