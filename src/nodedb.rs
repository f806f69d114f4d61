//! Node persistence over the backing store.
//!
//! Everything lives under single-byte key prefixes:
//!
//! | prefix | key bytes                                   | value        |
//! |--------|---------------------------------------------|--------------|
//! | `n`    | 32-byte node hash                           | encoded node |
//! | `o`    | `be(to_version) ‖ be(from_version) ‖ hash`  | empty        |
//! | `r`    | `be(version)`                               | root hash    |
//!
//! Version components inside keys are fixed-width big-endian so range
//! scans order by version. Orphan keys lead with the version a node was
//! last reachable at, which is the axis `delete_version` scans on.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::hash::{Hash, HASH_SIZE};
use crate::node::{inner_hash, leaf_hash, Child, Node, NodeKind, NodeRef};
use crate::store::{Batch, KvStore};

const NODE_PREFIX: u8 = b'n';
const ORPHAN_PREFIX: u8 = b'o';
const ROOT_PREFIX: u8 = b'r';

const ORPHAN_KEY_LEN: usize = 1 + 8 + 8 + HASH_SIZE;
const ROOT_KEY_LEN: usize = 1 + 8;

fn node_key(hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + HASH_SIZE);
    key.push(NODE_PREFIX);
    key.extend_from_slice(hash.as_ref());
    key
}

fn orphan_key(to_version: u64, from_version: u64, hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(ORPHAN_KEY_LEN);
    key.push(ORPHAN_PREFIX);
    key.extend_from_slice(&to_version.to_be_bytes());
    key.extend_from_slice(&from_version.to_be_bytes());
    key.extend_from_slice(hash.as_ref());
    key
}

fn root_key(version: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(ROOT_KEY_LEN);
    key.push(ROOT_PREFIX);
    key.extend_from_slice(&version.to_be_bytes());
    key
}

fn parse_root_key(key: &[u8]) -> Result<u64> {
    if key.len() != ROOT_KEY_LEN || key[0] != ROOT_PREFIX {
        return Err(Error::Corruption(format!(
            "malformed root entry key {}",
            hex::encode(key)
        )));
    }
    Ok(u64::from_be_bytes(key[1..9].try_into()?))
}

fn parse_orphan_key(key: &[u8]) -> Result<(u64, u64, Hash)> {
    if key.len() != ORPHAN_KEY_LEN || key[0] != ORPHAN_PREFIX {
        return Err(Error::Corruption(format!(
            "malformed orphan key {}",
            hex::encode(key)
        )));
    }
    let to_version = u64::from_be_bytes(key[1..9].try_into()?);
    let from_version = u64::from_be_bytes(key[9..17].try_into()?);
    let hash = Hash::from_slice(&key[17..]);
    Ok((to_version, from_version, hash))
}

/// Node database: content-addressed node storage, per-version root
/// entries and orphan lifetimes, fronted by a bounded cache of decoded
/// nodes. Shared between the writer and any number of read views.
pub(crate) struct NodeDb {
    store: Arc<dyn KvStore>,
    cache: Mutex<LruCache<Hash, Arc<Node>>>,
}

impl NodeDb {
    pub(crate) fn new(store: Arc<dyn KvStore>, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            store,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Loads a node by content hash, through the cache. A missing or
    /// undecodable node behind a live reference is corruption.
    pub(crate) fn get_node(&self, hash: &Hash) -> Result<Arc<Node>> {
        if let Some(node) = self.cache.lock().get(hash) {
            return Ok(node.clone());
        }
        let bytes = self
            .store
            .get(&node_key(hash))?
            .ok_or_else(|| Error::Corruption(format!("referenced node {} is missing", hash)))?;
        let mut node = Node::decode(&bytes)
            .map_err(|err| Error::Corruption(format!("node {}: {}", hash, err)))?;
        node.hash = Some(*hash);
        node.persisted = true;
        let node = Arc::new(node);
        self.cache.lock().put(*hash, node.clone());
        Ok(node)
    }

    pub(crate) fn has_node(&self, hash: &Hash) -> Result<bool> {
        if self.cache.lock().contains(hash) {
            return Ok(true);
        }
        self.store.has(&node_key(hash))
    }

    pub(crate) fn resolve<'a>(&self, child: &'a Child) -> Result<NodeRef<'a>> {
        match child {
            Child::Staged(node) => Ok(NodeRef::Borrowed(node)),
            Child::Saved(hash) => Ok(NodeRef::Shared(self.get_node(hash)?)),
        }
    }

    /// Height and size of a child without keeping it alive.
    pub(crate) fn child_header(&self, child: &Child) -> Result<(u8, u64)> {
        let node = self.resolve(child)?;
        Ok((node.height, node.size))
    }

    /// Hashes a staged subtree bottom-up and stages writes for every
    /// node not already on disk. On return the child is saved; nodes
    /// shared with earlier versions produce no writes.
    pub(crate) fn save_branch(&self, child: &mut Child, batch: &mut Batch) -> Result<Hash> {
        let node = match child {
            Child::Saved(hash) => return Ok(*hash),
            Child::Staged(node) => node,
        };
        let hash = match &mut node.kind {
            NodeKind::Leaf { value } => leaf_hash(&node.key, value, node.version),
            NodeKind::Inner { left, right } => {
                let left_hash = self.save_branch(left, batch)?;
                let right_hash = self.save_branch(right, batch)?;
                inner_hash(
                    node.height,
                    node.size,
                    node.version,
                    &left_hash,
                    &right_hash,
                )
            }
        };
        node.hash = Some(hash);
        node.persisted = true;
        let key = node_key(&hash);
        if !self.store.has(&key)? {
            batch.set(key, node.encode()?);
        }
        // Not cached here: the batch is still unwritten, and the cache
        // must never get ahead of the store. Nodes enter the cache on
        // their first read instead.
        *child = Child::Saved(hash);
        Ok(hash)
    }

    /// Stages one already-hashed node for writing, without touching the
    /// cache. Used by the snapshot importer, which buffers everything
    /// until its atomic commit.
    pub(crate) fn stage_node(&self, node: &Node, batch: &mut Batch) -> Result<()> {
        let Some(hash) = node.hash else {
            return Err(Error::Corruption("staging an unhashed node".to_string()));
        };
        let key = node_key(&hash);
        if !self.store.has(&key)? {
            batch.set(key, node.encode()?);
        }
        Ok(())
    }

    /// Stages the session's orphan records; `to_version` is the last
    /// version each node was reachable at.
    pub(crate) fn save_orphans(
        &self,
        batch: &mut Batch,
        orphans: impl IntoIterator<Item = (Hash, u64)>,
        to_version: u64,
    ) {
        for (hash, from_version) in orphans {
            if from_version > to_version {
                // Never visible in any committed version.
                continue;
            }
            batch.set(orphan_key(to_version, from_version, &hash), Vec::new());
        }
    }

    /// Stages the root entry for a version; an existing entry is never
    /// overwritten.
    pub(crate) fn save_root(
        &self,
        batch: &mut Batch,
        version: u64,
        hash: Option<Hash>,
    ) -> Result<()> {
        if version == 0 {
            return Err(Error::InvalidInputs("version 0 is reserved".to_string()));
        }
        if self.has_version(version)? {
            return Err(Error::VersionAlreadyExists(version));
        }
        let value = hash.map(|h| h.as_ref().to_vec()).unwrap_or_default();
        batch.set(root_key(version), value);
        Ok(())
    }

    pub(crate) fn commit(&self, batch: Batch, sync: bool) -> Result<()> {
        if sync {
            self.store.write_batch_sync(batch)
        } else {
            self.store.write_batch(batch)
        }
    }

    pub(crate) fn has_version(&self, version: u64) -> Result<bool> {
        self.store.has(&root_key(version))
    }

    /// Root hash of a committed version; `None` for a committed empty
    /// tree, `VersionNotFound` when the version was never saved or was
    /// deleted.
    pub(crate) fn root_hash(&self, version: u64) -> Result<Option<Hash>> {
        let Some(bytes) = self.store.get(&root_key(version))? else {
            return Err(Error::VersionNotFound(version));
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        if bytes.len() != HASH_SIZE {
            return Err(Error::Corruption(format!(
                "root entry of version {} holds {} bytes",
                version,
                bytes.len()
            )));
        }
        Ok(Some(Hash::from_slice(&bytes)))
    }

    /// The highest committed version, or 0 when none exist.
    pub(crate) fn latest_version(&self) -> Result<u64> {
        match self
            .store
            .reverse_iterator(Some(&[ROOT_PREFIX]), Some(&[ROOT_PREFIX + 1]))?
            .next()
        {
            Some((key, _)) => parse_root_key(&key),
            None => Ok(0),
        }
    }

    /// The lowest committed version, or 0 when none exist.
    pub(crate) fn first_version(&self) -> Result<u64> {
        match self
            .store
            .iterator(Some(&[ROOT_PREFIX]), Some(&[ROOT_PREFIX + 1]))?
            .next()
        {
            Some((key, _)) => parse_root_key(&key),
            None => Ok(0),
        }
    }

    /// The highest committed version strictly below `version`, or 0.
    pub(crate) fn previous_version(&self, version: u64) -> Result<u64> {
        match self
            .store
            .reverse_iterator(Some(&[ROOT_PREFIX]), Some(&root_key(version)))?
            .next()
        {
            Some((key, _)) => parse_root_key(&key),
            None => Ok(0),
        }
    }

    /// All committed versions, ascending.
    pub(crate) fn versions(&self) -> Result<Vec<u64>> {
        self.store
            .iterator(Some(&[ROOT_PREFIX]), Some(&[ROOT_PREFIX + 1]))?
            .map(|(key, _)| parse_root_key(&key))
            .collect()
    }

    /// Deletes a version: every orphan whose lifetime ends here either
    /// shifts its endpoint to the nearest surviving predecessor or, when
    /// no surviving version can observe the node, releases the node
    /// itself. The root entry goes last so a failed delete can be
    /// retried.
    pub(crate) fn delete_version(&self, version: u64, sync: bool) -> Result<()> {
        if !self.has_version(version)? {
            return Err(Error::VersionNotFound(version));
        }
        let predecessor = self.previous_version(version)?;
        let mut batch = Batch::new();
        let mut shifted = 0u64;
        let mut released = 0u64;

        let mut start = vec![ORPHAN_PREFIX];
        start.extend_from_slice(&version.to_be_bytes());
        let end = match version.checked_add(1) {
            Some(next) => {
                let mut end = vec![ORPHAN_PREFIX];
                end.extend_from_slice(&next.to_be_bytes());
                end
            }
            None => vec![ORPHAN_PREFIX + 1],
        };
        for (key, _) in self.store.iterator(Some(&start), Some(&end))? {
            let (to_version, from_version, hash) = parse_orphan_key(&key)?;
            debug_assert_eq!(to_version, version);
            batch.delete(key);
            if predecessor < from_version {
                batch.delete(node_key(&hash));
                self.cache.lock().pop(&hash);
                released += 1;
            } else {
                batch.set(orphan_key(predecessor, from_version, &hash), Vec::new());
                shifted += 1;
            }
        }

        batch.delete(root_key(version));
        self.commit(batch, sync)?;
        debug!(
            version,
            predecessor, released, shifted, "deleted tree version"
        );
        Ok(())
    }
}
