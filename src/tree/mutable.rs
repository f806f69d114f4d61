use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::export::Exporter;
use crate::hash::Hash;
use crate::import::Importer;
use crate::node::{self, Child, MutationCtx, Node};
use crate::nodedb::NodeDb;
use crate::options::Options;
use crate::proof::RangeProof;
use crate::store::{Batch, KvStore};
use crate::tree::ImmutableTree;

/// The writable tree: a copy-on-write working root staged on top of the
/// last committed version.
///
/// Exactly one writer at a time; read views obtained from [`latest`]
/// (or [`immutable`]) stay valid and consistent while the writer moves
/// on.
///
/// [`latest`]: MutableTree::latest
/// [`immutable`]: MutableTree::immutable
pub struct MutableTree {
    ndb: Arc<NodeDb>,
    options: Options,
    /// Working root; diverges from `committed` as edits are staged.
    root: Option<Child>,
    committed: ImmutableTree,
    /// Persisted nodes replaced during this staging session,
    /// hash → version they were created at.
    orphans: HashMap<Hash, u64>,
    /// Last committed version; 0 before any commit.
    version: u64,
}

impl MutableTree {
    /// Opens a tree over a backing store. No state is read until
    /// [`load`](MutableTree::load) or the first commit.
    pub fn new(store: Arc<dyn KvStore>, options: Options) -> Self {
        let ndb = Arc::new(NodeDb::new(store, options.cache_size));
        let committed = ImmutableTree::new(ndb.clone(), None, 0);
        Self {
            ndb,
            options,
            root: None,
            committed,
            orphans: HashMap::new(),
            version: 0,
        }
    }

    /// Last committed version; 0 when nothing is committed yet.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// The version the next commit will be assigned.
    fn working_version(&self) -> u64 {
        if self.version == 0 {
            self.options.initial_version.max(1)
        } else {
            self.version + 1
        }
    }

    /// Number of leaves in the working tree.
    pub fn size(&self) -> Result<u64> {
        match &self.root {
            Some(child) => Ok(self.ndb.child_header(child)?.1),
            None => Ok(0),
        }
    }

    /// Height of the working root.
    pub fn height(&self) -> Result<u8> {
        match &self.root {
            Some(child) => Ok(self.ndb.child_header(child)?.0),
            None => Ok(0),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.size()? == 0)
    }

    /// Reads from the working tree: a writer observes its own staged
    /// edits immediately.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match &self.root {
            Some(child) => Ok(node::get_with_index(&self.ndb, child, key)?.1),
            None => Ok(None),
        }
    }

    pub fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Visits the working tree's leaves in key order; the callback
    /// returns true to stop early.
    pub fn iterate(&self, ascending: bool, mut f: impl FnMut(&[u8], &[u8]) -> bool) -> Result<bool> {
        match &self.root {
            Some(child) => node::iterate_range(&self.ndb, child, None, None, ascending, &mut f),
            None => Ok(false),
        }
    }

    /// Stages an insert or update. Returns whether an existing key was
    /// updated. Setting a key to its current value is a no-op, so an
    /// unchanged tree never mints new nodes.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<bool> {
        if key.is_empty() {
            return Err(Error::InvalidInputs("key is empty".to_string()));
        }
        if value.is_empty() {
            return Err(Error::InvalidInputs("value is empty".to_string()));
        }
        if self.get(key)?.as_deref() == Some(value) {
            return Ok(true);
        }

        let version = self.working_version();
        let mut ctx = MutationCtx {
            ndb: &self.ndb,
            version,
            orphans: &mut self.orphans,
        };
        match self.root.take() {
            None => {
                self.root = Some(Child::Staged(Box::new(Node::leaf(
                    key.to_vec(),
                    value.to_vec(),
                    version,
                ))));
                Ok(false)
            }
            Some(child) => {
                let taken = ctx.take_for_edit(child)?;
                let (new_root, updated) = taken.set(key, value, &mut ctx)?;
                self.root = Some(Child::Staged(new_root));
                Ok(updated)
            }
        }
    }

    /// Stages a delete. Returns the removed value, if the key was
    /// present.
    pub fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if key.is_empty() {
            return Err(Error::InvalidInputs("key is empty".to_string()));
        }
        let Some(child) = self.root.take() else {
            return Ok(None);
        };
        let version = self.working_version();
        let mut ctx = MutationCtx {
            ndb: &self.ndb,
            version,
            orphans: &mut self.orphans,
        };
        let (new_root, _, value) = node::remove_child(child, key, &mut ctx)?;
        self.root = new_root;
        Ok(value)
    }

    /// Commits the staged state as a new version: hashes the working
    /// root bottom-up, writes the new nodes, the session's orphans and
    /// the root entry in one atomic batch, then applies the pruning
    /// policy. Committing an unchanged tree produces a new version
    /// pointing at the same root hash.
    pub fn save_version(&mut self) -> Result<(Option<Hash>, u64)> {
        let version = self.working_version();
        if self.ndb.has_version(version)? {
            return Err(Error::VersionAlreadyExists(version));
        }

        let mut batch = Batch::new();
        let root_hash = match &mut self.root {
            Some(child) => Some(self.ndb.save_branch(child, &mut batch)?),
            None => None,
        };
        let orphans = std::mem::take(&mut self.orphans);
        let orphan_count = orphans.len();
        self.ndb.save_orphans(&mut batch, orphans, version - 1);
        self.ndb.save_root(&mut batch, version, root_hash)?;
        let writes = batch.len();
        self.ndb.commit(batch, self.options.sync)?;

        self.version = version;
        self.committed = ImmutableTree::new(self.ndb.clone(), root_hash, version);
        debug!(version, writes, orphan_count, "committed tree version");

        self.prune(version)?;
        Ok((root_hash, version))
    }

    /// Applies the keep_recent/keep_every policy after committing
    /// `saved`. The first committed version stays pinned, like every
    /// keep_every-aligned one.
    fn prune(&self, saved: u64) -> Result<()> {
        if !self.options.prunes() {
            return Ok(());
        }
        let Some(candidate) = saved.checked_sub(self.options.keep_recent) else {
            return Ok(());
        };
        if candidate == 0 || candidate % self.options.keep_every == 0 {
            return Ok(());
        }
        if candidate == self.ndb.first_version()? {
            return Ok(());
        }
        if !self.ndb.has_version(candidate)? {
            return Ok(());
        }
        self.ndb.delete_version(candidate, self.options.sync)?;
        debug!(version = candidate, "pruned version");
        Ok(())
    }

    /// Discards every staged edit, returning to the committed state.
    pub fn rollback(&mut self) {
        self.root = self.committed.root_hash().map(Child::Saved);
        self.orphans.clear();
    }

    /// Loads the latest committed version. Returns 0 on a fresh store.
    pub fn load(&mut self) -> Result<u64> {
        let latest = self.ndb.latest_version()?;
        if latest == 0 {
            self.version = 0;
            self.root = None;
            self.orphans.clear();
            self.committed = ImmutableTree::new(self.ndb.clone(), None, 0);
            return Ok(0);
        }
        self.load_version(latest)
    }

    /// Loads a specific committed version as the working state.
    pub fn load_version(&mut self, version: u64) -> Result<u64> {
        let lowest = self.ndb.first_version()?;
        if lowest > 0 && self.options.initial_version > 1 && lowest < self.options.initial_version {
            return Err(Error::InvalidInitialVersion {
                initial: self.options.initial_version,
                lowest,
            });
        }
        let root = self.ndb.root_hash(version)?;
        self.version = version;
        self.root = root.map(Child::Saved);
        self.orphans.clear();
        self.committed = ImmutableTree::new(self.ndb.clone(), root, version);
        Ok(version)
    }

    /// Deletes a committed version. The latest version cannot be
    /// deleted.
    pub fn delete_version(&mut self, version: u64) -> Result<()> {
        if version == self.ndb.latest_version()? {
            return Err(Error::InvalidInputs(
                "cannot delete the latest version".to_string(),
            ));
        }
        self.ndb.delete_version(version, self.options.sync)
    }

    /// Read view of the latest committed version.
    pub fn latest(&self) -> Result<ImmutableTree> {
        if self.version == 0 {
            return Err(Error::EmptyTree);
        }
        Ok(self.committed.clone())
    }

    /// Read view of any retained version.
    pub fn immutable(&self, version: u64) -> Result<ImmutableTree> {
        let root = self.ndb.root_hash(version)?;
        Ok(ImmutableTree::new(self.ndb.clone(), root, version))
    }

    pub fn get_versioned(&self, key: &[u8], version: u64) -> Result<Option<Vec<u8>>> {
        self.immutable(version)?.get(key)
    }

    pub fn get_versioned_with_proof(
        &self,
        key: &[u8],
        version: u64,
    ) -> Result<(Option<Vec<u8>>, RangeProof)> {
        self.immutable(version)?.get_with_proof(key)
    }

    /// Streams a committed version out in postorder.
    pub fn export(&self, version: u64) -> Result<Exporter> {
        Ok(Exporter::new(self.immutable(version)?))
    }

    /// Opens an importer writing a snapshot at `version` into this
    /// tree's store. The tree must be empty: nothing committed, nothing
    /// staged. Call [`load`](MutableTree::load) after a successful
    /// commit to pick the imported version up.
    pub fn import(&self, version: u64) -> Result<Importer> {
        if version == 0 {
            return Err(Error::InvalidInputs(
                "cannot import at version 0".to_string(),
            ));
        }
        if self.ndb.latest_version()? != 0 || self.root.is_some() {
            return Err(Error::InvalidInputs(
                "import target must be an empty tree".to_string(),
            ));
        }
        Ok(Importer::new(self.ndb.clone(), version, self.options.sync))
    }
}

#[cfg(test)]
mod tests {
    use proptest::collection::btree_map;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::node::NodeKind;
    use crate::store::MemStore;

    fn new_tree() -> MutableTree {
        MutableTree::new(Arc::new(MemStore::new()), Options::default())
    }

    /// Walks every reachable node of a committed version checking the
    /// search-tree ordering and the AVL balance bound.
    fn check_invariants(tree: &MutableTree, version: u64) {
        fn walk(
            ndb: &NodeDb,
            child: &Child,
            lower: Option<&[u8]>,
            upper: Option<&[u8]>,
        ) -> (u8, u64) {
            let node = ndb.resolve(child).unwrap();
            match &node.kind {
                NodeKind::Leaf { .. } => {
                    assert_eq!(node.height, 0);
                    assert_eq!(node.size, 1);
                    if let Some(lower) = lower {
                        assert!(node.key.as_slice() >= lower, "leaf below its subtree bound");
                    }
                    if let Some(upper) = upper {
                        assert!(node.key.as_slice() < upper, "leaf above its subtree bound");
                    }
                    (0, 1)
                }
                NodeKind::Inner { left, right } => {
                    let (lh, ls) = walk(ndb, left, lower, Some(&node.key));
                    let (rh, rs) = walk(ndb, right, Some(&node.key), upper);
                    assert_eq!(node.height, 1 + lh.max(rh), "stored height is stale");
                    assert_eq!(node.size, ls + rs, "stored size is stale");
                    let balance = i32::from(lh) - i32::from(rh);
                    assert!(balance.abs() <= 1, "AVL balance violated: {}", balance);
                    (node.height, node.size)
                }
            }
        }

        let view = tree.immutable(version).unwrap();
        if let Some(root) = view.root_hash() {
            walk(tree.ndb.as_ref(), &Child::Saved(root), None, None);
        }
    }

    #[test]
    fn test_basic_set_get_across_versions() {
        let mut tree = new_tree();
        tree.set(b"a", b"1").unwrap();
        let (h1, v1) = tree.save_version().unwrap();
        assert!(h1.is_some());
        assert_eq!(v1, 1);

        tree.set(b"b", b"2").unwrap();
        let (h2, v2) = tree.save_version().unwrap();
        assert_eq!(v2, 2);
        assert_ne!(h1, h2);

        assert_eq!(tree.get_versioned(b"a", 1).unwrap(), Some(b"1".to_vec()));
        assert_eq!(tree.get_versioned(b"b", 1).unwrap(), None);
        assert_eq!(tree.get_versioned(b"a", 2).unwrap(), Some(b"1".to_vec()));
        assert_eq!(tree.get_versioned(b"b", 2).unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_remove_across_versions() {
        let mut tree = new_tree();
        tree.set(b"a", b"1").unwrap();
        tree.save_version().unwrap();
        tree.set(b"b", b"2").unwrap();
        tree.save_version().unwrap();

        assert_eq!(tree.remove(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(tree.remove(b"a").unwrap(), None);
        let (_, v3) = tree.save_version().unwrap();
        assert_eq!(v3, 3);

        assert!(!tree.immutable(3).unwrap().has(b"a").unwrap());
        assert!(tree.immutable(2).unwrap().has(b"a").unwrap());
    }

    #[test]
    fn test_empty_commit_and_reload() {
        let mut tree = new_tree();
        let (hash, version) = tree.save_version().unwrap();
        assert_eq!(hash, None);
        assert_eq!(version, 1);

        let view = tree.immutable(1).unwrap();
        assert_eq!(view.root_hash(), None);
        assert_eq!(view.size().unwrap(), 0);

        tree.load().unwrap();
        assert_eq!(tree.version(), 1);
        assert!(tree.is_empty().unwrap());
    }

    #[test]
    fn test_idempotent_commit_reuses_root() {
        let mut tree = new_tree();
        tree.set(b"a", b"1").unwrap();
        let (h1, _) = tree.save_version().unwrap();
        let (h2, v2) = tree.save_version().unwrap();
        assert_eq!(h1, h2);
        assert_eq!(v2, 2);
    }

    #[test]
    fn test_identical_set_writes_no_new_nodes() {
        let store = Arc::new(MemStore::new());
        let mut tree = MutableTree::new(store.clone(), Options::default());
        tree.set(b"a", b"1").unwrap();
        tree.set(b"b", b"2").unwrap();
        tree.save_version().unwrap();

        let entries_before = store.len();
        assert!(tree.set(b"a", b"1").unwrap());
        tree.save_version().unwrap();
        // One extra root entry, zero new nodes.
        assert_eq!(store.len(), entries_before + 1);
    }

    #[test]
    fn test_rollback_discards_staged_edits() {
        let mut tree = new_tree();
        tree.set(b"a", b"1").unwrap();
        tree.save_version().unwrap();

        tree.set(b"b", b"2").unwrap();
        tree.remove(b"a").unwrap();
        tree.rollback();

        assert_eq!(tree.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(tree.get(b"b").unwrap(), None);
        assert!(tree.orphans.is_empty());
    }

    #[test]
    fn test_save_existing_version_fails() {
        let store = Arc::new(MemStore::new());
        let mut tree = MutableTree::new(store.clone(), Options::default());
        tree.set(b"a", b"1").unwrap();
        tree.save_version().unwrap();

        let mut second = MutableTree::new(store, Options::default());
        second.set(b"x", b"y").unwrap();
        assert_eq!(
            second.save_version(),
            Err(Error::VersionAlreadyExists(1))
        );
    }

    #[test]
    fn test_initial_version() {
        let store = Arc::new(MemStore::new());
        let options = Options {
            initial_version: 10,
            ..Options::default()
        };
        let mut tree = MutableTree::new(store.clone(), options);
        tree.set(b"a", b"1").unwrap();
        let (_, version) = tree.save_version().unwrap();
        assert_eq!(version, 10);
        tree.set(b"b", b"2").unwrap();
        let (_, version) = tree.save_version().unwrap();
        assert_eq!(version, 11);

        // A store whose lowest version predates the configured initial
        // version refuses to load.
        let stale = Options {
            initial_version: 20,
            ..Options::default()
        };
        let mut bad = MutableTree::new(store, stale);
        assert!(matches!(
            bad.load(),
            Err(Error::InvalidInitialVersion { .. })
        ));
    }

    #[test]
    fn test_delete_version() {
        let mut tree = new_tree();
        tree.set(b"k1", b"fred").unwrap();
        let (_, v1) = tree.save_version().unwrap();
        tree.save_version().unwrap();

        tree.delete_version(v1).unwrap();
        assert_eq!(
            tree.get_versioned(b"k1", v1),
            Err(Error::VersionNotFound(v1))
        );
        // Latest version still readable.
        assert_eq!(tree.get(b"k1").unwrap(), Some(b"fred".to_vec()));
        // Deleting the latest version is refused.
        assert!(matches!(
            tree.delete_version(tree.version()),
            Err(Error::InvalidInputs(_))
        ));
        // Deleting twice reports the version as gone.
        assert_eq!(tree.delete_version(v1), Err(Error::VersionNotFound(v1)));
    }

    #[test]
    fn test_versions_stay_readable_after_deletes() {
        let mut tree = new_tree();
        let mut roots = Vec::new();
        for i in 0..10u32 {
            tree.set(format!("key-{}", i).as_bytes(), format!("value-{}", i).as_bytes())
                .unwrap();
            roots.push(tree.save_version().unwrap());
        }

        for victim in [2u64, 5, 7, 3] {
            tree.delete_version(victim).unwrap();
        }

        for (root, version) in roots {
            if [2u64, 5, 7, 3].contains(&version) {
                continue;
            }
            let view = tree.immutable(version).unwrap();
            assert_eq!(view.root_hash(), root);
            for i in 0..version {
                let key = format!("key-{}", i);
                let expected = format!("value-{}", i);
                assert_eq!(
                    view.get(key.as_bytes()).unwrap().as_deref(),
                    Some(expected.as_bytes()),
                    "version {} lost {}",
                    version,
                    key
                );
                let (value, proof) = view.get_with_proof(key.as_bytes()).unwrap();
                proof
                    .verify_item(key.as_bytes(), &value.unwrap(), &view.root_hash().unwrap())
                    .unwrap();
            }
            check_invariants(&tree, version);
        }
    }

    #[test]
    fn test_pruning_policy_window() {
        let store = Arc::new(MemStore::new());
        let mut tree = MutableTree::new(store, Options::pruning(5, 5));
        let mut roots = HashMap::new();
        for i in 0..12u32 {
            tree.set(format!("key-{}", i).as_bytes(), b"value").unwrap();
            let (hash, version) = tree.save_version().unwrap();
            roots.insert(version, hash);
        }

        let surviving = tree.ndb.versions().unwrap();
        assert_eq!(surviving, vec![1, 5, 8, 9, 10, 11, 12]);

        for version in [2u64, 3, 4, 6, 7] {
            assert_eq!(
                tree.immutable(version).err(),
                Some(Error::VersionNotFound(version))
            );
        }
        // Survivors keep their original root hashes and contents.
        for version in surviving {
            let view = tree.immutable(version).unwrap();
            assert_eq!(view.root_hash(), roots[&version]);
            assert_eq!(view.size().unwrap(), version);
            check_invariants(&tree, version);
        }
    }

    #[test]
    fn test_rank_queries_match_iteration_order() {
        let mut tree = new_tree();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..300 {
            let key: [u8; 4] = rng.gen();
            tree.set(&key, b"v").unwrap();
        }
        tree.save_version().unwrap();
        let view = tree.latest().unwrap();

        let mut ordered = Vec::new();
        view.iterate(true, |key, _| {
            ordered.push(key.to_vec());
            false
        })
        .unwrap();

        for (index, key) in ordered.iter().enumerate() {
            let (found_key, _) = view.get_by_index(index as u64).unwrap().unwrap();
            assert_eq!(&found_key, key);
            let (rank, value) = view.get_with_index(key).unwrap();
            assert_eq!(rank, index as u64);
            assert!(value.is_some());
        }
        assert_eq!(view.get_by_index(ordered.len() as u64).unwrap(), None);
    }

    #[test]
    fn test_iterate_range_bounds() {
        let mut tree = new_tree();
        for key in [b"a", b"b", b"c", b"d", b"e"] {
            tree.set(key, key).unwrap();
        }
        tree.save_version().unwrap();
        let view = tree.latest().unwrap();

        let mut seen = Vec::new();
        view.iterate_range(Some(b"b"), Some(b"d"), true, |key, _| {
            seen.push(key.to_vec());
            false
        })
        .unwrap();
        assert_eq!(seen, vec![b"b".to_vec(), b"c".to_vec()]);

        let mut descending = Vec::new();
        view.iterate_range(None, Some(b"d"), false, |key, _| {
            descending.push(key.to_vec());
            false
        })
        .unwrap();
        assert_eq!(
            descending,
            vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]
        );

        // Early stop.
        let mut count = 0;
        let stopped = view
            .iterate(true, |_, _| {
                count += 1;
                count == 2
            })
            .unwrap();
        assert!(stopped);
        assert_eq!(count, 2);
    }

    #[test]
    fn test_random_workload_matches_reference_map() {
        let mut tree = new_tree();
        let mut reference = std::collections::BTreeMap::new();
        let mut rng = StdRng::seed_from_u64(42);

        for round in 0..6 {
            for _ in 0..200 {
                let key = vec![rng.gen_range(b'a'..=b'z'); rng.gen_range(1..4)];
                if rng.gen_bool(0.7) {
                    let value = format!("{}", rng.gen::<u32>()).into_bytes();
                    tree.set(&key, &value).unwrap();
                    reference.insert(key, value);
                } else {
                    assert_eq!(tree.remove(&key).unwrap(), reference.remove(&key));
                }
            }
            let (_, version) = tree.save_version().unwrap();
            assert_eq!(version, round + 1);
            check_invariants(&tree, version);

            let view = tree.latest().unwrap();
            assert_eq!(view.size().unwrap(), reference.len() as u64);
            for (key, value) in &reference {
                assert_eq!(view.get(key).unwrap().as_ref(), Some(value));
            }
        }
    }

    #[test]
    fn test_empty_key_and_value_are_rejected() {
        let mut tree = new_tree();
        assert!(matches!(tree.set(b"", b"v"), Err(Error::InvalidInputs(_))));
        assert!(matches!(tree.set(b"k", b""), Err(Error::InvalidInputs(_))));
        assert!(matches!(tree.remove(b""), Err(Error::InvalidInputs(_))));
    }

    #[test]
    fn test_latest_on_fresh_tree_is_empty_tree_error() {
        let tree = new_tree();
        assert!(matches!(tree.latest(), Err(Error::EmptyTree)));
    }

    #[test_strategy::proptest(fork = false, cases = 16)]
    fn test_root_hash_is_deterministic(
        #[strategy(btree_map(
            proptest::collection::vec(any::<u8>(), 1..16),
            proptest::collection::vec(any::<u8>(), 1..16),
            1..40,
        ))]
        entries: std::collections::BTreeMap<Vec<u8>, Vec<u8>>,
    ) {
        // The same contents committed at the same version hash
        // identically, whatever the insertion order.
        let mut forward = new_tree();
        for (key, value) in &entries {
            forward.set(key, value).unwrap();
        }
        let (forward_hash, _) = forward.save_version().unwrap();

        let mut backward = new_tree();
        for (key, value) in entries.iter().rev() {
            backward.set(key, value).unwrap();
        }
        let (backward_hash, _) = backward.save_version().unwrap();

        prop_assert_eq!(forward_hash, backward_hash);
    }

    #[test_strategy::proptest(fork = false, cases = 16)]
    fn test_proof_roundtrip_for_every_key(
        #[strategy(btree_map(
            proptest::collection::vec(any::<u8>(), 1..8),
            proptest::collection::vec(any::<u8>(), 1..8),
            1..24,
        ))]
        entries: std::collections::BTreeMap<Vec<u8>, Vec<u8>>,
    ) {
        let mut tree = new_tree();
        for (key, value) in &entries {
            tree.set(key, value).unwrap();
        }
        tree.save_version().unwrap();
        let view = tree.latest().unwrap();
        let root = view.root_hash().unwrap();

        for (key, value) in &entries {
            let (got, proof) = view.get_with_proof(key)?;
            prop_assert_eq!(got.as_ref(), Some(value));
            proof.verify_item(key, value, &root)?;
        }

        // A key guaranteed absent: longer than any stored key.
        let mut absent = entries.keys().next_back().unwrap().clone();
        absent.extend_from_slice(&[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);
        let (got, proof) = view.get_with_proof(&absent)?;
        prop_assert!(got.is_none());
        proof.verify_absence(&absent, &root)?;
    }
}
