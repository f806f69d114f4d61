//! Streaming snapshot import.
//!
//! The importer consumes the postorder record stream produced by an
//! exporter and rebuilds the version bottom-up on a stack: leaves push,
//! inner nodes pop and link their two children. Nothing touches the
//! store until `commit`, which writes every buffered node and the root
//! entry as one atomic batch; a dropped importer leaves no trace.

use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::export::ExportNode;
use crate::hash::Hash;
use crate::node::{inner_hash, leaf_hash, Child, Node, NodeKind, MAX_HEIGHT};
use crate::nodedb::NodeDb;
use crate::store::Batch;

struct PendingNode {
    hash: Hash,
    height: u8,
    size: u64,
}

/// Single-shot importer for one snapshot version.
pub struct Importer {
    ndb: Arc<NodeDb>,
    version: u64,
    sync: bool,
    batch: Batch,
    stack: Vec<PendingNode>,
    done: bool,
}

impl Importer {
    pub(crate) fn new(ndb: Arc<NodeDb>, version: u64, sync: bool) -> Self {
        Self {
            ndb,
            version,
            sync,
            batch: Batch::new(),
            stack: Vec::new(),
            done: false,
        }
    }

    /// The version being imported.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Consumes the next postorder record.
    pub fn add(&mut self, node: &ExportNode) -> Result<()> {
        if self.done {
            return Err(Error::NoImport);
        }
        if node.key.is_empty() {
            return Err(Error::InvalidInputs("node key is empty".to_string()));
        }
        if node.version == 0 {
            return Err(Error::InvalidInputs("node version 0".to_string()));
        }
        if node.version > self.version {
            return Err(Error::InvalidInputs(format!(
                "node version {} is above the import version {}",
                node.version, self.version
            )));
        }
        if node.height > MAX_HEIGHT {
            return Err(Error::InvalidInputs(format!(
                "node height {} is out of range",
                node.height
            )));
        }

        if node.height == 0 {
            if node.value.is_empty() {
                return Err(Error::InvalidInputs("leaf value is empty".to_string()));
            }
            let hash = leaf_hash(&node.key, &node.value, node.version);
            let mut leaf = Node::leaf(node.key.clone(), node.value.clone(), node.version);
            leaf.hash = Some(hash);
            self.ndb.stage_node(&leaf, &mut self.batch)?;
            self.stack.push(PendingNode {
                hash,
                height: 0,
                size: 1,
            });
            return Ok(());
        }

        if !node.value.is_empty() {
            return Err(Error::InvalidInputs(
                "inner node carries a value".to_string(),
            ));
        }
        // Postorder: the two topmost pending nodes are this node's
        // children, right on top.
        let Some(right) = self.stack.pop() else {
            return Err(Error::InvalidInputs(
                "inner node without pending children".to_string(),
            ));
        };
        let Some(left) = self.stack.pop() else {
            return Err(Error::InvalidInputs(
                "inner node with a single pending child".to_string(),
            ));
        };
        if node.height != 1 + left.height.max(right.height) {
            return Err(Error::InvalidInputs(format!(
                "inner node height {} does not cap child heights {} and {}",
                node.height, left.height, right.height
            )));
        }
        let size = left.size + right.size;
        let hash = inner_hash(node.height, size, node.version, &left.hash, &right.hash);
        let inner = Node {
            key: node.key.clone(),
            version: node.version,
            height: node.height,
            size,
            hash: Some(hash),
            persisted: false,
            kind: NodeKind::Inner {
                left: Child::Saved(left.hash),
                right: Child::Saved(right.hash),
            },
        };
        self.ndb.stage_node(&inner, &mut self.batch)?;
        self.stack.push(PendingNode {
            hash,
            height: node.height,
            size,
        });
        Ok(())
    }

    /// Writes the buffered nodes and the root entry atomically. The
    /// importer is spent afterwards.
    pub fn commit(&mut self) -> Result<Option<Hash>> {
        if self.done {
            return Err(Error::NoImport);
        }
        let root = match self.stack.len() {
            0 => None,
            1 => Some(self.stack[0].hash),
            pending => {
                return Err(Error::InvalidInputs(format!(
                    "incomplete import: {} nodes await a parent",
                    pending
                )));
            }
        };
        let mut batch = std::mem::take(&mut self.batch);
        let nodes = batch.len();
        self.ndb.save_root(&mut batch, self.version, root)?;
        self.ndb.commit(batch, self.sync)?;
        self.done = true;
        self.stack.clear();
        debug!(version = self.version, nodes, "imported snapshot");
        Ok(root)
    }

    /// Abandons the import; buffered writes are discarded.
    pub fn close(&mut self) {
        self.done = true;
        self.batch = Batch::new();
        self.stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::prelude::{MemStore, MutableTree, Options};

    fn fresh() -> MutableTree {
        MutableTree::new(Arc::new(MemStore::new()), Options::default())
    }

    fn populated(entries: usize) -> MutableTree {
        let mut tree = fresh();
        let mut rng = StdRng::seed_from_u64(4096);
        for _ in 0..entries {
            let key: [u8; 8] = rng.gen();
            let value: [u8; 12] = rng.gen();
            tree.set(&key, &value).unwrap();
        }
        tree.save_version().unwrap();
        tree
    }

    #[test]
    fn test_export_import_roundtrip() {
        let source = populated(4096);
        let source_view = source.latest().unwrap();
        let leaves = source_view.size().unwrap();

        let nodes: Vec<_> = source
            .export(1)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(nodes.len() as u64, 2 * leaves - 1);

        let mut target = fresh();
        let mut importer = target.import(1).unwrap();
        for node in &nodes {
            importer.add(node).unwrap();
        }
        let root = importer.commit().unwrap();
        assert_eq!(root, source_view.root_hash());

        target.load().unwrap();
        assert_eq!(target.version(), 1);
        let target_view = target.latest().unwrap();
        assert_eq!(target_view.root_hash(), source_view.root_hash());
        assert_eq!(target_view.size().unwrap(), leaves);

        // Spot-check contents and proofs on the replica.
        let mut checked = 0;
        source_view
            .iterate(true, |key, value| {
                assert_eq!(target_view.get(key).unwrap().as_deref(), Some(value));
                checked += 1;
                checked == 32
            })
            .unwrap();
        let (key, value) = target_view.get_by_index(leaves / 2).unwrap().unwrap();
        let (got, proof) = target_view.get_with_proof(&key).unwrap();
        assert_eq!(got, Some(value.clone()));
        proof
            .verify_item(&key, &value, &target_view.root_hash().unwrap())
            .unwrap();
    }

    #[test]
    fn test_import_record_validation() {
        let key = b"key".to_vec();
        let value = b"value".to_vec();
        let cases: Vec<(&str, ExportNode, bool)> = vec![
            (
                "valid leaf",
                ExportNode {
                    key: key.clone(),
                    value: value.clone(),
                    version: 1,
                    height: 0,
                },
                true,
            ),
            (
                "empty key",
                ExportNode {
                    key: Vec::new(),
                    value: value.clone(),
                    version: 1,
                    height: 0,
                },
                false,
            ),
            (
                "empty leaf value",
                ExportNode {
                    key: key.clone(),
                    value: Vec::new(),
                    version: 1,
                    height: 0,
                },
                false,
            ),
            (
                "version above import",
                ExportNode {
                    key: key.clone(),
                    value: value.clone(),
                    version: 2,
                    height: 0,
                },
                false,
            ),
            (
                "version zero",
                ExportNode {
                    key: key.clone(),
                    value,
                    version: 0,
                    height: 0,
                },
                false,
            ),
            (
                "inner without children",
                ExportNode {
                    key,
                    value: Vec::new(),
                    version: 1,
                    height: 1,
                },
                false,
            ),
        ];

        for (name, node, valid) in cases {
            let target = fresh();
            let mut importer = target.import(1).unwrap();
            let result = importer.add(&node);
            assert_eq!(result.is_ok(), valid, "case: {}", name);
        }
    }

    #[test]
    fn test_inner_height_must_cap_children() {
        let target = fresh();
        let mut importer = target.import(1).unwrap();
        for key in [b"a", b"b"] {
            importer
                .add(&ExportNode {
                    key: key.to_vec(),
                    value: b"v".to_vec(),
                    version: 1,
                    height: 0,
                })
                .unwrap();
        }
        let bad = ExportNode {
            key: b"b".to_vec(),
            value: Vec::new(),
            version: 1,
            height: 2,
        };
        assert!(matches!(
            importer.add(&bad),
            Err(Error::InvalidInputs(_))
        ));
    }

    #[test]
    fn test_add_after_close_or_commit_fails() {
        let leaf = ExportNode {
            key: b"a".to_vec(),
            value: b"1".to_vec(),
            version: 1,
            height: 0,
        };

        let target = fresh();
        let mut importer = target.import(1).unwrap();
        importer.close();
        assert_eq!(importer.add(&leaf), Err(Error::NoImport));

        let target = fresh();
        let mut importer = target.import(1).unwrap();
        importer.add(&leaf).unwrap();
        importer.commit().unwrap();
        assert_eq!(importer.add(&leaf), Err(Error::NoImport));
        assert_eq!(importer.commit(), Err(Error::NoImport));
    }

    #[test]
    fn test_import_requires_empty_tree() {
        let mut tree = fresh();
        tree.set(b"a", b"1").unwrap();
        // Staged but uncommitted state still blocks imports.
        assert!(matches!(tree.import(1), Err(Error::InvalidInputs(_))));

        tree.save_version().unwrap();
        assert!(matches!(tree.import(2), Err(Error::InvalidInputs(_))));

        // Version 0 is never importable.
        let empty = fresh();
        assert!(matches!(empty.import(0), Err(Error::InvalidInputs(_))));
    }

    #[test]
    fn test_incomplete_import_cannot_commit() {
        let target = fresh();
        let mut importer = target.import(1).unwrap();
        for key in [b"a", b"b"] {
            importer
                .add(&ExportNode {
                    key: key.to_vec(),
                    value: b"v".to_vec(),
                    version: 1,
                    height: 0,
                })
                .unwrap();
        }
        // Two leaves with no joining inner node.
        assert!(matches!(
            importer.commit(),
            Err(Error::InvalidInputs(_))
        ));
    }

    #[test]
    fn test_abandoned_import_leaves_no_trace() {
        let store = Arc::new(MemStore::new());
        let mut tree = MutableTree::new(store.clone(), Options::default());
        {
            let mut importer = tree.import(1).unwrap();
            importer
                .add(&ExportNode {
                    key: b"a".to_vec(),
                    value: b"1".to_vec(),
                    version: 1,
                    height: 0,
                })
                .unwrap();
            // Dropped without commit.
        }
        assert!(store.is_empty());
        assert_eq!(tree.load().unwrap(), 0);
    }

    #[test]
    fn test_empty_import_commits_empty_version() {
        let mut target = fresh();
        let mut importer = target.import(1).unwrap();
        let root = importer.commit().unwrap();
        assert_eq!(root, None);
        target.load().unwrap();
        assert_eq!(target.version(), 1);
        assert!(target.is_empty().unwrap());
    }
}
