//! Streaming snapshot export.
//!
//! A committed version streams out as a postorder sequence of
//! [`ExportNode`] records, so a consumer always sees both children
//! before their parent. The exporter is a plain iterator over the node
//! database: it takes no locks, and dropping it partway through has no
//! effect on the tree.

use proptest::collection::vec;
use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;

use crate::encoding;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::node::{decode_version, Child, NodeKind, MAX_HEIGHT};
use crate::tree::ImmutableTree;
use crate::{FromBytes, ToBytes};

/// One node of a streamed snapshot. Leaves carry their value; inner
/// nodes carry an empty value and their routing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportNode {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub version: u64,
    pub height: u8,
}

impl ToBytes for ExportNode {
    type Output = Vec<u8>;

    fn to_bytes(&self) -> Self::Output {
        let mut buf = Vec::new();
        encoding::write_bytes(&mut buf, &self.key);
        encoding::write_bytes(&mut buf, &self.value);
        encoding::write_varint(&mut buf, self.version as i64);
        encoding::write_varint(&mut buf, i64::from(self.height));
        buf
    }
}

impl FromBytes for ExportNode {
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cur = bytes;
        let key = encoding::read_bytes(&mut cur)?;
        let value = encoding::read_bytes(&mut cur)?;
        let version = decode_version(&mut cur)?;
        let height = encoding::read_varint(&mut cur)?;
        let height = u8::try_from(height)
            .ok()
            .filter(|h| *h <= MAX_HEIGHT)
            .ok_or_else(|| Error::Deserialization(format!("invalid export height {}", height)))?;
        encoding::expect_done(cur)?;
        Ok(Self {
            key,
            value,
            version,
            height,
        })
    }
}

crate::impl_associate_bytes_types!(ExportNode);

impl Arbitrary for ExportNode {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        (
            vec(any::<u8>(), 1..32),
            vec(any::<u8>(), 0..32),
            1..i64::MAX as u64,
            0..=MAX_HEIGHT,
        )
            .prop_map(|(key, value, version, height)| ExportNode {
                key,
                value,
                version,
                height,
            })
            .boxed()
    }
}

struct StackEntry {
    hash: Hash,
    expanded: bool,
}

/// Postorder iterator over one committed version.
pub struct Exporter {
    tree: ImmutableTree,
    stack: Vec<StackEntry>,
}

impl Exporter {
    pub(crate) fn new(tree: ImmutableTree) -> Self {
        let stack = tree
            .root_hash()
            .map(|hash| {
                vec![StackEntry {
                    hash,
                    expanded: false,
                }]
            })
            .unwrap_or_default();
        Self { tree, stack }
    }

    /// The version being exported.
    pub fn version(&self) -> u64 {
        self.tree.version()
    }
}

fn saved_hash(child: &Child) -> Result<Hash> {
    match child {
        Child::Saved(hash) => Ok(*hash),
        Child::Staged(_) => Err(Error::Corruption(
            "committed node links a staged child".to_string(),
        )),
    }
}

impl Iterator for Exporter {
    type Item = Result<ExportNode>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = self.stack.pop()?;
            let node = match self.tree.ndb().get_node(&entry.hash) {
                Ok(node) => node,
                Err(err) => {
                    self.stack.clear();
                    return Some(Err(err));
                }
            };
            match &node.kind {
                NodeKind::Leaf { value } => {
                    return Some(Ok(ExportNode {
                        key: node.key.clone(),
                        value: value.clone(),
                        version: node.version,
                        height: 0,
                    }));
                }
                NodeKind::Inner { left, right } => {
                    if entry.expanded {
                        return Some(Ok(ExportNode {
                            key: node.key.clone(),
                            value: Vec::new(),
                            version: node.version,
                            height: node.height,
                        }));
                    }
                    let left = match saved_hash(left) {
                        Ok(hash) => hash,
                        Err(err) => {
                            self.stack.clear();
                            return Some(Err(err));
                        }
                    };
                    let right = match saved_hash(right) {
                        Ok(hash) => hash,
                        Err(err) => {
                            self.stack.clear();
                            return Some(Err(err));
                        }
                    };
                    // Parent re-enters expanded under its children, so
                    // the pop order is left, right, parent.
                    self.stack.push(StackEntry {
                        hash: entry.hash,
                        expanded: true,
                    });
                    self.stack.push(StackEntry {
                        hash: right,
                        expanded: false,
                    });
                    self.stack.push(StackEntry {
                        hash: left,
                        expanded: false,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::prelude::{MemStore, MutableTree, Options};

    crate::test_to_bytes!(ExportNode);

    fn committed(keys: &[&str]) -> MutableTree {
        let mut tree = MutableTree::new(Arc::new(MemStore::new()), Options::default());
        for key in keys {
            tree.set(key.as_bytes(), key.as_bytes()).unwrap();
        }
        tree.save_version().unwrap();
        tree
    }

    #[test]
    fn test_export_is_postorder() {
        let tree = committed(&["a", "b", "c", "d", "e", "f", "g"]);
        let nodes: Vec<_> = tree
            .export(1)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();

        // A full binary tree streams exactly 2n - 1 nodes.
        assert_eq!(nodes.len(), 2 * 7 - 1);

        // Children always precede their parent: replaying against a
        // stack never underflows and ends with a single root.
        let mut depth = 0usize;
        for node in &nodes {
            if node.height == 0 {
                depth += 1;
            } else {
                assert!(depth >= 2, "inner node streamed before its children");
                depth -= 1;
            }
        }
        assert_eq!(depth, 1);

        // Leaves stream in key order.
        let leaves: Vec<_> = nodes
            .iter()
            .filter(|node| node.height == 0)
            .map(|node| node.key.clone())
            .collect();
        let mut sorted = leaves.clone();
        sorted.sort();
        assert_eq!(leaves, sorted);
    }

    #[test]
    fn test_export_empty_version() {
        let mut tree = MutableTree::new(Arc::new(MemStore::new()), Options::default());
        tree.save_version().unwrap();
        assert_eq!(tree.export(1).unwrap().count(), 0);
    }

    #[test]
    fn test_export_unknown_version_fails() {
        let tree = committed(&["a"]);
        assert!(matches!(tree.export(9), Err(Error::VersionNotFound(9))));
    }

    #[test]
    fn test_export_can_stop_early() {
        let tree = committed(&["a", "b", "c", "d"]);
        let mut exporter = tree.export(1).unwrap();
        assert!(exporter.next().is_some());
        drop(exporter);
        // The tree is untouched.
        assert_eq!(tree.get(b"a").unwrap(), Some(b"a".to_vec()));
    }

    impl Default for ExportNode {
        fn default() -> Self {
            Self {
                key: Vec::new(),
                value: Vec::new(),
                version: 0,
                height: 0,
            }
        }
    }
}
