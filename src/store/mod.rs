//! Backing-store contract.
//!
//! The tree persists through any ordered byte-key/byte-value store that
//! can perform atomic batches. Nothing beyond "a batch is atomic" is
//! assumed; snapshots, transactions and compaction are the store's own
//! business.

use crate::error::Result;

mod memory;

pub use memory::MemStore;

/// Key/value pairs streamed out of a range scan, ascending or descending.
pub type StoreIter<'a> = Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + 'a>;

/// An ordered byte-key/byte-value store.
///
/// Range bounds are half-open `[start, end)`; a `None` bound leaves that
/// side of the range open.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn has(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Ascending scan over `[start, end)`.
    fn iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<StoreIter<'_>>;

    /// Descending scan over `[start, end)`.
    fn reverse_iterator(&self, start: Option<&[u8]>, end: Option<&[u8]>)
        -> Result<StoreIter<'_>>;

    /// Applies every operation in `batch` atomically.
    fn write_batch(&self, batch: Batch) -> Result<()>;

    /// Like [`KvStore::write_batch`], but durably flushed before returning.
    fn write_batch_sync(&self, batch: Batch) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Set(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// A buffered write set, applied atomically by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Set(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete(key));
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}
