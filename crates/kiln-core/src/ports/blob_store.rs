//! BlobStore port: a generic transactional byte-store.
//!
//! Task bodies persist the blobs they produce (layers, trees) here; the task
//! queue itself never lives in this store. Modeled on an embedded LSM store:
//! point ops, prefix iteration with a prefetch hint, batched writes with
//! explicit flush/cancel, bulk copy, online compaction, and size reporting.

use async_trait::async_trait;

use crate::error::KilnError;

/// Cursor options for `iter`.
#[derive(Debug, Clone, Default)]
pub struct IterOptions {
    /// Only keys starting with this prefix.
    pub prefix: Vec<u8>,
    /// Hint for how many values to prefetch per round-trip; 0 means the
    /// implementation default.
    pub prefetch: usize,
}

impl IterOptions {
    pub fn with_prefix(prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            prefix: prefix.into(),
            prefetch: 0,
        }
    }
}

/// A batched write. Buffered entries become visible only on `flush`;
/// `cancel` discards them. Dropping without flushing is equivalent to
/// cancel.
pub trait WriteBatch: Send {
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), KilnError>;
    fn delete(&mut self, key: &[u8]) -> Result<(), KilnError>;
    fn flush(self: Box<Self>) -> Result<(), KilnError>;
    fn cancel(self: Box<Self>);
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KilnError>;
    async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), KilnError>;
    async fn delete(&self, key: &[u8]) -> Result<(), KilnError>;

    /// Key-ordered scan of entries matching `opts.prefix`.
    async fn iter(&self, opts: IterOptions) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KilnError>;

    fn write_batch(&self) -> Box<dyn WriteBatch>;

    /// Bulk streaming copy of every entry into `other`.
    async fn copy_to(&self, other: &dyn BlobStore) -> Result<(), KilnError>;

    /// Online compaction with `workers` parallel workers.
    async fn flatten(&self, workers: usize) -> Result<(), KilnError>;

    /// Approximate total size in bytes.
    async fn size(&self) -> Result<u64, KilnError>;
}
