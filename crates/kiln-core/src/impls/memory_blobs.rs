//! In-memory blob store over a `BTreeMap`.
//!
//! `flatten` is a no-op apart from validating the worker count; a BTreeMap
//! has nothing to compact. Batches buffer entries and apply them atomically
//! on flush.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::KilnError;
use crate::ports::blob_store::{BlobStore, IterOptions, WriteBatch};

type Map = Arc<Mutex<BTreeMap<Vec<u8>, Vec<u8>>>>;

fn lock(map: &Map) -> std::sync::MutexGuard<'_, BTreeMap<Vec<u8>, Vec<u8>>> {
    map.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub struct InMemoryBlobStore {
    map: Map,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KilnError> {
        Ok(lock(&self.map).get(key).cloned())
    }

    async fn set(&self, key: &[u8], value: &[u8]) -> Result<(), KilnError> {
        lock(&self.map).insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &[u8]) -> Result<(), KilnError> {
        lock(&self.map).remove(key);
        Ok(())
    }

    async fn iter(&self, opts: IterOptions) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KilnError> {
        let map = lock(&self.map);
        Ok(map
            .range(opts.prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&opts.prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn write_batch(&self) -> Box<dyn WriteBatch> {
        Box::new(InMemoryWriteBatch {
            map: Arc::clone(&self.map),
            ops: Vec::new(),
        })
    }

    async fn copy_to(&self, other: &dyn BlobStore) -> Result<(), KilnError> {
        let entries = self.iter(IterOptions::default()).await?;
        let mut batch = other.write_batch();
        for (k, v) in &entries {
            batch.set(k, v)?;
        }
        batch.flush()
    }

    async fn flatten(&self, workers: usize) -> Result<(), KilnError> {
        if workers == 0 {
            return Err(KilnError::BlobStore("flatten needs at least 1 worker".into()));
        }
        Ok(())
    }

    async fn size(&self) -> Result<u64, KilnError> {
        let map = lock(&self.map);
        Ok(map.iter().map(|(k, v)| (k.len() + v.len()) as u64).sum())
    }
}

enum BatchOp {
    Set(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

struct InMemoryWriteBatch {
    map: Map,
    ops: Vec<BatchOp>,
}

impl WriteBatch for InMemoryWriteBatch {
    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<(), KilnError> {
        self.ops.push(BatchOp::Set(key.to_vec(), value.to_vec()));
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), KilnError> {
        self.ops.push(BatchOp::Delete(key.to_vec()));
        Ok(())
    }

    fn flush(self: Box<Self>) -> Result<(), KilnError> {
        let mut map = lock(&self.map);
        for op in self.ops {
            match op {
                BatchOp::Set(k, v) => {
                    map.insert(k, v);
                }
                BatchOp::Delete(k) => {
                    map.remove(&k);
                }
            }
        }
        Ok(())
    }

    fn cancel(self: Box<Self>) {}
}
