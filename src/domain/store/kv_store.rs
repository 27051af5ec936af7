use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Error, Result};

/// The external key-value store carrying persisted job state: per job,
/// `state`, `<state>_time`, `rdl` and `rdl.alloc` keys under the job's
/// directory. Awaited when committing allocation metadata.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn put(&self, key: &str, value: Value) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<Value>>;
}

/// The key of a field under a job's directory.
pub fn job_key(job_id: i64, field: &str) -> String {
    format!("lwj.{}.{}", job_id, field)
}

/// In-memory key-value store for tests and trace replay. `fail_next_put`
/// and `fail_next_put_matching` let tests exercise the rollback paths.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, Value>>,
    fail_next_put: AtomicBool,
    fail_key_fragment: RwLock<Option<String>>,
}

impl MemoryKvStore {
    pub fn new() -> MemoryKvStore {
        MemoryKvStore::default()
    }

    pub fn fail_next_put(&self) {
        self.fail_next_put.store(true, Ordering::SeqCst);
    }

    /// Fails the next put whose key contains `fragment`, once.
    pub fn fail_next_put_matching(&self, fragment: impl Into<String>) {
        *self.fail_key_fragment.write().expect("RwLock poisoned") = Some(fragment.into());
    }

    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries.read().expect("RwLock poisoned").clone()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn put(&self, key: &str, value: Value) -> Result<()> {
        if self.fail_next_put.swap(false, Ordering::SeqCst) {
            return Err(Error::StoreError(format!("injected failure writing '{}'", key)));
        }
        {
            let mut fragment = self.fail_key_fragment.write().expect("RwLock poisoned");
            if fragment.as_ref().is_some_and(|f| key.contains(f.as_str())) {
                *fragment = None;
                return Err(Error::StoreError(format!("injected failure writing '{}'", key)));
            }
        }
        self.entries.write().expect("RwLock poisoned").insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().expect("RwLock poisoned").get(key).cloned())
    }
}
