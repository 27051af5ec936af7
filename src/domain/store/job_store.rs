use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::api::job_dto::JobRequestDto;
use crate::error::{Error, Result};

/// The external job description store. The scheduling actor awaits this
/// when a job transitions into the submitted state; it is the first of the
/// core's suspension points.
#[async_trait]
pub trait JobSpecStore: Send + Sync {
    async fn fetch(&self, job_id: i64) -> Result<JobRequestDto>;
}

/// In-memory description store for tests and trace replay.
#[derive(Debug, Default)]
pub struct MemoryJobSpecStore {
    specs: RwLock<HashMap<i64, JobRequestDto>>,
}

impl MemoryJobSpecStore {
    pub fn new() -> MemoryJobSpecStore {
        MemoryJobSpecStore::default()
    }

    pub fn insert(&self, job_id: i64, spec: JobRequestDto) {
        self.specs.write().expect("RwLock poisoned").insert(job_id, spec);
    }
}

#[async_trait]
impl JobSpecStore for MemoryJobSpecStore {
    async fn fetch(&self, job_id: i64) -> Result<JobRequestDto> {
        self.specs
            .read()
            .expect("RwLock poisoned")
            .get(&job_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no job description for job {}", job_id)))
    }
}
