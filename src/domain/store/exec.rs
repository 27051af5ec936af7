use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::Result;

/// The launcher seam. `run` tells the execution service to start a job
/// whose allocation is committed; `cancel` drops an in-flight run request.
#[async_trait]
pub trait ExecService: Send + Sync {
    async fn run(&self, job_id: i64) -> Result<()>;
    async fn cancel(&self, job_id: i64) -> Result<()>;
}

/// Records run and cancel requests; tests and the replay harness inspect
/// them instead of launching anything.
#[derive(Debug, Default)]
pub struct RecordingExecService {
    runs: Mutex<Vec<i64>>,
    cancels: Mutex<Vec<i64>>,
}

impl RecordingExecService {
    pub fn new() -> RecordingExecService {
        RecordingExecService::default()
    }

    pub fn runs(&self) -> Vec<i64> {
        self.runs.lock().expect("Mutex poisoned").clone()
    }

    pub fn cancels(&self) -> Vec<i64> {
        self.cancels.lock().expect("Mutex poisoned").clone()
    }
}

#[async_trait]
impl ExecService for RecordingExecService {
    async fn run(&self, job_id: i64) -> Result<()> {
        self.runs.lock().expect("Mutex poisoned").push(job_id);
        Ok(())
    }

    async fn cancel(&self, job_id: i64) -> Result<()> {
        self.cancels.lock().expect("Mutex poisoned").push(job_id);
        Ok(())
    }
}
