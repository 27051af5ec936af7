use serde::{Deserialize, Serialize};

/// A job's resource requirement as fetched from the job description store
/// when the job reaches the submitted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequestDto {
    #[serde(default)]
    pub nnodes: i64,
    #[serde(default)]
    pub ncores: i64,
    pub walltime: i64,
    #[serde(default)]
    pub node_exclusive: bool,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub user: String,
}

/// One `job.status` notification from the external status source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusDto {
    pub job_id: i64,
    pub old_state: String,
    pub new_state: String,
}

/// One entry of a replay trace: at virtual time `at`, deliver the given
/// status notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEventDto {
    pub at: i64,
    #[serde(flatten)]
    pub status: JobStatusDto,
}

/// A replay trace file: the job descriptions keyed by id, plus the timed
/// status events to feed through the scheduling core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceDto {
    pub jobs: Vec<TraceJobDto>,
    pub events: Vec<TraceEventDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceJobDto {
    pub job_id: i64,
    #[serde(flatten)]
    pub request: JobRequestDto,
}
