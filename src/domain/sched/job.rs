use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::api::job_dto::JobRequestDto;
use crate::domain::resource::Shadow;
use crate::error::{Error, Result};

/// The per-job lifecycle. One tagged variant is carried everywhere inside
/// the core; the string names exist only at the notification and
/// persistence boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Seen, uninitialized.
    Null,
    /// Id issued, resources not yet parsed.
    Reserved,
    /// Description parsed.
    Submitted,
    /// Waiting in queue.
    Pending,
    /// Being considered this pass.
    SchedReq,
    /// Sub-tree chosen; allocation in progress.
    Selected,
    /// Planner updated; run request pending.
    Allocated,
    /// Launch message sent.
    RunRequest,
    /// Launcher acknowledged.
    Starting,
    /// Job executing.
    Running,
    /// Finished normally.
    Complete,
    /// Killed.
    Cancelled,
    /// Purged from all queues.
    Reaped,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Null => "null",
            JobState::Reserved => "reserved",
            JobState::Submitted => "submitted",
            JobState::Pending => "pending",
            JobState::SchedReq => "schedreq",
            JobState::Selected => "selected",
            JobState::Allocated => "allocated",
            JobState::RunRequest => "runrequest",
            JobState::Starting => "starting",
            JobState::Running => "running",
            JobState::Complete => "complete",
            JobState::Cancelled => "cancelled",
            JobState::Reaped => "reaped",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Reaped)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = Error;

    fn from_str(s: &str) -> Result<JobState> {
        match s.to_ascii_lowercase().as_str() {
            "null" => Ok(JobState::Null),
            "reserved" => Ok(JobState::Reserved),
            "submitted" => Ok(JobState::Submitted),
            "pending" => Ok(JobState::Pending),
            "schedreq" => Ok(JobState::SchedReq),
            "selected" => Ok(JobState::Selected),
            "allocated" => Ok(JobState::Allocated),
            "runrequest" => Ok(JobState::RunRequest),
            "starting" => Ok(JobState::Starting),
            "running" => Ok(JobState::Running),
            "complete" => Ok(JobState::Complete),
            "cancelled" => Ok(JobState::Cancelled),
            "reaped" => Ok(JobState::Reaped),
            other => Err(Error::invalid(format!("unknown job state name '{}'", other))),
        }
    }
}

/// A job's resource requirement, normalized for scheduling: at least one
/// node, at least one core per node, cores-per-node rounded up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobRequest {
    pub nnodes: i64,
    pub ncores: i64,
    pub corespernode: i64,
    pub walltime: i64,
    pub node_exclusive: bool,
}

impl JobRequest {
    pub fn from_dto(dto: &JobRequestDto) -> Result<JobRequest> {
        if dto.walltime < 1 {
            return Err(Error::invalid(format!("job walltime must be at least 1, got {}", dto.walltime)));
        }
        let nnodes = dto.nnodes.max(1);
        let ncores = dto.ncores.max(nnodes);
        let corespernode = (ncores + nnodes - 1) / nnodes;
        Ok(JobRequest { nnodes, ncores, corespernode, walltime: dto.walltime, node_exclusive: dto.node_exclusive })
    }
}

#[derive(Debug)]
pub struct Job {
    pub id: i64,
    pub state: JobState,
    pub request: Option<JobRequest>,
    pub submit_time: i64,
    pub start_time: i64,
    pub end_time: i64,
    pub priority: i64,
    pub account: String,
    pub user: String,
    /// The selected resource sub-trees while the job holds an allocation.
    pub selected: Vec<Shadow>,
}

impl Job {
    pub fn new(id: i64, submit_time: i64) -> Job {
        Job {
            id,
            state: JobState::Null,
            request: None,
            submit_time,
            start_time: 0,
            end_time: 0,
            priority: 0,
            account: String::new(),
            user: String::new(),
            selected: Vec::new(),
        }
    }
}
