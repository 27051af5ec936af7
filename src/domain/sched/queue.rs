use std::collections::{HashMap, VecDeque};

use crate::domain::sched::job::Job;

/// The three job queues plus the id lookup table beside them.
///
/// Queue membership and the lookup table are maintained together: a job is
/// inserted once, moved between queues by id, and dropped from both on reap.
#[derive(Debug, Default)]
pub struct JobQueues {
    pending: VecDeque<i64>,
    running: Vec<i64>,
    complete: Vec<i64>,
    jobs: HashMap<i64, Job>,
}

impl JobQueues {
    pub fn new() -> JobQueues {
        JobQueues::default()
    }

    pub fn contains(&self, job_id: i64) -> bool {
        self.jobs.contains_key(&job_id)
    }

    pub fn get(&self, job_id: i64) -> Option<&Job> {
        self.jobs.get(&job_id)
    }

    pub fn get_mut(&mut self, job_id: i64) -> Option<&mut Job> {
        self.jobs.get_mut(&job_id)
    }

    /// Registers a newly observed job at the tail of the pending queue.
    pub fn enqueue_pending(&mut self, job: Job) {
        self.pending.push_back(job.id);
        self.jobs.insert(job.id, job);
    }

    /// Pending job ids in queue order.
    pub fn pending_ids(&self) -> Vec<i64> {
        self.pending.iter().copied().collect()
    }

    pub fn running_ids(&self) -> &[i64] {
        &self.running
    }

    pub fn complete_ids(&self) -> &[i64] {
        &self.complete
    }

    pub fn move_to_running(&mut self, job_id: i64) {
        self.pending.retain(|&id| id != job_id);
        if !self.running.contains(&job_id) {
            self.running.push(job_id);
        }
    }

    pub fn move_to_complete(&mut self, job_id: i64) {
        self.pending.retain(|&id| id != job_id);
        self.running.retain(|&id| id != job_id);
        if !self.complete.contains(&job_id) {
            self.complete.push(job_id);
        }
    }

    /// Purges the job from every queue and from the lookup table.
    pub fn reap(&mut self, job_id: i64) -> Option<Job> {
        self.pending.retain(|&id| id != job_id);
        self.running.retain(|&id| id != job_id);
        self.complete.retain(|&id| id != job_id);
        self.jobs.remove(&job_id)
    }

    /// Re-sorts the pending queue by a caller-supplied priority rule.
    /// Prioritizing is left to an external pass; the queues only apply it.
    pub fn sort_pending_by<F>(&mut self, mut cmp: F)
    where
        F: FnMut(&Job, &Job) -> std::cmp::Ordering,
    {
        let mut ids: Vec<i64> = self.pending.iter().copied().collect();
        ids.sort_by(|&a, &b| {
            let ja = self.jobs.get(&a).expect("queued job is registered");
            let jb = self.jobs.get(&b).expect("queued job is registered");
            cmp(ja, jb)
        });
        self.pending = ids.into();
    }
}
