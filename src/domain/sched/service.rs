use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::api::rdl_dto::ResourceDto;
use crate::domain::resource::{RankTable, Request, ResourceTree};
use crate::domain::sched::event::SchedEvent;
use crate::domain::sched::job::{Job, JobRequest, JobState};
use crate::domain::sched::params::SchedParams;
use crate::domain::sched::policy::{LoopControl, PolicyRegistry, SchedPolicy};
use crate::domain::sched::queue::JobQueues;
use crate::domain::simulator::SystemClock;
use crate::domain::store::{ExecService, JobSpecStore, KvStore, job_key};
use crate::error::{Error, Result};

/// The scheduling actor: consumes status notifications and wakeups on one
/// event queue, drives the per-job state machine, and runs the scheduling
/// loop against the resource tree through the installed policy.
///
/// Everything here runs on a single reactor task; the only suspension
/// points are the awaits on the external stores and the event intake.
pub struct SchedService {
    tree: ResourceTree,
    queues: JobQueues,
    registry: PolicyRegistry,
    policy: Option<Box<dyn SchedPolicy>>,
    params: SchedParams,
    sched_once: bool,
    clock: Arc<dyn SystemClock>,
    jobspec: Arc<dyn JobSpecStore>,
    kv: Arc<dyn KvStore>,
    exec: Arc<dyn ExecService>,
    ranks: RankTable,
    tx: UnboundedSender<SchedEvent>,
    rx: Option<UnboundedReceiver<SchedEvent>>,
    /// Set when delay-sched deferred a pass to the next idle moment.
    pending_pass: bool,
    pass_count: u64,
    freed_published: u64,
}

impl SchedService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tree: ResourceTree,
        ranks: RankTable,
        params: SchedParams,
        sched_once: bool,
        clock: Arc<dyn SystemClock>,
        jobspec: Arc<dyn JobSpecStore>,
        kv: Arc<dyn KvStore>,
        exec: Arc<dyn ExecService>,
    ) -> (SchedService, UnboundedSender<SchedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = SchedService {
            tree,
            queues: JobQueues::new(),
            registry: PolicyRegistry::with_builtins(),
            policy: None,
            params,
            sched_once,
            clock,
            jobspec,
            kv,
            exec,
            ranks,
            tx: tx.clone(),
            rx: Some(rx),
            pending_pass: false,
            pass_count: 0,
            freed_published: 0,
        };
        (service, tx)
    }

    pub fn tree(&self) -> &ResourceTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut ResourceTree {
        &mut self.tree
    }

    pub fn queues(&self) -> &JobQueues {
        &self.queues
    }

    pub fn params(&self) -> &SchedParams {
        &self.params
    }

    pub fn job_state(&self, job_id: i64) -> Option<JobState> {
        self.queues.get(job_id).map(|j| j.state)
    }

    /// Number of scheduling passes run so far.
    pub fn pass_count(&self) -> u64 {
        self.pass_count
    }

    /// Number of resource-freed events published so far.
    pub fn resource_freed_count(&self) -> u64 {
        self.freed_published
    }

    /// Re-orders the pending queue. Prioritization is an external concern;
    /// the core only applies the comparator it is handed.
    pub fn prioritize<F>(&mut self, cmp: F)
    where
        F: FnMut(&Job, &Job) -> std::cmp::Ordering,
    {
        self.queues.sort_pending_by(cmp);
    }

    /// Instantiates a registered policy and makes it the active one.
    pub fn install_policy(&mut self, name: &str, args: &str) -> Result<()> {
        let mut policy = self.registry.create(name)?;
        policy.process_args(args, &self.params)?;
        log::info!("installed scheduling policy '{}'", name);
        self.policy = Some(policy);
        Ok(())
    }

    /// Runs until the event channel closes. With delay-sched on, a dirty
    /// pending queue is served one pass whenever the intake goes idle.
    pub async fn run(&mut self) {
        loop {
            let idle = self.rx.as_ref().map(|rx| rx.is_empty()).unwrap_or(true);
            if self.pending_pass && idle {
                self.pending_pass = false;
                self.schedule_jobs().await;
                continue;
            }
            let mut rx = self.rx.take().expect("event receiver present");
            let next = rx.recv().await;
            self.rx = Some(rx);
            match next {
                Some(event) => self.handle_event(event).await,
                None => break,
            }
        }
    }

    /// Processes every queued event and any deferred pass, returning once
    /// the intake is idle. The replay harness and the tests drive the
    /// actor with this instead of `run`.
    pub async fn drain(&mut self) {
        loop {
            let next = self.rx.as_mut().expect("event receiver present").try_recv().ok();
            match next {
                Some(event) => self.handle_event(event).await,
                None => {
                    if self.pending_pass {
                        self.pending_pass = false;
                        self.schedule_jobs().await;
                        continue;
                    }
                    break;
                }
            }
        }
    }

    pub async fn handle_event(&mut self, event: SchedEvent) {
        match event {
            SchedEvent::JobStatus { job_id, old_state, new_state } => {
                if !self.queues.contains(job_id) {
                    // A null-state tuple announces a newly observed job.
                    if old_state == JobState::Null && matches!(new_state, JobState::Null | JobState::Reserved) {
                        self.queues.enqueue_pending(Job::new(job_id, self.clock.now()));
                        log::debug!("registered new job {}", job_id);
                    } else {
                        log::error!("status {} -> {} for unknown job {}; dropping the event", old_state, new_state, job_id);
                        return;
                    }
                }
                if let Err(e) = self.action(job_id, new_state).await {
                    log::error!("job {} event {} failed: {}", job_id, new_state, e);
                }
            }
            SchedEvent::Heartbeat { epoch } => {
                log::trace!("heartbeat at epoch {}", epoch);
                self.request_pass().await;
            }
            SchedEvent::ResourceFreed => {
                self.request_pass().await;
            }
            SchedEvent::PluginLoad { name, args } => {
                if let Err(e) = self.install_policy(&name, &args) {
                    log::error!("failed to load policy '{}': {}", name, e);
                }
            }
            SchedEvent::PluginUnload { name } => {
                if self.policy.as_ref().map(|p| p.name() == name).unwrap_or(false) {
                    self.policy = None;
                    log::info!("unloaded scheduling policy '{}'", name);
                } else {
                    log::warn!("policy '{}' is not active; nothing unloaded", name);
                }
            }
        }
    }

    /// The per-job state machine. Invoked when an external status event is
    /// delivered; some transitions generate follow-up events or fall
    /// through into implicit ones.
    async fn action(&mut self, job_id: i64, newstate: JobState) -> Result<()> {
        let oldstate = self.queues.get(job_id).map(|j| j.state).ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        log::debug!("attempting job {} state change from {} to {}", job_id, oldstate, newstate);

        // A cancellation delivered while resources are held or a run
        // request is in flight must unwind both.
        if newstate == JobState::Cancelled
            && matches!(oldstate, JobState::Selected | JobState::Allocated | JobState::RunRequest | JobState::Starting)
        {
            return self.cancel_held_job(job_id).await;
        }

        match oldstate {
            JobState::Null => {
                if !matches!(newstate, JobState::Null | JobState::Reserved) {
                    return self.bad_transition(job_id, oldstate, newstate);
                }
                self.set_state(job_id, newstate).await;
            }
            JobState::Reserved => {
                if newstate != JobState::Submitted {
                    return self.bad_transition(job_id, oldstate, newstate);
                }
                self.set_state(job_id, JobState::Submitted).await;
                self.fill_resource_request(job_id).await?;
                // Implicit event generation: a submitted job immediately
                // becomes pending and asks to be scheduled.
                if self.job_state(job_id) == Some(JobState::Submitted) {
                    self.set_state(job_id, JobState::Pending).await;
                    self.set_state(job_id, JobState::SchedReq).await;
                    self.request_pass().await;
                }
            }
            JobState::Submitted => {
                self.set_state(job_id, JobState::Pending).await;
                self.set_state(job_id, JobState::SchedReq).await;
                self.request_pass().await;
            }
            JobState::Pending => {
                self.set_state(job_id, JobState::SchedReq).await;
                self.request_pass().await;
            }
            JobState::SchedReq => {
                // SchedReq -> Selected happens inside the scheduling loop,
                // never through an external event.
                return self.bad_transition(job_id, oldstate, newstate);
            }
            JobState::Selected => {
                if newstate != JobState::Allocated {
                    return self.bad_transition(job_id, oldstate, newstate);
                }
                self.set_state(job_id, JobState::Allocated).await;
                self.issue_run_request(job_id).await?;
            }
            JobState::Allocated => {
                if newstate != JobState::RunRequest {
                    return self.bad_transition(job_id, oldstate, newstate);
                }
                self.set_state(job_id, JobState::RunRequest).await;
            }
            JobState::RunRequest => {
                if newstate != JobState::Starting {
                    return self.bad_transition(job_id, oldstate, newstate);
                }
                self.set_state(job_id, JobState::Starting).await;
            }
            JobState::Starting => {
                if newstate != JobState::Running {
                    return self.bad_transition(job_id, oldstate, newstate);
                }
                self.set_state(job_id, JobState::Running).await;
                self.queues.move_to_running(job_id);
            }
            JobState::Running => {
                if !matches!(newstate, JobState::Complete | JobState::Cancelled) {
                    return self.bad_transition(job_id, oldstate, newstate);
                }
                self.set_state(job_id, newstate).await;
                self.queues.move_to_complete(job_id);
                if !self.sched_once {
                    let shadows = self.queues.get_mut(job_id).map(|j| std::mem::take(&mut j.selected)).unwrap_or_default();
                    if let Err(e) = self.tree.release_shadows(&shadows, job_id) {
                        log::error!("failed to release resources for job {}: {}", job_id, e);
                    } else {
                        log::debug!("released resources for job {}", job_id);
                    }
                }
                self.publish_resource_freed();
            }
            JobState::Complete | JobState::Cancelled => {
                if newstate != JobState::Reaped {
                    return self.bad_transition(job_id, oldstate, newstate);
                }
                self.set_state(job_id, JobState::Reaped).await;
                self.queues.reap(job_id);
            }
            JobState::Reaped => {
                return self.bad_transition(job_id, oldstate, newstate);
            }
        }
        Ok(())
    }

    fn bad_transition(&self, job_id: i64, oldstate: JobState, newstate: JobState) -> Result<()> {
        Err(Error::invalid(format!("job {} bad state transition from {} to {}", job_id, oldstate, newstate)))
    }

    /// Fetches and normalizes the job's resource requirement. A request
    /// that is structurally infeasible against the whole tree cancels the
    /// job with a descriptive log line.
    async fn fill_resource_request(&mut self, job_id: i64) -> Result<()> {
        let dto = self.jobspec.fetch(job_id).await?;
        let request = JobRequest::from_dto(&dto)?;

        let total_nodes = self.tree.ids_of_type("node").len() as i64;
        let total_cores = self.tree.ids_of_type("core").len() as i64;
        if request.nnodes > total_nodes || (total_cores > 0 && request.ncores > total_cores) {
            log::error!(
                "job {} requests {} nodes / {} cores but the tree holds {} nodes / {} cores; cancelling",
                job_id,
                request.nnodes,
                request.ncores,
                total_nodes,
                total_cores
            );
            self.set_state(job_id, JobState::Cancelled).await;
            self.queues.move_to_complete(job_id);
            return Ok(());
        }

        if let Some(job) = self.queues.get_mut(job_id) {
            job.request = Some(request);
            job.account = dto.account;
            job.user = dto.user;
        }
        Ok(())
    }

    /// Unwinds a job cancelled between selection and running: release the
    /// held sub-tree, drop the run request, and retire the job.
    async fn cancel_held_job(&mut self, job_id: i64) -> Result<()> {
        let shadows = self.queues.get_mut(job_id).map(|j| std::mem::take(&mut j.selected)).unwrap_or_default();
        if shadows.is_empty() {
            self.tree.release_everywhere(job_id)?;
        } else {
            self.tree.release_shadows(&shadows, job_id)?;
        }
        if let Err(e) = self.exec.cancel(job_id).await {
            log::warn!("failed to drop run request for job {}: {}", job_id, e);
        }
        self.set_state(job_id, JobState::Cancelled).await;
        self.queues.move_to_complete(job_id);
        self.publish_resource_freed();
        Ok(())
    }

    /// Runs a pass now, or marks the queue dirty under delay-sched.
    async fn request_pass(&mut self) {
        if self.params.delay_sched {
            self.pending_pass = true;
        } else {
            self.schedule_jobs().await;
        }
    }

    /// One scheduling pass over the pending queue.
    pub async fn schedule_jobs(&mut self) {
        let Some(mut policy) = self.policy.take() else {
            log::warn!("no scheduling policy installed; skipping pass");
            return;
        };
        self.pass_count += 1;
        if let Err(e) = self.run_pass(policy.as_mut()).await {
            log::error!("scheduling pass abandoned: {}", e);
        }
        self.policy = Some(policy);
    }

    async fn run_pass(&mut self, policy: &mut dyn SchedPolicy) -> Result<()> {
        let now = self.clock.now();
        // Reservations never survive into the next pass; the policy
        // recomputes the ones it still believes in.
        self.tree.release_all_reservations()?;
        policy.loop_setup(&mut self.tree, now)?;

        for job_id in self.queues.pending_ids().into_iter().take(self.params.queue_depth) {
            if self.queues.get(job_id).map(|j| j.state) != Some(JobState::SchedReq) {
                continue;
            }
            match self.schedule_job(policy, job_id, now).await {
                Ok(LoopControl::Continue) => {}
                Ok(LoopControl::Stop) => break,
                Err(e) => log::error!("scheduling job {} failed: {}; skipping it this pass", job_id, e),
            }
        }
        Ok(())
    }

    /// Find, select, then allocate or reserve one job.
    async fn schedule_job(&mut self, policy: &mut dyn SchedPolicy, job_id: i64, now: i64) -> Result<LoopControl> {
        let spec = self
            .queues
            .get(job_id)
            .and_then(|j| j.request)
            .ok_or_else(|| Error::conflict(format!("job {} reached the scheduling loop without a request", job_id)))?;
        let walltime = spec.walltime;

        let mut request = Self::build_request(&spec, now)?;
        let (nfound, found) = policy.find_resources(&mut self.tree, &mut request)?;
        log::debug!("{} resources found for job {}, required quantity {}", nfound, job_id, request.qty());
        if nfound == 0 {
            return Ok(LoopControl::Continue);
        }

        self.tree.unstage_shadows(&found);
        let selected = policy.select_resources(&mut self.tree, &found, &mut request);
        if selected.is_empty() {
            return Ok(LoopControl::Continue);
        }

        if request.all_found() {
            policy.allocate_resources(&mut self.tree, &selected, job_id, now, now + walltime)?;
            if let Some(job) = self.queues.get_mut(job_id) {
                job.start_time = now;
                job.end_time = now + walltime;
                job.selected = selected;
            }
            self.set_state(job_id, JobState::Selected).await;
            if let Err(e) = self.commit_allocation(job_id).await {
                log::error!("failed to commit allocation metadata for job {}: {}; rolling back", job_id, e);
                let shadows = self.queues.get_mut(job_id).map(|j| std::mem::take(&mut j.selected)).unwrap_or_default();
                self.tree.release_shadows(&shadows, job_id)?;
                self.set_state(job_id, JobState::SchedReq).await;
            }
            Ok(LoopControl::Continue)
        } else {
            policy.reserve_resources(&mut self.tree, job_id, now, walltime, &mut request)
        }
    }

    /// The composite request for a job: nodes with their cores, over the
    /// job's walltime starting now. One core request per core-per-node;
    /// cores are consumed whole.
    fn build_request(spec: &JobRequest, now: i64) -> Result<Request> {
        let core = Request::new("core", spec.corespernode, 1, true)?;
        let mut node = if spec.node_exclusive { Request::new("node", spec.nnodes, 1, true)? } else { Request::new("node", spec.nnodes, 0, false)? };
        node = node.with_child(core);
        node.set_window(now, now + spec.walltime);
        Ok(node)
    }

    /// Persists the selected sub-tree and its rank containment, then asks
    /// the status source to advance the job to allocated. A store failure
    /// propagates so the caller can roll the planner mutation back.
    async fn commit_allocation(&mut self, job_id: i64) -> Result<()> {
        let (shadows, corespernode) = {
            let job = self.queues.get(job_id).ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
            (job.selected.clone(), job.request.map(|r| r.corespernode).unwrap_or(1))
        };

        let rdl: Vec<ResourceDto> = shadows.iter().map(|s| self.tree.shadow_to_dto(s)).collect();
        self.kv.put(&job_key(job_id, "rdl"), serde_json::to_value(rdl)?).await?;

        if !self.ranks.is_empty() {
            let entries = self.ranks.contain_entries(&self.tree, &shadows, corespernode as u64)?;
            self.kv.put(&job_key(job_id, "rdl.alloc"), serde_json::to_value(entries)?).await?;
        } else {
            log::debug!("no rank table loaded; skipping rdl.alloc for job {}", job_id);
        }

        self.notify_state(job_id, JobState::Allocated);
        Ok(())
    }

    async fn issue_run_request(&mut self, job_id: i64) -> Result<()> {
        self.notify_state(job_id, JobState::RunRequest);
        self.exec.run(job_id).await?;
        log::debug!("issued run request for job {}", job_id);
        Ok(())
    }

    /// Updates the job's record in the store and applies the transition.
    async fn set_state(&mut self, job_id: i64, state: JobState) {
        if let Some(job) = self.queues.get_mut(job_id) {
            job.state = state;
        }
        let now = self.clock.now();
        if let Err(e) = self.kv.put(&job_key(job_id, "state"), json!(state.as_str())).await {
            log::warn!("failed to persist state of job {}: {}", job_id, e);
        }
        if let Err(e) = self.kv.put(&job_key(job_id, &format!("{}_time", state.as_str())), json!(now as f64)).await {
            log::warn!("failed to persist state time of job {}: {}", job_id, e);
        }
    }

    /// Asks the status source to move the job onward; the committed update
    /// comes back through the event queue as a notification.
    fn notify_state(&self, job_id: i64, newstate: JobState) {
        let old = self.queues.get(job_id).map(|j| j.state).unwrap_or(JobState::Null);
        let _ = self.tx.send(SchedEvent::JobStatus { job_id, old_state: old, new_state: newstate });
    }

    fn publish_resource_freed(&mut self) {
        // Fire and forget; the loop wakes when the event is consumed.
        self.freed_published += 1;
        let _ = self.tx.send(SchedEvent::ResourceFreed);
    }
}
