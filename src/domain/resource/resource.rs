use slotmap::new_key_type;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use uuid::Uuid;

use crate::domain::planner::{PlanRequest, Planner};
use crate::error::{Error, Result};

new_key_type! {
    /// Arena handle of a resource in the tree pool.
    pub struct ResourceId;
}

/// Time span every resource planner in one tree accounts for.
#[derive(Debug, Clone, Copy)]
pub struct PlanningHorizon {
    pub start: i64,
    pub duration: i64,
}

impl PlanningHorizon {
    pub fn new(start: i64, duration: i64) -> PlanningHorizon {
        PlanningHorizon { start, duration }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    Invalid,
    Idle,
    Allocated,
    Reserved,
    Down,
}

/// One job's claim against a single resource. A window of `None` means the
/// claim was made against the live availability counter; otherwise the
/// claim lives in the resource's planner under the job id.
#[derive(Debug, Clone, Copy)]
pub struct Claim {
    pub size: u64,
    pub window: Option<(i64, i64)>,
}

/// A typed node of the resource tree (cluster, pod, switch, node, socket,
/// core, ...). Owns a one-dimensional planner sized by its capacity; all
/// temporal accounting of the resource delegates to it.
#[derive(Debug)]
pub struct Resource {
    pub rtype: String,
    pub name: String,
    pub path: String,
    pub id: u64,
    pub uuid: Uuid,
    pub size: u64,
    pub available: u64,
    pub staged: u64,
    pub state: ResourceState,
    pub properties: BTreeMap<String, String>,
    pub tags: BTreeSet<String>,
    /// Content hash of the hardware-inventory description backing this
    /// resource; keys the broker-rank side table for node-type resources.
    pub digest: Option<String>,
    pub planner: Planner,
    pub(crate) parent: Option<ResourceId>,
    pub(crate) children: Vec<ResourceId>,
    pub(crate) allocs: HashMap<i64, Claim>,
    pub(crate) reservations: HashMap<i64, Claim>,
}

impl Resource {
    pub fn new(rtype: impl Into<String>, name: impl Into<String>, id: u64, size: u64, horizon: PlanningHorizon) -> Result<Resource> {
        let rtype = rtype.into();
        let name = name.into();
        let planner = Planner::new(horizon.start, horizon.duration, &[size])?;
        Ok(Resource {
            rtype,
            name,
            path: String::new(),
            id,
            uuid: Uuid::new_v4(),
            size,
            available: size,
            staged: 0,
            state: ResourceState::Idle,
            properties: BTreeMap::new(),
            tags: BTreeSet::new(),
            digest: None,
            planner,
            parent: None,
            children: Vec::new(),
            allocs: HashMap::new(),
            reservations: HashMap::new(),
        })
    }

    pub fn parent(&self) -> Option<ResourceId> {
        self.parent
    }

    pub fn children(&self) -> &[ResourceId] {
        &self.children
    }

    /// Units available over `[start, end)` as answered by the planner.
    pub fn available_during(&self, start: i64, end: i64, needed: u64) -> bool {
        if needed == 0 {
            return true;
        }
        if end <= start || end > self.planner.plan_end() {
            return false;
        }
        let Ok(request) = PlanRequest::new(&[needed], end - start, false) else {
            return false;
        };
        self.planner.avail_during(start, &request).unwrap_or(false)
    }

    /// Marks `size` units for the next allocate or reserve commit.
    pub fn stage(&mut self, size: u64) {
        self.staged = size;
    }

    pub fn unstage(&mut self) {
        self.staged = 0;
    }

    /// Commits the staged size to `job_id`. A zero window (`end == 0`)
    /// commits against the live counter; otherwise the claim is entered
    /// into the planner over `[start, end)`.
    pub(crate) fn allocate(&mut self, job_id: i64, start: i64, end: i64) -> Result<()> {
        if end != 0 {
            if self.staged > 0 {
                self.planner.add_reservation(job_id, start, end - start, &[self.staged], true)?;
            }
            self.allocs.insert(job_id, Claim { size: self.staged, window: Some((start, end)) });
        } else {
            if self.staged > self.available {
                return Err(Error::out_of_range(format!("staged {} exceeds available {} on {}", self.staged, self.available, self.path)));
            }
            self.available -= self.staged;
            self.allocs.insert(job_id, Claim { size: self.staged, window: None });
            self.state = ResourceState::Allocated;
        }
        self.staged = 0;
        Ok(())
    }

    /// Like allocate, but into the reservation ledger. Reservations are the
    /// claims the scheduling loop purges and recomputes every pass.
    pub(crate) fn reserve(&mut self, job_id: i64, start: i64, end: i64) -> Result<()> {
        if end != 0 {
            if self.staged > 0 {
                self.planner.add_reservation(job_id, start, end - start, &[self.staged], true)?;
            }
            self.reservations.insert(job_id, Claim { size: self.staged, window: Some((start, end)) });
        } else {
            if self.staged > self.available {
                return Err(Error::out_of_range(format!("staged {} exceeds available {} on {}", self.staged, self.available, self.path)));
            }
            self.available -= self.staged;
            self.reservations.insert(job_id, Claim { size: self.staged, window: None });
            if self.state != ResourceState::Allocated {
                self.state = ResourceState::Reserved;
            }
        }
        self.staged = 0;
        Ok(())
    }

    /// Drops the allocation held by `job_id`, if any.
    pub(crate) fn release(&mut self, job_id: i64) -> Result<()> {
        if let Some(claim) = self.allocs.remove(&job_id) {
            match claim.window {
                Some(_) => {
                    if claim.size > 0 {
                        self.planner.remove_reservation(job_id)?;
                    }
                }
                None => self.available += claim.size,
            }
            if self.state != ResourceState::Invalid && self.allocs.is_empty() {
                self.state = if self.reservations.is_empty() { ResourceState::Idle } else { ResourceState::Reserved };
            }
        }
        Ok(())
    }

    /// Drops the reservation held by `job_id`, if any.
    pub(crate) fn release_reservation(&mut self, job_id: i64) -> Result<()> {
        if let Some(claim) = self.reservations.remove(&job_id) {
            match claim.window {
                Some(_) => {
                    if claim.size > 0 {
                        self.planner.remove_reservation(job_id)?;
                    }
                }
                None => self.available += claim.size,
            }
            if self.state != ResourceState::Invalid && self.reservations.is_empty() {
                self.state = if self.allocs.is_empty() { ResourceState::Idle } else { ResourceState::Allocated };
            }
        }
        Ok(())
    }

    /// Drops every reservation on this resource.
    pub(crate) fn release_all_reservations(&mut self) -> Result<()> {
        let reservations = std::mem::take(&mut self.reservations);
        for (job_id, claim) in reservations {
            match claim.window {
                Some(_) => {
                    if claim.size > 0 {
                        self.planner.remove_reservation(job_id)?;
                    }
                }
                None => self.available += claim.size,
            }
        }
        if self.state != ResourceState::Invalid {
            self.state = if self.allocs.is_empty() { ResourceState::Idle } else { ResourceState::Allocated };
        }
        Ok(())
    }

    pub fn alloc_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.allocs.keys().copied()
    }

    pub fn has_alloc(&self, job_id: i64) -> bool {
        self.allocs.contains_key(&job_id)
    }

    pub fn reservation_jobs(&self) -> impl Iterator<Item = i64> + '_ {
        self.reservations.keys().copied()
    }
}
