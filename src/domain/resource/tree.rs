use slotmap::SlotMap;

use crate::api::rdl_dto::ResourceDto;
use crate::domain::resource::request::Request;
use crate::domain::resource::resource::{PlanningHorizon, Resource, ResourceId};
use crate::error::Result;

/// A lightweight view into the resource tree: search and select results are
/// shadow trees referencing pool handles, never owning the resources.
#[derive(Debug, Clone)]
pub struct Shadow {
    pub resource: ResourceId,
    pub children: Vec<Shadow>,
}

impl Shadow {
    pub fn new(resource: ResourceId) -> Shadow {
        Shadow { resource, children: Vec::new() }
    }

    /// Pre-order handles of this shadow tree.
    pub fn preorder(&self) -> Vec<ResourceId> {
        let mut out = Vec::new();
        self.collect(&mut out);
        out
    }

    fn collect(&self, out: &mut Vec<ResourceId>) {
        out.push(self.resource);
        for child in &self.children {
            child.collect(out);
        }
    }
}

/// The typed, named tree of resources. The pool exclusively owns every
/// resource; everything else refers to them through [`ResourceId`] handles.
#[derive(Debug)]
pub struct ResourceTree {
    pool: SlotMap<ResourceId, Resource>,
    root: ResourceId,
    horizon: PlanningHorizon,
}

impl ResourceTree {
    /// Builds the tree from its serialized form. Every resource receives a
    /// planner spanning `horizon`.
    pub fn from_dto(dto: &ResourceDto, horizon: PlanningHorizon) -> Result<ResourceTree> {
        let mut pool: SlotMap<ResourceId, Resource> = SlotMap::with_key();
        let mut next_id: u64 = 0;
        let root = Self::insert_dto(&mut pool, dto, None, "", &mut next_id, horizon)?;
        Ok(ResourceTree { pool, root, horizon })
    }

    fn insert_dto(
        pool: &mut SlotMap<ResourceId, Resource>,
        dto: &ResourceDto,
        parent: Option<ResourceId>,
        parent_path: &str,
        next_id: &mut u64,
        horizon: PlanningHorizon,
    ) -> Result<ResourceId> {
        let id = dto.id.unwrap_or(*next_id);
        *next_id = id.max(*next_id) + 1;

        let mut resource = Resource::new(&dto.rtype, &dto.name, id, dto.size, horizon)?;
        resource.path = if parent_path.is_empty() { format!("/{}", dto.name) } else { format!("{}/{}", parent_path, dto.name) };
        resource.properties = dto.properties.clone();
        resource.tags = dto.tags.clone();
        resource.digest = dto.digest.clone();
        resource.parent = parent;
        let path = resource.path.clone();

        let rid = pool.insert(resource);
        for child_dto in &dto.children {
            let cid = Self::insert_dto(pool, child_dto, Some(rid), &path, next_id, horizon)?;
            pool[rid].children.push(cid);
        }
        Ok(rid)
    }

    /// Serializes the tree back into its external form.
    pub fn to_dto(&self) -> ResourceDto {
        self.node_to_dto(self.root)
    }

    fn node_to_dto(&self, rid: ResourceId) -> ResourceDto {
        let resource = &self.pool[rid];
        ResourceDto {
            rtype: resource.rtype.clone(),
            name: resource.name.clone(),
            id: Some(resource.id),
            size: resource.size,
            properties: resource.properties.clone(),
            tags: resource.tags.clone(),
            digest: resource.digest.clone(),
            children: resource.children.iter().map(|&cid| self.node_to_dto(cid)).collect(),
        }
    }

    /// Serializes a selected shadow tree: the shape of the shadow with the
    /// attributes of the live resources behind it.
    pub fn shadow_to_dto(&self, shadow: &Shadow) -> ResourceDto {
        let resource = &self.pool[shadow.resource];
        ResourceDto {
            rtype: resource.rtype.clone(),
            name: resource.name.clone(),
            id: Some(resource.id),
            size: resource.size,
            properties: resource.properties.clone(),
            tags: resource.tags.clone(),
            digest: resource.digest.clone(),
            children: shadow.children.iter().map(|c| self.shadow_to_dto(c)).collect(),
        }
    }

    pub fn root(&self) -> ResourceId {
        self.root
    }

    pub fn horizon(&self) -> PlanningHorizon {
        self.horizon
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn get(&self, rid: ResourceId) -> &Resource {
        &self.pool[rid]
    }

    pub fn get_mut(&mut self, rid: ResourceId) -> &mut Resource {
        &mut self.pool[rid]
    }

    /// Pre-order walk of the whole tree.
    pub fn preorder(&self) -> Vec<ResourceId> {
        let mut out = Vec::new();
        self.preorder_from(self.root, &mut out);
        out
    }

    fn preorder_from(&self, rid: ResourceId, out: &mut Vec<ResourceId>) {
        out.push(rid);
        for &cid in &self.pool[rid].children {
            self.preorder_from(cid, out);
        }
    }

    pub fn ids_of_type(&self, rtype: &str) -> Vec<ResourceId> {
        self.preorder().into_iter().filter(|&rid| self.pool[rid].rtype.eq_ignore_ascii_case(rtype)).collect()
    }

    pub fn find_by_name(&self, name: &str) -> Option<ResourceId> {
        self.preorder().into_iter().find(|&rid| self.pool[rid].name == name)
    }

    /// Whether the resource satisfies one request node: matching type
    /// (case-insensitive), the required properties and tags present, and,
    /// when `available` is asked, the needed size free over the request
    /// window (through the planner) or against the live counter for a
    /// present-moment request.
    pub fn matches(&self, rid: ResourceId, request: &Request, available: bool) -> bool {
        let resource = &self.pool[rid];
        if !resource.rtype.eq_ignore_ascii_case(request.rtype()) {
            return false;
        }
        if !request.properties().iter().all(|(k, v)| resource.properties.get(k) == Some(v)) {
            return false;
        }
        if !request.tags().iter().all(|t| resource.tags.contains(t)) {
            return false;
        }
        if !available {
            return true;
        }

        let needed = if request.exclusive() { resource.size } else { request.size().max(1) };
        if request.end() != 0 {
            resource.available_during(request.start(), request.end(), needed)
        } else {
            needed <= resource.available
        }
    }

    /// Searches the subtree under `from` for concrete trees matching the
    /// request. Returns the number of matched composites and their shadow
    /// trees. Unmatched intermediate layers are descended through, so a
    /// sparse request (`node -> core`) matches a deeper physical hierarchy
    /// (`node -> socket -> core`).
    pub fn search(&self, from: ResourceId, request: &mut Request, available: bool) -> (i64, Vec<Shadow>) {
        let mut found = Vec::new();
        let n = self.search_list(&[from], request, available, &mut found);
        (n, found)
    }

    fn search_list(&self, resources: &[ResourceId], request: &mut Request, available: bool, found: &mut Vec<Shadow>) -> i64 {
        let mut nfound = 0;
        for &rid in resources {
            if self.matches(rid, request, available) {
                if !request.children().is_empty() {
                    if !self.pool[rid].children.is_empty() {
                        let mut shadow = Shadow::new(rid);
                        if self.match_children(&self.pool[rid].children, request.children_mut(), &mut shadow, available) {
                            found.push(shadow);
                            nfound += 1;
                        }
                    }
                } else {
                    found.push(Shadow::new(rid));
                    nfound += 1;
                }
            } else if !self.pool[rid].children.is_empty() {
                nfound += self.search_list(&self.pool[rid].children, request, available, found);
            }
        }
        nfound
    }

    /// All child requests must be satisfied by the resource's children for
    /// the composite to match.
    fn match_children(&self, resources: &[ResourceId], requests: &mut [Request], parent: &mut Shadow, available: bool) -> bool {
        for request in requests.iter_mut() {
            request.set_found(0);
            if !self.match_child(resources, request, parent, available) {
                return false;
            }
            if request.nfound() < request.qty() {
                return false;
            }
        }
        true
    }

    fn match_child(&self, resources: &[ResourceId], request: &mut Request, parent: &mut Shadow, available: bool) -> bool {
        let mut success = false;
        for &rid in resources {
            let mut found_here = false;
            if self.matches(rid, request, available) {
                if !request.children().is_empty() {
                    if !self.pool[rid].children.is_empty() {
                        let mut shadow = Shadow::new(rid);
                        if self.match_children(&self.pool[rid].children, request.children_mut(), &mut shadow, available) {
                            parent.children.push(shadow);
                            request.add_found(1);
                            found_here = true;
                            success = true;
                        }
                    }
                } else {
                    parent.children.push(Shadow::new(rid));
                    request.add_found(1);
                    found_here = true;
                    success = true;
                }
            }
            // Sparse descent: keep the unmatched intermediate resource in
            // the shadow tree and look for the request deeper down.
            if !found_here && !self.pool[rid].children.is_empty() {
                let mut shadow = Shadow::new(rid);
                if self.match_child(&self.pool[rid].children, request, &mut shadow, available) {
                    parent.children.push(shadow);
                    success = true;
                }
            }
        }
        success
    }

    pub fn stage(&mut self, rid: ResourceId, size: u64) {
        self.pool[rid].stage(size);
    }

    /// Clears staged sizes under the given shadow trees. Calling it twice
    /// equals calling it once.
    pub fn unstage_shadows(&mut self, shadows: &[Shadow]) {
        for shadow in shadows {
            for rid in shadow.preorder() {
                self.pool[rid].unstage();
            }
        }
    }

    pub fn unstage_all(&mut self) {
        for rid in self.preorder() {
            self.pool[rid].unstage();
        }
    }

    /// Commits every staged size under the shadow trees as an allocation
    /// for `(job_id, start, end)`. A failure rolls the partial allocation
    /// back before returning.
    pub fn allocate_shadows(&mut self, shadows: &[Shadow], job_id: i64, start: i64, end: i64) -> Result<()> {
        let mut done: Vec<ResourceId> = Vec::new();
        for shadow in shadows {
            for rid in shadow.preorder() {
                if let Err(e) = self.pool[rid].allocate(job_id, start, end) {
                    for &undo in &done {
                        let _ = self.pool[undo].release(job_id);
                    }
                    return Err(e);
                }
                done.push(rid);
            }
        }
        Ok(())
    }

    /// Commits every staged size as a reservation. Identical to
    /// [`ResourceTree::allocate_shadows`] except for the ledger written;
    /// reservations are consumed by the release pass at the head of each
    /// scheduling loop.
    pub fn reserve_shadows(&mut self, shadows: &[Shadow], job_id: i64, start: i64, end: i64) -> Result<()> {
        let mut done: Vec<ResourceId> = Vec::new();
        for shadow in shadows {
            for rid in shadow.preorder() {
                if let Err(e) = self.pool[rid].reserve(job_id, start, end) {
                    for &undo in &done {
                        let _ = self.pool[undo].release_reservation(job_id);
                    }
                    return Err(e);
                }
                done.push(rid);
            }
        }
        Ok(())
    }

    /// Releases the allocation keyed by `job_id` across the given shadows.
    pub fn release_shadows(&mut self, shadows: &[Shadow], job_id: i64) -> Result<()> {
        for shadow in shadows {
            for rid in shadow.preorder() {
                self.pool[rid].release(job_id)?;
            }
        }
        Ok(())
    }

    /// Releases the allocation keyed by `job_id` wherever it is held.
    pub fn release_everywhere(&mut self, job_id: i64) -> Result<()> {
        for rid in self.preorder() {
            self.pool[rid].release(job_id)?;
        }
        Ok(())
    }

    /// Drops every reservation from every resource planner. The scheduling
    /// loop runs this at the head of each pass; policy code recomputes the
    /// reservations it still believes in.
    pub fn release_all_reservations(&mut self) -> Result<()> {
        for rid in self.preorder() {
            self.pool[rid].release_all_reservations()?;
        }
        Ok(())
    }

    /// Jobs holding at least one allocation anywhere in the tree.
    pub fn allocated_jobs(&self) -> Vec<i64> {
        let mut jobs: Vec<i64> = self.preorder().into_iter().flat_map(|rid| self.pool[rid].alloc_ids().collect::<Vec<_>>()).collect();
        jobs.sort_unstable();
        jobs.dedup();
        jobs
    }
}
