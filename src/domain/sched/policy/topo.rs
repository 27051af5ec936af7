use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::path::PathBuf;

use crate::domain::resource::{Request, ResourceId, ResourceTree, Shadow};
use crate::domain::sched::params::SchedParams;
use crate::domain::sched::policy::{LoopControl, SchedPolicy, full_shadow, select_children, select_from_found};
use crate::error::{Error, Result};

// Assumes a fat-tree with the levels pod -> switch -> node below the root.
// Jobs are classified by node count:
//   T1 fits within one switch and must stay on one switch,
//   T2 spans switches but must stay within one pod,
//   T3 spans pods.
// A job is never upgraded: a T1 job is never split across switches, a T2
// job never crosses its pod.
#[derive(Debug, Clone, Copy)]
struct Levels {
    switches_per_pod: i64,
    nodes_per_switch: i64,
}

#[derive(Debug, Clone)]
struct Placement {
    tier: u8,
    pods: HashSet<ResourceId>,
    switches: HashSet<ResourceId>,
    /// Last instant of the claim; the exclusion lapses once a candidate
    /// window starts at or after it.
    until: i64,
}

/// Backfill with topology-aware best-fit placement.
#[derive(Debug)]
pub struct TopoPolicy {
    reservation_depth: i64,
    curr_reservation_depth: i64,
    completion_times: BinaryHeap<Reverse<i64>>,
    /// Where each allocated job sits; reconciled against the live tree at
    /// every loop setup so released jobs stop excluding anyone.
    allocated: HashMap<i64, Placement>,
    /// This pass's reservations; cleared with the reservations themselves.
    reserved: HashMap<i64, Placement>,
    topology_file: Option<PathBuf>,
}

impl Default for TopoPolicy {
    fn default() -> TopoPolicy {
        TopoPolicy::new()
    }
}

impl TopoPolicy {
    pub fn new() -> TopoPolicy {
        TopoPolicy {
            reservation_depth: 0,
            curr_reservation_depth: 0,
            completion_times: BinaryHeap::new(),
            allocated: HashMap::new(),
            reserved: HashMap::new(),
            topology_file: None,
        }
    }

    fn levels_of(tree: &ResourceTree) -> Option<Levels> {
        let pods = tree.ids_of_type("pod");
        let first_pod = *pods.first()?;
        let switches: Vec<ResourceId> = Self::switches_of(tree, first_pod);
        let first_switch = *switches.first()?;
        let nodes = Self::nodes_of(tree, first_switch).len() as i64;
        if nodes == 0 {
            return None;
        }
        Some(Levels { switches_per_pod: switches.len() as i64, nodes_per_switch: nodes })
    }

    fn switches_of(tree: &ResourceTree, pod: ResourceId) -> Vec<ResourceId> {
        tree.get(pod).children().iter().copied().filter(|&c| tree.get(c).rtype.eq_ignore_ascii_case("switch")).collect()
    }

    fn nodes_of(tree: &ResourceTree, switch: ResourceId) -> Vec<ResourceId> {
        tree.get(switch).children().iter().copied().filter(|&c| tree.get(c).rtype.eq_ignore_ascii_case("node")).collect()
    }

    fn classify(levels: Levels, nnodes: i64) -> u8 {
        if nnodes <= levels.nodes_per_switch {
            1
        } else if nnodes <= levels.nodes_per_switch * levels.switches_per_pod {
            2
        } else {
            3
        }
    }

    /// Nodes currently matching the request under one switch.
    fn switch_avail(tree: &ResourceTree, switch: ResourceId, request: &Request) -> i64 {
        Self::nodes_of(tree, switch).into_iter().filter(|&n| tree.matches(n, request, true)).count() as i64
    }

    /// Switches holding a T2 or T3 occupant, allocated or reserved, that is
    /// still present at `at`.
    fn occupied_switches(&self, at: i64) -> HashSet<ResourceId> {
        self.allocated
            .values()
            .chain(self.reserved.values())
            .filter(|p| p.tier >= 2 && p.until > at)
            .flat_map(|p| p.switches.iter().copied())
            .collect()
    }

    /// Pods holding a T3 occupant, allocated or reserved, that is still
    /// present at `at`.
    fn occupied_pods(&self, at: i64) -> HashSet<ResourceId> {
        self.allocated
            .values()
            .chain(self.reserved.values())
            .filter(|p| p.tier >= 3 && p.until > at)
            .flat_map(|p| p.pods.iter().copied())
            .collect()
    }

    /// Selects one full node: the node itself plus whatever its child
    /// requests demand below it.
    fn select_node(tree: &mut ResourceTree, node: ResourceId, request: &mut Request) -> Option<Shadow> {
        if !tree.matches(node, request, true) {
            return None;
        }
        let mut selected = Shadow::new(node);
        if !request.children().is_empty() {
            let mirror = full_shadow(tree, node);
            if !select_children(tree, &mirror.children, request.children_mut(), &mut selected) {
                return None;
            }
        }
        tree.stage(node, request.size());
        request.add_found(1);
        Some(selected)
    }

    /// Takes up to `need` nodes from one switch, in child order. Returns
    /// the switch shadow and how many nodes it carries.
    fn fill_switch(tree: &mut ResourceTree, switch: ResourceId, request: &mut Request, need: i64) -> (Option<Shadow>, i64) {
        let mut shadow = Shadow::new(switch);
        let mut taken = 0;
        for node in Self::nodes_of(tree, switch) {
            if taken >= need {
                break;
            }
            if let Some(s) = Self::select_node(tree, node, request) {
                shadow.children.push(s);
                taken += 1;
            }
        }
        if taken > 0 { (Some(shadow), taken) } else { (None, 0) }
    }

    fn unstage_subtree(tree: &mut ResourceTree, rid: ResourceId) {
        let shadow = full_shadow(tree, rid);
        tree.unstage_shadows(std::slice::from_ref(&shadow));
    }

    /// The topology-aware best-fit selection.
    fn select_topology(&self, tree: &mut ResourceTree, request: &mut Request, levels: Levels) -> Vec<Shadow> {
        let need = request.qty();
        let job_tier = Self::classify(levels, need);
        let excluded_switches = self.occupied_switches(request.start());
        let excluded_pods = self.occupied_pods(request.start());
        let pods = tree.ids_of_type("pod");

        match job_tier {
            1 => {
                // Least-available pod first, then the least-available switch
                // that still fits the whole job; ties break by child order.
                let mut pod_list: Vec<(i64, ResourceId)> =
                    pods.iter().map(|&p| (Self::switches_of(tree, p).into_iter().map(|s| Self::switch_avail(tree, s, request)).sum(), p)).collect();
                pod_list.sort_by_key(|&(avail, _)| avail);
                for (pod_avail, pod) in pod_list {
                    if pod_avail < need {
                        continue;
                    }
                    let mut switch_list: Vec<(i64, ResourceId)> =
                        Self::switches_of(tree, pod).into_iter().map(|s| (Self::switch_avail(tree, s, request), s)).collect();
                    switch_list.sort_by_key(|&(avail, _)| avail);
                    for (avail, switch) in switch_list {
                        if avail < need {
                            continue;
                        }
                        request.clear_found();
                        let (shadow, taken) = Self::fill_switch(tree, switch, request, need);
                        if taken >= need {
                            return vec![shadow.expect("filled switch has a shadow")];
                        }
                        // A T1 job is never split across switches.
                        Self::unstage_subtree(tree, switch);
                    }
                }
                Vec::new()
            }
            2 => {
                // Confined to one pod; prefer the tightest-fitting pod, and
                // inside it the emptiest switches without a T2/T3 occupant.
                let mut pod_list: Vec<(i64, ResourceId)> = pods
                    .iter()
                    .map(|&p| {
                        let avail = Self::switches_of(tree, p)
                            .into_iter()
                            .filter(|s| !excluded_switches.contains(s))
                            .map(|s| Self::switch_avail(tree, s, request))
                            .sum();
                        (avail, p)
                    })
                    .collect();
                pod_list.sort_by_key(|&(avail, _)| avail);
                for (pod_avail, pod) in pod_list {
                    if pod_avail < need {
                        continue;
                    }
                    request.clear_found();
                    let mut switch_list: Vec<(i64, ResourceId)> = Self::switches_of(tree, pod)
                        .into_iter()
                        .filter(|s| !excluded_switches.contains(s))
                        .map(|s| (Self::switch_avail(tree, s, request), s))
                        .collect();
                    switch_list.sort_by_key(|&(avail, _)| Reverse(avail));
                    let mut shadows = Vec::new();
                    let mut remaining = need;
                    for (_, switch) in switch_list {
                        if remaining == 0 {
                            break;
                        }
                        let (shadow, taken) = Self::fill_switch(tree, switch, request, remaining);
                        if let Some(shadow) = shadow {
                            shadows.push(shadow);
                            remaining -= taken;
                        }
                    }
                    if remaining == 0 {
                        return vec![Shadow { resource: pod, children: shadows }];
                    }
                    Self::unstage_subtree(tree, pod);
                }
                Vec::new()
            }
            _ => {
                // Spans pods; only pods without another T3 job, emptiest
                // first, switches without T2/T3 occupants inside them.
                let mut pod_list: Vec<(i64, ResourceId)> = pods
                    .iter()
                    .filter(|&&p| !excluded_pods.contains(&p))
                    .map(|&p| {
                        let avail = Self::switches_of(tree, p)
                            .into_iter()
                            .filter(|s| !excluded_switches.contains(s))
                            .map(|s| Self::switch_avail(tree, s, request))
                            .sum();
                        (avail, p)
                    })
                    .collect();
                pod_list.sort_by_key(|&(avail, _)| Reverse(avail));

                request.clear_found();
                let mut out = Vec::new();
                let mut attempted: Vec<ResourceId> = Vec::new();
                let mut remaining = need;
                for (_, pod) in pod_list {
                    if remaining == 0 {
                        break;
                    }
                    attempted.push(pod);
                    let mut switch_list: Vec<(i64, ResourceId)> = Self::switches_of(tree, pod)
                        .into_iter()
                        .filter(|s| !excluded_switches.contains(s))
                        .map(|s| (Self::switch_avail(tree, s, request), s))
                        .collect();
                    switch_list.sort_by_key(|&(avail, _)| Reverse(avail));
                    let mut shadows = Vec::new();
                    for (_, switch) in switch_list {
                        if remaining == 0 {
                            break;
                        }
                        let (shadow, taken) = Self::fill_switch(tree, switch, request, remaining);
                        if let Some(shadow) = shadow {
                            shadows.push(shadow);
                            remaining -= taken;
                        }
                    }
                    if !shadows.is_empty() {
                        out.push(Shadow { resource: pod, children: shadows });
                    }
                }
                if remaining == 0 {
                    return out;
                }
                for pod in attempted {
                    Self::unstage_subtree(tree, pod);
                }
                Vec::new()
            }
        }
    }

    /// Derives where a selection sits in the topology, for the exclusion
    /// ledgers.
    fn placement_of(tree: &ResourceTree, selected: &[Shadow], levels: Levels, until: i64) -> Placement {
        let mut pods = HashSet::new();
        let mut switches = HashSet::new();
        let mut nnodes = 0;
        for shadow in selected {
            for rid in shadow.preorder() {
                if !tree.get(rid).rtype.eq_ignore_ascii_case("node") {
                    continue;
                }
                nnodes += 1;
                let mut cursor = tree.get(rid).parent();
                while let Some(up) = cursor {
                    let resource = tree.get(up);
                    if resource.rtype.eq_ignore_ascii_case("switch") {
                        switches.insert(up);
                    } else if resource.rtype.eq_ignore_ascii_case("pod") {
                        pods.insert(up);
                    }
                    cursor = resource.parent();
                }
            }
        }
        Placement { tier: Self::classify(levels, nnodes), pods, switches, until }
    }
}

impl SchedPolicy for TopoPolicy {
    fn name(&self) -> &'static str {
        "topo"
    }

    fn process_args(&mut self, args: &str, params: &SchedParams) -> Result<()> {
        let mut reserve_depth: Option<i64> = None;
        for entry in args.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once('=') {
                Some(("reserve-depth", value)) => {
                    reserve_depth = Some(value.parse().map_err(|_| Error::invalid(format!("reserve-depth value '{}'", value)))?);
                }
                Some(("rdl-topology", value)) => {
                    self.topology_file = Some(PathBuf::from(value));
                    log::info!("topo: using topology definition {}", value);
                }
                _ => return Err(Error::invalid(format!("unknown topo argument '{}'", entry))),
            }
        }

        let depth = reserve_depth.unwrap_or(0);
        if depth < 0 {
            self.reservation_depth = params.queue_depth as i64;
        } else if depth > params.queue_depth as i64 {
            return Err(Error::invalid(format!("reserve-depth {} is greater than queue-depth {}", depth, params.queue_depth)));
        } else {
            self.reservation_depth = depth;
        }
        Ok(())
    }

    fn loop_setup(&mut self, tree: &mut ResourceTree, _now: i64) -> Result<()> {
        self.curr_reservation_depth = 0;
        self.reserved.clear();
        let live: HashSet<i64> = tree.allocated_jobs().into_iter().collect();
        self.allocated.retain(|job_id, _| live.contains(job_id));
        Ok(())
    }

    fn find_resources(&mut self, tree: &mut ResourceTree, request: &mut Request) -> Result<(i64, Vec<Shadow>)> {
        let root = tree.root();
        let (nfound, found) = tree.search(root, request, true);
        if nfound < request.qty() {
            // Nothing can run now; when no reservation is possible either,
            // spare the selection pass entirely.
            if self.reservation_depth == 0 || self.curr_reservation_depth >= self.reservation_depth || nfound == 0 {
                return Ok((0, Vec::new()));
            }
        }
        Ok((nfound, found))
    }

    fn select_resources(&mut self, tree: &mut ResourceTree, found: &[Shadow], request: &mut Request) -> Vec<Shadow> {
        request.clear_found();
        let Some(levels) = Self::levels_of(tree) else {
            log::warn!("topo: tree has no pod/switch levels, falling back to first-fit selection");
            return select_from_found(tree, found, request);
        };
        self.select_topology(tree, request, levels)
    }

    fn allocate_resources(&mut self, tree: &mut ResourceTree, selected: &[Shadow], job_id: i64, start: i64, end: i64) -> Result<()> {
        tree.allocate_shadows(selected, job_id, start, end)?;
        self.completion_times.push(Reverse(end));
        if let Some(levels) = Self::levels_of(tree) {
            self.allocated.insert(job_id, Self::placement_of(tree, selected, levels, end));
        }
        Ok(())
    }

    fn reserve_resources(&mut self, tree: &mut ResourceTree, job_id: i64, now: i64, walltime: i64, request: &mut Request) -> Result<LoopControl> {
        if self.reservation_depth == 0 {
            return Ok(LoopControl::Continue);
        }
        if self.reservation_depth == 1 {
            if self.curr_reservation_depth > 0 {
                return Ok(LoopControl::Continue);
            }
        } else if self.curr_reservation_depth >= self.reservation_depth {
            return Ok(LoopControl::Stop);
        }

        let mut times: Vec<i64> = self.completion_times.drain().map(|Reverse(t)| t).collect();
        times.sort_unstable();
        times.dedup();
        times.retain(|&t| t >= now);
        self.completion_times = times.iter().map(|&t| Reverse(t)).collect();

        for t in times {
            request.set_window(t, t + walltime);
            let selected = self.select_resources(tree, &[], request);
            if selected.is_empty() || !request.all_found() {
                continue;
            }
            tree.reserve_shadows(&selected, job_id, t, t + walltime)?;
            self.completion_times.push(Reverse(t + walltime));
            if let Some(levels) = Self::levels_of(tree) {
                self.reserved.insert(job_id, Self::placement_of(tree, &selected, levels, t + walltime));
            }
            self.curr_reservation_depth += 1;
            log::debug!("topo: reserved {} nodes for job {} from {} to {}", request.qty(), job_id, t, t + walltime);
            break;
        }
        Ok(LoopControl::Continue)
    }
}
