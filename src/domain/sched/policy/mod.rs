use std::collections::HashMap;

use crate::domain::resource::{Request, ResourceTree, Shadow};
use crate::domain::sched::params::SchedParams;
use crate::error::{Error, Result};

pub mod backfill;
pub mod fcfs;
pub mod topo;

pub use backfill::BackfillPolicy;
pub use fcfs::FcfsPolicy;
pub use topo::TopoPolicy;

/// What the scheduling loop should do with the rest of the queue after a
/// policy hook handled one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

/// A scheduling policy: the five hooks the loop invokes per pass and per
/// job, plus the opaque argument-string parser.
///
/// `find_resources` may rewrite the request's window (now-only vs any time
/// at or after now); `select_resources` culls the found candidates down to
/// exactly the requested shape, staging sizes as it goes;
/// `allocate_resources` and `reserve_resources` commit the staged claims.
pub trait SchedPolicy: std::fmt::Debug + Send {
    fn name(&self) -> &'static str;

    /// Parses the policy's comma-separated argument string.
    fn process_args(&mut self, args: &str, params: &SchedParams) -> Result<()>;

    /// Invoked once at the head of every scheduling pass, after all
    /// reservations were released.
    fn loop_setup(&mut self, tree: &mut ResourceTree, now: i64) -> Result<()>;

    /// Identifies all candidate sub-trees for the request. The set returned
    /// can be larger than the job needs.
    fn find_resources(&mut self, tree: &mut ResourceTree, request: &mut Request) -> Result<(i64, Vec<Shadow>)>;

    /// Culls the candidates down to the shape the request demands.
    fn select_resources(&mut self, tree: &mut ResourceTree, found: &[Shadow], request: &mut Request) -> Vec<Shadow>;

    fn allocate_resources(&mut self, tree: &mut ResourceTree, selected: &[Shadow], job_id: i64, start: i64, end: i64) -> Result<()>;

    /// Called when the job cannot start at the current time. Policies that
    /// look into the future search for a window, reserve it, and report
    /// whether the loop should keep walking the queue.
    fn reserve_resources(&mut self, tree: &mut ResourceTree, job_id: i64, now: i64, walltime: i64, request: &mut Request) -> Result<LoopControl>;
}

/// Depth-first, first-fit selection over the found candidate trees, in
/// child order. Shared by the policies that have no placement preferences
/// of their own.
pub fn select_from_found(tree: &mut ResourceTree, found: &[Shadow], request: &mut Request) -> Vec<Shadow> {
    request.clear_found();
    let mut selected = Vec::new();
    for shadow in found {
        if request.nfound() >= request.qty() {
            break;
        }
        if let Some(s) = select_tree(tree, shadow, request) {
            selected.push(s);
        }
    }
    selected
}

fn select_tree(tree: &mut ResourceTree, node: &Shadow, request: &mut Request) -> Option<Shadow> {
    let rid = node.resource;
    if tree.matches(rid, request, true) {
        if !request.children().is_empty() {
            if node.children.is_empty() {
                return None;
            }
            let mut selected = Shadow::new(rid);
            if select_children(tree, &node.children, request.children_mut(), &mut selected) {
                tree.stage(rid, request.size());
                request.add_found(1);
                log::debug!("selected {}", tree.get(rid).name);
                Some(selected)
            } else {
                None
            }
        } else {
            tree.stage(rid, request.size());
            request.add_found(1);
            log::debug!("selected {}", tree.get(rid).name);
            Some(Shadow::new(rid))
        }
    } else if !node.children.is_empty() {
        // The request may be sparse; extend the selected tree with this
        // intermediate resource and keep looking below it.
        let mut selected = Shadow::new(rid);
        let mut hit = false;
        for child in &node.children {
            if let Some(s) = select_tree(tree, child, request) {
                selected.children.push(s);
                hit = true;
            }
            if request.nfound() >= request.qty() {
                break;
            }
        }
        if hit { Some(selected) } else { None }
    } else {
        None
    }
}

/// All child requests must be selected for the parent to count.
pub(crate) fn select_children(tree: &mut ResourceTree, children: &[Shadow], requests: &mut [Request], selected_parent: &mut Shadow) -> bool {
    for request in requests.iter_mut() {
        request.clear_found();
        let mut satisfied = false;
        for child in children {
            if let Some(s) = select_tree(tree, child, request) {
                selected_parent.children.push(s);
            }
            if request.nfound() >= request.qty() {
                satisfied = true;
                break;
            }
        }
        if !satisfied {
            return false;
        }
    }
    true
}

/// Mirrors a live subtree as a shadow tree, for selection passes that walk
/// the physical hierarchy instead of a search result.
pub(crate) fn full_shadow(tree: &ResourceTree, rid: crate::domain::resource::ResourceId) -> Shadow {
    let mut shadow = Shadow::new(rid);
    for &cid in tree.get(rid).children() {
        shadow.children.push(full_shadow(tree, cid));
    }
    shadow
}

type PolicyBuilder = fn() -> Box<dyn SchedPolicy>;

lazy_static::lazy_static! {
    static ref BUILTIN_POLICIES: Vec<(&'static str, PolicyBuilder)> = vec![
        ("fcfs", (|| Box::new(FcfsPolicy::new()) as Box<dyn SchedPolicy>) as PolicyBuilder),
        ("backfill", (|| Box::new(BackfillPolicy::new()) as Box<dyn SchedPolicy>) as PolicyBuilder),
        ("topo", (|| Box::new(TopoPolicy::new()) as Box<dyn SchedPolicy>) as PolicyBuilder),
    ];
}

/// The installable policy set. `plugin.load` installs or replaces, by name;
/// `plugin.unload` removes.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
    builders: HashMap<String, PolicyBuilder>,
}

impl PolicyRegistry {
    pub fn with_builtins() -> PolicyRegistry {
        let mut registry = PolicyRegistry { builders: HashMap::new() };
        for (name, builder) in BUILTIN_POLICIES.iter() {
            registry.builders.insert((*name).to_string(), *builder);
        }
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, builder: PolicyBuilder) {
        self.builders.insert(name.into(), builder);
    }

    pub fn unregister(&mut self, name: &str) -> bool {
        self.builders.remove(name).is_some()
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn SchedPolicy>> {
        match self.builders.get(name) {
            Some(builder) => Ok(builder()),
            None => Err(Error::NotFound(format!("no policy named '{}'", name))),
        }
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
