use crate::domain::resource::{Request, ResourceTree, Shadow};
use crate::domain::sched::params::SchedParams;
use crate::domain::sched::policy::{LoopControl, SchedPolicy, select_from_found};
use crate::error::Result;

/// First-come, first-served.
///
/// Searches only the current instant; a job that cannot run now blocks the
/// rest of the queue until resources free up. Never reserves.
#[derive(Debug, Default)]
pub struct FcfsPolicy;

impl FcfsPolicy {
    pub fn new() -> FcfsPolicy {
        FcfsPolicy
    }
}

impl SchedPolicy for FcfsPolicy {
    fn name(&self) -> &'static str {
        "fcfs"
    }

    fn process_args(&mut self, args: &str, _params: &SchedParams) -> Result<()> {
        if !args.is_empty() {
            log::warn!("fcfs: ignoring policy arguments '{}'", args);
        }
        Ok(())
    }

    fn loop_setup(&mut self, _tree: &mut ResourceTree, _now: i64) -> Result<()> {
        Ok(())
    }

    fn find_resources(&mut self, tree: &mut ResourceTree, request: &mut Request) -> Result<(i64, Vec<Shadow>)> {
        // A zero window restricts the search to the present moment and
        // prevents any search into the future.
        request.set_window(0, 0);
        let root = tree.root();
        Ok(tree.search(root, request, true))
    }

    fn select_resources(&mut self, tree: &mut ResourceTree, found: &[Shadow], request: &mut Request) -> Vec<Shadow> {
        request.set_window(0, 0);
        select_from_found(tree, found, request)
    }

    fn allocate_resources(&mut self, tree: &mut ResourceTree, selected: &[Shadow], job_id: i64, _start: i64, _end: i64) -> Result<()> {
        tree.allocate_shadows(selected, job_id, 0, 0)
    }

    fn reserve_resources(&mut self, _tree: &mut ResourceTree, _job_id: i64, _now: i64, _walltime: i64, _request: &mut Request) -> Result<LoopControl> {
        // Never reserve; stop considering later jobs so queue order holds.
        Ok(LoopControl::Stop)
    }
}
