use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::domain::resource::{Request, ResourceTree, Shadow};
use crate::domain::sched::params::SchedParams;
use crate::domain::sched::policy::{LoopControl, SchedPolicy, select_from_found};
use crate::error::{Error, Result};

// Reservation depth guide:
//     0 = all backfilling (no reservations)
//     1 = EASY backfill
//    >1 = hybrid backfill
//    <0 = conservative backfill (bounded by queue-depth)
#[derive(Debug)]
pub struct BackfillPolicy {
    reservation_depth: i64,
    curr_reservation_depth: i64,
    /// Completion times of every allocation made through this policy; the
    /// candidate start points for future windows.
    completion_times: BinaryHeap<Reverse<i64>>,
}

impl Default for BackfillPolicy {
    fn default() -> BackfillPolicy {
        BackfillPolicy::new()
    }
}

impl BackfillPolicy {
    pub fn new() -> BackfillPolicy {
        BackfillPolicy { reservation_depth: 0, curr_reservation_depth: 0, completion_times: BinaryHeap::new() }
    }

    /// Sorted unique candidate start times at or after `now`. Past times
    /// are purged from the heap for good.
    fn candidate_times(&mut self, now: i64) -> Vec<i64> {
        let mut times: Vec<i64> = self.completion_times.drain().map(|Reverse(t)| t).collect();
        times.sort_unstable();
        times.dedup();
        times.retain(|&t| t >= now);
        self.completion_times = times.iter().map(|&t| Reverse(t)).collect();
        times
    }
}

impl SchedPolicy for BackfillPolicy {
    fn name(&self) -> &'static str {
        "backfill"
    }

    fn process_args(&mut self, args: &str, params: &SchedParams) -> Result<()> {
        let mut reserve_depth: Option<i64> = None;
        for entry in args.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once('=') {
                Some(("reserve-depth", value)) => {
                    reserve_depth = Some(value.parse().map_err(|_| Error::invalid(format!("reserve-depth value '{}'", value)))?);
                }
                _ => return Err(Error::invalid(format!("unknown backfill argument '{}'", entry))),
            }
        }

        let depth = reserve_depth.unwrap_or(0);
        if depth < 0 {
            // Conservative backfill is still bounded by the queue depth.
            self.reservation_depth = params.queue_depth as i64;
        } else if depth > params.queue_depth as i64 {
            return Err(Error::invalid(format!("reserve-depth {} is greater than queue-depth {}", depth, params.queue_depth)));
        } else {
            self.reservation_depth = depth;
        }
        Ok(())
    }

    fn loop_setup(&mut self, _tree: &mut ResourceTree, _now: i64) -> Result<()> {
        self.curr_reservation_depth = 0;
        Ok(())
    }

    fn find_resources(&mut self, tree: &mut ResourceTree, request: &mut Request) -> Result<(i64, Vec<Shadow>)> {
        let root = tree.root();
        Ok(tree.search(root, request, true))
    }

    fn select_resources(&mut self, tree: &mut ResourceTree, found: &[Shadow], request: &mut Request) -> Vec<Shadow> {
        select_from_found(tree, found, request)
    }

    fn allocate_resources(&mut self, tree: &mut ResourceTree, selected: &[Shadow], job_id: i64, start: i64, end: i64) -> Result<()> {
        tree.allocate_shadows(selected, job_id, start, end)?;
        self.completion_times.push(Reverse(end));
        log::debug!("allocated job {} from {} to {}", job_id, start, end);
        Ok(())
    }

    /// Searches into the future for the earliest window in which the whole
    /// request fits, using the known completion times as candidate starts.
    fn reserve_resources(&mut self, tree: &mut ResourceTree, job_id: i64, now: i64, walltime: i64, request: &mut Request) -> Result<LoopControl> {
        if self.reservation_depth == 0 {
            // All backfilling: nothing is ever reserved, every queued job
            // keeps its chance this pass.
            return Ok(LoopControl::Continue);
        }
        if self.reservation_depth == 1 {
            if self.curr_reservation_depth > 0 {
                // EASY: the top job holds the only reservation; everyone
                // else may backfill around it.
                return Ok(LoopControl::Continue);
            }
        } else if self.curr_reservation_depth >= self.reservation_depth {
            // Hybrid/conservative exhausted: stop scheduling this pass.
            return Ok(LoopControl::Stop);
        }

        for t in self.candidate_times(now) {
            request.set_window(t, t + walltime);
            log::debug!("attempting to reserve {} resources for job {} at time {}", request.qty(), job_id, t);

            let root = tree.root();
            let (nfound, found) = tree.search(root, request, true);
            if nfound < request.qty() {
                continue;
            }
            let selected = select_from_found(tree, &found, request);
            if selected.is_empty() || !request.all_found() {
                continue;
            }
            tree.reserve_shadows(&selected, job_id, t, t + walltime)?;
            // The reservation's completion is a candidate start for the
            // jobs reserved after it.
            self.completion_times.push(Reverse(t + walltime));
            self.curr_reservation_depth += 1;
            log::debug!("reserved {} resources for job {} from {} to {}", request.qty(), job_id, t, t + walltime);
            break;
        }
        Ok(LoopControl::Continue)
    }
}
