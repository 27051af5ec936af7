use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::ops::Bound::{Excluded, Unbounded};

use slotmap::SlotMap;

use crate::domain::planner::avl::AvlTree;
use crate::domain::planner::interval::{IntervalOps, overlapping};
use crate::domain::planner::mintime::{MinTimeOps, earliest_point};
use crate::domain::planner::point::{PointId, ScheduledPoint};
use crate::domain::planner::span::{Span, SpanId};
use crate::domain::planner::vector::{MAX_RESOURCE_DIM, ResourceVector, veccmp};
use crate::error::{Error, Result};

/// A validated availability request against one planner: the required
/// vector, the duration of the window, and whether the whole aggregate
/// must be free.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    vector: ResourceVector,
    duration: i64,
    exclusive: bool,
}

impl PlanRequest {
    pub fn new(amounts: &[u64], duration: i64, exclusive: bool) -> Result<PlanRequest> {
        if duration < 1 {
            return Err(Error::invalid(format!("request duration must be at least 1, got {}", duration)));
        }
        let vector = ResourceVector::from_amounts(amounts)?;
        if vector.total() <= 0 {
            return Err(Error::out_of_range("request of zero total size"));
        }
        Ok(PlanRequest { vector, duration, exclusive })
    }

    pub fn vector(&self) -> &ResourceVector {
        &self.vector
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }
}

/// The temporal resource planner.
///
/// Accounts one aggregate pool of up to [`MAX_RESOURCE_DIM`] resource
/// dimensions over the planning span `[plan_start, plan_end]`. Three indices
/// cover the same set of scheduled points:
///
/// * an ordered point map keyed by time, for predecessor/successor walks,
/// * an interval tree of reservations augmented with the subtree's maximum
///   last instant, for overlap retrieval,
/// * a min-time index keyed by the remaining-resource vector and augmented
///   with the subtree's minimum time, for earliest-fit queries.
///
/// A reservation claims its vector over the half-open window
/// `[start, start + duration)`; the scheduled point at the window's last
/// instant marks where the claim ends.
#[derive(Debug)]
pub struct Planner {
    total: ResourceVector,
    resource_types: Vec<String>,
    plan_start: i64,
    plan_end: i64,
    points: SlotMap<PointId, ScheduledPoint>,
    by_time: BTreeMap<i64, PointId>,
    mintime: AvlTree<PointId>,
    spans: SlotMap<SpanId, Span>,
    intervals: AvlTree<SpanId>,
    lookup: HashMap<i64, SpanId>,
    iter_request: Option<PlanRequest>,
    stashed: Vec<PointId>,
    sentinel: PointId,
}

impl Planner {
    /// Creates a planner for `[plan_start, plan_start + plan_duration]` with
    /// the given per-dimension totals.
    pub fn new(plan_start: i64, plan_duration: i64, totals: &[u64]) -> Result<Planner> {
        if plan_start < 0 {
            return Err(Error::invalid(format!("plan start must be non-negative, got {}", plan_start)));
        }
        if plan_duration < 1 {
            return Err(Error::invalid(format!("plan duration must be at least 1, got {}", plan_duration)));
        }
        let total = ResourceVector::from_amounts(totals)?;

        let mut planner = Planner {
            total,
            resource_types: Vec::new(),
            plan_start,
            plan_end: plan_start + plan_duration,
            points: SlotMap::with_key(),
            by_time: BTreeMap::new(),
            mintime: AvlTree::new(),
            spans: SlotMap::with_key(),
            intervals: AvlTree::new(),
            lookup: HashMap::new(),
            iter_request: None,
            stashed: Vec::new(),
            sentinel: PointId::default(),
        };
        planner.set_bound(plan_start, plan_duration);
        Ok(planner)
    }

    /// Destroys every reservation and rebuilds the sentinel. When `totals`
    /// is omitted the previous totals are preserved.
    pub fn reset(&mut self, plan_start: i64, plan_duration: i64, totals: Option<&[u64]>) -> Result<()> {
        if plan_start < 0 || plan_duration < 1 {
            return Err(Error::invalid("plan start must be non-negative and plan duration at least 1"));
        }
        if let Some(amounts) = totals {
            self.total = ResourceVector::from_amounts(amounts)?;
        }
        self.points.clear();
        self.by_time.clear();
        self.mintime.clear();
        self.spans.clear();
        self.intervals.clear();
        self.lookup.clear();
        self.stashed.clear();
        self.iter_request = None;
        self.set_bound(plan_start, plan_duration);
        Ok(())
    }

    fn set_bound(&mut self, plan_start: i64, plan_duration: i64) {
        self.plan_start = plan_start;
        self.plan_end = plan_start + plan_duration;
        let mut sentinel = ScheduledPoint::new(plan_start, &self.total);
        sentinel.ref_count = 1;
        sentinel.new_point = false;
        let id = self.points.insert(sentinel);
        self.by_time.insert(plan_start, id);
        self.mintime_insert(id);
        self.sentinel = id;
    }

    pub fn plan_start(&self) -> i64 {
        self.plan_start
    }

    pub fn plan_end(&self) -> i64 {
        self.plan_end
    }

    pub fn duration(&self) -> i64 {
        self.plan_end - self.plan_start
    }

    pub fn dim(&self) -> usize {
        self.total.len()
    }

    pub fn total(&self) -> &ResourceVector {
        &self.total
    }

    /// Names the resource dimensions. At most one name per dimension.
    pub fn set_resource_types(&mut self, types: &[&str]) -> Result<()> {
        if types.len() > self.total.len() {
            return Err(Error::invalid(format!("{} type names for {} dimensions", types.len(), self.total.len())));
        }
        self.resource_types = types.iter().map(|t| t.to_string()).collect();
        Ok(())
    }

    pub fn type_to_index(&self, rtype: &str) -> Option<usize> {
        self.resource_types.iter().position(|t| t == rtype)
    }

    pub fn index_to_type(&self, d: usize) -> Option<&str> {
        self.resource_types.get(d).map(String::as_str)
    }

    /// Earliest time at which `request` can be satisfied for its full
    /// duration, or `None` when no window fits within the planning span.
    ///
    /// Starts a fresh candidate iteration; [`Planner::avail_time_next`]
    /// resumes it. Candidate points handed out (or rejected) are stashed off
    /// the min-time index so every call returns a strictly later candidate;
    /// any mutating call restores them and invalidates the iteration.
    pub fn avail_time_first(&mut self, request: &PlanRequest) -> Result<Option<i64>> {
        self.restore_stashed_points();
        self.iter_request = Some(request.clone());
        self.avail_time_internal()
    }

    /// Next candidate time for the request given to the last
    /// [`Planner::avail_time_first`]. Fails with `InvalidArgument` when no
    /// iteration is in flight.
    pub fn avail_time_next(&mut self) -> Result<Option<i64>> {
        if self.iter_request.is_none() {
            return Err(Error::invalid("avail_time_next without a preceding avail_time_first"));
        }
        self.avail_time_internal()
    }

    fn avail_time_internal(&mut self) -> Result<Option<i64>> {
        let request = self.iter_request.clone().expect("iteration request present");
        if veccmp(request.vector(), &self.total) > 0 {
            self.iter_request = None;
            return Err(Error::out_of_range("request exceeds the planner total"));
        }
        let eff = if request.exclusive() { self.total } else { *request.vector() };

        loop {
            let Some(p) = earliest_point(&self.mintime, &self.points, &eff) else {
                return Ok(None);
            };
            let at = self.points[p].at;

            // The candidate governs the state at `at`; every later point
            // inside the window must also leave enough remaining.
            let mut satisfied = true;
            for (&t, &succ) in self.by_time.range((Excluded(at), Unbounded)) {
                if t - at >= request.duration() {
                    break;
                }
                if veccmp(&eff, &self.points[succ].remaining) > 0 {
                    satisfied = false;
                    break;
                }
            }

            self.mintime_remove(p);
            self.stashed.push(p);

            if satisfied {
                if self.plan_end - at >= request.duration() {
                    return Ok(Some(at));
                }
                // The earliest fit already overruns the planning span, so
                // no later candidate can do better.
                return Ok(None);
            }
        }
    }

    /// Whether `request` can be satisfied over `[start, start + duration)`.
    pub fn avail_during(&self, start: i64, request: &PlanRequest) -> Result<bool> {
        if start < 0 {
            return Err(Error::invalid(format!("start time must be non-negative, got {}", start)));
        }
        if veccmp(request.vector(), &self.total) > 0 {
            return Err(Error::out_of_range("request exceeds the planner total"));
        }
        let eff = if request.exclusive() { self.total } else { *request.vector() };

        let Some((_, &governing)) = self.by_time.range(..=start).next_back() else {
            return Err(Error::Unsupported(format!("time {} precedes the planning span", start)));
        };
        if veccmp(&eff, &self.points[governing].remaining) > 0 {
            return Ok(false);
        }
        for (&t, &succ) in self.by_time.range((Excluded(start), Unbounded)) {
            if t - start >= request.duration() {
                break;
            }
            if veccmp(&eff, &self.points[succ].remaining) > 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Adds a reservation of `amounts` over `[start, start + duration)`
    /// under the caller-assigned unique `id`.
    ///
    /// With `validate` set, the window is checked against the current state
    /// before anything is mutated; callers that just obtained the window
    /// from [`Planner::avail_time_first`] may skip the check.
    pub fn add_reservation(&mut self, id: i64, start: i64, duration: i64, amounts: &[u64], validate: bool) -> Result<()> {
        let request = PlanRequest::new(amounts, duration, false)?;
        if start < self.plan_start {
            return Err(Error::invalid(format!("reservation start {} precedes the plan start {}", start, self.plan_start)));
        }
        let last = start + duration;
        if last > self.plan_end {
            return Err(Error::invalid(format!("reservation end {} extends past the plan end {}", last, self.plan_end)));
        }
        if !request.vector().within(&self.total) {
            return Err(Error::out_of_range("reservation exceeds the planner total in some dimension"));
        }
        if self.lookup.contains_key(&id) {
            return Err(Error::AlreadyExists(format!("reservation id {}", id)));
        }
        if validate && !self.avail_during(start, &request)? {
            return Err(Error::out_of_range(format!("window [{}, {}) is not available", start, last)));
        }

        self.restore_stashed_points();

        let req = *request.vector();
        let mut touched: Vec<PointId> = Vec::new();
        let mut tracked: HashSet<PointId> = HashSet::new();

        // Obtain or create the two endpoint points. Only the start point
        // carries this reservation's own contribution; the claim is over
        // the half-open window.
        let start_p = self.attach_point(start);
        {
            let point = &mut self.points[start_p];
            point.scheduled.add(&req);
            point.remaining.sub(&req);
        }
        let last_p = self.attach_point(last);
        self.points[start_p].ref_count += 1;
        self.points[last_p].ref_count += 1;
        for p in [start_p, last_p] {
            if tracked.insert(p) {
                touched.push(p);
            }
        }

        // Pairwise interior updates against every established reservation
        // whose window intersects the new one.
        for sid in overlapping(&self.intervals, &self.spans, start, last) {
            let (o_start, o_last, o_req, o_start_p, o_last_p) = {
                let other = &self.spans[sid];
                (other.start, other.last, other.req, other.start_p, other.last_p)
            };

            // Endpoints of the established reservation that fall strictly
            // inside the new window take on the new contribution, once.
            for (t, p) in [(o_start, o_start_p), (o_last, o_last_p)] {
                if start < t && t < last && tracked.insert(p) {
                    touched.push(p);
                    let point = &mut self.points[p];
                    point.scheduled.add(&req);
                    point.remaining.sub(&req);
                }
            }

            // A freshly created endpoint started from a blank state and must
            // accumulate the contribution of every established reservation
            // covering it. Pre-existing endpoints already carry them.
            for (t, p) in [(start, start_p), (last, last_p)] {
                if o_start < t && t < o_last && self.points[p].new_point {
                    let point = &mut self.points[p];
                    point.scheduled.add(&o_req);
                    point.remaining.sub(&o_req);
                }
            }
        }
        self.points[start_p].new_point = false;
        self.points[last_p].new_point = false;

        for &p in &touched {
            if !self.points[p].scheduled.within(&self.total) {
                return Err(Error::conflict(format!("scheduled resources at t={} left the [0, total] range", self.points[p].at)));
            }
        }
        self.reindex(&touched);

        let sid = self.spans.insert(Span { id, start, last, req, added: true, start_p, last_p });
        {
            let ops = IntervalOps { spans: &self.spans };
            self.intervals.insert(&ops, sid);
        }
        self.lookup.insert(id, sid);
        log::trace!("planner: added reservation {} over [{}, {}) for {}", id, start, last, req);
        Ok(())
    }

    /// Withdraws the reservation registered under `id`.
    pub fn remove_reservation(&mut self, id: i64) -> Result<()> {
        let Some(&sid) = self.lookup.get(&id) else {
            return Err(Error::NotFound(format!("reservation id {}", id)));
        };

        self.restore_stashed_points();

        let (start, last, req, start_p, last_p) = {
            let span = &self.spans[sid];
            (span.start, span.last, span.req, span.start_p, span.last_p)
        };

        let mut touched: Vec<PointId> = Vec::new();
        let mut tracked: HashSet<PointId> = HashSet::new();

        {
            let point = &mut self.points[start_p];
            point.scheduled.sub(&req);
            point.remaining.add(&req);
            point.ref_count -= 1;
        }
        self.points[last_p].ref_count -= 1;
        for (t, p) in [(start, start_p), (last, last_p)] {
            if tracked.insert(p) {
                touched.push(p);
            }
            if self.points[p].ref_count == 0 {
                self.by_time.remove(&t);
            }
        }

        // Take the reservation out of the interval tree first so the overlap
        // scan only yields the established neighbours.
        {
            let ops = IntervalOps { spans: &self.spans };
            self.intervals.remove(&ops, sid);
        }

        for other_sid in overlapping(&self.intervals, &self.spans, start, last) {
            let (o_start, o_last, o_start_p, o_last_p) = {
                let other = &self.spans[other_sid];
                (other.start, other.last, other.start_p, other.last_p)
            };
            for (t, p) in [(o_start, o_start_p), (o_last, o_last_p)] {
                if start < t && t < last && tracked.insert(p) {
                    touched.push(p);
                    let point = &mut self.points[p];
                    point.scheduled.sub(&req);
                    point.remaining.add(&req);
                }
            }
        }

        for &p in &touched {
            if self.points[p].in_mintime {
                self.mintime_remove(p);
            }
            if self.points[p].ref_count > 0 {
                self.mintime_insert(p);
            } else {
                self.points.remove(p);
            }
        }

        self.lookup.remove(&id);
        self.spans.remove(sid);
        log::trace!("planner: removed reservation {} over [{}, {})", id, start, last);
        Ok(())
    }

    pub fn contains_reservation(&self, id: i64) -> bool {
        self.lookup.contains_key(&id)
    }

    pub fn reservation_count(&self) -> usize {
        self.spans.len()
    }

    /// The `[start, last)` window of a registered reservation.
    pub fn reservation_window(&self, id: i64) -> Option<(i64, i64)> {
        self.lookup.get(&id).map(|&sid| (self.spans[sid].start, self.spans[sid].last))
    }

    pub fn reservation_amounts(&self, id: i64) -> Option<Vec<i64>> {
        self.lookup.get(&id).map(|&sid| self.spans[sid].req.as_slice().to_vec())
    }

    /// Registered reservation ids ordered by start time.
    pub fn reservation_ids(&self) -> Vec<i64> {
        self.intervals.in_order().into_iter().map(|sid| self.spans[sid].id).collect()
    }

    /// Scheduled points in time order.
    pub fn points_in_order(&self) -> impl Iterator<Item = &ScheduledPoint> + '_ {
        self.by_time.values().map(|&p| &self.points[p])
    }

    pub fn point_count(&self) -> usize {
        self.by_time.len()
    }

    fn attach_point(&mut self, at: i64) -> PointId {
        if let Some(&p) = self.by_time.get(&at) {
            return p;
        }
        let id = self.points.insert(ScheduledPoint::new(at, &self.total));
        self.by_time.insert(at, id);
        id
    }

    fn mintime_insert(&mut self, id: PointId) {
        {
            let ops = MinTimeOps { points: &self.points };
            self.mintime.insert(&ops, id);
        }
        self.points[id].in_mintime = true;
    }

    fn mintime_remove(&mut self, id: PointId) {
        {
            let ops = MinTimeOps { points: &self.points };
            self.mintime.remove(&ops, id);
        }
        self.points[id].in_mintime = false;
    }

    /// Re-seats every touched point in the min-time index under its updated
    /// remaining-resource key. Points no longer referenced stay out.
    fn reindex(&mut self, touched: &[PointId]) {
        for &p in touched {
            if self.points[p].in_mintime {
                self.mintime_remove(p);
            }
            if self.points[p].ref_count > 0 && !self.points[p].in_mintime {
                self.mintime_insert(p);
            }
        }
    }

    /// Puts stashed availability-iteration candidates back into the
    /// min-time index and drops the iteration state.
    fn restore_stashed_points(&mut self) {
        let stashed = std::mem::take(&mut self.stashed);
        for p in stashed {
            if self.points.contains_key(p) && !self.points[p].in_mintime {
                self.mintime_insert(p);
            }
        }
        self.iter_request = None;
    }

    /// Full structural audit of the planner: point accounting, reference
    /// counts, index membership, and the augmentations of both trees.
    pub fn self_check(&self) -> Result<()> {
        let mut refs: HashMap<PointId, u32> = HashMap::new();
        *refs.entry(self.sentinel).or_insert(0) += 1;
        for (_, span) in &self.spans {
            *refs.entry(span.start_p).or_insert(0) += 1;
            *refs.entry(span.last_p).or_insert(0) += 1;
            if !span.added {
                return Err(Error::conflict(format!("reservation {} is registered but not added", span.id)));
            }
            if span.start >= span.last {
                return Err(Error::conflict(format!("reservation {} has an empty window", span.id)));
            }
        }

        let mut prev_at: Option<i64> = None;
        for (&at, &p) in &self.by_time {
            let point = &self.points[p];
            if point.at != at {
                return Err(Error::conflict("point map key disagrees with the point time"));
            }
            if let Some(prev) = prev_at {
                if prev >= at {
                    return Err(Error::conflict("point map is out of order"));
                }
            }
            prev_at = Some(at);

            for d in 0..MAX_RESOURCE_DIM {
                if point.scheduled.get(d) + point.remaining.get(d) != self.total.get(d) {
                    return Err(Error::conflict(format!("scheduled + remaining != total at t={}", at)));
                }
                if point.scheduled.get(d) < 0 || point.scheduled.get(d) > self.total.get(d) {
                    return Err(Error::conflict(format!("scheduled resources out of bounds at t={}", at)));
                }
            }

            // Recompute the expected contribution sum over this point.
            let mut scheduled = ResourceVector::zero(self.total.len());
            for (_, span) in &self.spans {
                if span.start <= at && at < span.last {
                    scheduled.add(&span.req);
                }
            }
            if scheduled != point.scheduled {
                return Err(Error::conflict(format!("scheduled resources at t={} disagree with the reservation set", at)));
            }

            let expected_refs = refs.get(&p).copied().unwrap_or(0);
            if point.ref_count != expected_refs {
                return Err(Error::conflict(format!("reference count at t={} is {}, expected {}", at, point.ref_count, expected_refs)));
            }
            if point.ref_count == 0 {
                return Err(Error::conflict(format!("unreferenced point at t={} survived", at)));
            }
            if self.stashed.is_empty() && !point.in_mintime {
                return Err(Error::conflict(format!("point at t={} is missing from the min-time index", at)));
            }
            if point.in_mintime != self.mintime.contains(p) {
                return Err(Error::conflict(format!("min-time membership flag is stale at t={}", at)));
            }
        }

        if self.points.len() != self.by_time.len() {
            return Err(Error::conflict("point arena and point map diverged"));
        }
        if !self.points.contains_key(self.sentinel) {
            return Err(Error::conflict("sentinel point was destroyed"));
        }

        let point_ops = MinTimeOps { points: &self.points };
        self.mintime.audit(&point_ops).map_err(Error::Conflict)?;
        let span_ops = IntervalOps { spans: &self.spans };
        self.intervals.audit(&span_ops).map_err(Error::Conflict)?;
        Ok(())
    }
}

impl fmt::Display for Planner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "planner [{}, {}] total {}", self.plan_start, self.plan_end, self.total)?;
        for point in self.points_in_order() {
            writeln!(f, "  point t={} scheduled {} remaining {} refs {}", point.at, point.scheduled, point.remaining, point.ref_count)?;
        }
        for id in self.reservation_ids() {
            let (start, last) = self.reservation_window(id).expect("listed reservation exists");
            writeln!(f, "  reservation {} over [{}, {})", id, start, last)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn planner_1d(total: u64, duration: i64) -> Planner {
        Planner::new(0, duration, &[total]).unwrap()
    }

    #[test]
    fn sentinel_only_after_construction() {
        let planner = planner_1d(1, 10);
        assert_eq!(planner.point_count(), 1);
        let sentinel = planner.points_in_order().next().unwrap();
        assert_eq!(sentinel.at, 0);
        assert_eq!(sentinel.ref_count, 1);
        planner.self_check().unwrap();
    }

    #[test]
    fn fills_and_finds_gaps_like_the_reference_sequence() {
        // Five back-to-back windows of two fill {<1>, 0..10} completely.
        let mut planner = planner_1d(1, 10);
        for i in 0..5 {
            let request = PlanRequest::new(&[1], 2, false).unwrap();
            let at = planner.avail_time_first(&request).unwrap().unwrap();
            assert_eq!(at, 2 * i);
            planner.add_reservation(i, at, 2, &[1], true).unwrap();
        }
        planner.self_check().unwrap();

        planner.remove_reservation(1).unwrap();
        planner.remove_reservation(2).unwrap();
        planner.self_check().unwrap();

        let request = PlanRequest::new(&[1], 2, false).unwrap();
        assert_eq!(planner.avail_time_first(&request).unwrap(), Some(2));
        assert_eq!(planner.avail_time_next().unwrap(), None);

        assert!(planner.avail_during(2, &request).unwrap());
        assert!(planner.avail_during(3, &request).unwrap());
        assert!(planner.avail_during(4, &request).unwrap());
        assert!(!planner.avail_during(5, &request).unwrap());

        let four = PlanRequest::new(&[1], 4, false).unwrap();
        assert_eq!(planner.avail_time_first(&four).unwrap(), Some(2));
        let five = PlanRequest::new(&[1], 5, false).unwrap();
        assert_eq!(planner.avail_time_first(&five).unwrap(), None);

        planner.add_reservation(10, 3, 2, &[1], true).unwrap();
        let two = PlanRequest::new(&[1], 2, false).unwrap();
        assert_eq!(planner.avail_time_first(&two).unwrap(), None);
        planner.self_check().unwrap();
    }

    #[test]
    fn mutation_invalidates_the_avail_iteration() {
        let mut planner = planner_1d(2, 10);
        let request = PlanRequest::new(&[1], 2, false).unwrap();
        assert_eq!(planner.avail_time_first(&request).unwrap(), Some(0));
        planner.add_reservation(7, 0, 2, &[1], true).unwrap();
        assert!(matches!(planner.avail_time_next(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut planner = planner_1d(2, 10);
        planner.add_reservation(1, 0, 2, &[1], true).unwrap();
        assert!(matches!(planner.add_reservation(1, 4, 2, &[1], true), Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn add_remove_is_a_point_set_noop() {
        let mut planner = planner_1d(4, 100);
        planner.add_reservation(1, 10, 30, &[2], true).unwrap();
        let before: Vec<i64> = planner.points_in_order().map(|p| p.at).collect();

        planner.add_reservation(2, 20, 30, &[1], true).unwrap();
        planner.remove_reservation(2).unwrap();

        let after: Vec<i64> = planner.points_in_order().map(|p| p.at).collect();
        assert_eq!(before, after);
        planner.self_check().unwrap();

        planner.remove_reservation(1).unwrap();
        assert_eq!(planner.point_count(), 1);
        planner.self_check().unwrap();
    }
}
