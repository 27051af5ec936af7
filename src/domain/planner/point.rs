use slotmap::new_key_type;

use crate::domain::planner::vector::ResourceVector;

new_key_type! {
    /// Arena handle of a scheduled point.
    pub struct PointId;
}

/// A time at which the planner's resource state changes.
///
/// A point exists while at least one reservation starts or ends at its time,
/// or while it is the sentinel at the planning span's start. `scheduled` and
/// `remaining` always partition the planner total: for every dimension,
/// `scheduled[d] + remaining[d] == total[d]`.
#[derive(Debug, Clone)]
pub struct ScheduledPoint {
    /// Resource-state changing time.
    pub at: i64,
    /// Resources in use from `at` until the next point.
    pub scheduled: ResourceVector,
    /// Resources still available from `at` until the next point.
    pub remaining: ResourceVector,
    /// Number of reservations whose start or last instant equals `at`.
    pub ref_count: u32,
    /// Set while the point is linked into the min-time resource index.
    pub in_mintime: bool,
    /// Set between creation and the end of the add that created the point.
    pub new_point: bool,
}

impl ScheduledPoint {
    pub fn new(at: i64, total: &ResourceVector) -> ScheduledPoint {
        ScheduledPoint { at, scheduled: ResourceVector::zero(total.len()), remaining: *total, ref_count: 0, in_mintime: false, new_point: true }
    }
}
