use slotmap::new_key_type;

use crate::domain::planner::point::PointId;
use crate::domain::planner::vector::ResourceVector;

new_key_type! {
    /// Arena handle of a reservation.
    pub struct SpanId;
}

/// A held claim of `req` units over `[start, last)`.
///
/// The endpoint handles are weak back-references to the scheduled points at
/// `start` and `last`; they exist to decrement reference counts on removal
/// and carry no ownership.
#[derive(Debug, Clone)]
pub struct Span {
    /// Caller-assigned unique reservation id.
    pub id: i64,
    pub start: i64,
    pub last: i64,
    /// Required resources, one entry per planner dimension.
    pub req: ResourceVector,
    /// Set while the reservation is linked into the interval tree.
    pub added: bool,
    pub start_p: PointId,
    pub last_p: PointId,
}
