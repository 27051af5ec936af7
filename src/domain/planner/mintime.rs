use slotmap::SlotMap;
use std::cmp::Ordering;

use crate::domain::planner::avl::{AvlOps, AvlTree};
use crate::domain::planner::point::{PointId, ScheduledPoint};
use crate::domain::planner::vector::{ResourceVector, veccmp, veccmp_order};

/// Callbacks of the min-time resource index: points ordered by the
/// remaining-resource vector (ties to the right), augmented with the minimum
/// point time of the subtree.
pub struct MinTimeOps<'a> {
    pub points: &'a SlotMap<PointId, ScheduledPoint>,
}

impl AvlOps<PointId> for MinTimeOps<'_> {
    fn cmp(&self, a: PointId, b: PointId) -> Ordering {
        veccmp_order(&self.points[a].remaining, &self.points[b].remaining)
    }

    fn value(&self, h: PointId) -> i64 {
        self.points[h].at
    }

    fn fold(&self, a: i64, b: i64) -> i64 {
        a.min(b)
    }
}

/// Finds the earliest scheduled point whose remaining resources satisfy
/// `eff`, or `None` when no linked point qualifies.
///
/// Two passes over one root-to-leaf region: the anchor pass walks down the
/// tree keeping the deepest node whose remaining vector satisfies the request
/// and whose right-branch minimum time is smallest; the descent pass then
/// follows the `subtree_min_t` augmentation from the anchor to the point
/// carrying that minimum time.
pub fn earliest_point(tree: &AvlTree<PointId>, points: &SlotMap<PointId, ScheduledPoint>, eff: &ResourceVector) -> Option<PointId> {
    let mut node = tree.root();
    let mut anchor = None;
    let mut mintm = i64::MAX;

    while let Some(id) = node {
        let point = &points[tree.handle(id)];
        if veccmp(eff, &point.remaining) <= 0 {
            // This node satisfies the request, and so does everything on its
            // right branch; the candidate minimum is the smaller of this
            // point's time and the right subtree's minimum.
            let r_mintm = match tree.right(id) {
                Some(r) => point.at.min(tree.aug(r)),
                None => point.at,
            };
            if r_mintm < mintm {
                mintm = r_mintm;
                anchor = Some(id);
            }
            // The left subtree may still hold an earlier satisfying point.
            node = tree.left(id);
        } else {
            node = tree.right(id);
        }
    }

    let anchor = anchor?;
    if points[tree.handle(anchor)].at == mintm {
        return Some(tree.handle(anchor));
    }
    let mut node = tree.right(anchor);
    while let Some(id) = node {
        let handle = tree.handle(id);
        if points[handle].at == mintm {
            return Some(handle);
        }
        node = match tree.left(id) {
            Some(l) if tree.aug(l) == mintm => Some(l),
            _ => tree.right(id),
        };
    }

    // An anchor guarantees a point carrying the minimum exists.
    None
}
