use slotmap::SlotMap;
use std::cmp::Ordering;

use crate::domain::planner::avl::{AvlNodeId, AvlOps, AvlTree};
use crate::domain::planner::span::{Span, SpanId};

/// Callbacks of the reservation interval tree: reservations ordered by start
/// time (ties to the right), augmented with the maximum last instant of the
/// subtree.
pub struct IntervalOps<'a> {
    pub spans: &'a SlotMap<SpanId, Span>,
}

impl AvlOps<SpanId> for IntervalOps<'_> {
    fn cmp(&self, a: SpanId, b: SpanId) -> Ordering {
        self.spans[a].start.cmp(&self.spans[b].start)
    }

    fn value(&self, h: SpanId) -> i64 {
        self.spans[h].last
    }

    fn fold(&self, a: i64, b: i64) -> i64 {
        a.max(b)
    }
}

/// Collects, in start order, every reservation whose `[start, last]` range
/// intersects `[lo, hi]`. Subtrees whose maximum last instant falls before
/// `lo` are pruned, as are right branches once the start keys exceed `hi`.
pub fn overlapping(tree: &AvlTree<SpanId>, spans: &SlotMap<SpanId, Span>, lo: i64, hi: i64) -> Vec<SpanId> {
    let mut out = Vec::new();
    if let Some(root) = tree.root() {
        if tree.aug(root) >= lo {
            collect(tree, spans, root, lo, hi, &mut out);
        }
    }
    out
}

fn collect(tree: &AvlTree<SpanId>, spans: &SlotMap<SpanId, Span>, id: AvlNodeId, lo: i64, hi: i64, out: &mut Vec<SpanId>) {
    if let Some(l) = tree.left(id) {
        if tree.aug(l) >= lo {
            collect(tree, spans, l, lo, hi, out);
        }
    }
    let handle = tree.handle(id);
    let span = &spans[handle];
    if span.start <= hi {
        if span.last >= lo {
            out.push(handle);
        }
        if let Some(r) = tree.right(id) {
            if tree.aug(r) >= lo {
                collect(tree, spans, r, lo, hi, out);
            }
        }
    }
}
