use slotmap::{Key, SecondaryMap, SlotMap, new_key_type};
use std::cmp::Ordering;

new_key_type! {
    pub struct AvlNodeId;
}

/// Ordering and augmentation callbacks for one [`AvlTree`] instance.
///
/// The tree stores arena handles, not payloads; every structural decision is
/// delegated here so the node data can live in the owning arena. `fold` and
/// `value` define the subtree augmentation: after any link change (insert,
/// erase, rotation) a node's augment is recomputed as
/// `fold(value(handle), fold(aug(left), aug(right)))`. Keeping the recompute
/// inside the tree guarantees the augmentation can never go stale between
/// rotations.
pub trait AvlOps<H> {
    /// Three-way key comparison behind two handles. Equal keys are allowed;
    /// they are placed in the right subtree.
    fn cmp(&self, a: H, b: H) -> Ordering;

    /// The node's own contribution to the subtree augmentation.
    fn value(&self, h: H) -> i64;

    /// Combines two augmentation values (min or max in this crate).
    fn fold(&self, a: i64, b: i64) -> i64;
}

#[derive(Debug, Clone, Copy)]
struct AvlNode<H> {
    handle: H,
    parent: Option<AvlNodeId>,
    left: Option<AvlNodeId>,
    right: Option<AvlNodeId>,
    height: i32,
    aug: i64,
}

/// A self-balancing search tree over arena handles with a single `i64`
/// subtree augmentation.
///
/// Duplicate keys are supported; a handle is located for removal through a
/// direct handle index rather than by key search, so a node can always be
/// detached even when many nodes share its key. Callers must detach a handle
/// before mutating the key material it compares by.
#[derive(Debug)]
pub struct AvlTree<H: Key> {
    nodes: SlotMap<AvlNodeId, AvlNode<H>>,
    index: SecondaryMap<H, AvlNodeId>,
    root: Option<AvlNodeId>,
}

impl<H: Key> Default for AvlTree<H> {
    fn default() -> Self {
        AvlTree::new()
    }
}

impl<H: Key> AvlTree<H> {
    pub fn new() -> AvlTree<H> {
        AvlTree { nodes: SlotMap::with_key(), index: SecondaryMap::new(), root: None }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.index.clear();
        self.root = None;
    }

    pub fn contains(&self, handle: H) -> bool {
        self.index.contains_key(handle)
    }

    pub fn root(&self) -> Option<AvlNodeId> {
        self.root
    }

    pub fn handle(&self, id: AvlNodeId) -> H {
        self.nodes[id].handle
    }

    pub fn left(&self, id: AvlNodeId) -> Option<AvlNodeId> {
        self.nodes[id].left
    }

    pub fn right(&self, id: AvlNodeId) -> Option<AvlNodeId> {
        self.nodes[id].right
    }

    pub fn aug(&self, id: AvlNodeId) -> i64 {
        self.nodes[id].aug
    }

    /// Inserts `handle`. The caller guarantees it is not already present.
    pub fn insert(&mut self, ops: &impl AvlOps<H>, handle: H) {
        debug_assert!(!self.index.contains_key(handle), "handle inserted twice");
        let id = self.nodes.insert(AvlNode { handle, parent: None, left: None, right: None, height: 1, aug: ops.value(handle) });
        self.index.insert(handle, id);

        let Some(mut cur) = self.root else {
            self.root = Some(id);
            return;
        };
        loop {
            let go_left = ops.cmp(handle, self.nodes[cur].handle) == Ordering::Less;
            let next = if go_left { self.nodes[cur].left } else { self.nodes[cur].right };
            match next {
                Some(n) => cur = n,
                None => {
                    if go_left {
                        self.nodes[cur].left = Some(id);
                    } else {
                        self.nodes[cur].right = Some(id);
                    }
                    self.nodes[id].parent = Some(cur);
                    break;
                }
            }
        }
        self.rebalance_upward(ops, Some(cur));
    }

    /// Detaches `handle` from the tree. Returns false when it was not linked.
    pub fn remove(&mut self, ops: &impl AvlOps<H>, handle: H) -> bool {
        let Some(id) = self.index.remove(handle) else {
            return false;
        };

        // A node with two children swaps payloads with its in-order
        // successor so the physical unlink always happens at a node with at
        // most one child.
        let target = if self.nodes[id].left.is_some() && self.nodes[id].right.is_some() {
            let succ = self.leftmost(self.nodes[id].right.unwrap());
            let succ_handle = self.nodes[succ].handle;
            self.nodes[id].handle = succ_handle;
            self.index.insert(succ_handle, id);
            self.nodes[succ].handle = handle;
            succ
        } else {
            id
        };

        let child = self.nodes[target].left.or(self.nodes[target].right);
        let parent = self.nodes[target].parent;
        self.replace_child(parent, target, child);
        if let Some(c) = child {
            self.nodes[c].parent = parent;
        }
        self.nodes.remove(target);
        self.rebalance_upward(ops, parent);
        true
    }

    /// Handles in key order.
    pub fn in_order(&self) -> Vec<H> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = Vec::new();
        let mut cur = self.root;
        while cur.is_some() || !stack.is_empty() {
            while let Some(id) = cur {
                stack.push(id);
                cur = self.nodes[id].left;
            }
            let id = stack.pop().expect("stack drained while non-empty");
            out.push(self.nodes[id].handle);
            cur = self.nodes[id].right;
        }
        out
    }

    fn leftmost(&self, mut id: AvlNodeId) -> AvlNodeId {
        while let Some(l) = self.nodes[id].left {
            id = l;
        }
        id
    }

    fn height_of(&self, id: Option<AvlNodeId>) -> i32 {
        id.map_or(0, |n| self.nodes[n].height)
    }

    fn replace_child(&mut self, parent: Option<AvlNodeId>, old: AvlNodeId, new: Option<AvlNodeId>) {
        match parent {
            None => self.root = new,
            Some(p) => {
                if self.nodes[p].left == Some(old) {
                    self.nodes[p].left = new;
                } else {
                    debug_assert_eq!(self.nodes[p].right, Some(old));
                    self.nodes[p].right = new;
                }
            }
        }
    }

    /// Recomputes height and augmentation of `id` from its children.
    fn update(&mut self, ops: &impl AvlOps<H>, id: AvlNodeId) {
        let left = self.nodes[id].left;
        let right = self.nodes[id].right;
        let mut aug = ops.value(self.nodes[id].handle);
        if let Some(l) = left {
            aug = ops.fold(aug, self.nodes[l].aug);
        }
        if let Some(r) = right {
            aug = ops.fold(aug, self.nodes[r].aug);
        }
        self.nodes[id].height = 1 + self.height_of(left).max(self.height_of(right));
        self.nodes[id].aug = aug;
    }

    fn rotate_left(&mut self, ops: &impl AvlOps<H>, x: AvlNodeId) -> AvlNodeId {
        let r = self.nodes[x].right.expect("rotate_left without right child");
        let rl = self.nodes[r].left;
        let parent = self.nodes[x].parent;

        self.nodes[x].right = rl;
        if let Some(rl) = rl {
            self.nodes[rl].parent = Some(x);
        }
        self.nodes[r].left = Some(x);
        self.nodes[x].parent = Some(r);
        self.nodes[r].parent = parent;
        self.replace_child(parent, x, Some(r));

        self.update(ops, x);
        self.update(ops, r);
        r
    }

    fn rotate_right(&mut self, ops: &impl AvlOps<H>, x: AvlNodeId) -> AvlNodeId {
        let l = self.nodes[x].left.expect("rotate_right without left child");
        let lr = self.nodes[l].right;
        let parent = self.nodes[x].parent;

        self.nodes[x].left = lr;
        if let Some(lr) = lr {
            self.nodes[lr].parent = Some(x);
        }
        self.nodes[l].right = Some(x);
        self.nodes[x].parent = Some(l);
        self.nodes[l].parent = parent;
        self.replace_child(parent, x, Some(l));

        self.update(ops, x);
        self.update(ops, l);
        l
    }

    /// Restores the AVL balance at `id`, returning the subtree root after
    /// any rotation.
    fn restore_balance(&mut self, ops: &impl AvlOps<H>, id: AvlNodeId) -> AvlNodeId {
        let bf = self.height_of(self.nodes[id].left) - self.height_of(self.nodes[id].right);
        if bf > 1 {
            let l = self.nodes[id].left.unwrap();
            if self.height_of(self.nodes[l].left) < self.height_of(self.nodes[l].right) {
                self.rotate_left(ops, l);
            }
            self.rotate_right(ops, id)
        } else if bf < -1 {
            let r = self.nodes[id].right.unwrap();
            if self.height_of(self.nodes[r].right) < self.height_of(self.nodes[r].left) {
                self.rotate_right(ops, r);
            }
            self.rotate_left(ops, id)
        } else {
            id
        }
    }

    fn rebalance_upward(&mut self, ops: &impl AvlOps<H>, start: Option<AvlNodeId>) {
        let mut cur = start;
        while let Some(id) = cur {
            self.update(ops, id);
            let id = self.restore_balance(ops, id);
            cur = self.nodes[id].parent;
        }
    }

    /// Structural audit: parent links, AVL balance and augmentation values.
    /// Used by the planner's self check and the tests.
    pub fn audit(&self, ops: &impl AvlOps<H>) -> std::result::Result<(), String> {
        if let Some(root) = self.root {
            if self.nodes[root].parent.is_some() {
                return Err("root has a parent".to_string());
            }
            self.audit_node(ops, root)?;
        }
        if self.index.iter().count() != self.nodes.len() {
            return Err("handle index out of sync with node arena".to_string());
        }
        Ok(())
    }

    fn audit_node(&self, ops: &impl AvlOps<H>, id: AvlNodeId) -> std::result::Result<(i32, i64), String> {
        let node = &self.nodes[id];
        let mut aug = ops.value(node.handle);
        let mut lh = 0;
        let mut rh = 0;
        if let Some(l) = node.left {
            if self.nodes[l].parent != Some(id) {
                return Err("broken parent link".to_string());
            }
            if ops.cmp(self.nodes[l].handle, node.handle) == Ordering::Greater {
                return Err("left child key exceeds parent key".to_string());
            }
            let (h, a) = self.audit_node(ops, l)?;
            lh = h;
            aug = ops.fold(aug, a);
        }
        if let Some(r) = node.right {
            if self.nodes[r].parent != Some(id) {
                return Err("broken parent link".to_string());
            }
            if ops.cmp(self.nodes[r].handle, node.handle) == Ordering::Less {
                return Err("right child key below parent key".to_string());
            }
            let (h, a) = self.audit_node(ops, r)?;
            rh = h;
            aug = ops.fold(aug, a);
        }
        if (lh - rh).abs() > 1 {
            return Err(format!("unbalanced node (left height {}, right height {})", lh, rh));
        }
        if node.height != 1 + lh.max(rh) {
            return Err("stale height".to_string());
        }
        if node.aug != aug {
            return Err(format!("stale augmentation: stored {}, recomputed {}", node.aug, aug));
        }
        Ok((node.height, node.aug))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    new_key_type! {
        struct ItemId;
    }

    struct ByValue<'a> {
        items: &'a SlotMap<ItemId, i64>,
    }

    impl AvlOps<ItemId> for ByValue<'_> {
        fn cmp(&self, a: ItemId, b: ItemId) -> Ordering {
            self.items[a].cmp(&self.items[b])
        }
        fn value(&self, h: ItemId) -> i64 {
            self.items[h]
        }
        fn fold(&self, a: i64, b: i64) -> i64 {
            a.max(b)
        }
    }

    #[test]
    fn insert_remove_keeps_order_and_augments() {
        let mut items: SlotMap<ItemId, i64> = SlotMap::with_key();
        let mut tree: AvlTree<ItemId> = AvlTree::new();
        let values = [40, 10, 70, 10, 55, 1, 92, 31, 70, 18];
        let mut handles = Vec::new();
        for v in values {
            let h = items.insert(v);
            handles.push(h);
            let ops = ByValue { items: &items };
            tree.insert(&ops, h);
            tree.audit(&ops).unwrap();
        }

        let ops = ByValue { items: &items };
        let ordered: Vec<i64> = tree.in_order().into_iter().map(|h| items[h]).collect();
        let mut expected = values.to_vec();
        expected.sort_unstable();
        assert_eq!(ordered, expected);
        assert_eq!(tree.aug(tree.root().unwrap()), 92);

        for h in handles {
            assert!(tree.remove(&ops, h));
            tree.audit(&ops).unwrap();
        }
        assert!(tree.is_empty());
    }

    #[test]
    fn removing_unlinked_handle_is_a_noop() {
        let mut items: SlotMap<ItemId, i64> = SlotMap::with_key();
        let mut tree: AvlTree<ItemId> = AvlTree::new();
        let h = items.insert(5);
        let ops = ByValue { items: &items };
        assert!(!tree.remove(&ops, h));
        tree.insert(&ops, h);
        assert!(tree.remove(&ops, h));
        assert!(!tree.remove(&ops, h));
    }
}
