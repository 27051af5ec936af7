use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

/// A composite resource request mirroring the tree shape a job needs.
///
/// Each node asks for `qty` resources of `rtype`, each consuming `size`
/// units (0 means "any available"), optionally exclusively, optionally over
/// the window `[start, end]`. A window of `start == end == 0` restricts the
/// match to the present moment using the live availability counters; any
/// other window is answered by the matched resource's planner.
///
/// During a search every node accumulates `nfound`; the request is fully
/// satisfied when every node found at least its required quantity.
#[derive(Debug, Clone)]
pub struct Request {
    rtype: String,
    qty: i64,
    size: u64,
    exclusive: bool,
    start: i64,
    end: i64,
    properties: BTreeMap<String, String>,
    tags: BTreeSet<String>,
    children: Vec<Request>,
    nfound: i64,
}

impl Request {
    /// A `size` above one combined with exclusivity is contradictory (an
    /// exclusive claim always takes the whole resource) and is rejected.
    pub fn new(rtype: impl Into<String>, qty: i64, size: u64, exclusive: bool) -> Result<Request> {
        if qty < 1 {
            return Err(Error::invalid(format!("request quantity must be at least 1, got {}", qty)));
        }
        if exclusive && size > 1 {
            return Err(Error::invalid("exclusive request with size above 1"));
        }
        Ok(Request {
            rtype: rtype.into(),
            qty,
            size,
            exclusive,
            start: 0,
            end: 0,
            properties: BTreeMap::new(),
            tags: BTreeSet::new(),
            children: Vec::new(),
            nfound: 0,
        })
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Request {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Request {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_window(mut self, start: i64, end: i64) -> Request {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_child(mut self, child: Request) -> Request {
        self.children.push(child);
        self
    }

    pub fn rtype(&self) -> &str {
        &self.rtype
    }

    pub fn qty(&self) -> i64 {
        self.qty
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn start(&self) -> i64 {
        self.start
    }

    pub fn end(&self) -> i64 {
        self.end
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn children(&self) -> &[Request] {
        &self.children
    }

    pub fn children_mut(&mut self) -> &mut [Request] {
        &mut self.children
    }

    /// Moves the whole request tree onto a new time window.
    pub fn set_window(&mut self, start: i64, end: i64) {
        self.start = start;
        self.end = end;
        for child in &mut self.children {
            child.set_window(start, end);
        }
    }

    pub fn nfound(&self) -> i64 {
        self.nfound
    }

    pub fn add_found(&mut self, n: i64) {
        self.nfound += n;
    }

    pub fn set_found(&mut self, n: i64) {
        self.nfound = n;
    }

    /// Zeroes the found counters across the whole tree.
    pub fn clear_found(&mut self) {
        self.nfound = 0;
        for child in &mut self.children {
            child.clear_found();
        }
    }

    /// True when every node of the tree found its required quantity.
    pub fn all_found(&self) -> bool {
        self.nfound >= self.qty && self.children.iter().all(Request::all_found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_exclusive_with_size_above_one() {
        assert!(Request::new("node", 1, 2, true).is_err());
        assert!(Request::new("node", 1, 1, true).is_ok());
        assert!(Request::new("node", 1, 0, false).is_ok());
    }

    #[test]
    fn all_found_needs_every_level() {
        let mut request = Request::new("node", 2, 0, false).unwrap().with_child(Request::new("core", 4, 1, true).unwrap());
        assert!(!request.all_found());
        request.add_found(2);
        assert!(!request.all_found());
        request.children_mut()[0].add_found(4);
        assert!(request.all_found());
        request.clear_found();
        assert!(!request.all_found());
    }
}
