use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::resource::tree::{ResourceTree, Shadow};
use crate::error::{Error, Result};

/// One element of the persisted `rdl.alloc` array: which broker rank
/// contains the node and how many cores the job takes on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainEntry {
    pub containing_rank: u32,
    pub ncores: u64,
}

/// Static side table resolving `(hostname, digest)` to the broker rank
/// managing that compute node. Filled from the hardware inventory at
/// startup; never mutated afterwards.
#[derive(Debug, Default)]
pub struct RankTable {
    ranks: HashMap<(String, String), u32>,
}

impl RankTable {
    pub fn new() -> RankTable {
        RankTable { ranks: HashMap::new() }
    }

    pub fn insert(&mut self, hostname: impl Into<String>, digest: impl Into<String>, rank: u32) {
        self.ranks.insert((hostname.into(), digest.into()), rank);
    }

    pub fn lookup(&self, hostname: &str, digest: &str) -> Option<u32> {
        self.ranks.get(&(hostname.to_string(), digest.to_string())).copied()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// Builds the `rdl.alloc` entries for a selected sub-tree: one entry per
    /// node-type resource, resolved through this table.
    pub fn contain_entries(&self, tree: &ResourceTree, shadows: &[Shadow], corespernode: u64) -> Result<Vec<ContainEntry>> {
        let mut entries = Vec::new();
        for shadow in shadows {
            for rid in shadow.preorder() {
                let resource = tree.get(rid);
                if !resource.rtype.eq_ignore_ascii_case("node") {
                    continue;
                }
                let digest = resource.digest.as_deref().unwrap_or("");
                let Some(rank) = self.lookup(&resource.name, digest) else {
                    return Err(Error::NotFound(format!("no broker rank for node {} (digest {:?})", resource.name, resource.digest)));
                };
                entries.push(ContainEntry { containing_rank: rank, ncores: corespernode });
            }
        }
        Ok(entries)
    }
}
