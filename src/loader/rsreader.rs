use std::path::Path;

use crate::api::rdl_dto::{InventoryDto, NodeInventoryDto, ResourceDto};
use crate::domain::resource::{PlanningHorizon, RankTable, ResourceTree};
use crate::error::{Error, Result};
use crate::loader::parser::parse_json_file;

/// Resolved startup topology: the resource tree plus the broker-rank table
/// built from the hardware inventory.
#[derive(Debug)]
pub struct ResolvedTopology {
    pub tree: ResourceTree,
    pub ranks: RankTable,
}

/// Loads the resource tree for startup.
///
/// When a topology definition file is given it is used, but every node it
/// declares must be backed by a hardware-inventory record with the same
/// digest. On a mismatch the behavior depends on `fail_on_error`: either
/// startup fails, or the tree is rebuilt from the inventory alone and a
/// warning is logged.
pub fn load_topology(rdl_conf: Option<&Path>, inventory: &InventoryDto, fail_on_error: bool, horizon: PlanningHorizon) -> Result<ResolvedTopology> {
    let ranks = rank_table(inventory);

    let tree = match rdl_conf {
        Some(path) => {
            let dto: ResourceDto = parse_json_file(path)?;
            let tree = ResourceTree::from_dto(&dto, horizon)?;
            match verify_against_inventory(&tree, inventory) {
                Ok(()) => tree,
                Err(e) if fail_on_error => return Err(e),
                Err(e) => {
                    log::warn!("topology definition disagrees with the hardware inventory ({}); rebuilding from inventory", e);
                    ResourceTree::from_dto(&inventory_dto(inventory), horizon)?
                }
            }
        }
        None => ResourceTree::from_dto(&inventory_dto(inventory), horizon)?,
    };

    Ok(ResolvedTopology { tree, ranks })
}

fn rank_table(inventory: &InventoryDto) -> RankTable {
    let mut ranks = RankTable::new();
    for node in &inventory.nodes {
        ranks.insert(node.hostname.clone(), node.digest.clone(), node.rank);
    }
    ranks
}

/// Every node the declared topology names must exist in the inventory with
/// a matching digest.
fn verify_against_inventory(tree: &ResourceTree, inventory: &InventoryDto) -> Result<()> {
    for rid in tree.ids_of_type("node") {
        let resource = tree.get(rid);
        let Some(record) = inventory.nodes.iter().find(|n| n.hostname == resource.name) else {
            return Err(Error::NotFound(format!("declared node {} is absent from the hardware inventory", resource.name)));
        };
        match &resource.digest {
            Some(digest) if *digest != record.digest => {
                return Err(Error::conflict(format!("node {} digest {} does not match inventory digest {}", resource.name, digest, record.digest)));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Synthesizes a flat cluster -> node -> core topology from the inventory.
fn inventory_dto(inventory: &InventoryDto) -> ResourceDto {
    ResourceDto {
        rtype: "cluster".to_string(),
        name: "default".to_string(),
        id: None,
        size: 1,
        properties: Default::default(),
        tags: Default::default(),
        digest: None,
        children: inventory.nodes.iter().map(node_dto).collect(),
    }
}

fn node_dto(node: &NodeInventoryDto) -> ResourceDto {
    ResourceDto {
        rtype: "node".to_string(),
        name: node.hostname.clone(),
        id: None,
        size: 1,
        properties: node.properties.clone(),
        tags: Default::default(),
        digest: Some(node.digest.clone()),
        children: (0..node.ncores)
            .map(|i| ResourceDto {
                rtype: "core".to_string(),
                name: format!("{}-core{}", node.hostname, i),
                id: None,
                size: 1,
                properties: Default::default(),
                tags: Default::default(),
                digest: None,
                children: Vec::new(),
            })
            .collect(),
    }
}
