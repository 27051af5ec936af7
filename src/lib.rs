use std::path::Path;

use crate::api::rdl_dto::ResourceDto;
use crate::domain::resource::{PlanningHorizon, ResourceTree};
use crate::error::Result;
use crate::loader::parser::parse_json_file;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

/// Loads a resource tree from a topology definition file, giving every
/// resource a planner over `horizon`.
pub fn load_resource_tree(file_path: impl AsRef<Path>, horizon: PlanningHorizon) -> Result<ResourceTree> {
    logger::init();
    log::info!("Logger initialized. Loading resource tree.");

    let dto: ResourceDto = parse_json_file(file_path)?;
    log::info!("Topology file parsed successfully.");

    let tree = ResourceTree::from_dto(&dto, horizon)?;
    log::info!("Resource tree constructed with {} resources.", tree.len());

    Ok(tree)
}
