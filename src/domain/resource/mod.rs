pub mod rank;
pub mod request;
pub mod resource;
pub mod tree;

pub use rank::{ContainEntry, RankTable};
pub use request::Request;
pub use resource::{Claim, PlanningHorizon, Resource, ResourceId, ResourceState};
pub use tree::{ResourceTree, Shadow};
