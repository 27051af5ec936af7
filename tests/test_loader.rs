use std::fs;
use std::path::PathBuf;

use tempo_sched::api::rdl_dto::{InventoryDto, NodeInventoryDto};
use tempo_sched::domain::resource::PlanningHorizon;
use tempo_sched::loader::rsreader::load_topology;

fn inventory() -> InventoryDto {
    InventoryDto {
        nodes: vec![
            NodeInventoryDto { hostname: "host0".to_string(), digest: "abc".to_string(), rank: 0, ncores: 4, properties: Default::default() },
            NodeInventoryDto { hostname: "host1".to_string(), digest: "def".to_string(), rank: 1, ncores: 4, properties: Default::default() },
        ],
    }
}

fn write_temp(name: &str, contents: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("tempo-sched-{}-{}", std::process::id(), name));
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn inventory_alone_builds_a_flat_cluster() {
    let resolved = load_topology(None, &inventory(), false, PlanningHorizon::new(0, 1000)).unwrap();
    assert_eq!(resolved.tree.ids_of_type("node").len(), 2);
    assert_eq!(resolved.tree.ids_of_type("core").len(), 8);
    assert_eq!(resolved.ranks.lookup("host1", "def"), Some(1));
}

#[test]
fn matching_topology_file_is_used_as_declared() {
    let path = write_temp(
        "topo-good.json",
        r#"{
            "type": "cluster", "name": "default", "size": 1,
            "children": [
                {"type": "node", "name": "host0", "size": 1, "digest": "abc"},
                {"type": "node", "name": "host1", "size": 1, "digest": "def"}
            ]
        }"#,
    );
    let resolved = load_topology(Some(&path), &inventory(), true, PlanningHorizon::new(0, 1000)).unwrap();
    // The declared tree wins: no synthesized cores.
    assert_eq!(resolved.tree.ids_of_type("node").len(), 2);
    assert!(resolved.tree.ids_of_type("core").is_empty());
    fs::remove_file(path).ok();
}

#[test]
fn digest_mismatch_fails_or_falls_back() {
    let path = write_temp(
        "topo-stale.json",
        r#"{
            "type": "cluster", "name": "default", "size": 1,
            "children": [{"type": "node", "name": "host0", "size": 1, "digest": "stale"}]
        }"#,
    );

    // fail-on-error aborts startup.
    assert!(load_topology(Some(&path), &inventory(), true, PlanningHorizon::new(0, 1000)).is_err());

    // Otherwise the tree is rebuilt from the inventory.
    let resolved = load_topology(Some(&path), &inventory(), false, PlanningHorizon::new(0, 1000)).unwrap();
    assert_eq!(resolved.tree.ids_of_type("node").len(), 2);
    assert_eq!(resolved.tree.ids_of_type("core").len(), 8);
    fs::remove_file(path).ok();
}
