use std::collections::{BTreeMap, BTreeSet};

use tempo_sched::api::rdl_dto::ResourceDto;
use tempo_sched::domain::resource::{ContainEntry, PlanningHorizon, RankTable, Request, ResourceTree};

fn dto(rtype: &str, name: &str, size: u64, children: Vec<ResourceDto>) -> ResourceDto {
    ResourceDto {
        rtype: rtype.to_string(),
        name: name.to_string(),
        id: None,
        size,
        properties: BTreeMap::new(),
        tags: BTreeSet::new(),
        digest: None,
        children,
    }
}

/// cluster -> 2 nodes -> 1 socket -> 4 cores each.
fn small_cluster() -> ResourceTree {
    let nodes = (0..2)
        .map(|n| {
            let cores = (0..4).map(|c| dto("core", &format!("node{}-core{}", n, c), 1, Vec::new())).collect();
            dto("node", &format!("node{}", n), 1, vec![dto("socket", &format!("node{}-socket0", n), 1, cores)])
        })
        .collect();
    ResourceTree::from_dto(&dto("cluster", "default", 1, nodes), PlanningHorizon::new(0, 1000)).unwrap()
}

fn node_core_request(nnodes: i64, ncores: i64, start: i64, end: i64) -> Request {
    let mut request = Request::new("node", nnodes, 0, false).unwrap().with_child(Request::new("core", ncores, 1, true).unwrap());
    request.set_window(start, end);
    request
}

#[test]
fn dto_round_trip_is_structural_identity() {
    let tree = small_cluster();
    let dumped = tree.to_dto();
    let reloaded = ResourceTree::from_dto(&dumped, PlanningHorizon::new(0, 1000)).unwrap();
    assert_eq!(dumped, reloaded.to_dto());
}

#[test]
fn sparse_request_descends_through_unmatched_layers() {
    let mut tree = small_cluster();

    // node -> core matches node -> socket -> core.
    let mut request = node_core_request(2, 2, 0, 100);
    let (nfound, found) = tree.search(tree.root(), &mut request, true);
    assert_eq!(nfound, 2);
    assert_eq!(found.len(), 2);

    // The found trees keep the intervening socket layer.
    let first = &found[0];
    assert_eq!(tree.get(first.resource).rtype, "node");
    assert_eq!(tree.get(first.children[0].resource).rtype, "socket");
    assert_eq!(tree.get(first.children[0].children[0].resource).rtype, "core");
    tree.unstage_all();
}

#[test]
fn search_respects_windowed_availability() {
    let mut tree = small_cluster();

    // Claim all four cores of node0 over [0, 50).
    let node0 = tree.find_by_name("node0").unwrap();
    let socket = tree.get(node0).children()[0];
    for rid in tree.get(socket).children().to_vec() {
        tree.stage(rid, 1);
        let shadow = tempo_sched::domain::resource::Shadow::new(rid);
        tree.allocate_shadows(&[shadow], 42, 0, 50).unwrap();
    }

    let mut now = node_core_request(2, 4, 0, 50);
    let (nfound, _) = tree.search(tree.root(), &mut now, true);
    assert_eq!(nfound, 1, "node0 is fully busy during the window");

    let mut later = node_core_request(2, 4, 50, 100);
    let (nfound, _) = tree.search(tree.root(), &mut later, true);
    assert_eq!(nfound, 2, "both nodes are free after the claim drains");
}

#[test]
fn properties_and_tags_must_be_subsets() {
    let mut gpu_node = dto("node", "gpunode", 1, Vec::new());
    gpu_node.properties.insert("arch".to_string(), "x86".to_string());
    gpu_node.tags.insert("gpu".to_string());
    let plain = dto("node", "plainnode", 1, Vec::new());
    let tree = ResourceTree::from_dto(&dto("cluster", "default", 1, vec![gpu_node, plain]), PlanningHorizon::new(0, 100)).unwrap();

    let mut tagged = Request::new("node", 1, 0, false).unwrap().with_tag("gpu").with_property("arch", "x86");
    let (nfound, found) = tree.search(tree.root(), &mut tagged, true);
    assert_eq!(nfound, 1);
    assert_eq!(tree.get(found[0].resource).name, "gpunode");

    let mut wrong = Request::new("node", 1, 0, false).unwrap().with_property("arch", "arm");
    let (nfound, _) = tree.search(tree.root(), &mut wrong, true);
    assert_eq!(nfound, 0);
}

#[test]
fn type_matching_is_case_insensitive() {
    let tree = small_cluster();
    let mut request = Request::new("NODE", 1, 0, false).unwrap();
    let (nfound, _) = tree.search(tree.root(), &mut request, true);
    assert_eq!(nfound, 2);
}

#[test]
fn unstage_twice_equals_unstage_once() {
    let mut tree = small_cluster();
    let node0 = tree.find_by_name("node0").unwrap();
    tree.stage(node0, 1);
    assert_eq!(tree.get(node0).staged, 1);

    let shadow = tempo_sched::domain::resource::Shadow::new(node0);
    tree.unstage_shadows(std::slice::from_ref(&shadow));
    assert_eq!(tree.get(node0).staged, 0);
    tree.unstage_shadows(std::slice::from_ref(&shadow));
    assert_eq!(tree.get(node0).staged, 0);
}

#[test]
fn allocate_then_release_round_trips_the_planners() {
    let mut tree = small_cluster();

    // Claim one full node for job 7 over [10, 60).
    let node0 = tree.find_by_name("node0").unwrap();
    let core_ids: Vec<_> = tree.get(tree.get(node0).children()[0]).children().to_vec();
    tree.stage(node0, 1);
    let mut shadow = tempo_sched::domain::resource::Shadow::new(node0);
    for rid in core_ids.iter().copied() {
        tree.stage(rid, 1);
        shadow.children.push(tempo_sched::domain::resource::Shadow::new(rid));
    }
    tree.allocate_shadows(std::slice::from_ref(&shadow), 7, 10, 60).unwrap();

    for &rid in &core_ids {
        assert!(tree.get(rid).planner.contains_reservation(7));
        tree.get(rid).planner.self_check().unwrap();
    }
    assert_eq!(tree.allocated_jobs(), vec![7]);

    tree.release_shadows(std::slice::from_ref(&shadow), 7).unwrap();
    for &rid in &core_ids {
        assert_eq!(tree.get(rid).planner.reservation_count(), 0);
        assert_eq!(tree.get(rid).planner.point_count(), 1);
    }
    assert!(tree.allocated_jobs().is_empty());
}

#[test]
fn reservations_are_purged_wholesale() {
    let mut tree = small_cluster();
    let node1 = tree.find_by_name("node1").unwrap();
    tree.stage(node1, 1);
    let shadow = tempo_sched::domain::resource::Shadow::new(node1);
    tree.reserve_shadows(std::slice::from_ref(&shadow), 9, 100, 200).unwrap();
    assert!(tree.get(node1).planner.contains_reservation(9));

    tree.release_all_reservations().unwrap();
    assert_eq!(tree.get(node1).planner.reservation_count(), 0);
}

#[test]
fn contain_entries_resolve_through_the_rank_table() {
    let mut node0 = dto("node", "host0", 1, Vec::new());
    node0.digest = Some("abc123".to_string());
    let mut node1 = dto("node", "host1", 1, Vec::new());
    node1.digest = Some("def456".to_string());
    let tree = ResourceTree::from_dto(&dto("cluster", "default", 1, vec![node0, node1]), PlanningHorizon::new(0, 100)).unwrap();

    let mut ranks = RankTable::new();
    ranks.insert("host0", "abc123", 0);
    ranks.insert("host1", "def456", 3);

    let shadows: Vec<_> = tree.ids_of_type("node").into_iter().map(tempo_sched::domain::resource::Shadow::new).collect();
    let entries = ranks.contain_entries(&tree, &shadows, 4).unwrap();
    assert_eq!(entries, vec![ContainEntry { containing_rank: 0, ncores: 4 }, ContainEntry { containing_rank: 3, ncores: 4 }]);

    // A node missing from the table is a hard error.
    let empty = RankTable::new();
    assert!(empty.contain_entries(&tree, &shadows, 4).is_err());
}

#[test]
fn live_counter_serves_present_moment_requests() {
    let mut tree = small_cluster();
    let node0 = tree.find_by_name("node0").unwrap();

    // A "now" allocation consumes the live counter, not the planner.
    tree.stage(node0, 1);
    let shadow = tempo_sched::domain::resource::Shadow::new(node0);
    tree.allocate_shadows(std::slice::from_ref(&shadow), 3, 0, 0).unwrap();
    assert_eq!(tree.get(node0).available, 0);
    assert_eq!(tree.get(node0).planner.reservation_count(), 0);

    let mut request = Request::new("node", 2, 1, false).unwrap();
    let (nfound, _) = tree.search(tree.root(), &mut request, true);
    assert_eq!(nfound, 1, "only node1 has live availability");

    tree.release_shadows(std::slice::from_ref(&shadow), 3).unwrap();
    assert_eq!(tree.get(node0).available, 1);
}
