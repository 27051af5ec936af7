use std::collections::{BTreeMap, BTreeSet, HashSet};

use tempo_sched::api::rdl_dto::ResourceDto;
use tempo_sched::domain::resource::{PlanningHorizon, Request, ResourceId, ResourceTree};
use tempo_sched::domain::sched::SchedParams;
use tempo_sched::domain::sched::policy::{SchedPolicy, TopoPolicy};

fn dto(rtype: &str, name: &str, children: Vec<ResourceDto>) -> ResourceDto {
    ResourceDto {
        rtype: rtype.to_string(),
        name: name.to_string(),
        id: None,
        size: 1,
        properties: BTreeMap::new(),
        tags: BTreeSet::new(),
        digest: None,
        children,
    }
}

/// cluster -> 2 pods -> 3 switches each -> 4 nodes each.
fn fat_tree() -> ResourceTree {
    let pods = (0..2)
        .map(|p| {
            let switches = (0..3)
                .map(|s| {
                    let nodes = (0..4).map(|n| dto("node", &format!("p{}s{}n{}", p, s, n), Vec::new())).collect();
                    dto("switch", &format!("p{}s{}", p, s), nodes)
                })
                .collect();
            dto("pod", &format!("pod{}", p), switches)
        })
        .collect();
    ResourceTree::from_dto(&dto("cluster", "default", pods), PlanningHorizon::new(0, 100_000)).unwrap()
}

fn topo(depth: &str) -> TopoPolicy {
    let mut policy = TopoPolicy::new();
    let params = SchedParams::parse("queue-depth=8").unwrap();
    policy.process_args(depth, &params).unwrap();
    policy
}

fn node_request(nnodes: i64, now: i64, walltime: i64) -> Request {
    let mut request = Request::new("node", nnodes, 1, true).unwrap();
    request.set_window(now, now + walltime);
    request
}

/// Runs find + select + allocate for one job; returns the switch names the
/// job landed on, or empty when it was not placed.
fn place(policy: &mut TopoPolicy, tree: &mut ResourceTree, job_id: i64, nnodes: i64, walltime: i64, now: i64) -> Vec<String> {
    let mut request = node_request(nnodes, now, walltime);
    let (nfound, found) = policy.find_resources(tree, &mut request).unwrap();
    if nfound == 0 {
        return Vec::new();
    }
    tree.unstage_shadows(&found);
    let selected = policy.select_resources(tree, &found, &mut request);
    if selected.is_empty() || !request.all_found() {
        return Vec::new();
    }
    policy.allocate_resources(tree, &selected, job_id, now, now + walltime).unwrap();
    switches_holding(tree, job_id)
}

fn switches_holding(tree: &ResourceTree, job_id: i64) -> Vec<String> {
    let mut switches: HashSet<ResourceId> = HashSet::new();
    for rid in tree.ids_of_type("node") {
        if tree.get(rid).has_alloc(job_id) {
            switches.insert(tree.get(rid).parent().unwrap());
        }
    }
    let mut names: Vec<String> = switches.into_iter().map(|s| tree.get(s).name.clone()).collect();
    names.sort();
    names
}

fn pods_holding(tree: &ResourceTree, job_id: i64) -> Vec<String> {
    let mut pods: HashSet<String> = HashSet::new();
    for rid in tree.ids_of_type("node") {
        if tree.get(rid).has_alloc(job_id) {
            let switch = tree.get(rid).parent().unwrap();
            pods.insert(tree.get(tree.get(switch).parent().unwrap()).name.clone());
        }
    }
    let mut names: Vec<String> = pods.into_iter().collect();
    names.sort();
    names
}

fn pods_holding_after(policy: &mut TopoPolicy, tree: &mut ResourceTree, job_id: i64, nnodes: i64) -> Vec<String> {
    let placed = place(policy, tree, job_id, nnodes, 100, 0);
    assert!(!placed.is_empty(), "job {} should place", job_id);
    pods_holding(tree, job_id)
}

#[test]
fn t1_jobs_land_on_a_single_best_fit_switch() {
    let mut tree = fat_tree();
    let mut policy = topo("");
    policy.loop_setup(&mut tree, 0).unwrap();

    // An empty tree: ties break by child order, one switch takes it all.
    let first = place(&mut policy, &mut tree, 1, 4, 100, 0);
    assert_eq!(first, vec!["p0s0"]);

    // A second four-node job goes to a different, still-empty switch.
    let second = place(&mut policy, &mut tree, 2, 4, 100, 0);
    assert_eq!(second, vec!["p0s1"]);
}

#[test]
fn t1_prefers_the_fullest_switch_that_still_fits() {
    let mut tree = fat_tree();
    let mut policy = topo("");
    policy.loop_setup(&mut tree, 0).unwrap();

    // Take two nodes out of p0s0; it now holds 2, the others hold 4.
    assert_eq!(place(&mut policy, &mut tree, 1, 2, 100, 0), vec!["p0s0"]);

    // A two-node job best-fits into the half-full switch's remainder.
    assert_eq!(place(&mut policy, &mut tree, 2, 2, 100, 0), vec!["p0s0"]);

    // A three-node job no longer fits there and moves on.
    assert_eq!(place(&mut policy, &mut tree, 3, 3, 100, 0), vec!["p0s1"]);
}

#[test]
fn t1_is_never_split_across_switches() {
    let mut tree = fat_tree();
    let mut policy = topo("");
    policy.loop_setup(&mut tree, 0).unwrap();

    // Occupy one node on every switch, leaving three free per switch and
    // eighteen free overall.
    let switches = tree.ids_of_type("switch");
    for (job, switch) in switches.into_iter().enumerate() {
        let node = tree.get(switch).children()[0];
        tree.stage(node, 1);
        let shadow = tempo_sched::domain::resource::Shadow::new(node);
        tree.allocate_shadows(&[shadow], job as i64 + 1, 0, 100).unwrap();
    }

    // Four nodes would fit easily in aggregate, but no single switch has
    // four, and a switch-tier job is never split.
    assert!(place(&mut policy, &mut tree, 10, 4, 50, 0).is_empty());
}

#[test]
fn t2_spans_switches_within_one_pod() {
    let mut tree = fat_tree();
    let mut policy = topo("");
    policy.loop_setup(&mut tree, 0).unwrap();

    let switches = place(&mut policy, &mut tree, 1, 6, 100, 0);
    assert_eq!(switches.len(), 2, "six nodes span two switches");
    assert_eq!(pods_holding(&tree, 1), vec!["pod0"]);
}

#[test]
fn t2_avoids_switches_with_a_t2_occupant() {
    let mut tree = fat_tree();
    let mut policy = topo("");
    policy.loop_setup(&mut tree, 0).unwrap();

    assert_eq!(pods_holding_after(&mut policy, &mut tree, 1, 6), vec!["pod0"]);
    // The second spanning job cannot reuse pod 0's occupied switches; the
    // remaining lone switch is too small, so it lands in pod 1.
    assert_eq!(pods_holding_after(&mut policy, &mut tree, 2, 6), vec!["pod1"]);
}

#[test]
fn t3_spans_pods_that_have_no_other_t3_job() {
    let mut tree = fat_tree();
    let mut policy = topo("");
    policy.loop_setup(&mut tree, 0).unwrap();

    // Sixteen nodes exceed one pod's twelve.
    let switches = place(&mut policy, &mut tree, 1, 16, 100, 0);
    assert_eq!(switches.len(), 4);
    assert_eq!(pods_holding(&tree, 1), vec!["pod0", "pod1"]);

    // No pod is free of the first T3 job, so a second one cannot place.
    assert!(place(&mut policy, &mut tree, 2, 13, 100, 0).is_empty());
}

#[test]
fn topo_reserves_like_backfill_when_nothing_fits_now() {
    let mut tree = fat_tree();
    let mut policy = topo("reserve-depth=1");
    policy.loop_setup(&mut tree, 0).unwrap();

    // Fill twenty of twenty-four nodes until t=100.
    assert_eq!(place(&mut policy, &mut tree, 1, 12, 100, 0).len(), 3);
    assert_eq!(place(&mut policy, &mut tree, 2, 8, 100, 0).len(), 2);

    // An eight-node job cannot start now; it reserves at the completion.
    let mut request = node_request(8, 0, 50);
    let (nfound, found) = policy.find_resources(&mut tree, &mut request).unwrap();
    assert!(nfound > 0);
    tree.unstage_shadows(&found);
    let selected = policy.select_resources(&mut tree, &found, &mut request);
    assert!(selected.is_empty() || !request.all_found());
    policy.reserve_resources(&mut tree, 3, 0, 50, &mut request).unwrap();

    let reserved: usize = tree.ids_of_type("node").into_iter().filter(|&rid| tree.get(rid).planner.contains_reservation(3)).count();
    assert_eq!(reserved, 8, "the job holds eight nodes in the future window");
}
