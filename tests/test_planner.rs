use tempo_sched::domain::planner::{PlanRequest, Planner};
use tempo_sched::error::Error;

fn planner_1d(total: u64, duration: i64) -> Planner {
    Planner::new(0, duration, &[total]).unwrap()
}

fn req(amounts: &[u64], duration: i64) -> PlanRequest {
    PlanRequest::new(amounts, duration, false).unwrap()
}

fn req_excl(amounts: &[u64], duration: i64) -> PlanRequest {
    PlanRequest::new(amounts, duration, true).unwrap()
}

fn avail(planner: &mut Planner, amounts: &[u64], duration: i64) -> Option<i64> {
    planner.avail_time_first(&req(amounts, duration)).unwrap()
}

#[test]
fn fill_and_fragment_a_unit_resource() {
    // One resource of total 1 over [0, 10).
    let mut planner = planner_1d(1, 10);
    planner.add_reservation(1, 0, 5, &[1], true).unwrap();
    planner.add_reservation(2, 5, 2, &[1], true).unwrap();
    planner.add_reservation(3, 7, 2, &[1], true).unwrap();
    planner.self_check().unwrap();

    // Only [9, 10) is left.
    assert_eq!(avail(&mut planner, &[1], 1), Some(9));

    planner.remove_reservation(2).unwrap();
    planner.remove_reservation(3).unwrap();
    planner.self_check().unwrap();

    // [5, 10) is free again and takes a window of exactly five.
    assert_eq!(avail(&mut planner, &[1], 5), Some(5));
    assert_eq!(avail(&mut planner, &[1], 4), Some(5));
    // Six cannot fit anywhere before the plan end.
    assert_eq!(avail(&mut planner, &[1], 6), None);
}

#[test]
fn mid_window_occupancy_blocks_a_long_request() {
    // Fill [0, 10) with five windows of two, then free the middle two.
    let mut planner = planner_1d(1, 10);
    for i in 0..5 {
        planner.add_reservation(i, 2 * i, 2, &[1], true).unwrap();
    }
    planner.remove_reservation(1).unwrap();
    planner.remove_reservation(2).unwrap();

    // [2, 6) is free; four fits, five hits the reservation at six.
    assert_eq!(avail(&mut planner, &[1], 4), Some(2));
    assert_eq!(avail(&mut planner, &[1], 5), None);
    assert_eq!(avail(&mut planner, &[1], 2), Some(2));
    assert_eq!(planner.avail_time_next().unwrap(), None);
}

#[test]
fn larger_totals_behave_at_scale() {
    let mut planner = Planner::new(0, 10_000, &[1000]).unwrap();
    for i in 1..=9 {
        planner.add_reservation(i, 0, 100, &[100], true).unwrap();
    }
    planner.self_check().unwrap();

    assert_eq!(avail(&mut planner, &[100], 100), Some(0));

    planner.add_reservation(10, 0, 100, &[100], true).unwrap();
    assert_eq!(avail(&mut planner, &[1], 1000), Some(100));
    planner.self_check().unwrap();
}

#[test]
fn one_exhausted_dimension_pushes_the_answer_out() {
    let totals = [2u64, 20, 200, 2000, 20000];
    let mut planner = Planner::new(0, 100, &totals).unwrap();
    let amounts = [1u64, 10, 100, 1000, 10000];
    planner.add_reservation(1, 0, 2, &amounts, true).unwrap();
    planner.add_reservation(2, 0, 2, &amounts, true).unwrap();
    planner.self_check().unwrap();

    // Dimension 0 is exhausted at t=0 even though the request wants none
    // of it; the first dimension it does want is short until t=2.
    assert_eq!(avail(&mut planner, &[0, 20, 100, 1000, 10000], 2), Some(2));
}

#[test]
fn avail_iteration_walks_strictly_later_candidates() {
    let mut planner = planner_1d(2, 100);
    planner.add_reservation(1, 0, 10, &[2], true).unwrap();
    planner.add_reservation(2, 20, 10, &[1], true).unwrap();

    // Candidates in time order: 10 (free), 20 (one left), 30 (free).
    assert_eq!(planner.avail_time_first(&req(&[1], 5)).unwrap(), Some(10));
    assert_eq!(planner.avail_time_next().unwrap(), Some(20));
    assert_eq!(planner.avail_time_next().unwrap(), Some(30));
    assert_eq!(planner.avail_time_next().unwrap(), None);
}

#[test]
fn construction_validates_its_arguments() {
    assert!(matches!(Planner::new(-1, 10, &[1]), Err(Error::InvalidArgument(_))));
    assert!(matches!(Planner::new(0, 0, &[1]), Err(Error::InvalidArgument(_))));
    assert!(matches!(Planner::new(0, 10, &[1, 1, 1, 1, 1, 1]), Err(Error::InvalidArgument(_))));
    assert!(Planner::new(0, 10, &[1, 1, 1, 1, 1]).is_ok());
}

#[test]
fn boundary_requests_are_rejected() {
    let mut planner = planner_1d(4, 10);

    // Zero total size fails out-of-range.
    assert!(matches!(PlanRequest::new(&[0], 5, false), Err(Error::OutOfRange(_))));
    // Zero duration fails invalid-argument.
    assert!(matches!(PlanRequest::new(&[1], 0, false), Err(Error::InvalidArgument(_))));
    assert!(matches!(planner.add_reservation(1, 0, 0, &[1], true), Err(Error::InvalidArgument(_))));

    // A request beyond the total in some dimension is out of range.
    assert!(matches!(planner.avail_time_first(&req(&[5], 1)), Err(Error::OutOfRange(_))));
}

#[test]
fn reservations_may_touch_the_plan_end_but_not_cross_it() {
    let mut planner = planner_1d(1, 10);
    assert!(matches!(planner.add_reservation(1, 8, 3, &[1], true), Err(Error::InvalidArgument(_))));
    planner.add_reservation(1, 8, 2, &[1], true).unwrap();
    planner.self_check().unwrap();
}

#[test]
fn exclusive_requests_need_the_whole_total_free() {
    let mut planner = planner_1d(4, 100);
    planner.add_reservation(1, 0, 10, &[1], true).unwrap();

    // Three of four are free at t=0, but an exclusive request must wait
    // until the pool is completely unallocated.
    assert_eq!(planner.avail_time_first(&req(&[3], 5)).unwrap(), Some(0));
    assert_eq!(planner.avail_time_first(&req_excl(&[1], 5)).unwrap(), Some(10));

    assert!(planner.avail_during(0, &req(&[3], 10)).unwrap());
    assert!(!planner.avail_during(0, &req_excl(&[1], 10)).unwrap());
    assert!(planner.avail_during(10, &req_excl(&[1], 10)).unwrap());
}

#[test]
fn duplicate_and_unknown_reservation_ids() {
    let mut planner = planner_1d(2, 50);
    planner.add_reservation(7, 0, 10, &[1], true).unwrap();
    assert!(matches!(planner.add_reservation(7, 20, 5, &[1], true), Err(Error::AlreadyExists(_))));
    assert!(matches!(planner.remove_reservation(8), Err(Error::NotFound(_))));
    planner.remove_reservation(7).unwrap();
    assert!(matches!(planner.remove_reservation(7), Err(Error::NotFound(_))));
}

#[test]
fn removing_everything_restores_the_sentinel_alone() {
    let mut planner = planner_1d(8, 1000);
    let spans: [(i64, i64, u64); 5] = [(0, 100, 3), (50, 200, 2), (100, 50, 3), (120, 400, 1), (600, 400, 8)];
    for (i, &(start, duration, amount)) in spans.iter().enumerate() {
        planner.add_reservation(i as i64, start, duration, &[amount], true).unwrap();
        planner.self_check().unwrap();
    }
    for i in 0..spans.len() {
        planner.remove_reservation(i as i64).unwrap();
        planner.self_check().unwrap();
    }

    assert_eq!(planner.point_count(), 1);
    assert_eq!(planner.reservation_count(), 0);
    let sentinel = planner.points_in_order().next().unwrap();
    assert_eq!(sentinel.at, 0);
    assert_eq!(sentinel.remaining.as_slice(), &[8]);
}

#[test]
fn readding_in_arbitrary_order_rebuilds_the_same_points() {
    let spans: [(i64, i64, i64, u64); 6] = [(1, 0, 100, 3), (2, 50, 200, 2), (3, 100, 50, 3), (4, 120, 400, 1), (5, 600, 400, 8), (6, 10, 20, 2)];

    let mut planner = planner_1d(8, 1000);
    for &(id, start, duration, amount) in &spans {
        planner.add_reservation(id, start, duration, &[amount], true).unwrap();
    }
    let baseline: Vec<(i64, Vec<i64>)> = planner.points_in_order().map(|p| (p.at, p.scheduled.as_slice().to_vec())).collect();

    // Tear down and rebuild in a different order.
    for &(id, ..) in &spans {
        planner.remove_reservation(id).unwrap();
    }
    for &(id, start, duration, amount) in spans.iter().rev() {
        planner.add_reservation(id, start, duration, &[amount], true).unwrap();
    }
    let rebuilt: Vec<(i64, Vec<i64>)> = planner.points_in_order().map(|p| (p.at, p.scheduled.as_slice().to_vec())).collect();

    assert_eq!(baseline, rebuilt);
    planner.self_check().unwrap();
}

#[test]
fn reset_preserves_totals_unless_replaced() {
    let mut planner = planner_1d(4, 100);
    planner.add_reservation(1, 0, 10, &[4], true).unwrap();

    planner.reset(0, 200, None).unwrap();
    assert_eq!(planner.reservation_count(), 0);
    assert_eq!(planner.plan_end(), 200);
    assert_eq!(planner.total().as_slice(), &[4]);

    planner.reset(10, 100, Some(&[9])).unwrap();
    assert_eq!(planner.plan_start(), 10);
    assert_eq!(planner.total().as_slice(), &[9]);
    planner.self_check().unwrap();
}

#[test]
fn overlapping_reservations_interleave_correctly() {
    // Two dimensions, staggered overlaps; every point must account for the
    // pairwise contributions.
    let mut planner = Planner::new(0, 100, &[10, 6]).unwrap();
    planner.add_reservation(1, 0, 40, &[4, 2], true).unwrap();
    planner.add_reservation(2, 10, 40, &[4, 2], true).unwrap();
    planner.add_reservation(3, 20, 40, &[2, 2], true).unwrap();
    planner.self_check().unwrap();

    // At [20, 40) everything overlaps: 10 of 10 and 6 of 6 used, so a
    // 30-long window only opens once the first two reservations drained.
    assert_eq!(avail(&mut planner, &[1, 1], 30), Some(40));
    assert!(!planner.avail_during(20, &req(&[1, 1], 5)).unwrap());
    assert!(planner.avail_during(50, &req(&[6, 2], 10)).unwrap());

    planner.remove_reservation(2).unwrap();
    planner.self_check().unwrap();
    assert!(planner.avail_during(20, &req(&[4, 2], 5)).unwrap());
}
