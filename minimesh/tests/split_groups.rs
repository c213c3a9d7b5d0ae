//! Splitting and duplicating communicators across in-process ranks.

mod common;

use common::run_world;
use minimesh::{Op, UNDEFINED_COLOR};

#[test]
fn split_partitions_by_color() {
    let results = run_world(4, |mesh| {
        let color = (mesh.rank() % 2) as i64;
        let group = mesh.world().split(color, 0).unwrap();
        (mesh.rank(), group.rank(), group.size())
    });
    for (world_rank, group_rank, group_size) in results {
        assert_eq!(group_size, 2);
        // Members keep their relative order: world ranks 0,1 become group
        // rank 0; world ranks 2,3 become group rank 1.
        assert_eq!(group_rank, world_rank / 2);
    }
}

#[test]
fn split_groups_run_independent_collectives() {
    let results = run_world(4, |mesh| {
        let color = (mesh.rank() % 2) as i64;
        let group = mesh.world().split(color, 0).unwrap();

        let mut sum = [mesh.rank() as f64];
        group.allreduce(None, &mut sum, Op::Sum).unwrap();
        (mesh.rank(), sum[0])
    });
    for (world_rank, sum) in results {
        // Even group holds world ranks {0, 2}, odd group {1, 3}.
        let expected = if world_rank % 2 == 0 { 2.0 } else { 4.0 };
        assert_eq!(sum, expected);
    }
}

#[test]
fn undefined_color_yields_a_singleton() {
    let results = run_world(3, |mesh| {
        let color = if mesh.rank() == 1 { UNDEFINED_COLOR } else { 0 };
        let group = mesh.world().split(color, 0).unwrap();
        (mesh.rank(), group.rank(), group.size())
    });
    for (world_rank, group_rank, group_size) in results {
        match world_rank {
            // The undefined rank is alone in its new communicator.
            1 => assert_eq!((group_rank, group_size), (0, 1)),
            0 => assert_eq!((group_rank, group_size), (0, 2)),
            _ => assert_eq!((group_rank, group_size), (1, 2)),
        }
    }
}

#[test]
fn hints_reorder_the_new_group() {
    let results = run_world(3, |mesh| {
        // Descending hints reverse the rank order.
        let hint = -(mesh.rank() as i64);
        let group = mesh.world().split(0, hint).unwrap();
        (mesh.rank(), group.rank())
    });
    for (world_rank, group_rank) in results {
        assert_eq!(group_rank, 2 - world_rank);
    }
}

#[test]
fn equal_hints_fall_back_to_rank_order() {
    let results = run_world(3, |mesh| {
        let group = mesh.world().split(0, 9).unwrap();
        (mesh.rank(), group.rank())
    });
    for (world_rank, group_rank) in results {
        assert_eq!(group_rank, world_rank);
    }
}

#[test]
fn dup_gives_an_independent_flow_space() {
    run_world(3, |mesh| {
        let world = mesh.world();
        let copy = world.dup();
        assert_eq!(copy.rank(), world.rank());
        assert_eq!(copy.size(), world.size());

        // Interleaved collectives on both communicators stay matched.
        world.barrier().unwrap();
        copy.barrier().unwrap();

        let mut sum = [1.0f64];
        copy.allreduce(None, &mut sum, Op::Sum).unwrap();
        assert_eq!(sum, [3.0]);
        world.barrier().unwrap();
    });
}

#[test]
fn nested_splits_keep_working() {
    let results = run_world(4, |mesh| {
        let half = mesh.world().split((mesh.rank() / 2) as i64, 0).unwrap();
        let single = half.split(half.rank() as i64, 0).unwrap();
        (half.size(), single.size(), single.rank())
    });
    for (half_size, single_size, single_rank) in results {
        assert_eq!(half_size, 2);
        assert_eq!(single_size, 1);
        assert_eq!(single_rank, 0);
    }
}
