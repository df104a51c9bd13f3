//! Property-based tests for the partition calculator.
//!
//! Run with: cargo test --test proptest_partition

use proptest::prelude::*;

use shardcollective::{DistributionMode, PartitionPlan};

fn assert_prefix_sums(plan: &PartitionPlan) {
    assert_eq!(plan.displacements[0], 0);
    for i in 1..plan.node_count() {
        assert_eq!(
            plan.displacements[i],
            plan.displacements[i - 1] + plan.counts[i - 1]
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    /// Property: equal mode covers every element and no two ranks differ by more than one.
    #[test]
    fn prop_all_nodes_equal_balanced(total in 0usize..100_000, nodes in 1usize..64) {
        let plan = PartitionPlan::compute(total, nodes, DistributionMode::AllNodesEqual).unwrap();

        prop_assert_eq!(plan.counts.len(), nodes);
        prop_assert_eq!(plan.counts.iter().sum::<usize>(), total);
        prop_assert!(plan.max_imbalance() <= 1);
        assert_prefix_sums(&plan);
    }

    /// Property: control mode leaves rank 0 empty and balances the rest.
    #[test]
    fn prop_control_node_manages_balanced(total in 0usize..100_000, nodes in 2usize..64) {
        let plan = PartitionPlan::compute(total, nodes, DistributionMode::ControlNodeManages).unwrap();

        prop_assert_eq!(plan.counts[0], 0);
        prop_assert_eq!(plan.displacements[0], 0);
        prop_assert_eq!(plan.counts.iter().sum::<usize>(), total);

        let workers = &plan.counts[1..];
        let max = *workers.iter().max().unwrap();
        let min = *workers.iter().min().unwrap();
        prop_assert!(max - min <= 1);
        assert_prefix_sums(&plan);
    }

    /// Property: the larger counts always sit on the trailing ranks.
    #[test]
    fn prop_remainder_on_trailing_ranks(total in 0usize..10_000, nodes in 1usize..32) {
        let plan = PartitionPlan::compute(total, nodes, DistributionMode::AllNodesEqual).unwrap();
        for pair in plan.counts.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
    }

    /// Property: recomputing with the same inputs is deterministic.
    #[test]
    fn prop_compute_idempotent(total in 0usize..10_000, nodes in 2usize..32, equal in any::<bool>()) {
        let mode = if equal { DistributionMode::AllNodesEqual } else { DistributionMode::ControlNodeManages };
        prop_assert_eq!(
            PartitionPlan::compute(total, nodes, mode).unwrap(),
            PartitionPlan::compute(total, nodes, mode).unwrap()
        );
    }
}
