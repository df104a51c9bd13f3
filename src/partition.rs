//! Balanced contiguous partitioning of a logical array across ranks

use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::{CollectiveError, Result};

/// How work is shared between the ranks of the group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionMode {
    /// Rank 0 only coordinates and owns no elements
    #[default]
    ControlNodeManages,
    /// Every rank, including rank 0, owns a share
    AllNodesEqual,
}

impl DistributionMode {
    /// Smallest group this mode can distribute over
    pub fn min_nodes(self) -> usize {
        match self {
            Self::ControlNodeManages => 2,
            Self::AllNodesEqual => 1,
        }
    }

    /// Reject node counts the mode cannot work with
    pub fn validate(self, node_count: usize) -> Result<()> {
        let required = self.min_nodes();
        if node_count < required {
            return Err(CollectiveError::InsufficientNodes {
                required,
                available: node_count,
            });
        }
        Ok(())
    }

    /// Wire tag used when the root distributes a plan
    pub fn tag(self) -> u64 {
        match self {
            Self::ControlNodeManages => 0,
            Self::AllNodesEqual => 1,
        }
    }

    pub fn from_tag(tag: u64) -> Result<Self> {
        match tag {
            0 => Ok(Self::ControlNodeManages),
            1 => Ok(Self::AllNodesEqual),
            other => Err(CollectiveError::InvalidConfig(format!(
                "unknown distribution mode tag {}",
                other
            ))),
        }
    }

    /// First rank that receives elements
    fn first_worker(self) -> usize {
        match self {
            Self::ControlNodeManages => 1,
            Self::AllNodesEqual => 0,
        }
    }
}

impl fmt::Display for DistributionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ControlNodeManages => f.write_str("control-node-manages"),
            Self::AllNodesEqual => f.write_str("all-nodes-equal"),
        }
    }
}

/// Per-rank element counts and offsets into the whole array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPlan {
    /// Length of the whole array
    pub total_elements: usize,
    /// Mode the plan was computed for
    pub mode: DistributionMode,
    /// Elements owned by each rank
    pub counts: Vec<usize>,
    /// Offset of each rank's slice (prefix sums of `counts`)
    pub displacements: Vec<usize>,
}

impl PartitionPlan {
    /// Compute the plan for `total_elements` over `node_count` ranks.
    ///
    /// Every working rank gets `total / workers` elements and the trailing
    /// `total % workers` ranks get one more. Under
    /// [`DistributionMode::ControlNodeManages`] rank 0 is left empty and the
    /// split happens over ranks `1..node_count`.
    pub fn compute(
        total_elements: usize,
        node_count: usize,
        mode: DistributionMode,
    ) -> Result<Self> {
        mode.validate(node_count)?;

        let first = mode.first_worker();
        let workers = node_count - first;
        let base = total_elements / workers;
        let remainder = total_elements % workers;

        let mut counts = vec![0; node_count];
        let mut displacements = vec![0; node_count];
        let mut offset = 0;

        for rank in first..node_count {
            // ranks left including this one
            let to_end = node_count - rank;
            counts[rank] = if to_end <= remainder { base + 1 } else { base };
            displacements[rank] = offset;
            offset += counts[rank];
        }

        Ok(Self {
            total_elements,
            mode,
            counts,
            displacements,
        })
    }

    /// Rebuild a plan from counts and displacements received from the root.
    pub fn from_parts(
        mode: DistributionMode,
        counts: Vec<usize>,
        displacements: Vec<usize>,
    ) -> Result<Self> {
        if counts.len() != displacements.len() {
            return Err(CollectiveError::BufferSizeMismatch {
                expected: counts.len(),
                actual: displacements.len(),
            });
        }
        Ok(Self {
            total_elements: counts.iter().sum(),
            mode,
            counts,
            displacements,
        })
    }

    /// Number of ranks the plan covers
    pub fn node_count(&self) -> usize {
        self.counts.len()
    }

    /// Elements owned by `rank`
    pub fn count_for(&self, rank: usize) -> Result<usize> {
        self.counts
            .get(rank)
            .copied()
            .ok_or(CollectiveError::InvalidRank {
                rank,
                world_size: self.node_count(),
            })
    }

    /// Offset of `rank`'s slice in the whole array
    pub fn displacement_for(&self, rank: usize) -> Result<usize> {
        self.displacements
            .get(rank)
            .copied()
            .ok_or(CollectiveError::InvalidRank {
                rank,
                world_size: self.node_count(),
            })
    }

    /// Half-open element range owned by `rank`
    pub fn range_for(&self, rank: usize) -> Result<Range<usize>> {
        let start = self.displacement_for(rank)?;
        Ok(start..start + self.count_for(rank)?)
    }

    /// Largest count difference between two working ranks
    pub fn max_imbalance(&self) -> usize {
        let working = &self.counts[self.mode.first_worker().min(self.counts.len())..];
        let max = working.iter().max().copied().unwrap_or(0);
        let min = working.iter().min().copied().unwrap_or(0);
        max - min
    }
}

impl fmt::Display for PartitionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "partition plan:")?;
        writeln!(f, "    nodes         = {}", self.node_count())?;
        writeln!(f, "    total         = {}", self.total_elements)?;
        writeln!(f, "    mode          = {}", self.mode)?;
        writeln!(f, "    counts        = {:?}", self.counts)?;
        write!(f, "    displacements = {:?}", self.displacements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_nodes_equal_trailing_remainder() {
        let plan = PartitionPlan::compute(11, 3, DistributionMode::AllNodesEqual).unwrap();

        assert_eq!(plan.counts, vec![3, 4, 4]);
        assert_eq!(plan.displacements, vec![0, 3, 7]);
        assert_eq!(plan.total_elements, 11);
    }

    #[test]
    fn test_control_node_manages() {
        let plan = PartitionPlan::compute(7, 3, DistributionMode::ControlNodeManages).unwrap();

        assert_eq!(plan.counts, vec![0, 3, 4]);
        assert_eq!(plan.displacements, vec![0, 0, 3]);
    }

    #[test]
    fn test_all_nodes_equal_seven_over_three() {
        let plan = PartitionPlan::compute(7, 3, DistributionMode::AllNodesEqual).unwrap();
        assert_eq!(plan.counts, vec![2, 2, 3]);
        assert_eq!(plan.displacements, vec![0, 2, 4]);
    }

    #[test]
    fn test_fewer_elements_than_nodes() {
        let plan = PartitionPlan::compute(2, 5, DistributionMode::AllNodesEqual).unwrap();
        assert_eq!(plan.counts, vec![0, 0, 0, 1, 1]);
        assert_eq!(plan.displacements, vec![0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_empty_array() {
        let plan = PartitionPlan::compute(0, 4, DistributionMode::ControlNodeManages).unwrap();
        assert_eq!(plan.counts, vec![0; 4]);
        assert_eq!(plan.displacements, vec![0; 4]);
    }

    #[test]
    fn test_single_node_all_equal() {
        let plan = PartitionPlan::compute(9, 1, DistributionMode::AllNodesEqual).unwrap();
        assert_eq!(plan.counts, vec![9]);
        assert_eq!(plan.displacements, vec![0]);
    }

    #[test]
    fn test_control_mode_needs_two_nodes() {
        let err = PartitionPlan::compute(9, 1, DistributionMode::ControlNodeManages).unwrap_err();
        assert!(matches!(
            err,
            CollectiveError::InsufficientNodes {
                required: 2,
                available: 1
            }
        ));
    }

    #[test]
    fn test_zero_nodes_rejected() {
        assert!(PartitionPlan::compute(3, 0, DistributionMode::AllNodesEqual).is_err());
    }

    #[test]
    fn test_mode_tags_follow_numeric_modes() {
        assert_eq!(DistributionMode::ControlNodeManages.tag(), 0);
        assert_eq!(DistributionMode::AllNodesEqual.tag(), 1);
        assert_eq!(DistributionMode::from_tag(1).unwrap(), DistributionMode::AllNodesEqual);
        assert!(DistributionMode::from_tag(2).is_err());
        assert_eq!(DistributionMode::default(), DistributionMode::ControlNodeManages);
    }

    #[test]
    fn test_range_for() {
        let plan = PartitionPlan::compute(11, 3, DistributionMode::AllNodesEqual).unwrap();
        assert_eq!(plan.range_for(1).unwrap(), 3..7);
        assert!(plan.range_for(3).is_err());
    }

    #[test]
    fn test_from_parts_sums_total() {
        let plan =
            PartitionPlan::from_parts(DistributionMode::ControlNodeManages, vec![0, 2, 3], vec![0, 0, 2])
                .unwrap();
        assert_eq!(plan.total_elements, 5);
        assert_eq!(
            plan,
            PartitionPlan::compute(5, 3, DistributionMode::ControlNodeManages).unwrap()
        );
    }

    #[test]
    fn test_max_imbalance_ignores_control_node() {
        let plan = PartitionPlan::compute(8, 3, DistributionMode::ControlNodeManages).unwrap();
        assert_eq!(plan.counts, vec![0, 4, 4]);
        assert_eq!(plan.max_imbalance(), 0);
    }

    #[test]
    fn test_plan_serializes_mode_kebab_case() {
        let plan = PartitionPlan::compute(4, 2, DistributionMode::AllNodesEqual).unwrap();
        let json = serde_json::to_string(&plan).unwrap();
        assert!(json.contains("\"all-nodes-equal\""));
        let back: PartitionPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }
}
