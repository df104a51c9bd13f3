//! Balanced partitioning of a logical array over a group of ranks, and the
//! collectives (scatter, gather, all-gather, broadcast, reduce, all-reduce)
//! that move data along that partition.
//!
//! A [`ClusterContext`] is built once per process over a [`Fabric`]; any number
//! of [`DistributionCoordinator`]s share it, each tracking its own
//! [`PartitionPlan`].

pub mod cluster;
pub mod collective;
pub mod coordinator;
mod error;
pub mod fabric;
pub mod logging;
pub mod partition;

pub use cluster::ClusterContext;
pub use collective::{DataType, Element, ReduceOp};
pub use coordinator::DistributionCoordinator;
pub use error::{CollectiveError, Result};
pub use fabric::{Fabric, LocalFabric, TcpFabric, TcpFabricConfig};
pub use partition::{DistributionMode, PartitionPlan};
