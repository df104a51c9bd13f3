//! Partition-shaped collectives over a shared cluster context

use std::sync::Arc;

use tracing::debug;

use crate::cluster::ClusterContext;
use crate::collective::{self, Element, ReduceOp};
use crate::partition::{DistributionMode, PartitionPlan};
use crate::{CollectiveError, Result};

/// Rank that computes the plan and roots every collective
pub const ROOT: usize = 0;

/// Ties one [`PartitionPlan`] to the collectives that move data along it.
///
/// Starts unconfigured. The first `set_mode`, `set_total_elements` or
/// `configure` computes a plan on the root and broadcasts it; later calls
/// recompute and re-broadcast. Each of those calls is a group-wide
/// synchronization point and must be made by every rank in the same order.
///
/// Several coordinators may share one context, each tracking its own array.
#[derive(Debug)]
pub struct DistributionCoordinator {
    ctx: Arc<ClusterContext>,
    mode: DistributionMode,
    total_elements: usize,
    plan: Option<PartitionPlan>,
}

impl DistributionCoordinator {
    pub fn new(ctx: Arc<ClusterContext>) -> Self {
        Self {
            ctx,
            mode: DistributionMode::default(),
            total_elements: 0,
            plan: None,
        }
    }

    pub fn context(&self) -> &Arc<ClusterContext> {
        &self.ctx
    }

    pub fn rank(&self) -> usize {
        self.ctx.rank()
    }

    pub fn node_count(&self) -> usize {
        self.ctx.size()
    }

    pub fn mode(&self) -> DistributionMode {
        self.mode
    }

    pub fn total_elements(&self) -> usize {
        self.total_elements
    }

    pub fn is_configured(&self) -> bool {
        self.plan.is_some()
    }

    pub fn plan(&self) -> Option<&PartitionPlan> {
        self.plan.as_ref()
    }

    /// Elements owned by this rank under the current plan
    pub fn local_count(&self) -> Result<usize> {
        self.installed_plan()?.count_for(self.rank())
    }

    /// Switch distribution mode and re-synchronize the plan.
    pub async fn set_mode(&mut self, mode: DistributionMode) -> Result<()> {
        self.configure(mode, self.total_elements).await
    }

    /// Set the whole-array length and re-synchronize the plan.
    pub async fn set_total_elements(&mut self, total_elements: usize) -> Result<()> {
        self.configure(self.mode, total_elements).await
    }

    /// Set mode and length together with a single synchronization.
    ///
    /// The root's mode travels with the counts; a rank configured with a
    /// different mode or total gets an error and keeps its previous state.
    pub async fn configure(&mut self, mode: DistributionMode, total_elements: usize) -> Result<()> {
        let size = self.node_count();
        // every rank can check this, so all ranks fail together
        mode.validate(size)?;

        // header slot carries the mode tag
        let (mut counts, mut displs) = if self.ctx.is_root() {
            let plan = PartitionPlan::compute(total_elements, size, mode)?;
            let mut counts = vec![mode.tag()];
            counts.extend(to_wire(&plan.counts));
            (counts, to_wire(&plan.displacements))
        } else {
            (vec![0u64; size + 1], vec![0u64; size])
        };

        let fabric = self.ctx.fabric();
        collective::broadcast(fabric, &mut counts, ROOT).await?;
        collective::broadcast(fabric, &mut displs, ROOT).await?;

        let root_mode = DistributionMode::from_tag(counts[0])?;
        if root_mode != mode {
            return Err(CollectiveError::ModeMismatch {
                local: mode,
                received: root_mode,
            });
        }

        let plan = PartitionPlan::from_parts(root_mode, from_wire(&counts[1..]), from_wire(&displs))?;
        if plan.total_elements != total_elements {
            return Err(CollectiveError::PlanMismatch {
                local: total_elements,
                received: plan.total_elements,
            });
        }

        debug!(
            rank = self.rank(),
            %mode,
            total_elements,
            local_count = plan.counts[self.rank()],
            "partition plan installed"
        );
        self.mode = mode;
        self.total_elements = total_elements;
        self.plan = Some(plan);
        Ok(())
    }

    /// Replicate the root's `value` to every rank.
    pub async fn broadcast<T: Element>(&self, value: T) -> Result<T> {
        let mut buf = [value];
        collective::broadcast(self.ctx.fabric(), &mut buf, ROOT).await?;
        Ok(buf[0])
    }

    /// Replicate the root's vector to every rank, resizing receivers to match.
    pub async fn broadcast_slice<T: Element + Default>(&self, values: &mut Vec<T>) -> Result<()> {
        let len = self.broadcast(values.len() as u64).await? as usize;
        values.resize(len, T::default());
        collective::broadcast(self.ctx.fabric(), values.as_mut_slice(), ROOT).await
    }

    /// Distribute the root's `whole` array; `local` is resized to this rank's count.
    ///
    /// `whole` is only read on the root, where its length must equal the plan's total.
    pub async fn scatter<T: Element + Default>(&self, whole: &[T], local: &mut Vec<T>) -> Result<()> {
        local.resize(self.local_count()?, T::default());
        self.scatter_into(whole, local).await
    }

    /// Like [`scatter`](Self::scatter) but into a caller-sized slice.
    pub async fn scatter_into<T: Element>(&self, whole: &[T], local: &mut [T]) -> Result<()> {
        let plan = self.installed_plan()?;
        if self.ctx.is_root() {
            check_whole(plan, whole.len())?;
        }
        collective::scatterv(
            self.ctx.fabric(),
            whole,
            &plan.counts,
            &plan.displacements,
            local,
            ROOT,
        )
        .await
    }

    /// Assemble every rank's slice into `whole` on the root.
    ///
    /// On the root `whole` is resized to the plan's total; elsewhere it is untouched.
    pub async fn gather<T: Element + Default>(&self, local: &[T], whole: &mut Vec<T>) -> Result<()> {
        let plan = self.installed_plan()?;
        if self.ctx.is_root() {
            whole.resize(plan.total_elements, T::default());
        }
        collective::gatherv(
            self.ctx.fabric(),
            local,
            whole.as_mut_slice(),
            &plan.counts,
            &plan.displacements,
            ROOT,
        )
        .await
    }

    /// Assemble every rank's slice into `whole` on every rank.
    pub async fn all_gather<T: Element + Default>(&self, local: &[T], whole: &mut Vec<T>) -> Result<()> {
        let plan = self.installed_plan()?;
        whole.resize(plan.total_elements, T::default());
        collective::allgatherv(
            self.ctx.fabric(),
            local,
            whole.as_mut_slice(),
            &plan.counts,
            &plan.displacements,
        )
        .await
    }

    /// Element-wise combination of every rank's `part`, stored in `result` on the root.
    pub async fn reduce<T: Element + Default>(
        &self,
        part: &[T],
        result: &mut Vec<T>,
        op: ReduceOp,
    ) -> Result<()> {
        if self.ctx.is_root() {
            result.resize(part.len(), T::default());
        }
        collective::reduce(self.ctx.fabric(), part, result.as_mut_slice(), op, ROOT).await
    }

    /// Element-wise combination of every rank's `part`, stored in `result` everywhere.
    pub async fn all_reduce<T: Element + Default>(
        &self,
        part: &[T],
        result: &mut Vec<T>,
        op: ReduceOp,
    ) -> Result<()> {
        result.resize(part.len(), T::default());
        collective::allreduce(self.ctx.fabric(), part, result.as_mut_slice(), op).await
    }

    fn installed_plan(&self) -> Result<&PartitionPlan> {
        self.plan.as_ref().ok_or(CollectiveError::Unconfigured)
    }
}

fn check_whole(plan: &PartitionPlan, len: usize) -> Result<()> {
    if len != plan.total_elements {
        return Err(CollectiveError::BufferSizeMismatch {
            expected: plan.total_elements,
            actual: len,
        });
    }
    Ok(())
}

fn to_wire(values: &[usize]) -> Vec<u64> {
    values.iter().map(|&v| v as u64).collect()
}

fn from_wire(values: &[u64]) -> Vec<usize> {
    values.iter().map(|&v| v as usize).collect()
}
