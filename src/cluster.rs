//! Group identity and fabric lifetime

use std::fmt;
use std::sync::Arc;

use tracing::{info, warn};

use crate::collective;
use crate::fabric::{Fabric, LocalFabric, TcpFabric, TcpFabricConfig};
use crate::{CollectiveError, Result};

/// This process's rank and the group size, plus the fabric connecting the group.
///
/// Built once at program entry and shared by every coordinator through an
/// `Arc`. Rank and size never change after construction. Teardown happens in
/// [`ClusterContext::finalize`], which consumes the context and therefore runs
/// at most once.
pub struct ClusterContext {
    rank: usize,
    size: usize,
    fabric: Box<dyn Fabric>,
    finalized: bool,
}

impl ClusterContext {
    /// Take ownership of an initialized fabric and record its identity.
    pub fn new(fabric: impl Fabric + 'static) -> Self {
        let rank = fabric.rank();
        let size = fabric.world_size();
        info!(rank, size, "cluster context initialized");
        Self {
            rank,
            size,
            fabric: Box::new(fabric),
            finalized: false,
        }
    }

    /// Bring up a TCP mesh and wrap it.
    pub async fn connect_tcp(config: TcpFabricConfig) -> Result<Self> {
        Ok(Self::new(TcpFabric::new(config).await?))
    }

    /// One context per rank of an in-process group, indexed by rank.
    pub fn local_group(size: usize) -> Result<Vec<Self>> {
        Ok(LocalFabric::mesh(size)?
            .into_iter()
            .map(|fabric| Self::new(fabric))
            .collect())
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    pub fn fabric(&self) -> &dyn Fabric {
        self.fabric.as_ref()
    }

    /// Wait for every rank to reach this point.
    pub async fn barrier(&self) -> Result<()> {
        collective::barrier(self.fabric()).await
    }

    /// Synchronize with the group and release the fabric.
    pub async fn finalize(mut self) -> Result<()> {
        self.barrier().await?;
        self.fabric.shutdown().await?;
        self.finalized = true;
        info!(rank = self.rank, "cluster context finalized");
        Ok(())
    }

    /// Finalize a context shared by coordinators; fails while other handles are alive.
    pub async fn finalize_shared(this: Arc<Self>) -> Result<()> {
        match Arc::try_unwrap(this) {
            Ok(ctx) => ctx.finalize().await,
            Err(shared) => Err(CollectiveError::ContextInUse(Arc::strong_count(&shared) - 1)),
        }
    }
}

impl fmt::Debug for ClusterContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterContext")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("finalized", &self.finalized)
            .finish()
    }
}

impl Drop for ClusterContext {
    fn drop(&mut self) {
        if !self.finalized {
            warn!(rank = self.rank, "cluster context dropped without finalize");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_group_identity() {
        let group = ClusterContext::local_group(3).unwrap();
        assert_eq!(group.len(), 3);
        for (i, ctx) in group.iter().enumerate() {
            assert_eq!(ctx.rank(), i);
            assert_eq!(ctx.size(), 3);
            assert_eq!(ctx.is_root(), i == 0);
        }
    }

    #[tokio::test]
    async fn test_finalize_all_ranks() {
        let handles: Vec<_> = ClusterContext::local_group(3)
            .unwrap()
            .into_iter()
            .map(|ctx| tokio::spawn(ctx.finalize()))
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_finalize_shared_in_use() {
        let ctx = Arc::new(ClusterContext::local_group(1).unwrap().remove(0));
        let other = Arc::clone(&ctx);

        let err = ClusterContext::finalize_shared(ctx).await.unwrap_err();
        assert!(matches!(err, CollectiveError::ContextInUse(1)));

        ClusterContext::finalize_shared(other).await.unwrap();
    }
}
