use crate::{CollectiveError, Result};

/// Core abstraction for the point-to-point transport under the collectives.
/// Implementations can be TCP (multi-process) or in-process channels (testing).
///
/// Messages are framed: one `send` pairs with exactly one `recv` on the peer,
/// and messages between a given pair of ranks arrive in order.
#[async_trait::async_trait]
pub trait Fabric: Send + Sync {
    /// Send one message to peer (by rank)
    async fn send(&self, peer: usize, buf: &[u8]) -> Result<()>;

    /// Receive the next message from peer
    async fn recv(&self, peer: usize) -> Result<Vec<u8>>;

    /// This process's rank
    fn rank(&self) -> usize;

    /// Total number of processes
    fn world_size(&self) -> usize;

    /// Release transport resources. Called once, after the final barrier.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Reject self-sends and out-of-range peers
pub(crate) fn check_peer(rank: usize, world_size: usize, peer: usize) -> Result<()> {
    if peer >= world_size || peer == rank {
        return Err(CollectiveError::InvalidRank { rank: peer, world_size });
    }
    Ok(())
}

pub mod local;
pub mod tcp;

pub use local::LocalFabric;
pub use tcp::{TcpFabric, TcpFabricConfig};
