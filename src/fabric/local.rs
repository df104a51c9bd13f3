use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;

use super::{check_peer, Fabric};
use crate::{CollectiveError, Result};

/// In-process fabric: every ordered pair of ranks gets its own channel.
/// Used to run a whole group as tokio tasks inside one process.
pub struct LocalFabric {
    rank: usize,
    world_size: usize,
    /// Outgoing channels indexed by destination rank
    outbox: Vec<Option<UnboundedSender<Vec<u8>>>>,
    /// Incoming channels indexed by source rank
    inbox: Vec<Option<Mutex<UnboundedReceiver<Vec<u8>>>>>,
}

impl LocalFabric {
    /// Create a fully connected group of `world_size` fabrics, indexed by rank.
    pub fn mesh(world_size: usize) -> Result<Vec<Self>> {
        if world_size == 0 {
            return Err(CollectiveError::InvalidConfig("world_size must be at least 1".into()));
        }

        let mut outboxes: Vec<Vec<Option<UnboundedSender<Vec<u8>>>>> =
            (0..world_size).map(|_| (0..world_size).map(|_| None).collect()).collect();
        let mut inboxes: Vec<Vec<Option<Mutex<UnboundedReceiver<Vec<u8>>>>>> =
            (0..world_size).map(|_| (0..world_size).map(|_| None).collect()).collect();

        for from in 0..world_size {
            for to in 0..world_size {
                if from == to {
                    continue;
                }
                let (tx, rx) = unbounded_channel();
                outboxes[from][to] = Some(tx);
                inboxes[to][from] = Some(Mutex::new(rx));
            }
        }

        Ok(outboxes
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(rank, (outbox, inbox))| Self {
                rank,
                world_size,
                outbox,
                inbox,
            })
            .collect())
    }
}

#[async_trait::async_trait]
impl Fabric for LocalFabric {
    async fn send(&self, peer: usize, buf: &[u8]) -> Result<()> {
        check_peer(self.rank, self.world_size, peer)?;
        let tx = self.outbox[peer].as_ref().ok_or(CollectiveError::PeerClosed(peer))?;
        tx.send(buf.to_vec()).map_err(|_| CollectiveError::PeerClosed(peer))
    }

    async fn recv(&self, peer: usize) -> Result<Vec<u8>> {
        check_peer(self.rank, self.world_size, peer)?;
        let rx = self.inbox[peer].as_ref().ok_or(CollectiveError::PeerClosed(peer))?;
        let mut guard = rx.lock().await;
        guard.recv().await.ok_or(CollectiveError::PeerClosed(peer))
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_ranks() {
        let mesh = LocalFabric::mesh(4).unwrap();
        assert_eq!(mesh.len(), 4);
        for (i, f) in mesh.iter().enumerate() {
            assert_eq!(f.rank(), i);
            assert_eq!(f.world_size(), 4);
        }
    }

    #[test]
    fn test_empty_mesh_rejected() {
        assert!(LocalFabric::mesh(0).is_err());
    }

    #[tokio::test]
    async fn test_messages_keep_order() {
        let mut mesh = LocalFabric::mesh(2).unwrap();
        let b = mesh.pop().unwrap();
        let a = mesh.pop().unwrap();

        a.send(1, b"first").await.unwrap();
        a.send(1, b"second").await.unwrap();

        assert_eq!(b.recv(0).await.unwrap(), b"first");
        assert_eq!(b.recv(0).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_dropped_peer_reports_closed() {
        let mut mesh = LocalFabric::mesh(2).unwrap();
        let b = mesh.pop().unwrap();
        let a = mesh.pop().unwrap();
        drop(a);

        assert!(matches!(b.recv(0).await, Err(CollectiveError::PeerClosed(0))));
        assert!(matches!(b.send(0, b"x").await, Err(CollectiveError::PeerClosed(0))));
    }
}
