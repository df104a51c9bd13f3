use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::{check_peer, Fabric};
use crate::{CollectiveError, Result};

const RETRY_DELAY: Duration = Duration::from_millis(50);

/// Default cap on a single incoming frame
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1 << 30;

/// Bring-up parameters for a [`TcpFabric`]
#[derive(Debug, Clone)]
pub struct TcpFabricConfig {
    /// This process's rank
    pub rank: usize,
    /// Number of ranks in the group
    pub world_size: usize,
    /// Listen address of every rank, indexed by rank
    pub addrs: Vec<SocketAddr>,
    /// How long to keep retrying connections to lower ranks
    pub connect_timeout: Duration,
    /// Frames announcing more bytes than this are rejected before allocation
    pub max_frame_bytes: usize,
}

impl TcpFabricConfig {
    pub fn new(rank: usize, world_size: usize, addrs: Vec<SocketAddr>) -> Self {
        Self {
            rank,
            world_size,
            addrs,
            connect_timeout: Duration::from_secs(30),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = limit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 {
            return Err(CollectiveError::InvalidConfig("world_size must be at least 1".into()));
        }
        if self.rank >= self.world_size {
            return Err(CollectiveError::InvalidConfig(format!(
                "rank {} out of range for world_size {}",
                self.rank, self.world_size
            )));
        }
        if self.addrs.len() != self.world_size {
            return Err(CollectiveError::InvalidConfig(format!(
                "addrs.len() {} != world_size {}",
                self.addrs.len(),
                self.world_size
            )));
        }
        Ok(())
    }
}

/// One peer connection, split so a send and a recv can overlap
struct Peer {
    reader: Mutex<OwnedReadHalf>,
    writer: Mutex<OwnedWriteHalf>,
}

/// Full-mesh TCP fabric.
/// Every rank holds one stream per peer; frames are an 8-byte LE length plus payload.
pub struct TcpFabric {
    rank: usize,
    world_size: usize,
    max_frame_bytes: usize,
    /// Peers indexed by rank (own rank slot is None)
    peers: Vec<Option<Arc<Peer>>>,
}

impl TcpFabric {
    /// Bind this rank's address and build the mesh.
    /// All ranks must call this simultaneously with the same addrs list.
    pub async fn new(config: TcpFabricConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.addrs[config.rank]).await?;
        Self::with_listener(config, listener).await
    }

    /// Build the mesh on an already bound listener.
    pub async fn with_listener(config: TcpFabricConfig, listener: TcpListener) -> Result<Self> {
        config.validate()?;
        let TcpFabricConfig {
            rank,
            world_size,
            addrs,
            connect_timeout,
            max_frame_bytes,
        } = config;

        let mut peers: Vec<Option<Arc<Peer>>> = vec![None; world_size];

        // Connect to lower ranks, announcing our rank
        for (i, addr) in addrs.iter().enumerate().take(rank) {
            let mut stream = connect_with_retry(i, *addr, connect_timeout).await?;
            stream.write_all(&(rank as u32).to_le_bytes()).await?;
            peers[i] = Some(Arc::new(split(stream)?));
            debug!(rank, peer = i, %addr, "connected to lower rank");
        }

        // Accept from higher ranks, in whatever order they arrive
        for _ in rank + 1..world_size {
            let (mut stream, remote) = listener.accept().await?;
            let mut hello = [0u8; 4];
            stream.read_exact(&mut hello).await?;
            let peer = u32::from_le_bytes(hello) as usize;

            if peer <= rank || peer >= world_size || peers[peer].is_some() {
                return Err(CollectiveError::ConnectionFailed {
                    rank: peer,
                    reason: format!("unexpected handshake from {}", remote),
                });
            }
            peers[peer] = Some(Arc::new(split(stream)?));
            debug!(rank, peer, %remote, "accepted higher rank");
        }

        info!(rank, world_size, "tcp mesh established");

        Ok(Self {
            rank,
            world_size,
            max_frame_bytes,
            peers,
        })
    }

    fn get_peer(&self, peer: usize) -> Result<Arc<Peer>> {
        check_peer(self.rank, self.world_size, peer)?;
        self.peers
            .get(peer)
            .and_then(|p| p.clone())
            .ok_or(CollectiveError::InvalidRank {
                rank: peer,
                world_size: self.world_size,
            })
    }
}

fn split(stream: TcpStream) -> Result<Peer> {
    stream.set_nodelay(true)?;
    let (reader, writer) = stream.into_split();
    Ok(Peer {
        reader: Mutex::new(reader),
        writer: Mutex::new(writer),
    })
}

async fn connect_with_retry(rank: usize, addr: SocketAddr, timeout: Duration) -> Result<TcpStream> {
    let deadline = Instant::now() + timeout;
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) if Instant::now() < deadline => {
                debug!(peer = rank, %addr, error = %e, "connect failed, retrying");
                sleep(RETRY_DELAY).await;
            }
            Err(e) => {
                return Err(CollectiveError::ConnectionFailed {
                    rank,
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn closed_or_io(peer: usize, e: std::io::Error) -> CollectiveError {
    match e.kind() {
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
            CollectiveError::PeerClosed(peer)
        }
        _ => CollectiveError::Io(e),
    }
}

#[async_trait::async_trait]
impl Fabric for TcpFabric {
    async fn send(&self, peer: usize, buf: &[u8]) -> Result<()> {
        let stream = self.get_peer(peer)?;
        let mut guard = stream.writer.lock().await;
        guard
            .write_all(&(buf.len() as u64).to_le_bytes())
            .await
            .map_err(|e| closed_or_io(peer, e))?;
        guard.write_all(buf).await.map_err(|e| closed_or_io(peer, e))?;
        Ok(())
    }

    async fn recv(&self, peer: usize) -> Result<Vec<u8>> {
        let stream = self.get_peer(peer)?;
        let mut guard = stream.reader.lock().await;
        let mut header = [0u8; 8];
        guard
            .read_exact(&mut header)
            .await
            .map_err(|e| closed_or_io(peer, e))?;
        let len = u64::from_le_bytes(header);
        if len > self.max_frame_bytes as u64 {
            return Err(CollectiveError::FrameTooLarge {
                peer,
                len,
                limit: self.max_frame_bytes,
            });
        }
        let mut buf = vec![0u8; len as usize];
        guard.read_exact(&mut buf).await.map_err(|e| closed_or_io(peer, e))?;
        Ok(buf)
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    async fn shutdown(&self) -> Result<()> {
        for peer in self.peers.iter().flatten() {
            let mut guard = peer.writer.lock().await;
            guard.shutdown().await?;
        }
        Ok(())
    }
}
