//! Error types for partitioning and collectives

use thiserror::Error;

use crate::collective::DataType;
use crate::partition::DistributionMode;

/// Errors raised by the partition calculator, the coordinator and the fabric
#[derive(Debug, Error)]
pub enum CollectiveError {
    /// A plan-shaped operation was issued before any mode/size was set
    #[error("coordinator is unconfigured: set a mode or element count first")]
    Unconfigured,

    /// Not enough nodes for the requested distribution mode
    #[error("insufficient nodes: need {required}, have {available}")]
    InsufficientNodes { required: usize, available: usize },

    /// Buffer length does not match the partition plan or the peer's payload
    #[error("buffer size mismatch: expected {expected} elements, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Payload was encoded with a different element type
    #[error("datatype mismatch: expected {expected:?}, received {actual:?}")]
    TypeMismatch { expected: DataType, actual: DataType },

    /// Unknown datatype tag on the wire
    #[error("unknown datatype tag {0}")]
    UnknownDataType(u8),

    /// Plan received from the root disagrees with local arguments
    #[error("partition plan mismatch: local total {local} but root distributed {received}")]
    PlanMismatch { local: usize, received: usize },

    /// Root distributed a plan for another distribution mode
    #[error("distribution mode mismatch: local {local} but root distributed {received}")]
    ModeMismatch {
        local: DistributionMode,
        received: DistributionMode,
    },

    /// Rank outside of [0, world_size)
    #[error("invalid peer rank {rank} (world size {world_size})")]
    InvalidRank { rank: usize, world_size: usize },

    /// Configuration rejected before bring-up
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Mesh bring-up failed
    #[error("failed to connect to rank {rank}: {reason}")]
    ConnectionFailed { rank: usize, reason: String },

    /// Incoming frame announced more bytes than the fabric accepts
    #[error("frame of {len} bytes from rank {peer} exceeds limit of {limit}")]
    FrameTooLarge { peer: usize, len: u64, limit: usize },

    /// Peer hung up mid-collective
    #[error("peer rank {0} closed the connection")]
    PeerClosed(usize),

    /// Context still shared by coordinators at teardown
    #[error("cluster context still referenced by {0} other handle(s)")]
    ContextInUse(usize),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for collective operations
pub type Result<T> = std::result::Result<T, CollectiveError>;
