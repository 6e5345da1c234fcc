use crate::types::Rank;

pub type Result<T> = std::result::Result<T, ChainError>;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("peer {rank} disconnected unexpectedly")]
    PeerDisconnected { rank: Rank },

    #[error("rank {rank} not found in communicator")]
    UnknownPeer { rank: Rank },

    #[error("invalid rank {rank}: communicator size is {size}")]
    InvalidRank { rank: Rank, size: u32 },

    #[error("protocol version mismatch: local={local}, remote={remote}")]
    ProtocolMismatch { local: u16, remote: u16 },

    #[error("message decode failed: {0}")]
    DecodeFailed(String),

    #[error("message encode failed: {0}")]
    EncodeFailed(String),

    #[error("frame of {len} bytes exceeds limit of {limit} bytes")]
    FrameTooLarge { len: usize, limit: usize },

    #[error("announced length {announced} bytes, received {actual} bytes")]
    LengthMismatch { announced: usize, actual: usize },

    #[error("transport error: {message}")]
    Transport {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} failed at step {step} (peer rank {rank}): {reason}")]
    Messaging {
        operation: &'static str,
        step: usize,
        rank: Rank,
        reason: String,
    },

    #[error("chain handshake {operation} with rank {rank} failed: {reason}")]
    HandshakeFailed {
        operation: &'static str,
        rank: Rank,
        reason: String,
    },

    #[error("sub-stream count {sub_streams} is invalid for a parent group of {parent_size}")]
    InvalidSubStreams { sub_streams: usize, parent_size: u32 },

    #[error("parent group of {parent_size} cannot be split into {sub_streams} equal chains")]
    UnevenChains { sub_streams: usize, parent_size: u32 },

    #[error("chain handshake mismatch: expected {expected}, got {actual}")]
    HandshakeMismatch { expected: Rank, actual: Rank },

    #[error("{operation}: an existing absolute position exchange is still active")]
    ExchangeActive { operation: &'static str },

    #[error("{operation}: no absolute position exchange is active")]
    ExchangeNotActive { operation: &'static str },

    #[error("wait at step {waited} does not match exchange issued at step {issued}")]
    StepMismatch { issued: usize, waited: usize },

    #[error("no pending {operation} to wait on at step {step}")]
    NoPendingOperation { operation: &'static str, step: usize },

    #[error("step {step} out of range for chain of size {size}")]
    StepOutOfRange { step: usize, size: u32 },

    #[error("absolute position overflow: {running_total} + {local_size} exceeds u64")]
    OffsetOverflow { running_total: u64, local_size: u64 },

    #[error("cannot shrink buffer from {current} to {requested} bytes")]
    BufferShrink { current: usize, requested: usize },

    #[error("aggregator is closed")]
    Inactive,
}

impl ChainError {
    /// Create a `Transport` error with just a message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `Transport` error with a message and a source error.
    pub fn transport_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Wrap a substrate failure with the chain operation and step it hit.
    pub fn messaging(operation: &'static str, step: usize, rank: Rank, err: ChainError) -> Self {
        Self::Messaging {
            operation,
            step,
            rank,
            reason: err.to_string(),
        }
    }
}
