//! Chain aggregation over a split communicator.
//!
//! Each chain is a contiguous slice of the parent group. Rank 0 of the chain
//! is the sink; every other rank hands its contribution one hop toward the
//! sink per round, relaying what it received upstream on later rounds.

mod group;
mod offset;
mod transfer;

pub use offset::OffsetHandle;
pub use transfer::{ExchangeHandle, ExchangeSession, OpKind, PendingOp};

use crate::comm::Communicator;
use crate::error::{ChainError, Result};
use crate::memory::GrowableBuffer;
use crate::types::{BufferOrder, Rank};

/// State of the ring-based global offset exchange.
#[derive(Debug, Default)]
struct OffsetState {
    /// Set from the first `iexchange_absolute_position` of a round until
    /// its matching wait.
    active: bool,
    /// Bytes this rank contributes to the merged stream, captured at step 0.
    local_size: u64,
    /// Last value this rank put on the ring.
    exchange_value: u64,
    /// Total merged length, delivered to rank 0 by the ring's wrap-around.
    stream_end: Option<u64>,
}

/// One process's view of its aggregation chain.
///
/// Built collectively by [`ChainAggregator::init`]. The aggregator owns the
/// scratch half of the buffer pair; the caller supplies the working half on
/// every call.
pub struct ChainAggregator {
    comm: Communicator,
    sub_streams: usize,
    sub_stream_index: usize,
    consumer_rank: Rank,
    sink_rank: Rank,
    is_active: bool,
    scratch: GrowableBuffer,
    order: BufferOrder,
    offset: OffsetState,
}

impl ChainAggregator {
    /// Rank within the chain.
    pub fn rank(&self) -> Rank {
        self.comm.rank()
    }

    /// Number of ranks in the chain.
    pub fn size(&self) -> u32 {
        self.comm.size()
    }

    /// Number of chains the parent group was split into.
    pub fn sub_streams(&self) -> usize {
        self.sub_streams
    }

    /// Which chain this process belongs to.
    pub fn sub_stream_index(&self) -> usize {
        self.sub_stream_index
    }

    /// Parent-communicator rank of this chain's sink.
    pub fn consumer_rank(&self) -> Rank {
        self.consumer_rank
    }

    /// Chain rank recorded by the sink handshake.
    pub fn sink_rank(&self) -> Rank {
        self.sink_rank
    }

    pub fn is_consumer(&self) -> bool {
        self.comm.rank() == self.sink_rank
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn buffer_order(&self) -> BufferOrder {
        self.order
    }

    /// The chain communicator.
    pub fn comm(&self) -> &Communicator {
        &self.comm
    }

    /// The aggregator-owned half of the buffer pair.
    pub fn scratch(&self) -> &GrowableBuffer {
        &self.scratch
    }

    /// Total merged length, known on rank 0 after a complete offset run.
    pub fn stream_end(&self) -> Option<u64> {
        self.offset.stream_end
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_active {
            Ok(())
        } else {
            Err(ChainError::Inactive)
        }
    }

    fn check_step(&self, step: usize) -> Result<()> {
        let size = self.comm.size();
        if step >= size as usize {
            return Err(ChainError::StepOutOfRange { step, size });
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChainAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainAggregator")
            .field("rank", &self.rank())
            .field("size", &self.size())
            .field("sub_stream_index", &self.sub_stream_index)
            .field("consumer_rank", &self.consumer_rank)
            .field("order", &self.order)
            .field("is_active", &self.is_active)
            .finish_non_exhaustive()
    }
}

/// Split `[working, scratch]` into `(sender view, receiver view)` under `order`.
fn buffer_pair<'a>(
    order: BufferOrder,
    working: &'a mut GrowableBuffer,
    scratch: &'a mut GrowableBuffer,
) -> (&'a mut GrowableBuffer, &'a mut GrowableBuffer) {
    let [first, second] = [working, scratch];
    if order.sender_index() == 0 {
        (first, second)
    } else {
        (second, first)
    }
}
