//! Communicators: rank-translated, tag-isolated views over a [`Transport`].

mod hash;
mod outbox;
mod request;
mod split;

pub use request::{RecvRequest, Request, SendRequest};

use crate::error::{ChainError, Result};
use crate::protocol::{ChainMessage, decode_message, decode_u64, encode_message, encode_u64};
use crate::transport::Transport;
use crate::types::{Rank, Tag};
use outbox::Outbox;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A process group with its own rank numbering and message namespace.
///
/// The root communicator covers every transport rank. [`split`] derives
/// sub-communicators whose traffic is isolated by a `comm_id` folded into
/// the upper half of every wire tag.
///
/// Non-blocking sends to the same destination leave this process in issue
/// order: `isend` enqueues synchronously onto a per-destination outbox.
///
/// [`split`]: Communicator::split
pub struct Communicator {
    transport: Arc<dyn Transport>,
    rank: Rank,
    size: u32,
    /// 0 = root communicator.
    comm_id: u32,
    /// Communicator rank -> transport rank.
    rank_map: Arc<[Rank]>,
    outbox: Outbox,
    /// Advanced in lockstep by every member, since `split` is collective.
    split_generation: AtomicU64,
}

impl Communicator {
    /// Wrap a transport as the root communicator.
    pub fn world(transport: Arc<dyn Transport>) -> Self {
        let rank_map: Arc<[Rank]> = (0..transport.world_size()).collect();
        Self::from_parts(Arc::clone(&transport), transport.rank(), 0, rank_map)
    }

    fn from_parts(
        transport: Arc<dyn Transport>,
        rank: Rank,
        comm_id: u32,
        rank_map: Arc<[Rank]>,
    ) -> Self {
        Self {
            outbox: Outbox::new(Arc::clone(&transport)),
            size: rank_map.len() as u32,
            transport,
            rank,
            comm_id,
            rank_map,
            split_generation: AtomicU64::new(0),
        }
    }

    /// This process's rank within the communicator (0-indexed).
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of ranks in the communicator.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// The communicator ID (0 = root communicator).
    pub fn comm_id(&self) -> u32 {
        self.comm_id
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Translate a communicator rank to the transport rank it runs on.
    pub fn transport_rank(&self, rank: Rank) -> Result<Rank> {
        self.rank_map
            .get(rank as usize)
            .copied()
            .ok_or(ChainError::InvalidRank {
                rank,
                size: self.size,
            })
    }

    fn wire_tag(&self, tag: Tag) -> u64 {
        ((self.comm_id as u64) << 32) | tag as u64
    }

    /// Start a non-blocking send of `payload` to `dest`.
    pub fn isend(&self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<SendRequest> {
        let target = self.transport_rank(dest)?;
        let done = self.outbox.push(target, self.wire_tag(tag), payload);
        Ok(Request::spawn(async move {
            done.await
                .map_err(|_| ChainError::transport("outbox worker stopped"))?
        }))
    }

    /// Start a non-blocking receive from `src`.
    pub fn irecv(&self, src: Rank, tag: Tag) -> Result<RecvRequest> {
        let source = self.transport_rank(src)?;
        let wire = self.wire_tag(tag);
        let transport = Arc::clone(&self.transport);
        Ok(Request::spawn(async move {
            transport.recv(source, wire).await
        }))
    }

    /// Blocking send.
    pub async fn send(&self, dest: Rank, tag: Tag, payload: Vec<u8>) -> Result<()> {
        self.isend(dest, tag, payload)?.wait().await
    }

    /// Blocking receive.
    pub async fn recv(&self, src: Rank, tag: Tag) -> Result<Vec<u8>> {
        let source = self.transport_rank(src)?;
        self.transport.recv(source, self.wire_tag(tag)).await
    }

    /// Non-blocking send of a fixed-width length or offset.
    pub fn isend_u64(&self, dest: Rank, tag: Tag, value: u64) -> Result<SendRequest> {
        self.isend(dest, tag, encode_u64(value))
    }

    /// Blocking receive of a fixed-width length or offset.
    pub async fn recv_u64(&self, src: Rank, tag: Tag) -> Result<u64> {
        decode_u64(&self.recv(src, tag).await?)
    }

    /// Non-blocking send of an rkyv-encoded control message.
    pub fn isend_message(&self, dest: Rank, tag: Tag, msg: &ChainMessage) -> Result<SendRequest> {
        self.isend(dest, tag, encode_message(msg)?)
    }

    /// Blocking receive of an rkyv-encoded control message.
    pub async fn recv_message(&self, src: Rank, tag: Tag) -> Result<ChainMessage> {
        decode_message(&self.recv(src, tag).await?)
    }

    /// Close the underlying transport endpoint.
    pub fn close(&self) {
        self.transport.close();
    }

    pub(super) fn next_split_generation(&self) -> u64 {
        self.split_generation.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Communicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("comm_id", &self.comm_id)
            .field("rank_map", &self.rank_map)
            .finish()
    }
}
