use crate::comm::Communicator;
use crate::config::AggregatorConfig;
use crate::error::{ChainError, Result};
use crate::memory::GrowableBuffer;
use crate::protocol::ChainMessage;
use crate::types::{BufferOrder, Rank, tags};

use super::{ChainAggregator, OffsetState};

/// Chain rank every transfer drains toward.
const CHAIN_SINK: Rank = 0;

/// Where a parent rank lands when the parent group is cut into equal chains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct ChainLayout {
    pub chain_size: u32,
    pub index: usize,
    pub chain_rank: Rank,
    pub consumer_rank: Rank,
}

impl ChainLayout {
    pub(super) fn compute(sub_streams: usize, parent_rank: Rank, parent_size: u32) -> Result<Self> {
        if sub_streams == 0 || sub_streams > parent_size as usize {
            return Err(ChainError::InvalidSubStreams {
                sub_streams,
                parent_size,
            });
        }
        if parent_size as usize % sub_streams != 0 {
            return Err(ChainError::UnevenChains {
                sub_streams,
                parent_size,
            });
        }
        let chain_size = parent_size / sub_streams as u32;
        let index = parent_rank / chain_size;
        Ok(Self {
            chain_size,
            index: index as usize,
            chain_rank: parent_rank % chain_size,
            consumer_rank: index * chain_size,
        })
    }
}

impl ChainAggregator {
    /// Form the chains and run both handshakes.
    ///
    /// Collective over `parent`: every parent rank must call it with the
    /// same `config.sub_streams`.
    pub async fn init(parent: &Communicator, config: &AggregatorConfig) -> Result<Self> {
        let mut agg = Self::init_comm(config.sub_streams, parent).await?;
        agg.scratch = GrowableBuffer::with_capacity(config.scratch_capacity_bytes);
        agg.handshake_rank(CHAIN_SINK).await?;
        agg.handshake_links().await?;
        Ok(agg)
    }

    /// Split `parent` into `sub_streams` contiguous chains of equal size.
    ///
    /// No handshakes run here; [`init`](Self::init) is the usual entry point.
    pub async fn init_comm(sub_streams: usize, parent: &Communicator) -> Result<Self> {
        let layout = ChainLayout::compute(sub_streams, parent.rank(), parent.size())?;
        let comm = parent.split(layout.index as u32, parent.rank()).await?;

        tracing::debug!(
            parent_rank = parent.rank(),
            sub_streams,
            chain = layout.index,
            chain_rank = comm.rank(),
            chain_size = comm.size(),
            consumer_rank = layout.consumer_rank,
            "chain formed"
        );

        Ok(Self {
            comm,
            sub_streams,
            sub_stream_index: layout.index,
            consumer_rank: layout.consumer_rank,
            sink_rank: CHAIN_SINK,
            is_active: true,
            scratch: GrowableBuffer::new(),
            order: BufferOrder::Default,
            offset: OffsetState::default(),
        })
    }

    /// Agree on the sink. The sink announces itself to every other member,
    /// and each member checks the announcement against `sink`.
    ///
    /// The transfer and offset protocols drain toward chain rank 0, so that
    /// is the only sink accepted.
    pub async fn handshake_rank(&mut self, sink: Rank) -> Result<()> {
        self.ensure_active()?;
        let size = self.comm.size();
        if sink >= size {
            return Err(ChainError::InvalidRank { rank: sink, size });
        }
        if sink != CHAIN_SINK {
            return Err(ChainError::HandshakeMismatch {
                expected: CHAIN_SINK,
                actual: sink,
            });
        }
        let rank = self.comm.rank();

        if rank == sink {
            let msg = ChainMessage::SinkAnnounce { sink };
            let mut sends = Vec::with_capacity(size as usize);
            for peer in (0..size).filter(|&p| p != sink) {
                sends.push((peer, self.comm.isend_message(peer, tags::SINK, &msg)?));
            }
            for (peer, req) in sends {
                req.wait().await.map_err(|e| handshake_error("sink announce", peer, e))?;
            }
        } else {
            let announced = self
                .comm
                .recv_message(sink, tags::SINK)
                .await
                .map_err(|e| handshake_error("sink receive", sink, e))?;
            match announced {
                ChainMessage::SinkAnnounce { sink: got } if got == sink => {}
                ChainMessage::SinkAnnounce { sink: got } => {
                    return Err(ChainError::HandshakeMismatch {
                        expected: sink,
                        actual: got,
                    });
                }
                other => {
                    return Err(ChainError::DecodeFailed(format!(
                        "expected SinkAnnounce from rank {sink}, got {other:?}"
                    )));
                }
            }
        }

        self.sink_rank = sink;
        tracing::trace!(rank, sink, "sink handshake done");
        Ok(())
    }

    /// Neighbor adjacency check. Returns once this rank has heard from
    /// `rank + 1` and its own id has reached `rank - 1`.
    pub async fn handshake_links(&self) -> Result<()> {
        self.ensure_active()?;
        let rank = self.comm.rank();
        let size = self.comm.size();

        let send = if rank > 0 {
            let msg = ChainMessage::LinkHandshake { rank };
            Some(self.comm.isend_message(rank - 1, tags::LINK, &msg)?)
        } else {
            None
        };

        if rank + 1 < size {
            let upstream = rank + 1;
            let msg = self
                .comm
                .recv_message(upstream, tags::LINK)
                .await
                .map_err(|e| handshake_error("link receive", upstream, e))?;
            match msg {
                ChainMessage::LinkHandshake { rank: got } if got == upstream => {}
                ChainMessage::LinkHandshake { rank: got } => {
                    return Err(ChainError::HandshakeMismatch {
                        expected: upstream,
                        actual: got,
                    });
                }
                other => {
                    return Err(ChainError::DecodeFailed(format!(
                        "expected LinkHandshake from rank {upstream}, got {other:?}"
                    )));
                }
            }
        }

        if let Some(req) = send {
            req.wait()
                .await
                .map_err(|e| handshake_error("link send", rank - 1, e))?;
        }

        tracing::trace!(rank, "link handshake done");
        Ok(())
    }

    /// Deactivate this aggregator. Further protocol calls fail with
    /// [`ChainError::Inactive`]. The shared transport stays open.
    pub fn close(&mut self) {
        if self.is_active {
            tracing::debug!(
                chain = self.sub_stream_index,
                rank = self.comm.rank(),
                "aggregator closed"
            );
        }
        self.is_active = false;
        self.offset.active = false;
    }
}

fn handshake_error(operation: &'static str, rank: Rank, err: ChainError) -> ChainError {
    ChainError::HandshakeFailed {
        operation,
        rank,
        reason: err.to_string(),
    }
}
