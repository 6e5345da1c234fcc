use crate::comm::{RecvRequest, SendRequest};
use crate::error::{ChainError, Result};
use crate::memory::GrowableBuffer;
use crate::protocol::decode_u64;
use crate::types::{Rank, tags};

use super::ChainAggregator;

/// One round of the offset ring, as posted by
/// [`ChainAggregator::iexchange_absolute_position`].
#[derive(Debug, Default)]
pub struct OffsetHandle {
    step: usize,
    send: Option<SendRequest>,
    recv: Option<RecvRequest>,
}

impl OffsetHandle {
    pub fn step(&self) -> usize {
        self.step
    }
}

/// Receiver of the value put on the ring at `step`. The last rank wraps
/// back to rank 0.
fn ring_destination(step: usize, size: u32) -> Rank {
    if step + 1 == size as usize {
        0
    } else {
        step as Rank + 1
    }
}

impl ChainAggregator {
    /// Post round `step` of the offset ring.
    ///
    /// Only rank `step` sends: its local size plus the running total it
    /// holds as its own absolute position. At step 0 every rank records its
    /// local size (`buffer.position()`). Rank 0 seeds the ring with its
    /// existing absolute position.
    pub fn iexchange_absolute_position(
        &mut self,
        buffer: &GrowableBuffer,
        step: usize,
    ) -> Result<OffsetHandle> {
        const OP: &str = "iexchange_absolute_position";
        self.ensure_active()?;
        let size = self.comm.size();
        if size == 1 {
            return Ok(OffsetHandle {
                step,
                ..OffsetHandle::default()
            });
        }
        if self.offset.active {
            return Err(ChainError::ExchangeActive { operation: OP });
        }
        self.check_step(step)?;

        let rank = self.comm.rank();
        let destination = ring_destination(step, size);
        if step == 0 {
            self.offset.local_size = buffer.position() as u64;
        }

        let mut handle = OffsetHandle {
            step,
            ..OffsetHandle::default()
        };
        if rank as usize == step {
            let running_total = buffer.absolute_position();
            let value = running_total.checked_add(self.offset.local_size).ok_or(
                ChainError::OffsetOverflow {
                    running_total,
                    local_size: self.offset.local_size,
                },
            )?;
            self.offset.exchange_value = value;
            let req = self
                .comm
                .isend_u64(destination, tags::ABSOLUTE_POSITION, value)
                .map_err(|e| ChainError::messaging("send absolute position", step, destination, e))?;
            handle.send = Some(req);
        } else if rank == destination {
            let src = step as Rank;
            let req = self
                .comm
                .irecv(src, tags::ABSOLUTE_POSITION)
                .map_err(|e| ChainError::messaging("receive absolute position", step, src, e))?;
            handle.recv = Some(req);
        }

        self.offset.active = true;
        Ok(handle)
    }

    /// Complete round `step` of the offset ring and clear the guard.
    ///
    /// The destination stores the received total as its absolute position,
    /// except rank 0 on the final round: the wrapped total is the merged
    /// stream length and is kept as [`stream_end`](Self::stream_end).
    pub async fn wait_absolute_position(
        &mut self,
        handle: OffsetHandle,
        buffer: &mut GrowableBuffer,
        step: usize,
    ) -> Result<()> {
        const OP: &str = "wait_absolute_position";
        self.ensure_active()?;
        let size = self.comm.size();
        if size == 1 {
            return Ok(());
        }
        if !self.offset.active {
            return Err(ChainError::ExchangeNotActive { operation: OP });
        }
        if handle.step != step {
            return Err(ChainError::StepMismatch {
                issued: handle.step,
                waited: step,
            });
        }

        let result = self.complete_offset_round(handle, buffer, step, size).await;
        self.offset.active = false;
        result
    }

    async fn complete_offset_round(
        &mut self,
        handle: OffsetHandle,
        buffer: &mut GrowableBuffer,
        step: usize,
        size: u32,
    ) -> Result<()> {
        let rank = self.comm.rank();
        let destination = ring_destination(step, size);

        if let Some(req) = handle.recv {
            let src = step as Rank;
            let raw = req
                .wait()
                .await
                .map_err(|e| ChainError::messaging("receive absolute position", step, src, e))?;
            let value = decode_u64(&raw)
                .map_err(|e| ChainError::messaging("receive absolute position", step, src, e))?;
            if rank == 0 {
                self.offset.stream_end = Some(value);
                tracing::debug!(
                    chain = self.sub_stream_index,
                    stream_end = value,
                    "offset ring closed"
                );
            } else {
                buffer.set_absolute_position(value);
                tracing::trace!(rank, step, absolute_position = value, "offset received");
            }
        }

        if let Some(req) = handle.send {
            req.wait().await.map_err(|e| {
                ChainError::messaging("send absolute position", step, destination, e)
            })?;
            tracing::trace!(rank, step, value = self.offset.exchange_value, "offset sent");
        }
        Ok(())
    }

    /// Run all `size` rounds of the offset ring and return this rank's
    /// absolute position.
    ///
    /// A single-rank chain exchanges nothing; its stream end is its own
    /// absolute position plus its local size.
    pub async fn exchange_absolute_positions(&mut self, buffer: &mut GrowableBuffer) -> Result<u64> {
        self.ensure_active()?;
        let size = self.comm.size() as usize;
        if size == 1 {
            let running_total = buffer.absolute_position();
            let local_size = buffer.position() as u64;
            let end = running_total
                .checked_add(local_size)
                .ok_or(ChainError::OffsetOverflow {
                    running_total,
                    local_size,
                })?;
            self.offset.stream_end = Some(end);
            return Ok(running_total);
        }
        for step in 0..size {
            let handle = self.iexchange_absolute_position(buffer, step)?;
            self.wait_absolute_position(handle, buffer, step).await?;
        }
        Ok(buffer.absolute_position())
    }
}
