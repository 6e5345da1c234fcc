use crate::comm::{RecvRequest, SendRequest};
use crate::error::{ChainError, Result};
use crate::memory::GrowableBuffer;
use crate::protocol::decode_u64;
use crate::types::{BufferOrder, Rank, tags};

use super::{ChainAggregator, buffer_pair};

/// Roles of one rank in one transfer round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeSession {
    pub step: usize,
    /// Highest chain rank still holding undelivered data this round.
    pub active_boundary: usize,
    /// Sends to `rank - 1` this round.
    pub sender: bool,
    /// Receives from `rank + 1` this round.
    pub receiver: bool,
}

impl ExchangeSession {
    /// Roles for `rank` at `step` in a chain of `size` ranks.
    ///
    /// `step` must be below `size`.
    pub fn new(rank: Rank, size: u32, step: usize) -> Self {
        let rank = rank as usize;
        let active_boundary = (size as usize).saturating_sub(1 + step);
        Self {
            step,
            active_boundary,
            sender: rank >= 1 && rank <= active_boundary,
            receiver: rank < active_boundary,
        }
    }
}

/// Slot index of each operation an exchange can leave in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    LengthSend = 0,
    PayloadSend = 1,
    PayloadRecv = 2,
}

impl OpKind {
    fn name(self) -> &'static str {
        match self {
            OpKind::LengthSend => "length send",
            OpKind::PayloadSend => "payload send",
            OpKind::PayloadRecv => "payload receive",
        }
    }
}

/// One in-flight operation, or nothing when the local role omits it.
#[derive(Debug, Default)]
pub enum PendingOp {
    #[default]
    Unused,
    Send(SendRequest),
    Recv(RecvRequest),
}

/// Operations posted by [`ChainAggregator::iexchange`], consumed by
/// [`ChainAggregator::wait`].
///
/// Dropping a handle aborts whatever is still in flight.
#[derive(Debug, Default)]
pub struct ExchangeHandle {
    step: usize,
    announced_len: usize,
    slots: [PendingOp; 3],
}

impl ExchangeHandle {
    fn empty(step: usize) -> Self {
        Self {
            step,
            ..Self::default()
        }
    }

    /// Step the exchange was issued for.
    pub fn step(&self) -> usize {
        self.step
    }

    /// Payload length announced by the upstream neighbor, if receiving.
    pub fn announced_len(&self) -> usize {
        self.announced_len
    }

    pub fn is_unused(&self, kind: OpKind) -> bool {
        matches!(self.slots[kind as usize], PendingOp::Unused)
    }

    /// Number of operations still referenced by this handle.
    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| !matches!(s, PendingOp::Unused))
            .count()
    }

    fn take(&mut self, kind: OpKind) -> PendingOp {
        std::mem::take(&mut self.slots[kind as usize])
    }

    fn take_send(&mut self, kind: OpKind) -> Result<SendRequest> {
        match self.take(kind) {
            PendingOp::Send(req) => Ok(req),
            _ => Err(ChainError::NoPendingOperation {
                operation: kind.name(),
                step: self.step,
            }),
        }
    }

    fn take_recv(&mut self, kind: OpKind) -> Result<RecvRequest> {
        match self.take(kind) {
            PendingOp::Recv(req) => Ok(req),
            _ => Err(ChainError::NoPendingOperation {
                operation: kind.name(),
                step: self.step,
            }),
        }
    }
}

impl ChainAggregator {
    /// Post this rank's part of transfer round `step`.
    ///
    /// A sender queues the length and then the payload of its sender-view
    /// buffer for `rank - 1`. A receiver blocks until `rank + 1` announces
    /// its length, sizes the receiver-view buffer to exactly that length,
    /// and posts the payload receive. A chain of one rank does nothing.
    pub async fn iexchange(
        &mut self,
        buffer: &mut GrowableBuffer,
        step: usize,
    ) -> Result<ExchangeHandle> {
        self.ensure_active()?;
        let size = self.comm.size();
        if size == 1 {
            return Ok(ExchangeHandle::empty(step));
        }
        self.check_step(step)?;

        let rank = self.comm.rank();
        let session = ExchangeSession::new(rank, size, step);
        let (sender, receiver) = buffer_pair(self.order, buffer, &mut self.scratch);
        let mut handle = ExchangeHandle::empty(step);

        if session.sender {
            let dest = rank - 1;
            let len = sender.position() as u64;
            let req = self
                .comm
                .isend_u64(dest, tags::LENGTH, len)
                .map_err(|e| ChainError::messaging("send length", step, dest, e))?;
            handle.slots[OpKind::LengthSend as usize] = PendingOp::Send(req);

            let req = self
                .comm
                .isend(dest, tags::PAYLOAD, sender.as_slice().to_vec())
                .map_err(|e| ChainError::messaging("send payload", step, dest, e))?;
            handle.slots[OpKind::PayloadSend as usize] = PendingOp::Send(req);
        }

        if session.receiver {
            let src = rank + 1;
            let raw = self
                .comm
                .irecv(src, tags::LENGTH)
                .map_err(|e| ChainError::messaging("receive length", step, src, e))?
                .wait()
                .await
                .map_err(|e| ChainError::messaging("receive length", step, src, e))?;
            let len = decode_u64(&raw)
                .map_err(|e| ChainError::messaging("receive length", step, src, e))?;
            let len = usize::try_from(len).map_err(|_| {
                ChainError::messaging(
                    "receive length",
                    step,
                    src,
                    ChainError::DecodeFailed(format!("length {len} does not fit in memory")),
                )
            })?;
            receiver.prepare_receive(len)?;
            handle.announced_len = len;

            let req = self
                .comm
                .irecv(src, tags::PAYLOAD)
                .map_err(|e| ChainError::messaging("receive payload", step, src, e))?;
            handle.slots[OpKind::PayloadRecv as usize] = PendingOp::Recv(req);
        }

        tracing::trace!(
            rank,
            step,
            boundary = session.active_boundary,
            sender = session.sender,
            receiver = session.receiver,
            announced = handle.announced_len,
            "exchange posted"
        );
        Ok(handle)
    }

    /// Complete round `step`: the payload receive first, then both sends.
    ///
    /// The received bytes land in the receiver-view buffer sized by
    /// [`iexchange`](Self::iexchange), so the buffer order must not change
    /// between the two calls.
    pub async fn wait(
        &mut self,
        mut handle: ExchangeHandle,
        buffer: &mut GrowableBuffer,
        step: usize,
    ) -> Result<()> {
        self.ensure_active()?;
        let size = self.comm.size();
        if size == 1 {
            return Ok(());
        }
        if handle.step != step {
            return Err(ChainError::StepMismatch {
                issued: handle.step,
                waited: step,
            });
        }
        self.check_step(step)?;

        let rank = self.comm.rank();
        let session = ExchangeSession::new(rank, size, step);

        if session.receiver {
            let src = rank + 1;
            let bytes = handle
                .take_recv(OpKind::PayloadRecv)?
                .wait()
                .await
                .map_err(|e| ChainError::messaging("receive payload", step, src, e))?;
            let (_, receiver) = buffer_pair(self.order, buffer, &mut self.scratch);
            if bytes.len() != receiver.size() {
                return Err(ChainError::messaging(
                    "receive payload",
                    step,
                    src,
                    ChainError::LengthMismatch {
                        announced: receiver.size(),
                        actual: bytes.len(),
                    },
                ));
            }
            receiver.replace_data(bytes);
        }

        if session.sender {
            let dest = rank - 1;
            handle
                .take_send(OpKind::LengthSend)?
                .wait()
                .await
                .map_err(|e| ChainError::messaging("send length", step, dest, e))?;
            handle
                .take_send(OpKind::PayloadSend)?
                .wait()
                .await
                .map_err(|e| ChainError::messaging("send payload", step, dest, e))?;
        }

        tracing::trace!(rank, step, "exchange complete");
        Ok(())
    }

    /// Flip the buffer order: what was received this round is sent next round.
    pub fn swap_buffers(&mut self) {
        self.order = self.order.flipped();
    }

    /// Restore the default order at the start of an aggregation cycle.
    pub fn reset_buffers(&mut self) {
        self.order = BufferOrder::Default;
    }

    /// The sender-view buffer: after a completed round, the data received
    /// in it once [`swap_buffers`](Self::swap_buffers) has run.
    pub fn consumer_buffer<'a>(&'a self, buffer: &'a GrowableBuffer) -> &'a GrowableBuffer {
        match self.order {
            BufferOrder::Default => buffer,
            BufferOrder::Swapped => &self.scratch,
        }
    }

    /// Run a whole transfer cycle.
    ///
    /// On the sink, `consume` sees its own contribution first and then one
    /// contribution per round, in chain-rank order. Other ranks never call
    /// it. Relaying may overwrite `buffer` with upstream data, so compute
    /// offsets with [`exchange_absolute_positions`](Self::exchange_absolute_positions)
    /// beforehand if they are needed.
    pub async fn aggregate<F>(&mut self, buffer: &mut GrowableBuffer, mut consume: F) -> Result<()>
    where
        F: FnMut(&GrowableBuffer) -> Result<()>,
    {
        self.ensure_active()?;
        self.reset_buffers();
        let consumer = self.is_consumer();
        if consumer {
            consume(self.consumer_buffer(buffer))?;
        }

        let rounds = (self.comm.size() as usize).saturating_sub(1);
        for step in 0..rounds {
            let handle = self.iexchange(buffer, step).await?;
            self.wait(handle, buffer, step).await?;
            self.swap_buffers();
            if consumer {
                consume(self.consumer_buffer(buffer))?;
            }
        }

        tracing::debug!(
            chain = self.sub_stream_index,
            rank = self.comm.rank(),
            rounds,
            "aggregation cycle done"
        );
        Ok(())
    }
}
