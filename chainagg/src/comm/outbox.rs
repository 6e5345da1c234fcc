use crate::error::{ChainError, Result};
use crate::transport::Transport;
use crate::types::Rank;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// A queued send: wire tag, payload, completion signal.
type Job = (u64, Vec<u8>, oneshot::Sender<Result<()>>);

/// Per-destination send queues, each drained in order by one background task.
///
/// `push` enqueues synchronously, so the order of `push` calls is the order
/// frames leave this process for a given destination.
pub(super) struct Outbox {
    transport: Arc<dyn Transport>,
    lanes: std::sync::Mutex<HashMap<Rank, mpsc::UnboundedSender<Job>>>,
}

impl Outbox {
    pub(super) fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            lanes: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Queue `payload` for transport rank `dest`. The returned receiver
    /// resolves once the transport has accepted the frame.
    pub(super) fn push(
        &self,
        dest: Rank,
        wire_tag: u64,
        payload: Vec<u8>,
    ) -> oneshot::Receiver<Result<()>> {
        let (done_tx, done_rx) = oneshot::channel();
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        let lane = lanes
            .entry(dest)
            .or_insert_with(|| spawn_lane(Arc::clone(&self.transport), dest));
        if let Err(mpsc::error::SendError((_, _, done_tx))) = lane.send((wire_tag, payload, done_tx))
        {
            let _ = done_tx.send(Err(ChainError::transport(format!(
                "send lane to rank {dest} stopped"
            ))));
        }
        done_rx
    }
}

fn spawn_lane(transport: Arc<dyn Transport>, dest: Rank) -> mpsc::UnboundedSender<Job> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
    tokio::spawn(async move {
        while let Some((tag, payload, done)) = rx.recv().await {
            let result = transport.send(dest, tag, payload).await;
            if let Err(e) = &result {
                tracing::debug!(dest, tag, error = %e, "queued send failed");
            }
            let _ = done.send(result);
        }
    });
    tx
}
