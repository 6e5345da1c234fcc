use crate::error::{ChainError, Result};
use crate::types::Rank;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

type Receiver = Arc<Mutex<mpsc::UnboundedReceiver<Vec<u8>>>>;

/// One `(src, tag)` lane. Both halves live together so whichever side
/// arrives first creates the lane and the other side finds it.
struct Lane {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Receiver,
}

impl Lane {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }
}

#[derive(Default)]
struct State {
    lanes: HashMap<(Rank, u64), Lane>,
    closed: HashSet<Rank>,
    shut: bool,
}

/// Per-rank demultiplexer of incoming payloads keyed by `(src, tag)`.
///
/// Payloads delivered before anyone receives are queued in their lane.
/// Closing a source drops its lanes, so every pending and future receive
/// from it fails with `PeerDisconnected`.
#[derive(Default)]
pub struct Mailbox {
    state: std::sync::Mutex<State>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding this lock leaves only plain maps behind.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a payload from `src` under `tag`.
    pub fn deliver(&self, src: Rank, tag: u64, payload: Vec<u8>) -> Result<()> {
        let mut st = self.lock();
        if st.shut || st.closed.contains(&src) {
            return Err(ChainError::PeerDisconnected { rank: src });
        }
        let lane = st.lanes.entry((src, tag)).or_insert_with(Lane::new);
        lane.tx
            .send(payload)
            .map_err(|_| ChainError::PeerDisconnected { rank: src })
    }

    /// Wait for the next payload from `src` under `tag`.
    pub async fn take(&self, src: Rank, tag: u64) -> Result<Vec<u8>> {
        let rx = {
            let mut st = self.lock();
            if st.shut || st.closed.contains(&src) {
                return Err(ChainError::PeerDisconnected { rank: src });
            }
            let lane = st.lanes.entry((src, tag)).or_insert_with(Lane::new);
            Arc::clone(&lane.rx)
        };
        let mut rx = rx.lock().await;
        rx.recv()
            .await
            .ok_or(ChainError::PeerDisconnected { rank: src })
    }

    /// Fail every receive from `src`, pending or future.
    pub fn close_source(&self, src: Rank) {
        let mut st = self.lock();
        st.closed.insert(src);
        st.lanes.retain(|&(s, _), _| s != src);
    }

    /// Fail every receive on this mailbox.
    pub fn shutdown(&self) {
        let mut st = self.lock();
        st.shut = true;
        st.lanes.clear();
    }
}
