use crate::error::{ChainError, Result};
use crate::transport::{Mailbox, Transport};
use crate::types::Rank;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-process full mesh: every rank is a tokio task sharing one set of
/// mailboxes. Used by tests and single-process runs.
pub struct LocalTransport {
    rank: Rank,
    mailboxes: Arc<[Arc<Mailbox>]>,
    alive: Arc<[AtomicBool]>,
}

impl LocalTransport {
    /// Build `world_size` connected endpoints, one per rank.
    pub fn mesh(world_size: u32) -> Vec<Arc<LocalTransport>> {
        let mailboxes: Arc<[Arc<Mailbox>]> = (0..world_size)
            .map(|_| Arc::new(Mailbox::new()))
            .collect();
        let alive: Arc<[AtomicBool]> = (0..world_size).map(|_| AtomicBool::new(true)).collect();

        (0..world_size)
            .map(|rank| {
                Arc::new(LocalTransport {
                    rank,
                    mailboxes: Arc::clone(&mailboxes),
                    alive: Arc::clone(&alive),
                })
            })
            .collect()
    }

    fn mailbox(&self, rank: Rank) -> Result<&Arc<Mailbox>> {
        self.mailboxes
            .get(rank as usize)
            .ok_or(ChainError::InvalidRank {
                rank,
                size: self.world_size(),
            })
    }

    fn is_alive(&self, rank: Rank) -> bool {
        self.alive
            .get(rank as usize)
            .is_some_and(|a| a.load(Ordering::Acquire))
    }
}

impl Transport for LocalTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.mailboxes.len() as u32
    }

    fn send<'a>(&'a self, dest: Rank, tag: u64, payload: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mailbox = self.mailbox(dest)?;
            if !self.is_alive(self.rank) {
                return Err(ChainError::transport("local endpoint closed"));
            }
            if !self.is_alive(dest) {
                return Err(ChainError::PeerDisconnected { rank: dest });
            }
            mailbox.deliver(self.rank, tag, payload)
        })
    }

    fn recv<'a>(&'a self, src: Rank, tag: u64) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            // Validate the source even though our own mailbox does the work.
            self.mailbox(src)?;
            self.mailbox(self.rank)?.take(src, tag).await
        })
    }

    fn close(&self) {
        if let Some(flag) = self.alive.get(self.rank as usize) {
            flag.store(false, Ordering::Release);
        }
        for (r, mb) in self.mailboxes.iter().enumerate() {
            if r as Rank == self.rank {
                mb.shutdown();
            } else {
                mb.close_source(self.rank);
            }
        }
        tracing::debug!(rank = self.rank, "local transport closed");
    }
}
