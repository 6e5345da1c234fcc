use crate::error::{ChainError, Result};
use crate::protocol::ChainMessage;
use crate::types::{Rank, tags};
use std::sync::Arc;

use super::Communicator;
use super::hash::fnv1a_comm_id;

impl Communicator {
    /// Split this communicator into sub-groups.
    ///
    /// All ranks must call `split` collectively. Ranks with the same `color`
    /// end up in the same sub-communicator, ordered by `key` (ties broken by
    /// parent rank).
    ///
    /// The returned communicator shares this one's transport but uses a
    /// unique `comm_id` for its traffic, so sibling groups and the parent
    /// never observe each other's messages.
    pub async fn split(&self, color: u32, key: u32) -> Result<Communicator> {
        let size = self.size();
        let rank = self.rank();

        // Step 1: Exchange (color, key) with every other member.
        let request = ChainMessage::SplitRequest { color, key };
        let mut sends = Vec::with_capacity(size as usize);
        for peer in (0..size).filter(|&p| p != rank) {
            sends.push(self.isend_message(peer, tags::SPLIT, &request)?);
        }

        let mut entries: Vec<(Rank, u32, u32)> = Vec::with_capacity(size as usize);
        entries.push((rank, color, key));
        for peer in (0..size).filter(|&p| p != rank) {
            match self.recv_message(peer, tags::SPLIT).await? {
                ChainMessage::SplitRequest { color: c, key: k } => entries.push((peer, c, k)),
                other => {
                    return Err(ChainError::DecodeFailed(format!(
                        "split: expected SplitRequest from rank {peer}, got {other:?}"
                    )));
                }
            }
        }
        for s in sends {
            s.wait().await?;
        }

        // Step 2: Find our group (same color), sort by (key, parent rank).
        let mut group: Vec<(Rank, u32)> = entries
            .iter()
            .filter(|&&(_, c, _)| c == color)
            .map(|&(r, _, k)| (r, k))
            .collect();
        group.sort_by_key(|&(parent_rank, k)| (k, parent_rank));

        let new_rank = group
            .iter()
            .position(|&(r, _)| r == rank)
            .ok_or(ChainError::UnknownPeer { rank })? as Rank;

        // Step 3: Deterministic comm_id from (parent comm_id, generation, color).
        let generation = self.next_split_generation();
        let new_comm_id = fnv1a_comm_id([
            &self.comm_id().to_le_bytes()[..],
            &generation.to_le_bytes(),
            &color.to_le_bytes(),
        ]);

        // Step 4: New rank -> transport rank, composed through our own map.
        let rank_map = group
            .iter()
            .map(|&(parent_rank, _)| self.transport_rank(parent_rank))
            .collect::<Result<Vec<Rank>>>()?;

        tracing::debug!(
            parent_rank = rank,
            color,
            new_rank,
            new_size = rank_map.len(),
            comm_id = new_comm_id,
            "communicator split"
        );

        Ok(Communicator::from_parts(
            Arc::clone(self.transport()),
            new_rank,
            new_comm_id,
            rank_map.into(),
        ))
    }
}
