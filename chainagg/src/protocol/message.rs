use crate::types::Rank;

/// Control messages exchanged between chain members.
///
/// Chain payloads do NOT flow through this enum. Payload hops are an 8-byte
/// length announcement followed by the raw bytes, so the aggregated data
/// stays opaque and is never re-encoded.
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq)]
pub enum ChainMessage {
    /// First frame on every TCP mesh connection, identifying the dialer.
    Hello {
        protocol_version: u16,
        rank: Rank,
        world_size: u32,
    },

    /// Communicator split request: carries (color, key) for group formation.
    SplitRequest { color: u32, key: u32 },

    /// The chain sink announcing itself to every member.
    SinkAnnounce { sink: Rank },

    /// Neighbor adjacency check sent from `rank` to `rank - 1`.
    LinkHandshake { rank: Rank },
}
