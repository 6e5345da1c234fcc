/// Rank of a participant in a communicator group (0-indexed).
pub type Rank = u32;

/// Communicator-local message tag. The communicator widens it to a `u64`
/// wire tag by prefixing its `comm_id`.
pub type Tag = u32;

/// Current protocol version, checked during TCP mesh formation.
pub const PROTOCOL_VERSION: u16 = 1;

/// Tags reserved by the chain protocols. Each message class gets its own
/// tag so that per-`(src, tag)` FIFO delivery keeps classes from interleaving.
pub mod tags {
    use super::Tag;

    /// Communicator split: `(color, key)` exchange.
    pub const SPLIT: Tag = 1;
    /// Sink announcement sent by the chain sink to every member.
    pub const SINK: Tag = 2;
    /// Neighbor adjacency check, `rank` to `rank - 1`.
    pub const LINK: Tag = 3;
    /// Byte length announced ahead of a chain payload.
    pub const LENGTH: Tag = 10;
    /// Chain payload bytes.
    pub const PAYLOAD: Tag = 11;
    /// Running total of the global offset ring.
    pub const ABSOLUTE_POSITION: Tag = 12;
}

/// Which physical buffer of a rank's buffer pair plays the outgoing role.
///
/// `Default` sends from the caller's working buffer and receives into the
/// aggregator's scratch buffer; `Swapped` reverses the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum BufferOrder {
    #[default]
    Default = 0,
    Swapped = 1,
}

impl BufferOrder {
    /// Index of the outgoing ("sender view") buffer in `[working, scratch]`.
    pub const fn sender_index(self) -> usize {
        self as usize
    }

    /// Index of the incoming ("receiver view") buffer in `[working, scratch]`.
    pub const fn receiver_index(self) -> usize {
        1 - self as usize
    }

    /// The opposite order.
    pub const fn flipped(self) -> Self {
        match self {
            BufferOrder::Default => BufferOrder::Swapped,
            BufferOrder::Swapped => BufferOrder::Default,
        }
    }
}

impl std::fmt::Display for BufferOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferOrder::Default => f.write_str("default"),
            BufferOrder::Swapped => f.write_str("swapped"),
        }
    }
}
