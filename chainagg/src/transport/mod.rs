//! Point-to-point messaging substrate used by communicators.

mod local;
mod mailbox;
mod tcp;

pub use local::LocalTransport;
pub use mailbox::Mailbox;
pub use tcp::TcpTransport;

use crate::error::Result;
use crate::types::Rank;
use futures::future::BoxFuture;

/// A reliable, ordered, tagged byte transport over a fixed-size process set.
///
/// Ranks and tags here are transport-level: a [`Communicator`] translates
/// its local ranks through its rank map and widens its tags with its
/// `comm_id` before calling in.
///
/// Delivery is FIFO per `(src, tag)` pair. A send that arrives before the
/// matching receive is queued; a receive posted before the matching send
/// waits for it.
///
/// [`Communicator`]: crate::comm::Communicator
pub trait Transport: Send + Sync + 'static {
    /// This process's rank within the transport.
    fn rank(&self) -> Rank;

    /// Number of processes reachable through the transport.
    fn world_size(&self) -> u32;

    /// Deliver `payload` to `dest` under `tag`.
    fn send<'a>(&'a self, dest: Rank, tag: u64, payload: Vec<u8>) -> BoxFuture<'a, Result<()>>;

    /// Wait for the next payload sent by `src` under `tag`.
    fn recv<'a>(&'a self, src: Rank, tag: u64) -> BoxFuture<'a, Result<Vec<u8>>>;

    /// Tear down this endpoint. Peers blocked on receives from this rank
    /// observe `PeerDisconnected`.
    fn close(&self);
}
