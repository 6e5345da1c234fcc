pub mod aggregator;
pub mod comm;
pub mod config;
pub mod error;
pub mod memory;
pub mod protocol;
pub mod transport;
pub mod types;

pub use aggregator::{ChainAggregator, ExchangeHandle, ExchangeSession, OffsetHandle};
pub use comm::{Communicator, RecvRequest, Request, SendRequest};
pub use config::AggregatorConfig;
pub use error::{ChainError, Result};
pub use memory::GrowableBuffer;
pub use protocol::ChainMessage;
pub use transport::{LocalTransport, Mailbox, TcpTransport, Transport};
pub use types::{BufferOrder, Rank, Tag};
