use crate::config::AggregatorConfig;
use crate::error::{ChainError, Result};
use crate::protocol::{ChainMessage, decode_message, encode_message};
use crate::transport::{Mailbox, Transport};
use crate::types::{PROTOCOL_VERSION, Rank};
use futures::future::{BoxFuture, try_join_all};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Tag of the identifying `Hello` frame, never used by communicators.
const HELLO_TAG: u64 = u64::MAX;

type Writer = Arc<Mutex<WriteHalf<TcpStream>>>;

/// Full-mesh transport over raw TCP, one connection per peer pair.
///
/// Every frame is `[tag: u64 LE][len: u64 LE][payload]`. The first frame a
/// dialer writes is an rkyv `Hello` identifying its rank; after that the
/// connection carries only tagged payloads, routed by a background task
/// into this rank's [`Mailbox`].
pub struct TcpTransport {
    rank: Rank,
    world_size: u32,
    writers: HashMap<Rank, Writer>,
    mailbox: Arc<Mailbox>,
    closed: AtomicBool,
    recv_handles: Vec<JoinHandle<()>>,
}

impl TcpTransport {
    /// Join the mesh described by `addrs` (indexed by rank) as `rank`.
    ///
    /// `listener` must already be bound to `addrs[rank]`. Dials every lower
    /// rank (retrying while the peer is not yet listening) and accepts one
    /// connection from every higher rank.
    pub async fn establish(
        rank: Rank,
        listener: TcpListener,
        addrs: &[SocketAddr],
        config: &AggregatorConfig,
    ) -> Result<Self> {
        let world_size = addrs.len() as u32;
        if rank >= world_size {
            return Err(ChainError::InvalidRank {
                rank,
                size: world_size,
            });
        }

        let dial = try_join_all(
            (0..rank).map(|peer| dial_peer(rank, world_size, peer, addrs[peer as usize], config)),
        );
        let accept = accept_peers(&listener, rank, world_size, config.max_frame_bytes);
        let (dialed, accepted) = tokio::try_join!(dial, accept)?;

        let mailbox = Arc::new(Mailbox::new());
        let mut writers = HashMap::new();
        let mut recv_handles = Vec::new();
        for (peer, stream) in dialed.into_iter().chain(accepted) {
            let (reader, writer) = tokio::io::split(stream);
            writers.insert(peer, Arc::new(Mutex::new(writer)));
            let mb = Arc::clone(&mailbox);
            let limit = config.max_frame_bytes;
            recv_handles.push(tokio::spawn(async move {
                recv_loop(reader, peer, mb, limit).await;
            }));
        }

        tracing::debug!(rank, world_size, "tcp mesh established");

        Ok(Self {
            rank,
            world_size,
            writers,
            mailbox,
            closed: AtomicBool::new(false),
            recv_handles,
        })
    }

    /// Build a `world_size`-rank mesh on loopback within this process.
    pub async fn bootstrap_local(
        world_size: u32,
        config: &AggregatorConfig,
    ) -> Result<Vec<Arc<TcpTransport>>> {
        let mut listeners = Vec::new();
        let mut addrs = Vec::new();
        for _ in 0..world_size {
            let listener = TcpListener::bind("127.0.0.1:0")
                .await
                .map_err(|e| ChainError::transport_with_source("tcp listen", e))?;
            addrs.push(
                listener
                    .local_addr()
                    .map_err(|e| ChainError::transport_with_source("tcp local_addr", e))?,
            );
            listeners.push(listener);
        }

        let addrs: Arc<[SocketAddr]> = addrs.into();
        let mut handles = Vec::new();
        for (rank, listener) in listeners.into_iter().enumerate() {
            let addrs = Arc::clone(&addrs);
            let config = config.clone();
            handles.push(tokio::spawn(async move {
                TcpTransport::establish(rank as Rank, listener, &addrs, &config).await
            }));
        }

        let mut transports = Vec::new();
        for h in handles {
            let t = h
                .await
                .map_err(|e| ChainError::transport_with_source("mesh task panicked", e))??;
            transports.push(Arc::new(t));
        }
        Ok(transports)
    }
}

impl Transport for TcpTransport {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn world_size(&self) -> u32 {
        self.world_size
    }

    fn send<'a>(&'a self, dest: Rank, tag: u64, payload: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if self.closed.load(Ordering::Acquire) {
                return Err(ChainError::transport("tcp endpoint closed"));
            }
            if dest == self.rank {
                return self.mailbox.deliver(self.rank, tag, payload);
            }
            let writer = self.writers.get(&dest).ok_or(if dest < self.world_size {
                ChainError::UnknownPeer { rank: dest }
            } else {
                ChainError::InvalidRank {
                    rank: dest,
                    size: self.world_size,
                }
            })?;
            let mut w = writer.lock().await;
            write_frame(&mut *w, tag, &payload).await
        })
    }

    fn recv<'a>(&'a self, src: Rank, tag: u64) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            if src >= self.world_size {
                return Err(ChainError::InvalidRank {
                    rank: src,
                    size: self.world_size,
                });
            }
            self.mailbox.take(src, tag).await
        })
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.mailbox.shutdown();
        for h in &self.recv_handles {
            h.abort();
        }
        // Shutting the write halves down is what peers observe as EOF.
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            let writers: Vec<Writer> = self.writers.values().cloned().collect();
            rt.spawn(async move {
                for w in writers {
                    let _ = w.lock().await.shutdown().await;
                }
            });
        }
        tracing::debug!(rank = self.rank, "tcp transport closed");
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        for h in &self.recv_handles {
            h.abort();
        }
    }
}

/// Connect to a lower-ranked peer and identify ourselves.
async fn dial_peer(
    rank: Rank,
    world_size: u32,
    peer: Rank,
    addr: SocketAddr,
    config: &AggregatorConfig,
) -> Result<(Rank, TcpStream)> {
    let mut attempt = 0;
    let mut stream = loop {
        match TcpStream::connect(addr).await {
            Ok(s) => break s,
            Err(e) => {
                attempt += 1;
                if attempt >= config.connect_retries.max(1) {
                    return Err(ChainError::transport_with_source(
                        format!("tcp connect to rank {peer} at {addr}"),
                        e,
                    ));
                }
                tracing::trace!(rank, peer, attempt, "peer not listening yet, retrying");
                tokio::time::sleep(config.connect_backoff).await;
            }
        }
    };
    stream
        .set_nodelay(true)
        .map_err(|e| ChainError::transport_with_source("tcp set_nodelay", e))?;

    let hello = encode_message(&ChainMessage::Hello {
        protocol_version: PROTOCOL_VERSION,
        rank,
        world_size,
    })?;
    write_frame(&mut stream, HELLO_TAG, &hello).await?;
    Ok((peer, stream))
}

/// Accept one connection from every higher-ranked peer.
async fn accept_peers(
    listener: &TcpListener,
    rank: Rank,
    world_size: u32,
    max_frame_bytes: usize,
) -> Result<Vec<(Rank, TcpStream)>> {
    let expected = (world_size - rank - 1) as usize;
    let mut accepted: Vec<(Rank, TcpStream)> = Vec::with_capacity(expected);
    while accepted.len() < expected {
        let (mut stream, remote) = listener
            .accept()
            .await
            .map_err(|e| ChainError::transport_with_source("tcp accept", e))?;
        stream
            .set_nodelay(true)
            .map_err(|e| ChainError::transport_with_source("tcp set_nodelay", e))?;

        let (tag, payload) = read_frame(&mut stream, max_frame_bytes).await?;
        if tag != HELLO_TAG {
            return Err(ChainError::DecodeFailed(format!(
                "expected hello frame from {remote}, got tag {tag}"
            )));
        }
        let peer = match decode_message(&payload)? {
            ChainMessage::Hello {
                protocol_version,
                rank: peer,
                world_size: peer_world,
            } => {
                if protocol_version != PROTOCOL_VERSION {
                    return Err(ChainError::ProtocolMismatch {
                        local: PROTOCOL_VERSION,
                        remote: protocol_version,
                    });
                }
                if peer_world != world_size || peer <= rank || peer >= world_size {
                    return Err(ChainError::InvalidRank {
                        rank: peer,
                        size: world_size,
                    });
                }
                peer
            }
            other => {
                return Err(ChainError::DecodeFailed(format!(
                    "expected Hello from {remote}, got {other:?}"
                )));
            }
        };
        if accepted.iter().any(|&(r, _)| r == peer) {
            return Err(ChainError::transport(format!(
                "duplicate connection from rank {peer}"
            )));
        }
        tracing::trace!(rank, peer, %remote, "accepted mesh connection");
        accepted.push((peer, stream));
    }
    Ok(accepted)
}

/// Write a tagged frame: `[tag: u64 LE][len: u64 LE][payload]`.
async fn write_frame<W>(writer: &mut W, tag: u64, data: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut header = [0u8; 16];
    header[..8].copy_from_slice(&tag.to_le_bytes());
    header[8..].copy_from_slice(&(data.len() as u64).to_le_bytes());
    writer
        .write_all(&header)
        .await
        .map_err(|e| ChainError::transport_with_source("tcp write header", e))?;
    writer
        .write_all(data)
        .await
        .map_err(|e| ChainError::transport_with_source("tcp write payload", e))?;
    writer
        .flush()
        .await
        .map_err(|e| ChainError::transport_with_source("tcp flush", e))?;
    Ok(())
}

/// Read one tagged frame, rejecting payloads above `limit`.
async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<(u64, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut tag_buf = [0u8; 8];
    let mut len_buf = [0u8; 8];
    reader.read_exact(&mut tag_buf).await?;
    reader.read_exact(&mut len_buf).await?;
    let tag = u64::from_le_bytes(tag_buf);
    let len = u64::from_le_bytes(len_buf) as usize;
    if len > limit {
        return Err(ChainError::FrameTooLarge { len, limit });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok((tag, payload))
}

/// Background loop: read frames from one peer into the mailbox.
async fn recv_loop(
    mut reader: ReadHalf<TcpStream>,
    peer: Rank,
    mailbox: Arc<Mailbox>,
    limit: usize,
) {
    loop {
        match read_frame(&mut reader, limit).await {
            Ok((tag, payload)) => {
                if mailbox.deliver(peer, tag, payload).is_err() {
                    return;
                }
            }
            Err(ChainError::FrameTooLarge { len, limit }) => {
                tracing::warn!(peer, len, limit, "tcp frame too large, dropping peer");
                mailbox.close_source(peer);
                return;
            }
            Err(e) => {
                tracing::debug!(peer, "tcp recv loop ended: {e}");
                mailbox.close_source(peer);
                return;
            }
        }
    }
}
