//! External interfaces: the two collaborators this crate hands decrypted
//! traffic to. The transport acceptance loop and the outbound dialer live
//! outside this crate; these traits are the seam, declared here only so the
//! crate compiles and is testable without a concrete implementation.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::address::Address;
use crate::errors::Result;
use crate::record::ChunkAsyncReader;

/// Everything the core learned about a connection or packet before handing
/// it off: where it came from, where it's going, and (multi-user mode
/// only) who it was authenticated as.
#[derive(Debug, Clone)]
pub struct Metadata<U> {
    pub source: SocketAddr,
    pub destination: Address,
    pub protocol: &'static str,
    pub user: Option<U>,
}

impl<U> Metadata<U> {
    pub fn new(source: SocketAddr, destination: Address, user: Option<U>) -> Self {
        Self {
            source,
            destination,
            protocol: "shadowsocks",
            user,
        }
    }
}

/// Receives a decrypted TCP-like stream after a successful handshake.
#[async_trait]
pub trait ConnectionHandler<R, U>: Send + Sync
where
    R: tokio::io::AsyncRead + Unpin + Send,
    U: Send + Sync,
{
    async fn new_connection(&self, reader: ChunkAsyncReader<R>, metadata: Metadata<U>);
}

/// Produces a reply writer for a validated inbound UDP packet, bound to
/// the session that produced it.
#[async_trait]
pub trait PacketReplyWriter: Send + Sync {
    async fn send(&self, payload: &[u8]) -> std::io::Result<()>;
}

/// Receives one validated, decrypted UDP inner packet.
#[async_trait]
pub trait PacketHandler<U>: Send + Sync
where
    U: Send + Sync,
{
    async fn new_packet(
        &self,
        session_id: u64,
        writer: std::sync::Arc<dyn PacketReplyWriter>,
        payload: Vec<u8>,
        metadata: Metadata<U>,
    );
}
