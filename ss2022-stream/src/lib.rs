#![forbid(unsafe_code)]

//! Shadowsocks-2022 stream and datagram server core: AEAD record framing,
//! replay defense, multi-user identity demultiplexing, address codec, and
//! the handshake/session logic for both the TCP stream path and the UDP
//! datagram path.

pub mod address;
pub mod errors;
pub mod handler;
pub mod identity;
pub mod record;
pub mod replay;
pub mod server;
pub mod udp;

pub use address::Address;
pub use errors::{Error, Result};
pub use handler::{ConnectionHandler, Metadata, PacketHandler, PacketReplyWriter};
pub use identity::UserTable;
pub use record::{ChunkAsyncReader, ChunkReader, ChunkWriter, MAX_PACKET_SIZE};
pub use replay::{ReplayWindow, SaltFilter};
pub use server::{accept, Accepted, ListenerParams, ResponseWriter};
pub use udp::{decode_packet, encode_reply, DatagramParams, DecodedPacket, SessionCache, UdpSession};
