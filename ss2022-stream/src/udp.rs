//! Datagram (UDP) service and session cache: per-session AEAD keys keyed
//! by an opaque 64-bit session id, a sliding-window replay filter per
//! session, and the two wire layouts (AES header-block vs. XChaCha
//! whole-packet) the method selects.
//!
//! The session cache is built on `lru::LruCache`, wrapped here for TTL
//! eviction the way [`crate::replay::SaltFilter`] wraps `dashmap` for the
//! same purpose: checked lazily on access plus an owner-driven periodic
//! sweep, never self-spawning.

use std::collections::hash_map::RandomState;
use std::hash::Hash;
use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use std::time::{Duration, Instant};

use lru::LruCache;
use rand::RngCore;

use ss2022_core::TimestampSecs;
use ss2022_crypto::aead::Aead;
use ss2022_crypto::block;
use ss2022_crypto::kdf::{self, Blake3Prf};
use ss2022_crypto::method::Method;

use crate::address::Address;
use crate::errors::{Error, Result};
use crate::identity::UserTable;
use crate::replay::ReplayWindow;

const HEADER_TYPE_CLIENT: u8 = 0x00;
const HEADER_TYPE_SERVER: u8 = 0x01;
const TIMESTAMP_WINDOW: Duration = Duration::from_secs(30);
const AES_HEADER_BLOCK_LEN: usize = 16;
const XCHACHA_NONCE_LEN: usize = 24;
const EIH_LEN: usize = 16;

/// Builds the "8-byte session id, zero-padded" KDF input used for the UDP
/// variant of the session key / identity subkey derivation.
fn session_id_salt(session_id: u64, len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    out[..8].copy_from_slice(&session_id.to_be_bytes());
    out
}

enum SessionCipher {
    Aes {
        send: Aead,
        recv: Aead,
    },
    XChaCha {
        cipher: Aead,
        send_nonce_prf: StdMutex<Blake3Prf>,
    },
}

/// A live UDP session keyed by the remote-assigned 64-bit session id.
/// `remote_cipher`/`remote_session_id` are fixed at creation and never
/// re-keyed.
pub struct UdpSession {
    pub local_session_id: u64,
    pub remote_session_id: u64,
    pub remote_addr: RwLock<SocketAddr>,
    send_packet_id: AtomicU64,
    recv_filter: StdMutex<ReplayWindow>,
    cipher: SessionCipher,
}

impl UdpSession {
    /// Returns the pre-increment value, so the first call on a fresh
    /// session returns 0.
    fn next_packet_id(&self) -> u64 {
        self.send_packet_id.fetch_add(1, Ordering::Relaxed)
    }

    fn admit(&self, packet_id: u64) -> bool {
        self.recv_filter.lock().expect("replay window mutex poisoned").validate(packet_id, u64::MAX)
    }
}

/// TTL-evicting cache of [`UdpSession`]s keyed by remote session id.
/// `load_or_create` is an atomic `(session, inserted)` race resolution:
/// exactly one concurrent caller sees `inserted = true` for a given key.
pub struct SessionCache {
    inner: StdMutex<LruCache<u64, (Arc<UdpSession>, Instant), RandomState>>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_capacity(ttl, 65536)
    }

    pub fn with_capacity(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).expect("1 is nonzero"));
        Self {
            inner: StdMutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Loads the session for `session_id`, or builds one with `create` and
    /// inserts it. Returns the session plus whether this call created it.
    pub fn load_or_create<F>(&self, session_id: u64, create: F) -> (Arc<UdpSession>, bool)
    where
        F: FnOnce() -> UdpSession,
    {
        let mut guard = self.inner.lock().expect("session cache mutex poisoned");
        if let Some((session, touched)) = guard.get_mut(&session_id) {
            *touched = Instant::now();
            return (session.clone(), false);
        }
        let session = Arc::new(create());
        guard.put(session_id, (session.clone(), Instant::now()));
        (session, true)
    }

    /// Evicts `session_id` unconditionally. Used for the UDP first-packet
    /// failure-atomicity requirement: a session created for a packet that
    /// then fails validation must be absent from the cache once the call
    /// returns.
    pub fn remove(&self, session_id: u64) {
        self.inner.lock().expect("session cache mutex poisoned").pop(&session_id);
    }

    pub fn contains(&self, session_id: u64) -> bool {
        self.inner.lock().expect("session cache mutex poisoned").contains(&session_id)
    }

    /// Drops every session idle past the configured TTL. Owner-driven,
    /// like [`crate::replay::SaltFilter::sweep`]; `load_or_create` never
    /// depends on this having run.
    pub fn sweep(&self) {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut guard = self.inner.lock().expect("session cache mutex poisoned");
        let stale: Vec<u64> = guard
            .iter()
            .filter(|(_, (_, touched))| now.duration_since(*touched) >= ttl)
            .map(|(id, _)| *id)
            .collect();
        for id in stale {
            guard.pop(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("session cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One validated, decrypted inbound UDP packet, ready to hand to the
/// external packet handler.
pub struct DecodedPacket<U> {
    pub session_id: u64,
    pub destination: Address,
    pub payload: Vec<u8>,
    pub user: Option<U>,
}

fn check_timestamp(ts: TimestampSecs) -> Result<()> {
    let now = TimestampSecs::now();
    if ts.within(now, TIMESTAMP_WINDOW) {
        Ok(())
    } else {
        Err(Error::BadTimestamp {
            skew_secs: ts.abs_diff(now),
            window_secs: TIMESTAMP_WINDOW.as_secs(),
        })
    }
}

/// Parses the inner packet header shared by both UDP wire layouts:
/// `type`, timestamp window, padding, address, trailing payload.
fn parse_inner(plaintext: &[u8]) -> Result<(Address, Vec<u8>)> {
    if plaintext.len() < 1 + 8 + 2 {
        return Err(Error::BadHeader(plaintext.len()));
    }
    let header_type = plaintext[0];
    if header_type != HEADER_TYPE_CLIENT {
        return Err(Error::BadHeaderType {
            expected: HEADER_TYPE_CLIENT,
            actual: header_type,
        });
    }
    let timestamp = TimestampSecs(u64::from_be_bytes(plaintext[1..9].try_into().expect("8 bytes")));
    check_timestamp(timestamp)?;

    let (rest, destination) = Address::parse(&plaintext[9..])?;
    if rest.len() < 2 {
        return Err(Error::BadHeader(rest.len()));
    }
    let padding_len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
    let after_padding_len = &rest[2..];
    if padding_len == 0 && after_padding_len.is_empty() {
        return Err(Error::NoPadding);
    }
    if padding_len > after_padding_len.len() {
        return Err(Error::BadPadding {
            claimed: padding_len as u16,
            cached: after_padding_len.len(),
        });
    }
    let payload = after_padding_len[padding_len..].to_vec();
    Ok((destination, payload))
}

/// Listener-wide parameters shared by every `decode_packet` call.
pub struct DatagramParams<U> {
    pub method: Method,
    pub i_psk: Vec<u8>,
    pub users: Option<UserTable<U>>,
    pub sessions: SessionCache,
}

impl<U: Clone + Eq + Hash> DatagramParams<U> {
    pub fn single_user(method: Method, i_psk: Vec<u8>, udp_timeout: Duration) -> Self {
        Self {
            method,
            i_psk,
            users: None,
            sessions: SessionCache::new(udp_timeout),
        }
    }

    pub fn multi_user(method: Method, i_psk: Vec<u8>, users: UserTable<U>, udp_timeout: Duration) -> Self {
        Self {
            method,
            i_psk,
            users: Some(users),
            sessions: SessionCache::new(udp_timeout),
        }
    }
}

/// Decodes one inbound UDP packet.
pub fn decode_packet<U: Clone + Eq + Hash>(
    raw: &[u8],
    source: SocketAddr,
    params: &DatagramParams<U>,
) -> Result<DecodedPacket<U>> {
    if params.method.udp_whole_packet_suite() == ss2022_crypto::aead::Suite::XChaCha20Poly1305 {
        decode_xchacha(raw, source, params)
    } else {
        decode_aes(raw, source, params)
    }
}

fn decode_aes<U: Clone + Eq + Hash>(
    raw: &[u8],
    source: SocketAddr,
    params: &DatagramParams<U>,
) -> Result<DecodedPacket<U>> {
    let salt_len = params.method.salt_len();
    let header_len = AES_HEADER_BLOCK_LEN + if params.users.is_some() { EIH_LEN } else { 0 };
    if raw.len() < header_len + 16 {
        return Err(Error::BadHeader(raw.len()));
    }

    let mut block0 = [0u8; AES_HEADER_BLOCK_LEN];
    block0.copy_from_slice(&raw[..AES_HEADER_BLOCK_LEN]);
    block::decrypt_block(&params.i_psk, &mut block0)?;
    let session_id = u64::from_be_bytes(block0[..8].try_into().expect("8 bytes"));
    let packet_id = u64::from_be_bytes(block0[8..16].try_into().expect("8 bytes"));

    let (user, upsk) = match &params.users {
        Some(table) => {
            let isk = kdf::identity_subkey_alloc(&params.i_psk, &session_id_salt(session_id, salt_len), salt_len);
            let mut eih_enc = [0u8; EIH_LEN];
            eih_enc.copy_from_slice(&raw[AES_HEADER_BLOCK_LEN..AES_HEADER_BLOCK_LEN + EIH_LEN]);
            block::decrypt_block(&isk, &mut eih_enc)?;
            let mut eih = [0u8; EIH_LEN];
            for i in 0..EIH_LEN {
                eih[i] = eih_enc[i] ^ raw[i];
            }
            let (user, upsk) = crate::identity::resolve_user(table, &eih)?;
            (Some(user), upsk)
        }
        None => (None, params.i_psk.clone()),
    };

    let (session, created) = params.sessions.load_or_create(session_id, || {
        let recv_key = kdf::session_key_alloc(&upsk, &session_id_salt(session_id, salt_len), salt_len);
        let recv = Aead::new(params.method.suite(), &recv_key).expect("salt_len matches suite key_len");

        let local_session_id = rand::thread_rng().next_u64();
        let send_key = kdf::session_key_alloc(&upsk, &session_id_salt(local_session_id, salt_len), salt_len);
        let send = Aead::new(params.method.suite(), &send_key).expect("salt_len matches suite key_len");

        UdpSession {
            local_session_id,
            remote_session_id: session_id,
            remote_addr: RwLock::new(source),
            send_packet_id: AtomicU64::new(0),
            recv_filter: StdMutex::new(ReplayWindow::new()),
            cipher: SessionCipher::Aes { send, recv },
        }
    });

    if created {
        tracing::debug!(session_id, %source, "created udp session");
    }

    let result = (|| {
        if !session.admit(packet_id) {
            tracing::warn!(session_id, packet_id, "rejecting udp packet: replayed packet id");
            return Err(Error::PacketIdNotUnique);
        }
        *session.remote_addr.write().expect("remote_addr lock poisoned") = source;

        let recv = match &session.cipher {
            SessionCipher::Aes { recv, .. } => recv,
            SessionCipher::XChaCha { .. } => unreachable!("AES path always builds an Aes cipher"),
        };
        let nonce = &block0[4..16];
        let body_ct = &raw[header_len..];
        let plaintext = recv
            .open(nonce, &[], body_ct)
            .map_err(|e| Error::DecryptFailed(e.to_string()))?;
        let (destination, payload) = parse_inner(&plaintext)?;
        Ok(DecodedPacket {
            session_id,
            destination,
            payload,
            user: user.clone(),
        })
    })();

    if let Err(e) = &result {
        if created {
            tracing::warn!(session_id, %e, "evicting freshly created udp session after failed first packet");
            params.sessions.remove(session_id);
        }
    }
    result
}

fn decode_xchacha<U: Clone + Eq + Hash>(
    raw: &[u8],
    source: SocketAddr,
    params: &DatagramParams<U>,
) -> Result<DecodedPacket<U>> {
    if raw.len() < XCHACHA_NONCE_LEN + 16 {
        return Err(Error::BadHeader(raw.len()));
    }
    let nonce = &raw[..XCHACHA_NONCE_LEN];
    let ct = &raw[XCHACHA_NONCE_LEN..];

    // The XChaCha whole-packet layout has no room for an EIH, so it is
    // single-user only -- the iPSK doubles as the session PSK exactly as
    // the stream path does in single-user mode.
    let psk = &params.i_psk;
    let cipher = Aead::new(params.method.udp_whole_packet_suite(), psk)?;
    let plaintext = cipher
        .open(nonce, &[], ct)
        .map_err(|e| Error::DecryptFailed(e.to_string()))?;
    if plaintext.len() < 16 {
        return Err(Error::BadHeader(plaintext.len()));
    }
    let session_id = u64::from_be_bytes(plaintext[..8].try_into().expect("8 bytes"));
    let packet_id = u64::from_be_bytes(plaintext[8..16].try_into().expect("8 bytes"));
    let body = &plaintext[16..];

    let (session, created) = params.sessions.load_or_create(session_id, || {
        let cipher = Aead::new(params.method.udp_whole_packet_suite(), psk)
            .expect("psk already validated above");
        UdpSession {
            local_session_id: rand::thread_rng().next_u64(),
            remote_session_id: session_id,
            remote_addr: RwLock::new(source),
            send_packet_id: AtomicU64::new(0),
            recv_filter: StdMutex::new(ReplayWindow::new()),
            cipher: SessionCipher::XChaCha {
                cipher,
                send_nonce_prf: StdMutex::new(Blake3Prf::new()),
            },
        }
    });

    let result = (|| {
        if !session.admit(packet_id) {
            return Err(Error::PacketIdNotUnique);
        }
        *session.remote_addr.write().expect("remote_addr lock poisoned") = source;
        let (destination, payload) = parse_inner(body)?;
        Ok(DecodedPacket {
            session_id,
            destination,
            payload,
            user: None,
        })
    })();

    if result.is_err() && created {
        params.sessions.remove(session_id);
    }
    result
}

/// Encodes a reply packet bound for `session.remote_addr`. `i_psk` is
/// required for the AES layout's header-block encryption, which always
/// uses the listener's identity key, never the per-user one.
pub fn encode_reply(session: &UdpSession, i_psk: &[u8], destination: &Address, payload: &[u8]) -> Result<Vec<u8>> {
    let packet_id = session.next_packet_id();

    let mut addr_buf = Vec::new();
    destination.encode(&mut addr_buf);

    let mut inner = Vec::with_capacity(1 + 8 + 8 + 2 + addr_buf.len() + payload.len());
    inner.push(HEADER_TYPE_SERVER);
    inner.extend_from_slice(&TimestampSecs::now().0.to_be_bytes());
    inner.extend_from_slice(&session.remote_session_id.to_be_bytes());
    inner.extend_from_slice(&0u16.to_be_bytes());
    inner.extend_from_slice(&addr_buf);
    inner.extend_from_slice(payload);

    match &session.cipher {
        SessionCipher::Aes { send, .. } => {
            let mut block0 = [0u8; AES_HEADER_BLOCK_LEN];
            block0[..8].copy_from_slice(&session.local_session_id.to_be_bytes());
            block0[8..].copy_from_slice(&packet_id.to_be_bytes());
            let nonce = block0[4..16].to_vec();

            let ct = send
                .seal(&nonce, &[], &inner)
                .map_err(|e| Error::DecryptFailed(e.to_string()))?;

            let mut block0_enc = block0;
            block::encrypt_block(i_psk, &mut block0_enc)?;

            let mut out = Vec::with_capacity(AES_HEADER_BLOCK_LEN + ct.len());
            out.extend_from_slice(&block0_enc);
            out.extend_from_slice(&ct);
            Ok(out)
        }
        SessionCipher::XChaCha { cipher, send_nonce_prf } => {
            let mut nonce = [0u8; XCHACHA_NONCE_LEN];
            send_nonce_prf
                .lock()
                .expect("nonce prf mutex poisoned")
                .fill(&mut nonce);

            let mut plaintext = Vec::with_capacity(16 + inner.len());
            plaintext.extend_from_slice(&session.local_session_id.to_be_bytes());
            plaintext.extend_from_slice(&packet_id.to_be_bytes());
            plaintext.extend_from_slice(&inner);

            let ct = cipher
                .seal(&nonce, &[], &plaintext)
                .map_err(|e| Error::DecryptFailed(e.to_string()))?;

            let mut out = Vec::with_capacity(XCHACHA_NONCE_LEN + ct.len());
            out.extend_from_slice(&nonce);
            out.extend_from_slice(&ct);
            Ok(out)
        }
    }
}
