//! Stream (TCP) service: handshake parsing, header validation, and
//! response framing.
//!
//! `accept` implements the single-user and multi-user paths merged into
//! one handshake: the only difference between the two is how the session
//! key is derived before the fixed chunk is opened. Response writing
//! implements first-write-wins publication with a per-connection mutex
//! serializing the write path -- the mutex is held across the
//! underlying socket write, which is the one place this crate accepts
//! holding a lock across I/O: a connection's writer is inherently
//! single-occupancy (two concurrent `Write` calls on one socket must
//! serialize regardless), unlike the salt filter or session cache locks
//! elsewhere in this crate, which are always released before any I/O.

use std::hash::Hash;
use std::time::Duration;

use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use ss2022_core::TimestampSecs;
use ss2022_crypto::aead::Aead;
use ss2022_crypto::kdf;
use ss2022_crypto::method::Method;

use crate::address::Address;
use crate::errors::{Error, Result};
use crate::identity::{self, UserTable};
use crate::record::{ChunkAsyncReader, ChunkReader, ChunkWriter};
use crate::replay::SaltFilter;

const HEADER_TYPE_CLIENT: u8 = 0x00;
const HEADER_TYPE_SERVER: u8 = 0x01;
const TIMESTAMP_WINDOW: Duration = Duration::from_secs(30);
/// `type (1) + timestamp (8) + variable-length-prefix (2)`.
const REQUEST_FIXED_CHUNK_LEN: usize = 1 + 8 + 2;
const EIH_LEN: usize = 16;

/// Listener-wide parameters the stream service needs to accept a
/// connection: the configured method, the listener's iPSK, the replay
/// filter, and (multi-user mode) the user table.
pub struct ListenerParams<U> {
    pub method: Method,
    pub i_psk: Vec<u8>,
    pub salt_filter: SaltFilter,
    pub users: Option<UserTable<U>>,
}

impl<U: Clone + Eq + Hash> ListenerParams<U> {
    pub fn single_user(method: Method, i_psk: Vec<u8>) -> Self {
        Self {
            method,
            i_psk,
            salt_filter: SaltFilter::new(),
            users: None,
        }
    }

    pub fn multi_user(method: Method, i_psk: Vec<u8>, users: UserTable<U>) -> Self {
        Self {
            method,
            i_psk,
            salt_filter: SaltFilter::new(),
            users: Some(users),
        }
    }

    pub fn is_multi_user(&self) -> bool {
        self.users.is_some()
    }
}

/// Everything `accept` hands back to the caller: the decrypted read half
/// wired up as a plain `AsyncRead` adapter, a response writer that
/// performs first-write response framing, the parsed destination, and
/// (multi-user mode) the identified user.
pub struct Accepted<S, U> {
    pub reader: ChunkAsyncReader<ReadHalf<S>>,
    pub writer: ResponseWriter<WriteHalf<S>>,
    pub destination: Address,
    pub user: Option<U>,
}

/// Accepts one shadowsocks-2022 stream handshake over `socket`.
pub async fn accept<S, U>(socket: S, params: &ListenerParams<U>) -> Result<Accepted<S, U>>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    U: Clone + Eq + Hash,
{
    let (mut read_half, write_half) = tokio::io::split(socket);
    let salt_len = params.method.salt_len();

    let mut request_salt = vec![0u8; salt_len];
    tokio::io::AsyncReadExt::read_exact(&mut read_half, &mut request_salt)
        .await
        .map_err(|_| Error::BadHeader(0))?;

    let eih = if params.is_multi_user() {
        let mut buf = [0u8; EIH_LEN];
        tokio::io::AsyncReadExt::read_exact(&mut read_half, &mut buf)
            .await
            .map_err(|_| Error::BadHeader(salt_len))?;
        Some(buf)
    } else {
        None
    };

    if !params.salt_filter.check(&request_salt) {
        tracing::warn!("rejecting handshake: request salt already seen within the replay window");
        return Err(Error::SaltNotUnique);
    }

    let (session_psk, user) = match (&params.users, eih) {
        (Some(table), Some(eih)) => {
            let isk = kdf::identity_subkey_alloc(&params.i_psk, &request_salt, salt_len);
            let decrypted = identity::decrypt_eih(&isk, &eih)?;
            let (user, upsk) = identity::resolve_user(table, &decrypted).inspect_err(|_| {
                tracing::warn!("rejecting handshake: identity header matched no configured user");
            })?;
            (upsk, Some(user))
        }
        (None, None) => (params.i_psk.clone(), None),
        _ => unreachable!("ListenerParams::is_multi_user mirrors the `users` option"),
    };

    let session_key = kdf::session_key_alloc(&session_psk, &request_salt, salt_len);
    let aead = Aead::new(params.method.suite(), &session_key)?;
    let mut reader = ChunkReader::new(read_half, aead);

    reader.read_with_length(REQUEST_FIXED_CHUNK_LEN).await?;
    let fixed = reader.take_cached(REQUEST_FIXED_CHUNK_LEN);
    if fixed[0] != HEADER_TYPE_CLIENT {
        return Err(Error::BadHeaderType {
            expected: HEADER_TYPE_CLIENT,
            actual: fixed[0],
        });
    }
    let timestamp = TimestampSecs(u64::from_be_bytes(fixed[1..9].try_into().expect("8 bytes")));
    check_timestamp(timestamp).inspect_err(|e| tracing::warn!(%e, "rejecting handshake"))?;
    let variable_len = u16::from_be_bytes(fixed[9..11].try_into().expect("2 bytes")) as usize;

    reader.read_with_length(variable_len).await?;
    let variable = reader.take_cached(variable_len);

    let (rest, destination) = Address::parse(&variable)?;
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
    let initial_payload = after_padding_len[padding_len..].to_vec();

    // Re-seed the reader's cache with whatever payload bytes the variable
    // chunk carried past the padding, so the decrypted `AsyncRead` adapter
    // starts from exactly where the handshake left off.
    let mut async_reader = reader.into_async_read();
    async_reader.prime_cache(initial_payload);

    let writer = ResponseWriter::new(write_half, session_psk, params.method, request_salt);

    tracing::debug!(destination = %destination, multi_user = user.is_some(), "accepted shadowsocks handshake");
    Ok(Accepted {
        reader: async_reader,
        writer,
        destination,
        user,
    })
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

enum ResponseState<W> {
    Pending { half: W, request_salt: Vec<u8> },
    Ready(ChunkWriter<W>),
}

/// Server-to-client response writer: the first call to [`ResponseWriter::write`]
/// generates a fresh salt and emits the response header plus the caller's
/// payload in one flush; every subsequent call chunks
/// straight through the now-installed [`ChunkWriter`].
pub struct ResponseWriter<W> {
    state: Mutex<Option<ResponseState<W>>>,
    upsk: Vec<u8>,
    method: Method,
}

impl<W: AsyncWrite + Unpin> ResponseWriter<W> {
    pub fn new(half: W, upsk: Vec<u8>, method: Method, request_salt: Vec<u8>) -> Self {
        Self {
            state: Mutex::new(Some(ResponseState::Pending { half, request_salt })),
            upsk,
            method,
        }
    }

    pub async fn write(&self, payload: &[u8]) -> Result<()> {
        let mut guard = self.state.lock().await;
        let current = guard.take().expect("ResponseWriter state already consumed");
        match current {
            ResponseState::Ready(mut writer) => {
                let mut buf = Vec::new();
                writer.write_chunk(&mut buf, payload)?;
                writer.flush(&mut buf).await?;
                *guard = Some(ResponseState::Ready(writer));
                Ok(())
            }
            ResponseState::Pending { half, request_salt } => {
                let salt_len = self.method.salt_len();
                let mut fresh_salt = vec![0u8; salt_len];
                rand::thread_rng().fill_bytes(&mut fresh_salt);

                let kw = kdf::session_key_alloc(&self.upsk, &fresh_salt, salt_len);
                let aead = Aead::new(self.method.suite(), &kw)?;
                let mut writer = ChunkWriter::new(half, aead);

                let mut header = Vec::with_capacity(1 + 8 + salt_len + 2);
                header.push(HEADER_TYPE_SERVER);
                header.extend_from_slice(&TimestampSecs::now().0.to_be_bytes());
                header.extend_from_slice(&request_salt);
                header.extend_from_slice(&(payload.len() as u16).to_be_bytes());

                let mut buf = Vec::new();
                buf.extend_from_slice(&fresh_salt);
                writer.write_raw(&mut buf, &header)?;
                writer.write_raw(&mut buf, payload)?;
                writer.flush(&mut buf).await?;

                *guard = Some(ResponseState::Ready(writer));
                Ok(())
            }
        }
    }
}
