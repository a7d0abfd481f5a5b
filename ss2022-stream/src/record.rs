//! AEAD record framing: the chunked stream format shared by the
//! request/response handshake and the ongoing application-data stream.
//!
//! Every sealed unit on the wire consumes one slot of a 96-bit
//! little-endian nonce counter that starts at zero and is never reused
//! under one key -- one direction per [`ChunkReader`] / [`ChunkWriter`]
//! instance. There is no rekey machinery: this protocol never rekeys
//! mid-session.
//!
//! Two distinct record shapes share the same nonce sequence:
//! - a *raw* chunk: ciphertext of an already-known length, used for the
//!   handshake's fixed and variable chunks where the length is carried in
//!   a preceding plaintext field rather than repeated on the wire
//!   ([`ChunkReader::read_raw`] / [`ChunkWriter::write_raw`]);
//! - a *length-prefixed* chunk: a 2-byte length sealed on its own (one
//!   nonce), followed by that many bytes of payload sealed separately
//!   (another nonce) -- the general `[u16 length][ciphertext+tag]` shape
//!   used for the ongoing body stream handed to the external connection
//!   handler.

use ss2022_crypto::aead::Aead;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{Error, Result};

/// Maximum plaintext payload carried by a single length-prefixed chunk.
pub const MAX_PACKET_SIZE: usize = 0xFFFF;

fn nonce_bytes(counter: u64) -> [u8; 12] {
    let mut n = [0u8; 12];
    n[..8].copy_from_slice(&counter.to_le_bytes());
    n
}

/// Decrypting half of an AEAD-sealed chunk stream, over any `AsyncRead`.
pub struct ChunkReader<R> {
    inner: R,
    aead: Aead,
    nonce: u64,
    tag_len: usize,
    /// Already-decrypted plaintext not yet consumed by the caller.
    cache: Vec<u8>,
    cache_pos: usize,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    pub fn new(inner: R, aead: Aead) -> Self {
        let tag_len = aead.suite().tag_len();
        Self {
            inner,
            aead,
            nonce: 0,
            tag_len,
            cache: Vec::new(),
            cache_pos: 0,
        }
    }

    fn next_nonce(&mut self) -> [u8; 12] {
        let n = nonce_bytes(self.nonce);
        self.nonce += 1;
        n
    }

    /// Reads and authenticates one ciphertext chunk of known payload length
    /// `n`, appending the plaintext to the internal cache. Used for the
    /// handshake's fixed and variable chunks.
    pub async fn read_with_length(&mut self, n: usize) -> Result<()> {
        let ct_len = n + self.tag_len;
        let mut ct = vec![0u8; ct_len];
        self.inner.read_exact(&mut ct).await?;
        let nonce = self.next_nonce();
        let pt = self
            .aead
            .open(&nonce, &[], &ct)
            .map_err(|e| Error::DecryptFailed(e.to_string()))?;
        self.cache.extend_from_slice(&pt);
        Ok(())
    }

    /// Reads one length-prefixed record from the general chunked stream: a
    /// sealed `u16` length followed by a sealed payload of that length,
    /// each consuming its own nonce.
    async fn read_one_framed_chunk(&mut self) -> Result<()> {
        let len_ct_len = 2 + self.tag_len;
        let mut len_ct = vec![0u8; len_ct_len];
        self.inner.read_exact(&mut len_ct).await?;
        let len_nonce = self.next_nonce();
        let len_pt = self
            .aead
            .open(&len_nonce, &[], &len_ct)
            .map_err(|e| Error::DecryptFailed(e.to_string()))?;
        let len = u16::from_be_bytes([len_pt[0], len_pt[1]]) as usize;
        let len = len.min(MAX_PACKET_SIZE);

        let payload_ct_len = len + self.tag_len;
        let mut payload_ct = vec![0u8; payload_ct_len];
        self.inner.read_exact(&mut payload_ct).await?;
        let payload_nonce = self.next_nonce();
        let payload_pt = self
            .aead
            .open(&payload_nonce, &[], &payload_ct)
            .map_err(|e| Error::DecryptFailed(e.to_string()))?;
        self.cache.extend_from_slice(&payload_pt);
        Ok(())
    }

    /// Fills `dst` with decrypted application data, pulling from the cache
    /// first and reading as many additional framed chunks as needed.
    pub async fn read_chunk(&mut self, dst: &mut [u8]) -> Result<()> {
        while self.cached() < dst.len() {
            self.read_one_framed_chunk().await?;
        }
        let n = dst.len();
        dst.copy_from_slice(&self.cache[self.cache_pos..self.cache_pos + n]);
        self.discard(n);
        Ok(())
    }

    /// Bytes of already-decrypted plaintext sitting in the cache, not yet
    /// consumed.
    pub fn cached(&self) -> usize {
        self.cache.len() - self.cache_pos
    }

    /// Drops `n` cached bytes from the front without returning them (used
    /// to skip handshake padding).
    pub fn discard(&mut self, n: usize) {
        self.cache_pos += n;
        if self.cache_pos == self.cache.len() {
            self.cache.clear();
            self.cache_pos = 0;
        }
    }

    /// Takes `n` cached bytes without an additional read; callers must have
    /// already ensured `cached() >= n` (e.g. via [`ChunkReader::read_with_length`]).
    pub fn take_cached(&mut self, n: usize) -> Vec<u8> {
        let out = self.cache[self.cache_pos..self.cache_pos + n].to_vec();
        self.discard(n);
        out
    }

    /// Splits this reader into an owning [`AsyncRead`] adapter over the
    /// general chunked stream, handing any still-cached bytes (the
    /// handshake's initial payload) to the caller first.
    pub fn into_async_read(self) -> ChunkAsyncReader<R> {
        ChunkAsyncReader { reader: self }
    }
}

/// Adapts a [`ChunkReader`]'s decrypted general-chunk stream to
/// `tokio::io::AsyncRead`, for handing to the external connection handler.
pub struct ChunkAsyncReader<R> {
    reader: ChunkReader<R>,
}

impl<R: AsyncRead + Unpin> ChunkAsyncReader<R> {
    /// Seeds the cache with bytes already decrypted during the handshake
    /// (the handshake's initial payload), so the first
    /// [`ChunkAsyncReader::read`] call serves them before touching the
    /// socket again.
    pub fn prime_cache(&mut self, initial_payload: Vec<u8>) {
        self.reader.cache = initial_payload;
        self.reader.cache_pos = 0;
    }

    /// Reads up to `buf.len()` decrypted bytes, returning the number
    /// actually filled (0 only on EOF, matching `AsyncReadExt::read`
    /// semantics rather than `read_exact`).
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.reader.cached() == 0 {
            self.reader.read_one_framed_chunk().await?;
        }
        let n = buf.len().min(self.reader.cached());
        if n == 0 {
            return Ok(0);
        }
        buf[..n].copy_from_slice(&self.reader.cache[self.reader.cache_pos..self.reader.cache_pos + n]);
        self.reader.discard(n);
        Ok(n)
    }
}

/// Encrypting half of an AEAD-sealed chunk stream, over any `AsyncWrite`.
pub struct ChunkWriter<W> {
    inner: Option<W>,
    aead: Aead,
    nonce: u64,
    tag_len: usize,
}

impl<W: AsyncWrite + Unpin> ChunkWriter<W> {
    pub fn new(inner: W, aead: Aead) -> Self {
        let tag_len = aead.suite().tag_len();
        Self {
            inner: Some(inner),
            aead,
            nonce: 0,
            tag_len,
        }
    }

    fn next_nonce(&mut self) -> [u8; 12] {
        let n = nonce_bytes(self.nonce);
        self.nonce += 1;
        n
    }

    /// Seals `plaintext` directly into `buf` with one nonce, no length
    /// prefix -- used for the handshake's fixed and variable response
    /// chunks, whose lengths are carried by the protocol rather than
    /// repeated on the wire.
    pub fn write_raw(&mut self, buf: &mut Vec<u8>, plaintext: &[u8]) -> Result<()> {
        let nonce = self.next_nonce();
        let ct = self
            .aead
            .seal(&nonce, &[], plaintext)
            .map_err(|e| Error::DecryptFailed(e.to_string()))?;
        buf.extend_from_slice(&ct);
        Ok(())
    }

    /// Appends one or more length-prefixed chunks encoding `payload`,
    /// splitting at [`MAX_PACKET_SIZE`].
    pub fn write_chunk(&mut self, buf: &mut Vec<u8>, payload: &[u8]) -> Result<()> {
        for piece in payload.chunks(MAX_PACKET_SIZE) {
            let len_nonce = self.next_nonce();
            let len_bytes = (piece.len() as u16).to_be_bytes();
            let len_ct = self
                .aead
                .seal(&len_nonce, &[], &len_bytes)
                .map_err(|e| Error::DecryptFailed(e.to_string()))?;
            buf.extend_from_slice(&len_ct);

            let payload_nonce = self.next_nonce();
            let payload_ct = self
                .aead
                .seal(&payload_nonce, &[], piece)
                .map_err(|e| Error::DecryptFailed(e.to_string()))?;
            buf.extend_from_slice(&payload_ct);
        }
        if payload.is_empty() {
            // An explicit zero-length chunk (e.g. a keepalive) still needs
            // its own length record.
            let len_nonce = self.next_nonce();
            let len_ct = self
                .aead
                .seal(&len_nonce, &[], &0u16.to_be_bytes())
                .map_err(|e| Error::DecryptFailed(e.to_string()))?;
            buf.extend_from_slice(&len_ct);
            let payload_nonce = self.next_nonce();
            let payload_ct = self
                .aead
                .seal(&payload_nonce, &[], &[])
                .map_err(|e| Error::DecryptFailed(e.to_string()))?;
            buf.extend_from_slice(&payload_ct);
        }
        Ok(())
    }

    /// Flushes `buf` to the underlying writer and clears it.
    pub async fn flush(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        let writer = self
            .inner
            .as_mut()
            .expect("ChunkWriter::flush called after into_inner");
        writer.write_all(buf).await?;
        writer.flush().await?;
        buf.clear();
        Ok(())
    }

    pub fn tag_len(&self) -> usize {
        self.tag_len
    }
}
