//! Error taxonomy for the shadowsocks-2022 stream and datagram paths. Every
//! kind here is a protocol fault that is fatal to the offending connection or
//! packet; nothing in this crate retries internally, the client is expected
//! to reconnect / resend.

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("missing pre-shared key for this listener")]
    MissingPsk,
    #[error("bad key: {0}")]
    BadKey(String),
    #[error("bad header: short read ({0} bytes)")]
    BadHeader(usize),
    #[error("bad header type: expected {expected:#04x}, got {actual:#04x}")]
    BadHeaderType { expected: u8, actual: u8 },
    #[error("timestamp outside the {window_secs}s window (skew {skew_secs}s)")]
    BadTimestamp { skew_secs: u64, window_secs: u64 },
    #[error("request salt already seen within the replay window")]
    SaltNotUnique,
    #[error("datagram packet id already seen within the replay window")]
    PacketIdNotUnique,
    #[error("padding length is zero and no payload byte followed it")]
    NoPadding,
    #[error("padding length {claimed} exceeds {cached} cached bytes")]
    BadPadding { claimed: u16, cached: usize },
    #[error("identity header did not match any configured user")]
    InvalidRequest,
    #[error("AEAD tag verification failed: {0}")]
    DecryptFailed(String),
    #[error("address codec: {0}")]
    BadAddress(String),
    #[error(transparent)]
    Crypto(#[from] ss2022_crypto::Error),
    #[error(transparent)]
    Core(#[from] ss2022_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error indicates an AEAD authentication failure, as
    /// opposed to a structural protocol violation.
    pub fn is_decrypt_failure(&self) -> bool {
        matches!(self, Error::DecryptFailed(_))
    }
}

impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
        }
    }
}
