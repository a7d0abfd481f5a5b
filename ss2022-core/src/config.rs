#![forbid(unsafe_code)]

//! Server configuration. Parses a TOML file into a strongly-typed structure and
//! supports hot-reloading via the `notify` crate.

use notify::{
    Event, EventKind, RecommendedWatcher, RecursiveMode, Result as NotifyResult, Watcher,
};
use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path, sync::Arc};
use tokio::sync::watch;

use crate::error::Error;

fn default_listen_addr() -> String {
    "0.0.0.0:8388".to_string()
}

fn default_udp_timeout_secs() -> u64 {
    300
}

fn decode_psk(encoded: &str) -> crate::error::Result<Vec<u8>> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::config(format!("invalid base64 PSK: {e}")))
}

/// Primary configuration structure for a shadowsocks-2022 listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// One of `2022-blake3-aes-128-gcm`, `2022-blake3-aes-256-gcm`,
    /// `2022-blake3-chacha20-poly1305`.
    pub method: String,

    /// Address to accept TCP connections and UDP packets on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Base64-encoded identity PSK (iPSK). Always required: it is the
    /// server's own key in single-user mode and the listener-level key used
    /// to decrypt the identity header in multi-user mode.
    pub i_psk: String,

    /// Base64-encoded per-user PSKs (uPSK), keyed by an opaque user name.
    /// Empty means single-user mode, where `i_psk` doubles as the session
    /// PSK.
    pub users: HashMap<String, String>,

    /// UDP session idle timeout, in seconds.
    #[serde(default = "default_udp_timeout_secs")]
    pub udp_session_timeout_secs: u64,

    /// Logging verbosity passed through to `tracing-subscriber` by the
    /// embedding binary (`error`, `warn`, `info`, `debug`, `trace`).
    pub log_level: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            method: String::new(),
            listen_addr: default_listen_addr(),
            i_psk: String::new(),
            users: HashMap::new(),
            udp_session_timeout_secs: default_udp_timeout_secs(),
            log_level: Some("info".to_string()),
        }
    }
}

impl ServerConfig {
    /// Whether this listener is configured for multi-user identity demux.
    pub fn is_multi_user(&self) -> bool {
        !self.users.is_empty()
    }

    /// Base64-decodes [`ServerConfig::i_psk`] into raw key bytes.
    pub fn i_psk_bytes(&self) -> crate::error::Result<Vec<u8>> {
        decode_psk(&self.i_psk)
    }

    /// Base64-decodes every entry in [`ServerConfig::users`] into raw key
    /// bytes, keyed by the same user name.
    pub fn user_psks_bytes(&self) -> crate::error::Result<HashMap<String, Vec<u8>>> {
        self.users
            .iter()
            .map(|(name, psk)| Ok((name.clone(), decode_psk(psk)?)))
            .collect()
    }

    /// Load a configuration file from the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let data = fs::read_to_string(&path).map_err(Error::from)?;
        let cfg = toml::from_str::<ServerConfig>(&data)?;
        Ok(cfg)
    }

    /// Watch the configuration file for changes and receive updates through a
    /// watch channel. The protocol core itself never rekeys mid-session, so a
    /// reload only affects connections and UDP sessions accepted after it
    /// lands.
    pub fn watch_file<P: AsRef<Path>>(
        path: P,
    ) -> crate::error::Result<(Arc<ServerConfig>, watch::Receiver<Arc<ServerConfig>>)> {
        let path_buf = path.as_ref().to_path_buf();
        let initial_cfg = Arc::new(Self::from_file(&path_buf)?);
        let path_in_closure = path_buf.clone();
        let (tx, rx) = watch::channel::<Arc<ServerConfig>>(initial_cfg.clone());

        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: NotifyResult<Event>| match res {
                Ok(event) if matches!(event.kind, EventKind::Modify(_)) => {
                    match Self::from_file(&path_in_closure) {
                        Ok(updated) => {
                            tracing::info!(path = %path_in_closure.display(), "reloaded configuration");
                            let _ = tx.send(Arc::new(updated));
                        }
                        Err(e) => {
                            tracing::warn!(path = %path_in_closure.display(), %e, "ignoring invalid configuration reload");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(%e, "configuration watcher error"),
            })
            .map_err(|e| Error::config(e.to_string()))?;

        watcher
            .watch(&path_buf, RecursiveMode::NonRecursive)
            .map_err(|e| Error::config(e.to_string()))?;
        // The watcher must outlive this function; leak it for the process lifetime
        // rather than thread a guard type through the public API.
        std::mem::forget(watcher);

        Ok((initial_cfg, rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_minimal_single_user() {
        let toml = r#"
            method = "2022-blake3-aes-128-gcm"
            i_psk = "AAAAAAAAAAAAAAAAAAAAAA=="
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.method, "2022-blake3-aes-128-gcm");
        assert!(!cfg.is_multi_user());
        assert_eq!(cfg.udp_session_timeout_secs, 300);
        assert_eq!(cfg.i_psk_bytes().unwrap().len(), 16);
    }

    #[test]
    fn rejects_non_base64_psk() {
        let cfg = ServerConfig {
            i_psk: "not valid base64!!".to_string(),
            ..ServerConfig::default()
        };
        assert!(cfg.i_psk_bytes().is_err());
    }

    #[test]
    fn parses_multi_user() {
        let toml = r#"
            method = "2022-blake3-aes-256-gcm"
            i_psk = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
            [users]
            alice = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
        "#;
        let cfg: ServerConfig = toml::from_str(toml).unwrap();
        assert!(cfg.is_multi_user());
        assert!(cfg.users.contains_key("alice"));
    }

    #[test]
    fn from_file_round_trips() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"method = "2022-blake3-chacha20-poly1305"
i_psk = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=""#
        )
        .unwrap();
        let cfg = ServerConfig::from_file(f.path()).unwrap();
        assert_eq!(cfg.method, "2022-blake3-chacha20-poly1305");
    }
}
