#![forbid(unsafe_code)]

//! Shared configuration, error taxonomy, and scalar types for the
//! shadowsocks-2022 server core.
//!
//! This crate intentionally stays lightweight and carries no protocol logic;
//! it is the ambient stack that `ss2022-crypto` and `ss2022-stream` build on.

pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::TimestampSecs;
