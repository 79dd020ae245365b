//! dirpush library
//!
//! One-way directory mirroring over a small framed TCP protocol. Content
//! digests decide which files are pushed; transfers may be deflated.

pub mod checksum;
pub mod cli;
pub mod config;
pub mod discovery;
pub mod error;
pub mod frame;
pub mod fs_enum;
pub mod logger;
pub mod net;
pub mod protocol;
pub mod protocol_core;
pub mod service;
pub mod transfer;

pub use error::{Result, SyncError};
