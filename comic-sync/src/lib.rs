//! # Comic Sync
//!
//! Keeps a page collection in step with the page server.
//!
//! ```text
//! SessionHandle ──commands──► session task ──effects──► SyncEngine
//!                                  │   ▲
//!                    save-pages ◄──┘   └── pages/stream (SSE)
//! ```
//!
//! Cosmetic edits are saved after a trailing debounce, structural edits at
//! once. Pushed snapshots that match the last acknowledged save are echoes
//! and are ignored; any other snapshot replaces the local pages.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod push;
pub mod remote;
pub mod session;

pub use config::{RetryConfig, SyncConfig, DEFAULT_SERVER_URL};
pub use engine::{PersistToken, RemoteState, SaveState, SaveStatus, SyncEffect, SyncEngine};
pub use error::{RemoteError, RemoteResult, SessionError, SessionResult};
pub use push::{
    ChannelAction, ChannelController, ChannelState, PushChannel, PushEvent, PushSource,
    PushStream, SseDecoder, SseFrame,
};
pub use remote::{
    parse_filename_from_disposition, HttpRemote, ImageRef, ImageUpload, LoadedState,
    RemoteStore, StateArchive,
};
pub use session::{Edit, ExportedFile, SessionBuilder, SessionHandle, SessionSnapshot};

/// Crate version, sent as the HTTP user agent suffix.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
