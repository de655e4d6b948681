//! # teams-chat-export
//!
//! A CLI tool that incrementally exports Microsoft Teams chats to local Markdown files.
//!
//! ## What it does
//!
//! Teams chats are read through the Microsoft Graph API, one page of messages at a
//! time, newest first. Each chat is written to `<target dir>/<chat name>.md` in
//! chronological order below the title.
//!
//! ## Resuming
//!
//! After every page the cursor of the next page is saved to a state file. An
//! interrupted download (crash, Ctrl-C, declined confirmation, message limit) can be
//! resumed from exactly that page on the next run. Chats that were read to the end are
//! recognized and skipped in bulk mode.
//!
//! Messages still held in memory when the process dies are lost; everything already
//! flushed to the archive and every checkpointed cursor survives.
//!
//! ## Usage
//!
//! ```sh
//! # Download the first chat whose name contains "design"
//! teams-chat-export --name design
//!
//! # Download every chat, unattended, stopping at the start of 2024
//! teams-chat-export --download-all --oldest-date 2024-01-01 --yes
//! ```
//!
//! Preferences can be persisted in `~/.config/teams-chat-export/config.toml`.
pub mod archive;
pub mod checkpoint;
pub mod credentials;
pub mod download;
pub mod error;
pub mod fetcher;
pub mod listing;
pub mod model;
pub mod prompt;
pub mod runner;
pub mod utils;

pub use archive::ArchiveWriter;
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use download::{DownloadOptions, DownloadReport, Downloader, StopReason};
pub use error::{DownloadError, FetchError};
pub use fetcher::{Credential, GraphClient, Page, PageFetcher};
pub use prompt::{AutoDecider, ConsoleDecider, Decider};
pub use runner::{RunSummary, Selection};
pub use utils::ExportConfig;
