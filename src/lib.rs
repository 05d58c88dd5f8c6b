//! Synchronize IMAP mailboxes with a local tag-indexed maildir.
//!
//! Each run pushes local tag changes to the server, then pulls new
//! messages and remote flag changes into per-folder maildirs. Sync
//! state lives in a small SQLite database next to the maildir.

pub mod cli;
pub mod config;
pub mod engine;
pub mod flags;
pub mod index;
pub mod maildir;
pub mod remote;
pub mod syncdb;
