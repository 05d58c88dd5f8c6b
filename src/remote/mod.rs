//! IMAP connect, folder listing, and per-mailbox session state.
//!
//! One [`Handler`] wraps one authenticated connection to one account.
//! The protocol level is single-threaded: one in-flight command per
//! connection.

pub mod fetch;
pub mod update;

use anyhow::{bail, Result};
use imap::types::{Fetch, Flag, Mailbox as ImapMailbox, Name, ZeroCopy};
use native_tls::{TlsConnector, TlsStream};
use std::borrow::Cow;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config;
use crate::maildir::UidState;

/// Protocol-level failures the engine distinguishes on.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("folder {folder} has a new UIDVALIDITY (stored {stored}, server reports {server})")]
    UidValidityMismatch {
        folder: String,
        stored: u32,
        server: u32,
    },

    #[error("server does not support UIDPLUS, which is required for pushing new messages")]
    MissingUidPlus,

    #[error("{0}")]
    Violation(String),
}

pub(crate) type Fetches = ZeroCopy<Vec<Fetch>>;

/// One authenticated IMAP session, plaintext or TLS.
pub(crate) enum Session {
    Tls(imap::Session<TlsStream<TcpStream>>),
    Plain(imap::Session<TcpStream>),
}

impl Session {
    pub(crate) fn select(&mut self, folder: &str) -> imap::error::Result<ImapMailbox> {
        match self {
            Session::Tls(s) => s.select(folder),
            Session::Plain(s) => s.select(folder),
        }
    }

    pub(crate) fn list_all(&mut self) -> imap::error::Result<Vec<String>> {
        let names: ZeroCopy<Vec<Name>> = match self {
            Session::Tls(s) => s.list(Some(""), Some("*"))?,
            Session::Plain(s) => s.list(Some(""), Some("*"))?,
        };
        Ok(names.iter().map(|n| n.name().to_string()).collect())
    }

    pub(crate) fn uid_fetch(&mut self, uid_set: &str, query: &str) -> imap::error::Result<Fetches> {
        match self {
            Session::Tls(s) => s.uid_fetch(uid_set, query),
            Session::Plain(s) => s.uid_fetch(uid_set, query),
        }
    }

    pub(crate) fn uid_store(&mut self, uid_set: &str, query: &str) -> imap::error::Result<()> {
        match self {
            Session::Tls(s) => s.uid_store(uid_set, query)?,
            Session::Plain(s) => s.uid_store(uid_set, query)?,
        };
        Ok(())
    }

    pub(crate) fn append_with_flags(
        &mut self,
        folder: &str,
        content: &[u8],
        flags: &[Flag<'static>],
    ) -> imap::error::Result<()> {
        match self {
            Session::Tls(s) => s.append_with_flags(folder, content, flags),
            Session::Plain(s) => s.append_with_flags(folder, content, flags),
        }
    }

    pub(crate) fn supports(&mut self, capability: &str) -> imap::error::Result<bool> {
        let caps = match self {
            Session::Tls(s) => s.capabilities()?,
            Session::Plain(s) => s.capabilities()?,
        };
        Ok(caps.has_str(capability))
    }

    fn logout(&mut self) -> imap::error::Result<()> {
        match self {
            Session::Tls(s) => s.logout(),
            Session::Plain(s) => s.logout(),
        }
    }
}

pub(crate) fn flag_to_string(flag: &Flag<'_>) -> String {
    match flag {
        Flag::Seen => "\\Seen".to_string(),
        Flag::Answered => "\\Answered".to_string(),
        Flag::Flagged => "\\Flagged".to_string(),
        Flag::Deleted => "\\Deleted".to_string(),
        Flag::Draft => "\\Draft".to_string(),
        Flag::Recent => "\\Recent".to_string(),
        Flag::MayCreate => "\\*".to_string(),
        Flag::Custom(name) => name.to_string(),
    }
}

pub(crate) fn atoms_to_flags(atoms: &[String]) -> Vec<Flag<'static>> {
    atoms
        .iter()
        .map(|atom| match atom.as_str() {
            "\\Seen" => Flag::Seen,
            "\\Answered" => Flag::Answered,
            "\\Flagged" => Flag::Flagged,
            "\\Deleted" => Flag::Deleted,
            "\\Draft" => Flag::Draft,
            other => Flag::Custom(Cow::Owned(other.to_string())),
        })
        .collect()
}

/// Reads from one IMAP account and maintains its maildir and UID
/// cursors under `mailbox_dir`.
pub struct Handler {
    pub(crate) mailbox_dir: PathBuf,
    pub(crate) cfg: config::Mailbox,
    pub(crate) session: Session,
    pub(crate) uid_state: UidState,
}

impl Handler {
    /// Dial, authenticate, and load the persisted UID cursors.
    pub fn connect(mailbox_dir: &Path, cfg: &config::Mailbox) -> Result<Handler> {
        let port = cfg.effective_port();
        let host = cfg.server.as_str();

        let session = if cfg.use_tls {
            let tls = TlsConnector::builder().build()?;
            let client = imap::connect((host, port), host, &tls)?;
            Session::Tls(client.login(&cfg.username, &cfg.password).map_err(|e| e.0)?)
        } else if cfg.use_starttls {
            let tls = TlsConnector::builder().build()?;
            let client = imap::connect_starttls((host, port), host, &tls)?;
            Session::Tls(client.login(&cfg.username, &cfg.password).map_err(|e| e.0)?)
        } else {
            let tcp = TcpStream::connect((host, port))?;
            let mut client = imap::Client::new(tcp);
            client.read_greeting()?;
            Session::Plain(client.login(&cfg.username, &cfg.password).map_err(|e| e.0)?)
        };

        Ok(Handler {
            mailbox_dir: mailbox_dir.to_path_buf(),
            cfg: cfg.clone(),
            session,
            uid_state: UidState::load(mailbox_dir)?,
        })
    }

    /// Folders to sync: `LIST "" "*"` filtered by the configured
    /// include/exclude lists. Every explicitly included folder must
    /// exist on the server.
    pub fn list_folders(&mut self) -> Result<Vec<String>> {
        let names = self.session.list_all()?;
        let folders: Vec<String> = names
            .into_iter()
            .filter(|name| self.cfg.folder_included(name))
            .collect();

        for wanted in &self.cfg.folders.include {
            if !folders.iter().any(|f| f == wanted) {
                bail!("folder {} not found on server", wanted);
            }
        }
        Ok(folders)
    }

    pub fn last_seen_uid(&self, folder: &str) -> u32 {
        self.uid_state.get(folder)
    }

    pub(crate) fn set_last_seen_uid(&mut self, folder: &str, uid: u32) {
        self.uid_state.set(folder, uid);
    }

    pub fn save_uid_state(&self) -> Result<()> {
        self.uid_state.save(&self.mailbox_dir)
    }

    /// Persist cursors and log out.
    pub fn close(mut self) -> Result<()> {
        self.save_uid_state()?;
        // Some servers send a final response the client cannot parse;
        // everything is already synced at this point.
        let _ = self.session.logout();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_validity_mismatch_names_folder_and_generations() {
        let err = ProtocolError::UidValidityMismatch {
            folder: "INBOX".to_string(),
            stored: 1000,
            server: 1001,
        };
        let text = err.to_string();
        assert!(text.contains("INBOX"));
        assert!(text.contains("1000"));
        assert!(text.contains("1001"));
    }

    #[test]
    fn test_protocol_error_downcasts_through_anyhow() {
        let err: anyhow::Error = ProtocolError::MissingUidPlus.into();
        assert!(err.downcast_ref::<ProtocolError>().is_some());
    }

    #[test]
    fn test_atom_flag_round_trip() {
        let atoms = vec!["\\Seen".to_string(), "todo".to_string()];
        let back: Vec<String> = atoms_to_flags(&atoms).iter().map(flag_to_string).collect();
        assert_eq!(back, atoms);
    }
}
