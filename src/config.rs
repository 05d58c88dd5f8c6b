//! YAML configuration — maildir location and per-mailbox IMAP accounts.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub maildir: String,
    #[serde(default)]
    pub mailboxes: HashMap<String, Mailbox>,
}

/// Folder selection for one account. A non-empty include list wins over
/// the exclude list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Folders {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Options for one IMAP mailbox to sync against.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Mailbox {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub use_tls: bool,
    #[serde(default)]
    pub use_starttls: bool,
    #[serde(default)]
    pub folders: Folders,

    /// Tags that are never synchronized in either direction.
    /// E.g. Exchange servers tend to hand out $MDNSent.
    #[serde(default)]
    pub ignored_tags: Vec<String>,

    /// Extra tags per folder, comma-separated. Entries prefixed with
    /// "-" are removed instead of added.
    #[serde(default)]
    pub folder_tags: HashMap<String, String>,
}

impl Config {
    /// Load and parse the YAML configuration file.
    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .map_err(|err| anyhow::anyhow!("cannot read config file '{}': {}", path.display(), err))?;
        let cfg: Config = serde_yaml::from_str(&content)
            .map_err(|err| anyhow::anyhow!("cannot parse config file '{}': {}", path.display(), err))?;
        Ok(cfg)
    }

    /// Check required fields for every configured mailbox.
    pub fn validate(&self) -> Result<()> {
        for (name, mailbox) in &self.mailboxes {
            if mailbox.server.is_empty() {
                bail!("mailbox '{}': imap server address not configured", name);
            }
            if mailbox.username.is_empty() {
                bail!("mailbox '{}': imap username not configured", name);
            }
            if mailbox.password.is_empty() {
                bail!("mailbox '{}': imap password not configured", name);
            }
        }
        Ok(())
    }

    /// Resolved maildir root, defaulting to ~/.mail.
    pub fn maildir_path(&self) -> PathBuf {
        let raw = if self.maildir.is_empty() {
            "~/.mail"
        } else {
            self.maildir.as_str()
        };
        expand_path(raw)
    }
}

impl Mailbox {
    /// Port to dial: explicit value, else 993 with implicit TLS, else 143.
    pub fn effective_port(&self) -> u16 {
        if self.port != 0 {
            self.port
        } else if self.use_tls {
            993
        } else {
            143
        }
    }

    /// Whether a folder participates in the sync.
    pub fn folder_included(&self, name: &str) -> bool {
        if !self.folders.include.is_empty() {
            return self.folders.include.iter().any(|f| f == name);
        }
        !self.folders.exclude.iter().any(|f| f == name)
    }

    pub fn is_ignored(&self, tag: &str) -> bool {
        self.ignored_tags.iter().any(|t| t == tag)
    }
}

/// Expand $HOME, ~/ and $VAR/ prefixes and absolutize the result.
pub fn expand_path(input: &str) -> PathBuf {
    let mut path = input.to_string();

    if let Some(rest) = path.strip_prefix("$HOME") {
        path = format!("{}{}", home_dir().display(), rest);
    } else if let Some(rest) = path.strip_prefix("~/") {
        return home_dir().join(rest);
    } else if path == "~" {
        return home_dir();
    }

    if let Some(rest) = path.strip_prefix('$') {
        let (var, tail) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        let value = std::env::var(var).unwrap_or_default();
        path = format!("{}{}", value, tail);
    }

    let p = PathBuf::from(path);
    if p.is_absolute() {
        return p;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(p),
        Err(_) => p,
    }
}

/// Home directory from $HOME, with the Windows fallbacks.
pub fn home_dir() -> PathBuf {
    if let Some(home) = std::env::var_os("HOME") {
        if !home.is_empty() {
            return PathBuf::from(home);
        }
    }
    let drive = std::env::var("HOMEDRIVE").unwrap_or_default();
    let dir = std::env::var("HOMEPATH").unwrap_or_default();
    if !drive.is_empty() || !dir.is_empty() {
        return PathBuf::from(format!("{}{}", drive, dir));
    }
    std::env::var_os("USERPROFILE")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}
