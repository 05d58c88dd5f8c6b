//! Maildir tree handling and the per-mailbox UID cursor sidecar.

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

pub const UID_STATE_FILE: &str = ".imap-uids";

// Maildir filenames must be unique within the process; a plain atomic
// counter is enough.
static SEQUENCE: AtomicU64 = AtomicU64::new(1);

static HOSTNAME: Lazy<String> =
    Lazy::new(|| gethostname::gethostname().to_string_lossy().into_owned());

/// Create the maildir subdirectories for one folder, mode 0700.
/// Existing directories are left alone.
pub fn create_mail_dir(folder_dir: &Path) -> Result<()> {
    if folder_dir.exists() && !folder_dir.is_dir() {
        anyhow::bail!("path {} is not a directory", folder_dir.display());
    }
    for sub in ["tmp", "cur", "new"] {
        let dir = folder_dir.join(sub);
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o700);
        }
        builder.create(&dir)?;
    }
    Ok(())
}

fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::SeqCst)
}

/// In-progress filename: `<unix>_<seq>.<pid>.<hostname>,U=<uid>`.
fn tmp_filename(uid: u32) -> String {
    format!(
        "{}_{}.{}.{},U={}",
        chrono::Utc::now().timestamp(),
        next_sequence(),
        std::process::id(),
        &*HOSTNAME,
        uid
    )
}

/// Write a downloaded message body into the folder's maildir.
///
/// The body is written to `tmp/` while being hashed, then renamed into
/// `cur/` with the `,FMD5=<hex>` suffix. Any failure removes the
/// `tmp/` file so no partial message is ever promoted. Returns the
/// final `cur/` path.
pub fn write_message(folder_dir: &Path, uid: u32, body: &[u8]) -> Result<PathBuf> {
    create_mail_dir(folder_dir)?;

    let name = tmp_filename(uid);
    let tmp_path = folder_dir.join("tmp").join(&name);

    let mut hasher = md5::Context::new();
    let write_result = (|| -> std::io::Result<()> {
        let mut fd = fs::File::create(&tmp_path)?;
        fd.write_all(body)?;
        hasher.consume(body);
        fd.sync_all()
    })();
    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }

    let sum = format!("{:x}", hasher.compute());
    let cur_path = folder_dir.join("cur").join(format!("{},FMD5={}", name, sum));
    if let Err(err) = fs::rename(&tmp_path, &cur_path) {
        // Discard the tmp entry rather than leaving a stray duplicate.
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(cur_path)
}

/// Per-folder last-seen UID cursors, persisted as JSON next to the
/// mailbox directory.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UidState {
    #[serde(rename = "LastSeenUID", default)]
    pub last_seen_uid: HashMap<String, u32>,
}

impl UidState {
    pub fn load(mailbox_dir: &Path) -> Result<UidState> {
        let path = mailbox_dir.join(UID_STATE_FILE);
        match fs::read(&path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(UidState::default()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, mailbox_dir: &Path) -> Result<()> {
        let data = serde_json::to_vec(self)?;
        fs::write(mailbox_dir.join(UID_STATE_FILE), data)?;
        Ok(())
    }

    pub fn get(&self, folder: &str) -> u32 {
        self.last_seen_uid.get(folder).copied().unwrap_or(0)
    }

    pub fn set(&mut self, folder: &str, uid: u32) {
        self.last_seen_uid.insert(folder.to_string(), uid);
    }
}
