//! One full synchronization run: push local tag changes to the server,
//! then pull new messages and remote flag changes, per configured
//! mailbox.
//!
//! The order matters. Pushing first means a tag removed locally is not
//! immediately re-applied by a pull of server state that does not yet
//! reflect the removal.

use anyhow::{anyhow, bail, Result};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, SyncSender};
use std::sync::Arc;
use std::thread;

use crate::config::{self, Config};
use crate::index::IndexStore;
use crate::remote::Handler;
use crate::syncdb::{SyncDb, Update};

/// Cooperative cancellation signal, checked between folders and
/// between per-message intents.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Error when cancelled, for use at operation boundaries.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            bail!("sync cancelled");
        }
        Ok(())
    }
}

/// Run one sync across all configured mailboxes.
///
/// A failing mailbox or folder is reported and skipped; the run
/// finishes the rest and then exits non-zero.
pub fn run(cfg: &Config, full_scan: bool, cancel: &CancelToken) -> Result<()> {
    cfg.validate()?;

    let maildir_root = cfg.maildir_path();
    create_dir_0700(&maildir_root)?;

    let syncdb = SyncDb::open(&maildir_root)?;
    let index = IndexStore::open(&maildir_root)?;

    let mut names: Vec<&String> = cfg.mailboxes.keys().collect();
    names.sort();

    let mut failures = 0usize;
    for name in names {
        cancel.check()?;
        let mailbox_cfg = &cfg.mailboxes[name];
        println!("=== Mailbox: {} ({}) ===", name, mailbox_cfg.username);
        match sync_mailbox(&syncdb, &index, cancel, name, mailbox_cfg, &maildir_root, full_scan) {
            Ok(mailbox_failures) => failures += mailbox_failures,
            Err(err) => {
                eprintln!("{}: {:#}", name, err);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} folder(s) or mailbox(es) did not sync cleanly", failures);
    }
    println!("Sync complete.");
    Ok(())
}

fn sync_mailbox(
    syncdb: &SyncDb,
    index: &IndexStore,
    cancel: &CancelToken,
    name: &str,
    mailbox_cfg: &config::Mailbox,
    maildir_root: &Path,
    full_scan: bool,
) -> Result<usize> {
    let mailbox_dir = maildir_root.join(name);
    create_dir_0700(&mailbox_dir)?;

    println!(
        "  connecting to {}:{} as {}",
        mailbox_cfg.server,
        mailbox_cfg.effective_port(),
        mailbox_cfg.username
    );
    let mut handler = Handler::connect(&mailbox_dir, mailbox_cfg)?;
    let mut failures = 0usize;

    // Push phase: the local scan runs on its own thread and feeds a
    // bounded queue that is drained against the server.
    let (tx, rx) = mpsc::sync_channel::<Update>(100);
    let scan_dir = mailbox_dir.clone();
    let scan_result: Result<()> = thread::scope(|scope| {
        let scan = scope
            .spawn(move || scan_local_folders(syncdb, index, cancel, mailbox_cfg, &scan_dir, tx));

        let mut pushed = 0usize;
        for update in rx {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(err) = handler.push(syncdb, &update) {
                eprintln!("  cannot update message on server: {:#}", err);
                failures += 1;
                continue;
            }
            pushed += 1;
        }
        if pushed > 0 {
            println!("  updating server flags: {} update(s)", pushed);
        }

        match scan.join() {
            Ok(result) => result,
            Err(_) => Err(anyhow!("local scan thread panicked")),
        }
    });
    if let Err(err) = scan_result {
        eprintln!("  cannot check local folders for tag changes: {:#}", err);
        failures += 1;
    }
    cancel.check()?;

    // Pull phase.
    failures += handler.check_messages(syncdb, index, cancel, full_scan)?;

    handler.close()?;
    Ok(failures)
}

/// Walk the mailbox directory and queue an update intent for every
/// message whose local tags differ from the last synchronized set.
pub fn scan_local_folders(
    syncdb: &SyncDb,
    index: &IndexStore,
    cancel: &CancelToken,
    mailbox_cfg: &config::Mailbox,
    mailbox_dir: &Path,
    tx: SyncSender<Update>,
) -> Result<()> {
    for entry in fs::read_dir(mailbox_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !mailbox_cfg.folder_included(&name) {
            continue;
        }
        scan_folder(syncdb, index, cancel, mailbox_cfg, &entry.path(), &name, &tx)?;
    }
    Ok(())
}

fn scan_folder(
    syncdb: &SyncDb,
    index: &IndexStore,
    cancel: &CancelToken,
    mailbox_cfg: &config::Mailbox,
    folder_dir: &Path,
    folder: &str,
    tx: &SyncSender<Update>,
) -> Result<()> {
    let cur = folder_dir.join("cur");
    if !cur.is_dir() {
        return Ok(());
    }

    index.with_reader(|reader| {
        for entry in fs::read_dir(&cur)? {
            cancel.check()?;
            let path = entry?.path();

            let Some(message_id) = reader.find_by_filename(&path)? else {
                // Not indexed yet; indexing happens elsewhere.
                eprintln!("  {}: not in index, skipping", path.display());
                continue;
            };
            let tags: Vec<String> = reader
                .message_tags(&message_id)?
                .into_iter()
                .filter(|tag| !mailbox_cfg.is_ignored(tag))
                .collect();

            let info = syncdb.check_tags_by_message_id(cancel, folder, &message_id, &tags)?;
            if !info.created && !info.has_changes() {
                continue;
            }
            if tx.send(Update {
                info,
                filename: path,
            })
            .is_err()
            {
                // Consumer went away; stop scanning.
                return Ok(());
            }
        }
        Ok(())
    })
}

fn create_dir_0700(path: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)?;
    Ok(())
}
