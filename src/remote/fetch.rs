//! Pull new messages and remote flag changes into the maildir.

use anyhow::{bail, Result};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::mpsc;
use std::thread;

use crate::engine::CancelToken;
use crate::flags::{self, TagOp};
use crate::index::IndexStore;
use crate::maildir;
use crate::syncdb::{MessageInfo, SyncDb, UidEntry};

use super::{flag_to_string, Handler, ProtocolError};

/// UID range covering everything after `last_seen`.
///
/// The upper bound is spelled out because `<uid>:*` returns at least
/// one message even when nothing newer exists.
pub(crate) fn uid_range_after(last_seen: u32) -> String {
    format!("{}:{}", last_seen.saturating_add(1), u32::MAX)
}

/// Flags of one server message, converted to owned data on the read
/// worker before crossing the channel.
struct FetchedFlags {
    uid: Option<u32>,
    flags: Vec<String>,
}

enum Intent {
    /// Unknown message, download the body.
    Body { uid: u32 },
    /// Known message whose server flags drifted from the synced set.
    FlagDelta { info: MessageInfo },
}

impl Handler {
    /// Check every synced folder for new messages and flag drift.
    ///
    /// A failing folder is reported and skipped; its cursor is left
    /// untouched so the next run retries the same window. Returns the
    /// number of folders that failed.
    pub fn check_messages(
        &mut self,
        syncdb: &SyncDb,
        index: &IndexStore,
        cancel: &CancelToken,
        full_scan: bool,
    ) -> Result<usize> {
        let folders = self.list_folders()?;
        let mut failures = 0;

        for folder in folders {
            cancel.check()?;
            let folder_dir = self.mailbox_dir.join(&folder);
            let result = maildir::create_mail_dir(&folder_dir)
                .and_then(|_| self.fetch_new_in_folder(syncdb, index, cancel, &folder, full_scan));
            match result {
                Ok(()) => self.save_uid_state()?,
                Err(err) => {
                    eprintln!("  cannot check folder {}: {:#}", folder, err);
                    failures += 1;
                }
            }
        }
        Ok(failures)
    }

    fn fetch_new_in_folder(
        &mut self,
        syncdb: &SyncDb,
        index: &IndexStore,
        cancel: &CancelToken,
        folder: &str,
        full_scan: bool,
    ) -> Result<()> {
        let mbox = self.session.select(folder)?;
        let uid_validity = mbox.uid_validity.ok_or_else(|| {
            ProtocolError::Violation(format!("no UIDVALIDITY reported for {}", folder))
        })?;
        if mbox.exists == 0 {
            return Ok(());
        }

        let start = if full_scan {
            0
        } else {
            self.uid_state.get(folder)
        };

        let mut intents: Vec<Intent> = Vec::new();
        let mut high_water = start;
        {
            let cfg = &self.cfg;
            let session = &mut self.session;
            let range = uid_range_after(start);
            // The wire read runs on its own worker so a slow server
            // does not stall database work; the bounded channel keeps
            // memory flat on large folders.
            let (tx, rx) = mpsc::sync_channel::<FetchedFlags>(100);
            let (done_tx, done_rx) = mpsc::sync_channel::<Result<()>>(1);

            thread::scope(|scope| -> Result<()> {
                scope.spawn(move || {
                    let result = (|| -> Result<()> {
                        let fetches = session.uid_fetch(&range, "(UID FLAGS)")?;
                        for fetch in fetches.iter() {
                            let item = FetchedFlags {
                                uid: fetch.uid,
                                flags: fetch.flags().iter().map(flag_to_string).collect(),
                            };
                            if tx.send(item).is_err() {
                                break;
                            }
                        }
                        Ok(())
                    })();
                    let _ = done_tx.send(result);
                });

                for item in rx {
                    let uid = match item.uid {
                        Some(uid) if uid != 0 => uid,
                        _ => {
                            return Err(ProtocolError::Violation(
                                "server returned a message without a UID".to_string(),
                            )
                            .into())
                        }
                    };
                    if uid > high_water {
                        high_water = uid;
                    }

                    let (tags, mut seen) = flags::translate_flags(&item.flags, &cfg.ignored_tags);
                    let wanted: Vec<String> = tags.into_iter().collect();

                    if seen {
                        // The server sets \Seen on download, so a seen
                        // message has usually been handled by some sync
                        // client already; only its flags may differ.
                        let info =
                            syncdb.check_tags_by_uid(cancel, folder, uid_validity, uid, &wanted)?;
                        if info.created {
                            seen = false;
                        } else if !info.has_changes() {
                            continue;
                        }
                        if seen && !info.message_id.is_empty() {
                            intents.push(Intent::FlagDelta { info });
                            continue;
                        }
                    }
                    intents.push(Intent::Body { uid });
                }

                match done_rx.recv() {
                    Ok(result) => result,
                    Err(_) => bail!("fetch worker exited without reporting status"),
                }
            })?;
        }

        if !intents.is_empty() {
            println!("  {}: processing {} message(s)", folder, intents.len());
        }

        let folder_dir = self.mailbox_dir.join(folder);
        for intent in intents {
            cancel.check()?;
            match intent {
                Intent::Body { uid } => {
                    self.get_message(syncdb, index, folder, &folder_dir, uid_validity, uid)?
                }
                Intent::FlagDelta { info } => {
                    index.with_writer(|writer| {
                        for tag in &info.added_tags {
                            writer.add_tag(&info.message_id, tag)?;
                        }
                        for tag in &info.removed_tags {
                            writer.remove_tag(&info.message_id, tag)?;
                        }
                        Ok(())
                    })?;
                    syncdb.add_message_sync_info(&info, &info.wanted_tags)?;
                }
            }
        }

        self.set_last_seen_uid(folder, high_water);
        Ok(())
    }

    /// Download one message body, place it into the maildir, and
    /// register it with the index and the sync database.
    fn get_message(
        &mut self,
        syncdb: &SyncDb,
        index: &IndexStore,
        folder: &str,
        folder_dir: &Path,
        uid_validity: u32,
        uid: u32,
    ) -> Result<()> {
        // BODY.PEEK so the download itself does not set \Seen.
        let fetches = self
            .session
            .uid_fetch(&uid.to_string(), "(BODY.PEEK[] FLAGS)")?;
        let fetch = fetches.iter().next().ok_or_else(|| {
            ProtocolError::Violation(format!("server did not return message {}", uid))
        })?;
        let body = fetch.body().ok_or_else(|| {
            ProtocolError::Violation(format!("server did not return a body for message {}", uid))
        })?;
        let raw_flags: Vec<String> = fetch.flags().iter().map(flag_to_string).collect();

        let path = maildir::write_message(folder_dir, uid, body)?;

        let (tags, _seen) = flags::translate_flags(&raw_flags, &self.cfg.ignored_tags);
        let server_tags: Vec<String> = tags.iter().cloned().collect();
        let mut result_tags: BTreeSet<String> = tags;

        let cfg = &self.cfg;
        let (message_id, duplicate) = index.with_writer(|writer| {
            let outcome = writer.add_message(&path)?;
            let message_id = outcome.message_id().to_string();
            if outcome.is_duplicate() {
                // Another copy of this message is already indexed and
                // its tags stay authoritative.
                return Ok((message_id, true));
            }
            for tag in &server_tags {
                writer.add_tag(&message_id, tag)?;
            }
            if let Some(extra) = cfg.folder_tags.get(folder) {
                for op in flags::apply_folder_tags(&mut result_tags, extra) {
                    match op {
                        TagOp::Add(tag) => writer.add_tag(&message_id, &tag)?,
                        TagOp::Remove(tag) => writer.remove_tag(&message_id, &tag)?,
                    }
                }
            }
            Ok((message_id, false))
        })?;

        let info = MessageInfo {
            message_id,
            uids: vec![UidEntry {
                folder: folder.to_string(),
                uid_validity,
                uid,
            }],
            ..Default::default()
        };
        let final_tags: Vec<String> = if duplicate {
            server_tags
        } else {
            result_tags.into_iter().collect()
        };
        syncdb.add_message_sync_info(&info, &final_tags)
    }
}

#[cfg(test)]
mod tests {
    use super::uid_range_after;

    #[test]
    fn test_uid_range_spells_out_upper_bound() {
        assert_eq!(uid_range_after(0), "1:4294967295");
        assert_eq!(uid_range_after(7), "8:4294967295");
        assert!(!uid_range_after(7).contains('*'));
    }

    #[test]
    fn test_uid_range_saturates() {
        assert_eq!(uid_range_after(u32::MAX), "4294967295:4294967295");
    }
}
