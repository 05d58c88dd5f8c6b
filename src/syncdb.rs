//! Persistent sync state — the tag set both sides last agreed on, and
//! the server UID bindings for each message.
//!
//! Two tables: `messages` keyed by Message-ID with the comma-joined
//! last-synchronized tag set, and `uids` binding messages to
//! (folder, uidvalidity, uid) locations on the server. The stored tag
//! set is the pivot for the three-way diff between local tags and
//! server flags.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::engine::CancelToken;

pub const SYNCDB_FILE: &str = ".nmsyncdb";

/// A server-side location of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UidEntry {
    pub folder: String,
    pub uid_validity: u32,
    pub uid: u32,
}

/// Identity and tag diff for one message.
///
/// There is no single reliable way to identify a message on the server:
/// every indexed message has a Message-ID, but it may have been
/// generated locally, so the UID bindings are kept alongside it.
#[derive(Debug, Clone, Default)]
pub struct MessageInfo {
    pub message_id: String,
    pub uids: Vec<UidEntry>,
    pub added_tags: Vec<String>,
    pub removed_tags: Vec<String>,
    /// The full tag set the caller asked about; recorded as the new
    /// synchronized state once the update has been applied.
    pub wanted_tags: Vec<String>,
    pub created: bool,
}

impl MessageInfo {
    pub fn has_changes(&self) -> bool {
        !self.added_tags.is_empty() || !self.removed_tags.is_empty()
    }
}

/// A change that should be applied to the IMAP server.
#[derive(Debug, Clone)]
pub struct Update {
    pub info: MessageInfo,
    pub filename: PathBuf,
}

pub struct SyncDb {
    conn: Mutex<Connection>,
}

impl SyncDb {
    /// Open (or create) the sync database inside the maildir root and
    /// apply any missing migrations.
    pub fn open(maildir: &Path) -> Result<SyncDb> {
        let conn = Connection::open(maildir.join(SYNCDB_FILE))?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = SyncDb {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    // Forward-only: statements are applied in order and must stay
    // individually idempotent.
    fn migrate(&self) -> Result<()> {
        let migrations = [
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                messageid VARCHAR(256) NOT NULL UNIQUE,
                tags TEXT NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS uids (
                message_id INTEGER NOT NULL,
                foldername VARCHAR(256) NOT NULL,
                uidvalidity INTEGER NOT NULL,
                uid INTEGER NOT NULL,
                FOREIGN KEY (message_id) REFERENCES messages(id)
            );",
            "CREATE UNIQUE INDEX IF NOT EXISTS uid_unique ON uids (uidvalidity, uid);",
        ];

        let conn = self.lock();
        for migration in migrations {
            conn.execute_batch(migration)?;
        }
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Compare `wanted` against the last-synchronized tag set for a
    /// Message-ID. Unknown ids come back as `created` with a single
    /// UID stub carrying only the folder name, so the caller can
    /// APPEND the message.
    pub fn check_tags_by_message_id(
        &self,
        cancel: &CancelToken,
        folder: &str,
        message_id: &str,
        wanted: &[String],
    ) -> Result<MessageInfo> {
        cancel.check()?;
        let wanted = normalize_tags(wanted);

        let mut info = MessageInfo {
            message_id: message_id.to_string(),
            wanted_tags: wanted.clone(),
            ..Default::default()
        };

        let conn = self.lock();
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT id, tags FROM messages WHERE messageid = ?1",
                params![message_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            None => {
                info.created = true;
                info.added_tags = wanted;
                info.uids = vec![UidEntry {
                    folder: folder.to_string(),
                    ..Default::default()
                }];
            }
            Some((row_id, stored)) => {
                diff_tags(&stored, &wanted, &mut info);
                info.uids = load_uids(&conn, row_id)?;
            }
        }
        Ok(info)
    }

    /// Like [`check_tags_by_message_id`], keyed on the server UID. On a
    /// miss the UID binding is pre-populated.
    ///
    /// [`check_tags_by_message_id`]: SyncDb::check_tags_by_message_id
    pub fn check_tags_by_uid(
        &self,
        cancel: &CancelToken,
        folder: &str,
        uid_validity: u32,
        uid: u32,
        wanted: &[String],
    ) -> Result<MessageInfo> {
        cancel.check()?;
        let wanted = normalize_tags(wanted);

        let mut info = MessageInfo {
            wanted_tags: wanted.clone(),
            ..Default::default()
        };

        let conn = self.lock();
        let row: Option<(i64, String, String)> = conn
            .query_row(
                "SELECT m.id, m.messageid, m.tags FROM messages m
                 JOIN uids u ON u.message_id = m.id
                 WHERE u.uidvalidity = ?1 AND u.uid = ?2",
                params![uid_validity, uid],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            None => {
                info.created = true;
                info.added_tags = wanted;
                info.uids = vec![UidEntry {
                    folder: folder.to_string(),
                    uid_validity,
                    uid,
                }];
            }
            Some((row_id, message_id, stored)) => {
                info.message_id = message_id;
                diff_tags(&stored, &wanted, &mut info);
                info.uids = load_uids(&conn, row_id)?;
            }
        }
        Ok(info)
    }

    /// Record `tags` as the new synchronized state for the message and
    /// register any real UID bindings it carries.
    ///
    /// The upsert and the binding inserts are each idempotent, so a
    /// crash between them converges on the next run.
    pub fn add_message_sync_info(&self, info: &MessageInfo, tags: &[String]) -> Result<()> {
        if info.message_id.is_empty() {
            // No identity to record against; the message will be
            // matched by content on a later run.
            return Ok(());
        }

        let tag_str = normalize_tags(tags).join(",");
        let conn = self.lock();

        conn.execute(
            "INSERT INTO messages (messageid, tags) VALUES (?1, ?2)
             ON CONFLICT(messageid) DO UPDATE SET tags = ?2",
            params![info.message_id, tag_str],
        )?;

        let row_id: i64 = conn.query_row(
            "SELECT id FROM messages WHERE messageid = ?1",
            params![info.message_id],
            |row| row.get(0),
        )?;

        for entry in &info.uids {
            if entry.uid == 0 || entry.uid_validity == 0 {
                continue;
            }
            conn.execute(
                "INSERT OR IGNORE INTO uids (message_id, foldername, uidvalidity, uid)
                 VALUES (?1, ?2, ?3, ?4)",
                params![row_id, entry.folder, entry.uid_validity, entry.uid],
            )?;
        }
        Ok(())
    }
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = tags
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect();
    out.sort();
    out.dedup();
    out
}

fn diff_tags(stored: &str, wanted: &[String], info: &mut MessageInfo) {
    let mut stored_set: std::collections::BTreeSet<&str> = stored
        .split(',')
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();

    for tag in wanted {
        if !stored_set.remove(tag.as_str()) {
            info.added_tags.push(tag.clone());
        }
    }
    info.removed_tags = stored_set.into_iter().map(|t| t.to_string()).collect();
}

fn load_uids(conn: &Connection, row_id: i64) -> Result<Vec<UidEntry>> {
    let mut stmt = conn.prepare(
        "SELECT foldername, uidvalidity, uid FROM uids WHERE message_id = ?1 ORDER BY foldername, uid",
    )?;
    let rows = stmt.query_map(params![row_id], |row| {
        Ok(UidEntry {
            folder: row.get(0)?,
            uid_validity: row.get(1)?,
            uid: row.get(2)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|err| anyhow!(err))
}
