//! Facade over the message tag index.
//!
//! All reads and writes to the index go through scoped sessions:
//! [`IndexStore::with_reader`] and [`IndexStore::with_writer`] open a
//! handle, run the given closure, and close the handle on every exit
//! path. A writer is exclusive: in-process via the session mutex, and
//! against other processes via the backend's write lock. Reader and
//! writer handles never coexist.
//!
//! The backend is an embedded SQLite database storing message identity
//! (Message-ID plus filename) and tags. The tags `attachment` and
//! `signed` are derived from message content when a message is added;
//! they are invisible to sync reads and immune to tag mutation.

use anyhow::{bail, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const INDEX_FILE: &str = ".tagindexdb";

/// Tags owned by the index; derived from content, never synchronized.
pub const DERIVED_TAGS: &[&str] = &["attachment", "signed"];

const SCHEMA_VERSION: i64 = 1;

/// Result of adding a message file to the index.
///
/// A duplicate Message-ID is a success, not an error: the canonical
/// copy stays authoritative and the caller skips tag application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added { message_id: String },
    Duplicate { message_id: String },
}

impl AddOutcome {
    pub fn message_id(&self) -> &str {
        match self {
            AddOutcome::Added { message_id } | AddOutcome::Duplicate { message_id } => message_id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AddOutcome::Duplicate { .. })
    }
}

pub struct IndexStore {
    path: PathBuf,
    session: Mutex<()>,
}

impl IndexStore {
    /// Open the index inside the maildir root, creating it if missing
    /// and upgrading the schema when needed.
    pub fn open(maildir: &Path) -> Result<IndexStore> {
        let store = IndexStore {
            path: maildir.join(INDEX_FILE),
            session: Mutex::new(()),
        };
        let conn = Connection::open(&store.path)?;
        if needs_upgrade(&conn)? {
            upgrade(&conn)?;
        }
        Ok(store)
    }

    /// Run `f` with a read-only handle. The handle is closed when the
    /// closure returns, successfully or not.
    pub fn with_reader<T>(&self, f: impl FnOnce(&IndexReader) -> Result<T>) -> Result<T> {
        let _session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        f(&IndexReader { conn })
    }

    /// Run `f` with an exclusive read-write handle. Changes are
    /// committed when the closure succeeds and rolled back otherwise.
    pub fn with_writer<T>(&self, f: impl FnOnce(&mut IndexWriter) -> Result<T>) -> Result<T> {
        let _session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("BEGIN IMMEDIATE;")?;
        let mut writer = IndexWriter { conn };
        match f(&mut writer) {
            Ok(value) => {
                writer.conn.execute_batch("COMMIT;")?;
                Ok(value)
            }
            Err(err) => {
                let _ = writer.conn.execute_batch("ROLLBACK;");
                Err(err)
            }
        }
    }
}

fn needs_upgrade(conn: &Connection) -> Result<bool> {
    let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version < SCHEMA_VERSION)
}

fn upgrade(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            messageid TEXT NOT NULL UNIQUE,
            filename TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS tags (
            message_id INTEGER NOT NULL,
            tag TEXT NOT NULL,
            derived INTEGER NOT NULL DEFAULT 0,
            UNIQUE (message_id, tag),
            FOREIGN KEY (message_id) REFERENCES messages(id)
        );
        CREATE INDEX IF NOT EXISTS messages_filename ON messages (filename);
        PRAGMA user_version = 1;",
    )?;
    Ok(())
}

pub struct IndexReader {
    conn: Connection,
}

impl IndexReader {
    /// Message-ID of the message stored under `path`, if indexed.
    pub fn find_by_filename(&self, path: &Path) -> Result<Option<String>> {
        find_by_filename(&self.conn, path)
    }

    /// Filename of the message with this Message-ID, if indexed.
    pub fn find_by_message_id(&self, message_id: &str) -> Result<Option<PathBuf>> {
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT filename FROM messages WHERE messageid = ?1",
                params![message_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(row.map(PathBuf::from))
    }

    /// Tags of a message as seen by the sync, derived tags filtered.
    pub fn message_tags(&self, message_id: &str) -> Result<Vec<String>> {
        message_tags(&self.conn, message_id)
    }

    /// Every tag present in the index, derived ones included.
    pub fn all_tags(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT tag FROM tags ORDER BY tag")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }
}

pub struct IndexWriter {
    conn: Connection,
}

impl IndexWriter {
    /// Add a message file to the index.
    ///
    /// The Message-ID is taken from the headers (stripped of `<>` or
    /// quotes) or synthesized from the content hash when absent. A
    /// Message-ID that is already indexed yields
    /// [`AddOutcome::Duplicate`] and leaves the index untouched.
    pub fn add_message(&mut self, path: &Path) -> Result<AddOutcome> {
        let data = std::fs::read(path)?;
        let parsed = mailparse::parse_mail(&data)?;

        let header_id = parsed
            .headers
            .iter()
            .find(|h| h.get_key_ref().eq_ignore_ascii_case("Message-ID"))
            .map(|h| h.get_value())
            .unwrap_or_default();
        let mut message_id = normalize_message_id(&header_id);
        if message_id.is_empty() {
            message_id = format!("generated-{:x}", md5::compute(&data));
        }

        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM messages WHERE messageid = ?1",
                params![message_id],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(AddOutcome::Duplicate { message_id });
        }

        let filename = path.to_string_lossy();
        self.conn.execute(
            "INSERT INTO messages (messageid, filename) VALUES (?1, ?2)",
            params![message_id, filename.as_ref()],
        )?;
        let row_id = self.conn.last_insert_rowid();

        if has_attachment(&parsed) {
            self.conn.execute(
                "INSERT OR IGNORE INTO tags (message_id, tag, derived) VALUES (?1, 'attachment', 1)",
                params![row_id],
            )?;
        }
        if parsed.ctype.mimetype.eq_ignore_ascii_case("multipart/signed") {
            self.conn.execute(
                "INSERT OR IGNORE INTO tags (message_id, tag, derived) VALUES (?1, 'signed', 1)",
                params![row_id],
            )?;
        }

        Ok(AddOutcome::Added { message_id })
    }

    /// Attach a tag to an indexed message. Derived tag names are
    /// index-owned and silently left alone.
    pub fn add_tag(&mut self, message_id: &str, tag: &str) -> Result<()> {
        if DERIVED_TAGS.contains(&tag) {
            return Ok(());
        }
        let row_id = self.require_message(message_id)?;
        self.conn.execute(
            "INSERT OR IGNORE INTO tags (message_id, tag, derived) VALUES (?1, ?2, 0)",
            params![row_id, tag],
        )?;
        Ok(())
    }

    /// Remove a tag from an indexed message. Derived tags stay.
    pub fn remove_tag(&mut self, message_id: &str, tag: &str) -> Result<()> {
        if DERIVED_TAGS.contains(&tag) {
            return Ok(());
        }
        let row_id = self.require_message(message_id)?;
        self.conn.execute(
            "DELETE FROM tags WHERE message_id = ?1 AND tag = ?2 AND derived = 0",
            params![row_id, tag],
        )?;
        Ok(())
    }

    /// Tags as seen by the sync, derived tags filtered.
    pub fn message_tags(&self, message_id: &str) -> Result<Vec<String>> {
        message_tags(&self.conn, message_id)
    }

    pub fn find_by_filename(&self, path: &Path) -> Result<Option<String>> {
        find_by_filename(&self.conn, path)
    }

    fn require_message(&self, message_id: &str) -> Result<i64> {
        let row: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM messages WHERE messageid = ?1",
                params![message_id],
                |row| row.get(0),
            )
            .optional()?;
        match row {
            Some(id) => Ok(id),
            None => bail!("message {} is not in the index", message_id),
        }
    }
}

/// Strip surrounding `<>` or `"` from a Message-ID header value.
pub fn normalize_message_id(raw: &str) -> String {
    let id = raw.trim();
    let stripped = id
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .or_else(|| id.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .unwrap_or(id);
    stripped.to_string()
}

fn has_attachment(part: &mailparse::ParsedMail) -> bool {
    if part.get_content_disposition().disposition == mailparse::DispositionType::Attachment {
        return true;
    }
    part.subparts.iter().any(has_attachment)
}

fn message_tags(conn: &Connection, message_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT t.tag FROM tags t
         JOIN messages m ON m.id = t.message_id
         WHERE m.messageid = ?1 AND t.derived = 0
         ORDER BY t.tag",
    )?;
    let rows = stmt.query_map(params![message_id], |row| row.get(0))?;
    Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
}

fn find_by_filename(conn: &Connection, path: &Path) -> Result<Option<String>> {
    let filename = path.to_string_lossy();
    let row: Option<String> = conn
        .query_row(
            "SELECT messageid FROM messages WHERE filename = ?1",
            params![filename.as_ref()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_message_id() {
        assert_eq!(normalize_message_id("<abc@example.com>"), "abc@example.com");
        assert_eq!(normalize_message_id("\"abc@example.com\""), "abc@example.com");
        assert_eq!(normalize_message_id("abc@example.com"), "abc@example.com");
        assert_eq!(normalize_message_id(" <abc@example.com> "), "abc@example.com");
        assert_eq!(normalize_message_id(""), "");
    }
}
