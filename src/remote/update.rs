//! Push local tag changes and locally created messages to the server.

use anyhow::Result;

use crate::flags;
use crate::syncdb::{MessageInfo, SyncDb, UidEntry, Update};

use super::{atoms_to_flags, Handler, ProtocolError};

impl Handler {
    /// Apply one queued update: APPEND for locally created messages,
    /// UID STORE flag changes for everything else. The new tag set is
    /// recorded in the sync database once every binding succeeded.
    pub fn push(&mut self, syncdb: &SyncDb, update: &Update) -> Result<()> {
        if update.info.created {
            return self.append_new_message(update);
        }
        if !update.info.has_changes() {
            return Ok(());
        }

        // A message can be bound to several UIDs (copies in other
        // folders); all of them get the same flag delta.
        for binding in &update.info.uids {
            self.store_flags(&update.info, binding)?;
        }

        syncdb.add_message_sync_info(&update.info, &update.info.wanted_tags)
    }

    fn store_flags(&mut self, info: &MessageInfo, binding: &UidEntry) -> Result<()> {
        let mbox = self.session.select(&binding.folder)?;
        let server_validity = mbox.uid_validity.unwrap_or(0);
        if server_validity != binding.uid_validity {
            return Err(ProtocolError::UidValidityMismatch {
                folder: binding.folder.clone(),
                stored: binding.uid_validity,
                server: server_validity,
            }
            .into());
        }

        let (add, remove) =
            flags::encode_tag_delta(&info.added_tags, &info.removed_tags, &self.cfg.ignored_tags);

        if !add.is_empty() {
            let query = format!("+FLAGS.SILENT ({})", flags::flag_list(&add));
            self.session.uid_store(&binding.uid.to_string(), &query)?;
        }
        if !remove.is_empty() {
            let query = format!("-FLAGS.SILENT ({})", flags::flag_list(&remove));
            self.session.uid_store(&binding.uid.to_string(), &query)?;
        }
        Ok(())
    }

    fn append_new_message(&mut self, update: &Update) -> Result<()> {
        if !self.session.supports("UIDPLUS")? {
            return Err(ProtocolError::MissingUidPlus.into());
        }

        let binding = update.info.uids.first().ok_or_else(|| {
            ProtocolError::Violation("new message carries no target folder".to_string())
        })?;
        let folder = binding.folder.clone();

        let body = std::fs::read(&update.filename)?;
        let seen = !update
            .info
            .added_tags
            .iter()
            .any(|tag| tag == flags::TAG_UNREAD);
        let atoms = flags::encode_tags(&update.info.added_tags, seen, &self.cfg.ignored_tags);
        let imap_flags = atoms_to_flags(&atoms);

        self.session.append_with_flags(&folder, &body, &imap_flags)?;

        // The client library does not surface the APPENDUID echo, so
        // the binding stays unrecorded and the next pull matches the
        // message by its Message-ID.
        Ok(())
    }
}
