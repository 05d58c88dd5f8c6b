//! Translate IMAP system flags to local tags and back.
//!
//! The mapping is total in both directions. `unread` never crosses the
//! wire: locally it is a tag, on the server it is the absence of \Seen.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

pub const TAG_UNREAD: &str = "unread";

const FLAG_SEEN: &str = "\\Seen";
const FLAG_ANSWERED: &str = "\\Answered";
const FLAG_DELETED: &str = "\\Deleted";
const FLAG_DRAFT: &str = "\\Draft";
const FLAG_FLAGGED: &str = "\\Flagged";

// IMAP atom-specials; keywords containing any of these must be quoted.
static ATOM_SPECIALS: Lazy<Regex> = Lazy::new(|| Regex::new(r#"[\s(){}%*"\\\]]"#).unwrap());

/// Translate a server flag list into a local tag set and a seen marker.
///
/// System flags map to their tag names, unknown system flags are
/// dropped, ignored keywords are dropped, everything else passes
/// through verbatim. `unread` is added when \Seen is absent.
pub fn translate_flags(flags: &[String], ignored: &[String]) -> (BTreeSet<String>, bool) {
    let mut tags = BTreeSet::new();
    let mut seen = false;

    for flag in flags {
        match flag.as_str() {
            FLAG_SEEN => seen = true,
            FLAG_ANSWERED => {
                tags.insert("replied".to_string());
            }
            FLAG_DELETED => {
                // \Deleted is transient on most servers until EXPUNGE,
                // but it still maps to a visible tag here.
                tags.insert("deleted".to_string());
            }
            FLAG_DRAFT => {
                tags.insert("draft".to_string());
            }
            FLAG_FLAGGED => {
                tags.insert("flagged".to_string());
            }
            other => {
                if other.starts_with('\\') {
                    continue;
                }
                if other.trim().is_empty() || ignored.iter().any(|i| i == other) {
                    continue;
                }
                tags.insert(other.to_string());
            }
        }
    }

    if !seen {
        tags.insert(TAG_UNREAD.to_string());
    }
    (tags, seen)
}

fn encode_tag(tag: &str) -> String {
    match tag {
        "replied" => FLAG_ANSWERED.to_string(),
        "deleted" => FLAG_DELETED.to_string(),
        "draft" => FLAG_DRAFT.to_string(),
        "flagged" => FLAG_FLAGGED.to_string(),
        other => other.to_string(),
    }
}

/// Full flag list for APPEND: the inverse of [`translate_flags`].
///
/// `unread` is not transmitted; \Seen is appended when `seen` is set.
pub fn encode_tags(tags: &[String], seen: bool, ignored: &[String]) -> Vec<String> {
    let mut flags = Vec::with_capacity(tags.len() + 1);
    for tag in tags {
        let tag = tag.trim();
        if tag.is_empty() || tag == TAG_UNREAD || ignored.iter().any(|i| i == tag) {
            continue;
        }
        flags.push(encode_tag(tag));
    }
    if seen {
        flags.push(FLAG_SEEN.to_string());
    }
    flags
}

/// Flag deltas for a pair of UID STORE operations.
///
/// `unread` crosses over: adding it locally clears \Seen on the server,
/// removing it sets \Seen. Ignored tags are never sent.
pub fn encode_tag_delta(
    added: &[String],
    removed: &[String],
    ignored: &[String],
) -> (Vec<String>, Vec<String>) {
    let mut store_add = Vec::new();
    let mut store_remove = Vec::new();

    for tag in added {
        let tag = tag.trim();
        if tag.is_empty() || ignored.iter().any(|i| i == tag) {
            continue;
        }
        if tag == TAG_UNREAD {
            store_remove.push(FLAG_SEEN.to_string());
        } else {
            store_add.push(encode_tag(tag));
        }
    }

    for tag in removed {
        let tag = tag.trim();
        if tag.is_empty() || ignored.iter().any(|i| i == tag) {
            continue;
        }
        if tag == TAG_UNREAD {
            store_add.push(FLAG_SEEN.to_string());
        } else {
            store_remove.push(encode_tag(tag));
        }
    }

    (store_add, store_remove)
}

/// Quote a flag atom for the wire when it contains atom-specials.
/// System flags keep their leading backslash and are never quoted.
pub fn quote_atom(atom: &str) -> String {
    if atom.starts_with('\\') {
        return atom.to_string();
    }
    if !atom.is_empty() && !ATOM_SPECIALS.is_match(atom) {
        return atom.to_string();
    }
    format!("\"{}\"", atom.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Join flag atoms into a parenthesized STORE list.
pub fn flag_list(atoms: &[String]) -> String {
    atoms
        .iter()
        .map(|a| quote_atom(a))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tag mutation derived from a folder_tags config entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagOp {
    Add(String),
    Remove(String),
}

/// Apply a comma-separated folder_tags entry to a tag set.
///
/// `-tag` removes the tag when currently present, anything else is
/// added when absent. Returns the operations actually performed, in
/// order, so the caller can mirror them into the index.
pub fn apply_folder_tags(current: &mut BTreeSet<String>, entries: &str) -> Vec<TagOp> {
    let mut ops = Vec::new();
    for entry in entries.split(',') {
        let entry = entry.trim();
        if let Some(tag) = entry.strip_prefix('-') {
            if current.remove(tag) {
                ops.push(TagOp::Remove(tag.to_string()));
            }
        } else if !entry.is_empty() && current.insert(entry.to_string()) {
            ops.push(TagOp::Add(entry.to_string()));
        }
    }
    ops
}
