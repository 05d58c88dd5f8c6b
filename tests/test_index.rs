//! Index facade tests: message registration, duplicate signalling,
//! derived tags, tag mutation, and writer transaction discipline.

mod common;

use common::{message_bytes, message_with_attachment, temp_maildir, write_cur_file};
use pretty_assertions::assert_eq;

use tagsync::index::{AddOutcome, IndexStore, INDEX_FILE};

// ---------------------------------------------------------------------------
// add_message
// ---------------------------------------------------------------------------

#[test]
fn test_add_message_extracts_message_id() {
    let (_tmp, root) = temp_maildir();
    let index = IndexStore::open(&root).unwrap();
    let path = write_cur_file(
        &root.join("acct"),
        "INBOX",
        "msg1",
        &message_bytes(Some("m1@example.com"), "hello", "body"),
    );

    let outcome = index.with_writer(|w| w.add_message(&path)).unwrap();
    assert_eq!(
        outcome,
        AddOutcome::Added {
            message_id: "m1@example.com".to_string()
        }
    );
    assert!(root.join(INDEX_FILE).exists());
}

#[test]
fn test_add_message_synthesizes_missing_id() {
    let (_tmp, root) = temp_maildir();
    let index = IndexStore::open(&root).unwrap();
    let path = write_cur_file(
        &root.join("acct"),
        "INBOX",
        "msg1",
        &message_bytes(None, "no id", "body"),
    );

    let outcome = index.with_writer(|w| w.add_message(&path)).unwrap();
    assert!(outcome.message_id().starts_with("generated-"));
    // 32 hex digits of content hash after the prefix
    assert_eq!(outcome.message_id().len(), "generated-".len() + 32);
}

#[test]
fn test_duplicate_is_success_not_error() {
    let (_tmp, root) = temp_maildir();
    let index = IndexStore::open(&root).unwrap();
    let mailbox = root.join("acct");
    let data = message_bytes(Some("m1@example.com"), "hello", "body");
    let first = write_cur_file(&mailbox, "INBOX", "msg1", &data);
    let second = write_cur_file(&mailbox, "Archive", "msg1-copy", &data);

    let outcome = index.with_writer(|w| w.add_message(&first)).unwrap();
    assert!(!outcome.is_duplicate());

    let outcome = index.with_writer(|w| w.add_message(&second)).unwrap();
    assert_eq!(
        outcome,
        AddOutcome::Duplicate {
            message_id: "m1@example.com".to_string()
        }
    );

    // The canonical copy stays authoritative: only the first filename
    // is registered.
    index
        .with_reader(|r| {
            assert_eq!(r.find_by_message_id("m1@example.com")?, Some(first.clone()));
            assert_eq!(r.find_by_filename(&first)?, Some("m1@example.com".to_string()));
            assert_eq!(r.find_by_filename(&second)?, None);
            Ok(())
        })
        .unwrap();
}

// ---------------------------------------------------------------------------
// Derived tags
// ---------------------------------------------------------------------------

#[test]
fn test_attachment_tag_derived_and_filtered() {
    let (_tmp, root) = temp_maildir();
    let index = IndexStore::open(&root).unwrap();
    let path = write_cur_file(
        &root.join("acct"),
        "INBOX",
        "msg1",
        &message_with_attachment("m1@example.com"),
    );

    index.with_writer(|w| w.add_message(&path)).unwrap();

    index
        .with_reader(|r| {
            // Invisible to sync reads...
            assert!(r.message_tags("m1@example.com")?.is_empty());
            // ...but present in the raw tag enumeration.
            assert!(r.all_tags()?.contains(&"attachment".to_string()));
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_derived_tags_immune_to_mutation() {
    let (_tmp, root) = temp_maildir();
    let index = IndexStore::open(&root).unwrap();
    let path = write_cur_file(
        &root.join("acct"),
        "INBOX",
        "msg1",
        &message_with_attachment("m1@example.com"),
    );
    index.with_writer(|w| w.add_message(&path)).unwrap();

    index
        .with_writer(|w| {
            w.remove_tag("m1@example.com", "attachment")?;
            w.add_tag("m1@example.com", "signed")
        })
        .unwrap();

    index
        .with_reader(|r| {
            let all = r.all_tags()?;
            assert!(all.contains(&"attachment".to_string()));
            assert!(!all.contains(&"signed".to_string()));
            Ok(())
        })
        .unwrap();
}

// ---------------------------------------------------------------------------
// Tag mutation
// ---------------------------------------------------------------------------

#[test]
fn test_add_and_remove_tags() {
    let (_tmp, root) = temp_maildir();
    let index = IndexStore::open(&root).unwrap();
    let path = write_cur_file(
        &root.join("acct"),
        "INBOX",
        "msg1",
        &message_bytes(Some("m1@example.com"), "hello", "body"),
    );

    index
        .with_writer(|w| {
            w.add_message(&path)?;
            w.add_tag("m1@example.com", "todo")?;
            w.add_tag("m1@example.com", "unread")?;
            w.add_tag("m1@example.com", "todo") // second add is a no-op
        })
        .unwrap();

    index
        .with_reader(|r| {
            assert_eq!(r.message_tags("m1@example.com")?, vec!["todo", "unread"]);
            Ok(())
        })
        .unwrap();

    index
        .with_writer(|w| w.remove_tag("m1@example.com", "unread"))
        .unwrap();

    index
        .with_reader(|r| {
            assert_eq!(r.message_tags("m1@example.com")?, vec!["todo"]);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_tagging_unknown_message_fails() {
    let (_tmp, root) = temp_maildir();
    let index = IndexStore::open(&root).unwrap();

    let err = index
        .with_writer(|w| w.add_tag("missing@example.com", "todo"))
        .unwrap_err();
    assert!(err.to_string().contains("not in the index"));
}

// ---------------------------------------------------------------------------
// Session discipline
// ---------------------------------------------------------------------------

#[test]
fn test_writer_rolls_back_on_error() {
    let (_tmp, root) = temp_maildir();
    let index = IndexStore::open(&root).unwrap();
    let path = write_cur_file(
        &root.join("acct"),
        "INBOX",
        "msg1",
        &message_bytes(Some("m1@example.com"), "hello", "body"),
    );

    let result: anyhow::Result<()> = index.with_writer(|w| {
        w.add_message(&path)?;
        anyhow::bail!("boom");
    });
    assert!(result.is_err());

    // The failed session left nothing behind.
    index
        .with_reader(|r| {
            assert_eq!(r.find_by_message_id("m1@example.com")?, None);
            Ok(())
        })
        .unwrap();
}

#[test]
fn test_reader_after_writer_sees_committed_state() {
    let (_tmp, root) = temp_maildir();
    let index = IndexStore::open(&root).unwrap();
    let path = write_cur_file(
        &root.join("acct"),
        "INBOX",
        "msg1",
        &message_bytes(Some("m1@example.com"), "hello", "body"),
    );

    index
        .with_writer(|w| {
            w.add_message(&path)?;
            w.add_tag("m1@example.com", "todo")
        })
        .unwrap();

    let tags = index
        .with_reader(|r| r.message_tags("m1@example.com"))
        .unwrap();
    assert_eq!(tags, vec!["todo"]);
}

#[test]
fn test_reopen_preserves_index() {
    let (_tmp, root) = temp_maildir();
    {
        let index = IndexStore::open(&root).unwrap();
        let path = write_cur_file(
            &root.join("acct"),
            "INBOX",
            "msg1",
            &message_bytes(Some("m1@example.com"), "hello", "body"),
        );
        index.with_writer(|w| w.add_message(&path)).unwrap();
    }

    let index = IndexStore::open(&root).unwrap();
    index
        .with_reader(|r| {
            assert!(r.find_by_message_id("m1@example.com")?.is_some());
            Ok(())
        })
        .unwrap();
}
