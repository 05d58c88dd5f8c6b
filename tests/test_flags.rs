//! Flag translation tests: system flag mapping, the unread marker,
//! ignored tags, and the encode/translate round trip.

mod common;

use common::{sorted, strings};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

use tagsync::flags::{encode_tag_delta, encode_tags, flag_list, translate_flags};

fn tag_set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// translate_flags
// ---------------------------------------------------------------------------

#[test]
fn test_system_flag_mapping() {
    let flags = strings(&[
        "\\Seen",
        "\\Answered",
        "\\Deleted",
        "\\Draft",
        "\\Flagged",
        "todo",
    ]);
    let (tags, seen) = translate_flags(&flags, &[]);
    assert!(seen);
    assert_eq!(tags, tag_set(&["replied", "deleted", "draft", "flagged", "todo"]));
}

#[test]
fn test_unknown_system_flags_dropped() {
    let flags = strings(&["\\Seen", "\\Recent", "\\SomeExtension"]);
    let (tags, seen) = translate_flags(&flags, &[]);
    assert!(seen);
    assert!(tags.is_empty());
}

#[test]
fn test_unread_added_when_not_seen() {
    let (tags, seen) = translate_flags(&strings(&["\\Flagged"]), &[]);
    assert!(!seen);
    assert_eq!(tags, tag_set(&["flagged", "unread"]));

    let (tags, seen) = translate_flags(&[], &[]);
    assert!(!seen);
    assert_eq!(tags, tag_set(&["unread"]));
}

#[test]
fn test_ignored_keywords_dropped() {
    let ignored = strings(&["$MDNSent"]);
    let (tags, seen) = translate_flags(&strings(&["\\Seen", "$MDNSent", "todo"]), &ignored);
    assert!(seen);
    assert_eq!(tags, tag_set(&["todo"]));
}

// ---------------------------------------------------------------------------
// encode_tags / round trip
// ---------------------------------------------------------------------------

#[test]
fn test_encode_tags_inverse_mapping() {
    let flags = encode_tags(&strings(&["replied", "flagged", "todo"]), true, &[]);
    assert_eq!(
        sorted(flags),
        sorted(strings(&["\\Answered", "\\Flagged", "\\Seen", "todo"]))
    );
}

#[test]
fn test_encode_tags_drops_unread_and_ignored() {
    let ignored = strings(&["$MDNSent"]);
    let flags = encode_tags(&strings(&["unread", "$MDNSent", "todo"]), false, &ignored);
    assert_eq!(flags, strings(&["todo"]));
}

#[test]
fn test_translate_encode_round_trip() {
    // translate(encode(T, seen)) == (T, seen) for tags without system
    // flag semantics.
    for seen in [false, true] {
        let mut original = tag_set(&["todo", "replied", "flagged", "work"]);
        if !seen {
            original.insert("unread".to_string());
        }
        let tags: Vec<String> = original.iter().cloned().collect();
        let encoded = encode_tags(&tags, seen, &[]);
        let (back, back_seen) = translate_flags(&encoded, &[]);
        assert_eq!(back, original);
        assert_eq!(back_seen, seen);
    }
}

// ---------------------------------------------------------------------------
// encode_tag_delta
// ---------------------------------------------------------------------------

#[test]
fn test_delta_plain_keywords() {
    let (add, remove) = encode_tag_delta(&strings(&["todo"]), &strings(&["flagged"]), &[]);
    assert_eq!(add, strings(&["todo"]));
    assert_eq!(remove, strings(&["\\Flagged"]));
}

#[test]
fn test_delta_unread_crosses_over() {
    // Adding unread locally clears \Seen on the server.
    let (add, remove) = encode_tag_delta(&strings(&["unread"]), &[], &[]);
    assert!(add.is_empty());
    assert_eq!(remove, strings(&["\\Seen"]));

    // Removing unread locally sets \Seen.
    let (add, remove) = encode_tag_delta(&[], &strings(&["unread"]), &[]);
    assert_eq!(add, strings(&["\\Seen"]));
    assert!(remove.is_empty());
}

#[test]
fn test_delta_never_sends_ignored() {
    let ignored = strings(&["$MDNSent"]);
    let (add, remove) = encode_tag_delta(
        &strings(&["$MDNSent", "todo"]),
        &strings(&["$MDNSent", "old"]),
        &ignored,
    );
    assert_eq!(add, strings(&["todo"]));
    assert_eq!(remove, strings(&["old"]));
}

#[test]
fn test_delta_empty_lists_stay_empty() {
    let (add, remove) = encode_tag_delta(&[], &[], &[]);
    assert!(add.is_empty());
    assert!(remove.is_empty());
}

// ---------------------------------------------------------------------------
// wire formatting
// ---------------------------------------------------------------------------

#[test]
fn test_flag_list_formatting() {
    let atoms = strings(&["\\Seen", "todo", "two words"]);
    assert_eq!(flag_list(&atoms), "\\Seen todo \"two words\"");
}
