//! Shared test fixtures and helpers.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Create a temporary maildir root.
pub fn temp_maildir() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().expect("failed to create temp dir");
    let root = tmp.path().to_path_buf();
    (tmp, root)
}

/// Minimal RFC 5322 message bytes.
pub fn message_bytes(message_id: Option<&str>, subject: &str, body: &str) -> Vec<u8> {
    let mut out = String::new();
    if let Some(id) = message_id {
        out.push_str(&format!("Message-ID: <{}>\r\n", id));
    }
    out.push_str("From: Alice <alice@example.com>\r\n");
    out.push_str("To: Bob <bob@example.com>\r\n");
    out.push_str("Date: Mon, 10 Feb 2025 10:00:00 +0000\r\n");
    out.push_str(&format!("Subject: {}\r\n", subject));
    out.push_str("\r\n");
    out.push_str(body);
    out.into_bytes()
}

/// Multipart message with an attachment part.
pub fn message_with_attachment(message_id: &str) -> Vec<u8> {
    format!(
        "Message-ID: <{}>\r\n\
         From: Alice <alice@example.com>\r\n\
         Subject: report attached\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/mixed; boundary=\"sep\"\r\n\
         \r\n\
         --sep\r\n\
         Content-Type: text/plain\r\n\
         \r\n\
         See attachment.\r\n\
         --sep\r\n\
         Content-Type: application/pdf\r\n\
         Content-Disposition: attachment; filename=\"report.pdf\"\r\n\
         \r\n\
         %PDF-1.4 fake\r\n\
         --sep--\r\n",
        message_id
    )
    .into_bytes()
}

/// Write message bytes into `<mailbox>/<folder>/cur/<name>`.
pub fn write_cur_file(mailbox_dir: &Path, folder: &str, name: &str, data: &[u8]) -> PathBuf {
    let cur = mailbox_dir.join(folder).join("cur");
    std::fs::create_dir_all(&cur).unwrap();
    let path = cur.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn sorted(mut items: Vec<String>) -> Vec<String> {
    items.sort();
    items
}
