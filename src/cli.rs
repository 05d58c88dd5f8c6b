use clap::Parser;

#[derive(Parser)]
#[command(
    name = "tagsync",
    version,
    about = "Synchronize IMAP mailboxes with a tag-indexed local maildir"
)]
pub struct Cli {
    /// Re-examine all messages on the server for flag changes
    #[arg(long)]
    pub full_scan: bool,
}
