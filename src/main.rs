use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;

use tagsync::cli::Cli;
use tagsync::config::Config;
use tagsync::engine::{self, CancelToken};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = Config::load(Path::new("./config.yml"))
        .context("cannot load configuration from ./config.yml")?;

    let cancel = CancelToken::new();
    engine::run(&cfg, cli.full_scan, &cancel)
}
