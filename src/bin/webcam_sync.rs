use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::Parser;
use log::info;
use webcam_sync::{
    Config, DropboxClient, SyncOptions, Syncer,
    auth::{ConsoleProvisioner, ensure_authorized},
};

/// Rename, download and expire webcam images in a Dropbox folder
#[derive(Parser)]
#[clap(name = "webcam-sync", version)]
struct Cli {
    /// Credential file
    #[clap(short, long, default_value = "/usr/local/etc/webcam_db.toml")]
    config: PathBuf,

    /// Directory to download new images to
    #[clap(short, long, default_value = "/tmp/webcam")]
    dir: PathBuf,

    /// Dropbox folder the webcam uploads to
    #[clap(short = 'f', long, default_value = "/Apps/Ninja Blocks/")]
    dropbox_folder: String,

    /// Seconds between runs
    #[clap(short, long, default_value_t = 30)]
    interval: u64,

    /// Upper bound in seconds of the pause after repeated connection trouble
    #[clap(long, default_value_t = 900)]
    max_backoff: u64,

    /// Days before images are deleted from the Dropbox folder
    #[clap(long, default_value_t = 7)]
    expiry: u32,

    /// Delete images older than `--expiry` days from the Dropbox folder
    #[clap(long)]
    delete: bool,

    /// Print what would be done without doing it
    #[clap(short = 'n', long)]
    dry_run: bool,

    /// Do a single run instead of looping forever
    #[clap(long)]
    one_run: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    info!("Starting webcam sync of '{}'", cli.dropbox_folder);

    let mut config = Config::try_load(&cli.config)?;
    ensure_authorized(&cli.config, &mut config, &ConsoleProvisioner)?;

    let client = DropboxClient::new(&config.general)?;
    let options = SyncOptions {
        remote_folder: cli.dropbox_folder,
        archive_dir: cli.dir,
        interval: Duration::from_secs(cli.interval),
        max_backoff: Duration::from_secs(cli.max_backoff),
        expiry_days: cli.expiry,
        delete: cli.delete,
        dry_run: cli.dry_run,
        one_run: cli.one_run,
    };

    Syncer::new(client, options).run()?;

    Ok(())
}
