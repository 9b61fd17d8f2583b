//! Webcam image sync
//!
//! Mirrors a Dropbox folder fed by a webcam service into a local archive:
//! uploads are renamed to sortable timestamp names, new images are
//! downloaded into `<dir>/<YYYY>/<YYYY-MM-DD>/` and old images can be pruned
//! from the remote folder.

pub mod archive;
pub mod auth;
pub mod backoff;
pub mod config;
pub mod dropbox;
pub mod naming;
pub mod remote;
pub mod sync;

pub use config::{Config, Credentials};
pub use dropbox::DropboxClient;
pub use remote::{FolderSnapshot, Fingerprint, RemoteError, RemoteFile, RemoteStorage};
pub use sync::{CycleOutcome, Statistics, SyncError, SyncOptions, Syncer};
