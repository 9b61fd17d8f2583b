//! Remote storage seam
//!
//! The sync loop only needs five things from a storage service: a listing
//! with a change fingerprint, move, download and delete. [RemoteStorage]
//! captures those so the loop can run against Dropbox or an in-memory fake.

use std::{
    fmt,
    hash::{DefaultHasher, Hash, Hasher as _},
};

use reqwest::StatusCode;
use thiserror::Error;

/// Errors reported by a [RemoteStorage]
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("{path} not found")]
    NotFound { path: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("malformed api response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// How the sync loop reacts to a [RemoteError]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The entry disappeared between listing and acting on it
    Vanished,
    /// Connectivity or server trouble, worth another try later
    Transient,
    /// Anything else
    Fatal,
}

impl RemoteError {
    pub fn class(&self) -> ErrorClass {
        match self {
            RemoteError::NotFound { .. } => ErrorClass::Vanished,
            RemoteError::Api { status, .. } => classify_status(*status),
            RemoteError::Request(e) => match e.status() {
                Some(status) => classify_status(status),
                // Sending failed or the connection dropped mid-exchange.
                None if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() => {
                    ErrorClass::Transient
                }
                None => ErrorClass::Fatal,
            },
            RemoteError::Url(_) | RemoteError::Decode(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_vanished(&self) -> bool {
        self.class() == ErrorClass::Vanished
    }
}

fn classify_status(status: StatusCode) -> ErrorClass {
    if status == StatusCode::NOT_FOUND {
        ErrorClass::Vanished
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS
        )
    {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}

/// Opaque version token of a remote folder's content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Fingerprint derived from a listing's per-entry state.
    ///
    /// Entries are hashed in the given order, so callers must pass them in a
    /// stable order.
    pub fn from_entries<H: Hash>(entries: impl IntoIterator<Item = H>) -> Self {
        let mut hasher = DefaultHasher::new();
        for entry in entries {
            entry.hash(&mut hasher);
        }
        Self(format!("{:016x}", hasher.finish()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Row of a folder listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    pub is_dir: bool,
}

/// Folder listing together with its fingerprint
#[derive(Debug, Clone)]
pub struct FolderSnapshot {
    pub fingerprint: Fingerprint,
    pub entries: Vec<RemoteFile>,
}

impl FolderSnapshot {
    /// Names of the entries which are not directories
    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| !e.is_dir)
            .map(|e| e.name.as_str())
    }
}

/// Blocking access to a remote storage service
pub trait RemoteStorage {
    /// List `folder` and compute its fingerprint
    fn snapshot(&self, folder: &str) -> Result<FolderSnapshot, RemoteError>;

    /// Move the entry at `from` to `to`
    fn move_file(&self, from: &str, to: &str) -> Result<(), RemoteError>;

    /// Fetch the content of the entry at `path`
    fn download(&self, path: &str) -> Result<Vec<u8>, RemoteError>;

    /// Delete the entry at `path`
    fn delete(&self, path: &str) -> Result<(), RemoteError>;
}

/// Join a remote folder and an entry name with a single `/`
pub fn remote_path(folder: &str, name: &str) -> String {
    format!("{}/{}", folder.trim_end_matches('/'), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_remote_paths() {
        assert_eq!(remote_path("/Apps/Cam/", "a.jpg"), "/Apps/Cam/a.jpg");
        assert_eq!(remote_path("/Apps/Cam", "a.jpg"), "/Apps/Cam/a.jpg");
        assert_eq!(remote_path("", "a.jpg"), "/a.jpg");
    }

    #[test]
    fn classifies_api_status() {
        let api = |status| RemoteError::Api {
            status,
            body: String::new(),
        };
        assert_eq!(api(StatusCode::NOT_FOUND).class(), ErrorClass::Vanished);
        assert_eq!(
            api(StatusCode::INTERNAL_SERVER_ERROR).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            api(StatusCode::SERVICE_UNAVAILABLE).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            api(StatusCode::TOO_MANY_REQUESTS).class(),
            ErrorClass::Transient
        );
        assert_eq!(api(StatusCode::UNAUTHORIZED).class(), ErrorClass::Fatal);
        assert_eq!(api(StatusCode::BAD_REQUEST).class(), ErrorClass::Fatal);
    }

    #[test]
    fn not_found_is_vanished() {
        let err = RemoteError::NotFound {
            path: "/a.jpg".into(),
        };
        assert!(err.is_vanished());
    }

    #[test]
    fn fingerprint_tracks_entry_changes() {
        let a = Fingerprint::from_entries([("/a.jpg", "rev1"), ("/b.jpg", "rev1")]);
        let same = Fingerprint::from_entries([("/a.jpg", "rev1"), ("/b.jpg", "rev1")]);
        let renamed = Fingerprint::from_entries([("/c.jpg", "rev1"), ("/b.jpg", "rev1")]);
        let removed = Fingerprint::from_entries([("/b.jpg", "rev1")]);

        assert_eq!(a, same);
        assert_ne!(a, renamed);
        assert_ne!(a, removed);
    }

    #[test]
    fn file_names_skip_directories() {
        let snapshot = FolderSnapshot {
            fingerprint: Fingerprint::new("x"),
            entries: vec![
                RemoteFile {
                    name: "a.jpg".into(),
                    is_dir: false,
                },
                RemoteFile {
                    name: "sub".into(),
                    is_dir: true,
                },
            ],
        };
        assert_eq!(snapshot.file_names().collect::<Vec<_>>(), ["a.jpg"]);
    }
}
