//! Local image archive
//!
//! Downloaded images are stored as `<root>/<YYYY>/<YYYY-MM-DD>/<name>.jpg`.
//! Because year and date directories are zero-padded and image names are
//! canonical, lexical order is chronological order at every level. This lets
//! us find the newest archived image by looking at a handful of directories
//! instead of walking the whole tree.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike as _, NaiveDate, Utc};
use log::debug;
use walkdir::WalkDir;

use crate::naming::canonical_instant;

/// The most recently archived image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestArchived {
    /// Image file name
    pub file_name: String,
    /// Name of the enclosing `YYYY-MM-DD` directory
    pub date_dir: String,
    /// Name of the enclosing `YYYY` directory
    pub year_dir: String,
}

impl LatestArchived {
    /// Creation instant of the archived image.
    ///
    /// Falls back to the start of the date directory's day when the file name
    /// is not canonical.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        canonical_instant(&self.file_name).or_else(|| {
            NaiveDate::parse_from_str(&self.date_dir, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|t| t.and_utc())
        })
    }
}

/// Find the most recently archived image below `root`.
///
/// Returns `None` if `root` is missing or holds no image in any
/// `YYYY/YYYY-MM-DD` directory. Directories which cannot be listed are an
/// error; treating them as empty would re-download the whole folder.
pub fn find_latest(root: &Path) -> Result<Option<LatestArchived>> {
    if !root.exists() {
        debug!("Archive {} does not exist yet", root.display());
        return Ok(None);
    }

    let mut years = child_names(root, true, is_year_name)?;
    if years.is_empty() {
        debug!("No year directories in {}", root.display());
        return Ok(None);
    }
    years.sort_unstable_by(|a, b| b.cmp(a));

    for year_dir in years {
        let year_path = root.join(&year_dir);
        let mut dates = child_names(&year_path, true, is_date_name)?;
        dates.sort_unstable_by(|a, b| b.cmp(a));

        for date_dir in dates {
            let date_path = year_path.join(&date_dir);
            let Some(file_name) = child_names(&date_path, false, is_image_name)?
                .into_iter()
                .max()
            else {
                continue;
            };

            return Ok(Some(LatestArchived {
                file_name,
                date_dir,
                year_dir,
            }));
        }
    }

    Ok(None)
}

/// Archive location of the image `name` created at `instant`
pub fn archive_path(root: &Path, instant: &DateTime<Utc>, name: &str) -> PathBuf {
    root.join(format!("{:04}", instant.year()))
        .join(instant.format("%Y-%m-%d").to_string())
        .join(name)
}

/// Write `bytes` to `path`, creating missing parent directories.
///
/// The data is written to a `.part` sibling first and renamed into place, so
/// an interrupted write never leaves a truncated image behind.
pub fn store(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.is_dir()) {
        debug!("Creating archive directory {}", dir.display());
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create directory {}", dir.display()))?;
    }

    let mut partial = path.as_os_str().to_owned();
    partial.push(".part");
    let partial = PathBuf::from(partial);

    fs::write(&partial, bytes)
        .with_context(|| format!("failed to write {}", partial.display()))?;
    fs::rename(&partial, path)
        .with_context(|| format!("failed to move {} into place", path.display()))?;

    Ok(())
}

/// Names of the immediate children of `dir` that are directories (or files)
/// and satisfy `accept`.
///
/// Links are followed so partitions may live on other disks.
fn child_names(dir: &Path, dirs: bool, accept: fn(&str) -> bool) -> Result<Vec<String>> {
    let mut names = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
        if entry.file_type().is_dir() != dirs {
            continue;
        }
        match entry.file_name().to_str() {
            Some(name) if accept(name) => names.push(name.to_owned()),
            _ => {}
        }
    }

    Ok(names)
}

fn is_year_name(name: &str) -> bool {
    name.len() == 4 && name.bytes().all(|b| b.is_ascii_digit())
}

fn is_date_name(name: &str) -> bool {
    let b = name.as_bytes();
    b.len() == 10
        && b.iter().enumerate().all(|(i, c)| match i {
            4 | 7 => *c == b'-',
            _ => c.is_ascii_digit(),
        })
}

fn is_image_name(name: &str) -> bool {
    name.ends_with(".jpg")
}
