//! File, formatting and metadata helpers

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// A directory to create with [`safe_makedirs`]
///
/// Strings are checked exactly as given. Structured paths are made absolute
/// first, so a relative `PathBuf::from("logs")` passes the length checks
/// where the string `"logs"` would not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirTarget {
    /// Plain string, checked as-is
    Str(String),
    /// Structured path, made absolute before checking
    Path(PathBuf),
}

impl From<&str> for DirTarget {
    fn from(s: &str) -> Self {
        DirTarget::Str(s.to_string())
    }
}

impl From<String> for DirTarget {
    fn from(s: String) -> Self {
        DirTarget::Str(s)
    }
}

impl From<&Path> for DirTarget {
    fn from(p: &Path) -> Self {
        DirTarget::Path(p.to_path_buf())
    }
}

impl From<PathBuf> for DirTarget {
    fn from(p: PathBuf) -> Self {
        DirTarget::Path(p)
    }
}

impl From<&PathBuf> for DirTarget {
    fn from(p: &PathBuf) -> Self {
        DirTarget::Path(p.clone())
    }
}

/// Recursively create a directory, refusing suspiciously shallow paths
///
/// Paths shorter than 5 characters or with at most 2 separator-delimited
/// components (`/a`, `C:\a`, `logs`) are rejected with
/// [`Error::InvalidPath`]. Creating a directory that already exists is fine.
pub fn safe_makedirs(target: impl Into<DirTarget>) -> Result<PathBuf> {
    let (shown, path) = match target.into() {
        DirTarget::Str(s) => (s.clone(), PathBuf::from(s)),
        DirTarget::Path(p) => {
            let absolute = if p.is_absolute() {
                p
            } else {
                std::env::current_dir()?.join(p)
            };
            (absolute.display().to_string(), absolute)
        }
    };

    if shown.chars().count() < 5 || shown.split(MAIN_SEPARATOR).count() <= 2 {
        return Err(Error::InvalidPath(shown));
    }
    if path.is_file() {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("Can't create directory if there is a file of the same name: {}", shown),
        )));
    }
    if !path.exists() {
        info!(path = %path.display(), "folder not found, creating");
    }
    fs::create_dir_all(&path)?;
    Ok(path)
}

/// Whether two files have the same content
///
/// Sizes are compared first; with `hash` set, equal-sized files are then
/// compared by SHA-256 digest.
pub fn file_compare(a: impl AsRef<Path>, b: impl AsRef<Path>, hash: bool) -> Result<bool> {
    let (a, b) = (a.as_ref(), b.as_ref());
    debug!(a = %a.display(), b = %b.display(), "comparing files");

    let (size_a, size_b) = (fs::metadata(a)?.len(), fs::metadata(b)?.len());
    if size_a != size_b {
        debug!(size_a, size_b, "files differ in size");
        return Ok(false);
    }
    if !hash {
        return Ok(true);
    }
    let same = file_digest(a)? == file_digest(b)?;
    debug!(same, "compared file digests");
    Ok(same)
}

fn file_digest(path: &Path) -> Result<Vec<u8>> {
    let mut hasher = Sha256::new();
    let mut file = fs::File::open(path)?;
    io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize().to_vec())
}

/// Human readable byte size in powers of 1000 (`10.0 KB`)
pub fn sizeof_fmt(bytes: u64) -> String {
    let mut num = bytes as f64;
    for unit in ["", "K", "M", "G", "T", "P", "E", "Z"] {
        if num.abs() <= 1000.0 {
            return format!("{:.1} {}B", num, unit);
        }
        num /= 1000.0;
    }
    format!("{:.1} YiB", num)
}

/// Human readable duration (`1:40 minutes`, `2 days, 3:46 hours`)
pub fn pretty_duration(seconds: f64) -> String {
    if seconds.is_nan() || seconds < 0.0 {
        return "???".to_string();
    }
    let whole = seconds.floor() as u64;
    let (secs, minutes, hours) = (whole % 60, (whole / 60) % 60, (whole / 3600) % 24);
    if seconds < 60.0 {
        format!("{:.1} seconds", secs as f64)
    } else if seconds < 3600.0 {
        format!("{}:{:02} minutes", minutes, secs)
    } else if seconds < 86400.0 {
        format!("{}:{:02} hours", hours, minutes)
    } else {
        format!("{} days, {}:{:02} hours", whole / 86400, hours, minutes)
    }
}

/// Parse `key=value,key2=value2` into an ordered map
///
/// Keys and values are trimmed; empty ones and repeated keys are errors.
/// An empty string yields an empty map.
pub fn parse_metadata(input: &str) -> Result<IndexMap<String, String>> {
    let fail = |reason: &str| Error::Metadata {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let mut meta = IndexMap::new();
    if input.trim().is_empty() {
        return Ok(meta);
    }
    for pair in input.split(',') {
        let (key, value) = pair.split_once('=').ok_or_else(|| fail("missing '='"))?;
        let (key, value) = (key.trim(), value.trim());
        if key.is_empty() {
            return Err(fail("empty key"));
        }
        if value.is_empty() {
            return Err(fail("empty value"));
        }
        if meta.contains_key(key) {
            return Err(fail("duplicate metadata key"));
        }
        meta.insert(key.to_string(), value.to_string());
    }
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sizeof_fmt() {
        assert_eq!(sizeof_fmt(0), "0.0 B");
        assert_eq!(sizeof_fmt(1000), "1000.0 B");
        assert_eq!(sizeof_fmt(10_000), "10.0 KB");
        assert_eq!(sizeof_fmt(10_000_000), "10.0 MB");
        assert_eq!(sizeof_fmt(1_000_000_000_000), "1000.0 GB");
        assert_eq!(sizeof_fmt(10_000_000_000_000_000_000), "10.0 EB");
    }

    #[test]
    fn test_pretty_duration() {
        assert_eq!(pretty_duration(0.0), "0.0 seconds");
        assert_eq!(pretty_duration(10.0), "10.0 seconds");
        assert_eq!(pretty_duration(100.0), "1:40 minutes");
        assert_eq!(pretty_duration(103.234234), "1:43 minutes");
        assert_eq!(pretty_duration(10_000.0), "2:46 hours");
        assert_eq!(pretty_duration(100_000.0), "1 days, 3:46 hours");
        assert_eq!(pretty_duration(-1.0), "???");
    }

    #[test]
    fn test_parse_metadata() {
        let meta = parse_metadata("key=value, key2 = value2").unwrap();
        assert_eq!(meta.get("key").map(String::as_str), Some("value"));
        assert_eq!(meta.keys().collect::<Vec<_>>(), vec!["key", "key2"]);
        assert!(parse_metadata("").unwrap().is_empty());

        for bad in ["=v", "k=", "k=v,k=w", "novalue"] {
            assert!(matches!(parse_metadata(bad), Err(Error::Metadata { .. })), "{}", bad);
        }
    }

    #[test]
    fn test_safe_makedirs_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("subdir").join("nested");
        let target = nested.to_str().unwrap();
        safe_makedirs(target).unwrap();
        assert!(nested.is_dir());
        safe_makedirs(target).unwrap();
        assert!(nested.is_dir());
    }

    #[test]
    fn test_safe_makedirs_file_conflict() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("conflict_file");
        fs::write(&file, "content").unwrap();
        let err = safe_makedirs(file.as_path()).unwrap_err();
        assert!(err
            .to_string()
            .contains("Can't create directory if there is a file of the same name"));
    }

    #[test]
    fn test_safe_makedirs_rejects_shallow_strings() {
        assert!(matches!(safe_makedirs("log"), Err(Error::InvalidPath(_))));
        assert!(matches!(safe_makedirs("/a"), Err(Error::InvalidPath(_))));
        assert!(matches!(safe_makedirs("/abcdef"), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_file_compare() {
        let tmp = TempDir::new().unwrap();
        let (a, b, c) = (tmp.path().join("a"), tmp.path().join("b"), tmp.path().join("c"));
        fs::write(&a, "same bytes").unwrap();
        fs::write(&b, "same bytes").unwrap();
        fs::write(&c, "diff bytes").unwrap();

        assert!(file_compare(&a, &b, true).unwrap());
        assert!(!file_compare(&a, &c, true).unwrap());
        // same size, so a size-only check cannot tell them apart
        assert!(file_compare(&a, &c, false).unwrap());
        assert!(file_compare(&a, tmp.path().join("missing"), true).is_err());
    }
}
