//! Identity keys and the reference-photo directory layout.

use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extension of reference photos in the image directory.
pub const REFERENCE_EXTENSION: &str = "jpg";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("name is empty")]
    Empty,
    #[error("name {0:?} contains a path separator or control character")]
    InvalidCharacter(String),
}

/// Normalized identity name: trimmed and lowercased.
///
/// Used as the reference photo's file stem and as the first attendance column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Trim surrounding whitespace and lowercase.
    ///
    /// Empty results and names holding `/`, `\\` or a control character are rejected.
    pub fn normalize(raw: &str) -> Result<Self, KeyError> {
        let key = raw.trim().to_lowercase();
        if key.is_empty() {
            return Err(KeyError::Empty);
        }
        if key.contains(['/', '\\']) || key.contains(char::is_control) {
            return Err(KeyError::InvalidCharacter(key));
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of this identity's reference photo, e.g. `alice.jpg`.
    pub fn file_name(&self) -> String {
        format!("{}.{REFERENCE_EXTENSION}", self.0)
    }

    /// Path of this identity's reference photo inside `images_dir`.
    pub fn reference_path(&self, images_dir: &Path) -> PathBuf {
        images_dir.join(self.file_name())
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stem and path of every `*.jpg` file in `images_dir`, sorted by file name.
///
/// A missing directory yields an empty list.
pub fn reference_photos(images_dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let entries = match std::fs::read_dir(images_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut photos = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let Some(stem) = name.strip_suffix(".jpg").filter(|s| !s.is_empty()) else {
            continue;
        };
        photos.push((stem.to_string(), path));
    }
    photos.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(photos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trims_and_lowercases() {
        let key = IdentityKey::normalize("  Alice Smith \n").unwrap();
        assert_eq!(key.as_str(), "alice smith");
        assert_eq!(key.file_name(), "alice smith.jpg");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = IdentityKey::normalize(" BoB ").unwrap();
        let twice = IdentityKey::normalize(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_normalize_rejects_blank() {
        assert_eq!(IdentityKey::normalize("   \t"), Err(KeyError::Empty));
    }

    #[test]
    fn test_normalize_rejects_path_separators() {
        assert!(matches!(IdentityKey::normalize("../etc"), Err(KeyError::InvalidCharacter(_))));
        assert!(matches!(IdentityKey::normalize("a\\b"), Err(KeyError::InvalidCharacter(_))));
    }

    #[test]
    fn test_normalize_rejects_inner_control_characters() {
        for raw in ["a\nb", "Ann\r\nLee", "a\tb", "nul\0byte"] {
            assert!(
                matches!(IdentityKey::normalize(raw), Err(KeyError::InvalidCharacter(_))),
                "{raw:?} accepted"
            );
        }
        // Surrounding whitespace is trimmed, not rejected
        assert_eq!(IdentityKey::normalize("\tbob\n").unwrap().as_str(), "bob");
    }

    #[test]
    fn test_reference_photos_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["carol.jpg", "alice.jpg", "notes.txt", "bob.jpg", "dave.JPG"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("folder.jpg")).unwrap();

        let photos = reference_photos(dir.path()).unwrap();
        let names: Vec<&str> = photos.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_reference_photos_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(reference_photos(&dir.path().join("absent")).unwrap().is_empty());
    }
}
