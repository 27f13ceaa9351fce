use std::fmt;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TagError {
    #[error("empty commit id")]
    Empty,
    #[error("commit id is not hexadecimal: {0}")]
    NotHex(String),
    #[error("commit id has invalid length {len}: {id}")]
    Length { id: String, len: usize },
}

/// Image tag derived from a source commit.
///
/// The tag is the commit id itself (lower-cased), so every pushed image maps back to exactly one commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactTag(String);

impl ArtifactTag {
    const MIN_LEN: usize = 4;
    const MAX_LEN: usize = 64;

    pub fn from_commit(commit: &str) -> Result<Self, TagError> {
        let id = commit.trim();
        if id.is_empty() {
            return Err(TagError::Empty);
        }
        if !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(TagError::NotHex(id.to_string()));
        }
        if !(Self::MIN_LEN..=Self::MAX_LEN).contains(&id.len()) {
            return Err(TagError::Length {
                id: id.to_string(),
                len: id.len(),
            });
        }
        Ok(Self(id.to_ascii_lowercase()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ArtifactTag {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
