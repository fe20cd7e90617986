//! Identifiers and access modes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::library::error::{Error, Result};
use crate::storage::tenant_prefix;

/// Identity of a library.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LibraryId(String);

impl LibraryId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::invalid_id(id, "library id is empty"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a location: the file stem of its container.
///
/// Only ASCII letters, digits, `.`, `_` and `-` are allowed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LocationId(String);

impl LocationId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::invalid_id(id, "location id is empty"));
        }
        if id == "." || id == ".." {
            return Err(Error::invalid_id(id, "location id is a relative path"));
        }
        if let Some(c) = id.chars().find(|c| !is_location_char(*c)) {
            let reason = format!("character {:?} not allowed in location id", c);
            return Err(Error::invalid_id(id, reason));
        }
        Ok(Self(id))
    }

    /// Location id a repository gets when the library creates its container.
    pub fn from_repository(id: &RepositoryId) -> Self {
        let id: String = id
            .as_str()
            .chars()
            .map(|c| if is_location_char(c) { c } else { '_' })
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_location_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a repository, normally derived from its clone URL.
///
/// Ids are normalised so that every URL form of one repository maps to the
/// same id:
///
/// ```text
/// https://github.com/src-d/go-git.git  ─┐
/// git@github.com:src-d/go-git.git      ─┼─▶  github.com/src-d/go-git
/// github.com/src-d/go-git              ─┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepositoryId(String);

impl RepositoryId {
    /// Normalise and validate a repository id or URL.
    pub fn new(id: impl AsRef<str>) -> Result<Self> {
        let raw = id.as_ref();
        let normalized = normalize_url(raw);
        if normalized.is_empty() {
            return Err(Error::invalid_id(raw, "repository id is empty"));
        }

        // the id becomes a reference name component in rooted containers
        let head_name = format!("{}HEAD", tenant_prefix(&normalized));
        if !git2::Reference::is_valid_name(&head_name) {
            return Err(Error::invalid_id(raw, "not usable as a reference namespace"));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reduce a clone URL to `host/path`.
///
/// Strips the scheme, user info, trailing slashes and a `.git` suffix, and
/// turns the scp-like `host:path` form into `host/path`.
pub fn normalize_url(url: &str) -> String {
    let url = url.trim();

    let (rest, has_scheme) = match url.split_once("://") {
        Some((_, rest)) => (rest, true),
        None => (url, false),
    };

    let (authority, path) = match rest.find('/') {
        Some(pos) => (&rest[..pos], &rest[pos..]),
        None => (rest, ""),
    };
    let authority = match authority.rsplit_once('@') {
        Some((_, host)) => host,
        None => authority,
    };

    let mut joined = match authority.split_once(':') {
        Some((host, scp_path)) if !has_scheme => format!("{}/{}{}", host, scp_path, path),
        _ => format!("{}{}", authority, path),
    };

    loop {
        let before = joined.len();
        while joined.ends_with('/') {
            joined.pop();
        }
        if let Some(stripped) = joined.strip_suffix(".git") {
            joined.truncate(stripped.len());
        }
        if joined.len() == before {
            break;
        }
    }

    let trimmed = joined.trim_start_matches('/');
    let mut normalized = String::with_capacity(trimmed.len());
    for segment in trimmed.split('/').filter(|s| !s.is_empty()) {
        if !normalized.is_empty() {
            normalized.push('/');
        }
        normalized.push_str(segment);
    }
    normalized
}

/// Access mode of a repository handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    ReadOnly,
    ReadWrite,
}

impl Mode {
    pub fn is_read_only(&self) -> bool {
        matches!(self, Mode::ReadOnly)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::ReadOnly => write!(f, "read-only"),
            Mode::ReadWrite => write!(f, "read-write"),
        }
    }
}
