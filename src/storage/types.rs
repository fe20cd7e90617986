//! core value types of the git object model as stored in containers.

use std::collections::BTreeMap;
use std::fmt;

use git2::{ObjectType, Oid};
use serde::{Deserialize, Serialize};

use crate::storage::error::{StorageError, StorageResult};

/// A git object in its raw (uncompressed, headerless) form.
///
/// The object id is the git hash of the kind and data, so two tenants
/// writing the same content end up with the same object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedObject {
    kind: ObjectType,
    data: Vec<u8>,
}

impl EncodedObject {
    pub fn new(kind: ObjectType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    /// Create a blob object
    pub fn blob(data: impl Into<Vec<u8>>) -> Self {
        Self::new(ObjectType::Blob, data)
    }

    pub fn kind(&self) -> ObjectType {
        self.kind
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Git object id of this object
    pub fn id(&self) -> StorageResult<Oid> {
        Ok(Oid::hash_object(self.kind, &self.data)?)
    }

    /// Loose object encoding: `<kind> <size>\0<data>`
    pub(crate) fn encode(&self) -> Vec<u8> {
        let header = format!("{} {}\0", self.kind.str(), self.data.len());
        let mut buf = Vec::with_capacity(header.len() + self.data.len());
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decode the loose object encoding, checking the declared size
    pub(crate) fn decode(id: Oid, bytes: &[u8]) -> StorageResult<Self> {
        let corrupted = |reason: &str| StorageError::CorruptedObject {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        let nul = bytes
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| corrupted("missing header terminator"))?;
        let header =
            std::str::from_utf8(&bytes[..nul]).map_err(|_| corrupted("header is not utf-8"))?;
        let (kind, size) = header
            .split_once(' ')
            .ok_or_else(|| corrupted("malformed header"))?;

        let kind = match ObjectType::from_str(kind) {
            Some(ObjectType::Any) | None => return Err(corrupted("unknown object kind")),
            Some(kind) => kind,
        };
        let size: usize = size.parse().map_err(|_| corrupted("malformed size"))?;

        let data = &bytes[nul + 1..];
        if data.len() != size {
            return Err(corrupted("size does not match header"));
        }

        Ok(Self::new(kind, data))
    }
}

/// Kind of a reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceKind {
    Hash,
    Symbolic,
}

/// A named reference: either a direct hash or a pointer to another reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Hash { name: String, target: Oid },
    Symbolic { name: String, target: String },
}

impl Reference {
    pub fn hash(name: impl Into<String>, target: Oid) -> Self {
        Reference::Hash {
            name: name.into(),
            target,
        }
    }

    pub fn symbolic(name: impl Into<String>, target: impl Into<String>) -> Self {
        Reference::Symbolic {
            name: name.into(),
            target: target.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Reference::Hash { name, .. } | Reference::Symbolic { name, .. } => name,
        }
    }

    pub fn kind(&self) -> ReferenceKind {
        match self {
            Reference::Hash { .. } => ReferenceKind::Hash,
            Reference::Symbolic { .. } => ReferenceKind::Symbolic,
        }
    }

    /// Target id of a hash reference
    pub fn target_id(&self) -> Option<Oid> {
        match self {
            Reference::Hash { target, .. } => Some(*target),
            Reference::Symbolic { .. } => None,
        }
    }

    /// Target name of a symbolic reference
    pub fn symbolic_target(&self) -> Option<&str> {
        match self {
            Reference::Hash { .. } => None,
            Reference::Symbolic { target, .. } => Some(target),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Hash { name, target } => write!(f, "{} {}", target, name),
            Reference::Symbolic { name, target } => write!(f, "ref: {} {}", target, name),
        }
    }
}

/// A configured remote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub name: String,
    pub urls: Vec<String>,
}

impl RemoteConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            urls: vec![url.into()],
        }
    }
}

/// Repository configuration kept inside the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remotes: BTreeMap<String, RemoteConfig>,
}

impl Config {
    /// Get a remote by name
    pub fn remote(&self, name: &str) -> Option<&RemoteConfig> {
        self.remotes.get(name)
    }

    /// Add or replace a remote
    pub fn set_remote(&mut self, remote: RemoteConfig) {
        self.remotes.insert(remote.name.clone(), remote);
    }
}

/// Result of finalizing a write storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The given number of bytes were appended to the base container
    Applied { bytes: u64 },
    /// Nothing was written since the storage was opened
    Empty,
}

impl CommitOutcome {
    pub fn is_empty(&self) -> bool {
        matches!(self, CommitOutcome::Empty)
    }

    /// Bytes appended by the commit
    pub fn bytes(&self) -> u64 {
        match self {
            CommitOutcome::Applied { bytes } => *bytes,
            CommitOutcome::Empty => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_id_matches_git() {
        // `printf hello | git hash-object --stdin`
        let blob = EncodedObject::blob(&b"hello"[..]);
        assert_eq!(
            blob.id().unwrap().to_string(),
            "b6fc4c620b67d95f953a5c1c1230aaab5db5a1b0"
        );
    }

    #[test]
    fn test_object_encoding() {
        let blob = EncodedObject::blob(&b"some content"[..]);
        let encoded = blob.encode();
        assert!(encoded.starts_with(b"blob 12\0"));

        let id = blob.id().unwrap();
        assert_eq!(EncodedObject::decode(id, &encoded).unwrap(), blob);
    }

    #[test]
    fn test_object_decode_rejects_bad_size() {
        let id = Oid::zero();
        let result = EncodedObject::decode(id, b"blob 10\0short");
        assert!(matches!(result, Err(StorageError::CorruptedObject { .. })));

        let result = EncodedObject::decode(id, b"no header");
        assert!(matches!(result, Err(StorageError::CorruptedObject { .. })));
    }

    #[test]
    fn test_reference_accessors() {
        let oid = Oid::from_str("b6fc4c620b67d95f953a5c1c1230aaab5db5a1b0").unwrap();
        let hash = Reference::hash("refs/heads/main", oid);
        assert_eq!(hash.kind(), ReferenceKind::Hash);
        assert_eq!(hash.target_id(), Some(oid));
        assert_eq!(hash.symbolic_target(), None);

        let head = Reference::symbolic("HEAD", "refs/heads/main");
        assert_eq!(head.name(), "HEAD");
        assert_eq!(head.symbolic_target(), Some("refs/heads/main"));
    }

    #[test]
    fn test_config_json() {
        let mut config = Config::default();
        config.set_remote(RemoteConfig::new("github.com/a/b", "github.com/a/b"));
        let json = serde_json::to_string(&config).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let empty: Config = serde_json::from_str("{}").unwrap();
        assert!(empty.remotes.is_empty());
    }
}
