//! Reference encoding and validation.
//!
//! References are stored as container entries named after the full reference
//! name (`HEAD`, `refs/heads/main`, ...). The entry content follows the loose
//! ref format git uses on disk:
//!
//! - `<40 hex digits>\n` for a hash reference
//! - `ref: <target>\n` for a symbolic reference

use git2::Oid;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::Reference;

/// Name of the HEAD reference.
pub const HEAD: &str = "HEAD";

/// Namespace every other reference lives in.
pub const REFS_PREFIX: &str = "refs/";

const SYMBOLIC_PREFIX: &str = "ref: ";

/// Check that a name is one this store keeps: `HEAD` or a valid `refs/...`.
pub fn validate_name(name: &str) -> StorageResult<()> {
    if name == HEAD {
        return Ok(());
    }
    if name.starts_with(REFS_PREFIX) && git2::Reference::is_valid_name(name) {
        return Ok(());
    }
    Err(StorageError::InvalidReferenceName(name.to_string()))
}

/// Serialize a reference to its loose form.
pub fn encode(reference: &Reference) -> Vec<u8> {
    match reference {
        Reference::Hash { target, .. } => format!("{}\n", target).into_bytes(),
        Reference::Symbolic { target, .. } => format!("{}{}\n", SYMBOLIC_PREFIX, target).into_bytes(),
    }
}

/// Parse the loose form of reference `name`.
pub fn decode(name: &str, bytes: &[u8]) -> StorageResult<Reference> {
    let invalid = |reason: &str| StorageError::InvalidReferenceType {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let content = std::str::from_utf8(bytes).map_err(|_| invalid("content is not utf-8"))?;
    let content = content.trim_end();

    if let Some(target) = content.strip_prefix(SYMBOLIC_PREFIX) {
        if target.is_empty() {
            return Err(invalid("empty symbolic target"));
        }
        return Ok(Reference::symbolic(name, target));
    }

    if content.len() == 40 && content.bytes().all(|b| b.is_ascii_hexdigit()) {
        let target = Oid::from_str(content)?;
        return Ok(Reference::hash(name, target));
    }

    Err(invalid("neither an object id nor a symbolic reference"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("HEAD").is_ok());
        assert!(validate_name("refs/heads/main").is_ok());
        assert!(validate_name("refs/remotes/github.com/a/b/HEAD").is_ok());

        assert!(validate_name("ORIG_HEAD").is_err());
        assert!(validate_name("heads/main").is_err());
        assert!(validate_name("refs/heads/bad..name").is_err());
    }

    #[test]
    fn test_hash_reference() {
        let oid = Oid::from_str("b6fc4c620b67d95f953a5c1c1230aaab5db5a1b0").unwrap();
        let reference = Reference::hash("refs/tags/v1", oid);
        let bytes = encode(&reference);
        assert_eq!(bytes, b"b6fc4c620b67d95f953a5c1c1230aaab5db5a1b0\n");
        assert_eq!(decode("refs/tags/v1", &bytes).unwrap(), reference);
    }

    #[test]
    fn test_symbolic_reference() {
        let reference = Reference::symbolic("HEAD", "refs/heads/main");
        let bytes = encode(&reference);
        assert_eq!(bytes, b"ref: refs/heads/main\n");
        assert_eq!(decode("HEAD", &bytes).unwrap(), reference);
    }

    #[test]
    fn test_invalid_reference_content() {
        for content in [&b"garbage"[..], b"b6fc4c62", b"ref: \n", b"\xff\xfe"] {
            let result = decode("refs/heads/x", content);
            assert!(
                matches!(result, Err(StorageError::InvalidReferenceType { .. })),
                "content {:?} should be rejected",
                content
            );
        }
    }
}
