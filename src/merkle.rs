//! Merkle integrity verification (component E): deciding whether a
//! root-commitment document is internally consistent, and whether a
//! completed blob is a legitimate leaf under the declared root.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::error::AppError;
use crate::external::ForeignTreeValidator;
use crate::layout::{self, ZERO_ROOT};

/// One leaf of a root commitment's Merkle tree, as declared in the `.dat`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Leaf {
    /// Hex-encoded 32-byte digest of this leaf.
    pub hash: String,
}

/// A `files` entry: the mapping from an opaque key to the file's declared hash
/// and content digest.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileEntry {
    pub hash: String,
    pub sha256: String,
}

/// Strict parse target for a root-commitment `.dat` document. Modeled as a
/// sum type over "leaves present" vs. "leaves empty" per the Design Notes,
/// rather than trusting a dynamic JSON shape.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RootCommitment {
    pub root: String,
    #[serde(default)]
    pub leaves: Vec<Leaf>,
    #[serde(default, deserialize_with = "deserialize_unique_files")]
    pub files: HashMap<String, FileEntry>,
}

/// Deserialize `files` directly off the token stream instead of through a
/// collapsed `serde_json::Value`/`Map`, so a key repeated in the source
/// document is seen twice by `next_entry` and can be rejected rather than
/// silently overwritten.
fn deserialize_unique_files<'de, D>(deserializer: D) -> Result<HashMap<String, FileEntry>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct UniqueFilesVisitor;

    impl<'de> serde::de::Visitor<'de> for UniqueFilesVisitor {
        type Value = HashMap<String, FileEntry>;

        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("a files map with no duplicate keys")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: serde::de::MapAccess<'de>,
        {
            let mut result = HashMap::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, FileEntry>()? {
                if result.insert(key.clone(), value).is_some() {
                    return Err(serde::de::Error::custom(format!(
                        "duplicate key '{key}' in files map"
                    )));
                }
            }
            Ok(result)
        }
    }

    deserializer.deserialize_map(UniqueFilesVisitor)
}

impl RootCommitment {
    /// Parse strict JSON text into a `RootCommitment`, rejecting leading or
    /// trailing whitespace and duplicate keys in `files` (unknown top-level
    /// fields are ignored, per spec).
    pub fn parse(text: &str) -> Result<Self, AppError> {
        if text != text.trim() {
            return Err(AppError::BadRequest(
                "root commitment document has leading or trailing whitespace".into(),
            ));
        }

        serde_json::from_str(text)
            .map_err(|e| AppError::BadRequest(format!("invalid root commitment document: {e}")))
    }

    /// Find the `files` entry whose `sha256` equals `expected_sha256`
    /// (case-insensitive).
    pub fn find_file_by_sha256(&self, expected_sha256: &str) -> Option<(&str, &FileEntry)> {
        self.files.iter().find_map(|(key, entry)| {
            entry
                .sha256
                .eq_ignore_ascii_case(expected_sha256)
                .then_some((key.as_str(), entry))
        })
    }
}

/// Combine leaf digests pairwise, left to right, promoting an odd trailing
/// leaf unchanged to the next level, until one digest remains. Returns
/// [`layout::ZERO_ROOT`] for an empty leaf set.
pub fn compute_root(leaves: &[Leaf]) -> Result<String, AppError> {
    if leaves.is_empty() {
        return Ok(ZERO_ROOT.to_string());
    }

    let mut level: Vec<[u8; 32]> = leaves
        .iter()
        .map(|leaf| decode_digest(&leaf.hash))
        .collect::<Result<_, _>>()?;

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        let mut pairs = level.chunks_exact(2);
        for pair in &mut pairs {
            let mut hasher = Sha256::new();
            hasher.update(pair[0]);
            hasher.update(pair[1]);
            next.push(hasher.finalize().into());
        }
        if let [carry] = pairs.remainder() {
            next.push(*carry);
        }
        level = next;
    }

    Ok(hex::encode(level[0]))
}

fn decode_digest(hex_str: &str) -> Result<[u8; 32], AppError> {
    let bytes = hex::decode(hex_str)
        .map_err(|_| AppError::BadRequest(format!("leaf hash '{hex_str}' is not valid hex")))?;
    bytes
        .try_into()
        .map_err(|_| AppError::BadRequest("leaf hash must be 32 bytes".into()))
}

/// Root-commitment validation: does `payload` correctly commit to
/// `expected_root_hash`, and does the external root history vouch for it?
pub async fn validate_root_commitment(
    payload: &RootCommitment,
    expected_root_hash: &str,
    store_id: &str,
    root_history: &dyn crate::external::MetadataClient,
) -> Result<(), AppError> {
    let declared_root = payload.root.to_ascii_lowercase();
    if declared_root != expected_root_hash {
        return Err(AppError::BadRequest(format!(
            "root commitment declares root '{declared_root}' but filename implies '{expected_root_hash}'"
        )));
    }

    if payload.leaves.is_empty() {
        if expected_root_hash != ZERO_ROOT {
            return Err(AppError::BadRequest(
                "empty leaf set must commit to the all-zero root".into(),
            ));
        }
    } else {
        let computed = compute_root(&payload.leaves)?;
        if computed != expected_root_hash {
            return Err(AppError::BadRequest(format!(
                "recomputed Merkle root '{computed}' does not match declared root '{expected_root_hash}'"
            )));
        }
    }

    // A cache-bust retry is required before rejecting: the root history may
    // not have observed a just-announced root yet.
    let mut history = root_history.get_root_history(store_id).await?;
    if !history.iter().any(|h| h.eq_ignore_ascii_case(expected_root_hash)) {
        history = root_history.get_root_history_fresh(store_id).await?;
        if !history.iter().any(|h| h.eq_ignore_ascii_case(expected_root_hash)) {
            return Err(AppError::BadRequest(format!(
                "root '{expected_root_hash}' is not present in the store's root history"
            )));
        }
    }

    Ok(())
}

/// Per-file integrity check: does the uploaded blob's observed digest
/// match its declared path, and does it participate in the committed tree?
pub async fn validate_file_integrity(
    observed_digest: &str,
    data_path: &str,
    commitment: &RootCommitment,
    root_hash: &str,
    tmp_data_dir: &std::path::Path,
    tree_validator: &dyn ForeignTreeValidator,
) -> Result<(), AppError> {
    let expected_sha256 = layout::sha256_from_data_path(data_path)?;
    if !observed_digest.eq_ignore_ascii_case(&expected_sha256) {
        return Err(AppError::BadRequest(format!(
            "uploaded content hashes to '{observed_digest}' but path implies '{expected_sha256}'"
        )));
    }

    let (hex_key, _entry) = commitment
        .find_file_by_sha256(&expected_sha256)
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "no files entry in root commitment matches sha256 '{expected_sha256}'"
            ))
        })?;

    let participates = tree_validator
        .validate_leaf(hex_key, &expected_sha256, commitment, root_hash, tmp_data_dir)
        .await?;
    if !participates {
        return Err(AppError::BadRequest(format!(
            "blob '{expected_sha256}' does not participate in the committed tree"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(byte: u8) -> Leaf {
        Leaf {
            hash: hex::encode([byte; 32]),
        }
    }

    #[test]
    fn empty_leaves_root_is_zero() {
        assert_eq!(compute_root(&[]).unwrap(), ZERO_ROOT);
    }

    #[test]
    fn single_leaf_is_its_own_root() {
        let l = leaf(7);
        assert_eq!(compute_root(&[l.clone()]).unwrap(), l.hash);
    }

    #[test]
    fn two_leaves_hash_together() {
        let a = leaf(1);
        let b = leaf(2);
        let root = compute_root(&[a.clone(), b.clone()]).unwrap();
        let mut hasher = Sha256::new();
        hasher.update([1u8; 32]);
        hasher.update([2u8; 32]);
        assert_eq!(root, hex::encode(hasher.finalize()));
    }

    #[test]
    fn odd_leaf_is_carried_unchanged() {
        let a = leaf(1);
        let b = leaf(2);
        let c = leaf(3);
        // level 1: hash(a,b), c carried
        // level 2: hash(hash(a,b), c)
        let mut first = Sha256::new();
        first.update([1u8; 32]);
        first.update([2u8; 32]);
        let ab: [u8; 32] = first.finalize().into();
        let mut second = Sha256::new();
        second.update(ab);
        second.update([3u8; 32]);
        let expected = hex::encode(second.finalize());
        assert_eq!(compute_root(&[a, b, c]).unwrap(), expected);
    }

    #[test]
    fn parse_rejects_leading_whitespace() {
        assert!(RootCommitment::parse(" {\"root\":\"a\"}").is_err());
    }

    #[test]
    fn parse_rejects_duplicate_key_in_files_map() {
        let dup = r#"{"root":"aa","leaves":[],"files":{"k":{"hash":"a","sha256":"b"},"k":{"hash":"c","sha256":"d"}}}"#;
        let err = RootCommitment::parse(dup).unwrap_err();
        assert!(err.to_string().contains("duplicate key"), "{err}");
    }

    #[test]
    fn parse_accepts_distinct_keys_in_files_map() {
        let ok = r#"{"root":"aa","leaves":[],"files":{"a":{"hash":"a","sha256":"b"},"b":{"hash":"c","sha256":"d"}}}"#;
        let commitment = RootCommitment::parse(ok).unwrap();
        assert_eq!(commitment.files.len(), 2);
    }

    #[test]
    fn find_file_by_sha256_is_case_insensitive() {
        let mut files = HashMap::new();
        files.insert(
            "k".to_string(),
            FileEntry {
                hash: "h".to_string(),
                sha256: "ABCD".to_string(),
            },
        );
        let commitment = RootCommitment {
            root: ZERO_ROOT.to_string(),
            leaves: vec![],
            files,
        };
        assert!(commitment.find_file_by_sha256("abcd").is_some());
        assert!(commitment.find_file_by_sha256("zzzz").is_none());
    }
}
