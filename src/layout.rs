//! Deterministic filesystem paths for stores, sessions, and content-addressed
//! blobs (component A). No I/O is performed here except directory creation
//! on demand; everything else is a pure function of its inputs.

use std::path::{Path, PathBuf};

use crate::error::AppError;

/// Root of the whole on-disk layout: `<base>/stores/...` and `<base>/tmp/...`.
#[derive(Debug, Clone)]
pub struct Layout {
    base: PathBuf,
}

impl Layout {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Create the base directory tree (`stores/`, `tmp/`) if it does not exist yet.
    pub async fn ensure_base_dirs(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(self.stores_root()).await?;
        tokio::fs::create_dir_all(self.tmp_root()).await?;
        Ok(())
    }

    pub fn stores_root(&self) -> PathBuf {
        self.base.join("stores")
    }

    pub fn tmp_root(&self) -> PathBuf {
        self.base.join("tmp")
    }

    /// `<base>/stores/<storeId>/`
    pub fn store_dir(&self, store_id: &str) -> PathBuf {
        self.stores_root().join(store_id)
    }

    pub fn store_exists(&self, store_id: &str) -> bool {
        self.store_dir(store_id).is_dir()
    }

    /// `<base>/stores/<storeId>/<rootHash>.dat`
    pub fn root_commitment_path(&self, store_id: &str, root_hash: &str) -> PathBuf {
        self.store_dir(store_id).join(format!("{root_hash}.dat"))
    }

    /// `<base>/stores/<storeId>/manifest.dat`
    pub fn manifest_path(&self, store_id: &str) -> PathBuf {
        self.store_dir(store_id).join("manifest.dat")
    }

    /// `<base>/tmp/<sessionId>/`, the exclusive working directory for one session.
    pub fn session_tmp_dir(&self, session_id: &str) -> PathBuf {
        self.tmp_root().join(session_id)
    }

    /// Resolve a blob's relative path (e.g. `data/aa/bb/rest...` or
    /// `<rootHash>.dat`) against a session's temp directory or a store
    /// directory, rejecting any path that would escape it.
    pub fn resolve_relative(&self, root: &Path, relative: &str) -> Result<PathBuf, AppError> {
        if relative.is_empty() {
            return Err(AppError::BadRequest("empty path".into()));
        }
        let candidate = Path::new(relative);
        if candidate
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir | std::path::Component::RootDir))
        {
            return Err(AppError::BadRequest("path traversal rejected".into()));
        }
        Ok(root.join(candidate))
    }
}

/// Canonical content-addressed blob path for a hex sha-256 digest `H`:
/// `data/H[0:2]/H[2:4]/H[4:]`.
pub fn blob_data_path(hex_sha256: &str) -> Result<String, AppError> {
    if hex_sha256.len() != 64 || !hex_sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AppError::BadRequest(
            "expected a 64-character hex sha-256 digest".into(),
        ));
    }
    let lower = hex_sha256.to_ascii_lowercase();
    Ok(format!(
        "data/{}/{}/{}",
        &lower[0..2],
        &lower[2..4],
        &lower[4..]
    ))
}

/// Inverse of [`blob_data_path`]: given a `data/<aa>/<bb>/<rest>` path,
/// recover the original hex sha-256 digest by stripping the leading `data`
/// segment and all separators.
pub fn sha256_from_data_path(data_path: &str) -> Result<String, AppError> {
    let mut segments = data_path.split('/');
    if segments.next() != Some("data") {
        return Err(AppError::BadRequest(
            "data path must start with 'data/'".into(),
        ));
    }
    let hex: String = segments.collect::<Vec<_>>().join("");
    if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AppError::BadRequest(
            "data path does not decode to a 64-character hex digest".into(),
        ));
    }
    Ok(hex.to_ascii_lowercase())
}

/// Validate a 64-hex-character identifier (store id or root hash), returning
/// it canonicalized to lowercase.
pub fn validate_hex64(value: &str, what: &str) -> Result<String, AppError> {
    if value.len() != 64 || !value.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(AppError::BadRequest(format!(
            "{what} must be 64 hex characters"
        )));
    }
    Ok(value.to_ascii_lowercase())
}

/// The all-zero 64-hex-character digest used as the root of an empty Merkle tree.
pub const ZERO_ROOT: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// List every committed root commitment (`<rootHash>.dat`) directly inside
/// `store_dir` and rebuild `manifest.dat` from them.
///
/// This is the concrete behavior a real datastore metadata module's
/// `generate_manifest` performs against this server's local store; it is
/// exposed here so in-memory [`crate::external::MetadataClient`] doubles can
/// implement that call without duplicating the directory scan.
pub async fn regenerate_manifest_file(store_dir: &Path) -> Result<(), AppError> {
    let mut roots = Vec::new();
    let mut entries = match tokio::fs::read_dir(store_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if let Some(name) = entry.file_name().to_str() {
            if let Some(root) = name.strip_suffix(".dat") {
                roots.push(root.to_string());
            }
        }
    }
    roots.sort();

    let manifest = serde_json::json!({
        "roots": roots,
        "generated_at": chrono::Utc::now().to_rfc3339(),
    });
    let manifest_path = store_dir.join("manifest.dat");
    tokio::fs::write(
        &manifest_path,
        serde_json::to_vec_pretty(&manifest).map_err(AppError::internal)?,
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_path_round_trips() {
        let digest = format!("aabb{}", "c".repeat(60));
        let path = blob_data_path(&digest).unwrap();
        assert_eq!(path, format!("data/aa/bb/{}", "c".repeat(60)));
        assert_eq!(sha256_from_data_path(&path).unwrap(), digest);
    }

    #[test]
    fn blob_path_rejects_bad_length() {
        assert!(blob_data_path("deadbeef").is_err());
    }

    #[test]
    fn sha256_from_data_path_rejects_missing_prefix() {
        assert!(sha256_from_data_path(&format!("notdata/aa/bb/{}", "c".repeat(60))).is_err());
    }

    #[test]
    fn resolve_relative_rejects_traversal() {
        let layout = Layout::new("/base");
        let root = layout.session_tmp_dir("sess");
        assert!(layout.resolve_relative(&root, "../escape").is_err());
        assert!(layout.resolve_relative(&root, "/abs").is_err());
        assert!(layout.resolve_relative(&root, "data/aa/bb/cc").is_ok());
    }

    #[test]
    fn validate_hex64_canonicalizes_case() {
        let upper = "A".repeat(64);
        assert_eq!(validate_hex64(&upper, "storeId").unwrap(), "a".repeat(64));
        assert!(validate_hex64("short", "storeId").is_err());
    }
}
