//! External collaborator traits: seams through which this service consults
//! the wider network (signature verification, root history / permissions,
//! foreign-tree validation) without depending on a concrete transport.
//!
//! Production wiring uses [`Ed25519SignatureVerifier`]; the other two
//! collaborators are network services with no single canonical client in
//! this codebase, so handlers depend on the traits and tests supply
//! in-memory doubles.

use async_trait::async_trait;
use ed25519_dalek::{Signature, VerifyingKey};

use crate::error::AppError;
use crate::merkle::RootCommitment;

/// Verifies that a signature over a nonce was produced by the claimed
/// public key, required to authorize each upload chunk.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(&self, nonce: &str, signature: &str, public_key: &str) -> Result<bool, AppError>;
}

/// A store's on-chain server-coin, as reported by the datastore metadata
/// module. Consumed by the server-coin lifecycle background tasks this crate
/// does not implement; present on the trait only because it is part of the
/// metadata module's external surface.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoinInfo {
    pub coin_id: String,
    pub amount: u64,
}

/// Consults the network's view of a store's owners and published root
/// history, and delegates manifest/coin bookkeeping that lives outside this
/// server's local store tree.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Is `public_key` an owner of `store_id` (cache miss path)?
    async fn is_owner(&self, public_key: &str, store_id: &str) -> Result<bool, AppError>;

    /// Roots the network currently believes `store_id` has published,
    /// potentially served from a local cache on the remote side.
    async fn get_root_history(&self, store_id: &str) -> Result<Vec<String>, AppError>;

    /// Same as [`MetadataClient::get_root_history`] but forces the remote
    /// side to bypass its own cache, used as the retry after an initial miss.
    async fn get_root_history_fresh(&self, store_id: &str) -> Result<Vec<String>, AppError>;

    /// Cache `store_id`'s creation height and regenerate `manifest.dat` for
    /// the store rooted at `store_dir`. Called after every commit and abort.
    async fn generate_manifest(&self, store_id: &str, store_dir: &std::path::Path) -> Result<(), AppError>;

    /// Look up the server-coin backing `store_id`. Not consumed by the
    /// upload pipeline; exposed for completeness of the metadata module's
    /// surface, used instead by the periodic server-coin lifecycle tasks.
    async fn fetch_coin_info(&self, store_id: &str) -> Result<CoinInfo, AppError>;
}

/// Confirms that a leaf genuinely participates in a foreign (already
/// committed, possibly externally-hosted) Merkle tree.
#[async_trait]
pub trait ForeignTreeValidator: Send + Sync {
    async fn validate_leaf(
        &self,
        leaf_key: &str,
        sha256: &str,
        commitment: &RootCommitment,
        root_hash: &str,
        tmp_data_dir: &std::path::Path,
    ) -> Result<bool, AppError>;
}

/// Production [`SignatureVerifier`]: plain Ed25519 verification over the
/// nonce bytes, with the public key and signature both hex-encoded on the
/// wire (matching the reference service's header encoding).
pub struct Ed25519SignatureVerifier;

#[async_trait]
impl SignatureVerifier for Ed25519SignatureVerifier {
    async fn verify(&self, nonce: &str, signature: &str, public_key: &str) -> Result<bool, AppError> {
        let key_bytes = hex::decode(public_key)
            .map_err(|_| AppError::Unauthorized("public key is not valid hex".into()))?;
        let key_bytes: [u8; 32] = key_bytes
            .try_into()
            .map_err(|_| AppError::Unauthorized("public key must be 32 bytes".into()))?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| AppError::Unauthorized("malformed public key".into()))?;

        let sig_bytes = hex::decode(signature)
            .map_err(|_| AppError::Unauthorized("signature is not valid hex".into()))?;
        let sig_bytes: [u8; 64] = sig_bytes
            .try_into()
            .map_err(|_| AppError::Unauthorized("signature must be 64 bytes".into()))?;
        let signature = Signature::from_bytes(&sig_bytes);

        Ok(verifying_key.verify_strict(nonce.as_bytes(), &signature).is_ok())
    }
}

/// A [`ForeignTreeValidator`] that trusts the locally recomputed Merkle tree:
/// a leaf participates if the commitment's `files` map and `leaves` list
/// agree on its hash. Suitable when no separate foreign-tree service is
/// configured; production deployments with an independent tree authority
/// should supply their own implementation.
pub struct LocalTreeValidator;

#[async_trait]
impl ForeignTreeValidator for LocalTreeValidator {
    async fn validate_leaf(
        &self,
        leaf_key: &str,
        sha256: &str,
        commitment: &RootCommitment,
        _root_hash: &str,
        _tmp_data_dir: &std::path::Path,
    ) -> Result<bool, AppError> {
        let Some(entry) = commitment.files.get(leaf_key) else {
            return Ok(false);
        };
        if !entry.sha256.eq_ignore_ascii_case(sha256) {
            return Ok(false);
        }
        Ok(commitment.leaves.iter().any(|leaf| leaf.hash.eq_ignore_ascii_case(&entry.hash)))
    }
}

/// A [`MetadataClient`] that knows nothing: no store has any owner, and no
/// root has ever been published. The metadata module is a genuinely
/// external system this crate does not implement; deployments wire in their
/// own client. This stand-in lets the server start and exercises every
/// other component, at the cost of rejecting every upload's ownership and
/// root-history checks until a real client is substituted.
#[derive(Default)]
pub struct NullMetadataClient;

#[async_trait]
impl MetadataClient for NullMetadataClient {
    async fn is_owner(&self, _public_key: &str, _store_id: &str) -> Result<bool, AppError> {
        Ok(false)
    }

    async fn get_root_history(&self, _store_id: &str) -> Result<Vec<String>, AppError> {
        Ok(Vec::new())
    }

    async fn get_root_history_fresh(&self, _store_id: &str) -> Result<Vec<String>, AppError> {
        Ok(Vec::new())
    }

    async fn generate_manifest(&self, _store_id: &str, _store_dir: &std::path::Path) -> Result<(), AppError> {
        Ok(())
    }

    async fn fetch_coin_info(&self, _store_id: &str) -> Result<CoinInfo, AppError> {
        Ok(CoinInfo::default())
    }
}

#[cfg(test)]
pub mod test_doubles {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, HashSet};

    /// Always-accept verifier for tests that don't exercise signature failure.
    pub struct AlwaysValidSignatureVerifier;

    #[async_trait]
    impl SignatureVerifier for AlwaysValidSignatureVerifier {
        async fn verify(&self, _nonce: &str, _signature: &str, _public_key: &str) -> Result<bool, AppError> {
            Ok(true)
        }
    }

    /// In-memory owner/root-history double, configured by the test.
    #[derive(Default)]
    pub struct FakeMetadataClient {
        owners: Mutex<HashMap<String, HashSet<String>>>,
        roots: Mutex<HashMap<String, Vec<String>>>,
    }

    impl FakeMetadataClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn add_owner(&self, store_id: &str, public_key: &str) {
            self.owners
                .lock()
                .entry(store_id.to_string())
                .or_default()
                .insert(public_key.to_string());
        }

        pub fn publish_root(&self, store_id: &str, root_hash: &str) {
            self.roots
                .lock()
                .entry(store_id.to_string())
                .or_default()
                .push(root_hash.to_string());
        }
    }

    #[async_trait]
    impl MetadataClient for FakeMetadataClient {
        async fn is_owner(&self, public_key: &str, store_id: &str) -> Result<bool, AppError> {
            Ok(self
                .owners
                .lock()
                .get(store_id)
                .is_some_and(|owners| owners.contains(public_key)))
        }

        async fn get_root_history(&self, store_id: &str) -> Result<Vec<String>, AppError> {
            Ok(self.roots.lock().get(store_id).cloned().unwrap_or_default())
        }

        async fn get_root_history_fresh(&self, store_id: &str) -> Result<Vec<String>, AppError> {
            self.get_root_history(store_id).await
        }

        async fn generate_manifest(&self, _store_id: &str, store_dir: &std::path::Path) -> Result<(), AppError> {
            crate::layout::regenerate_manifest_file(store_dir).await
        }

        async fn fetch_coin_info(&self, _store_id: &str) -> Result<CoinInfo, AppError> {
            Ok(CoinInfo::default())
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    #[tokio::test]
    async fn ed25519_verifier_accepts_genuine_signature() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifying_key = signing_key.verifying_key();
        let nonce = "abc123";
        let signature = signing_key.sign(nonce.as_bytes());

        let verifier = Ed25519SignatureVerifier;
        let ok = verifier
            .verify(
                nonce,
                &hex::encode(signature.to_bytes()),
                &hex::encode(verifying_key.to_bytes()),
            )
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn ed25519_verifier_rejects_wrong_nonce() {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifying_key = signing_key.verifying_key();
        let signature = signing_key.sign(b"abc123");

        let verifier = Ed25519SignatureVerifier;
        let ok = verifier
            .verify(
                "different-nonce",
                &hex::encode(signature.to_bytes()),
                &hex::encode(verifying_key.to_bytes()),
            )
            .await
            .unwrap();
        assert!(!ok);
    }
}
