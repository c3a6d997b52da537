use std::path::Path as FsPath;
use std::sync::Arc;

use axum::extract::{Extension, Path};

use crate::error::AppError;
use crate::layout::validate_hex64;
use crate::merkle::RootCommitment;
use crate::server::AppState;

/// Recursively copy `src` into `dst`, creating directories as needed and
/// never overwriting a file that already exists at the destination — the
/// mechanism that turns a commit into content-addressed dedup.
async fn copy_non_overwriting(src: &FsPath, dst: &FsPath) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dst).await?;
    let mut entries = tokio::fs::read_dir(src).await?;
    while let Some(entry) = entries.next_entry().await? {
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type().await?;

        if file_type.is_dir() {
            Box::pin(copy_non_overwriting(&src_path, &dst_path)).await?;
        } else if tokio::fs::metadata(&dst_path).await.is_err() {
            tokio::fs::copy(&src_path, &dst_path).await?;
        }
    }
    Ok(())
}

/// `POST /commit/{storeId}/{sessionId}` — finalize a session: verify every
/// declared file is present (either freshly uploaded or already committed),
/// then merge the session's temp directory into the store.
pub async fn commit_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((store_id, session_id)): Path<(String, String)>,
) -> Result<(), AppError> {
    let store_id = validate_hex64(&store_id, "storeId")?;

    let inner = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| AppError::NotFound("session not found".into()))?;
    let (tmp_dir, root_hash) = {
        let guard = inner.lock();
        (guard.tmp_dir.clone(), guard.root_hash.clone())
    };

    let result = async {
        let root_hash = root_hash.ok_or_else(|| {
            AppError::BadRequest("session has no root commitment; start was never completed".into())
        })?;

        let dat_path = tmp_dir.join(format!("{root_hash}.dat"));
        let dat_text = tokio::fs::read_to_string(&dat_path)
            .await
            .map_err(|_| AppError::BadRequest("'<rootHash>.dat' is missing from the session".into()))?;
        let commitment = RootCommitment::parse(&dat_text)?;

        let store_dir = state.layout.store_dir(&store_id);
        for entry in commitment.files.values() {
            let data_path = crate::layout::blob_data_path(&entry.sha256)?;
            let in_tmp = tmp_dir.join(&data_path).exists();
            let in_store = store_dir.join(&data_path).exists();
            if !in_tmp && !in_store {
                return Err(AppError::BadRequest(format!(
                    "blob for '{}' is present in neither the session nor the committed store",
                    entry.sha256
                )));
            }
        }

        copy_non_overwriting(&tmp_dir, &store_dir).await?;
        if let Err(err) = state.metadata.generate_manifest(&store_id, &store_dir).await {
            tracing::warn!(?err, store_id, "manifest regeneration failed after commit");
        }
        Ok(())
    }
    .await;

    state.sessions.destroy(&session_id).await;
    result
}

/// `POST /abort/{storeId}/{sessionId}` — discard a session outright.
pub async fn abort_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((store_id, session_id)): Path<(String, String)>,
) -> Result<(), AppError> {
    validate_hex64(&store_id, "storeId")?;
    if state.sessions.get(&session_id).is_none() {
        return Err(AppError::NotFound("session not found".into()));
    }
    state.sessions.destroy(&session_id).await;
    let store_dir = state.layout.store_dir(&store_id);
    if let Err(err) = state.metadata.generate_manifest(&store_id, &store_dir).await {
        tracing::warn!(?err, store_id, "manifest regeneration failed after abort");
    }
    Ok(())
}
