use std::sync::Arc;

use axum::extract::{Extension, Path, Query};
use axum::http::{HeaderMap, HeaderValue};
use serde::Deserialize;

use crate::error::AppError;
use crate::layout::validate_hex64;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct ExistenceQuery {
    #[serde(rename = "hasRootHash")]
    has_root_hash: Option<String>,
}

/// `HEAD /{storeId}` — existence probe for the store itself, with an
/// optional `?hasRootHash=<hex>` companion probe for one root commitment.
pub async fn store_exists_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(store_id): Path<String>,
    Query(query): Query<ExistenceQuery>,
) -> Result<HeaderMap, AppError> {
    let store_id = validate_hex64(&store_id, "storeId")?;
    let mut headers = HeaderMap::new();

    let exists = state.layout.store_exists(&store_id);
    headers.insert("x-store-exists", HeaderValue::from_static(if exists { "true" } else { "false" }));

    if let Some(root_hash) = query.has_root_hash {
        let root_hash = validate_hex64(&root_hash, "hasRootHash")?;
        let dat_exists = exists
            && tokio::fs::metadata(state.layout.root_commitment_path(&store_id, &root_hash))
                .await
                .is_ok();
        headers.insert(
            "x-has-root-hash",
            HeaderValue::from_static(if dat_exists { "true" } else { "false" }),
        );
    }

    Ok(headers)
}
