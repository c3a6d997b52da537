use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Extension, Path};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;

use crate::error::AppError;
use crate::layout::validate_hex64;
use crate::server::AppState;

fn rate_limit_key(addr: std::net::SocketAddr, store_id: &str, path: &str) -> String {
    format!("{}|{store_id}|{path}", addr.ip())
}

/// `HEAD /fetch/{storeId}/{roothash}/*dataPath` — probe a committed file.
/// The root hash identifies which commitment the caller believes the file
/// belongs to; resolution itself is purely content-addressed and ignores it
/// beyond format validation.
pub async fn fetch_probe_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Path((store_id, root_hash, data_path)): Path<(String, String, String)>,
) -> Result<HeaderMap, AppError> {
    let store_id = validate_hex64(&store_id, "storeId")?;
    let _root_hash = validate_hex64(&root_hash, "roothash")?;
    state
        .fetch_rate_limiter
        .check(&rate_limit_key(addr, &store_id, &data_path))?;

    let target = state
        .layout
        .resolve_relative(&state.layout.store_dir(&store_id), &data_path)?;

    let mut headers = HeaderMap::new();
    match tokio::fs::metadata(&target).await {
        Ok(meta) if meta.is_file() => {
            headers.insert("x-file-exists", HeaderValue::from_static("true"));
            headers.insert(
                "x-file-size",
                HeaderValue::from_str(&meta.len().to_string())
                    .map_err(|e| AppError::internal(e))?,
            );
        }
        _ => {
            headers.insert("x-file-exists", HeaderValue::from_static("false"));
        }
    }
    Ok(headers)
}

/// `GET /fetch/{storeId}/*dataPath` — stream a committed file.
pub async fn fetch_download_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Path((store_id, data_path)): Path<(String, String)>,
) -> Result<Response, AppError> {
    let store_id = validate_hex64(&store_id, "storeId")?;
    state
        .fetch_rate_limiter
        .check(&rate_limit_key(addr, &store_id, &data_path))?;

    let target = state
        .layout
        .resolve_relative(&state.layout.store_dir(&store_id), &data_path)?;

    let file = tokio::fs::File::open(&target)
        .await
        .map_err(|_| AppError::NotFound(format!("'{data_path}' not found in store")))?;
    let metadata = file.metadata().await?;

    let basename = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("download")
        .to_string();

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let response = Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "application/octet-stream")
        .header("content-length", metadata.len())
        .header(
            "content-disposition",
            format!("attachment; filename=\"{basename}\""),
        )
        .body(body)
        .map_err(AppError::internal)?;
    Ok(response.into_response())
}
