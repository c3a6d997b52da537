use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Extension, Multipart, Path};
use axum::http::{HeaderMap, HeaderValue};
use base64::Engine;
use futures_util::TryStreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

use crate::error::AppError;
use crate::hashing::HashingWriter;
use crate::layout::validate_hex64;
use crate::merkle::{self, RootCommitment};
use crate::nonce::NonceKey;
use crate::server::AppState;

fn basic_auth_matches(headers: &HeaderMap, username: &str, password: &str) -> bool {
    let Some(header) = headers.get(axum::http::header::AUTHORIZATION) else {
        return false;
    };
    let Ok(header) = header.to_str() else {
        return false;
    };
    let Some(encoded) = header.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    decoded == format!("{username}:{password}")
}

/// `POST /upload/{storeId}` — start a session and stream in the root
/// commitment `.dat`.
pub async fn start_upload_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    Path(store_id): Path<String>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<String, AppError> {
    state.upload_rate_limiter.check(&addr.ip().to_string())?;
    let store_id = validate_hex64(&store_id, "storeId")?;

    if !state.layout.store_exists(&store_id) {
        let creds = &state.config.store_owner_credentials;
        if !basic_auth_matches(&headers, &creds.username, &creds.password) {
            return Err(AppError::Unauthorized(
                "basic auth required to create a new store".into(),
            ));
        }
    }

    let field = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("invalid multipart body: {e}")))?
        .ok_or_else(|| AppError::BadRequest("multipart body has no fields".into()))?;

    let filename = field
        .file_name()
        .ok_or_else(|| AppError::BadRequest("multipart field is missing a filename".into()))?
        .to_string();
    let root_hash = filename
        .strip_suffix(".dat")
        .ok_or_else(|| AppError::BadRequest("uploaded file must be named '<rootHash>.dat'".into()))?
        .to_string();
    let root_hash = validate_hex64(&root_hash, "rootHash")?;

    if tokio::fs::metadata(state.layout.root_commitment_path(&store_id, &root_hash))
        .await
        .is_ok()
    {
        return Err(AppError::Conflict(format!(
            "root commitment '{root_hash}.dat' already exists"
        )));
    }

    let session_id = state.sessions.create(&store_id).await?;
    let run = async {
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("failed reading upload body: {e}")))?;

        let inner = state
            .sessions
            .get(&session_id)
            .ok_or_else(|| AppError::internal("session disappeared mid-start"))?;
        let tmp_dir = inner.lock().tmp_dir.clone();
        let dat_path = tmp_dir.join(format!("{root_hash}.dat"));
        tokio::fs::write(&dat_path, &bytes).await?;

        let text = std::str::from_utf8(&bytes)
            .map_err(|_| AppError::BadRequest("root commitment document is not valid UTF-8".into()))?;
        let commitment = RootCommitment::parse(text)?;
        merkle::validate_root_commitment(&commitment, &root_hash, &store_id, state.metadata.as_ref())
            .await?;

        inner.lock().root_hash = Some(root_hash.clone());
        Ok::<_, AppError>(())
    }
    .await;

    if let Err(err) = run {
        state.sessions.destroy(&session_id).await;
        return Err(err);
    }

    Ok(session_id)
}

/// `HEAD /upload/{storeId}/{sessionId}/*filename` — report whether the file
/// already exists and, if not, issue a fresh per-file nonce.
pub async fn issue_nonce_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((store_id, session_id, filename)): Path<(String, String, String)>,
) -> Result<HeaderMap, AppError> {
    let store_id = validate_hex64(&store_id, "storeId")?;
    let inner = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| AppError::NotFound("session not found".into()))?;
    let tmp_dir = inner.lock().tmp_dir.clone();

    let in_tmp = state
        .layout
        .resolve_relative(&tmp_dir, &filename)
        .map(|p| p.exists())
        .unwrap_or(false);
    let in_store = state
        .layout
        .resolve_relative(&state.layout.store_dir(&store_id), &filename)
        .map(|p| p.exists())
        .unwrap_or(false);
    let exists = in_tmp || in_store;

    let mut headers = HeaderMap::new();
    headers.insert("x-file-exists", HeaderValue::from_static(if exists { "true" } else { "false" }));

    if !exists {
        let nonce = state.nonces.issue(NonceKey {
            store_id,
            session_id,
            filename,
        });
        headers.insert("x-nonce", HeaderValue::from_str(&nonce).map_err(AppError::internal)?);
    }

    Ok(headers)
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .ok_or_else(|| AppError::BadRequest(format!("missing required header '{name}'")))?
        .to_str()
        .map_err(|_| AppError::BadRequest(format!("header '{name}' is not valid UTF-8")))
}

/// `PUT /upload/{storeId}/{sessionId}/*filename` — upload one file, subject
/// to the ordered nonce/signature/session/ownership checks, then streamed
/// integrity verification for blobs under `data/`.
pub async fn upload_file_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path((store_id, session_id, filename)): Path<(String, String, String)>,
    headers: HeaderMap,
    body: Body,
) -> Result<(), AppError> {
    let store_id = validate_hex64(&store_id, "storeId")?;

    // 1. Headers present.
    let nonce = required_header(&headers, "x-nonce")?.to_string();
    let public_key = required_header(&headers, "x-public-key")?.to_string();
    let signature = required_header(&headers, "x-key-ownership-sig")?.to_string();

    // 2. Nonce valid and single-use.
    let nonce_key = NonceKey {
        store_id: store_id.clone(),
        session_id: session_id.clone(),
        filename: filename.clone(),
    };
    if !state.nonces.validate_and_consume(&nonce_key, &nonce) {
        return Err(AppError::Unauthorized("nonce invalid, expired, or already used".into()));
    }

    // 3. Signature over the nonce.
    if !state
        .signature_verifier
        .verify(&nonce, &signature, &public_key)
        .await?
    {
        return Err(AppError::Unauthorized("signature verification failed".into()));
    }

    // 4. Session exists.
    let inner = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| AppError::NotFound("session not found".into()))?;

    // 5. Owner cache says writable.
    if !state.owners.is_owner(&public_key, &store_id).await? {
        return Err(AppError::Forbidden("signer is not an owner of this store".into()));
    }

    let (tmp_dir, root_hash) = {
        let guard = inner.lock();
        (guard.tmp_dir.clone(), guard.root_hash.clone())
    };
    let destination = state.layout.resolve_relative(&tmp_dir, &filename)?;
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let sessions = Arc::clone(&state.sessions);
    let owners_key = public_key.clone();
    let owners = Arc::clone(&state.owners);
    let bump_interval = std::time::Duration::from_millis(state.config.bump_min_interval_ms);

    let file = tokio::fs::File::create(&destination).await?;
    let sink: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = if filename.starts_with("data/") {
        Box::new(async_compression::tokio::write::GzipEncoder::new(file))
    } else {
        Box::new(file)
    };
    let mut hashing = HashingWriter::new(sink);

    let mut stream = StreamReader::new(
        body.into_data_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
    );

    let mut last_bump = tokio::time::Instant::now() - bump_interval;
    let mut buf = [0u8; 64 * 1024];
    loop {
        use tokio::io::AsyncReadExt;
        let read = stream.read(&mut buf).await.map_err(|e| {
            AppError::BadRequest(format!("client disconnected mid-upload: {e}"))
        })?;
        if read == 0 {
            break;
        }
        hashing.write_all(&buf[..read]).await?;

        let now = tokio::time::Instant::now();
        if now.duration_since(last_bump) >= bump_interval {
            sessions.bump(&session_id);
            let _ = owners.is_owner(&owners_key, &store_id).await;
            last_bump = now;
        }
    }
    let digest = hashing.hex_digest();
    hashing.shutdown().await?;

    if filename.starts_with("data/") {
        let Some(root_hash) = root_hash else {
            state.sessions.destroy(&session_id).await;
            return Err(AppError::BadRequest(
                "session has no committed root commitment yet".into(),
            ));
        };
        let dat_path = tmp_dir.join(format!("{root_hash}.dat"));
        let dat_text = tokio::fs::read_to_string(&dat_path).await?;
        let commitment = RootCommitment::parse(&dat_text)?;

        if let Err(err) = merkle::validate_file_integrity(
            &digest,
            &filename,
            &commitment,
            &root_hash,
            &tmp_dir,
            state.tree_validator.as_ref(),
        )
        .await
        {
            state.sessions.destroy(&session_id).await;
            return Err(err);
        }
    }

    Ok(())
}
