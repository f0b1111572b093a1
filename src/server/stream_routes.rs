use async_stream::try_stream;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, Response};
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use serde::Deserialize;
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use super::AppContext;
use super::range::{parse_range_header, validate_range};
use crate::cache::media::{fallback_file_name, mime_for_file_name};
use crate::db::entities::CacheEntryModel;
use crate::error::GatewayError;
use crate::models::{CacheKey, ContainerId, ItemId, TransferDescriptor};
use crate::remote::stream_range;

const DISK_READ_CHUNK: usize = 256 * 1024;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub id: String,
    pub hash: String,
}

#[derive(Debug, Deserialize)]
pub struct ThumbQuery {
    pub id: String,
}

/// `GET /{container}/{name}?id={item}&hash={content_id}` — the range-capable
/// media stream. The path name is display-only; identity comes from the
/// query.
pub async fn stream_media(
    State(ctx): State<Arc<AppContext>>,
    Path((container, _name)): Path<(String, String)>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let container_id = ContainerId::from(container);
    let item_id = ItemId::from(query.id);

    let session = ctx.pool.pick_least_loaded();
    let descriptor = match ctx.remote.locate(session, &container_id, &item_id).await {
        Ok(descriptor) => descriptor,
        Err(GatewayError::NotFound) => {
            // The catalog is stale; drop the row so listings heal.
            if let Err(e) = ctx.catalog.delete_item(&container_id, &item_id).await {
                warn!("Failed to prune stale catalog row: {e}");
            }
            return Err(GatewayError::NotFound);
        }
        Err(e) => return Err(e),
    };

    if !descriptor.matches_hash(&query.hash) {
        debug!("Invalid hash for {container_id}/{item_id}");
        return Err(GatewayError::InvalidHash);
    }

    let size = descriptor.size;
    let (mime_type, file_name) = resolve_identity(&descriptor);

    let range_header = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok());
    let (from, until) = match range_header {
        Some(raw) => {
            let range = parse_range_header(raw, size)
                .ok_or(GatewayError::RangeNotSatisfiable { size })?;
            validate_range(&range, size)?;
            (range.from, range.until)
        }
        None => (0, size.saturating_sub(1)),
    };
    let status = if range_header.is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    let key = CacheKey::new(
        container_id.clone(),
        item_id.clone(),
        descriptor.short_content_id(),
    );

    if ctx.cache_enabled {
        if let Some(entry) = ctx.store.lookup(&key).await.map_err(GatewayError::Other)? {
            info!("Cache HIT: {file_name}");
            return serve_cache_hit(&ctx, &key, entry, &container_id, from, until, size, status)
                .await;
        }
    }

    info!("Cache MISS: {file_name} (session {session})");

    if ctx.cache_enabled {
        // Populate in the background on a different session so the warmup
        // never competes with this viewer's stream.
        let background = ctx.pool.pick_other(session);
        match ctx
            .populator
            .admit(
                key,
                container_id.clone(),
                item_id.clone(),
                &descriptor,
                background,
            )
            .await
        {
            Ok(admission) => debug!("Populator admission: {admission:?}"),
            Err(e) => warn!("Populator admission failed: {e}"),
        }
    }
    spawn_predictor(&ctx, container_id.clone(), file_name.clone());

    let body = Body::from_stream(stream_range(
        Arc::clone(&ctx.remote),
        Arc::clone(&ctx.pool),
        session,
        container_id,
        item_id,
        descriptor,
        from,
        until,
    ));

    Ok(media_response(
        status, &mime_type, &file_name, from, until, size, "MISS", body,
    ))
}

/// HEAD twin of [`stream_media`]: same status and headers, no body.
pub async fn stream_media_head(
    state: State<Arc<AppContext>>,
    path: Path<(String, String)>,
    query: Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, GatewayError> {
    let response = stream_media(state, path, query, headers).await?;
    Ok(without_body(response))
}

/// `GET /watch/{container}?id={item}&hash={content_id}` — player page.
pub async fn watch_page(
    State(ctx): State<Arc<AppContext>>,
    Path(container): Path<String>,
    Query(query): Query<StreamQuery>,
) -> Html<String> {
    let container_id = ContainerId::from(container);
    let item_id = ItemId::from(query.id);
    Html(
        ctx.renderer
            .render_watch(&container_id, &item_id, &query.hash),
    )
}

/// HEAD twin of [`watch_page`].
pub async fn watch_page_head(
    state: State<Arc<AppContext>>,
    path: Path<String>,
    query: Query<StreamQuery>,
) -> Response {
    let Html(page) = watch_page(state, path, query).await;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .header(header::CONTENT_LENGTH, page.len().to_string())
        .body(Body::empty())
        .unwrap()
}

/// `GET /api/thumb/{container}?id={item}` — thumbnail passthrough.
pub async fn thumbnail(
    State(ctx): State<Arc<AppContext>>,
    Path(container): Path<String>,
    Query(query): Query<ThumbQuery>,
) -> Result<Response, GatewayError> {
    let bytes = fetch_thumbnail(&ctx, container, query.id).await?;
    let length = bytes.len();
    Ok(thumb_response(length, Body::from(bytes)))
}

/// HEAD twin of [`thumbnail`].
pub async fn thumbnail_head(
    State(ctx): State<Arc<AppContext>>,
    Path(container): Path<String>,
    Query(query): Query<ThumbQuery>,
) -> Result<Response, GatewayError> {
    let bytes = fetch_thumbnail(&ctx, container, query.id).await?;
    Ok(thumb_response(bytes.len(), Body::empty()))
}

async fn fetch_thumbnail(
    ctx: &Arc<AppContext>,
    container: String,
    item: String,
) -> Result<Bytes, GatewayError> {
    let container_id = ContainerId::from(container);
    let item_id = ItemId::from(item);

    let session = ctx.pool.pick_least_loaded();
    let _lease = ctx.pool.acquire(session);
    ctx.remote.thumbnail(session, &container_id, &item_id).await
}

fn thumb_response(length: usize, body: Body) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "image/jpeg")
        .header(header::CONTENT_LENGTH, length.to_string())
        .header(header::CACHE_CONTROL, "public, max-age=86400")
        .body(body)
        .unwrap()
}

/// Drop the body, keeping status and headers (Content-Length included).
fn without_body(response: Response) -> Response {
    let (parts, _) = response.into_parts();
    Response::from_parts(parts, Body::empty())
}

async fn serve_cache_hit(
    ctx: &Arc<AppContext>,
    key: &CacheKey,
    entry: CacheEntryModel,
    container_id: &ContainerId,
    from: u64,
    until: u64,
    size: u64,
    status: StatusCode,
) -> Result<Response, GatewayError> {
    if let Err(e) = ctx
        .store
        .index()
        .record_access(&entry.cache_key, Utc::now())
        .await
    {
        warn!("Failed to record cache access for {key}: {e}");
    }

    let display_name = entry
        .file_name
        .clone()
        .unwrap_or_else(|| fallback_file_name(entry.mime_type.as_deref()));
    let mime_type = entry
        .mime_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    spawn_predictor(ctx, container_id.clone(), display_name.clone());

    let file = ctx
        .store
        .open_read(std::path::Path::new(&entry.file_path))
        .await
        .map_err(GatewayError::Other)?;
    let body = Body::from_stream(disk_stream(file, from, until - from + 1));

    Ok(media_response(
        status,
        &mime_type,
        &display_name,
        from,
        until,
        size,
        "HIT",
        body,
    ))
}

/// Positioned read of `length` bytes starting at `from`, in modest chunks
/// so one viewer cannot balloon memory.
fn disk_stream(
    file: tokio::fs::File,
    from: u64,
    length: u64,
) -> impl Stream<Item = std::io::Result<Bytes>> + Send {
    try_stream! {
        let mut file = file;
        file.seek(SeekFrom::Start(from)).await?;
        let mut remaining = length;
        while remaining > 0 {
            let read_len = DISK_READ_CHUNK.min(remaining as usize);
            let mut buffer = vec![0u8; read_len];
            let n = file.read(&mut buffer).await?;
            if n == 0 {
                break;
            }
            buffer.truncate(n);
            remaining -= n as u64;
            yield Bytes::from(buffer);
        }
    }
}

/// The remote may omit either the filename or the mime type; fill the gaps
/// the same way for both serving paths.
fn resolve_identity(descriptor: &TransferDescriptor) -> (String, String) {
    match (&descriptor.mime_type, &descriptor.file_name) {
        (Some(mime), Some(name)) => (mime.clone(), name.clone()),
        (Some(mime), None) => (mime.clone(), fallback_file_name(Some(mime))),
        (None, Some(name)) => (
            mime_for_file_name(name)
                .unwrap_or("application/octet-stream")
                .to_string(),
            name.clone(),
        ),
        (None, None) => (
            "application/octet-stream".to_string(),
            fallback_file_name(None),
        ),
    }
}

fn spawn_predictor(ctx: &Arc<AppContext>, container_id: ContainerId, file_name: String) {
    let predictor = Arc::clone(&ctx.predictor);
    tokio::spawn(async move {
        predictor.on_access(&container_id, &file_name).await;
    });
}

#[allow(clippy::too_many_arguments)]
fn media_response(
    status: StatusCode,
    mime_type: &str,
    file_name: &str,
    from: u64,
    until: u64,
    size: u64,
    x_cache: &str,
    body: Body,
) -> Response {
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, mime_type)
        .header(header::CONTENT_LENGTH, (until - from + 1).to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        )
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CACHE_CONTROL, "public, max-age=31536000")
        .header("X-Content-Type-Options", "nosniff")
        .header("X-Cache", x_cache);

    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {from}-{until}/{size}"),
        );
    }

    builder.body(body).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(mime: Option<&str>, name: Option<&str>) -> TransferDescriptor {
        TransferDescriptor {
            handle: "h".into(),
            size: 1,
            mime_type: mime.map(str::to_string),
            file_name: name.map(str::to_string),
            content_id: "ab12cd".into(),
        }
    }

    #[test]
    fn identity_prefers_remote_values() {
        let (mime, name) = resolve_identity(&descriptor(Some("video/mp4"), Some("a.mp4")));
        assert_eq!(mime, "video/mp4");
        assert_eq!(name, "a.mp4");
    }

    #[test]
    fn identity_guesses_mime_from_name() {
        let (mime, name) = resolve_identity(&descriptor(None, Some("a.mkv")));
        assert_eq!(mime, "video/x-matroska");
        assert_eq!(name, "a.mkv");

        let (mime, _) = resolve_identity(&descriptor(None, Some("a.weird")));
        assert_eq!(mime, "application/octet-stream");
    }

    #[test]
    fn identity_invents_name_from_mime() {
        let (mime, name) = resolve_identity(&descriptor(Some("video/mp4"), None));
        assert_eq!(mime, "video/mp4");
        assert!(name.ends_with(".mp4"));

        let (mime, name) = resolve_identity(&descriptor(None, None));
        assert_eq!(mime, "application/octet-stream");
        assert!(name.ends_with(".bin"));
    }
}
