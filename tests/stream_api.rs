//! End-to-end scenarios over the HTTP router, with the remote store mocked
//! at the wire level and a real cache on a temp directory.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use tidegate::cache::{CacheStore, Populator, Predictor};
use tidegate::db::Database;
use tidegate::db::repository::{
    CacheRepository, CacheRepositoryImpl, CatalogRepository, CatalogRepositoryImpl,
    NewCatalogFile,
};
use tidegate::models::{CacheKey, ContainerId, ItemId};
use tidegate::remote::{CHUNK_SIZE, HttpRemoteStore, SessionPool};
use tidegate::server::render::BasicPageRenderer;
use tidegate::server::{AppContext, build_router};

struct TestGateway {
    app: Router,
    server: mockito::ServerGuard,
    store: Arc<CacheStore>,
    index: Arc<CacheRepositoryImpl>,
    catalog: Arc<CatalogRepositoryImpl>,
    populator: Arc<Populator>,
    _tmp: TempDir,
}

async fn gateway(cache_enabled: bool) -> TestGateway {
    let server = mockito::Server::new_async().await;
    let tmp = TempDir::new().unwrap();

    let db = Database::connect_in_memory().await.unwrap();
    db.migrate().await.unwrap();
    let index = Arc::new(CacheRepositoryImpl::new(db.get_connection()));
    let catalog = Arc::new(CatalogRepositoryImpl::new(db.get_connection()));

    let remote = Arc::new(
        HttpRemoteStore::new(server.url(), &["tok-a".to_string(), "tok-b".to_string()]).unwrap(),
    );
    let pool = Arc::new(SessionPool::new(2));
    let store = Arc::new(
        CacheStore::new(
            tmp.path().join("cache"),
            10 * 1024 * 1024 * 1024,
            index.clone(),
        )
        .await
        .unwrap(),
    );
    let populator = Arc::new(Populator::new(
        store.clone(),
        remote.clone(),
        pool.clone(),
        CancellationToken::new(),
        cache_enabled,
    ));
    let predictor = Arc::new(Predictor::new(
        catalog.clone(),
        remote.clone(),
        pool.clone(),
        store.clone(),
        populator.clone(),
    ));

    let ctx = Arc::new(AppContext {
        remote,
        pool,
        store: store.clone(),
        catalog: catalog.clone(),
        populator: populator.clone(),
        predictor,
        renderer: Arc::new(BasicPageRenderer),
        cache_enabled,
    });

    TestGateway {
        app: build_router(ctx),
        server,
        store,
        index,
        catalog,
        populator,
        _tmp: tmp,
    }
}

fn fixture_file(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Mock the remote metadata and chunk endpoints for one item.
async fn mock_remote_file(
    server: &mut mockito::ServerGuard,
    container: &str,
    item: &str,
    handle: &str,
    content_id: &str,
    name: &str,
    file: &[u8],
) {
    server
        .mock(
            "GET",
            format!("/containers/{container}/items/{item}").as_str(),
        )
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(format!(
            r#"{{"handle":"{handle}","size":{},"mime_type":"video/mp4","file_name":"{name}","content_id":"{content_id}"}}"#,
            file.len()
        ))
        .create_async()
        .await;

    let mut offset = 0usize;
    while offset < file.len() || offset == 0 {
        let end = (offset + CHUNK_SIZE as usize).min(file.len());
        server
            .mock("GET", format!("/media/{handle}/chunk").as_str())
            .match_query(mockito::Matcher::UrlEncoded(
                "offset".into(),
                offset.to_string(),
            ))
            .with_status(200)
            .with_body(&file[offset..end])
            .create_async()
            .await;
        if end == file.len() {
            break;
        }
        offset = end;
    }
}

async fn get(app: &Router, uri: &str, range: Option<&str>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    request(app, "GET", uri, range).await
}

async fn head(app: &Router, uri: &str, range: Option<&str>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    request(app, "HEAD", uri, range).await
}

async fn request(
    app: &Router,
    method: &str,
    uri: &str,
    range: Option<&str>,
) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(range) = range {
        request = request.header(header::RANGE, range);
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec();
    (status, headers, body)
}

fn header_str<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .map(|v| v.to_str().unwrap())
        .unwrap_or_default()
}

#[tokio::test]
async fn cold_range_round_trip() {
    let mut gw = gateway(false).await;
    let file = fixture_file(2_500_000);
    mock_remote_file(&mut gw.server, "C", "17", "h-1", "ab12cd34", "a.mp4", &file).await;

    let (status, headers, body) = get(
        &gw.app,
        "/C/a.mp4?id=17&hash=ab12cd",
        Some("bytes=1048575-2097151"),
    )
    .await;

    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        header_str(&headers, "content-range"),
        "bytes 1048575-2097151/2500000"
    );
    assert_eq!(header_str(&headers, "x-cache"), "MISS");
    assert_eq!(header_str(&headers, "accept-ranges"), "bytes");
    assert_eq!(header_str(&headers, "content-type"), "video/mp4");
    assert_eq!(
        header_str(&headers, "cache-control"),
        "public, max-age=31536000"
    );
    assert_eq!(body, &file[1_048_575..=2_097_151]);
}

#[tokio::test]
async fn head_request_returns_headers_without_body() {
    let mut gw = gateway(false).await;
    let file = fixture_file(2_500_000);
    mock_remote_file(&mut gw.server, "C", "17", "h-1", "ab12cd34", "a.mp4", &file).await;

    let (status, headers, body) = head(
        &gw.app,
        "/C/a.mp4?id=17&hash=ab12cd",
        Some("bytes=0-1023"),
    )
    .await;

    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&headers, "content-length"), "1024");
    assert_eq!(header_str(&headers, "content-range"), "bytes 0-1023/2500000");
    assert_eq!(header_str(&headers, "x-cache"), "MISS");
    assert!(body.is_empty());

    let (status, headers, body) = head(&gw.app, "/watch/C?id=17&hash=ab12cd", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(header_str(&headers, "content-type").starts_with("text/html"));
    assert_ne!(header_str(&headers, "content-length"), "0");
    assert!(body.is_empty());
}

#[tokio::test]
async fn whole_file_without_range_is_200() {
    let mut gw = gateway(false).await;
    let file = fixture_file(100_000);
    mock_remote_file(&mut gw.server, "C", "17", "h-1", "ab12cd34", "a.mp4", &file).await;

    let (status, headers, body) = get(&gw.app, "/C/a.mp4?id=17&hash=ab12cd", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(headers.get("content-range").is_none());
    assert_eq!(header_str(&headers, "content-length"), "100000");
    assert_eq!(body, file);
}

#[tokio::test]
async fn invalid_range_is_416() {
    let mut gw = gateway(false).await;
    let file = fixture_file(2_500_000);
    mock_remote_file(&mut gw.server, "C", "17", "h-1", "ab12cd34", "a.mp4", &file).await;

    let (status, headers, _) = get(
        &gw.app,
        "/C/a.mp4?id=17&hash=ab12cd",
        Some("bytes=3000000-4000000"),
    )
    .await;

    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(header_str(&headers, "content-range"), "bytes */2500000");
}

#[tokio::test]
async fn wrong_hash_is_403() {
    let mut gw = gateway(false).await;
    let file = fixture_file(1000);
    mock_remote_file(&mut gw.server, "C", "17", "h-1", "ab12cd34", "a.mp4", &file).await;

    let (status, _, _) = get(&gw.app, "/C/a.mp4?id=17&hash=zzzzzz", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn missing_item_is_404_and_prunes_catalog() {
    let mut gw = gateway(false).await;
    gw.server
        .mock("GET", "/containers/C/items/17")
        .with_status(404)
        .create_async()
        .await;
    gw.catalog
        .upsert_file(NewCatalogFile {
            container_id: "C".to_string(),
            item_id: "17".to_string(),
            content_id: "ab12cd".to_string(),
            file_name: "gone.mp4".to_string(),
            file_size: None,
            mime_type: None,
        })
        .await
        .unwrap();

    let (status, _, _) = get(&gw.app, "/C/gone.mp4?id=17&hash=ab12cd", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let still_there = gw
        .catalog
        .find_by_container_and_title_regex(&ContainerId::from("C"), "^gone.*")
        .await
        .unwrap();
    assert!(still_there.is_none());
}

#[tokio::test]
async fn cache_hit_serves_disk_and_bumps_hits() {
    let mut gw = gateway(true).await;
    let file = fixture_file(1000);
    mock_remote_file(&mut gw.server, "C", "17", "h-1", "ab12cd34", "a.mp4", &file).await;

    // Pre-populate the cache for this key.
    let key = CacheKey::new(ContainerId::from("C"), ItemId::from("17"), "ab12cd");
    let path = gw.store.entry_path(&key, Some("a.mp4"), None);
    tokio::fs::write(&path, &file).await.unwrap();
    gw.store
        .commit(
            &key,
            &path,
            file.len() as u64,
            Some("video/mp4".to_string()),
            Some("a.mp4".to_string()),
        )
        .await
        .unwrap();

    let (status, headers, body) = get(
        &gw.app,
        "/C/a.mp4?id=17&hash=ab12cd",
        Some("bytes=0-999"),
    )
    .await;

    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(header_str(&headers, "x-cache"), "HIT");
    assert_eq!(header_str(&headers, "content-range"), "bytes 0-999/1000");
    assert_eq!(body, file);

    let entry = gw.index.get(&key.to_string()).await.unwrap().unwrap();
    assert_eq!(entry.hits, 2);
}

#[tokio::test]
async fn cache_hit_partial_range_matches_file_slice() {
    let mut gw = gateway(true).await;
    let file = fixture_file(10_000);
    mock_remote_file(&mut gw.server, "C", "17", "h-1", "ab12cd34", "a.mp4", &file).await;

    let key = CacheKey::new(ContainerId::from("C"), ItemId::from("17"), "ab12cd");
    let path = gw.store.entry_path(&key, Some("a.mp4"), None);
    tokio::fs::write(&path, &file).await.unwrap();
    gw.store
        .commit(&key, &path, file.len() as u64, None, Some("a.mp4".into()))
        .await
        .unwrap();

    let (status, _, body) = get(
        &gw.app,
        "/C/a.mp4?id=17&hash=ab12cd",
        Some("bytes=2500-7499"),
    )
    .await;

    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(body, &file[2500..=7499]);
}

#[tokio::test]
async fn parallel_misses_populate_once() {
    let mut gw = gateway(true).await;
    let file = fixture_file(300_000);
    mock_remote_file(&mut gw.server, "C", "17", "h-1", "ab12cd34", "a.mp4", &file).await;

    let mut handles = Vec::new();
    for _ in 0..10 {
        let app = gw.app.clone();
        handles.push(tokio::spawn(async move {
            let (status, headers, body) = get(&app, "/C/a.mp4?id=17&hash=ab12cd", None).await;
            (status, header_str(&headers, "x-cache").to_string(), body)
        }));
    }
    for handle in handles {
        let (status, x_cache, body) = handle.await.unwrap();
        assert_eq!(status, StatusCode::OK);
        assert!(x_cache == "MISS" || x_cache == "HIT");
        assert_eq!(body, file);
    }

    // Single-flight admission: the ten misses collapse to one population.
    let key = CacheKey::new(ContainerId::from("C"), ItemId::from("17"), "ab12cd");
    wait_for(|| {
        let index = gw.index.clone();
        let populator = gw.populator.clone();
        let key = key.clone();
        async move { index.count().await.unwrap() == 1 && !populator.is_downloading(&key) }
    })
    .await;

    let entry = gw
        .index
        .get("C:17:ab12cd")
        .await
        .unwrap()
        .expect("entry committed");
    assert_eq!(entry.file_size, file.len() as i64);
    let cached = tokio::fs::read(&entry.file_path).await.unwrap();
    assert_eq!(cached, file);
}

#[tokio::test]
async fn miss_then_predictor_prefetches_next_episode() {
    let mut gw = gateway(true).await;
    let episode4 = fixture_file(50_000);
    let episode5 = fixture_file(60_000);
    mock_remote_file(
        &mut gw.server,
        "C",
        "17",
        "h-4",
        "ab12cd34",
        "Show - 04 [1080p].mkv",
        &episode4,
    )
    .await;
    mock_remote_file(
        &mut gw.server,
        "C",
        "99",
        "h-5",
        "xyz789ab",
        "Show - 05 [1080p].mkv",
        &episode5,
    )
    .await;
    gw.catalog
        .upsert_file(NewCatalogFile {
            container_id: "C".to_string(),
            item_id: "99".to_string(),
            content_id: "xyz789".to_string(),
            file_name: "Show - 05 [1080p].mkv".to_string(),
            file_size: Some(episode5.len() as i64),
            mime_type: Some("video/x-matroska".to_string()),
        })
        .await
        .unwrap();

    let (status, _, body) = get(&gw.app, "/C/e4.mkv?id=17&hash=ab12cd", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, episode4);

    // Both the watched episode and the predicted next one end up cached.
    wait_for(|| {
        let index = gw.index.clone();
        async move { index.count().await.unwrap() == 2 }
    })
    .await;

    let next = gw.index.get("C:99:xyz789").await.unwrap().unwrap();
    assert_eq!(next.file_size, episode5.len() as i64);
}

#[tokio::test]
async fn watch_page_renders_player() {
    let gw = gateway(false).await;
    let (status, headers, body) = get(&gw.app, "/watch/C?id=17&hash=ab12cd", None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(header_str(&headers, "content-type").starts_with("text/html"));
    let html = String::from_utf8(body).unwrap();
    assert!(html.contains("/C/stream?id=17&hash=ab12cd"));
}

#[tokio::test]
async fn thumbnail_passthrough() {
    let mut gw = gateway(false).await;
    gw.server
        .mock("GET", "/containers/C/items/17/thumb")
        .with_status(200)
        .with_body(b"\xff\xd8jpeg-bytes")
        .create_async()
        .await;

    let (status, headers, body) = get(&gw.app, "/api/thumb/C?id=17", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_str(&headers, "content-type"), "image/jpeg");
    assert_eq!(body, b"\xff\xd8jpeg-bytes");

    let (status, headers, body) = head(&gw.app, "/api/thumb/C?id=17", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(header_str(&headers, "content-length"), "12");
    assert!(body.is_empty());
}

/// Poll a condition until it holds or a generous deadline passes.
async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached within deadline");
}
