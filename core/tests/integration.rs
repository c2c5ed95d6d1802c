//! End-to-end tests against the live mock server.
//!
//! # Design
//! Each test starts its own mock server on a random port (fresh data, fresh
//! hit counter) in a background thread with its own runtime, then drives a
//! `Coordinator` with the reqwest transport over real HTTP. The server's
//! `/stats` route tells how many exchanges actually reached it.

use std::net::SocketAddr;
use std::time::Duration;

use mock_server::PosterReceipt;
use netcache_core::{
    ApiError, ClientConfig, Coordinator, CoordinatorBuilder, FileUpload, HttpMethod, RequestModel, Resource, Route,
    TransportError,
};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Movie {
    title: String,
    year: String,
    rated: String,
}

impl Resource for Movie {
    const STORAGE_IDENTIFIER: &'static str = "movie";
}

#[derive(Debug, Deserialize)]
struct Stats {
    hits: u64,
}

impl Resource for Stats {
    const STORAGE_IDENTIFIER: &'static str = "stats";
}

fn start_server(delay: Duration) -> SocketAddr {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = std_listener.local_addr().unwrap();
    std_listener.set_nonblocking(true).unwrap();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
            mock_server::run_with_delay(listener, delay).await
        })
        .unwrap();
    });
    addr
}

fn coordinator(addr: SocketAddr) -> Coordinator {
    Coordinator::from_config(&ClientConfig::new(format!("http://{addr}"))).unwrap()
}

async fn hits(coordinator: &Coordinator) -> u64 {
    coordinator.get::<Stats>("/stats").await.unwrap().hits
}

fn movie(title: &str) -> RequestModel {
    RequestModel::new("/movie").param("t", title)
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_gets_share_one_exchange() {
    let addr = start_server(Duration::from_millis(200));
    let coordinator = coordinator(addr);

    let first = coordinator.get::<Movie>(movie("Hero"));
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = coordinator.get::<Movie>(movie("Hero"));
    assert_eq!(first.route(), Route::Dispatched);
    assert_eq!(second.route(), Route::Coalesced);

    let (first, second) = tokio::join!(first, second);
    let first = first.unwrap();
    assert_eq!(first.title, "Hero");
    assert_eq!(first, second.unwrap());
    assert_eq!(hits(&coordinator).await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_after_fetch_serves_cache() {
    let addr = start_server(Duration::ZERO);
    let coordinator = coordinator(addr);

    let online = coordinator.get::<Movie>(movie("Her").persist()).await.unwrap();
    assert_eq!(online.year, "2013");

    coordinator.gate().set_reachable(false);
    let pending = coordinator.get::<Movie>(movie("Her").persist());
    assert_eq!(pending.route(), Route::Offline);
    assert_eq!(pending.await.unwrap(), online);

    let err = coordinator
        .get::<Movie>(movie("Hero").cache_key("hero"))
        .await
        .unwrap_err();
    assert_eq!(err, ApiError::NoConnection);

    coordinator.gate().set_reachable(true);
    assert_eq!(hits(&coordinator).await, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn encrypted_cache_survives_restart() {
    let addr = start_server(Duration::ZERO);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("netcache.json");

    let mut config = ClientConfig::new(format!("http://{addr}"));
    config.cache.path = Some(path.clone());
    config.cache.encryption_key = Some("integration".to_string());

    let first = Coordinator::from_config(&config).unwrap();
    let fetched = first.get::<Movie>(movie("The Green Mile").persist()).await.unwrap();
    first.cache().flushed().await;
    drop(first);

    let on_disk = std::fs::read_to_string(&path).unwrap();
    assert!(!on_disk.contains("Green Mile"));

    config.start_online = false;
    let second = Coordinator::from_config(&config).unwrap();
    let cached = second.get::<Movie>(movie("The Green Mile").persist()).await.unwrap();
    assert_eq!(cached, fetched);
}

#[tokio::test(flavor = "multi_thread")]
async fn crud_lifecycle() {
    let addr = start_server(Duration::ZERO);
    let coordinator = coordinator(addr);

    let movies = coordinator.get_all::<Movie>("/movies").await.unwrap();
    assert_eq!(movies.len(), 3);

    let created = coordinator
        .post::<Movie>(
            RequestModel::new("/movies")
                .param("Title", "Up")
                .param("Year", "2009")
                .param("Rated", "PG"),
        )
        .await
        .unwrap();
    assert_eq!(created.title, "Up");

    let updated = coordinator
        .put::<Movie>(
            RequestModel::new("/movies/{}")
                .endpoint_param("Up")
                .param("Rated", "G"),
        )
        .await
        .unwrap();
    assert_eq!(updated.rated, "G");

    let fetched = coordinator.get::<Movie>(movie("Up")).await.unwrap();
    assert_eq!(fetched, updated);

    coordinator
        .delete(RequestModel::new("/movies/{}").endpoint_param("Up"))
        .await
        .unwrap();

    let err = coordinator.get::<Movie>(movie("Up")).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
}

#[tokio::test(flavor = "multi_thread")]
async fn conflict_is_a_status_error() {
    let addr = start_server(Duration::ZERO);
    let coordinator = coordinator(addr);
    let err = coordinator
        .status(
            HttpMethod::Post,
            RequestModel::new("/movies").param("Title", "Her").param("Year", "2013"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(409));
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_server_times_out() {
    let addr = start_server(Duration::from_millis(500));
    let config = ClientConfig::new(format!("http://{addr}"));
    let coordinator = CoordinatorBuilder::from_config(&config)
        .unwrap()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let err = coordinator.get::<Movie>(movie("Hero")).await.unwrap_err();
    assert_eq!(err, ApiError::Transport(TransportError::Timeout));
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_stops_a_slow_exchange() {
    let addr = start_server(Duration::from_millis(300));
    let coordinator = coordinator(addr);

    let pending = coordinator.get::<Movie>(movie("Hero").persist());
    let fingerprint = pending.fingerprint().clone();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(coordinator.cancel(&fingerprint));

    assert_eq!(pending.await.unwrap_err(), ApiError::Cancelled);
    assert!(coordinator.cache().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_server_is_a_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let coordinator = coordinator(addr);
    let err = coordinator.get::<Movie>(movie("Hero")).await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(TransportError::Network(_))));
}

#[tokio::test(flavor = "multi_thread")]
async fn uploaded_poster_downloads_under_its_own_name() {
    let addr = start_server(Duration::ZERO);
    let coordinator = coordinator(addr);
    let dir = tempfile::tempdir().unwrap();
    let image = vec![0x89, b'P', b'N', b'G', 0, 1, 2, 3];

    let upload = RequestModel::new("/posters/{}")
        .endpoint_param("Hero")
        .param("caption", "Theatrical")
        .upload(FileUpload::new("poster", "hero.png", "image/png", image.clone()));
    let payload = coordinator.raw(HttpMethod::Post, upload).await.unwrap();
    let receipt: PosterReceipt = serde_json::from_slice(&payload.body).unwrap();
    assert_eq!(receipt.file_name, "hero.png");
    assert_eq!(receipt.size, image.len());
    assert_eq!(receipt.caption.as_deref(), Some("Theatrical"));

    let path = coordinator
        .download(RequestModel::new("/posters/Hero"), dir.path())
        .await
        .unwrap();
    assert_eq!(path, dir.path().join("hero.png"));
    assert_eq!(std::fs::read(&path).unwrap(), image);
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_download_writes_nothing() {
    let addr = start_server(Duration::ZERO);
    let coordinator = coordinator(addr);
    let dir = tempfile::tempdir().unwrap();

    let err = coordinator
        .download(RequestModel::new("/posters/Her"), dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Transport(TransportError::Status { status: 404, .. })));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
