//! Position feed integration tests: the ingest/read endpoints, the HTTP feed
//! client, and the live polling loop against a real listener.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use pointgate::identity::SessionManager;
use pointgate::poller::{spawn_poller, FetchError, HttpFeed, PollerConfig, PositionFeed, PositionSink};
use pointgate::server::{app, AppState};
use pointgate::store::{MemStore, PortalStore, PositionSample};

async fn spawn_app(store: Arc<dyn PortalStore>) -> String {
    let state = AppState { store, sessions: SessionManager::default() };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app(state)).await.expect("serve");
    });
    format!("http://{}", addr)
}

#[derive(Default)]
struct CollectingSink {
    samples: Mutex<Vec<PositionSample>>,
}

impl CollectingSink {
    fn samples(&self) -> Vec<PositionSample> {
        self.samples.lock().clone()
    }
}

impl PositionSink for CollectingSink {
    fn update(&self, sample: PositionSample) {
        self.samples.lock().push(sample);
    }
}

#[tokio::test]
async fn latest_position_is_404_before_any_sample() {
    let base = spawn_app(Arc::new(MemStore::new())).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{base}/api/getLatestPosition"))
        .send()
        .await
        .expect("get position");
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.expect("body");
    assert_eq!(body["code"], "no_position");
}

#[tokio::test]
async fn only_the_freshest_sample_is_surfaced() {
    let base = spawn_app(Arc::new(MemStore::new())).await;
    let client = reqwest::Client::new();

    for sample in [
        serde_json::json!({"lat": 24.8607, "lng": 67.0011}),
        serde_json::json!({"lat": 24.8700, "lng": 67.0100}),
    ] {
        let resp = client
            .post(format!("{base}/api/position"))
            .json(&sample)
            .send()
            .await
            .expect("report");
        assert_eq!(resp.status(), 200);
    }

    let body: serde_json::Value = client
        .get(format!("{base}/api/getLatestPosition"))
        .send()
        .await
        .expect("get position")
        .json()
        .await
        .expect("body");
    assert_eq!(body["lat"], 24.8700);
    assert_eq!(body["lng"], 67.0100);
}

#[tokio::test]
async fn http_feed_decodes_the_live_endpoint() {
    let store = Arc::new(MemStore::new());
    let base = spawn_app(store.clone()).await;

    let feed = HttpFeed::new(&base, Duration::from_millis(2_000)).expect("feed");

    // Before any sample the endpoint answers 404, which the feed reports as
    // a status failure for the poller to log and ride out.
    let err = feed.latest().await.unwrap_err();
    assert!(matches!(err, FetchError::Status(404)));

    store
        .record_position(PositionSample { lat: 40.7128, lng: -74.0060 })
        .await
        .expect("record");
    let sample = feed.latest().await.expect("latest");
    assert_eq!(sample, PositionSample { lat: 40.7128, lng: -74.0060 });
}

#[tokio::test]
async fn live_poller_forwards_samples_until_cancelled() {
    let store = Arc::new(MemStore::new());
    store
        .record_position(PositionSample { lat: 31.5204, lng: 74.3587 })
        .await
        .expect("record");
    let base = spawn_app(store).await;

    let feed = Arc::new(HttpFeed::new(&base, Duration::from_millis(2_000)).expect("feed"));
    let sink = Arc::new(CollectingSink::default());
    let handle = spawn_poller(
        feed,
        sink.clone(),
        PollerConfig { interval: Duration::from_millis(25) },
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handle.is_alive());
    let seen = sink.samples();
    assert!(!seen.is_empty(), "poller should have delivered at least one sample");
    assert_eq!(seen[0], PositionSample { lat: 31.5204, lng: 74.3587 });

    handle.shutdown().await;
    // Let any fetch that was already in flight at cancellation land first.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let after = sink.samples().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.samples().len(), after, "no updates after cancellation");
}
