//! # Response Cache Integration Tests
//!
//! Drives the cache coordinator against a counting mock forwarding engine to
//! check coalescing, expiry, failure handling and replay fidelity.

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use caching_proxy::caching::{CacheCoordinator, CacheOutcome, CacheStore, EntryStatus};
use caching_proxy::core::types::{OutboundRequest, UpstreamResponse};
use caching_proxy::{CacheKey, ForwardingEngine, ProxyError, ProxyResult};
use futures::stream::{self, StreamExt};
use std::io::Read;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Mock engine that counts calls and streams a fixed response in chunks
struct CountingEngine {
    calls: AtomicUsize,
    delay: Duration,
    failing: AtomicBool,
    chunks: Vec<&'static str>,
}

impl CountingEngine {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            failing: AtomicBool::new(false),
            chunks: vec!["hel", "lo"],
        })
    }

    fn with_chunks(delay: Duration, chunks: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            failing: AtomicBool::new(false),
            chunks,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ForwardingEngine for CountingEngine {
    async fn forward(&self, _request: OutboundRequest) -> ProxyResult<UpstreamResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sleep(self.delay).await;

        if self.failing.load(Ordering::SeqCst) {
            return Err(ProxyError::upstream("connection reset by peer"));
        }

        let mut headers = HeaderMap::new();
        headers.insert("x", HeaderValue::from_static("1"));
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        // Chunks arrive with a pause between them so waiters join mid-stream
        let delay = self.delay;
        let body = stream::iter(self.chunks.clone())
            .then(move |chunk| async move {
                sleep(delay / 4).await;
                Ok::<_, ProxyError>(Bytes::from_static(chunk.as_bytes()))
            })
            .boxed();

        Ok(UpstreamResponse::new(StatusCode::OK, headers, body))
    }
}

fn get(uri: &str) -> OutboundRequest {
    OutboundRequest::new(Method::GET, uri.parse().unwrap())
}

fn coordinator(engine: Arc<CountingEngine>, ttl: Option<Duration>) -> CacheCoordinator {
    CacheCoordinator::new(engine, ttl, Duration::from_secs(5))
}

#[tokio::test]
async fn test_single_flight_for_concurrent_callers() {
    let engine = CountingEngine::new(Duration::from_millis(100));
    let coordinator = coordinator(engine.clone(), Some(Duration::from_secs(60)));

    let mut handles = Vec::new();
    for _ in 0..50 {
        let coordinator = coordinator.clone();
        handles.push(tokio::spawn(async move {
            coordinator.handle(get("http://origin/resource")).await
        }));
    }

    let mut served = Vec::new();
    for handle in handles {
        served.push(handle.await.unwrap().unwrap());
    }

    assert_eq!(engine.calls(), 1);
    assert_eq!(
        served.iter().filter(|s| s.outcome == CacheOutcome::Miss).count(),
        1
    );

    let first = &served[0].response;
    for s in &served {
        assert!(Arc::ptr_eq(first, &s.response));
        assert_eq!(s.response.status, StatusCode::OK);
        assert_eq!(s.response.body, Bytes::from_static(b"hello"));
    }
}

#[tokio::test]
async fn test_distinct_keys_fetch_independently() {
    let engine = CountingEngine::new(Duration::from_millis(20));
    let coordinator = coordinator(engine.clone(), Some(Duration::from_secs(60)));

    let (a, b) = tokio::join!(
        coordinator.handle(get("http://origin/a")),
        coordinator.handle(get("http://origin/b")),
    );

    assert_eq!(a.unwrap().outcome, CacheOutcome::Miss);
    assert_eq!(b.unwrap().outcome, CacheOutcome::Miss);
    assert_eq!(engine.calls(), 2);
}

#[tokio::test]
async fn test_hit_before_ttl_and_refetch_after() {
    let engine = CountingEngine::new(Duration::ZERO);
    let coordinator = coordinator(engine.clone(), Some(Duration::from_millis(100)));

    let first = coordinator.handle(get("http://origin/ttl")).await.unwrap();
    let hit = coordinator.handle(get("http://origin/ttl")).await.unwrap();
    assert_eq!(hit.outcome, CacheOutcome::Hit);
    assert_eq!(engine.calls(), 1);

    sleep(Duration::from_millis(150)).await;

    let refetched = coordinator.handle(get("http://origin/ttl")).await.unwrap();
    assert_eq!(refetched.outcome, CacheOutcome::Miss);
    assert!(!Arc::ptr_eq(&first.response, &refetched.response));
    assert_eq!(engine.calls(), 2);
    assert_eq!(coordinator.store().len(), 1);
    assert_eq!(coordinator.store().stats().expired, 1);
}

#[tokio::test]
async fn test_non_positive_ttl_still_coalesces() {
    let engine = CountingEngine::new(Duration::from_millis(50));
    let coordinator = coordinator(engine.clone(), None);

    let (a, b) = tokio::join!(
        coordinator.handle(get("http://origin/nottl")),
        coordinator.handle(get("http://origin/nottl")),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(engine.calls(), 1);
    assert!(coordinator.store().is_empty());

    coordinator.handle(get("http://origin/nottl")).await.unwrap();
    assert_eq!(engine.calls(), 2);
}

#[tokio::test]
async fn test_failure_reaches_every_waiter_and_is_not_retained() {
    let engine = CountingEngine::new(Duration::from_millis(50));
    engine.set_failing(true);
    let coordinator = coordinator(engine.clone(), Some(Duration::from_secs(60)));

    let results = futures::future::join_all(
        (0..5).map(|_| coordinator.handle(get("http://origin/broken"))),
    )
    .await;

    assert_eq!(engine.calls(), 1);
    for result in &results {
        let err = result.as_ref().unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }
    assert!(coordinator.store().is_empty());
    assert_eq!(coordinator.store().stats().failures, 1);

    engine.set_failing(false);
    let recovered = coordinator.handle(get("http://origin/broken")).await.unwrap();
    assert_eq!(recovered.outcome, CacheOutcome::Miss);
    assert_eq!(engine.calls(), 2);
}

#[tokio::test]
async fn test_waiter_gives_up_after_request_timeout() {
    let engine = CountingEngine::new(Duration::from_millis(300));
    let slow = CacheCoordinator::new(
        engine.clone(),
        Some(Duration::from_secs(60)),
        Duration::from_secs(5),
    );
    let impatient = CacheCoordinator::new(
        engine.clone(),
        Some(Duration::from_secs(60)),
        Duration::from_millis(30),
    )
    .with_store(slow.store().clone());

    let owner = tokio::spawn({
        let slow = slow.clone();
        async move { slow.handle(get("http://origin/slow")).await }
    });
    sleep(Duration::from_millis(10)).await;

    let err = impatient
        .handle(get("http://origin/slow"))
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::Timeout { .. }));
    assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);

    // The owner's fetch is unaffected and the entry is still cached afterwards
    let served = owner.await.unwrap().unwrap();
    assert_eq!(served.response.body, Bytes::from_static(b"hello"));
    assert_eq!(engine.calls(), 1);

    let entry = slow
        .store()
        .get(&served.key)
        .expect("entry should be cached");
    assert_eq!(entry.status(), EntryStatus::Ready);
}

#[tokio::test]
async fn test_cancelled_owner_still_completes_fetch() {
    let engine = CountingEngine::new(Duration::from_millis(80));
    let coordinator = coordinator(engine.clone(), Some(Duration::from_secs(60)));

    let owner = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.handle(get("http://origin/cancel")).await }
    });
    sleep(Duration::from_millis(10)).await;

    let waiter = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.handle(get("http://origin/cancel")).await }
    });
    sleep(Duration::from_millis(10)).await;
    owner.abort();

    let served = waiter.await.unwrap().unwrap();
    assert_eq!(served.outcome, CacheOutcome::Coalesced);
    assert_eq!(served.response.body, Bytes::from_static(b"hello"));
    assert_eq!(engine.calls(), 1);
}

#[tokio::test]
async fn test_round_trip_fidelity() {
    let engine = CountingEngine::new(Duration::ZERO);
    let coordinator = coordinator(engine, Some(Duration::from_secs(60)));

    coordinator.handle(get("http://origin/fidelity")).await.unwrap();
    let replay = coordinator.handle(get("http://origin/fidelity")).await.unwrap();

    assert_eq!(replay.response.status, StatusCode::OK);
    assert_eq!(replay.response.headers.get("x").unwrap(), "1");
    let cookies: Vec<_> = replay
        .response
        .headers
        .get_all("set-cookie")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(cookies, vec!["a=1", "b=2"]);

    let mut body = Vec::new();
    replay.response.body_reader().read_to_end(&mut body).unwrap();
    assert_eq!(body, b"hello");
}

#[tokio::test]
async fn test_waiters_never_see_partial_body() {
    let chunks = vec!["a"; 64];
    let engine = CountingEngine::with_chunks(Duration::from_millis(40), chunks);
    let coordinator = coordinator(engine.clone(), Some(Duration::from_secs(60)));

    let owner = tokio::spawn({
        let coordinator = coordinator.clone();
        async move { coordinator.handle(get("http://origin/big")).await }
    });

    // Join at staggered points while the owner is still streaming
    let mut waiters = Vec::new();
    for i in 0..10 {
        let coordinator = coordinator.clone();
        waiters.push(tokio::spawn(async move {
            sleep(Duration::from_millis(5 * i)).await;
            coordinator.handle(get("http://origin/big")).await
        }));
    }

    let full = owner.await.unwrap().unwrap();
    assert_eq!(full.response.body.len(), 64);
    for waiter in waiters {
        let served = waiter.await.unwrap().unwrap();
        assert_eq!(served.response.body.len(), 64);
    }
}

#[tokio::test]
async fn test_shared_store_across_coordinators() {
    let store = CacheStore::new();
    let engine = CountingEngine::new(Duration::ZERO);
    let a = coordinator(engine.clone(), Some(Duration::from_secs(60))).with_store(store.clone());
    let b = coordinator(engine.clone(), Some(Duration::from_secs(60))).with_store(store.clone());

    a.handle(get("http://origin/shared")).await.unwrap();
    let served = b.handle(get("http://origin/shared")).await.unwrap();

    assert_eq!(served.outcome, CacheOutcome::Hit);
    assert_eq!(served.key, CacheKey::new("GEThttporigin/shared"));
    assert_eq!(engine.calls(), 1);
}
