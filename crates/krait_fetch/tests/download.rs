//! End-to-end download tests against a loopback server and local files.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use axum::{http::StatusCode, routing::get, Router};
use krait_digest::{compute_bytes_digest, Sha256};
use krait_fetch::{
    Checksum, DownloadError, DownloadRequest, Downloader, FileMirror, HttpMirror, Mirror,
};

const CONTENT: &[u8] = b"pretend this is a conda package";

fn checksum_of(content: &[u8]) -> Checksum {
    Checksum::Sha256(compute_bytes_digest::<Sha256>(content))
}

/// Spawns a server that answers `/pkg.conda` with `fail_times` 503s before
/// succeeding. Returns its base URL.
async fn spawn_server(fail_times: usize) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let handler_hits = hits.clone();
    let app = Router::new().route(
        "/pkg.conda",
        get(move || {
            let hits = handler_hits.clone();
            async move {
                if hits.fetch_add(1, Ordering::SeqCst) < fail_times {
                    (StatusCode::SERVICE_UNAVAILABLE, Vec::new())
                } else {
                    (StatusCode::OK, CONTENT.to_vec())
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/"), hits)
}

#[tokio::test]
async fn test_file_mirror_download_with_verification() {
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("pkg.conda"), CONTENT).unwrap();
    let dest = tempfile::tempdir().unwrap();

    let mirror: Arc<dyn Mirror> = Arc::new(FileMirror::new(source.path()).unwrap());
    let downloader = Downloader::new(reqwest::Client::new());
    let results = downloader
        .run(vec![DownloadRequest {
            mirrors: vec![mirror],
            path: "pkg.conda".to_string(),
            expected: Some(checksum_of(CONTENT)),
            size_hint: Some(CONTENT.len() as u64),
            destination: dest.path().join("pkg.conda"),
        }])
        .await;

    let (index, result) = results.into_iter().next().unwrap();
    assert_eq!(index, 0);
    let result = result.unwrap();
    assert_eq!(result.bytes, CONTENT.len() as u64);
    assert_eq!(std::fs::read(result.path).unwrap(), CONTENT);
}

#[tokio::test]
async fn test_file_mirror_checksum_mismatch_is_fatal() {
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("pkg.conda"), b"unexpected bytes").unwrap();
    let dest = tempfile::tempdir().unwrap();

    let mirror: Arc<dyn Mirror> = Arc::new(FileMirror::new(source.path()).unwrap());
    let downloader = Downloader::new(reqwest::Client::new());
    let results = downloader
        .run(vec![DownloadRequest {
            mirrors: vec![mirror.clone()],
            path: "pkg.conda".to_string(),
            expected: Some(checksum_of(CONTENT)),
            size_hint: None,
            destination: dest.path().join("pkg.conda"),
        }])
        .await;

    let (_, result) = results.into_iter().next().unwrap();
    // Local sources are never retried: one failed transfer, no more.
    assert!(matches!(result, Err(DownloadError::LocalFile { .. })));
    assert_eq!(mirror.stats().lock().failed_transfers, 1);
}

#[tokio::test]
async fn test_failing_mirror_fails_over_to_the_next() {
    let (failing_url, failing_hits) = spawn_server(usize::MAX).await;
    let (good_url, good_hits) = spawn_server(0).await;
    let dest = tempfile::tempdir().unwrap();

    let failing: Arc<dyn Mirror> = Arc::new(HttpMirror::new(failing_url.parse().unwrap()));
    let good: Arc<dyn Mirror> = Arc::new(HttpMirror::new(good_url.parse().unwrap()));

    let downloader = Downloader::new(reqwest::Client::new()).with_max_retries(3);
    let results = downloader
        .run(vec![DownloadRequest {
            mirrors: vec![failing.clone(), good.clone()],
            path: "pkg.conda".to_string(),
            expected: Some(checksum_of(CONTENT)),
            size_hint: None,
            destination: dest.path().join("pkg.conda"),
        }])
        .await;

    let (_, result) = results.into_iter().next().unwrap();
    let result = result.unwrap();
    assert_eq!(std::fs::read(&result.path).unwrap(), CONTENT);
    assert_eq!(result.mirror, good.id());

    // The failing mirror recorded its failure, the good one its success.
    assert_eq!(failing_hits.load(Ordering::SeqCst), 1);
    assert_eq!(good_hits.load(Ordering::SeqCst), 1);
    assert_eq!(failing.stats().lock().failed_transfers, 1);
    assert_eq!(good.stats().lock().successful_transfers, 1);
}

#[tokio::test]
async fn test_retry_attempts_are_bounded() {
    let (url, hits) = spawn_server(usize::MAX).await;
    let dest = tempfile::tempdir().unwrap();

    let mirror: Arc<dyn Mirror> = Arc::new(HttpMirror::new(url.parse().unwrap()));
    let downloader = Downloader::new(reqwest::Client::new()).with_max_retries(2);
    let results = downloader
        .run(vec![DownloadRequest {
            mirrors: vec![mirror],
            path: "pkg.conda".to_string(),
            expected: None,
            size_hint: None,
            destination: dest.path().join("pkg.conda"),
        }])
        .await;

    let (_, result) = results.into_iter().next().unwrap();
    match result {
        Err(DownloadError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected exhausted retries, got {other:?}"),
    }
    // At most 1 + max_retries transfers hit the network.
    assert!(hits.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_results_arrive_in_completion_order() {
    let source = tempfile::tempdir().unwrap();
    for name in ["a.conda", "b.conda", "c.conda"] {
        std::fs::write(source.path().join(name), CONTENT).unwrap();
    }
    let dest = tempfile::tempdir().unwrap();
    let mirror: Arc<dyn Mirror> = Arc::new(FileMirror::new(source.path()).unwrap());

    let downloader = Downloader::new(reqwest::Client::new()).with_max_parallel(2);
    let requests = ["a.conda", "b.conda", "c.conda"]
        .into_iter()
        .map(|name| DownloadRequest {
            mirrors: vec![mirror.clone()],
            path: name.to_string(),
            expected: None,
            size_hint: None,
            destination: dest.path().join(name),
        })
        .collect();
    let results = downloader.run(requests).await;

    assert_eq!(results.len(), 3);
    for (_, result) in results {
        result.unwrap();
    }
    assert_eq!(mirror.stats().lock().successful_transfers, 3);
}

#[tokio::test]
async fn test_cancellation_aborts_requests() {
    let source = tempfile::tempdir().unwrap();
    std::fs::write(source.path().join("pkg.conda"), CONTENT).unwrap();
    let dest = tempfile::tempdir().unwrap();
    let mirror: Arc<dyn Mirror> = Arc::new(FileMirror::new(source.path()).unwrap());

    let cancel = Arc::new(AtomicBool::new(true));
    let downloader = Downloader::new(reqwest::Client::new()).with_cancel_flag(cancel);
    let results = downloader
        .run(vec![DownloadRequest {
            mirrors: vec![mirror],
            path: "pkg.conda".to_string(),
            expected: None,
            size_hint: None,
            destination: dest.path().join("pkg.conda"),
        }])
        .await;

    let (_, result) = results.into_iter().next().unwrap();
    assert!(matches!(result, Err(DownloadError::Cancelled)));
}
