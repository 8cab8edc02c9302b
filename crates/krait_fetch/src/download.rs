//! The request driver. See [`Downloader`].

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use futures::{stream::FuturesUnordered, StreamExt};
use krait_digest::{digest::Digest, Md5, Md5Hash, Sha256, Sha256Hash};
use retry_policies::{policies::ExponentialBackoff, RetryDecision, RetryPolicy};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::mirror::{Mirror, RequestShape};

/// The expected checksum of a transfer. SHA256 is preferred; MD5 is kept for
/// old repodata that lacks SHA256 fields.
#[derive(Debug, Clone, Copy)]
pub enum Checksum {
    /// A SHA256 digest.
    Sha256(Sha256Hash),
    /// An MD5 digest.
    Md5(Md5Hash),
}

/// One download: a relative path resolved against a list of equivalent
/// mirrors, verified and written to `destination`.
pub struct DownloadRequest {
    /// The mirrors that can serve this content, most preferred first.
    pub mirrors: Vec<Arc<dyn Mirror>>,

    /// The path of the content relative to every mirror's root.
    pub path: String,

    /// The checksum the content must match, when known.
    pub expected: Option<Checksum>,

    /// The expected content length, used only as a hint.
    pub size_hint: Option<u64>,

    /// Where the verified bytes end up.
    pub destination: PathBuf,
}

/// The success value of one request.
#[derive(Debug)]
pub struct DownloadResult {
    /// The destination the content was written to.
    pub path: PathBuf,

    /// The number of bytes transferred.
    pub bytes: u64,

    /// The id of the mirror that served the successful transfer.
    pub mirror: String,
}

/// The failure value of one request.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The server answered with a non-success status.
    #[error("{url} returned HTTP status {status}")]
    HttpStatus {
        /// The status code of the response.
        status: reqwest::StatusCode,
        /// The URL that was fetched.
        url: Url,
    },

    /// The HTTP client failed (connect, timeout, protocol).
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// The transferred content did not match its expected checksum.
    #[error("checksum mismatch for {url}")]
    ChecksumMismatch {
        /// The URL that was fetched.
        url: Url,
    },

    /// A `file://` source could not be read. Never retried.
    #[error("failed to read local file {url}")]
    LocalFile {
        /// The file URL.
        url: Url,
        /// The underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// Writing the destination failed.
    #[error("failed to write {}", .path.display())]
    Destination {
        /// The destination path.
        path: PathBuf,
        /// The underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// The request carried no mirrors.
    #[error("no mirror available for '{0}'")]
    NoMirror(String),

    /// All retry attempts failed; carries the final error.
    #[error("giving up on '{path}' after {attempts} attempts")]
    RetriesExhausted {
        /// The requested path.
        path: String,
        /// How many transfers were attempted.
        attempts: u32,
        /// The error of the final attempt.
        #[source]
        last: Box<DownloadError>,
    },

    /// The download was cancelled.
    #[error("the download was cancelled")]
    Cancelled,
}

impl DownloadError {
    /// Transient failures are worth another attempt, preferably against a
    /// different mirror.
    fn is_transient(&self) -> bool {
        match self {
            DownloadError::HttpStatus { status, .. } => {
                status.is_server_error()
                    || *status == reqwest::StatusCode::REQUEST_TIMEOUT
                    || *status == reqwest::StatusCode::TOO_MANY_REQUESTS
            }
            DownloadError::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            DownloadError::ChecksumMismatch { .. } => true,
            DownloadError::LocalFile { .. }
            | DownloadError::Destination { .. }
            | DownloadError::NoMirror(_)
            | DownloadError::RetriesExhausted { .. }
            | DownloadError::Cancelled => false,
        }
    }
}

/// Drives many [`DownloadRequest`]s concurrently.
///
/// The global parallelism cap bounds the transfers in flight across all
/// requests; every mirror additionally admits transfers against its own
/// connection budget. Results are yielded in completion order.
pub struct Downloader {
    client: reqwest::Client,
    max_parallel: usize,
    max_retries: u32,
    retry_policy: ExponentialBackoff,
    cancel: Option<Arc<AtomicBool>>,
}

impl Downloader {
    /// Creates a downloader with the given HTTP client, a parallelism cap of
    /// 5 and 3 retries per request.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            max_parallel: 5,
            max_retries: 3,
            retry_policy: ExponentialBackoff::builder()
                .retry_bounds(Duration::from_millis(250), Duration::from_secs(30))
                .build_with_max_retries(3),
            cancel: None,
        }
    }

    /// Caps the number of transfers in flight at once.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Sets the number of retries per request; the total number of attempts
    /// is `1 + max_retries`.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self.retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(250), Duration::from_secs(30))
            .build_with_max_retries(max_retries);
        self
    }

    /// Installs a cancellation flag checked between body chunks.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Runs all requests to completion and returns `(request index, result)`
    /// pairs in the order the transfers finished.
    pub async fn run(
        &self,
        requests: Vec<DownloadRequest>,
    ) -> Vec<(usize, Result<DownloadResult, DownloadError>)> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.max_parallel));
        let mut in_flight: FuturesUnordered<_> = requests
            .into_iter()
            .enumerate()
            .map(|(index, request)| {
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .expect("the semaphore is never closed");
                    (index, self.execute(request).await)
                }
            })
            .collect();

        let mut results = Vec::with_capacity(in_flight.len());
        while let Some(result) = in_flight.next().await {
            results.push(result);
        }
        results
    }

    /// Runs a single request, rotating through mirrors on transient
    /// failures.
    async fn execute(&self, request: DownloadRequest) -> Result<DownloadResult, DownloadError> {
        let started = SystemTime::now();
        let mut attempts: u32 = 0;
        let mut previous_mirror: Option<usize> = None;

        loop {
            let mirror_index = loop {
                if self.cancelled() {
                    return Err(DownloadError::Cancelled);
                }
                if let Some(index) = pick_mirror(&request.mirrors, previous_mirror) {
                    break index;
                }
                if request.mirrors.is_empty() {
                    return Err(DownloadError::NoMirror(request.path.clone()));
                }
                // Every mirror is saturated or benched; wait for the
                // earliest retry slot.
                let wait = request
                    .mirrors
                    .iter()
                    .filter_map(|mirror| mirror.stats().lock().next_retry_at)
                    .filter_map(|at| at.duration_since(SystemTime::now()).ok())
                    .min()
                    .unwrap_or(Duration::from_millis(50));
                tokio::time::sleep(wait.min(Duration::from_secs(1))).await;
            };
            let mirror = request.mirrors[mirror_index].as_ref();
            attempts += 1;

            let outcome = self.transfer(mirror, &request).await;
            mirror.finish_transfer(outcome.is_ok());

            let err = match outcome {
                Ok(result) => return Ok(result),
                Err(err) => err,
            };
            tracing::debug!(
                "transfer of '{}' from {} failed: {err}",
                request.path,
                mirror.id()
            );

            if !err.is_transient() {
                return Err(err);
            }
            // `attempts - 1` retries have happened so far.
            if attempts > self.max_retries {
                return Err(DownloadError::RetriesExhausted {
                    path: request.path.clone(),
                    attempts,
                    last: Box::new(err),
                });
            }
            match self.retry_policy.should_retry(started, attempts - 1) {
                RetryDecision::Retry { execute_after } => {
                    let delay = execute_after
                        .duration_since(SystemTime::now())
                        .unwrap_or(Duration::ZERO);
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry => {
                    return Err(DownloadError::RetriesExhausted {
                        path: request.path.clone(),
                        attempts,
                        last: Box::new(err),
                    });
                }
            }
            previous_mirror = Some(mirror_index);
        }
    }

    /// Performs one transfer against one mirror, streaming to disk while
    /// hashing.
    async fn transfer(
        &self,
        mirror: &dyn Mirror,
        request: &DownloadRequest,
    ) -> Result<DownloadResult, DownloadError> {
        let shape = mirror
            .request_shapes(&request.path)
            .into_iter()
            .next()
            .ok_or_else(|| DownloadError::NoMirror(request.path.clone()))?;
        let url = shape.url().clone();

        if let Some(parent) = request.destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| DownloadError::Destination {
                    path: request.destination.clone(),
                    source,
                })?;
        }

        let mut hasher = HashState::new(request.expected);
        let bytes = if url.scheme() == "file" {
            self.transfer_local(&url, request, &mut hasher).await?
        } else {
            self.transfer_http(&shape, request, &mut hasher).await?
        };

        if !hasher.verify() {
            // Throw the unverifiable bytes away.
            let _ = tokio::fs::remove_file(&request.destination).await;
            // A local file will not change on retry; fail it for good.
            if url.scheme() == "file" {
                return Err(DownloadError::LocalFile {
                    url,
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "checksum mismatch",
                    ),
                });
            }
            return Err(DownloadError::ChecksumMismatch { url });
        }

        Ok(DownloadResult {
            path: request.destination.clone(),
            bytes,
            mirror: mirror.id().to_string(),
        })
    }

    async fn transfer_local(
        &self,
        url: &Url,
        request: &DownloadRequest,
        hasher: &mut HashState,
    ) -> Result<u64, DownloadError> {
        let source_path = url
            .to_file_path()
            .map_err(|()| DownloadError::LocalFile {
                url: url.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file path"),
            })?;
        let content =
            tokio::fs::read(&source_path)
                .await
                .map_err(|source| DownloadError::LocalFile {
                    url: url.clone(),
                    source,
                })?;
        hasher.update(&content);
        tokio::fs::write(&request.destination, &content)
            .await
            .map_err(|source| DownloadError::Destination {
                path: request.destination.clone(),
                source,
            })?;
        Ok(content.len() as u64)
    }

    async fn transfer_http(
        &self,
        shape: &RequestShape,
        request: &DownloadRequest,
        hasher: &mut HashState,
    ) -> Result<u64, DownloadError> {
        let url = shape.url().clone();
        let mut http_request = self.client.get(url.clone());
        if let RequestShape::GetWithHeaders { headers, .. } = shape {
            for (name, value) in headers {
                http_request = http_request.header(name.as_str(), value.as_str());
            }
        }

        let response = http_request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus { status, url });
        }

        let destination_err = |source| DownloadError::Destination {
            path: request.destination.clone(),
            source,
        };
        let mut file = tokio::fs::File::create(&request.destination)
            .await
            .map_err(destination_err)?;

        let mut bytes: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            if self.cancelled() {
                drop(file);
                let _ = tokio::fs::remove_file(&request.destination).await;
                return Err(DownloadError::Cancelled);
            }
            let chunk = chunk?;
            hasher.update(&chunk);
            file.write_all(&chunk).await.map_err(destination_err)?;
            bytes += chunk.len() as u64;
        }
        file.flush().await.map_err(destination_err)?;
        Ok(bytes)
    }
}

/// Picks an admissible mirror: healthiest first, avoiding the mirror that
/// just failed when another one is available. Takes a connection slot on the
/// returned mirror.
fn pick_mirror(mirrors: &[Arc<dyn Mirror>], previous: Option<usize>) -> Option<usize> {
    let mut order: Vec<usize> = (0..mirrors.len()).collect();
    order.sort_by_key(|&index| {
        (
            previous == Some(index),
            mirrors[index].failed_transfers(),
            index,
        )
    });
    order
        .into_iter()
        .find(|&index| mirrors[index].try_admit())
}

/// The streaming hash of one transfer.
enum HashState {
    Sha256(Sha256, Sha256Hash),
    Md5(Md5, Md5Hash),
    None,
}

impl HashState {
    fn new(expected: Option<Checksum>) -> Self {
        match expected {
            Some(Checksum::Sha256(hash)) => HashState::Sha256(Sha256::default(), hash),
            Some(Checksum::Md5(hash)) => HashState::Md5(Md5::default(), hash),
            None => HashState::None,
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            HashState::Sha256(hasher, _) => hasher.update(bytes),
            HashState::Md5(hasher, _) => hasher.update(bytes),
            HashState::None => {}
        }
    }

    fn verify(self) -> bool {
        match self {
            HashState::Sha256(hasher, expected) => hasher.finalize() == expected,
            HashState::Md5(hasher, expected) => hasher.finalize() == expected,
            HashState::None => true,
        }
    }
}
