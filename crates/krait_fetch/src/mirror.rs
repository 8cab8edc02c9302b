//! Mirrors: equivalent network sources for the same content.

use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use url::Url;

/// The base wait after the first failure of a mirror.
const RETRY_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Growth factor of the per-mirror retry backoff.
const RETRY_BACKOFF_FACTOR: u32 = 2;

/// The longest a mirror is benched after repeated failures.
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(120);

/// One concrete way of issuing a request against a mirror.
#[derive(Debug, Clone)]
pub enum RequestShape {
    /// A plain GET of the URL.
    Get {
        /// The absolute URL to fetch.
        url: Url,
    },

    /// A GET carrying additional headers, e.g. for token-gated mirrors.
    GetWithHeaders {
        /// The absolute URL to fetch.
        url: Url,
        /// Header name/value pairs to attach.
        headers: Vec<(String, String)>,
    },
}

impl RequestShape {
    /// The URL of the shape.
    pub fn url(&self) -> &Url {
        match self {
            RequestShape::Get { url } | RequestShape::GetWithHeaders { url, .. } => url,
        }
    }
}

/// The mutable statistics of a mirror; guarded by one mutex per mirror.
#[derive(Debug, Default)]
pub struct MirrorStats {
    /// Maximum number of parallel connections this mirror accepts. `None`
    /// means unbounded. Lowered automatically when transfers fail.
    pub allowed_parallel_connections: Option<usize>,

    /// The highest number of parallel connections ever attempted.
    pub max_tried_parallel_connections: usize,

    /// Transfers currently in flight.
    pub running_transfers: usize,

    /// Transfers that finished successfully.
    pub successful_transfers: usize,

    /// Transfers that failed.
    pub failed_transfers: usize,

    /// Until when the mirror should not be retried.
    pub next_retry_at: Option<SystemTime>,

    retry_counter: u32,
}

/// A source of content, addressed by relative paths. Implementations supply
/// the request shapes to try and share the statistics contract implemented
/// on the trait itself.
pub trait Mirror: Send + Sync {
    /// A stable identifier for reporting, usually the base URL.
    fn id(&self) -> &str;

    /// The request shapes to attempt for `path`, in order of preference.
    fn request_shapes(&self, path: &str) -> Vec<RequestShape>;

    /// The statistics of this mirror.
    fn stats(&self) -> &Mutex<MirrorStats>;

    /// Attempts to reserve a connection slot. Fails when the mirror is in
    /// retry backoff or its connection cap is reached; on success the
    /// running-transfer count is taken.
    fn try_admit(&self) -> bool {
        let mut stats = self.stats().lock();
        if let Some(next_retry) = stats.next_retry_at {
            if SystemTime::now() < next_retry {
                return false;
            }
        }
        if let Some(cap) = stats.allowed_parallel_connections {
            if stats.running_transfers >= cap {
                return false;
            }
        }
        stats.running_transfers += 1;
        stats.max_tried_parallel_connections = stats
            .max_tried_parallel_connections
            .max(stats.running_transfers);
        true
    }

    /// Releases the connection slot taken by [`Mirror::try_admit`] and
    /// records the outcome. A failure caps the allowed connections to the
    /// current load and benches the mirror with exponential backoff.
    fn finish_transfer(&self, success: bool) {
        let mut stats = self.stats().lock();
        stats.running_transfers = stats.running_transfers.saturating_sub(1);
        if success {
            stats.successful_transfers += 1;
            stats.next_retry_at = None;
            stats.retry_counter = 0;
        } else {
            stats.failed_transfers += 1;
            stats.allowed_parallel_connections = Some(stats.running_transfers.max(1));
            let backoff = RETRY_BACKOFF_BASE
                .saturating_mul(RETRY_BACKOFF_FACTOR.saturating_pow(stats.retry_counter))
                .min(RETRY_BACKOFF_MAX);
            stats.next_retry_at = Some(SystemTime::now() + backoff);
            stats.retry_counter += 1;
        }
    }

    /// The failure count, used to prefer healthier mirrors.
    fn failed_transfers(&self) -> usize {
        self.stats().lock().failed_transfers
    }
}

/// A plain HTTP(S) mirror, optionally sending a bearer token.
pub struct HttpMirror {
    id: String,
    base_url: Url,
    token: Option<String>,
    stats: Mutex<MirrorStats>,
}

impl HttpMirror {
    /// Creates a mirror rooted at `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self {
            id: base_url.to_string(),
            base_url,
            token: None,
            stats: Mutex::new(MirrorStats::default()),
        }
    }

    /// Attaches a bearer token sent with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Caps the parallel connections of this mirror.
    pub fn with_connection_limit(self, limit: usize) -> Self {
        self.stats.lock().allowed_parallel_connections = Some(limit);
        self
    }

    fn join(&self, path: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(path.split('/'));
        }
        url
    }
}

impl Mirror for HttpMirror {
    fn id(&self) -> &str {
        &self.id
    }

    fn request_shapes(&self, path: &str) -> Vec<RequestShape> {
        let url = self.join(path);
        match &self.token {
            Some(token) => vec![RequestShape::GetWithHeaders {
                url,
                headers: vec![("authorization".to_string(), format!("Bearer {token}"))],
            }],
            None => vec![RequestShape::Get { url }],
        }
    }

    fn stats(&self) -> &Mutex<MirrorStats> {
        &self.stats
    }
}

/// A mirror serving from the local filesystem through `file://` URLs.
pub struct FileMirror {
    id: String,
    base_url: Url,
    stats: Mutex<MirrorStats>,
}

impl FileMirror {
    /// Creates a mirror for the given directory.
    pub fn new(root: &std::path::Path) -> Result<Self, url::ParseError> {
        let base_url =
            Url::from_directory_path(root).map_err(|()| url::ParseError::EmptyHost)?;
        Ok(Self {
            id: base_url.to_string(),
            base_url,
            stats: Mutex::new(MirrorStats::default()),
        })
    }

    fn join(&self, path: &str) -> Url {
        self.base_url
            .join(path)
            .expect("relative paths always join onto a directory url")
    }
}

impl Mirror for FileMirror {
    fn id(&self) -> &str {
        &self.id
    }

    fn request_shapes(&self, path: &str) -> Vec<RequestShape> {
        vec![RequestShape::Get {
            url: self.join(path),
        }]
    }

    fn stats(&self) -> &Mutex<MirrorStats> {
        &self.stats
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_admission_respects_the_connection_cap() {
        let mirror =
            HttpMirror::new("https://mirror.example.com/".parse().unwrap()).with_connection_limit(2);
        assert!(mirror.try_admit());
        assert!(mirror.try_admit());
        assert!(!mirror.try_admit());
        mirror.finish_transfer(true);
        assert!(mirror.try_admit());
        assert_eq!(mirror.stats().lock().max_tried_parallel_connections, 2);
    }

    #[test]
    fn test_failure_sheds_load_and_schedules_backoff() {
        let mirror = HttpMirror::new("https://mirror.example.com/".parse().unwrap());
        assert!(mirror.try_admit());
        assert!(mirror.try_admit());
        mirror.finish_transfer(false);

        let stats = mirror.stats().lock();
        assert_eq!(stats.failed_transfers, 1);
        // The cap drops to the load at failure time.
        assert_eq!(stats.allowed_parallel_connections, Some(1));
        assert!(stats.next_retry_at.is_some());
    }

    #[test]
    fn test_mirror_in_backoff_is_not_admitted() {
        let mirror = HttpMirror::new("https://mirror.example.com/".parse().unwrap());
        assert!(mirror.try_admit());
        mirror.finish_transfer(false);
        assert!(!mirror.try_admit());
    }

    #[test]
    fn test_success_clears_the_backoff() {
        let mirror = HttpMirror::new("https://mirror.example.com/".parse().unwrap());
        assert!(mirror.try_admit());
        mirror.finish_transfer(false);
        // Manually clear the bench as if time had passed.
        mirror.stats().lock().next_retry_at = Some(SystemTime::now() - Duration::from_secs(1));
        assert!(mirror.try_admit());
        mirror.finish_transfer(true);
        let stats = mirror.stats().lock();
        assert_eq!(stats.successful_transfers, 1);
        assert!(stats.next_retry_at.is_none());
    }

    #[test]
    fn test_http_mirror_joins_paths() {
        let mirror = HttpMirror::new("https://conda.example.com/conda-forge".parse().unwrap());
        let shapes = mirror.request_shapes("linux-64/python-3.9.0-h1_0.conda");
        assert_eq!(
            shapes[0].url().as_str(),
            "https://conda.example.com/conda-forge/linux-64/python-3.9.0-h1_0.conda"
        );
    }

    #[test]
    fn test_token_mirror_sends_the_auth_header() {
        let mirror = HttpMirror::new("https://conda.example.com/".parse().unwrap())
            .with_token("secret");
        let shapes = mirror.request_shapes("pkg.conda");
        match &shapes[0] {
            RequestShape::GetWithHeaders { headers, .. } => {
                assert_eq!(headers[0].0, "authorization");
                assert_eq!(headers[0].1, "Bearer secret");
            }
            RequestShape::Get { .. } => panic!("expected an authenticated shape"),
        }
    }
}
