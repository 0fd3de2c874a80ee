//! Response cache and pending-request queue over a background worker.
//!
//! ```text
//!   caller thread                           worker thread
//!   ─────────────                           ─────────────
//!   execute(request, options)               loop:
//!     │ tables.lock()                         │ tables.lock()
//!     │ cache.get(fp) ── hit ──► clone out    │ wait until pending nonempty
//!     │   pending.put(fp) + notify            │ pending.pop_front()
//!     │ ── miss ──► dispatch.lock()           │ dispatch.lock()
//!     │             transport.perform         │ transport.perform
//!     │             cache.put(fp) on 200      │ cache.put(fp) on 200
//!     ▼                                       ▼ sleep(delay)
//! ```
//!
//! Both tables live behind one `parking_lot::Mutex`; every access takes it,
//! reads included, because the open-addressing tables resize in place. A
//! second mutex serializes transport calls across the foreground path and
//! the worker, bounding load on the remote server to one in-flight request
//! per path. The worker blocks on a `Condvar` signalled at enqueue time and
//! observes the stop flag whenever it wakes; `stop` joins the thread.
//!
//! `cache` is circular with refresh-on-access (bounded LRU); `pending` is a
//! bounded FIFO keyed by fingerprint, which is what deduplicates refreshes:
//! a fingerprint already queued is not queued again. Cached entries are
//! cloned on every hand-off so the cache's own copy is never aliased by a
//! caller.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, warn};

use crate::config::Options;
use crate::ds::OrderedMap;
use crate::error::ConfigError;
use crate::oauth::transport::{Method, Response, Transport, TransportRequest};

pub(crate) const DEFAULT_CACHE_SIZE: u32 = 200;
pub(crate) const DEFAULT_QUEUE_SIZE: u32 = 200;

/// A cached response, owned by the cache table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub body: String,
    pub content_type: String,
    pub status: u16,
}

impl CacheEntry {
    fn from_response(response: Response) -> Self {
        Self {
            body: response.body,
            content_type: response.content_type,
            status: response.status,
        }
    }
}

/// A request waiting in the pending queue (or about to be dispatched).
#[derive(Debug, Clone)]
pub struct PendingRequest {
    pub method: Method,
    pub endpoint: String,
    /// Encoded `key=value&...` fields; query string for GET, body otherwise.
    pub body: Option<String>,
    /// Base `"Key: Value"` header lines, auth excluded.
    pub headers: Vec<String>,
    /// Whether to attach the `Authorization` header at dispatch time.
    pub auth: bool,
    pub fingerprint: String,
}

/// Current bearer token, shared with the worker for dispatch-time injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    /// Token type, e.g. `Bearer`.
    pub scheme: String,
    pub token: String,
}

struct Tables {
    cache: OrderedMap<String, CacheEntry>,
    pending: OrderedMap<String, PendingRequest>,
}

struct Shared<T> {
    tables: Mutex<Tables>,
    pending_ready: Condvar,
    /// Serializes transport calls across the foreground path and the worker.
    dispatch: Mutex<()>,
    auth: RwLock<Option<AuthState>>,
    transport: T,
    running: AtomicBool,
    worker_delay: Duration,
}

/// Cache + pending queue + background worker, composed over a [`Transport`].
pub struct CachePipeline<T: Transport> {
    shared: Arc<Shared<T>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> CachePipeline<T> {
    /// Creates a pipeline with bounded cache and queue tables.
    ///
    /// `cache_size` / `queue_size` of 0 fall back to the defaults (200).
    /// `worker_delay` is slept between background dispatches.
    pub fn new(transport: T, cache_size: u32, queue_size: u32, worker_delay: Duration) -> Self {
        let cache_size = if cache_size == 0 {
            DEFAULT_CACHE_SIZE
        } else {
            cache_size
        };
        let queue_size = if queue_size == 0 {
            DEFAULT_QUEUE_SIZE
        } else {
            queue_size
        };
        let mut cache = OrderedMap::new(cache_size as usize);
        cache.set_max_size(cache_size);
        cache.set_circular(true);
        cache.set_refresh(true);
        let mut pending = OrderedMap::new(queue_size as usize);
        pending.set_max_size(queue_size);
        pending.set_circular(true);
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables { cache, pending }),
                pending_ready: Condvar::new(),
                dispatch: Mutex::new(()),
                auth: RwLock::new(None),
                transport,
                running: AtomicBool::new(false),
                worker_delay,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Replaces the shared auth state used for dispatch-time header
    /// injection.
    pub fn set_auth(&self, auth: Option<AuthState>) {
        *self.shared.auth.write() = auth;
    }

    /// Returns a copy of the current auth state.
    pub fn auth(&self) -> Option<AuthState> {
        self.shared.auth.read().clone()
    }

    /// Returns `true` if a token is held.
    pub fn is_authenticated(&self) -> bool {
        self.shared.auth.read().is_some()
    }

    /// Runs one request through the cache state machine.
    ///
    /// With `options.cache`: a hit returns a private copy immediately and,
    /// when `options.async_refresh` is also set, queues a background refresh
    /// unless the fingerprint is already pending. A miss (or `cache` unset)
    /// performs the transport call synchronously under the dispatch mutex;
    /// a 200 response is stored before the copy is returned.
    ///
    /// `None` means the transport failed; nothing is cached and nothing is
    /// retried.
    pub fn execute(&self, request: PendingRequest, options: Options) -> Option<CacheEntry> {
        if options.cache {
            let mut tables = self.shared.tables.lock();
            if let Some(entry) = tables.cache.get(&request.fingerprint) {
                let copy = entry.clone();
                if options.async_refresh && !tables.pending.contains(&request.fingerprint) {
                    debug!(fingerprint = %request.fingerprint, "queueing background refresh");
                    let fingerprint = request.fingerprint.clone();
                    tables.pending.put(fingerprint, request);
                    self.shared.pending_ready.notify_one();
                }
                return Some(copy);
            }
        }
        self.dispatch_sync(request, options.cache)
    }

    fn dispatch_sync(&self, request: PendingRequest, cache: bool) -> Option<CacheEntry> {
        let response = {
            let _serial = self.shared.dispatch.lock();
            self.shared.perform(&request)
        };
        let Some(response) = response else {
            warn!(fingerprint = %request.fingerprint, "transport failure");
            return None;
        };
        let entry = CacheEntry::from_response(response);
        if cache && entry.status == 200 {
            let mut tables = self.shared.tables.lock();
            tables.cache.put(request.fingerprint, entry.clone());
        }
        Some(entry)
    }

    /// Starts the background worker; a second call is a no-op while the
    /// worker is running.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        *worker = Some(thread::spawn(move || worker_loop(shared)));
    }

    /// Stops the worker cooperatively and joins it.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.pending_ready.notify_all();
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    /// Returns `true` while the worker is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Number of cached responses.
    pub fn cache_len(&self) -> usize {
        self.shared.tables.lock().cache.len()
    }

    /// Number of queued refreshes.
    pub fn pending_len(&self) -> usize {
        self.shared.tables.lock().pending.len()
    }

    /// Returns a copy of a cached entry without touching its recency.
    pub fn cached(&self, fingerprint: &str) -> Option<CacheEntry> {
        self.shared
            .tables
            .lock()
            .cache
            .peek(&fingerprint.to_string())
            .cloned()
    }

    /// Drops every cached response and queued refresh.
    pub fn clear(&self) {
        let mut tables = self.shared.tables.lock();
        tables.cache.clear();
        tables.pending.clear();
    }

    /// Writes the cache snapshot, one `<fingerprint> <body>` line per entry
    /// in order-list order, truncating any existing file.
    pub fn save_cache(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let mut file = fs::File::create(path).map_err(|e| {
            ConfigError::new(format!("cannot write cache file {}: {e}", path.display()))
        })?;
        let tables = self.shared.tables.lock();
        for (fingerprint, entry) in tables.cache.iter() {
            writeln!(file, "{fingerprint} {}", entry.body).map_err(|e| {
                ConfigError::new(format!("write to {} failed: {e}", path.display()))
            })?;
        }
        Ok(())
    }

    /// Seeds the cache from a snapshot file.
    ///
    /// Every line becomes an entry with status 200 and content type
    /// `unknown`; an empty line terminates the read early. Returns the
    /// number of entries loaded.
    pub fn load_cache(&self, path: impl AsRef<Path>) -> Result<usize, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            ConfigError::new(format!("cannot read cache file {}: {e}", path.display()))
        })?;
        let mut tables = self.shared.tables.lock();
        let mut loaded = 0;
        for line in text.lines() {
            if line.is_empty() {
                break;
            }
            let (fingerprint, body) = line.split_once(' ').unwrap_or((line, ""));
            tables.cache.put(
                fingerprint.to_string(),
                CacheEntry {
                    body: body.to_string(),
                    content_type: "unknown".to_string(),
                    status: 200,
                },
            );
            loaded += 1;
        }
        Ok(loaded)
    }
}

impl<T: Transport> Drop for CachePipeline<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: Transport> Shared<T> {
    /// Assembles the wire request and performs it, attaching the
    /// `Authorization` header at dispatch time when asked for.
    fn perform(&self, request: &PendingRequest) -> Option<Response> {
        let mut headers = request.headers.clone();
        if request.auth {
            if let Some(auth) = self.auth.read().as_ref() {
                headers.push(format!("Authorization: {} {}", auth.scheme, auth.token));
            }
        }
        let (url, body) = match request.method {
            Method::Get => {
                let url = match request.body.as_deref() {
                    Some(fields) if !fields.is_empty() => {
                        format!("{}?{}", request.endpoint, fields)
                    }
                    _ => request.endpoint.clone(),
                };
                (url, None)
            }
            _ => (request.endpoint.clone(), request.body.clone()),
        };
        debug!(method = %request.method, url = %url, "dispatching request");
        self.transport.perform(&TransportRequest {
            method: request.method,
            url,
            headers,
            body,
        })
    }
}

fn worker_loop<T: Transport>(shared: Arc<Shared<T>>) {
    loop {
        let request = {
            let mut tables = shared.tables.lock();
            loop {
                if !shared.running.load(Ordering::SeqCst) {
                    return;
                }
                if let Some((_, request)) = tables.pending.pop_front() {
                    break request;
                }
                shared.pending_ready.wait(&mut tables);
            }
        };
        let response = {
            let _serial = shared.dispatch.lock();
            shared.perform(&request)
        };
        match response {
            Some(response) if response.status == 200 => {
                let entry = CacheEntry::from_response(response);
                let mut tables = shared.tables.lock();
                tables.cache.put(request.fingerprint, entry);
            }
            Some(response) => {
                debug!(
                    fingerprint = %request.fingerprint,
                    status = response.status,
                    "refresh response not cached"
                );
            }
            None => {
                warn!(
                    fingerprint = %request.fingerprint,
                    "transport failure, dropping pending request"
                );
            }
        }
        if !shared.worker_delay.is_zero() {
            thread::sleep(shared.worker_delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn request_for(fingerprint: &str) -> PendingRequest {
        PendingRequest {
            method: Method::Get,
            endpoint: "https://api.example/items".to_string(),
            body: None,
            headers: Vec::new(),
            auth: false,
            fingerprint: fingerprint.to_string(),
        }
    }

    fn pipeline_with<F>(transport: F) -> CachePipeline<F>
    where
        F: Fn(&TransportRequest) -> Option<Response> + Send + Sync + 'static,
    {
        CachePipeline::new(transport, 8, 8, Duration::ZERO)
    }

    fn counting_ok_transport(
        calls: Arc<AtomicUsize>,
    ) -> impl Fn(&TransportRequest) -> Option<Response> + Send + Sync + 'static {
        move |_request: &TransportRequest| {
            calls.fetch_add(1, Ordering::SeqCst);
            Some(Response {
                status: 200,
                body: "payload".to_string(),
                content_type: "application/json".to_string(),
            })
        }
    }

    #[test]
    fn miss_dispatches_and_caches_200() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline_with(counting_ok_transport(Arc::clone(&calls)));
        let options = Options {
            cache: true,
            ..Options::NONE
        };
        let entry = pipeline.execute(request_for("fp-a"), options).unwrap();
        assert_eq!(entry.status, 200);
        assert_eq!(pipeline.cache_len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Second call is a hit: no transport traffic, no refresh queued
        // without the async flag.
        let entry = pipeline.execute(request_for("fp-a"), options).unwrap();
        assert_eq!(entry.body, "payload");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.pending_len(), 0);
    }

    #[test]
    fn hit_with_async_queues_one_refresh() {
        let calls = Arc::new(AtomicUsize::new(0));
        let pipeline = pipeline_with(counting_ok_transport(Arc::clone(&calls)));
        let options = Options {
            cache: true,
            async_refresh: true,
            auth: false,
        };
        pipeline.execute(request_for("fp-a"), options).unwrap();
        pipeline.execute(request_for("fp-a"), options).unwrap();
        pipeline.execute(request_for("fp-a"), options).unwrap();
        // Two hits, one queued refresh: the fingerprint dedups.
        assert_eq!(pipeline.pending_len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn non_200_responses_are_not_cached() {
        let transport = |_request: &TransportRequest| {
            Some(Response {
                status: 404,
                body: "missing".to_string(),
                content_type: "text/plain".to_string(),
            })
        };
        let pipeline = pipeline_with(transport);
        let options = Options {
            cache: true,
            ..Options::NONE
        };
        let entry = pipeline.execute(request_for("fp-a"), options).unwrap();
        assert_eq!(entry.status, 404);
        assert_eq!(pipeline.cache_len(), 0);
    }

    #[test]
    fn transport_failure_returns_none_and_caches_nothing() {
        let transport = |_request: &TransportRequest| None;
        let pipeline = pipeline_with(transport);
        let options = Options {
            cache: true,
            ..Options::NONE
        };
        assert!(pipeline.execute(request_for("fp-a"), options).is_none());
        assert_eq!(pipeline.cache_len(), 0);
    }

    #[test]
    fn auth_header_is_attached_at_dispatch_time() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let transport = move |request: &TransportRequest| {
            seen_in.lock().push(request.headers.clone());
            Some(Response {
                status: 200,
                body: String::new(),
                content_type: String::new(),
            })
        };
        let pipeline = pipeline_with(transport);
        let mut request = request_for("fp-a");
        request.auth = true;

        // Not authenticated yet: no header.
        pipeline.execute(request.clone(), Options::NONE);
        pipeline.set_auth(Some(AuthState {
            scheme: "Bearer".to_string(),
            token: "tok123".to_string(),
        }));
        pipeline.execute(request, Options::NONE);

        let seen = seen.lock();
        assert!(seen[0].is_empty());
        assert_eq!(seen[1], vec!["Authorization: Bearer tok123".to_string()]);
    }

    #[test]
    fn get_fields_travel_in_the_url() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let transport = move |request: &TransportRequest| {
            seen_in.lock().push((request.url.clone(), request.body.clone()));
            Some(Response {
                status: 200,
                body: String::new(),
                content_type: String::new(),
            })
        };
        let pipeline = pipeline_with(transport);
        let mut get = request_for("fp-get");
        get.body = Some("a=1&b=2".to_string());
        let mut post = request_for("fp-post");
        post.method = Method::Post;
        post.body = Some("a=1&b=2".to_string());
        pipeline.execute(get, Options::NONE);
        pipeline.execute(post, Options::NONE);

        let seen = seen.lock();
        assert_eq!(
            seen[0],
            ("https://api.example/items?a=1&b=2".to_string(), None)
        );
        assert_eq!(
            seen[1],
            (
                "https://api.example/items".to_string(),
                Some("a=1&b=2".to_string())
            )
        );
    }

    #[test]
    fn worker_drains_pending_and_overwrites_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let transport = move |_request: &TransportRequest| {
            let n = calls_in.fetch_add(1, Ordering::SeqCst);
            Some(Response {
                status: 200,
                body: format!("payload-{n}"),
                content_type: "application/json".to_string(),
            })
        };
        let pipeline = pipeline_with(transport);
        let options = Options {
            cache: true,
            async_refresh: true,
            auth: false,
        };
        pipeline.execute(request_for("fp-a"), options).unwrap();
        let stale = pipeline.execute(request_for("fp-a"), options).unwrap();
        assert_eq!(stale.body, "payload-0");
        assert_eq!(pipeline.pending_len(), 1);

        pipeline.start();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while pipeline.cached("fp-a").map(|e| e.body).as_deref() != Some("payload-1")
            && std::time::Instant::now() < deadline
        {
            thread::sleep(Duration::from_millis(5));
        }
        pipeline.stop();
        assert_eq!(pipeline.pending_len(), 0);
        assert_eq!(pipeline.cached("fp-a").unwrap().body, "payload-1");
    }

    #[test]
    fn stop_without_start_is_harmless() {
        let transport = |_request: &TransportRequest| None;
        let pipeline = pipeline_with(transport);
        pipeline.stop();
        assert!(!pipeline.is_running());
    }
}
