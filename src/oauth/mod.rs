//! OAuth2 authorization-code (PKCE) client over the cache pipeline.
//!
//! [`OAuthClient`] owns the configuration, the per-request field map, the
//! [`CachePipeline`] and the token-refresh timer. The flow endpoints
//! (`auth_url`, `authorize`, `refresh`) are thin: they assemble canonical
//! field maps and push them through the same pipeline every other request
//! uses, with caching disabled.
//!
//! Per-request fields accumulate in a fresh [`SortedMap`] via
//! [`append_data`](OAuthClient::append_data) and are consumed by the next
//! request; they are never retained across requests.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{flag, Config, Options};
use crate::ds::SortedMap;
use crate::error::ConfigError;

pub mod fingerprint;
pub mod pipeline;
pub mod pkce;
pub mod transport;

use fingerprint::{encode_fields, BODY_SEPARATOR};
pub use pipeline::{AuthState, CacheEntry, CachePipeline, PendingRequest};
pub use pkce::{Challenge, ChallengeMethod};
pub use transport::{Method, Response, Transport, TransportRequest};

/// Token-endpoint JSON response; unknown fields are ignored.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token_type: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

/// OAuth2/PKCE client with response caching.
pub struct OAuthClient<T: Transport> {
    inner: Arc<ClientInner<T>>,
}

struct ClientInner<T: Transport> {
    config: Mutex<Config>,
    /// Fields for the next request; taken (not copied) at request time.
    data: Mutex<Option<SortedMap<String, String>>>,
    pipeline: CachePipeline<T>,
    refresh_stop: Mutex<bool>,
    refresh_tick: Condvar,
    refresh_thread: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> OAuthClient<T> {
    /// Creates a client with an empty configuration.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, Config::new())
    }

    /// Creates a client, sizing the cache and pending queue from the
    /// `cache_size` / `request_queue_size` parameters and the worker delay
    /// from `request_timeout` (milliseconds).
    pub fn with_config(transport: T, config: Config) -> Self {
        let cache_size = config.param_u64("cache_size").unwrap_or(0) as u32;
        let queue_size = config.param_u64("request_queue_size").unwrap_or(0) as u32;
        let delay = Duration::from_millis(config.param_u64("request_timeout").unwrap_or(0));
        let inner = Arc::new(ClientInner {
            config: Mutex::new(config),
            data: Mutex::new(None),
            pipeline: CachePipeline::new(transport, cache_size, queue_size, delay),
            refresh_stop: Mutex::new(true),
            refresh_tick: Condvar::new(),
            refresh_thread: Mutex::new(None),
        });
        inner.sync_auth_from_params();
        Self { inner }
    }

    // -- parameters, headers, request fields ------------------------------

    /// Sets a `[Params]` value.
    pub fn set_param(&self, key: &str, value: &str) {
        self.inner.config.lock().set_param(key, value);
        if key == "access_token" || key == "token_bearer" {
            self.inner.sync_auth_from_params();
        }
    }

    /// Returns a `[Params]` value.
    pub fn param(&self, key: &str) -> Option<String> {
        self.inner.config.lock().param(key).map(str::to_string)
    }

    /// Adds a header sent with every outgoing request.
    pub fn append_header(&self, key: &str, value: &str) {
        self.inner.config.lock().set_header(key, value);
    }

    /// Adds a field to the next request's canonical field map.
    pub fn append_data(&self, key: &str, value: &str) {
        let mut data = self.inner.data.lock();
        data.get_or_insert_with(SortedMap::new)
            .put(key.to_string(), value.to_string());
    }

    /// Sets the default option mask applied by [`request`](Self::request).
    pub fn set_options(&self, options: Options) {
        let mut config = self.inner.config.lock();
        config.set_option("request_cache", options.cache);
        config.set_option("request_async", options.async_refresh);
        config.set_option("request_auth", options.auth);
    }

    /// Returns `true` if a token is held.
    pub fn is_authenticated(&self) -> bool {
        self.inner.pipeline.is_authenticated()
    }

    // -- requests ----------------------------------------------------------

    /// Issues a request with the configured default option mask.
    pub fn request(&self, method: Method, endpoint: &str) -> Option<CacheEntry> {
        let options = self.inner.config.lock().default_options();
        self.request_with(method, endpoint, options)
    }

    /// Issues a request with an explicit option mask, consuming the fields
    /// accumulated through [`append_data`](Self::append_data).
    pub fn request_with(
        &self,
        method: Method,
        endpoint: &str,
        options: Options,
    ) -> Option<CacheEntry> {
        let fields = self.inner.data.lock().take().unwrap_or_default();
        let request = self.inner.prepare(method, endpoint, &fields, options.auth);
        self.inner.pipeline.execute(request, options)
    }

    // -- authorization flow -------------------------------------------------

    /// Builds the authorization URL, generating a fresh PKCE challenge when
    /// `challenge_method` is configured.
    ///
    /// Requires `auth_url` and `client_id`. The generated verifier and
    /// challenge are stored in `code_verifier` / `code_challenge`.
    pub fn auth_url(&self) -> Result<String, ConfigError> {
        let (base, client_id, redirect, method_value) = {
            let config = self.inner.config.lock();
            (
                config
                    .param("auth_url")
                    .map(str::to_string)
                    .ok_or_else(|| ConfigError::missing_param("auth_url"))?,
                config
                    .param("client_id")
                    .map(str::to_string)
                    .ok_or_else(|| ConfigError::missing_param("client_id"))?,
                config.param("redirect_uri").map(str::to_string),
                config.param("challenge_method").map(str::to_string),
            )
        };
        let mut url = format!("{base}?client_id={client_id}\\&response_type=code");
        if let Some(redirect) = redirect {
            url.push_str(&format!("\\&redirect_uri={redirect}"));
        }
        if let Some(value) = method_value {
            let challenge = pkce::generate_for(&value)?;
            {
                let mut config = self.inner.config.lock();
                config.set_param("code_verifier", &challenge.verifier);
                config.set_param("code_challenge", &challenge.challenge);
            }
            url.push_str(&format!(
                "\\&code_challenge_method={}\\&code_challenge={}",
                challenge.method.as_str(),
                challenge.challenge
            ));
        }
        Ok(url)
    }

    /// Exchanges an authorization code for tokens.
    ///
    /// Returns `Ok(true)` once authenticated, `Ok(false)` on a transport
    /// failure or a refused exchange, and `Err` when required parameters
    /// (`token_url`, `client_id`) are missing.
    pub fn authorize(&self, code: &str) -> Result<bool, ConfigError> {
        let mut fields = SortedMap::new();
        {
            let config = self.inner.config.lock();
            let client_id = config
                .param("client_id")
                .map(str::to_string)
                .ok_or_else(|| ConfigError::missing_param("client_id"))?;
            config
                .param("token_url")
                .ok_or_else(|| ConfigError::missing_param("token_url"))?;
            if let Some(secret) = config.param("client_secret") {
                fields.put("client_secret".to_string(), secret.to_string());
            }
            if let Some(redirect) = config.param("redirect_uri") {
                fields.put("redirect_uri".to_string(), redirect.to_string());
            }
            if let Some(verifier) = config.param("code_verifier") {
                fields.put("code_verifier".to_string(), verifier.to_string());
            }
            fields.put("client_id".to_string(), client_id);
        }
        fields.put("code".to_string(), code.to_string());
        fields.put("grant_type".to_string(), "authorization_code".to_string());
        self.inner.token_request(fields, true)
    }

    /// Refreshes the access token once using `refresh_token`.
    pub fn refresh(&self) -> Result<bool, ConfigError> {
        self.inner.refresh_once()
    }

    /// Starts periodic token refresh.
    ///
    /// A zero interval refreshes immediately instead of starting a timer.
    /// Requires `refresh_token`, `client_id` and `token_url`.
    pub fn start_refresh(&self, interval: Duration) -> Result<(), ConfigError> {
        self.inner.refresh_fields()?;
        if interval.is_zero() {
            self.inner.refresh_once()?;
            return Ok(());
        }
        self.inner.start_refresh_timer(interval);
        Ok(())
    }

    /// Stops the refresh timer and joins its thread.
    pub fn stop_refresh(&self) {
        self.inner.stop_refresh_timer();
    }

    // -- worker and persistence ---------------------------------------------

    /// Starts the background refresh worker.
    pub fn start_worker(&self) {
        self.inner.pipeline.start();
    }

    /// Stops the background refresh worker and joins it.
    pub fn stop_worker(&self) {
        self.inner.pipeline.stop();
    }

    /// Direct access to the cache pipeline.
    pub fn pipeline(&self) -> &CachePipeline<T> {
        &self.inner.pipeline
    }

    /// Loads configuration, re-applies auth state, and honors
    /// `refresh_on_load`.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.inner.config.lock().load(path)?;
        self.inner.sync_auth_from_params();
        let refresh_on_load = {
            let config = self.inner.config.lock();
            config.param("refresh_on_load").map(flag).unwrap_or(false)
                && config.param("refresh_token").is_some()
        };
        if refresh_on_load {
            if let Err(e) = self.inner.refresh_once() {
                warn!(error = %e, "refresh on load skipped");
            }
        }
        Ok(())
    }

    /// Saves configuration (truncate-then-write).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.inner.config.lock().save(path)
    }

    /// Writes the cache snapshot.
    pub fn save_cache(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        self.inner.pipeline.save_cache(path)
    }

    /// Seeds the cache from a snapshot; returns the number of entries.
    pub fn load_cache(&self, path: impl AsRef<Path>) -> Result<usize, ConfigError> {
        self.inner.pipeline.load_cache(path)
    }
}

impl<T: Transport> Drop for OAuthClient<T> {
    fn drop(&mut self) {
        self.inner.stop_refresh_timer();
        self.inner.pipeline.stop();
        let (save_on_close, config_file) = {
            let config = self.inner.config.lock();
            (
                config.param("save_on_close").map(flag).unwrap_or(false),
                config.param("config_file").map(str::to_string),
            )
        };
        if save_on_close {
            if let Some(path) = config_file {
                if let Err(e) = self.inner.config.lock().save(&path) {
                    warn!(error = %e, "config save on close failed");
                }
            }
        }
    }
}

impl<T: Transport> ClientInner<T> {
    fn prepare(
        &self,
        method: Method,
        endpoint: &str,
        fields: &SortedMap<String, String>,
        auth: bool,
    ) -> PendingRequest {
        let encoded = encode_fields(fields, BODY_SEPARATOR);
        PendingRequest {
            method,
            endpoint: endpoint.to_string(),
            body: if encoded.is_empty() {
                None
            } else {
                Some(encoded)
            },
            headers: self.base_headers(),
            auth,
            fingerprint: fingerprint::fingerprint(method, endpoint, fields),
        }
    }

    fn base_headers(&self) -> Vec<String> {
        self.config
            .lock()
            .headers()
            .map(|(key, value)| format!("{key}: {value}"))
            .collect()
    }

    /// Mirrors the `access_token` / `token_bearer` parameters into the
    /// pipeline's dispatch-time auth state.
    fn sync_auth_from_params(&self) {
        let auth = {
            let config = self.config.lock();
            config.param("access_token").map(|token| AuthState {
                scheme: config.param("token_bearer").unwrap_or("Bearer").to_string(),
                token: token.to_string(),
            })
        };
        self.pipeline.set_auth(auth);
    }

    /// POSTs canonical fields to the token endpoint; a 200 response updates
    /// tokens, auth state and (optionally) the refresh timer.
    fn token_request(
        self: &Arc<Self>,
        fields: SortedMap<String, String>,
        start_timer: bool,
    ) -> Result<bool, ConfigError> {
        let token_url = self
            .config
            .lock()
            .param("token_url")
            .map(str::to_string)
            .ok_or_else(|| ConfigError::missing_param("token_url"))?;
        let encoded = encode_fields(&fields, BODY_SEPARATOR);
        let request = PendingRequest {
            method: Method::Post,
            endpoint: token_url.clone(),
            body: Some(encoded),
            headers: self.base_headers(),
            auth: false,
            fingerprint: fingerprint::fingerprint(Method::Post, &token_url, &fields),
        };
        match self.pipeline.execute(request, Options::NONE) {
            Some(response) if response.status == 200 => {
                self.apply_token_response(&response.body, start_timer);
                Ok(true)
            }
            Some(response) => {
                debug!(status = response.status, "token endpoint refused request");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn apply_token_response(self: &Arc<Self>, body: &str, start_timer: bool) {
        let parsed: TokenResponse = match serde_json::from_str(body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "unparseable token response");
                return;
            }
        };
        {
            let mut config = self.config.lock();
            if let Some(token_type) = &parsed.token_type {
                config.set_param("token_bearer", token_type);
            }
            if let Some(token) = &parsed.access_token {
                config.set_param("access_token", token);
            }
            if let Some(refresh) = &parsed.refresh_token {
                config.set_param("refresh_token", refresh);
            }
        }
        self.sync_auth_from_params();
        let (save_on_auth, refresh_on_auth, config_file) = {
            let config = self.config.lock();
            (
                config.param("save_on_auth").map(flag).unwrap_or(false),
                config.param("refresh_on_auth").map(flag).unwrap_or(false),
                config.param("config_file").map(str::to_string),
            )
        };
        if save_on_auth {
            if let Some(path) = config_file {
                if let Err(e) = self.config.lock().save(&path) {
                    warn!(error = %e, "config save after auth failed");
                }
            }
        }
        if start_timer && refresh_on_auth {
            if let Some(expires_in) = parsed.expires_in {
                // Refresh at two thirds of the token lifetime.
                let interval = Duration::from_millis(expires_in.saturating_mul(2000) / 3);
                self.start_refresh_timer(interval);
            }
        }
    }

    fn refresh_fields(&self) -> Result<SortedMap<String, String>, ConfigError> {
        let config = self.config.lock();
        let refresh_token = config
            .param("refresh_token")
            .map(str::to_string)
            .ok_or_else(|| ConfigError::missing_param("refresh_token"))?;
        let client_id = config
            .param("client_id")
            .map(str::to_string)
            .ok_or_else(|| ConfigError::missing_param("client_id"))?;
        config
            .param("token_url")
            .ok_or_else(|| ConfigError::missing_param("token_url"))?;
        let mut fields = SortedMap::new();
        fields.put("client_id".to_string(), client_id);
        fields.put("refresh_token".to_string(), refresh_token);
        fields.put("grant_type".to_string(), "refresh_token".to_string());
        if let Some(secret) = config.param("client_secret") {
            fields.put("client_secret".to_string(), secret.to_string());
        }
        Ok(fields)
    }

    fn refresh_once(self: &Arc<Self>) -> Result<bool, ConfigError> {
        let fields = self.refresh_fields()?;
        self.token_request(fields, false)
    }

    fn start_refresh_timer(self: &Arc<Self>, interval: Duration) {
        self.stop_refresh_timer();
        *self.refresh_stop.lock() = false;
        let inner = Arc::clone(self);
        *self.refresh_thread.lock() = Some(thread::spawn(move || loop {
            {
                let mut stop = inner.refresh_stop.lock();
                if *stop {
                    return;
                }
                // Re-arm on spurious wakeups; a stop request ends the wait.
                while !inner.refresh_tick.wait_for(&mut stop, interval).timed_out() {
                    if *stop {
                        return;
                    }
                }
            }
            if let Err(e) = inner.refresh_once() {
                warn!(error = %e, "token refresh skipped");
            }
        }));
    }

    fn stop_refresh_timer(&self) {
        *self.refresh_stop.lock() = true;
        self.refresh_tick.notify_all();
        if let Some(handle) = self.refresh_thread.lock().take() {
            let _ = handle.join();
        }
    }
}
