//! Single-shot HTTP request sessions.
//!
//! # Responsibilities
//! - Hold one request's configuration until it is submitted
//! - Submit it on the background runtime without blocking the caller
//! - Cache the response headers for accessor calls
//! - Push exactly one `HttpCompletion` when the response (or failure) arrives
//!
//! # Design Decisions
//! - One session = one request/response pair; a second submit is rejected
//! - Transport failures are completion data (status 0), never a separate path
//! - Response headers live behind their own lock: the transport thread writes
//!   them while the drain thread may read them

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use url::Url;
use uuid::Uuid;

use crate::config::HttpConfig;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{Forward, Handle};
use crate::http::form::FormParams;
use crate::net::Headers;
use crate::observability::metrics;
use crate::queue::{HttpCompletion, TaskQueue};

pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_FORM: &str = "application/x-www-form-urlencoded";

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVerb {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpVerb {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVerb::Get => "GET",
            HttpVerb::Post => "POST",
            HttpVerb::Put => "PUT",
            HttpVerb::Patch => "PATCH",
            HttpVerb::Delete => "DELETE",
        }
    }

    fn method(&self) -> reqwest::Method {
        match self {
            HttpVerb::Get => reqwest::Method::GET,
            HttpVerb::Post => reqwest::Method::POST,
            HttpVerb::Put => reqwest::Method::PUT,
            HttpVerb::Patch => reqwest::Method::PATCH,
            HttpVerb::Delete => reqwest::Method::DELETE,
        }
    }
}

/// The ways a request can be performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpCall {
    Get,
    Delete,
    /// POST with the document serialized as the JSON body.
    PostJson(Handle),
    PutJson(Handle),
    PatchJson(Handle),
    /// POST with the accumulated form parameters as the body.
    PostForm,
}

impl HttpCall {
    pub fn verb(&self) -> HttpVerb {
        match self {
            HttpCall::Get => HttpVerb::Get,
            HttpCall::Delete => HttpVerb::Delete,
            HttpCall::PostJson(_) | HttpCall::PostForm => HttpVerb::Post,
            HttpCall::PutJson(_) => HttpVerb::Put,
            HttpCall::PatchJson(_) => HttpVerb::Patch,
        }
    }

    /// Document to serialize into the body, for the JSON calls.
    pub fn document(&self) -> Option<Handle> {
        match self {
            HttpCall::PostJson(doc) | HttpCall::PutJson(doc) | HttpCall::PatchJson(doc) => {
                Some(*doc)
            }
            _ => None,
        }
    }
}

/// Everything the transport needs to send the request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub verb: HttpVerb,
    pub body: String,
    pub headers: Headers,
    pub connect_timeout_secs: u64,
    pub follow_redirects: bool,
    pub max_redirects: u32,
    pub compression: bool,
    pub verbose: bool,
    pub user_agent: String,
}

impl RequestOptions {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            verb: HttpVerb::Get,
            body: String::new(),
            headers: Headers::new(),
            connect_timeout_secs: config.connect_timeout_secs,
            follow_redirects: config.follow_redirects,
            max_redirects: config.max_redirects,
            compression: config.compression,
            verbose: config.verbose,
            user_agent: config.user_agent.clone(),
        }
    }
}

/// What the transport reported.
#[derive(Debug, Clone, Default)]
struct Outcome {
    status: u16,
    headers: Headers,
    body: String,
    error: Option<String>,
}

/// Cached response metadata readable until the session is released.
#[derive(Debug, Clone, Default)]
struct ResponseSnapshot {
    headers: Headers,
    error: Option<String>,
}

/// One outbound HTTP request and its response cache.
pub struct HttpRequestSession {
    url: Url,
    request_id: Uuid,
    options: Mutex<RequestOptions>,
    form: Mutex<FormParams>,
    response: Mutex<ResponseSnapshot>,
    response_forward: Forward,
    submitted: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HttpRequestSession {
    /// Create a session for `url` seeded with the configured defaults.
    pub fn new(url: &str, defaults: &HttpConfig) -> BridgeResult<Self> {
        let url = Url::parse(url).map_err(|source| BridgeError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        Ok(Self {
            url,
            request_id: Uuid::new_v4(),
            options: Mutex::new(RequestOptions::from_config(defaults)),
            form: Mutex::new(FormParams::new()),
            response: Mutex::new(ResponseSnapshot::default()),
            response_forward: Forward::new(),
            submitted: AtomicBool::new(false),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn set_body(&self, body: impl Into<String>) {
        lock(&self.options).body = body.into();
    }

    /// Use serialized document text as the body.
    pub fn set_json_body(&self, text: String) {
        let mut options = lock(&self.options);
        options.body = text;
        options.headers.insert("Content-Type", CONTENT_TYPE_JSON);
    }

    /// Set a request header, replacing an existing value.
    pub fn add_header(&self, name: &str, value: &str) -> BridgeResult<()> {
        HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| BridgeError::InvalidHeader(name.to_string()))?;
        HeaderValue::from_str(value).map_err(|_| BridgeError::InvalidHeader(name.to_string()))?;
        lock(&self.options).headers.insert(name, value);
        Ok(())
    }

    pub fn append_form_param(&self, key: impl Into<String>, value: impl Into<String>) {
        lock(&self.form).append(key, value);
    }

    pub fn set_timeout(&self, secs: u64) {
        lock(&self.options).connect_timeout_secs = secs;
    }

    pub fn timeout(&self) -> u64 {
        lock(&self.options).connect_timeout_secs
    }

    pub fn set_follow_redirect(&self, follow: bool) {
        lock(&self.options).follow_redirects = follow;
    }

    pub fn follow_redirect(&self) -> bool {
        lock(&self.options).follow_redirects
    }

    pub fn set_max_redirects(&self, max: u32) {
        lock(&self.options).max_redirects = max;
    }

    pub fn max_redirects(&self) -> u32 {
        lock(&self.options).max_redirects
    }

    pub fn set_compression(&self, compression: bool) {
        lock(&self.options).compression = compression;
    }

    pub fn compression(&self) -> bool {
        lock(&self.options).compression
    }

    pub fn set_verbose(&self, verbose: bool) {
        lock(&self.options).verbose = verbose;
    }

    pub fn verbose(&self) -> bool {
        lock(&self.options).verbose
    }

    /// Copy of the current request options.
    pub fn options(&self) -> RequestOptions {
        lock(&self.options).clone()
    }

    pub fn is_submitted(&self) -> bool {
        self.submitted.load(Ordering::SeqCst)
    }

    /// Response header by case-insensitive name; none before the response.
    pub fn response_header(&self, name: &str) -> Option<String> {
        lock(&self.response).headers.get(name).map(str::to_string)
    }

    pub fn has_response_header(&self, name: &str) -> bool {
        lock(&self.response).headers.contains(name)
    }

    pub fn response_headers(&self) -> Headers {
        lock(&self.response).headers.clone()
    }

    /// Transport failure message, if the request never got a response.
    pub fn response_error(&self) -> Option<String> {
        lock(&self.response).error.clone()
    }

    pub fn response_forward(&self) -> &Forward {
        &self.response_forward
    }

    /// Apply the verb and body rules of `call` to a copy of the configured
    /// options. The session itself is left untouched.
    ///
    /// `document` is the serialized body for the JSON calls.
    pub(crate) fn prepare(&self, call: HttpCall, document: Option<String>) -> RequestOptions {
        let form_body = (call == HttpCall::PostForm).then(|| lock(&self.form).encode());
        let mut options = lock(&self.options).clone();
        options.verb = call.verb();
        if let Some(text) = document {
            options.body = text;
            options.headers.insert("Content-Type", CONTENT_TYPE_JSON);
        }
        if let Some(body) = form_body {
            options.body = body;
            options.headers.insert("Content-Type", CONTENT_TYPE_FORM);
        }
        options
    }

    /// Hand the request to the runtime. Needs a registered response callback.
    pub(crate) fn submit(
        self: &Arc<Self>,
        handle: Handle,
        options: RequestOptions,
        value: i64,
        runtime: &tokio::runtime::Handle,
        queue: Arc<TaskQueue>,
    ) -> BridgeResult<()> {
        if !self.response_forward.has_listeners() {
            return Err(BridgeError::NoCallback("response"));
        }
        if self.submitted.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::AlreadySubmitted(handle));
        }

        tracing::debug!(
            request_id = %self.request_id,
            verb = options.verb.as_str(),
            url = %self.url,
            "Submitting HTTP request"
        );

        let session = Arc::clone(self);
        runtime.spawn(async move {
            let outcome = session.execute(&options).await;
            session.complete(handle, options.verb, outcome, value, &queue);
        });
        Ok(())
    }

    async fn execute(&self, options: &RequestOptions) -> Outcome {
        let redirect = if options.follow_redirects {
            Policy::limited(options.max_redirects as usize)
        } else {
            Policy::none()
        };
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(options.connect_timeout_secs))
            .user_agent(options.user_agent.as_str())
            .redirect(redirect);
        if !options.compression {
            builder = builder.no_gzip();
        }
        let client = match builder.build() {
            Ok(client) => client,
            Err(e) => return Outcome::failed(e.to_string()),
        };

        let mut request = client.request(options.verb.method(), self.url.clone());
        for (name, value) in options.headers.iter() {
            request = request.header(name, value);
        }
        if !options.body.is_empty() {
            request = request.body(options.body.clone());
        }

        if options.verbose {
            tracing::info!(
                request_id = %self.request_id,
                verb = options.verb.as_str(),
                url = %self.url,
                headers = ?options.headers,
                body_len = options.body.len(),
                "HTTP request"
            );
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(request_id = %self.request_id, error = %e, "HTTP request failed");
                return Outcome::failed(e.to_string());
            }
        };

        let status = response.status().as_u16();
        let headers = Headers::from_pairs(response.headers().iter());
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(request_id = %self.request_id, error = %e, "Failed to read HTTP body");
                return Outcome {
                    status,
                    headers,
                    body: String::new(),
                    error: Some(e.to_string()),
                };
            }
        };

        if options.verbose {
            tracing::info!(
                request_id = %self.request_id,
                status,
                headers = ?headers,
                body_len = body.len(),
                "HTTP response"
            );
        }

        Outcome {
            status,
            headers,
            body,
            error: None,
        }
    }

    /// Runs on the transport thread once the outcome is known.
    fn complete(&self, handle: Handle, verb: HttpVerb, outcome: Outcome, value: i64, queue: &TaskQueue) {
        metrics::record_http_request(verb.as_str(), outcome.status);
        {
            let mut response = lock(&self.response);
            response.headers = outcome.headers;
            response.error = outcome.error;
        }

        // Pushed even without a listener: delivery re-checks the callback and
        // releases the handle either way.
        queue.push(HttpCompletion {
            request: handle,
            status: outcome.status,
            body: outcome.body,
            value,
        });
    }
}

impl Outcome {
    fn failed(error: String) -> Self {
        Self {
            status: 0,
            error: Some(error),
            ..Self::default()
        }
    }
}

impl std::fmt::Debug for HttpRequestSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequestSession")
            .field("url", &self.url.as_str())
            .field("request_id", &self.request_id)
            .field("submitted", &self.is_submitted())
            .finish()
    }
}
