//! The request pipeline.
//!
//! # Design
//! One call flows through four stages:
//!
//! 1. `build_request` resolves the descriptor into an `HttpRequest` (base URL,
//!    query string, body encoding, bearer token).
//! 2. With `prevent_repeat`, the call registers in the `PendingRegistry`,
//!    which cancels any identical call still in flight.
//! 3. `dispatch` sends the request, racing it against the cancellation token,
//!    and redispatches on transport failure while the retry budget lasts.
//! 4. `classify` turns the response into a `Payload` or a `RequestError`,
//!    unwrapping the business envelope on the way.
//!
//! Every unrecovered error except cancellation ends in one de-bounced notice.
//! Success notices skip the de-bounce and never displace a pending error.

use std::future::Future;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use reqwest::header::HeaderValue;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::descriptor::{DedupKey, RequestDescriptor, RequestOptions};
use crate::envelope::Envelope;
use crate::error::{RequestError, TransportFailure};
use crate::http::{ContentType, HttpMethod, HttpRequest, HttpResponse, ResponseType};
use crate::messages;
use crate::notify::{DebouncedNotifier, LoadingIndicator, NoopIndicator, Notice, Notifier, SilentNotifier};
use crate::registry::{PendingHandle, PendingRegistry};
use crate::retry::RetryPolicy;
use crate::session::Session;
use crate::transport::{ReqwestTransport, Transport};

/// Successful outcome of a call.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `data` unwrapped from a successful envelope (`Null` when absent).
    Data(Value),
    /// The whole envelope, for calls with `transform_response` off.
    Envelope(Envelope),
    /// Body bytes of a `ResponseType::Blob` call.
    Raw(Bytes),
}

impl Payload {
    pub fn deserialize<T: DeserializeOwned>(self) -> Result<T, RequestError> {
        match self {
            Payload::Data(value) => serde_json::from_value(value),
            Payload::Envelope(envelope) => serde_json::to_value(envelope).and_then(serde_json::from_value),
            Payload::Raw(bytes) => serde_json::from_slice(&bytes),
        }
        .map_err(|e| RequestError::Deserialization(e.to_string()))
    }

    pub fn into_bytes(self) -> Result<Bytes, RequestError> {
        match self {
            Payload::Raw(bytes) => Ok(bytes),
            Payload::Data(value) => serde_json::to_vec(&value)
                .map(Bytes::from)
                .map_err(|e| RequestError::Serialization(e.to_string())),
            Payload::Envelope(envelope) => serde_json::to_vec(&envelope)
                .map(Bytes::from)
                .map_err(|e| RequestError::Serialization(e.to_string())),
        }
    }
}

/// Builder for `Client`. Unset collaborators fall back to a reqwest
/// transport, no session, and silent UI hooks.
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn Transport>>,
    session: Option<Arc<dyn Session>>,
    notifier: Option<Arc<dyn Notifier>>,
    indicator: Option<Arc<dyn LoadingIndicator>>,
}

impl ClientBuilder {
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn session(mut self, session: Arc<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn loading_indicator(mut self, indicator: Arc<dyn LoadingIndicator>) -> Self {
        self.indicator = Some(indicator);
        self
    }

    pub fn build(self) -> Result<Client, TransportFailure> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(self.config.timeout)?),
        };
        let notifier = DebouncedNotifier::new(
            self.notifier.unwrap_or_else(|| Arc::new(SilentNotifier)),
            self.config.notice_window,
        );
        Ok(Client {
            config: Arc::new(self.config),
            transport,
            session: self.session,
            notifier,
            indicator: self.indicator.unwrap_or_else(|| Arc::new(NoopIndicator)),
            pending: Arc::new(PendingRegistry::new()),
        })
    }
}

/// HTTP client wrapper that owns the pipeline and its pending-request registry.
///
/// Cloning is cheap; clones share the registry and the notice de-bounce.
#[derive(Clone)]
pub struct Client {
    config: Arc<ClientConfig>,
    transport: Arc<dyn Transport>,
    session: Option<Arc<dyn Session>>,
    notifier: DebouncedNotifier,
    indicator: Arc<dyn LoadingIndicator>,
    pending: Arc<PendingRegistry>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            transport: None,
            session: None,
            notifier: None,
            indicator: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pending(&self) -> &PendingRegistry {
        &self.pending
    }

    /// Cancel every in-flight de-duplicated request.
    pub fn cancel_all_pending(&self) -> usize {
        self.pending.cancel_all(messages::ALL_CANCELLED)
    }

    /// Show a notice still waiting out the de-bounce window.
    pub fn flush_notices(&self) {
        self.notifier.flush();
    }

    pub async fn request(&self, descriptor: RequestDescriptor) -> Result<Payload, RequestError> {
        let span = tracing::debug_span!(
            "request",
            request_id = %Uuid::new_v4(),
            method = %descriptor.method,
            url = %descriptor.url,
        );
        async {
            let result = self.run(&descriptor).await;
            if let Err(err) = &result {
                self.report(&descriptor.options, err);
            }
            result
        }
        .instrument(span)
        .await
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        let descriptor = RequestDescriptor {
            method: HttpMethod::Get,
            url: url.to_string(),
            params,
            body: None,
            options,
        };
        self.request(descriptor).await?.deserialize()
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        url: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        let descriptor = RequestDescriptor {
            method: HttpMethod::Post,
            url: url.to_string(),
            params: None,
            body,
            options,
        };
        self.request(descriptor).await?.deserialize()
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        url: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        let descriptor = RequestDescriptor {
            method: HttpMethod::Put,
            url: url.to_string(),
            params: None,
            body,
            options,
        };
        self.request(descriptor).await?.deserialize()
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        url: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<T, RequestError> {
        let descriptor = RequestDescriptor {
            method: HttpMethod::Delete,
            url: url.to_string(),
            params,
            body: None,
            options,
        };
        self.request(descriptor).await?.deserialize()
    }

    /// GET a binary payload. The body is returned as-is.
    pub async fn download(
        &self,
        url: &str,
        params: Option<Value>,
        options: RequestOptions,
    ) -> Result<Bytes, RequestError> {
        let descriptor = RequestDescriptor {
            method: HttpMethod::Get,
            url: url.to_string(),
            params,
            body: None,
            options: options.blob(),
        };
        self.request(descriptor).await?.into_bytes()
    }

    /// Resolve a descriptor into the request the transport will send.
    ///
    /// `now_ms` feeds the GET cache-busting parameter.
    pub fn build_request(
        &self,
        descriptor: &RequestDescriptor,
        now_ms: u64,
    ) -> Result<HttpRequest, RequestError> {
        let mut resolved = self.config.resolve(&descriptor.url);
        let mut query = Vec::new();
        match &descriptor.params {
            None | Some(Value::Null) => {}
            Some(Value::String(segment)) => resolved.push_str(segment),
            Some(params) => query.extend(pairs(params, "params")?),
        }

        let mut body = descriptor.body.clone();
        if descriptor.method == HttpMethod::Get && self.config.cache_bust_get {
            query.push(("_t".to_string(), now_ms.to_string()));
        }
        if descriptor.method != HttpMethod::Get && descriptor.options.join_params_to_url {
            if let Some(moved) = body.take() {
                query.extend(pairs(&moved, "body")?);
            }
        }

        let mut url = Url::parse(&resolved).map_err(|e| RequestError::InvalidUrl {
            url: resolved.clone(),
            message: e.to_string(),
        })?;
        if !query.is_empty() {
            let mut serializer = url.query_pairs_mut();
            for (key, value) in &query {
                serializer.append_pair(key, value);
            }
        }

        let mut headers = Vec::new();
        let encoded = match body {
            Some(body) => {
                let content_type = descriptor.options.content_type.unwrap_or(self.config.content_type);
                let (header, bytes) = encode_body(&body, content_type)?;
                headers.push(("Content-Type".to_string(), header));
                Some(bytes)
            }
            None => None,
        };
        if let Some(token) = self.session.as_ref().and_then(|session| session.token()) {
            headers.push(("Authorization".to_string(), format!("Bearer {token}")));
        }
        for (name, value) in &headers {
            HeaderValue::from_str(value).map_err(|e| RequestError::InvalidHeader {
                name: name.clone(),
                message: e.to_string(),
            })?;
        }

        Ok(HttpRequest {
            method: descriptor.method,
            url: url.into(),
            headers,
            body: encoded,
            timeout: descriptor.options.timeout,
        })
    }

    async fn run(&self, descriptor: &RequestDescriptor) -> Result<Payload, RequestError> {
        let request = self.build_request(descriptor, unix_millis())?;
        let options = &descriptor.options;

        let pending = options
            .prevent_repeat
            .then(|| PendingGuard::register(&self.pending, descriptor.dedup_key()));
        let _loading = options.loading.then(|| LoadingGuard::start(&self.indicator));

        let outcome = self
            .dispatch(request, options, pending.as_ref().map(|guard| &guard.handle))
            .await;
        drop(pending);
        self.classify(options, &descriptor.url, outcome?)
    }

    async fn dispatch(
        &self,
        request: HttpRequest,
        options: &RequestOptions,
        handle: Option<&PendingHandle>,
    ) -> Result<HttpResponse, RequestError> {
        let mut policy = RetryPolicy::new(
            options.retry.unwrap_or(self.config.retry_count),
            options.retry_delay.unwrap_or(self.config.retry_delay),
        );
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            tracing::debug!(attempt = attempts, "dispatching");
            let failure = match until_cancelled(handle, self.transport.send(request.clone())).await? {
                Ok(response) => return Ok(response),
                Err(failure) => failure,
            };

            let Some(delay) = policy.next_delay(&failure) else {
                return Err(RequestError::Transport {
                    attempts,
                    source: failure,
                });
            };
            tracing::warn!(
                attempt = attempts,
                remaining = policy.remaining(),
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "no response, retrying"
            );
            until_cancelled(handle, tokio::time::sleep(delay)).await?;
        }
    }

    fn classify(
        &self,
        options: &RequestOptions,
        url: &str,
        response: HttpResponse,
    ) -> Result<Payload, RequestError> {
        if !response.is_success() {
            let status = response.status;
            tracing::warn!(status, status_text = %response.status_text, "request failed with HTTP status");
            return Err(RequestError::HttpStatus {
                status,
                message: messages::http_status_message(status).to_string(),
                response,
            });
        }

        if options.response_type == ResponseType::Blob {
            return Ok(Payload::Raw(response.body));
        }

        if response.body.iter().all(u8::is_ascii_whitespace) {
            return Err(RequestError::EmptyResponse { url: url.to_string() });
        }
        let envelope: Envelope = serde_json::from_slice(&response.body)
            .map_err(|e| RequestError::Deserialization(e.to_string()))?;

        if envelope.is_success() {
            if options.show_success_message {
                let text = options
                    .success_message_text
                    .clone()
                    .or_else(|| envelope.message.as_deref().map(str::trim).filter(|m| !m.is_empty()).map(str::to_string))
                    .unwrap_or_else(|| messages::REQUEST_SUCCEEDED.to_string());
                self.notifier.show_now(Notice::success(text));
            }
            return Ok(if options.transform_response {
                Payload::Data(envelope.data.unwrap_or(Value::Null))
            } else {
                Payload::Envelope(envelope)
            });
        }

        let code = envelope.code;
        let message = messages::business_message(code, envelope.message.as_deref());
        tracing::warn!(code, %message, "business failure");
        if code == 401 {
            self.expire_session();
        }
        Err(RequestError::Business { code, message, envelope })
    }

    fn expire_session(&self) {
        tracing::info!("session expired, logging out");
        if let Some(session) = &self.session {
            session.logout();
            session.reload();
        }
    }

    fn report(&self, options: &RequestOptions, err: &RequestError) {
        if err.is_cancelled() {
            tracing::debug!(error = %err, "request cancelled");
            return;
        }
        if !options.show_error_message {
            return;
        }
        let text = match err {
            RequestError::Business { .. } => options.error_message_text.clone().or_else(|| err.user_message()),
            _ => err.user_message(),
        };
        if let Some(text) = text {
            self.notifier.notify(Notice::error(text));
        }
    }
}

/// Run `future` unless the request is cancelled first.
async fn until_cancelled<F: Future>(
    handle: Option<&PendingHandle>,
    future: F,
) -> Result<F::Output, RequestError> {
    match handle {
        Some(handle) => tokio::select! {
            biased;
            () = handle.token().cancelled() => Err(cancelled(handle)),
            output = future => Ok(output),
        },
        None => Ok(future.await),
    }
}

fn cancelled(handle: &PendingHandle) -> RequestError {
    RequestError::Cancelled {
        reason: handle
            .cancel_reason()
            .unwrap_or_else(|| messages::DUPLICATE_CANCELLED.to_string()),
    }
}

/// Keeps a de-duplicated request registered until it settles or its future
/// is dropped.
struct PendingGuard<'a> {
    registry: &'a PendingRegistry,
    handle: PendingHandle,
}

impl<'a> PendingGuard<'a> {
    fn register(registry: &'a PendingRegistry, key: DedupKey) -> Self {
        Self {
            handle: registry.register(key, messages::DUPLICATE_CANCELLED),
            registry,
        }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.registry.settle(&self.handle);
    }
}

struct LoadingGuard {
    indicator: Arc<dyn LoadingIndicator>,
}

impl LoadingGuard {
    fn start(indicator: &Arc<dyn LoadingIndicator>) -> Self {
        indicator.start();
        Self {
            indicator: Arc::clone(indicator),
        }
    }
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.indicator.done();
    }
}

/// Flatten a JSON object into key/value pairs. Arrays repeat their key and
/// nulls are skipped.
fn pairs(value: &Value, what: &str) -> Result<Vec<(String, String)>, RequestError> {
    let Value::Object(map) = value else {
        return Err(RequestError::Serialization(format!("{what} must be a JSON object")));
    };
    let mut out = Vec::with_capacity(map.len());
    for (key, value) in map {
        match value {
            Value::Array(items) => {
                out.extend(items.iter().filter_map(scalar).map(|item| (key.clone(), item)));
            }
            other => {
                if let Some(item) = scalar(other) {
                    out.push((key.clone(), item));
                }
            }
        }
    }
    Ok(out)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn encode_body(body: &Value, content_type: ContentType) -> Result<(String, Bytes), RequestError> {
    match content_type {
        ContentType::Json => {
            let bytes = serde_json::to_vec(body).map_err(|e| RequestError::Serialization(e.to_string()))?;
            Ok((content_type.header_value().to_string(), Bytes::from(bytes)))
        }
        ContentType::FormUrlEncoded => {
            let fields = pairs(body, "form body")?;
            let encoded = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(fields)
                .finish();
            Ok((content_type.header_value().to_string(), Bytes::from(encoded)))
        }
        ContentType::FormData => {
            let fields = pairs(body, "form body")?;
            let boundary = format!("envelope-{}", Uuid::new_v4().simple());
            let mut encoded = String::new();
            for (name, value) in &fields {
                encoded.push_str(&format!(
                    "--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                ));
            }
            encoded.push_str(&format!("--{boundary}--\r\n"));
            let header = format!("{}; boundary={boundary}", content_type.header_value());
            Ok((header, Bytes::from(encoded)))
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
