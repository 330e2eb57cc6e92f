//! Per-call request descriptors and their behavioral flags.
//!
//! # Design
//! A `RequestDescriptor` is created for one call and dropped once the call
//! settles. Flags left unset in `RequestOptions` inherit the client's
//! `ClientConfig`, so the same pipeline serves every call shape.

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::http::{ContentType, HttpMethod, ResponseType};

/// Behavioral flags for a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    /// Retry budget for transport failures. `None` uses the client default,
    /// `Some(0)` disables retry.
    pub retry: Option<u32>,
    pub retry_delay: Option<Duration>,
    /// Cancel an in-flight identical request before dispatching this one.
    pub prevent_repeat: bool,
    /// Drive the loading indicator for the lifetime of the request.
    pub loading: bool,
    pub response_type: ResponseType,
    /// Unwrap `data` from a successful envelope. When false the whole
    /// envelope is returned.
    pub transform_response: bool,
    pub show_success_message: bool,
    pub show_error_message: bool,
    pub success_message_text: Option<String>,
    pub error_message_text: Option<String>,
    /// Move the body object of a non-GET request into the query string.
    pub join_params_to_url: bool,
    pub content_type: Option<ContentType>,
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            retry: None,
            retry_delay: None,
            prevent_repeat: false,
            loading: false,
            response_type: ResponseType::Json,
            transform_response: true,
            show_success_message: false,
            show_error_message: true,
            success_message_text: None,
            error_message_text: None,
            join_params_to_url: false,
            content_type: None,
            timeout: None,
        }
    }
}

impl RequestOptions {
    pub fn prevent_repeat(mut self) -> Self {
        self.prevent_repeat = true;
        self
    }

    pub fn with_retry(mut self, budget: u32) -> Self {
        self.retry = Some(budget);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn with_loading(mut self) -> Self {
        self.loading = true;
        self
    }

    pub fn blob(mut self) -> Self {
        self.response_type = ResponseType::Blob;
        self
    }

    pub fn raw_envelope(mut self) -> Self {
        self.transform_response = false;
        self
    }

    pub fn quiet(mut self) -> Self {
        self.show_error_message = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Everything needed to dispatch one call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    pub method: HttpMethod,
    pub url: String,
    pub params: Option<Value>,
    pub body: Option<Value>,
    pub options: RequestOptions,
}

impl RequestDescriptor {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: None,
            body: None,
            options: RequestOptions::default(),
        }
    }

    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Composite identity used to detect identical in-flight requests.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey(
            [
                self.url.clone(),
                self.method.as_str().to_string(),
                serialize_part(self.params.as_ref()),
                serialize_part(self.body.as_ref()),
            ]
            .join("&"),
        )
    }
}

fn serialize_part(value: Option<&Value>) -> String {
    value.map(Value::to_string).unwrap_or_default()
}

/// De-duplication key: url, method, serialized params and serialized body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
