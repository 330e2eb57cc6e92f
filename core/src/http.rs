//! HTTP transport types shared by the pipeline and its transports.
//!
//! # Design
//! Requests and responses are plain data. The pipeline resolves a
//! `RequestDescriptor` into an `HttpRequest`, hands it to a `Transport`, and
//! classifies the `HttpResponse` it gets back. Keeping the wire shape as data
//! lets tests script transports without a network and lets errors carry the
//! original response back to the caller.

use std::time::Duration;

use bytes::Bytes;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a 2xx response body should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    /// Parse the body as a business envelope.
    #[default]
    Json,
    /// Return the body bytes untouched, bypassing envelope unwrapping.
    Blob,
}

/// Request body encodings understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentType {
    #[default]
    Json,
    FormUrlEncoded,
    FormData,
}

impl ContentType {
    pub fn header_value(self) -> &'static str {
        match self {
            ContentType::Json => "application/json;charset=UTF-8",
            ContentType::FormUrlEncoded => "application/x-www-form-urlencoded;charset=UTF-8",
            ContentType::FormData => "multipart/form-data",
        }
    }
}

/// A fully resolved HTTP request.
///
/// `url` already carries the query string. The transport must not rewrite it.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// An HTTP response as received from the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}
