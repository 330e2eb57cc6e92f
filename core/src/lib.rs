//! Client-side HTTP request pipeline with business-envelope unwrapping.
//!
//! # Overview
//! `Client` wraps an asynchronous HTTP transport and runs every call through
//! one configurable pipeline: bearer-token injection, de-duplication of
//! identical in-flight calls, fixed-delay retry of calls that got no
//! response, unwrapping of the server's `{code, message, data}` envelope, and
//! de-bounced user notices for whatever fails.
//!
//! # Design
//! - Network I/O lives behind the `Transport` trait; `ReqwestTransport` is
//!   the default. Requests and responses cross it as plain data.
//! - UI and session concerns are collaborators (`Notifier`,
//!   `LoadingIndicator`, `Session`) injected through `ClientBuilder`.
//! - The pending-request registry is owned by the client, not global.
//! - Transport, HTTP-status and business failures are distinct
//!   `RequestError` variants; cancellation is its own non-error outcome.

pub mod client;
pub mod config;
pub mod descriptor;
pub mod envelope;
pub mod error;
pub mod http;
pub mod messages;
pub mod notify;
pub mod registry;
pub mod retry;
pub mod session;
pub mod transport;

pub use client::{Client, ClientBuilder, Payload};
pub use config::{ClientConfig, ConfigError, Mode};
pub use descriptor::{DedupKey, RequestDescriptor, RequestOptions};
pub use envelope::Envelope;
pub use error::{RequestError, TransportErrorKind, TransportFailure};
pub use http::{ContentType, HttpMethod, HttpRequest, HttpResponse, ResponseType};
pub use notify::{LoadingIndicator, Notice, NoticeLevel, Notifier, RecordingNotifier};
pub use registry::PendingRegistry;
pub use session::{MemorySession, Session};
pub use transport::{ReqwestTransport, Transport};
