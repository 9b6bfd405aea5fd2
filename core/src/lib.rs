//! Sequential, single-flight HTTP request queue.
//!
//! # Overview
//! Callers enqueue outbound requests; a cooperative dispatcher task sends
//! them strictly one at a time in FIFO order, decorates each one with the
//! shared headers, cookie jar and timeouts in effect at the moment it is
//! dequeued, and reports every completion to a notification sink.
//!
//! # Design
//! - `HttpRequest` is the queued entity. Target, method, body and content
//!   type are fixed at construction; send-time state is injected once.
//! - `Dispatcher` owns the transport and the single in-flight slot. Taking
//!   it by `&mut` (for `drain`) or by value (for `run`) makes overlapping
//!   sends impossible.
//! - `QueueHandle` is the cloneable caller side: enqueue, reconfigure, stop.
//!   The stop flag is only read at safe points, so an in-flight send always
//!   completes and is delivered.
//! - The HTTP transport and the notification sink are traits passed in by
//!   the caller, never looked up globally.

pub mod config;
pub mod connector;
pub mod cookie;
pub mod error;
pub mod http;
pub mod queue;
pub mod sink;
pub mod transport;

pub use config::{ConnectorConfig, SharedState};
pub use connector::HttpConnector;
pub use cookie::CookieJar;
pub use error::{ConfigError, QueueError, RequestError, TransportError};
pub use http::{Completion, HttpMethod, HttpRequest, HttpResponse};
pub use queue::{Dispatcher, QueueHandle};
pub use sink::{ChannelSink, EventLevel, NotificationSink, SinkList, ON_MESSAGE};
pub use transport::{Transport, UreqTransport};
