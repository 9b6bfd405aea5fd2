//! Request and response entities.
//!
//! # Design
//! An `HttpRequest` has two halves. The description (target, method, body,
//! content type) is fixed once the request is built and handed to the queue.
//! The send-time half (headers, cookie jar, timeouts) is a `SharedState`
//! snapshot the dispatcher injects exactly once, immediately before the
//! send. Fields are private so neither half can be changed out of turn.
//!
//! Bodies are raw bytes; the queue never looks inside them.

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use uuid::Uuid;

use crate::config::SharedState;
use crate::cookie::CookieJar;
use crate::error::{RequestError, TransportError};

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued outbound call.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    id: Uuid,
    method: HttpMethod,
    target: String,
    body: Option<Vec<u8>>,
    content_type: Option<String>,
    send_state: Option<SharedState>,
}

impl HttpRequest {
    /// A request with no body and no content type.
    pub fn new(target: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            id: Uuid::new_v4(),
            method,
            target: target.into(),
            body: None,
            content_type: None,
            send_state: None,
        }
    }

    /// Attach the body. Fails if a body was already attached.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Result<Self, RequestError> {
        if self.body.is_some() {
            return Err(RequestError::BodyAlreadySet);
        }
        self.body = Some(body.into());
        Ok(self)
    }

    /// Set the `content-type` sent with the body. Fails if already set.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Result<Self, RequestError> {
        if self.content_type.is_some() {
            return Err(RequestError::ContentTypeAlreadySet);
        }
        self.content_type = Some(content_type.into());
        Ok(self)
    }

    /// Inject send-time state. Called once by the dispatcher right before
    /// the request goes to the transport.
    pub fn decorate(&mut self, state: SharedState) -> Result<(), RequestError> {
        if self.send_state.is_some() {
            return Err(RequestError::AlreadyDecorated);
        }
        self.send_state = Some(state);
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn is_decorated(&self) -> bool {
        self.send_state.is_some()
    }

    /// The state injected at send time, if any.
    pub fn send_state(&self) -> Option<&SharedState> {
        self.send_state.as_ref()
    }

    /// Headers injected at send time. Empty until decorated.
    pub fn headers(&self) -> &[(String, String)] {
        self.send_state.as_ref().map(|s| s.headers.as_slice()).unwrap_or(&[])
    }

    pub fn cookie_jar(&self) -> Option<&CookieJar> {
        self.send_state.as_ref().map(|s| &s.cookie_jar)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.send_state.as_ref().and_then(|s| s.timeout)
    }

    pub fn read_write_timeout(&self) -> Option<Duration> {
        self.send_state.as_ref().and_then(|s| s.read_write_timeout)
    }
}

/// An HTTP response described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// First header with this name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// A finished send: the request as it was sent plus what came back.
#[derive(Debug, Clone)]
pub struct Completion {
    pub request: HttpRequest,
    pub outcome: Result<HttpResponse, TransportError>,
}

impl Completion {
    /// Status code, or `None` when the transport failed.
    pub fn status(&self) -> Option<u16> {
        self.outcome.as_ref().ok().map(|r| r.status)
    }

    pub fn is_success(&self) -> bool {
        self.outcome.as_ref().is_ok_and(HttpResponse::is_success)
    }

    pub fn response(&self) -> Option<&HttpResponse> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&TransportError> {
        self.outcome.as_ref().err()
    }
}
