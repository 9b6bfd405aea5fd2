//! REST front-end over a dispatch queue.
//!
//! # Design
//! `HttpConnector` holds a host base URL and a `QueueHandle`. Each verb
//! method joins the action path onto the host, builds an `HttpRequest` and
//! enqueues it; results arrive later through the dispatcher's sink, keyed
//! by the returned request id. Bodies are raw bytes or serde-serialized
//! JSON.

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::config::ConnectorConfig;
use crate::error::QueueError;
use crate::http::{HttpMethod, HttpRequest};
use crate::queue::QueueHandle;
use crate::sink::ON_MESSAGE;

const OCTET_STREAM: &str = "application/octet-stream";
const JSON: &str = "application/json";

#[derive(Clone)]
pub struct HttpConnector {
    name: String,
    host: String,
    queue: QueueHandle,
}

impl HttpConnector {
    pub fn new(name: impl Into<String>, host: &str, queue: QueueHandle) -> Self {
        Self {
            name: name.into(),
            host: host.trim_end_matches('/').to_string(),
            queue,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    /// Apply a JSON configuration block. Only the keys present are changed;
    /// the timeout is used for both the overall and the read/write deadline.
    pub fn set_config(&mut self, config: &Value) -> Result<(), QueueError> {
        let mut config = ConnectorConfig::from_json(config)?;
        if !config.event_levels.is_empty() {
            self.queue.set_event_level(config.level_for(ON_MESSAGE));
        }
        if config.timeout.is_some() {
            self.queue.set_timeouts(config.timeout, config.timeout);
        }
        if let Some(host) = config.host.take() {
            self.host = host;
        }
        tracing::debug!(name = %self.name, host = %self.host, "connector configured");
        Ok(())
    }

    /// Replace all shared headers.
    pub fn set_header(&self, headers: Vec<(String, String)>) -> &Self {
        self.queue.set_headers(headers);
        self
    }

    pub fn append_header(&self, name: &str, value: &str) -> &Self {
        self.queue.append_header(name, value);
        self
    }

    pub fn restful(&self, method: HttpMethod, action: &str) -> Result<Uuid, QueueError> {
        self.queue.enqueue(HttpRequest::new(self.url(action), method))
    }

    pub fn restful_with_body(
        &self,
        method: HttpMethod,
        action: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<Uuid, QueueError> {
        let request = HttpRequest::new(self.url(action), method)
            .with_body(body)?
            .with_content_type(content_type)?;
        self.queue.enqueue(request)
    }

    pub fn get(&self, action: &str) -> Result<Uuid, QueueError> {
        self.restful(HttpMethod::Get, action)
    }

    pub fn head(&self, action: &str) -> Result<Uuid, QueueError> {
        self.restful(HttpMethod::Head, action)
    }

    pub fn delete(&self, action: &str) -> Result<Uuid, QueueError> {
        self.restful(HttpMethod::Delete, action)
    }

    pub fn post_bytes(&self, action: &str, body: Vec<u8>) -> Result<Uuid, QueueError> {
        self.restful_with_body(HttpMethod::Post, action, body, OCTET_STREAM)
    }

    pub fn put_bytes(&self, action: &str, body: Vec<u8>) -> Result<Uuid, QueueError> {
        self.restful_with_body(HttpMethod::Put, action, body, OCTET_STREAM)
    }

    pub fn post_json<B: Serialize>(&self, action: &str, body: &B) -> Result<Uuid, QueueError> {
        self.restful_with_body(HttpMethod::Post, action, to_json(body)?, JSON)
    }

    pub fn put_json<B: Serialize>(&self, action: &str, body: &B) -> Result<Uuid, QueueError> {
        self.restful_with_body(HttpMethod::Put, action, to_json(body)?, JSON)
    }

    /// Stop the underlying queue.
    pub fn destroy(&self) {
        tracing::debug!(name = %self.name, "connector destroyed");
        self.queue.stop();
    }

    fn url(&self, action: &str) -> String {
        format!("{}{action}", self.host)
    }
}

fn to_json<B: Serialize>(body: &B) -> Result<Vec<u8>, QueueError> {
    serde_json::to_vec(body).map_err(|e| QueueError::Serialization(e.to_string()))
}
