//! HTTP transport abstraction.
//!
//! # Design
//! The queue never speaks HTTP itself; it hands each decorated request to a
//! `Transport`. `UreqTransport` is the production implementation: a blocking
//! `ureq` call moved onto tokio's blocking pool, with the request's
//! timeouts applied per call and status codes returned as data rather than
//! errors. Cookies are read from and written back to the request's shared
//! jar. ureq's global timeout bounds the whole call, body read included,
//! so the queue leaves deadline enforcement to it rather than abandoning a
//! blocking call that is still running.
//!
//! `ureq` has no request-body API for GET, HEAD and DELETE; a body attached
//! to one of those is not sent.

use std::future::Future;
use std::io;

use url::Url;

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

/// Sends one decorated request and waits for the response.
pub trait Transport: Send + Sync {
    fn send(&self, request: &HttpRequest) -> impl Future<Output = Result<HttpResponse, TransportError>> + Send;

    /// Whether `send` applies the request's `timeout` itself and returns
    /// only once the connection is finished with. When false the queue
    /// cuts the send off at the deadline.
    fn enforces_timeout(&self) -> bool {
        false
    }
}

#[derive(Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new() -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UreqTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let agent = self.agent.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || execute(&agent, &request))
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?
    }

    fn enforces_timeout(&self) -> bool {
        true
    }
}

fn execute(agent: &ureq::Agent, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
    let url = request.target();
    let host = host_of(url)?;

    let mut headers: Vec<(String, String)> = request.headers().to_vec();
    if let Some(content_type) = request.content_type() {
        headers.push(("content-type".to_string(), content_type.to_string()));
    }
    if let Some(cookie) = request.cookie_jar().and_then(|jar| jar.header_for(&host)) {
        headers.push(("cookie".to_string(), cookie));
    }

    let body = request.body().unwrap_or_default();
    let result = match request.method() {
        HttpMethod::Get => configure(agent.get(url), request, &headers).call(),
        HttpMethod::Head => configure(agent.head(url), request, &headers).call(),
        HttpMethod::Delete => configure(agent.delete(url), request, &headers).call(),
        HttpMethod::Post => configure(agent.post(url), request, &headers).send(body),
        HttpMethod::Put => configure(agent.put(url), request, &headers).send(body),
    };
    let mut response = result.map_err(map_error)?;

    if let Some(jar) = request.cookie_jar() {
        let set_cookies = response.headers().get_all("set-cookie");
        jar.store_from_headers(&host, set_cookies.iter().filter_map(|v| v.to_str().ok()));
    }

    let status = response.status().as_u16();
    let response_headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();
    let body = match request.method() {
        HttpMethod::Head => Vec::new(),
        _ => response.body_mut().read_to_vec().map_err(map_error)?,
    };

    Ok(HttpResponse {
        status,
        headers: response_headers,
        body,
    })
}

/// Host a request's cookies are stored under, in `url`'s normalized form.
fn host_of(target: &str) -> Result<String, TransportError> {
    let url = Url::parse(target).map_err(|e| TransportError::Other(format!("invalid url {target}: {e}")))?;
    url.host_str()
        .map(str::to_string)
        .ok_or_else(|| TransportError::Other(format!("url has no host: {target}")))
}

fn configure<B>(
    mut builder: ureq::RequestBuilder<B>,
    request: &HttpRequest,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .config()
        .timeout_global(request.timeout())
        .timeout_recv_response(request.read_write_timeout())
        .timeout_recv_body(request.read_write_timeout())
        .build()
}

fn map_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Timeout(_) => TransportError::Timeout,
        ureq::Error::HostNotFound => TransportError::HostNotFound,
        ureq::Error::ConnectionFailed => TransportError::ConnectionRefused,
        ureq::Error::Io(e) => match e.kind() {
            io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused,
            io::ErrorKind::TimedOut => TransportError::Timeout,
            _ => TransportError::Io(e.to_string()),
        },
        other => TransportError::Other(other.to_string()),
    }
}
