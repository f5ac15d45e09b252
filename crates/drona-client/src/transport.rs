//! HTTP seam.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use drona_config::DashboardConfig;

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    /// Ordered text parts of a multipart form post.
    Multipart(Vec<(String, String)>),
    Json(Value),
}

/// A request relative to the dashboard base URL, or absolute when `path`
/// already carries a scheme.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl TransportRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post(path: impl Into<String>, body: RequestBody) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            query: Vec::new(),
            body,
        }
    }

    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn form_value(&self, key: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Multipart(parts) => parts
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReply {
    pub status: u16,
    pub body: String,
}

impl TransportReply {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn json(value: &Value) -> Self {
        Self::ok(value.to_string())
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportReply, ClientError>;
}

#[async_trait]
impl Transport for Arc<dyn Transport> {
    async fn send(&self, request: TransportRequest) -> Result<TransportReply, ClientError> {
        (**self).send(request).await
    }
}

/// reqwest-backed transport.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &DashboardConfig) -> Result<Self, ClientError> {
        Self::new(config.base_url(), config.request_timeout())
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportReply, ClientError> {
        let url = self.url_for(&request.path);
        debug!(method = ?request.method, url = %url, params = request.query.len(), "dashboard request");

        let builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        let builder = if request.query.is_empty() {
            builder
        } else {
            builder.query(&request.query)
        };
        let builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart(parts) => {
                let form = parts
                    .into_iter()
                    .fold(reqwest::multipart::Form::new(), |form, (key, value)| {
                        form.text(key, value)
                    });
                builder.multipart(form)
            }
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(url = %url, status, bytes = body.len(), "dashboard response");
        Ok(TransportReply { status, body })
    }
}

type Responder = dyn Fn(&TransportRequest) -> Result<TransportReply, ClientError> + Send + Sync;

/// Records requests and answers them from a responder closure, optionally
/// after a delay.
pub struct MockTransport {
    responder: Box<Responder>,
    delay: Duration,
    requests: Mutex<Vec<TransportRequest>>,
}

impl MockTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&TransportRequest) -> Result<TransportReply, ClientError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Serve `replies` in order; once exhausted, answer `200 []`.
    pub fn scripted(replies: Vec<TransportReply>) -> Self {
        let queue = Mutex::new(VecDeque::from(replies));
        Self::new(move |_| {
            let next = queue.lock().ok().and_then(|mut q| q.pop_front());
            Ok(next.unwrap_or_else(|| TransportReply::ok("[]")))
        })
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    /// Requests whose path starts with `prefix`.
    pub fn requests_to(&self, prefix: &str) -> Vec<TransportRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.path.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportReply, ClientError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.responder)(&request)
    }
}
