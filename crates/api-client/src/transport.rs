//! Physical request execution.
//!
//! The gateway only sees [`ApiRequest`] and [`RawResponse`]; how bytes move
//! is behind [`Transport`]. [`HttpTransport`] is the reqwest implementation.

use std::future::Future;

use serde_json::Value;

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// File content sent as the `file` part of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipartForm {
    pub fields: Vec<(String, String)>,
    pub file: Option<FilePart>,
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: &str, value: impl ToString) -> Self {
        self.fields.push((name.to_string(), value.to_string()));
        self
    }

    pub fn file(mut self, part: FilePart) -> Self {
        self.file = Some(part);
        self
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn into_reqwest(self) -> reqwest::multipart::Form {
        let mut form = reqwest::multipart::Form::new();
        for (name, value) in self.fields {
            form = form.text(name, value);
        }
        if let Some(file) = self.file {
            let part = reqwest::multipart::Part::bytes(file.bytes).file_name(file.file_name);
            form = form.part("file", part);
        }
        form
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Multipart(MultipartForm),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, e.g. `/chat/list`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl ApiRequest {
    pub fn get(path: &str) -> Self {
        Self {
            method: Method::Get,
            path: path.to_string(),
            query: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    pub fn post_json(path: &str, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.to_string(),
            query: Vec::new(),
            body: RequestBody::Json(body),
        }
    }

    pub fn post_multipart(path: &str, form: MultipartForm) -> Self {
        Self {
            method: Method::Post,
            path: path.to_string(),
            query: Vec::new(),
            body: RequestBody::Multipart(form),
        }
    }

    pub fn query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_string(), value.to_string()));
        self
    }

    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Status and undecoded body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

pub trait Transport: Send + Sync + 'static {
    /// Perform one physical request. Only connection-level failures are
    /// errors; every HTTP status is returned as a [`RawResponse`].
    fn send(&self, request: ApiRequest) -> impl Future<Output = Result<RawResponse>> + Send;
}

/// reqwest-backed transport with a cookie store, so the session cookie set
/// by the login flow is sent on every call.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, base_url))
    }

    /// Create from an existing `reqwest::Client` (e.g. one that already
    /// carries session cookies).
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<RawResponse> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Multipart(form) => builder.multipart(form.into_reqwest()),
        };

        let resp = builder
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(RawResponse { status, body })
    }
}
