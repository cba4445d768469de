//! Scripted in-memory transport for gateway and session tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;

use crate::error::{GatewayError, Result};
use crate::transport::{ApiRequest, RawResponse, Transport};

#[derive(Debug, Clone)]
pub enum MockReply {
    Json(u16, Value),
    Text(u16, String),
    /// Connection-level failure.
    Fail(String),
    /// Never answers.
    Hang,
    Delayed(Duration, Box<MockReply>),
}

impl MockReply {
    pub fn ok(value: Value) -> Self {
        Self::Json(200, value)
    }

    pub fn delayed(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }
}

/// Replies are queued per path, or per `path?name=value` for a specific
/// query parameter (checked first). The last queued reply for a route
/// repeats; unscripted paths answer 404.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<MockReply>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, path: &str, reply: MockReply) {
        lock(&self.routes)
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn push_json(&self, path: &str, value: Value) {
        self.push(path, MockReply::ok(value));
    }

    /// Queue a reply for requests to `path` carrying `name=value`.
    pub fn push_for_query(&self, path: &str, name: &str, value: impl ToString, reply: MockReply) {
        let value = value.to_string();
        self.push(&format!("{path}?{name}={value}"), reply);
    }

    /// Drop queued replies for `path` and queue `reply`.
    pub fn set(&self, path: &str, reply: MockReply) {
        lock(&self.routes).insert(path.to_string(), VecDeque::from([reply]));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        lock(&self.requests).clone()
    }

    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        lock(&self.requests)
            .iter()
            .filter(|req| req.path == path)
            .cloned()
            .collect()
    }

    pub fn calls(&self, path: &str) -> usize {
        lock(&self.requests)
            .iter()
            .filter(|req| req.path == path)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.requests).len()
    }

    fn next_reply(&self, request: &ApiRequest) -> MockReply {
        let mut routes = lock(&self.routes);
        let route = request
            .query
            .iter()
            .map(|(name, value)| format!("{}?{name}={value}", request.path))
            .find(|route| routes.contains_key(route))
            .unwrap_or_else(|| request.path.clone());
        let path = request.path.as_str();
        match routes.get_mut(&route) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(MockReply::Hang),
            Some(queue) if queue.len() == 1 => queue[0].clone(),
            _ => MockReply::Json(
                404,
                serde_json::json!({ "error": format!("unscripted {path}") }),
            ),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn play(mut reply: MockReply) -> Result<RawResponse> {
    while let MockReply::Delayed(delay, inner) = reply {
        tokio::time::sleep(delay).await;
        reply = *inner;
    }
    match reply {
        MockReply::Json(status, value) => Ok(RawResponse {
            status,
            body: value.to_string(),
        }),
        MockReply::Text(status, body) => Ok(RawResponse { status, body }),
        MockReply::Fail(message) => Err(GatewayError::Transport(message)),
        MockReply::Hang | MockReply::Delayed(..) => std::future::pending().await,
    }
}

impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<RawResponse> {
        let reply = self.next_reply(&request);
        lock(&self.requests).push(request);
        play(reply).await
    }
}
