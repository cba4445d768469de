//! Keyed request gateway: single-flight, throttle, timeout, and response
//! classification.
//!
//! Every outbound call names a logical key. At most one physical call per
//! key is outstanding. Callers arriving with an identical request share its
//! result; callers with a different request wait for the slot to clear and
//! then issue their own. A key whose last call completed less than
//! `min_interval` ago is delayed, then re-checked. The physical call runs as a spawned task that releases
//! its own slot, so a caller that stops waiting never wedges the key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

use chatsync_api::ErrorBody;

use crate::error::{GatewayError, Result};
use crate::transport::{ApiRequest, RawResponse, Transport};

type SharedCall = Shared<BoxFuture<'static, Result<Value>>>;

struct InFlight {
    id: u64,
    request: ApiRequest,
    result: SharedCall,
}

#[derive(Default)]
struct RequestRecord {
    in_flight: Option<InFlight>,
    last_completed: Option<Instant>,
}

#[derive(Default)]
struct GatewayState {
    records: HashMap<String, RequestRecord>,
    backend_down: bool,
    next_id: u64,
}

enum Step {
    Join(SharedCall),
    /// Another request holds the key; wait for it to settle.
    Drain(SharedCall),
    Wait(Duration),
}

pub struct RequestGateway<T> {
    transport: Arc<T>,
    timeout: Duration,
    state: Arc<Mutex<GatewayState>>,
}

impl<T> Clone for RequestGateway<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            timeout: self.timeout,
            state: Arc::clone(&self.state),
        }
    }
}

impl<T: Transport> RequestGateway<T> {
    pub fn new(transport: T, timeout: Duration) -> Self {
        Self {
            transport: Arc::new(transport),
            timeout,
            state: Arc::new(Mutex::new(GatewayState::default())),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True after an HTTP 500/502 until the next successful call.
    pub fn backend_down(&self) -> bool {
        lock(&self.state).backend_down
    }

    pub fn in_flight(&self, key: &str) -> bool {
        lock(&self.state)
            .records
            .get(key)
            .is_some_and(|record| record.in_flight.is_some())
    }

    /// Issue `request` under `key`, or join the identical call already
    /// running for it.
    pub async fn call(&self, key: &str, request: ApiRequest, min_interval: Duration) -> Result<Value> {
        loop {
            let step = {
                let mut state = lock(&self.state);
                let now = Instant::now();
                let record = state.records.entry(key.to_string()).or_default();
                let running = record
                    .in_flight
                    .as_ref()
                    .map(|f| (f.request == request, f.result.clone()));
                let wait = record
                    .last_completed
                    .map(|at| now.saturating_duration_since(at))
                    .filter(|elapsed| *elapsed < min_interval)
                    .map(|elapsed| min_interval - elapsed);
                match (running, wait) {
                    (Some((true, result)), _) => {
                        debug!("Request {key} already in flight, joining");
                        Step::Join(result)
                    }
                    (Some((false, result)), _) => {
                        debug!("Request {key} busy with a different request, waiting");
                        Step::Drain(result)
                    }
                    (None, Some(wait)) => {
                        debug!("Request {key} throttled, waiting {}ms", wait.as_millis());
                        Step::Wait(wait)
                    }
                    (None, None) => Step::Join(self.start(&mut state, key, request.clone())),
                }
            };

            match step {
                Step::Join(result) => return result.await,
                Step::Drain(result) => {
                    let _ = result.await;
                }
                Step::Wait(wait) => tokio::time::sleep(wait).await,
            }
        }
    }

    /// Spawn the physical call and register it as the key's in-flight slot.
    /// Must be called with the state lock held so the task cannot settle
    /// before the slot exists.
    fn start(&self, state: &mut GatewayState, key: &str, request: ApiRequest) -> SharedCall {
        state.next_id += 1;
        let id = state.next_id;
        let endpoint = request.path.clone();
        debug!("Request {key} -> {endpoint}");

        let transport = Arc::clone(&self.transport);
        let shared_state = Arc::clone(&self.state);
        let timeout = self.timeout;
        let task_key = key.to_string();
        let in_flight_request = request.clone();
        let handle = tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, transport.send(request)).await {
                Ok(Ok(raw)) => classify(&endpoint, raw),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(GatewayError::Timeout { after: timeout }),
            };
            settle(&shared_state, &task_key, id, &outcome);
            outcome
        });

        let settle_state = Arc::clone(&self.state);
        let settle_key = key.to_string();
        let result = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    let outcome = Err(GatewayError::Transport(format!(
                        "request task failed: {join_err}"
                    )));
                    settle(&settle_state, &settle_key, id, &outcome);
                    outcome
                }
            }
        }
        .boxed()
        .shared();

        let record = state.records.entry(key.to_string()).or_default();
        record.in_flight = Some(InFlight {
            id,
            request: in_flight_request,
            result: result.clone(),
        });
        result
    }
}

fn lock(state: &Mutex<GatewayState>) -> MutexGuard<'_, GatewayState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Release the slot held by call `id` and stamp its completion time.
fn settle(state: &Mutex<GatewayState>, key: &str, id: u64, outcome: &Result<Value>) {
    let mut state = lock(state);
    match outcome {
        Ok(_) => state.backend_down = false,
        Err(GatewayError::Infrastructure { status }) => {
            warn!("Backend unavailable (HTTP {status}) for {key}");
            state.backend_down = true;
        }
        Err(e) => debug!("Request {key} failed: {e}"),
    }
    if let Some(record) = state.records.get_mut(key) {
        if record.in_flight.as_ref().is_some_and(|f| f.id == id) {
            record.in_flight = None;
            record.last_completed = Some(Instant::now());
        }
    }
}

/// Map a raw exchange to a value or a classified error.
fn classify(endpoint: &str, raw: RawResponse) -> Result<Value> {
    let status = raw.status;
    if status == 500 || status == 502 {
        return Err(GatewayError::Infrastructure { status });
    }

    let body = raw.body.trim();
    let parsed: Option<Value> = if body.is_empty() {
        Some(Value::Object(Default::default()))
    } else {
        serde_json::from_str(body).ok()
    };
    let error_message = parsed
        .as_ref()
        .and_then(|value| serde_json::from_value::<ErrorBody>(value.clone()).ok())
        .and_then(|err| err.message());

    if (200..300).contains(&status) {
        if let Some(message) = error_message {
            return Err(GatewayError::Application { status, message });
        }
        return parsed.ok_or_else(|| {
            GatewayError::Decode(format!("{endpoint} returned a non-JSON body"))
        });
    }

    Err(GatewayError::Application {
        status,
        message: error_message.unwrap_or_else(|| format!("Failed to fetch {endpoint}")),
    })
}
