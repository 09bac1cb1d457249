//! Scriptable remote authority with fault injection.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tether_core::adapter::{Method, RemoteAuthority, RemoteError};
use tracing::trace;

/// One request as the remote saw it, including rejected ones.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
struct RemoteState {
    unreachable: bool,
    hang: bool,
    latency: Option<Duration>,
    responses: HashMap<(&'static str, String), Value>,
    failures: VecDeque<RemoteError>,
    path_failures: HashMap<String, RemoteError>,
    requests: Vec<RecordedRequest>,
}

/// In-process remote. Unscripted `GET`s answer 404; every other unscripted
/// request succeeds with an empty body.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRemote {
    state: Arc<Mutex<RemoteState>>,
}

impl SimulatedRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RemoteState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Answer `method path` with `value` from now on.
    pub fn respond<T: Serialize>(&self, method: Method, path: &str, value: &T) {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.state()
            .responses
            .insert((method.as_str(), path.to_string()), value);
    }

    /// Every request fails with a transport error while set.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Every request stays pending forever while set.
    pub fn set_hang(&self, hang: bool) {
        self.state().hang = hang;
    }

    /// Delay every answer by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    /// Fail the next request, whatever it is.
    pub fn fail_next(&self, err: RemoteError) {
        self.state().failures.push_back(err);
    }

    /// Fail every request to `path` until cleared.
    pub fn fail_path(&self, path: &str, err: Option<RemoteError>) {
        let mut state = self.state();
        match err {
            Some(err) => {
                state.path_failures.insert(path.to_string(), err);
            }
            None => {
                state.path_failures.remove(path);
            }
        }
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }

    /// Requests matching `method` and `path` exactly.
    #[must_use]
    pub fn requests_to(&self, method: Method, path: &str) -> Vec<RecordedRequest> {
        self.state()
            .requests
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .cloned()
            .collect()
    }

    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }

    fn answer(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, RemoteError> {
        let mut state = self.state();
        state.requests.push(RecordedRequest {
            method,
            path: path.to_string(),
            body,
        });
        if state.unreachable {
            return Err(RemoteError::Transport("connection refused".to_string()));
        }
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        if let Some(err) = state.path_failures.get(path) {
            return Err(err.clone());
        }
        match state.responses.get(&(method.as_str(), path.to_string())) {
            Some(value) => Ok(value.clone()),
            None if method == Method::Get => Err(RemoteError::Status {
                status: 404,
                body: format!("no route for {path}"),
            }),
            None => Ok(Value::Null),
        }
    }
}

#[async_trait]
impl RemoteAuthority for SimulatedRemote {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, RemoteError> {
        let (hang, latency) = {
            let state = self.state();
            (state.hang, state.latency)
        };
        trace!(%method, path, "simulated remote request");
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.answer(method, path, body)
    }
}
