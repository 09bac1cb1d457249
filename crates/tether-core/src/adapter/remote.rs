//! Remote Authority Client contract.
//!
//! The remote collaboration service is path-addressed: every operation is a
//! method, a path relative to the API root (`apps/{id}/board/{id}`) and an
//! optional JSON body. The free helpers [`get_json`] and [`send_json`]
//! encode/decode bodies so the trait itself stays object-safe.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// HTTP verbs used by the remote API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-level failure classes of the remote authority.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The request never produced a response (DNS, TCP, TLS, timeout).
    #[error("transport: {0}")]
    Transport(String),
    /// HTTP 401.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Any other non-success status.
    #[error("http {status}: {body}")]
    Status { status: u16, body: String },
    /// A success response whose body did not decode.
    #[error("decode: {0}")]
    Decode(String),
}

/// Opaque, bearer-authenticated interface to the remote collaboration service.
#[async_trait]
pub trait RemoteAuthority: Send + Sync {
    /// Issue one request. `Value::Null` is returned for empty success bodies.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, RemoteError>;
}

/// GET `path` and decode the body.
pub async fn get_json<T>(remote: &dyn RemoteAuthority, path: &str) -> Result<T, RemoteError>
where
    T: DeserializeOwned,
{
    let value = remote.request(Method::Get, path, None).await?;
    decode(value)
}

/// Send `body` with `method` and decode the response body.
pub async fn send_json<B, T>(
    remote: &dyn RemoteAuthority,
    method: Method,
    path: &str,
    body: &B,
) -> Result<T, RemoteError>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let body = serde_json::to_value(body).map_err(|e| RemoteError::Decode(e.to_string()))?;
    let value = remote.request(method, path, Some(body)).await?;
    decode(value)
}

/// Send an optional body and ignore the response body.
pub async fn send_unit(
    remote: &dyn RemoteAuthority,
    method: Method,
    path: &str,
    body: Option<Value>,
) -> Result<(), RemoteError> {
    remote.request(method, path, body).await.map(|_| ())
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, RemoteError> {
    serde_json::from_value(value).map_err(|e| RemoteError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Path builders
// ---------------------------------------------------------------------------

/// Path templates of the remote API.
pub mod paths {
    #[must_use]
    pub fn apps() -> String {
        "apps".to_string()
    }

    #[must_use]
    pub fn new_app() -> String {
        "apps/new".to_string()
    }

    #[must_use]
    pub fn app(app_id: &str) -> String {
        format!("apps/{app_id}")
    }

    #[must_use]
    pub fn boards(app_id: &str) -> String {
        format!("apps/{app_id}/board")
    }

    #[must_use]
    pub fn board(app_id: &str, board_id: &str) -> String {
        format!("apps/{app_id}/board/{board_id}")
    }

    #[must_use]
    pub fn board_undo(app_id: &str, board_id: &str) -> String {
        format!("apps/{app_id}/board/{board_id}/undo")
    }

    #[must_use]
    pub fn board_redo(app_id: &str, board_id: &str) -> String {
        format!("apps/{app_id}/board/{board_id}/redo")
    }

    #[must_use]
    pub fn board_versions(app_id: &str, board_id: &str) -> String {
        format!("apps/{app_id}/board/{board_id}/version")
    }

    #[must_use]
    pub fn events(app_id: &str) -> String {
        format!("apps/{app_id}/events")
    }

    #[must_use]
    pub fn event(app_id: &str, event_id: &str) -> String {
        format!("apps/{app_id}/events/{event_id}")
    }

    #[must_use]
    pub fn event_versions(app_id: &str, event_id: &str) -> String {
        format!("apps/{app_id}/events/{event_id}/versions")
    }

    #[must_use]
    pub fn event_validate(app_id: &str, event_id: &str) -> String {
        format!("apps/{app_id}/events/{event_id}/validate")
    }

    #[must_use]
    pub fn event_feedback(app_id: &str, event_id: &str) -> String {
        format!("apps/{app_id}/events/{event_id}/feedback")
    }

    #[must_use]
    pub fn templates(app_id: &str) -> String {
        format!("apps/{app_id}/templates")
    }

    #[must_use]
    pub fn template(app_id: &str, template_id: &str) -> String {
        format!("apps/{app_id}/templates/{template_id}")
    }

    #[must_use]
    pub fn data(app_id: &str) -> String {
        format!("apps/{app_id}/data")
    }

    #[must_use]
    pub fn data_list(app_id: &str) -> String {
        format!("apps/{app_id}/data/list")
    }

    #[must_use]
    pub fn data_download(app_id: &str) -> String {
        format!("apps/{app_id}/data/download")
    }

    /// Append `?version=major.minor.patch` when a version is pinned.
    #[must_use]
    pub fn with_version(path: String, version: Option<crate::model::SemVer>) -> String {
        match version {
            Some(v) => format!("{path}?version={v}"),
            None => path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::paths;
    use crate::model::SemVer;

    #[test]
    fn board_paths_are_nested_under_app() {
        assert_eq!(paths::board("a1", "b1"), "apps/a1/board/b1");
        assert_eq!(paths::board_undo("a1", "b1"), "apps/a1/board/b1/undo");
        assert_eq!(paths::board_versions("a1", "b1"), "apps/a1/board/b1/version");
    }

    #[test]
    fn pinned_version_is_appended_as_query() {
        let path = paths::with_version(paths::event("a1", "e1"), Some(SemVer::new(1, 2, 3)));
        assert_eq!(path, "apps/a1/events/e1?version=1.2.3");
        assert_eq!(paths::with_version(paths::event("a1", "e1"), None), "apps/a1/events/e1");
    }
}
