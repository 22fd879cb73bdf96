//! services/api/src/adapters/http.rs
//!
//! Response handling shared by the REST-backed adapters.

use reqwest::{Response, StatusCode};
use storyforge_core::ports::{PortError, PortResult};

/// Longest slice of a failed response body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

pub(crate) fn request_failed(service: &str, err: reqwest::Error) -> PortError {
    PortError::Unexpected(format!("{} request failed: {}", service, err))
}

/// Returns the response unchanged on a 2xx status; otherwise reads the body
/// into a `PortError` that names the failing service.
pub(crate) async fn ensure_success(service: &str, response: Response) -> PortResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    let body: String = body.chars().take(MAX_ERROR_BODY).collect();
    Err(status_error(service, status, &body))
}

pub(crate) fn status_error(service: &str, status: StatusCode, body: &str) -> PortError {
    match status {
        StatusCode::NOT_FOUND => PortError::NotFound(format!("{}: {}", service, body)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Unexpected(format!(
            "{} rejected the credentials ({}): {}",
            service, status, body
        )),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            PortError::Validation(format!("{} ({}): {}", service, status, body))
        }
        _ => PortError::Unexpected(format!("{} ({}): {}", service, status, body)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn client_errors_are_permanent_and_server_errors_are_not() {
        assert_matches!(
            status_error("print provider", StatusCode::BAD_REQUEST, "bad address"),
            PortError::Validation(msg) if msg.contains("bad address")
        );
        assert!(status_error("x", StatusCode::NOT_FOUND, "").is_permanent());
        assert!(!status_error("x", StatusCode::BAD_GATEWAY, "").is_permanent());
        assert!(!status_error("x", StatusCode::UNAUTHORIZED, "").is_permanent());
    }
}
