//! HTTP plumbing shared by the chat backends.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{error, trace};

use cr_core::Error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn client() -> Client {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Both vendors wrap failures as `{"error": {"message": ...}}`.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

pub(crate) fn status_error(status: u16, body: &str) -> Error {
    let message = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => envelope.error.message,
        Err(_) => return Error::api(status, body),
    };
    match status {
        400 => Error::invalid_request(message),
        401 | 403 => Error::auth(message),
        429 => Error::rate_limit(message),
        _ => Error::api(status, message),
    }
}

fn send_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::timeout(err.to_string())
    } else {
        Error::network(err.to_string())
    }
}

/// POST `body` and decode a successful reply as `R`.
pub(crate) async fn post_json<B, R>(vendor: &str, builder: RequestBuilder, body: &B) -> Result<R, Error>
where
    B: Serialize,
    R: DeserializeOwned,
{
    trace!(
        vendor,
        request = %serde_json::to_string(body).unwrap_or_default(),
        "Request payload"
    );

    let response = builder.json(body).send().await.map_err(send_error)?;
    let status = response.status();
    let text = response.text().await.map_err(send_error)?;

    if !status.is_success() {
        error!(vendor, status = status.as_u16(), body = %text, "Completion request failed");
        return Err(status_error(status.as_u16(), &text));
    }

    trace!(vendor, response = %text, "Response payload");
    serde_json::from_str(&text).map_err(|e| Error::serialization(format!("{vendor} reply: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_mapping() {
        let body = r#"{"error": {"type": "rate_limit_error", "message": "Too many requests"}}"#;
        assert!(matches!(status_error(429, body), Error::RateLimit(ref m) if m == "Too many requests"));
        assert!(status_error(401, body).is_auth_error());
        assert!(status_error(403, body).is_auth_error());
        assert!(matches!(status_error(400, body), Error::InvalidRequest(_)));
        assert!(status_error(503, body).is_retryable());
    }

    #[test]
    fn test_status_error_unparseable_body() {
        match status_error(502, "<html>bad gateway</html>") {
            Error::Api { status, message } => {
                assert_eq!(status, 502);
                assert!(message.contains("bad gateway"));
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }
}
