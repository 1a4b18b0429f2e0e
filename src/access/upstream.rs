//! Shared HTTP plumbing for upstream collaborators

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;

use super::error::UpstreamError;

pub(crate) fn build_client(service: &'static str, timeout: Duration) -> Result<Client, UpstreamError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("ownbite-access/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| UpstreamError::request(service, e))
}

/// Send `request`, mapping transport failures and non-2xx statuses
pub(crate) async fn send(
    service: &'static str,
    timeout: Duration,
    request: RequestBuilder,
) -> Result<Response, UpstreamError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            UpstreamError::Timeout {
                service,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
        } else {
            UpstreamError::request(service, e)
        }
    })?;

    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(UpstreamError::Unauthorized { service }),
        status => Err(UpstreamError::Status {
            service,
            status: status.as_u16(),
        }),
    }
}

pub(crate) async fn decode<T: DeserializeOwned>(
    service: &'static str,
    response: Response,
) -> Result<T, UpstreamError> {
    response
        .json::<T>()
        .await
        .map_err(|e| UpstreamError::decode(service, e))
}

pub(crate) fn trim_base(url: &str) -> &str {
    url.trim_end_matches('/')
}
