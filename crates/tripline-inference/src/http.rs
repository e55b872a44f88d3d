//! Shared request plumbing for the vendor backends.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

use tripline_core::{Error, ProviderKind, Result};

use crate::error::{malformed_response, request_error, status_error};

pub(crate) fn build_client(kind: ProviderKind, timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Config(format!("failed to create {} HTTP client: {}", kind, e)))
}

/// Send `body` as JSON and decode a successful response as `T`.
///
/// Non-2xx statuses are classified by [`status_error`]; transport failures
/// by [`request_error`]; an undecodable 2xx body is transient.
pub(crate) async fn post_json<B, T>(kind: ProviderKind, req: RequestBuilder, body: &B) -> Result<T>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let response = req
        .header("Content-Type", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| request_error(kind, e))?;

    let status = response.status();
    let text = response.text().await.map_err(|e| request_error(kind, e))?;
    if !status.is_success() {
        return Err(status_error(kind, status.as_u16(), &text));
    }
    serde_json::from_str(&text).map_err(|e| malformed_response(kind, e))
}
