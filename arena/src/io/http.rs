//! Shared HTTP plumbing for external collaborators.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::error::{ArenaError, ArenaResult};

const USER_AGENT: &str = concat!("arena/", env!("CARGO_PKG_VERSION"));

/// Build a client whose every request is bounded by `timeout`.
pub fn build_client(timeout: Duration) -> ArenaResult<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|error| ArenaError::Configuration(format!("failed to build HTTP client: {error}")))
}

/// Parse the configured base address of an external API.
pub fn parse_base(service: &str, api_url: &str) -> ArenaResult<Url> {
    let url = Url::parse(api_url).map_err(|error| {
        ArenaError::Configuration(format!("invalid {service} URL {api_url}: {error}"))
    })?;
    if url.cannot_be_a_base() {
        return Err(ArenaError::Configuration(format!(
            "{service} URL {api_url} cannot carry a path"
        )));
    }
    Ok(url)
}

/// Append path segments to `base`; each segment is percent-encoded on its own.
pub fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Send `request` and decode a JSON body.
///
/// 404 maps to `NotFound`; every other failure (transport, non-2xx status,
/// malformed body) maps to `Fetch`.
pub async fn request_json<T: DeserializeOwned>(
    service: &str,
    request: RequestBuilder,
) -> ArenaResult<T> {
    let response = request
        .send()
        .await
        .map_err(|error| ArenaError::Fetch(format!("{service} request failed: {error}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|error| ArenaError::Fetch(format!("{service} response read failed: {error}")))?;

    if status == StatusCode::NOT_FOUND {
        return Err(ArenaError::NotFound(format!("{service} returned 404")));
    }
    if !status.is_success() {
        return Err(ArenaError::Fetch(format!(
            "{service} request failed with status {status}: {body}"
        )));
    }

    serde_json::from_str(&body).map_err(|error| {
        ArenaError::Fetch(format!("{service} response was malformed JSON: {error}"))
    })
}
