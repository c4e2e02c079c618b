//! Resolution of dashboard-style deployment references to preview addresses.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::core::dashboard::extract_deployment_id;
use crate::error::ArenaResult;
use crate::io::http::{build_client, endpoint, parse_base, request_json};

/// Turns a deployment reference into a directly browsable address.
///
/// Never fails: anything short of a ready deployment yields `None`.
#[async_trait]
pub trait PreviewResolver: Send + Sync {
    async fn resolve(&self, reference: &str) -> Option<String>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentResponse {
    #[serde(default)]
    ready_state: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

/// [`PreviewResolver`] backed by the Vercel deployments API.
#[derive(Debug, Clone)]
pub struct VercelPreviewResolver {
    api_url: Url,
    token: Option<String>,
    client: Client,
}

impl VercelPreviewResolver {
    pub fn new(api_url: &str, token: Option<String>, timeout: Duration) -> ArenaResult<Self> {
        Ok(Self {
            api_url: parse_base("deployment host", api_url)?,
            token,
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl PreviewResolver for VercelPreviewResolver {
    async fn resolve(&self, reference: &str) -> Option<String> {
        let Some(deployment_id) = extract_deployment_id(reference) else {
            debug!(reference, "not a deployment reference");
            return None;
        };
        let Some(token) = self.token.as_deref() else {
            debug!("deploy token not configured, skipping preview resolution");
            return None;
        };
        let request = self
            .client
            .get(endpoint(&self.api_url, &["v13", "deployments", deployment_id.as_str()]))
            .bearer_auth(token);
        match request_json::<DeploymentResponse>("deployment host", request).await {
            Ok(response) => canonical_url(&response),
            Err(error) => {
                warn!(deployment_id, error = %error, "preview resolution failed");
                None
            }
        }
    }
}

fn canonical_url(response: &DeploymentResponse) -> Option<String> {
    if response.ready_state.as_deref() != Some("READY") {
        return None;
    }
    let url = response.url.as_deref()?.trim();
    if url.is_empty() {
        return None;
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        Some(url.to_string())
    } else {
        Some(format!("https://{url}"))
    }
}
