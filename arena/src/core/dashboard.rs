//! Parsing of deployment references and preview addresses.

use std::sync::LazyLock;

use regex::Regex;

/// `https://<host>/<team>/<project>/<deployment>` with optional trailing slash,
/// query or fragment.
static DASHBOARD_PATH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[^/]+/[^/?#]+/[^/?#]+/([^/?#]+)/?(?:[?#].*)?$").unwrap()
});

static RAW_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

static HOST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://([^/:?#]+)(?::\d+)?(?:[/?#].*)?$").unwrap());

/// Extract a deployment identifier from either a raw identifier or a
/// dashboard URL whose path has exactly three segments.
///
/// Returns `None` for anything else.
pub fn extract_deployment_id(reference: &str) -> Option<String> {
    let reference = reference.trim();
    if RAW_ID_RE.is_match(reference) {
        return Some(reference.to_string());
    }
    DASHBOARD_PATH_RE
        .captures(reference)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// What kind of address a preview candidate is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewKind {
    /// Directly browsable deployed host.
    Direct,
    /// Deployment-host dashboard page that needs resolving.
    Dashboard,
    Other,
}

/// Hosts used to classify preview candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewHosts {
    /// Suffix of directly deployed hosts (e.g. `.vercel.app`).
    pub preview_suffix: String,
    /// Host serving dashboard pages (e.g. `vercel.com`).
    pub dashboard_host: String,
}

impl PreviewHosts {
    pub fn classify(&self, url: &str) -> PreviewKind {
        let Some(host) = url_host(url) else {
            return PreviewKind::Other;
        };
        let host = host.to_ascii_lowercase();
        if host.ends_with(&self.preview_suffix.to_ascii_lowercase()) {
            PreviewKind::Direct
        } else if host == self.dashboard_host.to_ascii_lowercase() {
            PreviewKind::Dashboard
        } else {
            PreviewKind::Other
        }
    }
}

fn url_host(url: &str) -> Option<&str> {
    HOST_RE
        .captures(url.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
