// SPDX-License-Identifier: MIT OR Apache-2.0

//! Out-of-band artifact existence probe.
//!
//! A `payload_ref` message only commits if the referenced object exists in
//! storage. The probe is a HEAD request against a configured URL template:
//! 404 means not found, any 2xx means exists, a 5xx or a network failure
//! means the dependency is unavailable and the client should retry.

use std::time::Duration;

use async_trait::async_trait;

/// What the probe observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactProbeOutcome {
    /// The object exists.
    Exists,
    /// The object does not exist.
    NotFound,
    /// Storage failed or could not be reached.
    Unavailable,
}

/// Probe seam; the HTTP implementation is swapped for a stub in tests.
#[async_trait]
pub trait ArtifactProbe: Send + Sync {
    /// HEAD the object.
    async fn head(&self, object_key: &str) -> ArtifactProbeOutcome;
}

/// HEAD probe against object storage.
#[derive(Debug, Clone)]
pub struct HttpArtifactProbe {
    client: reqwest::Client,
    url_template: String,
}

impl HttpArtifactProbe {
    /// Probe timeout.
    pub const TIMEOUT: Duration = Duration::from_secs(10);

    /// Build a probe over a URL template. `{object_key}` is substituted
    /// when present; otherwise the key is appended as a query parameter.
    #[must_use]
    pub fn new(url_template: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Self::TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url_template: url_template.into(),
        }
    }

    fn probe_url(&self, object_key: &str) -> String {
        if self.url_template.contains("{object_key}") {
            self.url_template.replace("{object_key}", object_key)
        } else if self.url_template.contains('?') {
            format!("{}&object_key={object_key}", self.url_template)
        } else {
            format!("{}?object_key={object_key}", self.url_template)
        }
    }
}

#[async_trait]
impl ArtifactProbe for HttpArtifactProbe {
    async fn head(&self, object_key: &str) -> ArtifactProbeOutcome {
        let url = self.probe_url(object_key);
        match self.client.head(&url).send().await {
            Ok(resp) if resp.status().is_success() => ArtifactProbeOutcome::Exists,
            Ok(resp) if resp.status().as_u16() == 404 => ArtifactProbeOutcome::NotFound,
            Ok(resp) => {
                tracing::warn!(status = resp.status().as_u16(), %url, "artifact probe failed");
                ArtifactProbeOutcome::Unavailable
            }
            Err(err) => {
                tracing::warn!(error = %err, %url, "artifact probe unreachable");
                ArtifactProbeOutcome::Unavailable
            }
        }
    }
}

/// Probe used when no storage URL is configured: every `payload_ref` write
/// reports storage as unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullArtifactProbe;

#[async_trait]
impl ArtifactProbe for NullArtifactProbe {
    async fn head(&self, _object_key: &str) -> ArtifactProbeOutcome {
        ArtifactProbeOutcome::Unavailable
    }
}
