/*============================================================
  Synavera Project: Syn-Pilot
  Module: synpilot_core::packagist
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1
  ------------------------------------------------------------
  Purpose:
    Query the public Packagist registry for the full version
    history of installed composer packages.

  Security / Safety Notes:
    Performs read-only HTTPS requests to the public registry.
    No credentials are transmitted.

  Dependencies:
    reqwest for HTTP, serde for response parsing.

  Operational Scope:
    Supplies candidate versions to the resolver; registry
    failures degrade to absent upgrade data upstream.

  Revision History:
    2025-06-19 COD  Implemented asynchronous registry client.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Structured response parsing with explicit error paths
    - Configurable timeouts
    - Read-only interaction with external infrastructure
============================================================*/

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;

use crate::config::RegistryConfig;
use crate::error::{Result, SynpilotError};

/// One release of a package as reported by the registry.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryVersion {
    pub version: String,
}

/// Client for the Packagist package-detail API.
#[derive(Clone)]
pub struct PackagistClient {
    client: reqwest::Client,
    base_url: String,
}

impl PackagistClient {
    /// Construct a new client from configuration.
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .user_agent("Syn-Pilot-Core/0.6 (linux)")
            .build()
            .map_err(|err| SynpilotError::Network(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the full version history for one package.
    pub async fn fetch_versions(&self, package: &str) -> Result<Vec<RegistryVersion>> {
        let url = format!("{}/packages/{package}.json", self.base_url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| SynpilotError::Network(format!("Registry request to {url} failed: {err}")))?;

        if response.status() != StatusCode::OK {
            return Err(SynpilotError::Network(format!(
                "Registry request {url} failed with status {}",
                response.status()
            )));
        }

        let payload = response.json::<PackagistResponse>().await.map_err(|err| {
            SynpilotError::Serialization(format!("Failed to decode registry response: {err}"))
        })?;

        Ok(payload.package.versions.into_values().collect())
    }
}

#[derive(Debug, Deserialize)]
struct PackagistResponse {
    package: PackagistPackage,
}

#[derive(Debug, Deserialize)]
struct PackagistPackage {
    /// Keyed by version string; BTreeMap keeps iteration deterministic.
    #[serde(default)]
    versions: BTreeMap<String, RegistryVersion>,
}
