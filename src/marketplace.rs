/*============================================================
  Synavera Project: Syn-Pilot
  Module: synpilot_core::marketplace
  Etiquette: Synavera Script Etiquette — Rust Profile v1.1
  ------------------------------------------------------------
  Purpose:
    Resolve plugin codes to composer package names through the
    October marketplace gateway.

  Security / Safety Notes:
    Sends only plugin codes and protocol attributes; no site
    credentials are transmitted by this client.

  Dependencies:
    reqwest for HTTP, serde_json for response parsing.

  Operational Scope:
    Injected into the update orchestrator as the plugin
    registry collaborator; per-code failures are reported to
    the caller, which decides whether to skip or abort.

  Revision History:
    2025-06-20 COD  Implemented gateway lookup client.
    2025-07-02 COD  Replaced runtime host sniffing with the
                    construction-time protocol strategy.
  ------------------------------------------------------------
  SSE Principles Observed:
    - Capability decided once, at construction
    - Structured response parsing with explicit error paths
    - Read-only interaction with external infrastructure
============================================================*/

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::StatusCode;

use crate::config::MarketplaceConfig;
use crate::error::{Result, SynpilotError};

/// Looks up the composer package behind a plugin code.
#[async_trait]
pub trait PluginRegistry: Send + Sync {
    /// Composer package name for a plugin code, when the registry
    /// knows one. `Ok(None)` means the plugin exists without a
    /// composer mapping; errors cover transport and decode failures.
    async fn plugin_package(&self, code: &str) -> Result<Option<String>>;
}

/// Wire protocol spoken by the gateway host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// Current gateway protocol; the request carries the code only.
    Modern,
    /// Hosts below protocol v2 require the legacy request attributes.
    Legacy,
}

/// HTTP implementation of the plugin registry collaborator.
pub struct MarketplaceClient {
    client: reqwest::Client,
    gateway_url: String,
    protocol: ProtocolVersion,
}

impl MarketplaceClient {
    /// Construct a client; the protocol strategy is fixed here from
    /// the configured capability flag.
    pub fn new(config: &MarketplaceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Syn-Pilot-Core/0.6 (linux)")
            .build()
            .map_err(|err| SynpilotError::Network(format!("Failed to build HTTP client: {err}")))?;

        Ok(Self {
            client,
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
            protocol: if config.legacy_protocol {
                ProtocolVersion::Legacy
            } else {
                ProtocolVersion::Modern
            },
        })
    }

    fn detail_form(&self, code: &str) -> Vec<(&'static str, String)> {
        let mut form = vec![("name", code.to_string())];

        if self.protocol == ProtocolVersion::Legacy {
            form.push(("protocol_version", "1.3".to_string()));
            form.push(("client", "October CMS".to_string()));
        }

        form
    }
}

#[async_trait]
impl PluginRegistry for MarketplaceClient {
    async fn plugin_package(&self, code: &str) -> Result<Option<String>> {
        let url = format!("{}/plugin/detail", self.gateway_url);

        let response = self
            .client
            .post(&url)
            .header(ACCEPT, "application/json")
            .form(&self.detail_form(code))
            .send()
            .await
            .map_err(|err| SynpilotError::Network(format!("Gateway request to {url} failed: {err}")))?;

        if response.status() != StatusCode::OK {
            return Err(SynpilotError::Network(format!(
                "Gateway request for plugin {code} failed with status {}",
                response.status()
            )));
        }

        let detail = response.json::<serde_json::Value>().await.map_err(|err| {
            SynpilotError::Serialization(format!("Failed to decode plugin detail: {err}"))
        })?;

        Ok(detail
            .get("composer_code")
            .and_then(|value| value.as_str())
            .filter(|value| !value.is_empty())
            .map(|value| value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client_for(server: &mockito::ServerGuard, legacy: bool) -> MarketplaceClient {
        MarketplaceClient::new(&MarketplaceConfig {
            gateway_url: server.url(),
            legacy_protocol: legacy,
        })
        .expect("client")
    }

    #[tokio::test]
    async fn modern_protocol_sends_the_code_only() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/plugin/detail")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("name".into(), "Acme.Blog".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"code":"Acme.Blog","composer_code":"acme/blog-plugin"}"#)
            .create_async()
            .await;

        let package = client_for(&server, false)
            .plugin_package("Acme.Blog")
            .await
            .expect("lookup");

        assert_eq!(package.as_deref(), Some("acme/blog-plugin"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn legacy_protocol_adds_the_version_attributes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/plugin/detail")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("name".into(), "Acme.Blog".into()),
                Matcher::UrlEncoded("protocol_version".into(), "1.3".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"code":"Acme.Blog","composer_code":"acme/blog-plugin"}"#)
            .create_async()
            .await;

        let package = client_for(&server, true)
            .plugin_package("Acme.Blog")
            .await
            .expect("lookup");

        assert_eq!(package.as_deref(), Some("acme/blog-plugin"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn missing_composer_mapping_is_none_not_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/plugin/detail")
            .with_status(200)
            .with_body(r#"{"code":"Acme.Blog"}"#)
            .create_async()
            .await;

        let package = client_for(&server, false)
            .plugin_package("Acme.Blog")
            .await
            .expect("lookup");
        assert_eq!(package, None);
    }

    #[tokio::test]
    async fn gateway_failure_is_surfaced_to_the_caller() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/plugin/detail")
            .with_status(502)
            .create_async()
            .await;

        let err = client_for(&server, false)
            .plugin_package("Acme.Blog")
            .await
            .expect_err("must fail");
        assert!(matches!(err, SynpilotError::Network(_)));
    }
}
