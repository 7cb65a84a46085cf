//! Cloudflare `ProviderClient` implementation.
//!
//! # Trust Level: Trusted
//!
//! This is the only component `ReconcileEngine` treats as ground truth for
//! drift correction. It is:
//! - **Allowed** to perform HTTP calls against the Cloudflare API v4, under
//!   a fixed request timeout.
//! - **Forbidden** from retrying internally, caching state across calls
//!   beyond the zone-ID lookup it is handed at construction, or making
//!   scheduling decisions — all of that belongs to `ReconcileEngine`.
//!
//! # Security
//!
//! The API token never appears in logs or in the `Debug` output.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use failover_core::error::ProviderError;
use failover_core::provider::{ProviderClient, Record};
use failover_core::state::DnsTarget;

const CLOUDFLARE_API_BASE: &str = "https://api.cloudflare.com/client/v4";
const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct CloudflareClient {
    api_token: String,
    zone_id: Option<String>,
    #[allow(dead_code)]
    account_id: Option<String>,
    client: reqwest::Client,
    api_base: String,
    tunnel_id: String,
    cdn_tunnel_suffix: String,
    failover_address: String,
}

impl std::fmt::Debug for CloudflareClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudflareClient")
            .field("api_token", &"<REDACTED>")
            .field("zone_id", &self.zone_id)
            .field("tunnel_id", &self.tunnel_id)
            .finish()
    }
}

impl CloudflareClient {
    pub fn new(
        api_token: impl Into<String>,
        zone_id: Option<String>,
        account_id: Option<String>,
        tunnel_id: impl Into<String>,
        cdn_tunnel_suffix: impl Into<String>,
        failover_address: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .expect("failed to build cloudflare http client");

        Self {
            api_token: api_token.into(),
            zone_id,
            account_id,
            client,
            api_base: CLOUDFLARE_API_BASE.to_string(),
            tunnel_id: tunnel_id.into(),
            cdn_tunnel_suffix: cdn_tunnel_suffix.into(),
            failover_address: failover_address.into(),
        }
    }

    /// Point the client at a different API base URL. Used in tests to
    /// target a `wiremock` server instead of the real Cloudflare API.
    #[cfg(test)]
    fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn tunnel_cname(&self) -> String {
        format!("{}.{}", self.tunnel_id, self.cdn_tunnel_suffix)
    }

    fn record_label(hostname: &str) -> &str {
        hostname.split('.').next().unwrap_or(hostname)
    }

    async fn get_zone_id(&self, hostname: &str) -> Result<String, ProviderError> {
        if let Some(ref zone_id) = self.zone_id {
            return Ok(zone_id.clone());
        }

        let parts: Vec<&str> = hostname.split('.').collect();
        if parts.len() < 2 {
            return Err(ProviderError::RemoteFailure(format!(
                "cannot derive zone from hostname: {hostname}"
            )));
        }
        let zone_name = if parts.len() >= 3 && parts[parts.len() - 2].len() <= 3 {
            format!("{}.{}", parts[parts.len() - 3], parts[parts.len() - 2])
        } else {
            format!("{}.{}", parts[parts.len() - 2], parts[parts.len() - 1])
        };

        let url = format!("{}/zones?name={zone_name}", self.api_base);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        classify_status(&response)?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::RemoteFailure(format!("invalid zone response: {e}")))?;

        let zone_id = json["result"][0]["id"]
            .as_str()
            .ok_or_else(|| ProviderError::NotFound(format!("zone not found: {zone_name}")))?;

        tracing::debug!(zone_name = %zone_name, zone_id, "found zone ID");
        Ok(zone_id.to_string())
    }

    async fn find_record(&self, zone_id: &str, hostname: &str) -> Result<Option<(String, Record)>, ProviderError> {
        let url = format!("{}/zones/{zone_id}/dns_records?name={hostname}", self.api_base);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        classify_status(&response)?;

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::RemoteFailure(format!("invalid record response: {e}")))?;

        let Some(entry) = json["result"].as_array().and_then(|arr| arr.first()) else {
            tracing::debug!(hostname, "no existing record found");
            return Ok(None);
        };

        let id = entry["id"]
            .as_str()
            .ok_or_else(|| ProviderError::RemoteFailure("record missing id".to_string()))?
            .to_string();
        let record = Record {
            record_type: entry["type"].as_str().unwrap_or_default().to_string(),
            name: entry["name"].as_str().unwrap_or_default().to_string(),
            content: entry["content"].as_str().unwrap_or_default().to_string(),
            proxied: entry["proxied"].as_bool().unwrap_or(false),
        };
        tracing::debug!(hostname, record_id = %id, record_type = %record.record_type, "found existing record");
        Ok(Some((id, record)))
    }

    fn desired_record(&self, label: &str, target: DnsTarget) -> Value {
        match target {
            DnsTarget::Primary => serde_json::json!({
                "type": "CNAME",
                "name": label,
                "content": self.tunnel_cname(),
                "proxied": true,
            }),
            DnsTarget::Failover => serde_json::json!({
                "type": "A",
                "name": label,
                "content": self.failover_address,
                "proxied": false,
            }),
            DnsTarget::Unknown => unreachable!("set_target is never called with Unknown"),
        }
    }

    fn record_matches(record: &Record, target: DnsTarget, client: &CloudflareClient) -> bool {
        match target {
            DnsTarget::Primary => {
                record.record_type == "CNAME" && record.content == client.tunnel_cname() && record.proxied
            }
            DnsTarget::Failover => {
                record.record_type == "A" && record.content == client.failover_address && !record.proxied
            }
            DnsTarget::Unknown => false,
        }
    }
}

fn classify_status(response: &reqwest::Response) -> Result<(), ProviderError> {
    if response.status().is_success() {
        return Ok(());
    }
    let status = response.status();
    Err(match status.as_u16() {
        401 | 403 => ProviderError::Auth(format!("cloudflare authentication failed: {status}")),
        404 => ProviderError::NotFound(format!("cloudflare resource not found: {status}")),
        429 => ProviderError::RateLimited(format!("cloudflare rate limited: {status}")),
        500..=599 => ProviderError::RemoteFailure(format!("cloudflare server error: {status}")),
        _ => ProviderError::RemoteFailure(format!("unexpected cloudflare status: {status}")),
    })
}

#[async_trait]
impl ProviderClient for CloudflareClient {
    async fn get_record(&self, hostname: &str) -> Result<Option<Record>, ProviderError> {
        let zone_id = self.get_zone_id(hostname).await?;
        Ok(self.find_record(&zone_id, hostname).await?.map(|(_, record)| record))
    }

    async fn read_target(&self, hostname: &str) -> Result<DnsTarget, ProviderError> {
        let Some(record) = self.get_record(hostname).await? else {
            return Ok(DnsTarget::Unknown);
        };

        if record.record_type == "A" && record.content == self.failover_address {
            return Ok(DnsTarget::Failover);
        }
        if record.record_type == "CNAME" && record.content.contains(&self.tunnel_id) {
            return Ok(DnsTarget::Primary);
        }
        Ok(DnsTarget::Unknown)
    }

    async fn set_target(&self, hostname: &str, target: DnsTarget) -> Result<(), ProviderError> {
        let zone_id = self.get_zone_id(hostname).await?;
        let label = Self::record_label(hostname);
        let existing = self.find_record(&zone_id, hostname).await?;

        if let Some((_, ref record)) = existing {
            if Self::record_matches(record, target, self) {
                tracing::debug!(hostname, ?target, "record already matches target, skipping write");
                return Ok(());
            }
        }

        let payload = self.desired_record(label, target);

        let response = match existing {
            Some((record_id, _)) => {
                tracing::debug!(hostname, record_id = %record_id, ?target, "updating existing record");
                let url = format!("{}/zones/{zone_id}/dns_records/{record_id}", self.api_base);
                self.client
                    .put(&url)
                    .bearer_auth(&self.api_token)
                    .json(&payload)
                    .send()
                    .await
            }
            None => {
                tracing::debug!(hostname, ?target, "creating new record");
                let url = format!("{}/zones/{zone_id}/dns_records", self.api_base);
                self.client
                    .post(&url)
                    .bearer_auth(&self.api_token)
                    .json(&payload)
                    .send()
                    .await
            }
        }
        .map_err(|e| ProviderError::Network(e.to_string()))?;

        classify_status(&response)?;
        tracing::info!(hostname, ?target, "DNS record updated successfully");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_against(base: &str) -> CloudflareClient {
        CloudflareClient::new(
            "real-token-value",
            Some("zone-123".to_string()),
            None,
            "tun-abc",
            "cfargotunnel.com",
            "165.227.110.199",
        )
        .with_api_base(base)
    }

    #[tokio::test]
    async fn read_target_classifies_failover_a_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-123/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": [{"id": "rec-1", "type": "A", "name": "mirai.example.com", "content": "165.227.110.199", "proxied": false}]
            })))
            .mount(&server)
            .await;

        let client = client_against(&server.uri());

        let target = client.read_target("mirai.example.com").await.unwrap();
        assert_eq!(target, DnsTarget::Failover);
    }

    #[tokio::test]
    async fn set_target_is_idempotent_when_record_already_matches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-123/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": [{"id": "rec-1", "type": "A", "name": "mirai.example.com", "content": "165.227.110.199", "proxied": false}]
            })))
            .mount(&server)
            .await;

        let client = client_against(&server.uri());

        // No PUT mock registered; if set_target tried to write, wiremock
        // would reject the unexpected request and this would panic.
        client.set_target("mirai.example.com", DnsTarget::Failover).await.unwrap();
    }
}
