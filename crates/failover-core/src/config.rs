//! Configuration for the failover controller.
//!
//! Immutable after start. Loaded from environment variables in production
//! (`Configuration::from_env`); constructed directly in tests.

use std::time::Duration;

/// All options recognized by the controller, with the defaults-from-env
/// pattern: every field has a `FAILOVER_`-prefixed environment variable.
#[derive(Debug, Clone)]
pub struct Configuration {
    /// The fully qualified hostname being managed.
    pub hostname: String,
    /// Opaque identifier used to form the CNAME target.
    pub tunnel_id: String,
    /// Literal network address for the direct record.
    pub failover_address: String,
    /// Minimum time primary must remain degraded before flipping.
    pub stabilization_failover: Duration,
    /// Minimum time primary must remain recovered before flipping back.
    pub stabilization_failback: Duration,
    /// Circuit-breaker cap on failovers per rolling day.
    pub max_failovers_24h: u32,
    /// Period of the reconcile ticker.
    pub reconcile_interval: Duration,
    /// When true, `ProviderClient::set_target` is never actually called.
    pub dry_run: bool,
    /// Healthy-replica threshold for `HealthProbe`.
    pub min_primary_replicas: u32,

    /// Cloudflare API token. Never logged; `Debug` redacts it.
    pub cloudflare_api_token: String,
    /// Zone ID, auto-discovered from `hostname` when absent.
    pub cloudflare_zone_id: Option<String>,
    pub cloudflare_account_id: Option<String>,
    /// Literal CNAME suffix appended to `tunnel_id` for the primary target.
    pub cdn_tunnel_suffix: String,
    /// Address prefixes used by `DnsObserver`'s advisory classification.
    pub cdn_address_prefixes: Vec<String>,

    /// Namespace `HealthProbe` lists pods in.
    pub k8s_namespace: String,
    /// Label selector `HealthProbe` filters pods by.
    pub k8s_label_selector: String,

    /// Bind address for the HTTP surface (`GET /health`, etc).
    pub http_bind_addr: String,
    /// Path to the state file. `None` selects the in-memory store.
    pub state_store_path: Option<String>,

    pub log_level: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Default Cloudflare address prefixes used when `FAILOVER_CDN_ADDRESS_PREFIXES`
/// is not set. Source: the original controller's `DNSChecker.cloudflare_ip_prefixes`.
const DEFAULT_CDN_ADDRESS_PREFIXES: &[&str] = &[
    "104.16.", "104.17.", "104.18.", "104.19.", "104.20.", "104.21.", "104.22.", "104.23.",
    "104.24.", "104.25.", "104.26.", "104.27.", "172.64.", "172.65.", "172.66.", "172.67.",
    "172.68.", "172.69.", "173.245.", "188.114.", "190.93.", "197.234.", "198.41.",
];

impl Configuration {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            hostname: require_env("FAILOVER_HOSTNAME")?,
            tunnel_id: require_env("FAILOVER_TUNNEL_ID")?,
            failover_address: require_env("FAILOVER_ADDRESS")?,
            stabilization_failover: Duration::from_secs(env_u64(
                "FAILOVER_STABILIZATION_FAILOVER_SECS",
                90,
            )?),
            stabilization_failback: Duration::from_secs(env_u64(
                "FAILOVER_STABILIZATION_FAILBACK_SECS",
                600,
            )?),
            max_failovers_24h: env_u32("FAILOVER_MAX_FAILOVERS_24H", 3)?,
            reconcile_interval: Duration::from_secs(env_u64(
                "FAILOVER_RECONCILE_INTERVAL_SECS",
                30,
            )?),
            dry_run: env_bool("FAILOVER_DRY_RUN", false)?,
            min_primary_replicas: env_u32("FAILOVER_MIN_PRIMARY_REPLICAS", 2)?,

            cloudflare_api_token: require_env("FAILOVER_CLOUDFLARE_API_TOKEN")?,
            cloudflare_zone_id: std::env::var("FAILOVER_CLOUDFLARE_ZONE_ID").ok(),
            cloudflare_account_id: std::env::var("FAILOVER_CLOUDFLARE_ACCOUNT_ID").ok(),
            cdn_tunnel_suffix: std::env::var("FAILOVER_CDN_TUNNEL_SUFFIX")
                .unwrap_or_else(|_| "cfargotunnel.com".to_string()),
            cdn_address_prefixes: std::env::var("FAILOVER_CDN_ADDRESS_PREFIXES")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|_| {
                    DEFAULT_CDN_ADDRESS_PREFIXES
                        .iter()
                        .map(|s| s.to_string())
                        .collect()
                }),

            k8s_namespace: std::env::var("FAILOVER_K8S_NAMESPACE")
                .unwrap_or_else(|_| "ingress".to_string()),
            k8s_label_selector: std::env::var("FAILOVER_K8S_LABEL_SELECTOR")
                .unwrap_or_else(|_| "app=cloudflared".to_string()),

            http_bind_addr: std::env::var("FAILOVER_HTTP_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            state_store_path: std::env::var("FAILOVER_STATE_STORE_PATH").ok(),

            log_level: std::env::var("FAILOVER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: match std::env::var("FAILOVER_LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        })
    }

    /// Validate the configuration. Called once at startup; failure is fatal.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_domain_name(&self.hostname)?;

        if self.tunnel_id.trim().is_empty() {
            anyhow::bail!("FAILOVER_TUNNEL_ID cannot be empty");
        }

        if self.failover_address.trim().is_empty() {
            anyhow::bail!("FAILOVER_ADDRESS cannot be empty");
        }
        if self.failover_address.parse::<std::net::IpAddr>().is_err() {
            anyhow::bail!(
                "FAILOVER_ADDRESS must be a literal IP address. Got: {}",
                self.failover_address
            );
        }

        if self.cloudflare_api_token.is_empty() {
            anyhow::bail!("FAILOVER_CLOUDFLARE_API_TOKEN is required");
        }
        let token_lower = self.cloudflare_api_token.to_lowercase();
        if token_lower.contains("your_token")
            || token_lower.contains("replace_me")
            || token_lower.contains("example")
            || token_lower == "token"
        {
            anyhow::bail!("FAILOVER_CLOUDFLARE_API_TOKEN appears to be a placeholder");
        }

        if self.max_failovers_24h == 0 {
            anyhow::bail!("FAILOVER_MAX_FAILOVERS_24H must be >= 1");
        }

        if self.min_primary_replicas == 0 {
            anyhow::bail!("FAILOVER_MIN_PRIMARY_REPLICAS must be >= 1");
        }

        if self.reconcile_interval.is_zero() {
            anyhow::bail!("FAILOVER_RECONCILE_INTERVAL_SECS must be > 0");
        }

        if self.stabilization_failover.is_zero() || self.stabilization_failback.is_zero() {
            anyhow::bail!("stabilization durations must be > 0");
        }

        if self.k8s_label_selector.trim().is_empty() {
            anyhow::bail!("FAILOVER_K8S_LABEL_SELECTOR cannot be empty");
        }

        if self.http_bind_addr.parse::<std::net::SocketAddr>().is_err() {
            anyhow::bail!(
                "FAILOVER_HTTP_BIND_ADDR must be a host:port pair. Got: {}",
                self.http_bind_addr
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!(
                "FAILOVER_LOG_LEVEL '{other}' is not valid. Valid levels: trace, debug, info, warn, error"
            ),
        }

        Ok(())
    }

    /// Basic RFC 1035 domain name validation.
    fn validate_domain_name(&self, domain: &str) -> anyhow::Result<()> {
        if domain.is_empty() {
            anyhow::bail!("FAILOVER_HOSTNAME cannot be empty");
        }
        if domain.len() > 253 {
            anyhow::bail!("FAILOVER_HOSTNAME too long: {} chars (max 253)", domain.len());
        }
        for label in domain.split('.') {
            if label.is_empty() {
                anyhow::bail!("FAILOVER_HOSTNAME has empty label: '{domain}'");
            }
            if label.len() > 63 {
                anyhow::bail!("FAILOVER_HOSTNAME label too long: '{label}'");
            }
            if !label.chars().all(|c| c.is_alphanumeric() || c == '-') {
                anyhow::bail!("FAILOVER_HOSTNAME label has invalid characters: '{label}'");
            }
            if label.starts_with('-') || label.ends_with('-') {
                anyhow::bail!("FAILOVER_HOSTNAME label cannot start/end with hyphen: '{label}'");
            }
        }
        Ok(())
    }

    /// The subdomain label `ProviderClient` uses when writing records:
    /// the first dot-separated component of `hostname`.
    pub fn record_label(&self) -> &str {
        self.hostname.split('.').next().unwrap_or(&self.hostname)
    }

    /// The full CNAME target for the primary path.
    pub fn tunnel_cname(&self) -> String {
        format!("{}.{}", self.tunnel_id, self.cdn_tunnel_suffix)
    }
}

fn require_env(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("{key} is required"))
}

fn env_u64(key: &str, default: u64) -> anyhow::Result<u64> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} must be a non-negative integer, got '{v}'")),
        Err(_) => Ok(default),
    }
}

fn env_u32(key: &str, default: u32) -> anyhow::Result<u32> {
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} must be a non-negative integer, got '{v}'")),
        Err(_) => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> anyhow::Result<bool> {
    match std::env::var(key) {
        Ok(v) => match v.to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            other => anyhow::bail!("{key} must be a boolean, got '{other}'"),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> Configuration {
        Configuration {
            hostname: "mirai.example.com".to_string(),
            tunnel_id: "cb2a7768-4162-4da9-ac04-138fdecf3e3d".to_string(),
            failover_address: "165.227.110.199".to_string(),
            stabilization_failover: Duration::from_secs(90),
            stabilization_failback: Duration::from_secs(600),
            max_failovers_24h: 3,
            reconcile_interval: Duration::from_secs(30),
            dry_run: false,
            min_primary_replicas: 2,
            cloudflare_api_token: "a_real_looking_token_value_123456".to_string(),
            cloudflare_zone_id: None,
            cloudflare_account_id: None,
            cdn_tunnel_suffix: "cfargotunnel.com".to_string(),
            cdn_address_prefixes: vec!["104.16.".to_string()],
            k8s_namespace: "ingress".to_string(),
            k8s_label_selector: "app=cloudflared".to_string(),
            http_bind_addr: "0.0.0.0:8080".to_string(),
            state_store_path: None,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }

    #[test]
    fn minimal_config_validates() {
        minimal_config().validate().unwrap();
    }

    #[test]
    fn rejects_placeholder_token() {
        let mut cfg = minimal_config();
        cfg.cloudflare_api_token = "replace_me".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_non_ip_failover_address() {
        let mut cfg = minimal_config();
        cfg.failover_address = "not-an-ip".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_circuit_breaker_cap() {
        let mut cfg = minimal_config();
        cfg.max_failovers_24h = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn record_label_is_first_component() {
        let cfg = minimal_config();
        assert_eq!(cfg.record_label(), "mirai");
    }

    #[test]
    fn tunnel_cname_appends_suffix() {
        let cfg = minimal_config();
        assert_eq!(
            cfg.tunnel_cname(),
            "cb2a7768-4162-4da9-ac04-138fdecf3e3d.cfargotunnel.com"
        );
    }
}
