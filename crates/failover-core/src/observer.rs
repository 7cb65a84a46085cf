//! Ground-truth DNS observation, independent of the provider API.

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::state::DnsTarget;

/// Observes what the managed hostname actually resolves to right now.
///
/// # Trust Level: Untrusted
///
/// A `DNSObserver` is a cross-check, not a source of truth. Its output is
/// **Allowed** to drive warning-level logging when it disagrees with
/// `OperationalState::current_target`.
///
/// **Forbidden**: observed results must never mutate `OperationalState`
/// directly. Only `ProviderClient::read_target` is trusted for drift
/// correction (spec.md §4.2, §4.5 step 2) — resolver results can be
/// stale, cached by intermediate resolvers, or simply wrong.
#[async_trait]
pub trait DnsObserver: Send + Sync {
    /// Resolve the managed hostname and classify the result.
    async fn observe(&self) -> DnsTarget;
}

/// `DnsObserver` backed by the system/async resolver via `hickory-resolver`.
pub struct ResolverDnsObserver {
    resolver: TokioAsyncResolver,
    hostname: String,
    failover_address: String,
    cdn_address_prefixes: Vec<String>,
}

impl ResolverDnsObserver {
    pub fn new(hostname: String, failover_address: String, cdn_address_prefixes: Vec<String>) -> Self {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self {
            resolver,
            hostname,
            failover_address,
            cdn_address_prefixes,
        }
    }

    fn classify(&self, addresses: &[std::net::IpAddr]) -> DnsTarget {
        for addr in addresses {
            let canonical = addr.to_string();
            if canonical == self.failover_address {
                return DnsTarget::Failover;
            }
        }
        for addr in addresses {
            let canonical = addr.to_string();
            if self
                .cdn_address_prefixes
                .iter()
                .any(|prefix| canonical.starts_with(prefix.as_str()))
            {
                return DnsTarget::Primary;
            }
        }
        DnsTarget::Unknown
    }
}

#[async_trait]
impl DnsObserver for ResolverDnsObserver {
    async fn observe(&self) -> DnsTarget {
        match self.resolver.lookup_ip(self.hostname.as_str()).await {
            Ok(lookup) => {
                let addresses: Vec<std::net::IpAddr> = lookup.iter().collect();
                self.classify(&addresses)
            }
            Err(err) => {
                tracing::debug!(hostname = %self.hostname, error = %err, "dns observation failed");
                DnsTarget::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn observer() -> ResolverDnsObserver {
        ResolverDnsObserver::new(
            "mirai.example.com".to_string(),
            "165.227.110.199".to_string(),
            vec!["104.16.".to_string(), "172.64.".to_string()],
        )
    }

    #[test]
    fn classifies_failover_address_as_failover() {
        let addr: IpAddr = "165.227.110.199".parse().unwrap();
        assert_eq!(observer().classify(&[addr]), DnsTarget::Failover);
    }

    #[test]
    fn classifies_cdn_prefix_as_primary() {
        let addr: IpAddr = "104.16.132.229".parse().unwrap();
        assert_eq!(observer().classify(&[addr]), DnsTarget::Primary);
    }

    #[test]
    fn classifies_unrecognized_address_as_unknown() {
        let addr: IpAddr = "8.8.8.8".parse().unwrap();
        assert_eq!(observer().classify(&[addr]), DnsTarget::Unknown);
    }

    #[test]
    fn failover_address_match_takes_priority_over_prefix() {
        let failover: IpAddr = "165.227.110.199".parse().unwrap();
        let primary: IpAddr = "104.16.132.229".parse().unwrap();
        assert_eq!(observer().classify(&[primary, failover]), DnsTarget::Failover);
    }
}
