//! DNS service discovery
//!
//! A service template URL is resolved by host name; one target is produced
//! per address with the host substituted and everything else kept.

use crate::error::{CollectorError, Result};
use crate::models::ScrapeTarget;
use async_trait::async_trait;
use std::net::IpAddr;
use url::Url;

/// Name resolution seam
#[async_trait]
pub trait HostResolver: Send + Sync {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system resolver
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
        let mut addrs: Vec<IpAddr> = Vec::new();
        for addr in tokio::net::lookup_host((host, 0)).await? {
            if !addrs.contains(&addr.ip()) {
                addrs.push(addr.ip());
            }
        }
        Ok(addrs)
    }
}

/// Copy of `template` with its host replaced by `address`
pub fn address_to_url(template: &Url, address: IpAddr) -> Result<Url> {
    let mut url = template.clone();
    url.set_ip_host(address).map_err(|_| {
        CollectorError::Discovery(format!("cannot substitute host in {}", template))
    })?;
    Ok(url)
}

/// One target per address the template's host resolves to
pub async fn resolve_service(resolver: &dyn HostResolver, template: &Url) -> Result<Vec<ScrapeTarget>> {
    let host = template
        .host_str()
        .ok_or_else(|| CollectorError::Discovery(format!("service {} has no host", template)))?;
    // IPv6 literals come back bracketed
    let host = host.trim_start_matches('[').trim_end_matches(']');

    let addresses = resolver
        .lookup(host)
        .await
        .map_err(|e| CollectorError::Discovery(format!("could not resolve {}: {}", host, e)))?;

    addresses
        .into_iter()
        .map(|addr| {
            Ok(ScrapeTarget {
                url: address_to_url(template, addr)?,
                original_url: template.clone(),
                address: Some(addr.to_string()),
                tags: Default::default(),
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Resolver answering from a fixed table
    #[derive(Default)]
    pub(crate) struct StaticResolver {
        pub entries: HashMap<String, Vec<IpAddr>>,
    }

    impl StaticResolver {
        pub(crate) fn with(mut self, host: &str, addrs: &[&str]) -> Self {
            self.entries.insert(
                host.to_string(),
                addrs.iter().filter_map(|a| a.parse().ok()).collect(),
            );
            self
        }
    }

    #[async_trait]
    impl HostResolver for StaticResolver {
        async fn lookup(&self, host: &str) -> std::io::Result<Vec<IpAddr>> {
            self.entries.get(host).cloned().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, format!("no such host {}", host))
            })
        }
    }

    #[tokio::test]
    async fn test_resolve_service_substitutes_host() {
        let resolver = StaticResolver::default().with("svc.local", &["10.0.0.1", "10.0.0.2", "fd00::1"]);
        let template = Url::parse("https://svc.local:9443/stats?format=text").unwrap();

        let targets = resolve_service(&resolver, &template).await.unwrap();

        assert_eq!(targets.len(), 3);
        assert_eq!(targets[0].url.as_str(), "https://10.0.0.1:9443/stats?format=text");
        assert_eq!(targets[0].address.as_deref(), Some("10.0.0.1"));
        assert_eq!(targets[2].url.as_str(), "https://[fd00::1]:9443/stats?format=text");
        for target in &targets {
            assert_eq!(target.original_url, template);
            assert_eq!(target.url.path(), "/stats");
            assert_eq!(target.url.query(), Some("format=text"));
        }
    }

    #[tokio::test]
    async fn test_resolve_failure_is_discovery_error() {
        let resolver = StaticResolver::default();
        let template = Url::parse("http://missing.local:9100/metrics").unwrap();

        let err = resolve_service(&resolver, &template).await.unwrap_err();
        assert!(matches!(err, CollectorError::Discovery(_)));
    }
}
