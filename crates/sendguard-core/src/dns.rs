//! DNS lookup adapter
//!
//! Wraps raw DNS queries behind a fallible trait. Callers must treat a
//! lookup error (`Err`) and "no matching record" (`Ok` with an empty list)
//! as distinct outcomes: the MX check grades both as invalid, while the
//! policy checks are lenient about transient resolver failures.

use async_trait::async_trait;
use serde::Serialize;
use std::net::IpAddr;
use thiserror::Error;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::error::{ResolveError, ResolveErrorKind};
use trust_dns_resolver::TokioAsyncResolver;

/// DNS lookup failure, distinct from an empty result
#[derive(Debug, Error)]
pub enum DnsError {
    #[error("DNS lookup failed: {0}")]
    Lookup(String),
}

/// An MX record target
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MxHost {
    pub host: String,
    pub priority: u16,
}

/// DNS lookups used by the validators
#[async_trait]
pub trait DnsResolver: Send + Sync {
    /// TXT records for a name; empty when none exist
    async fn txt(&self, name: &str) -> Result<Vec<String>, DnsError>;

    /// MX records for a domain, sorted by ascending preference; empty when
    /// none exist
    async fn mx(&self, domain: &str) -> Result<Vec<MxHost>, DnsError>;

    /// All IPv4/IPv6 addresses of a host; empty when none exist
    async fn ips(&self, host: &str) -> Result<Vec<IpAddr>, DnsError>;
}

/// Resolver backed by the system DNS configuration
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    /// Create a resolver with the default configuration
    pub fn new() -> Self {
        let resolver =
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        Self { resolver }
    }

    /// Create a resolver around an existing trust-dns resolver
    pub fn with_resolver(resolver: TokioAsyncResolver) -> Self {
        Self { resolver }
    }

    /// Map "no records" to an empty result; everything else is a failure
    fn map_empty<T>(err: ResolveError) -> Result<Vec<T>, DnsError> {
        if matches!(err.kind(), ResolveErrorKind::NoRecordsFound { .. }) {
            Ok(Vec::new())
        } else {
            Err(DnsError::Lookup(err.to_string()))
        }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        match self.resolver.txt_lookup(name).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|record| {
                    record
                        .txt_data()
                        .iter()
                        .map(|d| String::from_utf8_lossy(d))
                        .collect::<String>()
                })
                .collect()),
            Err(e) => Self::map_empty(e),
        }
    }

    async fn mx(&self, domain: &str) -> Result<Vec<MxHost>, DnsError> {
        match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => {
                let mut hosts: Vec<MxHost> = lookup
                    .iter()
                    .map(|r| MxHost {
                        host: r.exchange().to_string().trim_end_matches('.').to_string(),
                        priority: r.preference(),
                    })
                    .collect();

                hosts.sort_by_key(|h| h.priority);
                Ok(hosts)
            }
            Err(e) => Self::map_empty(e),
        }
    }

    async fn ips(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        match self.resolver.lookup_ip(host).await {
            Ok(lookup) => Ok(lookup.iter().collect()),
            Err(e) => Self::map_empty(e),
        }
    }
}

/// Fixed-answer resolver for tests.
///
/// Names registered with [`StaticResolver::failing`] return a lookup error;
/// unregistered names resolve to an empty result.
#[cfg(test)]
#[derive(Default)]
pub struct StaticResolver {
    txt: std::collections::HashMap<String, Vec<String>>,
    mx: std::collections::HashMap<String, Vec<MxHost>>,
    ips: std::collections::HashMap<String, Vec<IpAddr>>,
    failures: std::collections::HashSet<String>,
    queries: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_txt(mut self, name: &str, records: &[&str]) -> Self {
        self.txt
            .insert(name.to_string(), records.iter().map(|r| r.to_string()).collect());
        self
    }

    pub fn with_mx(mut self, domain: &str, hosts: &[(&str, u16)]) -> Self {
        self.mx.insert(
            domain.to_string(),
            hosts
                .iter()
                .map(|(host, priority)| MxHost {
                    host: host.to_string(),
                    priority: *priority,
                })
                .collect(),
        );
        self
    }

    pub fn with_ips(mut self, host: &str, ips: &[IpAddr]) -> Self {
        self.ips.insert(host.to_string(), ips.to_vec());
        self
    }

    pub fn failing(mut self, name: &str) -> Self {
        self.failures.insert(name.to_string());
        self
    }

    /// Number of lookups served so far
    pub fn query_count(&self) -> usize {
        self.queries.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn check(&self, name: &str) -> Result<(), DnsError> {
        self.queries
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.failures.contains(name) {
            Err(DnsError::Lookup(format!("simulated failure for {}", name)))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
#[async_trait]
impl DnsResolver for StaticResolver {
    async fn txt(&self, name: &str) -> Result<Vec<String>, DnsError> {
        self.check(name)?;
        Ok(self.txt.get(name).cloned().unwrap_or_default())
    }

    async fn mx(&self, domain: &str) -> Result<Vec<MxHost>, DnsError> {
        self.check(domain)?;
        let mut hosts = self.mx.get(domain).cloned().unwrap_or_default();
        hosts.sort_by_key(|h| h.priority);
        Ok(hosts)
    }

    async fn ips(&self, host: &str) -> Result<Vec<IpAddr>, DnsError> {
        self.check(host)?;
        Ok(self.ips.get(host).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_resolver_distinguishes_empty_and_failure() {
        let resolver = StaticResolver::new()
            .with_txt("example.com", &["v=spf1 -all"])
            .failing("broken.example.com");

        assert_eq!(
            resolver.txt("example.com").await.unwrap(),
            vec!["v=spf1 -all".to_string()]
        );
        assert!(resolver.txt("empty.example.com").await.unwrap().is_empty());
        assert!(resolver.txt("broken.example.com").await.is_err());
    }

    #[tokio::test]
    async fn test_static_resolver_sorts_mx_by_preference() {
        let resolver = StaticResolver::new()
            .with_mx("example.com", &[("backup.example.com", 20), ("mx.example.com", 5)]);

        let hosts = resolver.mx("example.com").await.unwrap();
        assert_eq!(hosts[0].host, "mx.example.com");
        assert_eq!(hosts[0].priority, 5);
    }
}
