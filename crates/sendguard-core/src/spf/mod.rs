//! SPF authorization evaluation
//!
//! Implements the RFC 7208 mechanism subset needed to decide whether a
//! given IP address is authorized to send for a domain: ip4/ip6, a, mx,
//! include, exists, all, qualifiers and the redirect modifier, with the
//! standard 10-lookup recursion limit. Macro expansion is out of scope.

use crate::dns::{DnsError, DnsResolver};
use anyhow::{anyhow, Result};
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, warn};

/// SPF evaluation outcome for one IP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpfOutcome {
    /// The IP is authorized
    Pass,
    /// The IP is explicitly not authorized
    Fail,
    /// The IP is probably not authorized (soft fail)
    SoftFail,
    /// The domain owner has no opinion
    Neutral,
    /// No SPF record found
    None,
    /// Temporary error (DNS timeout, etc.)
    TempError,
    /// Permanent error (invalid SPF record)
    PermError,
}

impl SpfOutcome {
    /// Human-readable result name, matching Authentication-Results keywords
    pub fn as_str(&self) -> &'static str {
        match self {
            SpfOutcome::Pass => "pass",
            SpfOutcome::Fail => "fail",
            SpfOutcome::SoftFail => "softfail",
            SpfOutcome::Neutral => "neutral",
            SpfOutcome::None => "none",
            SpfOutcome::TempError => "temperror",
            SpfOutcome::PermError => "permerror",
        }
    }
}

/// SPF mechanism types
#[derive(Debug, Clone)]
enum SpfMechanism {
    All,
    Include(String),
    A(Option<String>),
    Mx(Option<String>),
    Ip4(ipnet::Ipv4Net),
    Ip6(ipnet::Ipv6Net),
    Ptr(Option<String>),
    Exists(String),
}

/// SPF qualifier (prefix)
#[derive(Debug, Clone, Copy, PartialEq)]
enum SpfQualifier {
    Pass,     // + (default)
    Fail,     // -
    SoftFail, // ~
    Neutral,  // ?
}

impl SpfQualifier {
    fn to_outcome(self) -> SpfOutcome {
        match self {
            SpfQualifier::Pass => SpfOutcome::Pass,
            SpfQualifier::Fail => SpfOutcome::Fail,
            SpfQualifier::SoftFail => SpfOutcome::SoftFail,
            SpfQualifier::Neutral => SpfOutcome::Neutral,
        }
    }
}

/// Parsed SPF directive (qualifier + mechanism)
#[derive(Debug, Clone)]
struct SpfDirective {
    qualifier: SpfQualifier,
    mechanism: SpfMechanism,
}

/// SPF evaluator
pub struct SpfEvaluator {
    resolver: Arc<dyn DnsResolver>,
    max_dns_lookups: usize,
}

impl SpfEvaluator {
    /// Create a new evaluator over a DNS resolver
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self {
            resolver,
            max_dns_lookups: 10, // RFC 7208 limit
        }
    }

    /// Evaluate whether `client_ip` is authorized to send for `domain`
    pub async fn evaluate(&self, domain: &str, client_ip: IpAddr) -> SpfOutcome {
        debug!("Evaluating SPF for domain {} and IP {}", domain, client_ip);

        match self.check_spf(domain, client_ip, 0).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("SPF evaluation error for {}: {}", domain, e);
                SpfOutcome::TempError
            }
        }
    }

    /// Fetch the SPF TXT record for a domain (first record starting `v=spf1`)
    pub async fn fetch_record(&self, domain: &str) -> Result<Option<String>, DnsError> {
        let records = self.resolver.txt(domain).await?;

        Ok(records
            .into_iter()
            .find(|txt| txt.starts_with("v=spf1 ") || txt == "v=spf1"))
    }

    /// Recursive SPF check with depth tracking
    fn check_spf<'a>(
        &'a self,
        domain: &'a str,
        client_ip: IpAddr,
        depth: usize,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<SpfOutcome>> + Send + 'a>> {
        Box::pin(async move {
            if depth >= self.max_dns_lookups {
                return Ok(SpfOutcome::PermError);
            }

            let spf_record = match self.fetch_record(domain).await {
                Ok(Some(record)) => record,
                Ok(None) => return Ok(SpfOutcome::None),
                Err(e) => {
                    warn!("DNS lookup failed for {}: {}", domain, e);
                    return Ok(SpfOutcome::TempError);
                }
            };

            debug!("Found SPF record for {}: {}", domain, spf_record);

            let directives = match parse_spf_record(&spf_record) {
                Ok(d) => d,
                Err(e) => {
                    warn!("Failed to parse SPF record for {}: {}", domain, e);
                    return Ok(SpfOutcome::PermError);
                }
            };

            for directive in directives {
                match self
                    .evaluate_directive(&directive, domain, client_ip, depth)
                    .await?
                {
                    Some(outcome) => return Ok(outcome),
                    None => continue,
                }
            }

            // Default result if no mechanism matches
            Ok(SpfOutcome::Neutral)
        })
    }

    /// Evaluate a single SPF directive
    fn evaluate_directive<'a>(
        &'a self,
        directive: &'a SpfDirective,
        domain: &'a str,
        client_ip: IpAddr,
        depth: usize,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<SpfOutcome>>> + Send + 'a>>
    {
        Box::pin(async move {
            let matches = match &directive.mechanism {
                SpfMechanism::All => true,

                SpfMechanism::Ip4(network) => {
                    if let IpAddr::V4(ip) = client_ip {
                        network.contains(&ip)
                    } else {
                        false
                    }
                }

                SpfMechanism::Ip6(network) => {
                    if let IpAddr::V6(ip) = client_ip {
                        network.contains(&ip)
                    } else {
                        false
                    }
                }

                SpfMechanism::A(target) => {
                    let target_domain = target.as_deref().unwrap_or(domain);
                    self.host_has_ip(target_domain, client_ip).await
                }

                SpfMechanism::Mx(target) => {
                    let target_domain = target.as_deref().unwrap_or(domain);
                    self.mx_has_ip(target_domain, client_ip).await?
                }

                SpfMechanism::Include(included_domain) => {
                    let outcome = self.check_spf(included_domain, client_ip, depth + 1).await?;
                    outcome == SpfOutcome::Pass
                }

                SpfMechanism::Ptr(_) => {
                    // PTR is deprecated and expensive; never matched
                    warn!("PTR mechanism used but not evaluated (deprecated)");
                    false
                }

                SpfMechanism::Exists(target) => {
                    matches!(self.resolver.ips(target).await, Ok(ips) if !ips.is_empty())
                }
            };

            if matches {
                Ok(Some(directive.qualifier.to_outcome()))
            } else {
                Ok(None)
            }
        })
    }

    /// Check if the client IP is among a host's A/AAAA records
    async fn host_has_ip(&self, host: &str, client_ip: IpAddr) -> bool {
        match self.resolver.ips(host).await {
            Ok(ips) => ips.contains(&client_ip),
            Err(_) => false,
        }
    }

    /// Check if the client IP belongs to any MX host of the domain
    async fn mx_has_ip(&self, domain: &str, client_ip: IpAddr) -> Result<bool> {
        if let Ok(hosts) = self.resolver.mx(domain).await {
            for mx in hosts {
                if self.host_has_ip(&mx.host, client_ip).await {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

/// Parse an SPF record into directives
fn parse_spf_record(record: &str) -> Result<Vec<SpfDirective>> {
    let mut directives = Vec::new();

    let terms: &str = record
        .strip_prefix("v=spf1")
        .ok_or_else(|| anyhow!("Invalid SPF record: missing v=spf1"))?
        .trim();

    for term in terms.split_whitespace() {
        // Modifiers carry '='; only redirect is honored
        if term.contains('=') {
            if let Some(domain) = term.strip_prefix("redirect=") {
                directives.push(SpfDirective {
                    qualifier: SpfQualifier::Pass,
                    mechanism: SpfMechanism::Include(domain.to_string()),
                });
            }
            continue;
        }

        let (qualifier, mechanism_str) = match term.chars().next() {
            Some('+') => (SpfQualifier::Pass, &term[1..]),
            Some('-') => (SpfQualifier::Fail, &term[1..]),
            Some('~') => (SpfQualifier::SoftFail, &term[1..]),
            Some('?') => (SpfQualifier::Neutral, &term[1..]),
            _ => (SpfQualifier::Pass, term),
        };

        let mechanism = parse_mechanism(mechanism_str)?;

        directives.push(SpfDirective {
            qualifier,
            mechanism,
        });
    }

    Ok(directives)
}

/// Parse a single SPF mechanism
fn parse_mechanism(s: &str) -> Result<SpfMechanism> {
    if s == "all" {
        return Ok(SpfMechanism::All);
    }

    if s == "a" {
        return Ok(SpfMechanism::A(None));
    }

    if let Some(domain) = s.strip_prefix("a:") {
        return Ok(SpfMechanism::A(Some(domain.to_string())));
    }

    if s == "mx" {
        return Ok(SpfMechanism::Mx(None));
    }

    if let Some(domain) = s.strip_prefix("mx:") {
        return Ok(SpfMechanism::Mx(Some(domain.to_string())));
    }

    if let Some(network) = s.strip_prefix("ip4:") {
        let net = if network.contains('/') {
            network.parse()?
        } else {
            format!("{}/32", network).parse()?
        };
        return Ok(SpfMechanism::Ip4(net));
    }

    if let Some(network) = s.strip_prefix("ip6:") {
        let net = if network.contains('/') {
            network.parse()?
        } else {
            format!("{}/128", network).parse()?
        };
        return Ok(SpfMechanism::Ip6(net));
    }

    if let Some(domain) = s.strip_prefix("include:") {
        return Ok(SpfMechanism::Include(domain.to_string()));
    }

    if s == "ptr" {
        return Ok(SpfMechanism::Ptr(None));
    }

    if let Some(domain) = s.strip_prefix("ptr:") {
        return Ok(SpfMechanism::Ptr(Some(domain.to_string())));
    }

    if let Some(domain) = s.strip_prefix("exists:") {
        return Ok(SpfMechanism::Exists(domain.to_string()));
    }

    Err(anyhow!("Unknown SPF mechanism: {}", s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::StaticResolver;

    #[test]
    fn test_parse_spf_record() {
        let record = "v=spf1 ip4:192.168.1.0/24 include:_spf.example.net -all";
        let directives = parse_spf_record(record).unwrap();

        assert_eq!(directives.len(), 3);
        assert!(matches!(directives[0].mechanism, SpfMechanism::Ip4(_)));
        assert!(matches!(directives[1].mechanism, SpfMechanism::Include(_)));
        assert!(matches!(directives[2].mechanism, SpfMechanism::All));
        assert_eq!(directives[2].qualifier, SpfQualifier::Fail);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_spf_record("not an spf record").is_err());
        assert!(parse_spf_record("v=spf1 bogus:thing -all").is_err());
    }

    #[tokio::test]
    async fn test_evaluate_ip4_pass_and_fail() {
        let resolver = Arc::new(
            StaticResolver::new().with_txt("example.com", &["v=spf1 ip4:192.0.2.0/24 -all"]),
        );
        let evaluator = SpfEvaluator::new(resolver);

        let authorized: IpAddr = "192.0.2.10".parse().unwrap();
        let stranger: IpAddr = "198.51.100.1".parse().unwrap();

        assert_eq!(
            evaluator.evaluate("example.com", authorized).await,
            SpfOutcome::Pass
        );
        assert_eq!(
            evaluator.evaluate("example.com", stranger).await,
            SpfOutcome::Fail
        );
    }

    #[tokio::test]
    async fn test_evaluate_softfail_and_none() {
        let resolver = Arc::new(
            StaticResolver::new().with_txt("example.com", &["v=spf1 ip4:192.0.2.1 ~all"]),
        );
        let evaluator = SpfEvaluator::new(resolver);

        let stranger: IpAddr = "198.51.100.1".parse().unwrap();
        assert_eq!(
            evaluator.evaluate("example.com", stranger).await,
            SpfOutcome::SoftFail
        );

        let no_record = Arc::new(StaticResolver::new());
        let evaluator = SpfEvaluator::new(no_record);
        assert_eq!(
            evaluator.evaluate("nothing.example.com", stranger).await,
            SpfOutcome::None
        );
    }

    #[tokio::test]
    async fn test_evaluate_include() {
        let resolver = Arc::new(
            StaticResolver::new()
                .with_txt("example.com", &["v=spf1 include:_spf.relay.net -all"])
                .with_txt("_spf.relay.net", &["v=spf1 ip4:203.0.113.5 -all"]),
        );
        let evaluator = SpfEvaluator::new(resolver);

        let relay: IpAddr = "203.0.113.5".parse().unwrap();
        assert_eq!(
            evaluator.evaluate("example.com", relay).await,
            SpfOutcome::Pass
        );
    }

    #[tokio::test]
    async fn test_evaluate_lookup_failure_is_temperror() {
        let resolver = Arc::new(StaticResolver::new().failing("example.com"));
        let evaluator = SpfEvaluator::new(resolver);

        let ip: IpAddr = "192.0.2.1".parse().unwrap();
        assert_eq!(
            evaluator.evaluate("example.com", ip).await,
            SpfOutcome::TempError
        );
    }
}
