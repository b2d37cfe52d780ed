//! MX record check (priority 10)

use super::Validator;
use crate::dns::DnsResolver;
use crate::evidence::EvidenceDocument;
use async_trait::async_trait;
use sendguard_common::CheckOutcome;
use std::sync::Arc;
use tracing::debug;

/// Checks that the domain can receive mail at all.
///
/// This is a present-tense capability check on the domain; an individual
/// test email proves nothing here, so evidence is never consulted.
pub struct MxValidator {
    resolver: Arc<dyn DnsResolver>,
}

impl MxValidator {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }
}

#[async_trait]
impl Validator for MxValidator {
    fn name(&self) -> &'static str {
        super::MX
    }

    fn priority(&self) -> u8 {
        10
    }

    async fn validate(
        &self,
        _email: &str,
        domain: &str,
        _evidence: Option<&EvidenceDocument>,
    ) -> anyhow::Result<CheckOutcome> {
        let hosts = match self.resolver.mx(domain).await {
            Ok(hosts) => hosts,
            Err(e) => {
                debug!("MX lookup failed for {}: {}", domain, e);
                let error = format!("DNS lookup for {} failed: {}", domain, e);
                return Ok(CheckOutcome::invalid(
                    "could not resolve the domain's MX records",
                )
                .with_errors(vec![error]));
            }
        };

        if hosts.is_empty() {
            let error = format!("domain {} has no MX records", domain);
            return Ok(
                CheckOutcome::invalid("domain has no MX records and cannot receive mail")
                    .with_errors(vec![error])
                    .with_detail("mx_records", serde_json::json!([])),
            );
        }

        Ok(
            CheckOutcome::valid(format!("found {} MX record(s)", hosts.len())).with_detail(
                "mx_records",
                serde_json::to_value(&hosts).unwrap_or_default(),
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::StaticResolver;
    use sendguard_common::CheckStatus;

    #[tokio::test]
    async fn test_mx_present() {
        let resolver = Arc::new(
            StaticResolver::new()
                .with_mx("example.com", &[("mx2.example.com", 20), ("mx1.example.com", 10)]),
        );
        let outcome = MxValidator::new(resolver)
            .validate("a@example.com", "example.com", None)
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Valid);
        let records = outcome.details["mx_records"].as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["host"], "mx1.example.com");
        assert_eq!(records[0]["priority"], 10);
    }

    #[tokio::test]
    async fn test_no_mx_records() {
        let resolver = Arc::new(StaticResolver::new());
        let outcome = MxValidator::new(resolver)
            .validate("a@example.com", "example.com", None)
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Invalid);
        assert!(!outcome.errors().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_failure_is_invalid() {
        let resolver = Arc::new(StaticResolver::new().failing("example.com"));
        let outcome = MxValidator::new(resolver)
            .validate("a@example.com", "example.com", None)
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Invalid);
        assert!(outcome.errors()[0].contains("DNS lookup"));
    }
}
