//! SPF authorization check (priority 12)

use super::{dns_changed, previous_record, Validator};
use crate::dns::DnsResolver;
use crate::evidence::EvidenceDocument;
use crate::spf::{SpfEvaluator, SpfOutcome};
use async_trait::async_trait;
use sendguard_common::config::OutboundConfig;
use sendguard_common::CheckOutcome;
use std::sync::Arc;
use tracing::debug;

/// Checks that the configured outbound mail server is authorized to send
/// for the domain.
///
/// When the transport is not SMTP-based there is nothing misconfigured,
/// only nothing to check, so the result is skipped rather than a warning.
/// Every resolved address of the outbound host is evaluated independently:
/// an operator relying on a relay pool must have all pool members
/// authorized, so a mixed pass/fail is graded invalid, not partial-pass.
pub struct SpfValidator {
    resolver: Arc<dyn DnsResolver>,
    evaluator: SpfEvaluator,
    outbound: OutboundConfig,
}

impl SpfValidator {
    pub fn new(resolver: Arc<dyn DnsResolver>, outbound: OutboundConfig) -> Self {
        let evaluator = SpfEvaluator::new(resolver.clone());
        Self {
            resolver,
            evaluator,
            outbound,
        }
    }

    /// Evaluate DNS state: authorization of every outbound relay address
    async fn evaluate_dns(&self, domain: &str, current: Option<&str>) -> CheckOutcome {
        if !self.outbound.is_smtp() {
            return CheckOutcome::skipped(format!(
                "outbound transport is \"{}\", not SMTP; there is nothing to authorize",
                self.outbound.transport
            ));
        }

        let Some(host) = self.outbound.host.as_deref() else {
            return CheckOutcome::skipped("no outbound mail server is configured");
        };

        let ips = match self.resolver.ips(host).await {
            Ok(ips) if !ips.is_empty() => ips,
            Ok(_) => {
                return CheckOutcome::skipped(format!(
                    "outbound mail server {} does not resolve to any address",
                    host
                ))
                .with_detail("checked_host", host);
            }
            Err(e) => {
                debug!("Could not resolve outbound host {}: {}", host, e);
                return CheckOutcome::skipped(format!(
                    "outbound mail server {} could not be resolved: {}",
                    host, e
                ))
                .with_detail("checked_host", host);
            }
        };

        let mut results = serde_json::Map::new();
        let mut any_pass = false;
        let mut any_fail = false;
        let mut any_soft = false;

        for ip in ips {
            let outcome = self.evaluator.evaluate(domain, ip).await;
            match outcome {
                SpfOutcome::Pass => any_pass = true,
                SpfOutcome::Fail => any_fail = true,
                SpfOutcome::SoftFail => any_soft = true,
                _ => {}
            }
            results.insert(ip.to_string(), outcome.as_str().into());
        }

        let outcome = if any_pass && !any_fail && !any_soft {
            CheckOutcome::valid("outbound mail server is authorized by SPF")
        } else if any_pass {
            let error =
                "mixed SPF authorization: some relay addresses pass while others fail".to_string();
            CheckOutcome::invalid(&error).with_errors(vec![error])
        } else if any_fail {
            let error = format!("outbound mail server {} is not authorized by SPF", host);
            CheckOutcome::invalid(&error).with_errors(vec![error])
        } else {
            CheckOutcome::warning("SPF evaluation was inconclusive for the outbound mail server")
        };

        let outcome = outcome
            .with_detail("checked_host", host)
            .with_detail("spf_results", serde_json::Value::Object(results));

        match current {
            Some(record) => outcome.with_detail("dns_record", record),
            None => outcome,
        }
    }
}

#[async_trait]
impl Validator for SpfValidator {
    fn name(&self) -> &'static str {
        super::SPF
    }

    fn priority(&self) -> u8 {
        12
    }

    async fn validate(
        &self,
        _email: &str,
        domain: &str,
        evidence: Option<&EvidenceDocument>,
    ) -> anyhow::Result<CheckOutcome> {
        let current = match self.evaluator.fetch_record(domain).await {
            Ok(record) => record,
            Err(e) => {
                debug!("SPF record lookup failed for {}: {}", domain, e);
                None
            }
        };

        let dns_outcome = self.evaluate_dns(domain, current.as_deref()).await;

        let Some(evidence) = evidence else {
            return Ok(dns_outcome);
        };
        let Some(reported) = &evidence.authentication_results.spf else {
            return Ok(dns_outcome);
        };

        let previous = previous_record(evidence, super::SPF, "dns_record");
        let changed = dns_changed(previous.as_deref(), current.as_deref());

        let mut outcome = match reported.result.as_str() {
            "pass" if changed => CheckOutcome::warning(
                "SPF passed in the test email, but the DNS record has changed since",
            )
            .with_detail("previous_record", previous.clone().unwrap_or_default()),
            "pass" => CheckOutcome::valid("SPF passed, verified from the received test email"),
            "fail" | "hardfail" => {
                CheckOutcome::invalid("SPF failed in the received test email")
                    .with_errors(vec!["SPF failed in the received test email".to_string()])
            }
            "softfail" => CheckOutcome::warning(
                "SPF soft-failed in the test email; messages may be marked as suspicious",
            ),
            other => {
                CheckOutcome::warning(format!("SPF result in the test email was \"{}\"", other))
            }
        };

        if let Some(record) = &current {
            outcome = outcome.with_detail("dns_record", record.as_str());
        }

        Ok(outcome
            .with_detail(
                "dns_check",
                serde_json::json!({
                    "status": dns_outcome.status,
                    "message": dns_outcome.message,
                }),
            )
            .with_detail("dns_changed", changed)
            .with_detail("file_hash", evidence.file_hash.as_str()))
    }
}
