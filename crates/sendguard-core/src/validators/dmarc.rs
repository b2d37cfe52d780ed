//! DMARC policy check (priority 11)

use super::{dns_changed, previous_record, Validator};
use crate::dns::{DnsError, DnsResolver};
use crate::evidence::EvidenceDocument;
use async_trait::async_trait;
use sendguard_common::CheckOutcome;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

const POLICY_VALUES: [&str; 3] = ["reject", "quarantine", "none"];

/// Grades the current `_dmarc.<domain>` policy record and, when a test
/// email is available, combines it with the DMARC result recorded by the
/// receiving server, flagging DNS drift since the email arrived.
pub struct DmarcValidator {
    resolver: Arc<dyn DnsResolver>,
}

impl DmarcValidator {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }

    /// Fetch the DMARC TXT record (first record starting `v=DMARC1`)
    async fn fetch_record(&self, domain: &str) -> Result<Option<String>, DnsError> {
        let name = format!("_dmarc.{}", domain);
        let records = self.resolver.txt(&name).await?;

        Ok(records.into_iter().find(|txt| txt.starts_with("v=DMARC1")))
    }

    /// Grade the record on DNS state alone
    fn evaluate_record(record: Option<&str>) -> CheckOutcome {
        let Some(record) = record else {
            return CheckOutcome::warning("domain has no DMARC record").with_detail(
                "recommendation",
                "publish a v=DMARC1 policy at _dmarc.<domain> to control how receivers \
                 treat unauthenticated mail",
            );
        };

        let tags = parse_tags(record);
        let tags_value = serde_json::to_value(&tags).unwrap_or_default();

        let Some(policy) = tags.get("p") else {
            return CheckOutcome::invalid("DMARC record is missing the required policy (p=) tag")
                .with_errors(vec!["missing required policy (p=) tag".to_string()])
                .with_detail("dns_record", record)
                .with_detail("tags", tags_value);
        };

        if !POLICY_VALUES.contains(&policy.as_str()) {
            return CheckOutcome::invalid(format!("unknown policy value \"{}\"", policy))
                .with_errors(vec![format!("unknown policy value \"{}\"", policy)])
                .with_detail("dns_record", record)
                .with_detail("tags", tags_value);
        }

        let mut warnings = Vec::new();

        if policy == "none" {
            warnings.push("policy is monitoring only (p=none); failures are not acted on".to_string());
        }

        if !tags.contains_key("rua") {
            warnings.push("no rua address: aggregate reports will not be delivered".to_string());
        }

        if let Some(pct) = tags.get("pct").and_then(|v| v.parse::<u8>().ok()) {
            if pct < 100 {
                warnings.push(format!("policy applies to only {}% of messages", pct));
            }
        }

        let mut outcome = if warnings.is_empty() {
            CheckOutcome::valid(format!("DMARC policy is \"{}\"", policy))
        } else {
            CheckOutcome::warning(warnings.join("; ")).with_detail("warnings", warnings.clone())
        };

        // Alignment modes are informational here; strictness matters to
        // receivers, not to this check.
        outcome = outcome
            .with_detail("aspf", alignment_mode(tags.get("aspf")))
            .with_detail("adkim", alignment_mode(tags.get("adkim")));

        outcome
            .with_detail("dns_record", record)
            .with_detail("tags", tags_value)
    }
}

#[async_trait]
impl Validator for DmarcValidator {
    fn name(&self) -> &'static str {
        super::DMARC
    }

    fn priority(&self) -> u8 {
        11
    }

    async fn validate(
        &self,
        _email: &str,
        domain: &str,
        evidence: Option<&EvidenceDocument>,
    ) -> anyhow::Result<CheckOutcome> {
        let (current, dns_outcome) = match self.fetch_record(domain).await {
            Ok(record) => {
                let outcome = Self::evaluate_record(record.as_deref());
                (record, outcome)
            }
            Err(e) => {
                debug!("DMARC lookup failed for {}: {}", domain, e);
                // Transient resolver failures are common; grade leniently.
                let outcome =
                    CheckOutcome::warning(format!("DMARC record could not be fetched: {}", e));
                (None, outcome)
            }
        };

        // Without a recorded DMARC result in the test email, DNS state is
        // all there is.
        let Some(evidence) = evidence else {
            return Ok(dns_outcome);
        };
        let Some(reported) = &evidence.authentication_results.dmarc else {
            return Ok(dns_outcome);
        };

        let previous = previous_record(evidence, super::DMARC, "dns_record");
        let changed = dns_changed(previous.as_deref(), current.as_deref());

        let mut outcome = match reported.result.as_str() {
            "pass" if changed => CheckOutcome::warning(
                "DMARC passed in the test email, but the DNS record has changed since",
            )
            .with_detail("previous_record", previous.clone().unwrap_or_default()),
            "pass" => CheckOutcome::valid("DMARC passed, verified from the received test email"),
            "fail" => CheckOutcome::invalid("DMARC failed in the received test email")
                .with_errors(vec!["DMARC failed in the received test email".to_string()]),
            other => {
                CheckOutcome::warning(format!("DMARC result in the test email was \"{}\"", other))
            }
        };

        if let Some(record) = &current {
            outcome = outcome
                .with_detail("dns_record", record.as_str())
                .with_detail(
                    "tags",
                    serde_json::to_value(parse_tags(record)).unwrap_or_default(),
                );
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

/// Parse `;`-separated `tag=value` pairs into a map
fn parse_tags(record: &str) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();

    for part in record.split(';') {
        let part = part.trim();
        if let Some((name, value)) = part.split_once('=') {
            tags.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }

    tags
}

/// `s` means strict; anything else (typically `r`) is relaxed
fn alignment_mode(tag: Option<&String>) -> &'static str {
    match tag.map(String::as_str) {
        Some("s") => "strict",
        _ => "relaxed",
    }
}
