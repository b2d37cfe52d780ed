//! DKIM check (priority 13)

use super::{dns_changed, previous_record, Validator};
use crate::dns::{DnsError, DnsResolver};
use crate::evidence::{AuthMethodResult, DkimSignature, EvidenceDocument};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sendguard_common::CheckOutcome;
use std::sync::Arc;
use tracing::debug;

/// Where the DKIM information in the test email comes from.
///
/// The receiving server's Authentication-Results verdict is authoritative;
/// a raw DKIM-Signature header is only a fallback that can prove key
/// existence, never cryptographic validity.
enum DkimEvidence<'a> {
    AuthResult(&'a AuthMethodResult),
    SignatureOnly(&'a DkimSignature),
    None,
}

/// State of the public key at `<selector>._domainkey.<signing-domain>`
enum KeyState {
    Found(String),
    Missing,
    LookupFailed,
    /// No selector recorded, nothing to fetch
    Unknown,
}

/// Checks the DKIM outcome recorded in a test email against current DNS.
///
/// DKIM cannot be assessed from DNS alone: a public key's existence proves
/// nothing without a signed message, so without evidence this check always
/// asks for one.
pub struct DkimValidator {
    resolver: Arc<dyn DnsResolver>,
}

impl DkimValidator {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }

    /// Fetch the public key record for a selector/domain pair
    async fn fetch_key(&self, selector: &str, domain: &str) -> Result<Option<String>, DnsError> {
        let name = format!("{}._domainkey.{}", selector, domain);
        let records = self.resolver.txt(&name).await?;

        // Key records usually carry a p= tag; fall back to the first record.
        Ok(records
            .iter()
            .find(|r| r.contains("p="))
            .or_else(|| records.first())
            .cloned())
    }

    async fn key_state(&self, selector: Option<&str>, domain: &str) -> KeyState {
        let Some(selector) = selector.filter(|s| !s.is_empty()) else {
            return KeyState::Unknown;
        };

        match self.fetch_key(selector, domain).await {
            Ok(Some(key)) => KeyState::Found(key),
            Ok(None) => KeyState::Missing,
            Err(e) => {
                debug!("DKIM key lookup failed for {}.{}: {}", selector, domain, e);
                KeyState::LookupFailed
            }
        }
    }

    /// Grade an explicit Authentication-Results DKIM verdict
    async fn evaluate_auth_result(
        &self,
        sender_domain: &str,
        reported: &AuthMethodResult,
        evidence: &EvidenceDocument,
    ) -> CheckOutcome {
        let selector = reported.property("header.s");
        let signing_domain = reported
            .property("header.d")
            .unwrap_or(sender_domain)
            .to_lowercase();

        let key_state = self.key_state(selector, &signing_domain).await;
        let current_key = match &key_state {
            KeyState::Found(key) => Some(key.clone()),
            _ => None,
        };

        let aligned = domains_aligned(sender_domain, &signing_domain);
        let previous = previous_record(evidence, super::DKIM, "dns_record");
        // Drift is only meaningful against a key we actually fetched; a
        // missing key warns on its own and an unknown selector proves
        // nothing.
        let changed = match &key_state {
            KeyState::Found(key) => dns_changed(previous.as_deref(), Some(key.as_str())),
            _ => false,
        };

        let mut outcome = match reported.result.as_str() {
            "pass" => match key_state {
                KeyState::Missing => CheckOutcome::warning(
                    "DKIM passed in the test email, but the public key no longer exists in DNS",
                ),
                KeyState::LookupFailed => CheckOutcome::warning(
                    "DKIM passed in the test email, but the public key could not be resolved",
                ),
                _ if changed => CheckOutcome::warning(
                    "DKIM passed in the test email, but the public key has changed since",
                )
                .with_detail("previous_record", previous.clone().unwrap_or_default()),
                // A pass is a pass regardless of alignment; enforcing
                // alignment is DMARC's job, not DKIM's.
                _ => CheckOutcome::valid("DKIM passed, verified from the received test email"),
            },
            "fail" => CheckOutcome::invalid("DKIM failed in the received test email")
                .with_errors(vec!["DKIM failed in the received test email".to_string()]),
            other => {
                CheckOutcome::warning(format!("DKIM result in the test email was \"{}\"", other))
            }
        };

        if !aligned {
            outcome = outcome.with_detail(
                "alignment_note",
                format!(
                    "signing domain {} does not align with sender domain {}; \
                     alignment is enforced by DMARC",
                    signing_domain, sender_domain
                ),
            );
        }
        if let Some(key) = &current_key {
            outcome = outcome.with_detail("dns_record", key.as_str());
        }
        if let Some(selector) = selector {
            outcome = outcome.with_detail("selector", selector);
        }

        outcome
            .with_detail("result", reported.result.as_str())
            .with_detail("signing_domain", signing_domain)
            .with_detail("domain_aligned", aligned)
            .with_detail("dns_changed", changed)
            .with_detail("file_hash", evidence.file_hash.as_str())
    }

    /// Grade a bare DKIM-Signature header: key existence only.
    ///
    /// This path cannot prove cryptographic validity, and says so.
    async fn evaluate_signature_only(
        &self,
        signature: &DkimSignature,
        evidence: &EvidenceDocument,
    ) -> CheckOutcome {
        if signature.selector.is_empty() || signature.domain.is_empty() {
            return CheckOutcome::warning(
                "DKIM signature in the test email is missing its selector or domain tag",
            )
            .with_detail("file_hash", evidence.file_hash.as_str());
        }

        let outcome = match self.fetch_key(&signature.selector, &signature.domain).await {
            Err(e) => CheckOutcome::warning(format!(
                "DKIM public key could not be verified: {}",
                e
            )),
            Ok(None) => {
                let error = format!(
                    "DKIM signature references selector \"{}\" but no public key exists at \
                     {}._domainkey.{}",
                    signature.selector, signature.selector, signature.domain
                );
                CheckOutcome::invalid(&error).with_errors(vec![error])
            }
            Ok(Some(key)) => {
                let outcome = match key_p_tag(&key) {
                    Some(p) if p.is_empty() => {
                        let error = "DKIM public key has been revoked (empty p= tag)".to_string();
                        CheckOutcome::invalid(&error).with_errors(vec![error])
                    }
                    Some(p) if BASE64.decode(p.as_bytes()).is_err() => {
                        CheckOutcome::warning("DKIM public key record is malformed")
                    }
                    _ => CheckOutcome::warning(
                        "DKIM signature and published public key found; cryptographic validity \
                         cannot be proven without the receiving server's verdict",
                    ),
                };
                outcome
                    .with_detail("dns_record", key.as_str())
                    .with_detail("verified", false)
            }
        };

        outcome
            .with_detail("selector", signature.selector.as_str())
            .with_detail("signing_domain", signature.domain.as_str())
            .with_detail("file_hash", evidence.file_hash.as_str())
    }
}

#[async_trait]
impl Validator for DkimValidator {
    fn name(&self) -> &'static str {
        super::DKIM
    }

    fn priority(&self) -> u8 {
        13
    }

    async fn validate(
        &self,
        _email: &str,
        domain: &str,
        evidence: Option<&EvidenceDocument>,
    ) -> anyhow::Result<CheckOutcome> {
        let Some(evidence) = evidence else {
            return Ok(CheckOutcome::warning(
                "DKIM verification requires an uploaded test email",
            ));
        };

        let source = match (
            &evidence.authentication_results.dkim,
            &evidence.dkim_signature,
        ) {
            (Some(reported), _) => DkimEvidence::AuthResult(reported),
            (None, Some(signature)) => DkimEvidence::SignatureOnly(signature),
            (None, None) => DkimEvidence::None,
        };

        let outcome = match source {
            DkimEvidence::AuthResult(reported) => {
                self.evaluate_auth_result(domain, reported, evidence).await
            }
            DkimEvidence::SignatureOnly(signature) => {
                self.evaluate_signature_only(signature, evidence).await
            }
            DkimEvidence::None => CheckOutcome::warning(
                "test email carries no DKIM result and no DKIM signature",
            )
            .with_detail("file_hash", evidence.file_hash.as_str()),
        };

        Ok(outcome)
    }
}

/// Relaxed domain alignment: equal, or one is a subdomain of the other
fn domains_aligned(sender_domain: &str, signing_domain: &str) -> bool {
    let sender = sender_domain.to_lowercase();
    let signing = signing_domain.to_lowercase();

    sender == signing
        || signing.ends_with(&format!(".{}", sender))
        || sender.ends_with(&format!(".{}", signing))
}

/// Extract the p= tag value from a DKIM key record
fn key_p_tag(record: &str) -> Option<String> {
    record.split(';').find_map(|part| {
        let (tag, value) = part.split_once('=')?;
        if tag.trim().eq_ignore_ascii_case("p") {
            Some(value.split_whitespace().collect())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::StaticResolver;
    use crate::evidence::{AuthenticationResults, SenderIdentity};
    use sendguard_common::CheckStatus;
    use std::collections::BTreeMap;

    const KEY_RECORD: &str = "v=DKIM1; k=rsa; p=MIGfMA0GCSqGSIb3DQEBAQUAA4GNADCBiQ=";

    fn auth_evidence(
        result: &str,
        selector: &str,
        signing_domain: &str,
        previous_key: Option<&str>,
    ) -> EvidenceDocument {
        let mut properties = BTreeMap::new();
        properties.insert("header.s".to_string(), selector.to_string());
        properties.insert("header.d".to_string(), signing_domain.to_string());

        let mut previous_validation = None;
        if let Some(key) = previous_key {
            let mut map = BTreeMap::new();
            map.insert(
                super::super::DKIM.to_string(),
                serde_json::json!({"dns_record": key}),
            );
            previous_validation = Some(map);
        }

        EvidenceDocument {
            file_hash: "f00d".to_string(),
            from: SenderIdentity::default(),
            authentication_results: AuthenticationResults {
                raw: String::new(),
                spf: None,
                dkim: Some(AuthMethodResult {
                    result: result.to_string(),
                    properties,
                }),
                dmarc: None,
            },
            dkim_signature: None,
            received_chain: vec![],
            previous_validation,
        }
    }

    fn signature_evidence(selector: &str, domain: &str) -> EvidenceDocument {
        EvidenceDocument {
            file_hash: "f00d".to_string(),
            from: SenderIdentity::default(),
            authentication_results: AuthenticationResults::default(),
            dkim_signature: Some(DkimSignature {
                version: "1".to_string(),
                algorithm: "rsa-sha256".to_string(),
                domain: domain.to_string(),
                selector: selector.to_string(),
                headers_signed: "from:to".to_string(),
                body_hash: "abc=".to_string(),
                signature: "def==".to_string(),
            }),
            received_chain: vec![],
            previous_validation: None,
        }
    }

    #[tokio::test]
    async fn test_no_evidence_warns() {
        let validator = DkimValidator::new(Arc::new(StaticResolver::new()));
        let outcome = validator
            .validate("a@example.com", "example.com", None)
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Warning);
        assert!(outcome.message.contains("requires an uploaded test email"));
    }

    #[tokio::test]
    async fn test_pass_with_key_present_is_valid() {
        let resolver = Arc::new(
            StaticResolver::new().with_txt("mail._domainkey.example.com", &[KEY_RECORD]),
        );
        let evidence = auth_evidence("pass", "mail", "example.com", Some(KEY_RECORD));
        let outcome = DkimValidator::new(resolver)
            .validate("a@example.com", "example.com", Some(&evidence))
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Valid);
        assert_eq!(outcome.details["domain_aligned"], true);
        assert_eq!(outcome.details["dns_changed"], false);
    }

    #[tokio::test]
    async fn test_pass_with_unaligned_domain_is_still_valid() {
        let resolver = Arc::new(
            StaticResolver::new().with_txt("mail._domainkey.mailer.net", &[KEY_RECORD]),
        );
        let evidence = auth_evidence("pass", "mail", "mailer.net", None);
        let outcome = DkimValidator::new(resolver)
            .validate("a@example.com", "example.com", Some(&evidence))
            .await
            .unwrap();

        // Alignment enforcement is DMARC's concern; record it, don't grade it.
        assert_eq!(outcome.status, CheckStatus::Valid);
        assert_eq!(outcome.details["domain_aligned"], false);
        assert!(outcome.details["alignment_note"]
            .as_str()
            .unwrap()
            .contains("DMARC"));
    }

    #[tokio::test]
    async fn test_subdomain_signing_domain_aligns() {
        let resolver = Arc::new(
            StaticResolver::new().with_txt("mail._domainkey.news.example.com", &[KEY_RECORD]),
        );
        let evidence = auth_evidence("pass", "mail", "news.example.com", None);
        let outcome = DkimValidator::new(resolver)
            .validate("a@example.com", "example.com", Some(&evidence))
            .await
            .unwrap();

        assert_eq!(outcome.details["domain_aligned"], true);
    }

    #[tokio::test]
    async fn test_pass_with_missing_key_warns() {
        let resolver = Arc::new(StaticResolver::new());
        let evidence = auth_evidence("pass", "mail", "example.com", Some(KEY_RECORD));
        let outcome = DkimValidator::new(resolver)
            .validate("a@example.com", "example.com", Some(&evidence))
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Warning);
        assert!(outcome.message.contains("no longer exists"));
    }

    #[tokio::test]
    async fn test_pass_with_changed_key_warns() {
        let resolver = Arc::new(
            StaticResolver::new().with_txt("mail._domainkey.example.com", &[KEY_RECORD]),
        );
        let evidence = auth_evidence("pass", "mail", "example.com", Some("v=DKIM1; p=OLDKEY"));
        let outcome = DkimValidator::new(resolver)
            .validate("a@example.com", "example.com", Some(&evidence))
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Warning);
        assert!(outcome.message.contains("has changed"));
        assert_eq!(outcome.details["dns_changed"], true);
    }

    #[tokio::test]
    async fn test_fail_is_invalid() {
        let resolver = Arc::new(
            StaticResolver::new().with_txt("mail._domainkey.example.com", &[KEY_RECORD]),
        );
        let evidence = auth_evidence("fail", "mail", "example.com", None);
        let outcome = DkimValidator::new(resolver)
            .validate("a@example.com", "example.com", Some(&evidence))
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Invalid);
        assert!(!outcome.errors().is_empty());
    }

    #[tokio::test]
    async fn test_neutral_warns_with_value() {
        let resolver = Arc::new(
            StaticResolver::new().with_txt("mail._domainkey.example.com", &[KEY_RECORD]),
        );
        let evidence = auth_evidence("neutral", "mail", "example.com", None);
        let outcome = DkimValidator::new(resolver)
            .validate("a@example.com", "example.com", Some(&evidence))
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Warning);
        assert!(outcome.message.contains("\"neutral\""));
    }

    #[tokio::test]
    async fn test_signature_fallback_with_key_warns_unverified() {
        let resolver = Arc::new(
            StaticResolver::new().with_txt("mail._domainkey.example.com", &[KEY_RECORD]),
        );
        let evidence = signature_evidence("mail", "example.com");
        let outcome = DkimValidator::new(resolver)
            .validate("a@example.com", "example.com", Some(&evidence))
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Warning);
        assert!(outcome.message.contains("cannot be proven"));
        assert_eq!(outcome.details["verified"], false);
    }

    #[tokio::test]
    async fn test_signature_fallback_without_key_is_invalid() {
        let resolver = Arc::new(StaticResolver::new());
        let evidence = signature_evidence("mail", "example.com");
        let outcome = DkimValidator::new(resolver)
            .validate("a@example.com", "example.com", Some(&evidence))
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Invalid);
        assert!(outcome.errors()[0].contains("no public key exists"));
    }

    #[tokio::test]
    async fn test_signature_fallback_revoked_key_is_invalid() {
        let resolver = Arc::new(
            StaticResolver::new()
                .with_txt("mail._domainkey.example.com", &["v=DKIM1; k=rsa; p="]),
        );
        let evidence = signature_evidence("mail", "example.com");
        let outcome = DkimValidator::new(resolver)
            .validate("a@example.com", "example.com", Some(&evidence))
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Invalid);
        assert!(outcome.message.contains("revoked"));
    }

    #[tokio::test]
    async fn test_no_result_and_no_signature_warns() {
        let resolver = Arc::new(StaticResolver::new());
        let mut evidence = signature_evidence("mail", "example.com");
        evidence.dkim_signature = None;

        let outcome = DkimValidator::new(resolver)
            .validate("a@example.com", "example.com", Some(&evidence))
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Warning);
        assert!(outcome.message.contains("no DKIM result"));
    }

    #[test]
    fn test_domains_aligned() {
        assert!(domains_aligned("example.com", "example.com"));
        assert!(domains_aligned("example.com", "mail.example.com"));
        assert!(domains_aligned("mail.example.com", "example.com"));
        assert!(!domains_aligned("example.com", "examples.com"));
        assert!(!domains_aligned("example.com", "notexample.com"));
    }
}
