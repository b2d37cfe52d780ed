//! Email address syntax check (priority 5)

use super::Validator;
use crate::evidence::EvidenceDocument;
use async_trait::async_trait;
use regex::Regex;
use sendguard_common::CheckOutcome;

/// Conservative RFC 5322-ish address grammar (the WHATWG email pattern)
const ADDRESS_PATTERN: &str = r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$";

/// Validates the raw address string; no DNS, no evidence
pub struct SyntaxValidator {
    grammar: Regex,
}

impl SyntaxValidator {
    pub fn new() -> Self {
        Self {
            grammar: Regex::new(ADDRESS_PATTERN).expect("address grammar must compile"),
        }
    }
}

impl Default for SyntaxValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Validator for SyntaxValidator {
    fn name(&self) -> &'static str {
        super::SYNTAX
    }

    fn priority(&self) -> u8 {
        5
    }

    async fn validate(
        &self,
        email: &str,
        _domain: &str,
        _evidence: Option<&EvidenceDocument>,
    ) -> anyhow::Result<CheckOutcome> {
        let mut errors = Vec::new();

        let at_count = email.matches('@').count();
        if at_count != 1 {
            errors.push(format!(
                "address must contain exactly one @ (found {})",
                at_count
            ));
        }

        // Local part and domain split at the last @, matching how the
        // orchestrator derives the domain.
        let (local_part, domain_part) = match email.rsplit_once('@') {
            Some((local, domain)) => (local, domain),
            None => (email, ""),
        };

        if local_part.is_empty() {
            errors.push("local part is empty".to_string());
        } else if local_part.len() > 64 {
            errors.push(format!(
                "local part is {} bytes, maximum is 64",
                local_part.len()
            ));
        }

        if domain_part.is_empty() {
            errors.push("domain part is empty".to_string());
        } else if domain_part.len() > 255 {
            errors.push(format!(
                "domain part is {} bytes, maximum is 255",
                domain_part.len()
            ));
        } else if !valid_domain_labels(domain_part) {
            errors.push(format!("domain \"{}\" is not a valid hostname", domain_part));
        }

        if errors.is_empty() && !self.grammar.is_match(email) {
            errors.push("address does not match the email grammar".to_string());
        }

        let outcome = if errors.is_empty() {
            CheckOutcome::valid("email address syntax is valid")
        } else {
            CheckOutcome::invalid(format!("syntax check failed: {}", errors.join("; ")))
                .with_errors(errors)
        };

        Ok(outcome
            .with_detail("local_part", local_part)
            .with_detail("domain", domain_part)
            .with_detail("email_length", email.len()))
    }
}

/// Conservative label grammar: alphanumeric/hyphen labels, dot-separated,
/// no leading or trailing hyphen per label
fn valid_domain_labels(domain: &str) -> bool {
    domain.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}
