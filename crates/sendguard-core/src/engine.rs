//! Validation orchestration
//!
//! [`ValidationEngine`] runs the registered checks in priority order over
//! one address and folds their outcomes into a single report.
//! [`ValidationService`] is the persistence-aware layer around it: it loads
//! records and evidence from the store, injects the previous report for
//! drift comparison, and writes the result back.

use crate::evidence::extractor::EvidenceExtractor;
use crate::evidence::EvidenceDocument;
use crate::validators::Validator;
use chrono::Utc;
use sendguard_common::{
    CheckOutcome, CheckStatus, Error, FailedAddress, Result, ValidationReport, ValidationStats,
};
use sendguard_storage::{FileStorage, SenderAddress, SenderAddressRepository};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Runs the validator pipeline for one address at a time
pub struct ValidationEngine {
    validators: Vec<Arc<dyn Validator>>,
}

impl ValidationEngine {
    /// Build an engine over a validator list; the list is sorted by
    /// priority so registration order only breaks ties
    pub fn new(mut validators: Vec<Arc<dyn Validator>>) -> Self {
        validators.sort_by_key(|v| v.priority());
        Self { validators }
    }

    /// Validate one address, with optional evidence.
    ///
    /// The only error is the input error: an address without `@` cannot be
    /// validated at all. Everything else, including a check blowing up
    /// internally, is captured into the report.
    pub async fn validate_email(
        &self,
        email: &str,
        evidence: Option<&EvidenceDocument>,
    ) -> Result<ValidationReport> {
        // Domain is everything after the last @.
        let Some((_, domain)) = email.rsplit_once('@') else {
            return Err(Error::Validation(format!(
                "email address \"{}\" contains no @ and cannot be validated",
                email
            )));
        };

        let mut outcomes = BTreeMap::new();
        let mut status = CheckStatus::Skipped;
        let mut errors = Vec::new();

        for validator in &self.validators {
            let name = validator.name();
            debug!(check = name, email = email, "Running check");

            let outcome = match validator.validate(email, domain, evidence).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // One broken check must not abort the run.
                    warn!(check = name, "Check failed unexpectedly: {}", e);
                    let error = format!("{} check failed internally: {}", name, e);
                    CheckOutcome::invalid(&error).with_errors(vec![error])
                }
            };

            status = status.combine(outcome.status);
            if outcome.status == CheckStatus::Invalid {
                errors.extend(outcome.errors());
            }

            outcomes.insert(name.to_string(), outcome);
        }

        Ok(ValidationReport {
            status,
            email: email.to_string(),
            domain: domain.to_string(),
            timestamp: Utc::now().timestamp(),
            validators: outcomes,
            errors,
        })
    }
}

/// Summary of a batch run, handed to the notification boundary
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub statistics: ValidationStats,
    pub failed_addresses: Vec<FailedAddress>,
}

/// Persistence-aware validation
pub struct ValidationService {
    engine: ValidationEngine,
    repository: Arc<dyn SenderAddressRepository>,
    evidence_store: Arc<dyn FileStorage>,
}

impl ValidationService {
    pub fn new(
        engine: ValidationEngine,
        repository: Arc<dyn SenderAddressRepository>,
        evidence_store: Arc<dyn FileStorage>,
    ) -> Self {
        Self {
            engine,
            repository,
            evidence_store,
        }
    }

    pub fn engine(&self) -> &ValidationEngine {
        &self.engine
    }

    /// Validate a stored record, persist the report, and return it.
    ///
    /// A missing or corrupt test email degrades gracefully to DNS-only
    /// checks; it never blocks validation.
    pub async fn validate_sender_address(&self, id: Uuid) -> Result<ValidationReport> {
        let record = self
            .repository
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("sender address {}", id)))?;

        let evidence = self.load_evidence(&record).await;

        let report = self
            .engine
            .validate_email(&record.email, evidence.as_ref())
            .await?;

        self.repository
            .update_report(
                id,
                report.status.as_str(),
                Utc::now(),
                serde_json::to_value(&report)
                    .map_err(|e| Error::Internal(format!("could not serialize report: {}", e)))?,
            )
            .await?;

        info!(
            email = %record.email,
            status = %report.status,
            "Validation run persisted"
        );

        Ok(report)
    }

    /// Validate every non-deleted record and summarize the outcome
    pub async fn validate_all(&self) -> Result<RunSummary> {
        let records = self.repository.list_active().await?;
        let mut summary = RunSummary::default();

        for record in records {
            summary.statistics.total += 1;

            match self.validate_sender_address(record.id).await {
                Ok(report) => {
                    match report.status {
                        CheckStatus::Valid => summary.statistics.valid += 1,
                        CheckStatus::Warning => summary.statistics.warning += 1,
                        CheckStatus::Invalid => summary.statistics.invalid += 1,
                        CheckStatus::Skipped => summary.statistics.pending += 1,
                    }

                    if matches!(report.status, CheckStatus::Invalid | CheckStatus::Warning) {
                        summary.failed_addresses.push(FailedAddress {
                            email: report.email.clone(),
                            status: report.status,
                            errors: report.errors.clone(),
                        });
                    }
                }
                Err(e) => {
                    // A record that cannot be validated at all stays pending.
                    warn!(email = %record.email, "Could not validate record: {}", e);
                    summary.statistics.pending += 1;
                }
            }
        }

        info!(
            total = summary.statistics.total,
            valid = summary.statistics.valid,
            warning = summary.statistics.warning,
            invalid = summary.statistics.invalid,
            "Batch validation finished"
        );

        Ok(summary)
    }

    /// Load and parse the record's test email, injecting the previous
    /// report's per-check details for drift comparison
    async fn load_evidence(&self, record: &SenderAddress) -> Option<EvidenceDocument> {
        let path = record.evidence_path.as_deref()?;

        let raw = match self.evidence_store.read(path).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = path, "Could not read test email, using DNS-only checks: {}", e);
                return None;
            }
        };

        let mut evidence = match EvidenceExtractor::extract(&raw) {
            Ok(evidence) => evidence,
            Err(e) => {
                warn!(path = path, "Could not parse test email, using DNS-only checks: {}", e);
                return None;
            }
        };

        evidence.previous_validation = previous_validation(record.report.as_ref());
        Some(evidence)
    }
}

/// Per-check details map of the prior report, keyed by check name
fn previous_validation(
    report: Option<&serde_json::Value>,
) -> Option<BTreeMap<String, serde_json::Value>> {
    let validators = report?.get("validators")?.as_object()?;

    Some(
        validators
            .iter()
            .filter_map(|(name, outcome)| {
                outcome
                    .get("details")
                    .cloned()
                    .map(|details| (name.clone(), details))
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ProbeCache;
    use crate::dns::StaticResolver;
    use crate::validators::registry;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use sendguard_common::config::{OutboundConfig, ProbeConfig};
    use sendguard_storage::models::CreateSenderAddress;
    use sendguard_storage::{LocalStorage, MemSenderAddressRepository};
    use std::time::Duration;

    fn engine_with(resolver: Arc<StaticResolver>) -> ValidationEngine {
        let cache = Arc::new(ProbeCache::new(Duration::from_secs(60)));
        ValidationEngine::new(registry(
            resolver,
            OutboundConfig::default(),
            ProbeConfig::default(),
            cache,
        ))
    }

    /// A check that always blows up, for the error-capture path
    struct BrokenValidator;

    #[async_trait]
    impl Validator for BrokenValidator {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn priority(&self) -> u8 {
            1
        }

        async fn validate(
            &self,
            _email: &str,
            _domain: &str,
            _evidence: Option<&EvidenceDocument>,
        ) -> anyhow::Result<CheckOutcome> {
            Err(anyhow::anyhow!("boom"))
        }
    }

    /// A check with a fixed outcome, for aggregation tests
    struct FixedValidator(&'static str, u8, CheckStatus);

    #[async_trait]
    impl Validator for FixedValidator {
        fn name(&self) -> &'static str {
            self.0
        }

        fn priority(&self) -> u8 {
            self.1
        }

        async fn validate(
            &self,
            _email: &str,
            _domain: &str,
            _evidence: Option<&EvidenceDocument>,
        ) -> anyhow::Result<CheckOutcome> {
            Ok(CheckOutcome::new(self.2, "fixed"))
        }
    }

    #[tokio::test]
    async fn test_missing_at_fails_before_any_dns_call() {
        let resolver = Arc::new(StaticResolver::new());
        let engine = engine_with(resolver.clone());

        let result = engine.validate_email("not-an-address", None).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(resolver.query_count(), 0);
    }

    #[tokio::test]
    async fn test_aggregate_precedence() {
        use CheckStatus::*;

        let cases: [(&[CheckStatus], CheckStatus); 5] = [
            (&[Valid, Valid], Valid),
            (&[Valid, Warning], Warning),
            (&[Warning, Invalid, Valid], Invalid),
            (&[Skipped, Skipped], Skipped),
            (&[Skipped, Valid], Valid),
        ];

        for (statuses, expected) in cases {
            let validators: Vec<Arc<dyn Validator>> = statuses
                .iter()
                .enumerate()
                .map(|(i, status)| {
                    let name: &'static str =
                        Box::leak(format!("fixed{}", i).into_boxed_str());
                    Arc::new(FixedValidator(name, i as u8, *status)) as Arc<dyn Validator>
                })
                .collect();

            let engine = ValidationEngine::new(validators);
            let report = engine.validate_email("a@example.com", None).await.unwrap();
            assert_eq!(report.status, expected, "statuses {:?}", statuses);
        }
    }

    #[tokio::test]
    async fn test_broken_validator_is_captured_as_invalid() {
        let validators: Vec<Arc<dyn Validator>> = vec![
            Arc::new(BrokenValidator),
            Arc::new(FixedValidator("fine", 2, CheckStatus::Valid)),
        ];
        let engine = ValidationEngine::new(validators);

        let report = engine.validate_email("a@example.com", None).await.unwrap();
        assert_eq!(report.status, CheckStatus::Invalid);
        assert_eq!(report.validators["broken"].status, CheckStatus::Invalid);
        // The sibling check still ran.
        assert_eq!(report.validators["fine"].status, CheckStatus::Valid);
        assert!(report.errors.iter().any(|e| e.contains("boom")));
    }

    #[tokio::test]
    async fn test_idempotent_under_fixed_dns() {
        // The probe target is a closed local port, so the existence check
        // lands on its connection-failure warning path both times.
        let resolver = Arc::new(
            StaticResolver::new()
                .with_mx("example.com", &[("127.0.0.1", 10)])
                .with_txt("_dmarc.example.com", &["v=DMARC1; p=reject; rua=mailto:x@y.com"])
                .with_txt("example.com", &["v=spf1 -all"]),
        );

        let first = engine_with(resolver.clone())
            .validate_email("a@example.com", None)
            .await
            .unwrap();
        let second = engine_with(resolver)
            .validate_email("a@example.com", None)
            .await
            .unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.validators, second.validators);
        assert_eq!(first.errors, second.errors);
    }

    #[tokio::test]
    async fn test_report_keys_match_check_names() {
        let resolver = Arc::new(StaticResolver::new());
        let engine = engine_with(resolver);

        let report = engine.validate_email("a@example.com", None).await.unwrap();
        let keys: Vec<&str> = report.validators.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec!["dkim", "dmarc", "email_existence", "mx", "spf", "syntax"]
        );
    }

    #[tokio::test]
    async fn test_service_persists_report_and_degrades_without_evidence() {
        let resolver = Arc::new(
            StaticResolver::new()
                .with_mx("example.com", &[("127.0.0.1", 10)])
                .with_txt("_dmarc.example.com", &["v=DMARC1; p=reject; rua=mailto:x@y.com"]),
        );
        let engine = engine_with(resolver);

        let repo = Arc::new(MemSenderAddressRepository::new());
        let dir = std::env::temp_dir().join(format!("sendguard-svc-{}", std::process::id()));
        let store = Arc::new(LocalStorage::from_path(&dir).unwrap());

        let record = repo
            .create(CreateSenderAddress {
                email: "a@example.com".to_string(),
                name: String::new(),
            })
            .await
            .unwrap();

        // Point at a test email that does not exist; validation must still run.
        repo.set_evidence_path(record.id, Some("missing.eml".to_string()))
            .await
            .unwrap();

        let service = ValidationService::new(engine, repo.clone(), store);
        let report = service.validate_sender_address(record.id).await.unwrap();

        let stored = repo.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, report.status.as_str());
        assert!(stored.last_check.is_some());

        let stored_report: ValidationReport =
            serde_json::from_value(stored.report.unwrap()).unwrap();
        assert_eq!(stored_report.validators, report.validators);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_previous_validation_extraction() {
        let report = serde_json::json!({
            "status": "valid",
            "validators": {
                "spf": {"status": "valid", "message": "ok", "details": {"dns_record": "v=spf1 -all"}},
                "mx": {"status": "valid", "message": "ok", "details": {}}
            }
        });

        let previous = previous_validation(Some(&report)).unwrap();
        assert_eq!(previous["spf"]["dns_record"], "v=spf1 -all");
        assert!(previous.contains_key("mx"));
    }
}
