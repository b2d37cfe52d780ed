//! Validator contract and registry
//!
//! Each check implements [`Validator`] and is registered once at startup.
//! The registry is an explicit, fixed list sorted by ascending priority:
//! cheap local checks first, then domain capability, then policy checks
//! that need DNS, and the live network probe last.

pub mod dkim;
pub mod dmarc;
pub mod existence;
pub mod mx;
pub mod spf;
pub mod syntax;

use crate::cache::ProbeCache;
use crate::dns::DnsResolver;
use crate::evidence::EvidenceDocument;
use async_trait::async_trait;
use sendguard_common::config::{OutboundConfig, ProbeConfig};
use sendguard_common::CheckOutcome;
use std::sync::Arc;

/// Stable check names, used as report map keys.
///
/// These are persisted in stored reports and must never change without a
/// migration plan for existing records.
pub const SYNTAX: &str = "syntax";
pub const MX: &str = "mx";
pub const DMARC: &str = "dmarc";
pub const SPF: &str = "spf";
pub const DKIM: &str = "dkim";
pub const EMAIL_EXISTENCE: &str = "email_existence";

/// Contract implemented by every check.
///
/// Expected failure modes (bad DNS, missing records) become outcomes, never
/// errors; an `Err` signals a truly unexpected internal failure, which the
/// orchestrator converts into an invalid outcome tagged with the check name.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Stable name, used as the report map key
    fn name(&self) -> &'static str;

    /// Ascending run order; ties broken by registration order
    fn priority(&self) -> u8;

    async fn validate(
        &self,
        email: &str,
        domain: &str,
        evidence: Option<&EvidenceDocument>,
    ) -> anyhow::Result<CheckOutcome>;
}

/// Build the full validator registry, sorted by priority.
///
/// The set is fixed at process start; extensibility is a matter of adding
/// to this list.
pub fn registry(
    resolver: Arc<dyn DnsResolver>,
    outbound: OutboundConfig,
    probe: ProbeConfig,
    cache: Arc<ProbeCache>,
) -> Vec<Arc<dyn Validator>> {
    let mut validators: Vec<Arc<dyn Validator>> = vec![
        Arc::new(syntax::SyntaxValidator::new()),
        Arc::new(mx::MxValidator::new(resolver.clone())),
        Arc::new(dmarc::DmarcValidator::new(resolver.clone())),
        Arc::new(spf::SpfValidator::new(resolver.clone(), outbound)),
        Arc::new(dkim::DkimValidator::new(resolver.clone())),
        Arc::new(existence::ExistenceValidator::new(resolver, probe, cache)),
    ];

    validators.sort_by_key(|v| v.priority());
    validators
}

/// A DNS record value stored by a named check in the prior report, used for
/// drift comparison
pub(crate) fn previous_record(
    evidence: &EvidenceDocument,
    check: &str,
    key: &str,
) -> Option<String> {
    evidence.previous_detail(check, key)
}

/// Whether the record captured with the prior report differs from the one
/// fetched now.
///
/// Only a non-null prior value can signal drift; the first evidence-backed
/// run has nothing to compare against.
pub(crate) fn dns_changed(previous: Option<&str>, current: Option<&str>) -> bool {
    match previous {
        Some(prev) => current != Some(prev),
        None => false,
    }
}
