//! Sendguard Core - sender address validation engine
//!
//! This crate provides the validation pipeline: a DNS lookup adapter, the
//! evidence extractor for uploaded test emails, the priority-ordered
//! validator registry (syntax, MX, DMARC, SPF, DKIM, SMTP existence probe),
//! the orchestrating engine with drift detection, and the batch/re-check
//! machinery around it.

pub mod cache;
pub mod dns;
pub mod engine;
pub mod evidence;
pub mod notify;
pub mod recheck;
pub mod spf;
pub mod validators;

pub use cache::ProbeCache;
pub use dns::{DnsError, DnsResolver, MxHost, SystemResolver};
pub use engine::{RunSummary, ValidationEngine, ValidationService};
pub use evidence::{AuthMethodResult, AuthenticationResults, DkimSignature, EvidenceDocument};
pub use evidence::extractor::EvidenceExtractor;
pub use notify::Notifier;
pub use recheck::RecheckWorker;
pub use validators::{registry, Validator};
