//! Evidence extraction from raw message bytes

use super::{
    parse_authentication_results, parse_dkim_signature, EvidenceDocument, SenderIdentity,
};
use mail_parser::MessageParser;
use sendguard_common::{Error, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Extracts a structured evidence document from an uploaded test email
pub struct EvidenceExtractor;

impl EvidenceExtractor {
    /// Parse raw message bytes into an evidence document.
    ///
    /// The document is content-addressed: `file_hash` is the SHA-256 hex of
    /// the exact bytes, used as a cache key and to recognize unchanged
    /// evidence across runs.
    pub fn extract(raw: &[u8]) -> Result<EvidenceDocument> {
        let message = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| Error::Evidence("Could not parse message".to_string()))?;

        let from = match message.from().and_then(|a| a.first()) {
            Some(addr) => SenderIdentity {
                email: addr.address().unwrap_or_default().to_lowercase(),
                name: addr.name().unwrap_or_default().to_string(),
            },
            None => SenderIdentity::default(),
        };

        let mut auth_headers = Vec::new();
        let mut dkim_header = None;
        let mut received_chain = Vec::new();

        for (name, value) in message.headers_raw() {
            let value = unfold(value);
            if name.eq_ignore_ascii_case("Authentication-Results") {
                auth_headers.push(value);
            } else if name.eq_ignore_ascii_case("DKIM-Signature") {
                if dkim_header.is_none() {
                    dkim_header = Some(value);
                }
            } else if name.eq_ignore_ascii_case("Received") {
                received_chain.push(value);
            }
        }

        let authentication_results = parse_authentication_results(&auth_headers);
        let dkim_signature = dkim_header.as_deref().map(parse_dkim_signature);

        let file_hash = hex::encode(Sha256::digest(raw));
        debug!(
            hash = %file_hash,
            from = %from.email,
            auth_headers = auth_headers.len(),
            "Extracted evidence document"
        );

        Ok(EvidenceDocument {
            file_hash,
            from,
            authentication_results,
            dkim_signature,
            received_chain,
            previous_validation: None,
        })
    }
}

/// Collapse folded header continuation lines into one line
fn unfold(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}
