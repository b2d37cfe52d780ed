//! Evidence documents
//!
//! An evidence document is the structured data extracted from a real,
//! previously delivered test email. It lets the validators check
//! authentication outcomes (SPF/DKIM/DMARC results recorded by the
//! receiving server) that DNS alone cannot prove, and anchors drift
//! detection: the DNS records stored with the prior report are compared
//! against the records fetched now.

pub mod extractor;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sender identity taken from the message's From header
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SenderIdentity {
    pub email: String,
    pub name: String,
}

/// One method's entry in an Authentication-Results header,
/// e.g. `dkim=pass header.d=example.com header.s=mail`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthMethodResult {
    /// Result keyword, lowercased: pass, fail, softfail, neutral, none, ...
    pub result: String,
    /// Detail key-value pairs following the result
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl AuthMethodResult {
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}

/// Parsed Authentication-Results header(s) of the test email
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationResults {
    /// Raw header value(s), newline-joined when several are present
    pub raw: String,
    pub spf: Option<AuthMethodResult>,
    pub dkim: Option<AuthMethodResult>,
    pub dmarc: Option<AuthMethodResult>,
}

/// Fallback-parsed DKIM-Signature header fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DkimSignature {
    pub version: String,
    pub algorithm: String,
    /// Signing domain (d= tag)
    pub domain: String,
    /// Selector (s= tag)
    pub selector: String,
    /// Signed header list (h= tag)
    pub headers_signed: String,
    /// Body hash (bh= tag)
    pub body_hash: String,
    /// Signature data (b= tag)
    pub signature: String,
}

/// Structured evidence extracted from an uploaded test email
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceDocument {
    /// SHA-256 hex of the exact uploaded bytes
    pub file_hash: String,
    pub from: SenderIdentity,
    pub authentication_results: AuthenticationResults,
    pub dkim_signature: Option<DkimSignature>,
    pub received_chain: Vec<String>,
    /// Per-check details map from the prior report, injected by the
    /// orchestrator for drift comparison. Never parsed from the message.
    #[serde(default)]
    pub previous_validation: Option<BTreeMap<String, serde_json::Value>>,
}

impl EvidenceDocument {
    /// A detail value recorded by a named check in the prior report
    pub fn previous_detail(&self, check: &str, key: &str) -> Option<String> {
        self.previous_validation
            .as_ref()?
            .get(check)?
            .get(key)?
            .as_str()
            .map(str::to_string)
    }
}

/// Parse Authentication-Results header values into per-method results.
///
/// Keeps the first entry per method; receivers commonly emit one header with
/// one entry each for spf, dkim and dmarc.
pub fn parse_authentication_results(raw_headers: &[String]) -> AuthenticationResults {
    let mut results = AuthenticationResults {
        raw: raw_headers.join("\n"),
        ..Default::default()
    };

    for raw in raw_headers {
        let value = strip_comments(raw);
        let mut segments = value.split(';');

        // The first segment is the authserv-id; method entries follow.
        segments.next();

        for segment in segments {
            let mut tokens = segment.split_whitespace();

            let Some(first) = tokens.next() else {
                continue;
            };
            let Some((method, result)) = first.split_once('=') else {
                continue;
            };

            let mut entry = AuthMethodResult {
                result: result.to_lowercase(),
                properties: BTreeMap::new(),
            };
            for token in tokens {
                if let Some((key, value)) = token.split_once('=') {
                    entry
                        .properties
                        .insert(key.to_lowercase(), value.to_string());
                }
            }

            let slot = match method.to_lowercase().as_str() {
                "spf" => &mut results.spf,
                "dkim" => &mut results.dkim,
                "dmarc" => &mut results.dmarc,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(entry);
            }
        }
    }

    results
}

/// Parse a raw DKIM-Signature header value into its tag fields
pub fn parse_dkim_signature(raw: &str) -> DkimSignature {
    let mut signature = DkimSignature::default();

    for part in raw.split(';') {
        let Some((tag, value)) = part.split_once('=') else {
            continue;
        };
        // The b= value itself contains base64 and may hold '=' padding, so
        // only the first '=' splits tag from value.
        let value: String = value.split_whitespace().collect();

        match tag.trim().to_lowercase().as_str() {
            "v" => signature.version = value,
            "a" => signature.algorithm = value,
            "d" => signature.domain = value.to_lowercase(),
            "s" => signature.selector = value,
            "h" => signature.headers_signed = value.to_lowercase(),
            "bh" => signature.body_hash = value,
            "b" => signature.signature = value,
            _ => {}
        }
    }

    signature
}

/// Remove RFC 5322 comments (parenthesized spans) from a header value
fn strip_comments(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut depth = 0usize;

    for ch in value.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }

    out
}
