//! SMTP existence probe (priority 20)

use super::Validator;
use crate::cache::ProbeCache;
use crate::dns::DnsResolver;
use crate::evidence::EvidenceDocument;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sendguard_common::config::ProbeConfig;
use sendguard_common::CheckOutcome;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Probes the domain's preferred MX host over SMTP to see whether it
/// accepts the address.
///
/// The only check with a live outbound dialogue, so it runs last. An
/// inability to probe (resolve/connect/timeout) is never conflated with an
/// active rejection: it grades warning, not invalid. Definitive results
/// are cached per address to avoid hammering remote servers.
pub struct ExistenceValidator {
    resolver: Arc<dyn DnsResolver>,
    config: ProbeConfig,
    cache: Arc<ProbeCache>,
}

impl ExistenceValidator {
    pub fn new(
        resolver: Arc<dyn DnsResolver>,
        config: ProbeConfig,
        cache: Arc<ProbeCache>,
    ) -> Self {
        Self {
            resolver,
            config,
            cache,
        }
    }

    fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Run the SMTP dialogue against one host. `Err` means the probe itself
    /// failed (connect/timeout/protocol); the caller grades that a warning.
    async fn probe(&self, host: &str, email: &str) -> Result<CheckOutcome> {
        let stream = timeout(self.step_timeout(), TcpStream::connect((host, self.config.port)))
            .await
            .map_err(|_| anyhow!("connection to {} timed out", host))?
            .map_err(|e| anyhow!("could not connect to {}: {}", host, e))?;

        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        let result = self.dialogue(&mut reader, &mut writer, email).await;

        // QUIT and close on every exit path, including failures.
        let _ = timeout(Duration::from_secs(2), send_line(&mut writer, "QUIT")).await;
        let _ = writer.shutdown().await;

        result
    }

    async fn dialogue<R, W>(&self, reader: &mut R, writer: &mut W, email: &str) -> Result<CheckOutcome>
    where
        R: AsyncBufReadExt + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let step = self.step_timeout();

        let (code, line) = read_reply(reader, step).await?;
        if code != 220 {
            return Ok(CheckOutcome::warning(format!(
                "mail server rejected the connection: {}",
                line
            )));
        }

        self.send(writer, &format!("EHLO {}", self.config.helo_hostname))
            .await?;
        let (code, _) = read_reply(reader, step).await?;
        if code != 250 {
            // Older servers may only speak HELO.
            self.send(writer, &format!("HELO {}", self.config.helo_hostname))
                .await?;
            let (code, line) = read_reply(reader, step).await?;
            if code != 250 {
                return Ok(CheckOutcome::warning(format!(
                    "mail server rejected HELO: {}",
                    line
                )));
            }
        }

        self.send(writer, &format!("MAIL FROM:<{}>", self.config.mail_from))
            .await?;
        let (code, line) = read_reply(reader, step).await?;
        if code != 250 {
            // Says nothing about the target address, only about our probe.
            return Ok(CheckOutcome::warning(format!(
                "mail server rejected the probe sender: {}",
                line
            )));
        }

        self.send(writer, &format!("RCPT TO:<{}>", email)).await?;
        let (code, line) = read_reply(reader, step).await?;

        let outcome = match code {
            250 | 251 => CheckOutcome::valid("recipient accepted by the mail server"),
            550 | 551 | 553 => {
                let error = format!("recipient rejected by the mail server: {}", line);
                CheckOutcome::invalid(&error).with_errors(vec![error])
            }
            _ => CheckOutcome::warning(format!(
                "mail server reply was inconclusive: {}",
                line
            )),
        };

        Ok(outcome.with_detail("smtp_code", code))
    }

    async fn send<W: AsyncWrite + Unpin + Send>(&self, writer: &mut W, line: &str) -> Result<()> {
        timeout(self.step_timeout(), send_line(writer, line))
            .await
            .map_err(|_| anyhow!("timed out sending to server"))?
            .map_err(|e| anyhow!("could not send to server: {}", e))
    }
}

#[async_trait]
impl Validator for ExistenceValidator {
    fn name(&self) -> &'static str {
        super::EMAIL_EXISTENCE
    }

    fn priority(&self) -> u8 {
        20
    }

    async fn validate(
        &self,
        email: &str,
        domain: &str,
        _evidence: Option<&EvidenceDocument>,
    ) -> anyhow::Result<CheckOutcome> {
        let cache_key = hex::encode(Sha256::digest(email.as_bytes()));

        if let Some(cached) = self.cache.get(&cache_key).await {
            debug!("Existence probe cache hit for {}", email);
            return Ok(cached.with_detail("cached", true));
        }

        let hosts = match self.resolver.mx(domain).await {
            Ok(hosts) => hosts,
            Err(e) => {
                return Ok(CheckOutcome::warning(format!(
                    "could not resolve MX records to probe: {}",
                    e
                )));
            }
        };

        // Lowest preference value is the primary receiver.
        let Some(target) = hosts.first() else {
            return Ok(CheckOutcome::warning(
                "domain has no MX records to probe",
            ));
        };

        let outcome = match self.probe(&target.host, email).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Existence probe for {} failed: {}", email, e);
                CheckOutcome::warning(format!("probe failed: {}", e))
            }
        };

        let outcome = outcome
            .with_detail("probed_host", target.host.as_str())
            .with_detail("port", self.config.port);

        // Only definitive answers are worth remembering; a transient
        // failure should not poison a day of re-validations.
        if matches!(
            outcome.status,
            sendguard_common::CheckStatus::Valid | sendguard_common::CheckStatus::Invalid
        ) {
            self.cache.set(cache_key, outcome.clone()).await;
        }

        Ok(outcome)
    }
}

/// Read one (possibly multi-line) SMTP reply and return its code and final
/// line
async fn read_reply<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
    step: Duration,
) -> Result<(u16, String)> {
    loop {
        let mut line = String::new();
        let n = timeout(step, reader.read_line(&mut line))
            .await
            .map_err(|_| anyhow!("timed out waiting for server reply"))?
            .map_err(|e| anyhow!("could not read server reply: {}", e))?;

        if n == 0 {
            return Err(anyhow!("connection closed by server"));
        }

        let trimmed = line.trim_end().to_string();

        // "250-..." marks a continuation line; "250 ..." ends the reply.
        if trimmed.len() >= 4 && trimmed.as_bytes()[3] == b'-' {
            continue;
        }

        let code: u16 = trimmed
            .get(..3)
            .and_then(|c| c.parse().ok())
            .ok_or_else(|| anyhow!("malformed server reply: {}", trimmed))?;

        return Ok((code, trimmed));
    }
}

async fn send_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\r\n").await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::StaticResolver;
    use sendguard_common::CheckStatus;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    /// One-shot SMTP server with a scripted RCPT reply
    async fn scripted_server(rcpt_reply: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.split();
            let mut lines = BufReader::new(read_half).lines();

            write_half.write_all(b"220 test ESMTP\r\n").await.unwrap();

            while let Ok(Some(line)) = lines.next_line().await {
                let verb = line.to_uppercase();
                let reply: &[u8] = if verb.starts_with("EHLO") {
                    b"250-test greets you\r\n250 OK\r\n"
                } else if verb.starts_with("HELO") || verb.starts_with("MAIL") {
                    b"250 OK\r\n"
                } else if verb.starts_with("RCPT") {
                    rcpt_reply.as_bytes()
                } else if verb.starts_with("QUIT") {
                    write_half.write_all(b"221 bye\r\n").await.unwrap();
                    break;
                } else {
                    b"500 what\r\n"
                };
                write_half.write_all(reply).await.unwrap();
            }
        });

        addr
    }

    fn validator_for(addr: SocketAddr, cache: Arc<ProbeCache>) -> ExistenceValidator {
        let resolver = Arc::new(
            StaticResolver::new().with_mx("example.com", &[("127.0.0.1", 10)]),
        );
        let config = ProbeConfig {
            port: addr.port(),
            timeout_secs: 5,
            ..ProbeConfig::default()
        };
        ExistenceValidator::new(resolver, config, cache)
    }

    #[tokio::test]
    async fn test_accepted_recipient_is_valid() {
        let addr = scripted_server("250 2.1.5 OK\r\n").await;
        let cache = Arc::new(ProbeCache::new(Duration::from_secs(60)));
        let validator = validator_for(addr, cache);

        let outcome = validator
            .validate("user@example.com", "example.com", None)
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Valid);
        assert_eq!(outcome.details["smtp_code"], 250);
    }

    #[tokio::test]
    async fn test_rejected_recipient_is_invalid() {
        let addr = scripted_server("550 5.1.1 No such user\r\n").await;
        let cache = Arc::new(ProbeCache::new(Duration::from_secs(60)));
        let validator = validator_for(addr, cache);

        let outcome = validator
            .validate("ghost@example.com", "example.com", None)
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Invalid);
        assert!(outcome.errors()[0].contains("No such user"));
    }

    #[tokio::test]
    async fn test_greylisting_is_uncertain() {
        let addr = scripted_server("450 4.2.0 greylisted, try again\r\n").await;
        let cache = Arc::new(ProbeCache::new(Duration::from_secs(60)));
        let validator = validator_for(addr, cache);

        let outcome = validator
            .validate("user@example.com", "example.com", None)
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Warning);
        assert!(outcome.message.contains("inconclusive"));
    }

    #[tokio::test]
    async fn test_connect_failure_is_warning_never_invalid() {
        // Bind a port and drop the listener so the connection is refused.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let cache = Arc::new(ProbeCache::new(Duration::from_secs(60)));
        let validator = validator_for(addr, cache);

        let outcome = validator
            .validate("user@example.com", "example.com", None)
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Warning);
        assert!(outcome.message.contains("probe failed"));
    }

    #[tokio::test]
    async fn test_cached_result_short_circuits_dialogue() {
        let addr = scripted_server("550 5.1.1 No such user\r\n").await;
        let cache = Arc::new(ProbeCache::new(Duration::from_secs(60)));
        let validator = validator_for(addr, cache.clone());

        let first = validator
            .validate("ghost@example.com", "example.com", None)
            .await
            .unwrap();
        assert_eq!(first.status, CheckStatus::Invalid);

        // The scripted server is gone after one session; a second probe
        // could only succeed through the cache.
        let second = validator
            .validate("ghost@example.com", "example.com", None)
            .await
            .unwrap();
        assert_eq!(second.status, CheckStatus::Invalid);
        assert_eq!(second.details["cached"], true);
    }

    #[tokio::test]
    async fn test_no_mx_records_is_warning() {
        let resolver = Arc::new(StaticResolver::new());
        let cache = Arc::new(ProbeCache::new(Duration::from_secs(60)));
        let validator =
            ExistenceValidator::new(resolver, ProbeConfig::default(), cache);

        let outcome = validator
            .validate("user@example.com", "example.com", None)
            .await
            .unwrap();

        assert_eq!(outcome.status, CheckStatus::Warning);
    }
}
