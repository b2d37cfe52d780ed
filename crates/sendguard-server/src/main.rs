//! Sendguard - sender address validation entry point

use anyhow::{anyhow, Result};
use sendguard_common::{CheckStatus, Config};
use sendguard_core::{
    registry, EvidenceExtractor, Notifier, ProbeCache, RecheckWorker, SystemResolver,
    ValidationEngine, ValidationService,
};
use sendguard_storage::{DatabasePool, DbSenderAddressRepository, LocalStorage};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

const USAGE: &str = "usage: sendguard <command>

commands:
  validate <email> [eml-path]   validate one address, without persistence
  record <id>                   validate a stored record and persist the report
  all                           validate every active record, notify about failures
  watch                         run the periodic re-check worker";

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let config = Config::load_or_default();
    let args: Vec<String> = std::env::args().skip(1).collect();

    let exit_code = match args.first().map(String::as_str) {
        Some("validate") => {
            let email = args
                .get(1)
                .ok_or_else(|| anyhow!("validate requires an email address\n\n{}", USAGE))?;
            run_validate(&config, email, args.get(2).map(String::as_str)).await?
        }
        Some("record") => {
            let id = args
                .get(1)
                .ok_or_else(|| anyhow!("record requires a record id\n\n{}", USAGE))?;
            run_record(&config, id).await?
        }
        Some("all") => run_all(&config).await?,
        Some("watch") => run_watch(&config).await?,
        _ => {
            eprintln!("{}", USAGE);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Build the validation engine from configuration
fn build_engine(config: &Config) -> ValidationEngine {
    let resolver = Arc::new(SystemResolver::new());
    let cache = Arc::new(ProbeCache::new(Duration::from_secs(
        config.probe.cache_ttl_hours * 3600,
    )));

    ValidationEngine::new(registry(
        resolver,
        config.outbound.clone(),
        config.probe.clone(),
        cache,
    ))
}

/// Build the persistence-aware service; requires database configuration
async fn build_service(config: &Config) -> Result<ValidationService> {
    let db_config = config
        .database
        .as_ref()
        .ok_or_else(|| anyhow!("this command needs a [database] section in the configuration"))?;

    let pool = DatabasePool::new(db_config).await?;
    pool.migrate().await?;

    let repository = Arc::new(DbSenderAddressRepository::new(pool));
    let evidence_store = Arc::new(LocalStorage::new(&config.storage)?);

    Ok(ValidationService::new(
        build_engine(config),
        repository,
        evidence_store,
    ))
}

/// Validate one address without touching the store
async fn run_validate(config: &Config, email: &str, eml_path: Option<&str>) -> Result<i32> {
    let evidence = match eml_path {
        Some(path) => {
            let raw = std::fs::read(path)?;
            Some(EvidenceExtractor::extract(&raw)?)
        }
        None => None,
    };

    let engine = build_engine(config);
    let report = engine.validate_email(email, evidence.as_ref()).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(exit_code_for(report.status))
}

/// Validate a stored record and persist the report
async fn run_record(config: &Config, id: &str) -> Result<i32> {
    let id = Uuid::parse_str(id).map_err(|_| anyhow!("\"{}\" is not a valid record id", id))?;

    let service = build_service(config).await?;
    let report = service.validate_sender_address(id).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(exit_code_for(report.status))
}

/// Validate every active record and notify about failures
async fn run_all(config: &Config) -> Result<i32> {
    let service = build_service(config).await?;
    let notifier = Notifier::new(config.notify.clone())?;

    let summary = service.validate_all().await?;

    if !summary.failed_addresses.is_empty() {
        if let Err(e) = notifier
            .send(&summary.statistics, &summary.failed_addresses)
            .await
        {
            tracing::error!("Could not deliver notification: {}", e);
        }
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "statistics": summary.statistics,
            "failed_addresses": summary.failed_addresses,
        }))?
    );

    Ok(if summary.statistics.invalid == 0 { 0 } else { 1 })
}

/// Run the periodic re-check worker until interrupted
async fn run_watch(config: &Config) -> Result<i32> {
    let service = Arc::new(build_service(config).await?);
    let notifier = Arc::new(Notifier::new(config.notify.clone())?);
    let worker = RecheckWorker::new(service, notifier, config.recheck.interval_hours);

    let handle = tokio::spawn(async move {
        worker.run().await;
    });

    info!("Re-check worker running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    handle.abort();
    Ok(0)
}

fn exit_code_for(status: CheckStatus) -> i32 {
    if status == CheckStatus::Valid {
        0
    } else {
        1
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sendguard=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .init();
}
