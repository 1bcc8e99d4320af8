use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use vigil::{
    Host,
    broadcast::ChannelBroadcaster,
    checks::CheckRegistry,
    config::{Config, HostConfig, StorageConfig, read_config_file},
    monitor::Monitor,
    notify::{LogMailer, MailDispatcher, MailSender, TwilioSms, WebhookMailer},
    preferences::Preferences,
    runner::TokioRunner,
    storage::{MemoryRepository, Repository},
    util,
};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (falls back to $VIGIL_CONFIG, then built-in defaults)
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let level = LevelFilter::from_level(util::get_log_level());
    let filter =
        filter::Targets::new().with_targets(vec![("vigil", level), ("vigil_hub", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match args.file.or_else(util::get_config_path) {
        Some(path) => read_config_file(&path)?,
        None => {
            warn!("no config file given, using defaults");
            Config::default()
        }
    };

    let repository = open_repository(&config).await?;
    seed_hosts(repository.as_ref(), &config.hosts).await?;
    let preferences = load_preferences(repository.as_ref(), &config.preferences).await?;

    let broadcaster = ChannelBroadcaster::default();
    let _logger = broadcaster.spawn_logger();

    let mailer: Arc<dyn MailSender> = match &config.mail.relay_url {
        Some(url) => Arc::new(
            WebhookMailer::new(url.clone(), config.mail.timeout())
                .context("failed to set up mail relay client")?,
        ),
        None => {
            info!("no mail relay configured, emails are only logged");
            Arc::new(LogMailer)
        }
    };
    let mail = MailDispatcher::spawn(mailer, config.mail.workers, config.mail.queue_size);
    let sms = Arc::new(
        TwilioSms::new(
            config.sms.twilio_base_url.clone(),
            preferences.clone(),
            config.sms.timeout(),
        )
        .context("failed to set up sms client")?,
    );

    let checks = CheckRegistry::with_defaults(&config.checks)
        .context("failed to set up service checks")?;

    let monitor = Monitor::new(
        repository,
        Arc::new(broadcaster),
        preferences,
        checks,
        mail,
        sms,
        Arc::new(TokioRunner::new()),
    );

    match monitor.start().await {
        Ok(scheduled) => info!("hub running, {scheduled} pairs scheduled"),
        Err(e) => error!("failed to start monitoring: {e}"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    monitor.shutdown().await;
    Ok(())
}

async fn open_repository(config: &Config) -> anyhow::Result<Arc<dyn Repository>> {
    match config.storage.clone().unwrap_or_default() {
        StorageConfig::None => {
            info!("using in-memory repository, nothing is persisted");
            Ok(Arc::new(MemoryRepository::new()))
        }
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => {
            let repository = vigil::storage::sqlite::SqliteRepository::new(&path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            Ok(Arc::new(repository))
        }
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => {
            anyhow::bail!("sqlite storage configured but the storage-sqlite feature is disabled")
        }
    }
}

/// Insert configured hosts that do not exist yet and activate their services
async fn seed_hosts(repository: &dyn Repository, hosts: &[HostConfig]) -> anyhow::Result<()> {
    if hosts.is_empty() {
        return Ok(());
    }

    let existing: Vec<String> = repository
        .all_hosts()
        .await
        .context("failed to list hosts")?
        .into_iter()
        .map(|host| host.host_name)
        .collect();

    for seed in hosts {
        if existing.contains(&seed.host_name) {
            debug!("host {} already present", seed.host_name);
            continue;
        }

        let mut host = Host::new(seed.host_name.clone(), seed.url.clone());
        if let Some(canonical_name) = &seed.canonical_name {
            host.canonical_name = canonical_name.clone();
        }
        host.location = seed.location.clone();
        host.os = seed.os.clone();

        let host_id = repository
            .insert_host(&host)
            .await
            .with_context(|| format!("failed to insert host {}", seed.host_name))?;

        for service in &seed.services {
            let mut pair = repository
                .get_host_service_by_host_id_service_id(host_id, service.service_id)
                .await
                .with_context(|| {
                    format!(
                        "host {} has no service {}",
                        seed.host_name, service.service_id
                    )
                })?;

            pair.active = true;
            pair.schedule_number = service.every;
            pair.schedule_unit = service.unit;
            repository.update_host_service(&pair).await?;
        }

        info!("seeded host {} ({})", seed.host_name, host_id);
    }

    Ok(())
}

/// Stored preferences win over configured ones; configured values that are
/// missing get persisted.
async fn load_preferences(
    repository: &dyn Repository,
    configured: &HashMap<String, String>,
) -> anyhow::Result<Preferences> {
    let stored = repository
        .all_preferences()
        .await
        .context("failed to load preferences")?;

    let missing: HashMap<String, String> = configured
        .iter()
        .filter(|(key, _)| !stored.contains_key(*key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    if !missing.is_empty() {
        repository
            .insert_or_update_preferences(&missing)
            .await
            .context("failed to store configured preferences")?;
    }

    let preferences = Preferences::from_map(stored);
    preferences.extend_missing(&missing).await;
    Ok(preferences)
}
