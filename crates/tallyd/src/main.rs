//! tallyd - The tally agent
//!
//! Wires together:
//! - Configuration loading and CLI overrides
//! - Store initialization and spill-log replay
//! - One-shot installed-software import
//! - The tracker task driving the session engine
//! - Signal handling and graceful shutdown

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tally_config::{AgentConfig, MAX_POLL_INTERVAL_SECS, load_config, load_config_or_default};
use tally_core::{CoreEvent, Identity, PendingWrite, Tracker, TrackingEngine, import_inventory};
use tally_host_linux::{LinuxInventory, SysinfoSnapshotSource, current_user, machine_name};
use tally_store::{AuditEvent, AuditEventType, ReplayOutcome, SpillLog, SqliteStore, Store};
use tally_util::{MachineName, TALLY_CONFIG_ENV, TALLY_DATA_DIR_ENV, UserName, default_config_path};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Identity used when neither configuration nor the OS provides one
const UNKNOWN_IDENTITY: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// tallyd - Per-program usage tracking agent
#[derive(Parser, Debug)]
#[command(name = "tallyd")]
#[command(about = "Tracks how long each program runs and records installed software", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/tally/config.toml)
    #[arg(short, long, env = TALLY_CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Data directory override
    #[arg(short, long, env = TALLY_DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// User to attribute usage to
    #[arg(short, long)]
    user: Option<String>,

    /// Machine to attribute usage to
    #[arg(short, long)]
    machine: Option<String>,

    /// Seconds between process snapshots
    #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..=MAX_POLL_INTERVAL_SECS))]
    interval: Option<u64>,

    /// Skip the installed-software import at startup
    #[arg(long)]
    skip_inventory: bool,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn init_logging(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    match args.log_format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}

/// Explicit config path must exist; the default location may be absent
fn load_agent_config(args: &Args) -> Result<AgentConfig> {
    let mut config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            let path = default_config_path();
            load_config_or_default(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
    };

    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(user) = &args.user {
        config.user = Some(UserName::new(user.as_str()));
    }
    if let Some(machine) = &args.machine {
        config.machine = Some(MachineName::new(machine.as_str()));
    }
    if let Some(secs) = args.interval {
        config.poll_interval = Duration::from_secs(secs);
    }
    if args.skip_inventory {
        config.inventory.enabled = false;
    }

    Ok(config)
}

fn resolve_identity(config: &AgentConfig) -> Identity {
    resolve_identity_with(config, current_user, machine_name)
}

/// Config first, then the OS lookups, then [`UNKNOWN_IDENTITY`]
fn resolve_identity_with(
    config: &AgentConfig,
    os_user: impl FnOnce() -> Option<UserName>,
    os_machine: impl FnOnce() -> Option<MachineName>,
) -> Identity {
    let user = config
        .user
        .clone()
        .or_else(os_user)
        .unwrap_or_else(|| {
            warn!("Could not determine the current user");
            UserName::new(UNKNOWN_IDENTITY)
        });

    let machine = config
        .machine
        .clone()
        .or_else(os_machine)
        .unwrap_or_else(|| {
            warn!("Could not determine the machine name");
            MachineName::new(UNKNOWN_IDENTITY)
        });

    Identity { user, machine }
}

fn build_inventory(config: &AgentConfig) -> LinuxInventory {
    let mut inventory = LinuxInventory::new();
    if let Some(status) = &config.inventory.dpkg_status {
        inventory = inventory.with_dpkg_status(status);
    }
    for dir in &config.inventory.desktop_dirs {
        inventory = inventory.with_desktop_dir(dir);
    }
    inventory
}

/// Audit failures are logged, never fatal
fn audit(store: &dyn Store, event: AuditEventType) {
    if let Err(e) = store.append_audit(AuditEvent::new(event)) {
        warn!(error = %e, "Failed to write audit event");
    }
}

/// Main agent state
struct Agent {
    config: AgentConfig,
    identity: Identity,
    store: Arc<SqliteStore>,
    spill: SpillLog,
}

impl Agent {
    fn new(config: AgentConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!(
                "Failed to create data directory {}",
                config.data_dir.display()
            )
        })?;

        let db_path = config.database_path();
        let store = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {}", db_path.display()))?,
        );

        let identity = resolve_identity(&config);
        let spill = SpillLog::new(config.spill_path());

        info!(
            version = env!("CARGO_PKG_VERSION"),
            user = %identity.user,
            machine = %identity.machine,
            db_path = %db_path.display(),
            poll_interval_secs = config.poll_interval.as_secs(),
            "tallyd starting"
        );

        audit(
            store.as_ref(),
            AuditEventType::AgentStarted {
                user: identity.user.clone(),
                machine: identity.machine.clone(),
                poll_interval_secs: config.poll_interval.as_secs(),
            },
        );

        Ok(Self {
            config,
            identity,
            store,
            spill,
        })
    }

    /// Push usage left over from a previous run into the store
    fn replay_spill(&self) {
        match self.spill.replay(self.store.as_ref(), tally_util::now()) {
            Ok(outcome) if outcome == ReplayOutcome::default() => {}
            Ok(outcome) => {
                audit(
                    self.store.as_ref(),
                    AuditEventType::SpillReplayed {
                        replayed: outcome.replayed,
                        remaining: outcome.remaining,
                        orphaned: outcome.orphaned,
                    },
                );
            }
            Err(e) => {
                warn!(path = %self.spill.path().display(), error = %e, "Failed to replay spill log");
            }
        }
    }

    fn import_inventory(&self) {
        if !self.config.inventory.enabled {
            info!("Inventory import disabled");
            return;
        }
        if !self.config.inventory.has_sources() {
            info!("No inventory sources configured");
            return;
        }

        let inventory = build_inventory(&self.config);
        let summary = import_inventory(
            &inventory,
            self.store.as_ref(),
            &self.identity.user,
            tally_util::now(),
        );

        audit(
            self.store.as_ref(),
            AuditEventType::InventoryImported {
                program_count: summary.written,
                failed_sources: summary.failed_sources,
                failed_writes: summary.failed_writes,
            },
        );
    }

    /// Append a write to the spill log, returning whether it was kept
    fn spill_write(&self, write: &PendingWrite) -> bool {
        match self.spill.append(&write.to_spilled()) {
            Ok(()) => true,
            Err(e) => {
                error!(
                    key = %write.key,
                    delta_secs = write.delta_seconds,
                    closed_at = %tally_util::format_datetime_full(&write.closed_at),
                    error = %e,
                    "Failed to spill usage write, usage lost"
                );
                false
            }
        }
    }

    fn handle_core_event(&self, event: CoreEvent) {
        match event {
            CoreEvent::ClockSkewClamped {
                pid,
                program,
                skew_seconds,
            } => {
                audit(
                    self.store.as_ref(),
                    AuditEventType::ClockSkewClamped {
                        pid,
                        program,
                        skew_seconds,
                    },
                );
            }

            CoreEvent::UsageAbandoned { write } => {
                self.spill_write(&write);
                audit(
                    self.store.as_ref(),
                    AuditEventType::UsageWriteAbandoned {
                        program: write.key.program.clone(),
                        delta_seconds: write.delta_seconds,
                        attempts: write.attempts,
                    },
                );
            }

            // Logged by the engine
            CoreEvent::SessionOpened { .. }
            | CoreEvent::SessionClosed { .. }
            | CoreEvent::SnapshotFailed { .. }
            | CoreEvent::UsageWriteFailed { .. }
            | CoreEvent::UsageRecovered { .. } => {}
        }
    }

    async fn run(self) -> Result<()> {
        self.replay_spill();
        self.import_inventory();

        let engine = TrackingEngine::new(
            self.identity.clone(),
            Box::new(SysinfoSnapshotSource::new()),
            self.store.clone(),
            self.config.retry,
        );
        let (tracker, mut events) = Tracker::spawn(engine, self.config.poll_interval);

        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to create SIGTERM handler")?;
        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to create SIGINT handler")?;
        let mut sighup =
            signal(SignalKind::hangup()).context("Failed to create SIGHUP handler")?;

        info!("Agent running");

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP, shutting down gracefully");
                    break;
                }

                event = events.recv() => match event {
                    Some(event) => self.handle_core_event(event),
                    None => {
                        error!("Tracker stopped unexpectedly");
                        break;
                    }
                }
            }
        }

        // Graceful shutdown
        let mut engine = tracker.shutdown().await.context("Tracker failed")?;

        // Abandoned writes from the final tick are still queued as events
        while let Ok(event) = events.try_recv() {
            self.handle_core_event(event);
        }

        self.stop_tracking(&mut engine);

        info!("Shutdown complete");
        Ok(())
    }

    /// Discard open sessions and spill every write still queued, returning
    /// how many were spilled
    fn stop_tracking(&self, engine: &mut TrackingEngine) -> usize {
        let summary = engine.shutdown();
        let spilled = summary
            .unwritten
            .iter()
            .filter(|write| self.spill_write(write))
            .count();

        info!(
            open_sessions = summary.open_sessions,
            spilled_writes = spilled,
            "Discarding open sessions and spilling pending writes"
        );

        audit(
            self.store.as_ref(),
            AuditEventType::AgentStopped {
                open_sessions: summary.open_sessions,
                spilled_writes: spilled,
            },
        );

        spilled
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    if tally_util::is_mock_time_active() {
        warn!(
            now = %tally_util::format_datetime_full(&tally_util::now()),
            "Mock time is active"
        );
    }

    let config = load_agent_config(&args)?;
    let agent = Agent::new(config)?;
    agent.run().await
}
