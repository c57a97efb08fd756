//! revq: operator interface to the review queue.

use clap::{Parser, Subcommand, ValueEnum};
use review_queue::alert::{AlertSink, AlertThrottle, MemoryThrottleStore, TracingAlertSink};
use review_queue::claim::ClaimManager;
use review_queue::clock::{Clock, SystemClock};
use review_queue::config::Config;
use review_queue::db::Db;
use review_queue::health::{DbProbe, HealthChecker, HttpProbe};
use review_queue::ledger::ComplianceLedger;
use review_queue::model::{IntakeId, RequestId, ReviewerId};
use review_queue::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
use review_queue::worker::{
    HttpDraftGenerator, RetryCoordinator, Scheduler, SlaMonitor, StaleClaimReclaimer, Worker,
};
use secrecy::ExposeSecret;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "revq", about = "Clinician review queue coordination")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the periodic workers until interrupted
    Serve,
    /// Run one worker invocation and print its report (for cron)
    Run {
        #[arg(value_enum)]
        worker: WorkerKind,
    },
    /// Probe dependencies once; exits non-zero if any is unhealthy.
    /// Each invocation alerts on every failure; `serve` throttles them.
    Health,
    /// Claim an intake for a reviewer
    Claim {
        intake_id: uuid::Uuid,
        #[arg(long)]
        reviewer: String,
    },
    /// Release a reviewer's claim
    Release {
        intake_id: uuid::Uuid,
        #[arg(long)]
        reviewer: String,
    },
    /// Print the compliance timeline of a request
    Timeline { request_id: uuid::Uuid },
    /// Check whether a request's audit evidence is complete
    Readiness { request_id: uuid::Uuid },
}

#[derive(Clone, Copy, ValueEnum)]
enum WorkerKind {
    Reclaim,
    Sla,
    Retry,
}

/// Shared wiring for every command that touches the database.
struct App {
    config: Config,
    db: Arc<Db>,
    clock: Arc<dyn Clock>,
    alerts: Arc<dyn AlertSink>,
    telemetry: TelemetryGuard,
}

impl App {
    async fn init(service_name: &str) -> anyhow::Result<Self> {
        let config = Config::from_env()?;
        let telemetry = init_telemetry(TelemetryConfig {
            endpoint: config.otel_endpoint.clone(),
            service_name: service_name.to_string(),
            log_level: config.log_level.clone(),
        })?;

        let db = Db::connect(config.database_url.expose_secret()).await?;
        db.migrate().await?;

        Ok(Self {
            config,
            db: Arc::new(db),
            clock: Arc::new(SystemClock),
            alerts: Arc::new(TracingAlertSink),
            telemetry,
        })
    }

    fn ledger(&self) -> ComplianceLedger {
        ComplianceLedger::new(self.db.clone(), self.clock.clone())
    }

    fn reclaimer(&self) -> StaleClaimReclaimer {
        StaleClaimReclaimer::new(
            self.db.clone(),
            self.clock.clone(),
            self.config.settings.reclaim_config(),
        )
    }

    fn sla_monitor(&self) -> SlaMonitor {
        SlaMonitor::new(
            self.db.clone(),
            self.alerts.clone(),
            self.clock.clone(),
            self.config.settings.sla_config(),
        )
    }

    /// `None` when no draft endpoint is configured.
    fn retry_coordinator(&self) -> anyhow::Result<Option<RetryCoordinator>> {
        let Some(ref endpoint) = self.config.draft_endpoint else {
            return Ok(None);
        };
        let generator = HttpDraftGenerator::new(
            endpoint.clone(),
            self.config.draft_token.clone(),
            std::time::Duration::from_secs(30),
        )?;
        Ok(Some(RetryCoordinator::new(
            self.db.clone(),
            Arc::new(generator),
            self.clock.clone(),
            self.config.settings.retry_config(),
        )))
    }

    fn health_checker(&self) -> anyhow::Result<HealthChecker> {
        let settings = &self.config.settings;
        let throttle = AlertThrottle::new(
            Arc::new(MemoryThrottleStore::new()),
            self.clock.clone(),
            settings.alert_window(),
        );
        let mut checker =
            HealthChecker::new(throttle, self.alerts.clone(), settings.probe_timeout())
                .with_probe(Arc::new(DbProbe::new(self.db.clone())))?;
        if let Some(ref url) = self.config.cache_health_url {
            checker = checker.with_probe(Arc::new(HttpProbe::new("cache", url)))?;
        }
        if let Some(ref url) = self.config.payment_health_url {
            checker = checker.with_probe(Arc::new(HttpProbe::new("payment", url)))?;
        }
        Ok(checker)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => cmd_serve().await,
        Command::Run { worker } => cmd_run(worker).await,
        Command::Health => cmd_health().await,
        Command::Claim {
            intake_id,
            reviewer,
        } => cmd_claim(IntakeId(intake_id), ReviewerId::new(reviewer)).await,
        Command::Release {
            intake_id,
            reviewer,
        } => cmd_release(IntakeId(intake_id), ReviewerId::new(reviewer)).await,
        Command::Timeline { request_id } => cmd_timeline(RequestId(request_id)).await,
        Command::Readiness { request_id } => cmd_readiness(RequestId(request_id)).await,
    }
}

async fn cmd_serve() -> anyhow::Result<ExitCode> {
    let app = App::init("revq").await?;
    let settings = &app.config.settings;

    let mut scheduler = Scheduler::new(app.clock.clone(), settings.poll_interval())
        .with_job(Arc::new(app.reclaimer()), settings.reclaim_interval())
        .with_job(Arc::new(app.sla_monitor()), settings.sla_interval())
        .with_job(Arc::new(app.health_checker()?), settings.health_interval());
    match app.retry_coordinator()? {
        Some(retry) => scheduler = scheduler.with_job(Arc::new(retry), settings.retry_interval()),
        None => tracing::warn!("DRAFT_ENDPOINT not set, draft retries disabled"),
    }

    let sched = scheduler.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        sched.shutdown();
    });

    scheduler.run().await?;
    Ok(ExitCode::SUCCESS)
}

async fn cmd_run(kind: WorkerKind) -> anyhow::Result<ExitCode> {
    let app = App::init("revq-worker").await?;
    let worker: Box<dyn Worker> = match kind {
        WorkerKind::Reclaim => Box::new(app.reclaimer()),
        WorkerKind::Sla => Box::new(app.sla_monitor()),
        WorkerKind::Retry => match app.retry_coordinator()? {
            Some(retry) => Box::new(retry),
            None => anyhow::bail!("DRAFT_ENDPOINT is not set"),
        },
    };

    let report = worker.run_once().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    app.telemetry.force_flush();
    Ok(ExitCode::SUCCESS)
}

async fn cmd_health() -> anyhow::Result<ExitCode> {
    let app = App::init("revq").await?;
    let report = app.health_checker()?.check().await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    app.telemetry.force_flush();
    Ok(if report.healthy {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_claim(intake_id: IntakeId, reviewer: ReviewerId) -> anyhow::Result<ExitCode> {
    let app = App::init("revq").await?;
    let claims = ClaimManager::new(app.db.clone(), app.ledger(), app.clock.clone());
    let outcome = claims.acquire_claim(intake_id, &reviewer).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(if outcome.is_acquired() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_release(intake_id: IntakeId, reviewer: ReviewerId) -> anyhow::Result<ExitCode> {
    let app = App::init("revq").await?;
    let claims = ClaimManager::new(app.db.clone(), app.ledger(), app.clock.clone());
    if claims.release_claim(intake_id, &reviewer).await? {
        println!("Released: {intake_id}");
        Ok(ExitCode::SUCCESS)
    } else {
        println!("Not released: {reviewer} does not hold {intake_id}");
        Ok(ExitCode::FAILURE)
    }
}

async fn cmd_timeline(request_id: RequestId) -> anyhow::Result<ExitCode> {
    let app = App::init("revq").await?;
    let entries = app.ledger().get_compliance_timeline(request_id).await?;

    if entries.is_empty() {
        println!("No audit entries for {request_id}.");
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{:<19}  {:<32}  {:<10}  {:<20}  OUTCOME",
        "AT", "EVENT", "ROLE", "ACTOR"
    );
    println!("{}", "-".repeat(96));
    for entry in &entries {
        println!(
            "{:<19}  {:<32}  {:<10}  {:<20}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.event_type,
            entry.actor_role,
            entry.actor_id.as_deref().unwrap_or("-"),
            entry
                .outcome
                .map(|o| o.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
    }
    println!("\n{} entr(ies)", entries.len());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_readiness(request_id: RequestId) -> anyhow::Result<ExitCode> {
    let app = App::init("revq").await?;
    let readiness = app.ledger().check_audit_readiness(request_id).await?;
    println!("{}", serde_json::to_string_pretty(&readiness)?);
    Ok(if readiness.ready {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
