//! The daemon loop.
//!
//! A timer task fires ticks into a channel; a single worker drains the
//! channel and runs one engine cycle per tick (scheduler pass, then
//! proof-of-life pass). Scanning and execution never happen re-entrantly
//! because the worker processes one tick at a time, and ticks that
//! arrive while a cycle is still running simply queue up.

use crate::activity::SqliteActivityLog;
use crate::config::ServerConfig;
use crate::ledger::{DryRunLedger, HttpEscrowLedger};
use anyhow::{Context, Result};
use heirloom_core::CipherKey;
use heirloom_engine::{
    DistributionScheduler, EngineContext, EscrowLedger, Notifier, ProofOfLifeConfig,
    ProofOfLifeMonitor, SchedulerConfig,
};
use heirloom_notify::{LogNotifier, SmtpNotifier};
use rusqlite::Connection;
use std::time::Duration;
use tokio::sync::mpsc;

/// Everything one engine cycle needs, built once at startup.
pub struct Engine {
    conn: Connection,
    cipher: CipherKey,
    scheduler: DistributionScheduler,
    monitor: ProofOfLifeMonitor,
    ledger: Box<dyn EscrowLedger>,
    notifier: Box<dyn Notifier>,
    activity: SqliteActivityLog,
}

impl Engine {
    pub fn build(config: &ServerConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.server.data_dir).with_context(|| {
            format!(
                "Failed to create data dir: {}",
                config.server.data_dir.display()
            )
        })?;
        let db_path = config.server.data_dir.join("heirloom.db");

        let conn = heirloom_store::open_db(&db_path).context("Failed to open database")?;
        let activity =
            SqliteActivityLog::open(&db_path).context("Failed to open activity log")?;
        let cipher = config.cipher_key()?;

        let call_timeout = Duration::from_secs(config.scheduler.call_timeout_secs);
        let pol_config = ProofOfLifeConfig {
            prompt_interval_secs: i64::from(config.proof_of_life.prompt_interval_days) * 86_400,
            fail_threshold: config.proof_of_life.fail_threshold,
            call_timeout,
        };
        let scheduler_config = SchedulerConfig {
            holder: config.server.worker_id.clone(),
            max_attempts: config.scheduler.max_attempts,
            call_timeout,
            pass_deadline: Duration::from_secs(config.scheduler.pass_deadline_secs),
            notice_window_secs: config.scheduler.notice_window_secs,
            lock_ttl_secs: config.scheduler.lock_ttl_secs,
        };

        let scheduler = DistributionScheduler::new(scheduler_config, pol_config.clone())
            .context("Invalid scheduler configuration")?;
        let monitor =
            ProofOfLifeMonitor::new(pol_config).context("Invalid proof-of-life configuration")?;

        let ledger: Box<dyn EscrowLedger> = match config.ledger.mode.as_str() {
            "http" => Box::new(HttpEscrowLedger::new(
                config.ledger.endpoint.clone(),
                config.ledger.auth_token.clone(),
                call_timeout,
            )?),
            _ => {
                log::warn!("ledger in dry-run mode; no escrow calls will reach the chain");
                Box::new(DryRunLedger)
            }
        };

        let notifier: Box<dyn Notifier> = match config.notifications.email.clone() {
            Some(email) if email.enabled => {
                Box::new(SmtpNotifier::new(email).context("Invalid email configuration")?)
            }
            _ => {
                log::warn!("no email channel configured; notifications go to the log only");
                Box::new(LogNotifier)
            }
        };

        Ok(Self {
            conn,
            cipher,
            scheduler,
            monitor,
            ledger,
            notifier,
            activity,
        })
    }

    /// Run one cycle: scheduler pass, then proof-of-life pass.
    pub async fn run_cycle(&mut self) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let ctx = EngineContext {
            ledger: self.ledger.as_ref(),
            notifier: self.notifier.as_ref(),
            activity: &self.activity,
        };

        let summary = self
            .scheduler
            .run_pass(&self.conn, &self.cipher, &ctx, now)
            .await
            .context("scheduler pass failed")?;
        log::info!(
            "scheduler: {} executed, {} notified, {} failed, {} claim windows opened, \
             {} expired, {} skipped",
            summary.executed,
            summary.notified,
            summary.failed,
            summary.codes_delivered,
            summary.expired,
            summary.skipped
        );

        let pol = self
            .monitor
            .run_pass(&self.conn, &ctx, now)
            .await
            .context("proof-of-life pass failed")?;
        log::info!(
            "proof-of-life: {} prompts sent, {} misses recorded, {} thresholds crossed",
            pol.prompts_sent,
            pol.misses_recorded,
            pol.thresholds_crossed
        );

        Ok(())
    }
}

/// Run the daemon loop. Blocks forever (until shutdown signal).
pub async fn run(config: ServerConfig) -> Result<()> {
    log::info!("Heirloom server starting");
    log::info!("  Data dir:      {}", config.server.data_dir.display());
    log::info!("  Tick interval: {} seconds", config.server.tick_interval_secs);
    log::info!("  Worker id:     {}", config.server.worker_id);
    log::info!("  Ledger mode:   {}", config.ledger.mode);
    log::info!(
        "  Email notify:  {}",
        config.notifications.email.is_some()
    );

    let mut engine = Engine::build(&config)?;

    // Timer task feeds ticks into a bounded channel; a queued tick is
    // enough to remember that work is owed, so capacity 1 suffices and
    // a slow cycle cannot pile up a backlog.
    let (tick_tx, mut tick_rx) = mpsc::channel::<()>(1);
    let interval = Duration::from_secs(config.server.tick_interval_secs);
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            timer.tick().await;
            // A full queue means a tick is already waiting; drop this one
            if tick_tx.try_send(()).is_err() && tick_tx.is_closed() {
                break;
            }
        }
    });

    while tick_rx.recv().await.is_some() {
        match engine.run_cycle().await {
            Ok(()) => log::debug!("cycle completed"),
            Err(e) => log::error!("cycle failed: {e:#}"),
        }
    }

    Ok(())
}

/// Run a single cycle and return (the `--check` mode).
pub async fn run_once(config: ServerConfig) -> Result<()> {
    let mut engine = Engine::build(&config)?;
    engine.run_cycle().await
}
