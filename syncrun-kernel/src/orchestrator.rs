/**
 * SYNC ORCHESTRATOR - Boucle de poll, planification et backoff
 *
 * RÔLE :
 * Possède l'unique tâche de contrôle : attend l'échéance, exécute un cycle
 * (fetch → réconciliation → tickets), enregistre `lastSync` en cas de succès.
 *
 * FONCTIONNEMENT :
 * - Stopped → Running → Stopped, redémarrable
 * - Échéance monotone : intervalle depuis le début du cycle réussi, backoff fixe après un échec
 * - `stop()` baisse le drapeau et réveille l'attente ; un cycle en cours va jusqu'au bout
 * - Les contextes sont résolus au premier cycle puis gardés par la boucle ;
 *   tant que la résolution échoue, elle est retentée au cycle suivant
 *
 * ÉCHECS :
 * Aucune erreur ne sort de la boucle. Symptôme visible d'échecs répétés : `last_sync` figé.
 */

use crate::config::SyncConfig;
use crate::contexts::SyncContexts;
use crate::error::{Result, SyncError};
use crate::health::{CycleReport, HealthTracker};
use crate::ports::{GraphGateway, TicketWorkflow, TimeseriesStore};
use crate::reconciler::AssetReconciler;
use crate::schedule::PollSchedule;
use crate::source::AssetSource;
use crate::state::RunFlag;
use crate::ticket_bridge::NotificationTicketBridge;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OrchestratorState {
    Stopped,
    Running,
}

pub struct SyncOrchestrator {
    config: SyncConfig,
    source: Arc<dyn AssetSource>,
    graph: Arc<dyn GraphGateway>,
    workflow: Arc<dyn TicketWorkflow>,
    reconciler: AssetReconciler,
    bridge: NotificationTicketBridge,
    running: RunFlag,
    /// Incrémenté à chaque `start()` : une boucle d'une génération précédente s'arrête
    generation: AtomicU64,
    health: HealthTracker,
}

impl SyncOrchestrator {
    pub fn new(
        config: SyncConfig,
        source: Arc<dyn AssetSource>,
        graph: Arc<dyn GraphGateway>,
        timeseries: Arc<dyn TimeseriesStore>,
        workflow: Arc<dyn TicketWorkflow>,
    ) -> Self {
        let reconciler = AssetReconciler::new(graph.clone(), timeseries, &config.fan_out, config.retention_days);
        let bridge = NotificationTicketBridge::new(graph.clone(), workflow.clone());
        Self {
            config,
            source,
            graph,
            workflow,
            reconciler,
            bridge,
            running: RunFlag::new(),
            generation: AtomicU64::new(0),
            health: HealthTracker::new(),
        }
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    pub fn state(&self) -> OrchestratorState {
        if self.running.is_raised() {
            OrchestratorState::Running
        } else {
            OrchestratorState::Stopped
        }
    }

    pub fn last_sync(&self) -> Option<OffsetDateTime> {
        self.health.last_sync()
    }

    /// Lance la boucle sur une tâche tokio dédiée
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        if !self.running.raise() {
            return Err(SyncError::AlreadyRunning);
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            "[sync] starting (interval {} ms, backoff {} ms)",
            self.config.schedule.pull_interval_ms,
            self.config.schedule.failure_backoff_ms
        );

        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.run_loop(generation).await }))
    }

    pub fn stop(&self) {
        tracing::info!("[sync] stop requested");
        self.running.lower();
    }

    fn is_current(&self, generation: u64) -> bool {
        self.running.is_raised() && self.generation.load(Ordering::SeqCst) == generation
    }

    async fn run_loop(&self, generation: u64) {
        let mut stop = self.running.subscribe();
        let mut schedule = PollSchedule::new(&self.config.schedule);
        let mut contexts: Option<SyncContexts> = None;
        let mut next_fire = schedule.first_fire(Instant::now());

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_fire) => {}
                _ = stopped(&mut stop) => {}
            }
            if !self.is_current(generation) {
                break;
            }

            let started = Instant::now();
            match self.run_cycle(&mut contexts).await {
                Ok(report) => {
                    self.health.record_success(OffsetDateTime::now_utc(), report);
                    next_fire = schedule.after_success(started, Instant::now());
                }
                Err(e) => {
                    tracing::error!("[sync] cycle failed: {e}");
                    self.health.record_failure(&e.to_string());
                    next_fire = schedule.after_failure(Instant::now());
                }
            }
        }

        tracing::info!("[sync] loop stopped");
    }

    /// Un cycle complet. `contexts` est résolu si absent et conservé pour les cycles suivants.
    pub async fn run_cycle(&self, contexts: &mut Option<SyncContexts>) -> Result<CycleReport> {
        if contexts.is_none() {
            *contexts = Some(SyncContexts::resolve(self.graph.as_ref(), self.workflow.as_ref(), &self.config).await?);
        }
        let Some(ctx) = contexts.as_ref() else {
            return Err(SyncError::LookupFailure("sync contexts unavailable".into()));
        };

        tracing::info!("[sync] getting asset information...");
        let fetch_start = Instant::now();
        let assets = self.source.get_assets().await?;
        let notifications = match ctx.tickets {
            Some(_) => Some(self.source.get_notifications().await?),
            None => None,
        };
        let fetch_seconds = fetch_start.elapsed().as_secs_f64();
        tracing::info!("[sync] {} assets received in {fetch_seconds:.3} seconds", assets.len());

        let update_start = Instant::now();
        let assets_report = self.reconciler.reconcile(&ctx.network, &assets).await?;
        let tickets_report = match (&ctx.tickets, notifications) {
            (Some(scope), Some(notifications)) => {
                Some(self.bridge.sync(scope, ctx.bim.as_ref(), &notifications).await?)
            }
            _ => None,
        };
        let update_seconds = update_start.elapsed().as_secs_f64();

        tracing::info!(
            "[sync] data updated in {update_seconds:.3} seconds: devices +{} / {}, endpoints +{} ~{}, pushes {}, failures {}",
            assets_report.devices_created,
            assets_report.devices_seen,
            assets_report.endpoints_created,
            assets_report.endpoints_updated,
            assets_report.series_pushes,
            assets_report.failures.len()
        );
        if let Some(t) = &tickets_report {
            tracing::info!(
                "[sync] tickets: opened {}, kept {}, advanced {}, links {}, malformed {}",
                t.created,
                t.skipped,
                t.advanced,
                t.links,
                t.malformed
            );
        }

        Ok(CycleReport {
            fetch_seconds,
            update_seconds,
            assets: assets_report,
            tickets: tickets_report,
        })
    }
}

/// Se résout quand le drapeau passe à `false` (ou que l'émetteur disparaît)
async fn stopped(stop: &mut watch::Receiver<bool>) {
    while *stop.borrow_and_update() {
        if stop.changed().await.is_err() {
            return;
        }
    }
}
