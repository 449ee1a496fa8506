/**
 * SYNCRUN KERNEL - Point d'entrée du service de synchronisation
 *
 * RÔLE : Bootstrap : .env, logging, config, source HTTP, collaborateurs, boucle de poll.
 * En autonome, les collaborateurs sont les implémentations mémoire semées depuis la config.
 * Arrêt propre sur Ctrl-C : `stop()` puis attente de la fin du cycle en cours.
 */

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use syncrun_kernel::config::load_config;
use syncrun_kernel::ports::memory::bootstrap_memory_backend;
use syncrun_kernel::{HttpAssetSource, SyncOrchestrator};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Charger les variables d'environnement depuis .env (si présent)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("syncrun_kernel=info")),
        )
        .init();

    let cfg = load_config().await;
    tracing::info!(
        "[kernel] source {} (network '{}' / '{}')",
        cfg.source.base_url,
        cfg.graph.network_context,
        cfg.graph.virtual_network
    );

    let source = HttpAssetSource::new(&cfg.source).context("failed to build HTTP source client")?;
    let backend = bootstrap_memory_backend(&cfg);

    let orchestrator = Arc::new(SyncOrchestrator::new(
        cfg,
        Arc::new(source),
        backend.graph.clone(),
        backend.timeseries.clone(),
        backend.workflow.clone(),
    ));

    let reporter = orchestrator.health().spawn_health_reporter(Duration::from_secs(60));
    let sync_loop = orchestrator.start()?;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("[kernel] shutdown requested");
    orchestrator.stop();
    sync_loop.await.context("sync loop panicked")?;
    reporter.abort();

    tracing::info!("[kernel] stopped");
    Ok(())
}
