/**
 * SYNCRUN KERNEL - Moteur de synchronisation source externe → graphe jumeau numérique
 *
 * RÔLE : Poll périodique d'une source d'assets/notifications, upsert idempotent
 * des devices et endpoints, cycle de vie des tickets piloté par les notifications.
 *
 * ARCHITECTURE : Orchestrateur (boucle + backoff) → réconciliateur + pont tickets
 * → ports collaborateurs (graphe, séries temporelles, workflow).
 */

pub mod config;
pub mod contexts;
pub mod error;
pub mod health;
pub mod matcher;
pub mod models;
pub mod naming;
pub mod orchestrator;
pub mod ports;
pub mod reconciler;
pub mod schedule;
pub mod source;
pub mod state;
pub mod ticket_bridge;

pub use config::SyncConfig;
pub use contexts::SyncContexts;
pub use error::{Result, SyncError};
pub use orchestrator::{OrchestratorState, SyncOrchestrator};
pub use reconciler::{AssetReconciler, ReconcileReport};
pub use source::{AssetSource, HttpAssetSource};
pub use ticket_bridge::{BridgeReport, NotificationTicketBridge};
