/**
 * CONTEXTES DE SYNCHRONISATION - Scopes résolus une fois, passés par référence
 *
 * RÔLE :
 * Résout les nœuds nommés dont dépend un cycle : contexte réseau + réseau virtuel,
 * contexte/process/étapes du workflow tickets, groupe BIM. Le résultat est possédé
 * par la boucle de l'orchestrateur et prêté au réconciliateur et au pont tickets.
 *
 * FONCTIONNEMENT :
 * - Chaque nom est résolu par égalité stricte (EntityMatcher)
 * - Un nom absent = LookupFailure : le cycle est abandonné, la résolution est retentée au suivant
 * - Tickets et BIM sont optionnels (absents de la config = non résolus)
 */

use crate::config::{BimConf, SyncConfig, TicketConf};
use crate::error::{Result, SyncError};
use crate::matcher;
use crate::ports::{relations, GraphGateway, NodeId, NodeRef, TicketWorkflow};

/// Réseau virtuel sous lequel vivent les devices
#[derive(Debug, Clone)]
pub struct NetworkScope {
    pub context: NodeRef,
    pub virtual_network: NodeRef,
}

#[derive(Debug, Clone)]
pub struct TicketScope {
    pub context: NodeId,
    pub process: NodeId,
    pub raised_step: NodeId,
    pub solved_step: NodeId,
    /// Nœud passé comme gabarit à `add_ticket`
    pub template: NodeId,
}

/// Chemin d'index BIM : contexte → catégorie → groupe → objets
#[derive(Debug, Clone)]
pub struct BimScope {
    pub group: NodeId,
    pub reference_category: String,
    pub reference_attribute: String,
}

#[derive(Debug, Clone)]
pub struct SyncContexts {
    pub network: NetworkScope,
    pub tickets: Option<TicketScope>,
    pub bim: Option<BimScope>,
}

impl SyncContexts {
    pub async fn resolve(graph: &dyn GraphGateway, workflow: &dyn TicketWorkflow, cfg: &SyncConfig) -> Result<Self> {
        let network = resolve_network(graph, &cfg.graph.network_context, &cfg.graph.virtual_network).await?;

        let tickets = match &cfg.tickets {
            Some(conf) => Some(resolve_tickets(graph, workflow, conf).await?),
            None => None,
        };

        let bim = match &cfg.bim {
            Some(conf) => Some(resolve_bim(graph, conf).await?),
            None => None,
        };

        tracing::info!(
            "[sync] contexts resolved: network '{}' / '{}' (tickets: {}, bim: {})",
            network.context.name,
            network.virtual_network.name,
            tickets.is_some(),
            bim.is_some()
        );

        Ok(Self { network, tickets, bim })
    }
}

async fn context_named(graph: &dyn GraphGateway, name: &str) -> Result<NodeRef> {
    graph
        .get_context(name)
        .await?
        .ok_or_else(|| SyncError::LookupFailure(format!("context '{name}' not found")))
}

async fn child_named(graph: &dyn GraphGateway, parent: &NodeRef, relation: &str, name: &str) -> Result<NodeRef> {
    let children = graph.get_children(&parent.id, &[relation]).await?;
    matcher::find(name, &children)
        .cloned()
        .ok_or_else(|| SyncError::LookupFailure(format!("'{name}' not found under '{}'", parent.name)))
}

async fn resolve_network(graph: &dyn GraphGateway, context: &str, virtual_network: &str) -> Result<NetworkScope> {
    let context = context_named(graph, context).await?;
    let virtual_network = child_named(graph, &context, relations::BMS_NETWORK, virtual_network).await?;
    Ok(NetworkScope { context, virtual_network })
}

async fn resolve_tickets(graph: &dyn GraphGateway, workflow: &dyn TicketWorkflow, conf: &TicketConf) -> Result<TicketScope> {
    let context = context_named(graph, &conf.context).await?;

    let processes = workflow.get_processes(&context.id).await?;
    let process = matcher::find(&conf.process, &processes)
        .ok_or_else(|| SyncError::LookupFailure(format!("process '{}' not found", conf.process)))?;

    let steps = workflow.get_steps_from_process(&process.id, &context.id).await?;
    let step = |name: &str| {
        matcher::find(name, &steps)
            .map(|s| s.id.clone())
            .ok_or_else(|| SyncError::LookupFailure(format!("step '{name}' not found in '{}'", conf.process)))
    };

    Ok(TicketScope {
        raised_step: step(&conf.raised_step)?,
        solved_step: step(&conf.solved_step)?,
        process: process.id.clone(),
        template: context.id.clone(),
        context: context.id,
    })
}

async fn resolve_bim(graph: &dyn GraphGateway, conf: &BimConf) -> Result<BimScope> {
    let context = context_named(graph, &conf.context).await?;
    let category = child_named(graph, &context, relations::CATEGORY, &conf.category).await?;
    let group = child_named(graph, &category, relations::GROUP, &conf.group).await?;
    Ok(BimScope {
        group: group.id,
        reference_category: conf.reference_category.clone(),
        reference_attribute: conf.reference_attribute.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BimConf, TicketConf};
    use crate::ports::memory::bootstrap_memory_backend;

    #[tokio::test]
    async fn test_resolve_full_topology() {
        let cfg = SyncConfig {
            tickets: Some(TicketConf::default()),
            bim: Some(BimConf::default()),
            ..SyncConfig::default()
        };
        let backend = bootstrap_memory_backend(&cfg);

        let ctx = SyncContexts::resolve(backend.graph.as_ref(), backend.workflow.as_ref(), &cfg)
            .await
            .unwrap();
        assert_eq!(ctx.network.virtual_network.id, backend.topology.virtual_network);
        let tickets = ctx.tickets.unwrap();
        assert_eq!(Some(tickets.raised_step), backend.topology.raised_step);
        assert_eq!(Some(tickets.solved_step), backend.topology.solved_step);
        assert_eq!(Some(ctx.bim.unwrap().group), backend.topology.bim_group);
    }

    #[tokio::test]
    async fn test_missing_virtual_network_is_lookup_failure() {
        let backend = bootstrap_memory_backend(&SyncConfig::default());
        let mut cfg = SyncConfig::default();
        cfg.graph.virtual_network = "Elsewhere".into();

        let err = SyncContexts::resolve(backend.graph.as_ref(), backend.workflow.as_ref(), &cfg)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::LookupFailure(_)));
    }

    #[tokio::test]
    async fn test_missing_step_is_lookup_failure() {
        let seeded = SyncConfig {
            tickets: Some(TicketConf::default()),
            ..SyncConfig::default()
        };
        let backend = bootstrap_memory_backend(&seeded);
        let mut cfg = seeded.clone();
        if let Some(t) = cfg.tickets.as_mut() {
            t.solved_step = "Closed".into();
        }

        let err = SyncContexts::resolve(backend.graph.as_ref(), backend.workflow.as_ref(), &cfg)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::LookupFailure(msg) if msg.contains("Closed")));
    }
}
