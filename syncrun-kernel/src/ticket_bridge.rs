/**
 * NOTIFICATION → TICKET BRIDGE - Cycle de vie Raised → Solved piloté par le flux
 *
 * RÔLE :
 * Compare les notifications du poll aux tickets ouverts d'un process :
 * ouvre un ticket par notification nouvelle, fait avancer ceux dont la
 * notification a disparu, rattache les nouveaux tickets aux objets BIM concernés.
 *
 * FONCTIONNEMENT :
 * 1. Snapshot des tickets Raised (et Solved) avant toute écriture
 * 2. Passe de création : absent → Raised, présent → ignoré, doublon intra-batch → ignoré
 * 3. Liens BIM : fragments `PREFIX-alphanum` du nom d'asset ↔ attribut de référence des objets
 * 4. Passe d'avancement : un ticket du snapshot absent du batch passe à l'étape suivante
 *
 * ÉCHECS :
 * - Appel workflow en échec → erreur de cycle (backoff)
 * - Lien BIM en échec → warning seulement
 * - Nom de ticket non découpable → compté "malformed", laissé en place
 */

use crate::contexts::{BimScope, TicketScope};
use crate::error::Result;
use crate::matcher;
use crate::models::ExternalNotification;
use crate::naming;
use crate::ports::{relations, GraphGateway, NodeId, TicketInfo, TicketRef, TicketWorkflow};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BridgeReport {
    pub created: usize,
    pub skipped: usize,
    pub advanced: usize,
    pub links: usize,
    pub malformed: usize,
}

/// Référence BIM → objets, construit au premier besoin dans un cycle
struct BimIndex {
    by_reference: HashMap<String, Vec<NodeId>>,
}

impl BimIndex {
    async fn build(graph: &dyn GraphGateway, bim: &BimScope) -> Result<Self> {
        let objects = graph.get_children(&bim.group, &[relations::GROUP_OBJECT]).await?;
        let mut by_reference: HashMap<String, Vec<NodeId>> = HashMap::new();

        for object in objects {
            let reference = graph
                .get_attribute(&object.id, &bim.reference_category, &bim.reference_attribute)
                .await?;
            if let Some(reference) = reference {
                by_reference.entry(reference).or_default().push(object.id);
            }
        }

        tracing::debug!("[tickets] BIM index built ({} references)", by_reference.len());
        Ok(Self { by_reference })
    }

    fn matches<'a>(&'a self, fragments: &'a [String]) -> impl Iterator<Item = &'a NodeId> + 'a {
        fragments
            .iter()
            .filter_map(|f| self.by_reference.get(f))
            .flatten()
    }
}

pub struct NotificationTicketBridge {
    graph: Arc<dyn GraphGateway>,
    workflow: Arc<dyn TicketWorkflow>,
}

impl NotificationTicketBridge {
    pub fn new(graph: Arc<dyn GraphGateway>, workflow: Arc<dyn TicketWorkflow>) -> Self {
        Self { graph, workflow }
    }

    pub async fn sync(
        &self,
        scope: &TicketScope,
        bim: Option<&BimScope>,
        notifications: &[ExternalNotification],
    ) -> Result<BridgeReport> {
        let raised = self.workflow.get_tickets_from_step(&scope.raised_step).await?;
        let solved = self.workflow.get_tickets_from_step(&scope.solved_step).await?;
        let mut report = BridgeReport::default();

        self.creation_pass(scope, bim, notifications, &raised, &solved, &mut report)
            .await?;

        let present: HashSet<String> = notifications.iter().map(|n| n.ticket_identity()).collect();
        self.advancement_pass(scope, &raised, &present, &mut report).await?;

        Ok(report)
    }

    async fn creation_pass(
        &self,
        scope: &TicketScope,
        bim: Option<&BimScope>,
        notifications: &[ExternalNotification],
        raised: &[TicketRef],
        solved: &[TicketRef],
        report: &mut BridgeReport,
    ) -> Result<()> {
        let mut opened: HashSet<String> = HashSet::new();
        let mut index: Option<BimIndex> = None;

        for notification in notifications {
            let identity = notification.ticket_identity();

            if matcher::find(&identity, raised).is_some() || !opened.insert(identity.clone()) {
                report.skipped += 1;
                continue;
            }
            if matcher::find(&identity, solved).is_some() {
                tracing::debug!("[tickets] {identity} was solved before, opening a new ticket");
            }

            let info = TicketInfo {
                name: identity.clone(),
                date: notification.date.clone(),
                client_name: notification.client_name.clone(),
                entity_class: notification.entity.class.clone(),
            };
            let ticket = self
                .workflow
                .add_ticket(info, &scope.process, &scope.context, &scope.template, &notification.kind)
                .await?;
            report.created += 1;
            tracing::info!("[tickets] opened {identity}");

            if let Some(bim) = bim {
                report.links += self.link_ticket(&ticket, notification, bim, &mut index).await;
            }
        }
        Ok(())
    }

    /// Rattache le ticket aux objets BIM ; renvoie le nombre de liens posés
    async fn link_ticket(
        &self,
        ticket: &NodeId,
        notification: &ExternalNotification,
        bim: &BimScope,
        index: &mut Option<BimIndex>,
    ) -> usize {
        let fragments = naming::asset_name_fragments(&notification.entity.asset.name);
        if fragments.is_empty() {
            tracing::debug!(
                "[tickets] no link target in asset name '{}'",
                notification.entity.asset.name
            );
            return 0;
        }

        if index.is_none() {
            match BimIndex::build(self.graph.as_ref(), bim).await {
                Ok(built) => *index = Some(built),
                Err(e) => {
                    tracing::warn!("[tickets] BIM index unavailable: {e}");
                    return 0;
                }
            }
        }
        let Some(index) = index.as_ref() else {
            return 0;
        };

        let mut links = 0;
        for object in index.matches(&fragments) {
            match self.graph.add_child(ticket, object, relations::TICKET_LINK).await {
                Ok(()) => links += 1,
                Err(e) => tracing::warn!("[tickets] failed to link ticket {ticket} to {object}: {e}"),
            }
        }
        links
    }

    async fn advancement_pass(
        &self,
        scope: &TicketScope,
        raised: &[TicketRef],
        present: &HashSet<String>,
        report: &mut BridgeReport,
    ) -> Result<()> {
        for ticket in raised {
            let Some((kind, asset_id)) = naming::split_ticket_identity(&ticket.name) else {
                tracing::warn!("[tickets] cannot read identity of ticket '{}'", ticket.name);
                report.malformed += 1;
                continue;
            };

            let identity = naming::ticket_identity(kind, &asset_id.into());
            if present.contains(&identity) {
                continue;
            }

            self.workflow
                .move_ticket_to_next_step(&scope.context, &scope.process, &ticket.id)
                .await?;
            report.advanced += 1;
            tracing::info!("[tickets] {} moved to next step", ticket.name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bim_index_matches_every_fragment() {
        let index = BimIndex {
            by_reference: HashMap::from([
                ("SACD-E01".to_string(), vec![NodeId::from("o1")]),
                ("SACD-E02".to_string(), vec![NodeId::from("o2"), NodeId::from("o3")]),
            ]),
        };
        let fragments = vec!["SACD-E01".to_string(), "SACD-E02".to_string(), "SACD-E09".to_string()];
        let hits: Vec<&str> = index.matches(&fragments).map(|id| id.as_str()).collect();
        assert_eq!(hits, vec!["o1", "o2", "o3"]);
    }
}
