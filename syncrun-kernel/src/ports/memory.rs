/**
 * COLLABORATEURS MÉMOIRE - Graphe, séries temporelles et workflow tickets en RAM
 *
 * RÔLE :
 * Implémentations des ports utilisées par le binaire en mode autonome et par les tests.
 * Aucune persistance : tout vit dans des maps protégées par `parking_lot::Mutex`.
 *
 * FONCTIONNEMENT :
 * - MemoryGraph : nœuds + arêtes typées + attributs (catégorie, nom)
 * - MemoryTimeseries : Vec<f64> par endpoint, append-only
 * - MemoryWorkflow : process → étapes ordonnées → tickets
 * - bootstrap_memory_backend : sème contextes, réseau virtuel, process et étapes configurés
 *
 * UTILITÉ :
 * 🎯 Mode standalone : le moteur tourne sans plateforme graphe distante
 * 🎯 Tests : helpers d'inspection (valeurs, attributs, pushes, tickets par étape)
 */

use super::{
    relations, Attribute, EndpointValue, GraphGateway, NodeDescriptor, NodeId, NodeRef, PortError,
    TicketInfo, TicketRef, TicketWorkflow, TimeseriesStore, WorkflowStep,
};
use crate::config::SyncConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

pub const CONTEXT_TYPE: &str = "context";
pub const NETWORK_TYPE: &str = "BmsNetwork";
pub const CATEGORY_TYPE: &str = "category";
pub const GROUP_TYPE: &str = "group";
pub const BIM_OBJECT_TYPE: &str = "BIMObject";
pub const TICKET_TYPE: &str = "SpinalSystemServiceTicket";

#[derive(Debug, Clone)]
struct NodeRecord {
    name: String,
    node_type: String,
    value: Option<EndpointValue>,
    unit: Option<String>,
}

#[derive(Debug, Default)]
struct GraphInner {
    nodes: HashMap<NodeId, NodeRecord>,
    /// (parent, relation) → enfants dans l'ordre d'insertion
    edges: HashMap<(NodeId, String), Vec<NodeId>>,
    attributes: HashMap<NodeId, Vec<Attribute>>,
    contexts: Vec<NodeId>,
}

/// Graphe en mémoire
#[derive(Debug, Default)]
pub struct MemoryGraph {
    inner: Mutex<GraphInner>,
    created: AtomicUsize,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, name: &str, node_type: &str, value: Option<EndpointValue>, unit: Option<String>) -> NodeId {
        let id = NodeId(Uuid::new_v4().to_string());
        self.inner.lock().nodes.insert(
            id.clone(),
            NodeRecord {
                name: name.to_string(),
                node_type: node_type.to_string(),
                value,
                unit,
            },
        );
        id
    }

    fn link(&self, parent: &NodeId, child: &NodeId, relation: &str) {
        let mut inner = self.inner.lock();
        let children = inner
            .edges
            .entry((parent.clone(), relation.to_string()))
            .or_default();
        if !children.contains(child) {
            children.push(child.clone());
        }
    }

    /// Sème un contexte racine
    pub fn seed_context(&self, name: &str) -> NodeId {
        let id = self.insert(name, CONTEXT_TYPE, None, None);
        self.inner.lock().contexts.push(id.clone());
        id
    }

    /// Sème un nœud enfant (hors compteur de créations)
    pub fn seed_child(&self, parent: &NodeId, name: &str, node_type: &str, relation: &str) -> NodeId {
        let id = self.insert(name, node_type, None, None);
        self.link(parent, &id, relation);
        id
    }

    /// Enregistre un nœud créé ailleurs (ticket du workflow) sous un id imposé
    pub fn register_node(&self, id: NodeId, name: &str, node_type: &str) {
        self.inner.lock().nodes.insert(
            id,
            NodeRecord {
                name: name.to_string(),
                node_type: node_type.to_string(),
                value: None,
                unit: None,
            },
        );
    }

    pub fn seed_attribute(&self, node: &NodeId, attribute: Attribute) {
        upsert_attribute(self.inner.lock().attributes.entry(node.clone()).or_default(), attribute);
    }

    /// Nombre de `create_node` reçus depuis la construction
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn children(&self, parent: &NodeId, relation: &str) -> Vec<NodeRef> {
        let inner = self.inner.lock();
        inner
            .edges
            .get(&(parent.clone(), relation.to_string()))
            .map(|ids| ids.iter().filter_map(|id| node_ref(&inner, id)).collect())
            .unwrap_or_default()
    }

    /// Premier enfant portant ce nom
    pub fn child_named(&self, parent: &NodeId, relation: &str, name: &str) -> Option<NodeRef> {
        self.children(parent, relation).into_iter().find(|n| n.name == name)
    }

    pub fn value_of(&self, node: &NodeId) -> Option<EndpointValue> {
        self.inner.lock().nodes.get(node).and_then(|n| n.value.clone())
    }

    pub fn unit_of(&self, node: &NodeId) -> Option<String> {
        self.inner.lock().nodes.get(node).and_then(|n| n.unit.clone())
    }

    pub fn attribute(&self, node: &NodeId, category: &str, name: &str) -> Option<String> {
        self.inner
            .lock()
            .attributes
            .get(node)
            .and_then(|attrs| attrs.iter().find(|a| a.category == category && a.name == name))
            .map(|a| a.value.clone())
    }
}

fn node_ref(inner: &GraphInner, id: &NodeId) -> Option<NodeRef> {
    inner.nodes.get(id).map(|n| NodeRef {
        id: id.clone(),
        name: n.name.clone(),
        node_type: n.node_type.clone(),
    })
}

fn upsert_attribute(attrs: &mut Vec<Attribute>, attribute: Attribute) {
    match attrs
        .iter_mut()
        .find(|a| a.category == attribute.category && a.name == attribute.name)
    {
        Some(existing) => existing.value = attribute.value,
        None => attrs.push(attribute),
    }
}

#[async_trait]
impl GraphGateway for MemoryGraph {
    async fn get_context(&self, name: &str) -> Result<Option<NodeRef>, PortError> {
        let inner = self.inner.lock();
        Ok(inner
            .contexts
            .iter()
            .filter_map(|id| node_ref(&inner, id))
            .find(|n| n.name == name))
    }

    async fn get_children(&self, parent: &NodeId, relations: &[&str]) -> Result<Vec<NodeRef>, PortError> {
        let inner = self.inner.lock();
        if !inner.nodes.contains_key(parent) {
            return Err(PortError::NotFound(parent.to_string()));
        }
        Ok(relations
            .iter()
            .filter_map(|rel| inner.edges.get(&(parent.clone(), rel.to_string())))
            .flatten()
            .filter_map(|id| node_ref(&inner, id))
            .collect())
    }

    async fn create_node(&self, descriptor: NodeDescriptor) -> Result<NodeId, PortError> {
        if descriptor.name.is_empty() {
            return Err(PortError::Rejected("node name is empty".into()));
        }
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(self.insert(&descriptor.name, &descriptor.node_type, descriptor.value, descriptor.unit))
    }

    async fn add_child(&self, parent: &NodeId, child: &NodeId, relation: &str) -> Result<(), PortError> {
        {
            let inner = self.inner.lock();
            for id in [parent, child] {
                if !inner.nodes.contains_key(id) {
                    return Err(PortError::NotFound(id.to_string()));
                }
            }
        }
        self.link(parent, child, relation);
        Ok(())
    }

    async fn get_real_node(&self, id: &NodeId) -> Result<NodeRef, PortError> {
        let inner = self.inner.lock();
        node_ref(&inner, id).ok_or_else(|| PortError::NotFound(id.to_string()))
    }

    async fn add_attributes(&self, node: &NodeId, attributes: Vec<Attribute>) -> Result<(), PortError> {
        let mut inner = self.inner.lock();
        if !inner.nodes.contains_key(node) {
            return Err(PortError::NotFound(node.to_string()));
        }
        let attrs = inner.attributes.entry(node.clone()).or_default();
        for attribute in attributes {
            upsert_attribute(attrs, attribute);
        }
        Ok(())
    }

    async fn get_attribute(&self, node: &NodeId, category: &str, name: &str) -> Result<Option<String>, PortError> {
        Ok(self.attribute(node, category, name))
    }

    async fn set_endpoint_value(&self, endpoint: &NodeId, value: EndpointValue) -> Result<(), PortError> {
        let mut inner = self.inner.lock();
        let record = inner
            .nodes
            .get_mut(endpoint)
            .ok_or_else(|| PortError::NotFound(endpoint.to_string()))?;
        record.value = Some(value);
        Ok(())
    }
}

/// Historique des valeurs par endpoint
#[derive(Debug, Default)]
pub struct MemoryTimeseries {
    series: Mutex<HashMap<NodeId, Vec<f64>>>,
}

impl MemoryTimeseries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn series(&self, endpoint: &NodeId) -> Vec<f64> {
        self.series.lock().get(endpoint).cloned().unwrap_or_default()
    }

    pub fn total_pushes(&self) -> usize {
        self.series.lock().values().map(Vec::len).sum()
    }
}

#[async_trait]
impl TimeseriesStore for MemoryTimeseries {
    async fn push_from_endpoint(&self, endpoint: &NodeId, value: f64) -> Result<(), PortError> {
        self.series.lock().entry(endpoint.clone()).or_default().push(value);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct TicketRecord {
    info: TicketInfo,
    kind: String,
    template: NodeId,
    process: NodeId,
    step: NodeId,
}

#[derive(Debug, Default)]
struct WorkflowInner {
    processes: HashMap<NodeId, Vec<NodeRef>>,
    steps: HashMap<NodeId, Vec<WorkflowStep>>,
    tickets: HashMap<NodeId, TicketRecord>,
    /// Ordre d'arrivée des tickets, pour des listings stables
    order: Vec<NodeId>,
}

/// Workflow tickets : process à étapes ordonnées, un ticket = une étape
#[derive(Debug, Default)]
pub struct MemoryWorkflow {
    inner: Mutex<WorkflowInner>,
    /// Graphe où les tickets sont aussi enregistrés comme nœuds (liens BIM)
    graph: Option<Arc<MemoryGraph>>,
}

impl MemoryWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached(graph: Arc<MemoryGraph>) -> Self {
        Self {
            inner: Mutex::new(WorkflowInner::default()),
            graph: Some(graph),
        }
    }

    pub fn seed_process(&self, context: &NodeId, name: &str) -> NodeId {
        let id = NodeId(Uuid::new_v4().to_string());
        self.inner.lock().processes.entry(context.clone()).or_default().push(NodeRef {
            id: id.clone(),
            name: name.to_string(),
            node_type: "process".to_string(),
        });
        id
    }

    pub fn seed_step(&self, process: &NodeId, name: &str, order: u32) -> NodeId {
        let id = NodeId(Uuid::new_v4().to_string());
        let mut inner = self.inner.lock();
        let steps = inner.steps.entry(process.clone()).or_default();
        steps.push(WorkflowStep {
            id: id.clone(),
            name: name.to_string(),
            order,
        });
        steps.sort_by_key(|s| s.order);
        id
    }

    /// Noms des tickets présents dans l'étape, dans l'ordre de création
    pub fn ticket_names_in_step(&self, step: &NodeId) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|id| inner.tickets.get(id))
            .filter(|t| &t.step == step)
            .map(|t| t.info.name.clone())
            .collect()
    }

    pub fn ticket_info(&self, ticket: &NodeId) -> Option<TicketInfo> {
        self.inner.lock().tickets.get(ticket).map(|t| t.info.clone())
    }

    pub fn ticket_kind(&self, ticket: &NodeId) -> Option<String> {
        self.inner.lock().tickets.get(ticket).map(|t| t.kind.clone())
    }

    pub fn ticket_template(&self, ticket: &NodeId) -> Option<NodeId> {
        self.inner.lock().tickets.get(ticket).map(|t| t.template.clone())
    }

    pub fn ticket_count(&self) -> usize {
        self.inner.lock().tickets.len()
    }
}

#[async_trait]
impl TicketWorkflow for MemoryWorkflow {
    async fn get_processes(&self, context_id: &NodeId) -> Result<Vec<NodeRef>, PortError> {
        Ok(self.inner.lock().processes.get(context_id).cloned().unwrap_or_default())
    }

    async fn get_steps_from_process(&self, process_id: &NodeId, context_id: &NodeId) -> Result<Vec<WorkflowStep>, PortError> {
        let inner = self.inner.lock();
        let known = inner
            .processes
            .get(context_id)
            .is_some_and(|ps| ps.iter().any(|p| &p.id == process_id));
        if !known {
            return Err(PortError::NotFound(format!("process {process_id} in context {context_id}")));
        }
        Ok(inner.steps.get(process_id).cloned().unwrap_or_default())
    }

    async fn get_tickets_from_step(&self, step_id: &NodeId) -> Result<Vec<TicketRef>, PortError> {
        let inner = self.inner.lock();
        Ok(inner
            .order
            .iter()
            .filter_map(|id| inner.tickets.get(id).map(|t| (id, t)))
            .filter(|(_, t)| &t.step == step_id)
            .map(|(id, t)| TicketRef {
                id: id.clone(),
                name: t.info.name.clone(),
            })
            .collect())
    }

    async fn add_ticket(
        &self,
        info: TicketInfo,
        process_id: &NodeId,
        _context_id: &NodeId,
        template_id: &NodeId,
        kind: &str,
    ) -> Result<NodeId, PortError> {
        let mut inner = self.inner.lock();
        let first = inner
            .steps
            .get(process_id)
            .and_then(|steps| steps.first())
            .ok_or_else(|| PortError::Rejected(format!("process {process_id} has no step")))?
            .id
            .clone();

        let id = NodeId(Uuid::new_v4().to_string());
        if let Some(graph) = &self.graph {
            graph.register_node(id.clone(), &info.name, TICKET_TYPE);
        }
        inner.tickets.insert(
            id.clone(),
            TicketRecord {
                info,
                kind: kind.to_string(),
                template: template_id.clone(),
                process: process_id.clone(),
                step: first,
            },
        );
        inner.order.push(id.clone());
        Ok(id)
    }

    async fn move_ticket_to_next_step(&self, _context_id: &NodeId, process_id: &NodeId, ticket_id: &NodeId) -> Result<(), PortError> {
        let mut inner = self.inner.lock();
        let current = inner
            .tickets
            .get(ticket_id)
            .filter(|t| &t.process == process_id)
            .map(|t| t.step.clone())
            .ok_or_else(|| PortError::NotFound(ticket_id.to_string()))?;

        let next = inner
            .steps
            .get(process_id)
            .and_then(|steps| {
                let pos = steps.iter().position(|s| s.id == current)?;
                steps.get(pos + 1)
            })
            .map(|s| s.id.clone())
            .ok_or_else(|| PortError::Rejected(format!("ticket {ticket_id} is already in the last step")))?;

        if let Some(ticket) = inner.tickets.get_mut(ticket_id) {
            ticket.step = next;
        }
        Ok(())
    }
}

/// Identifiants des nœuds semés par `bootstrap_memory_backend`
#[derive(Debug, Clone)]
pub struct SeededTopology {
    pub network_context: NodeId,
    pub virtual_network: NodeId,
    pub ticket_context: Option<NodeId>,
    pub ticket_process: Option<NodeId>,
    pub raised_step: Option<NodeId>,
    pub solved_step: Option<NodeId>,
    pub bim_context: Option<NodeId>,
    pub bim_group: Option<NodeId>,
}

/// Collaborateurs mémoire partagés
#[derive(Clone)]
pub struct MemoryBackend {
    pub graph: Arc<MemoryGraph>,
    pub timeseries: Arc<MemoryTimeseries>,
    pub workflow: Arc<MemoryWorkflow>,
    pub topology: SeededTopology,
}

/// Crée les collaborateurs mémoire et sème la topologie décrite par la config
pub fn bootstrap_memory_backend(cfg: &SyncConfig) -> MemoryBackend {
    let graph = Arc::new(MemoryGraph::new());
    let timeseries = Arc::new(MemoryTimeseries::new());
    let workflow = Arc::new(MemoryWorkflow::attached(graph.clone()));

    let network_context = graph.seed_context(&cfg.graph.network_context);
    let virtual_network = graph.seed_child(
        &network_context,
        &cfg.graph.virtual_network,
        NETWORK_TYPE,
        relations::BMS_NETWORK,
    );

    let mut topology = SeededTopology {
        network_context,
        virtual_network,
        ticket_context: None,
        ticket_process: None,
        raised_step: None,
        solved_step: None,
        bim_context: None,
        bim_group: None,
    };

    if let Some(tickets) = &cfg.tickets {
        let context = graph.seed_context(&tickets.context);
        let process = workflow.seed_process(&context, &tickets.process);
        topology.raised_step = Some(workflow.seed_step(&process, &tickets.raised_step, 0));
        topology.solved_step = Some(workflow.seed_step(&process, &tickets.solved_step, 1));
        topology.ticket_context = Some(context);
        topology.ticket_process = Some(process);
    }

    if let Some(bim) = &cfg.bim {
        let context = graph.seed_context(&bim.context);
        let category = graph.seed_child(&context, &bim.category, CATEGORY_TYPE, relations::CATEGORY);
        let group = graph.seed_child(&category, &bim.group, GROUP_TYPE, relations::GROUP);
        topology.bim_context = Some(context);
        topology.bim_group = Some(group);
    }

    tracing::info!(
        "[memory] seeded topology (tickets: {}, bim: {})",
        topology.ticket_process.is_some(),
        topology.bim_group.is_some()
    );

    MemoryBackend {
        graph,
        timeseries,
        workflow,
        topology,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_graph_create_and_lookup() {
        let graph = MemoryGraph::new();
        let ctx = graph.seed_context("Network");
        let dev = graph.create_node(NodeDescriptor::device("D1")).await.unwrap();
        graph.add_child(&ctx, &dev, relations::BMS_DEVICE).await.unwrap();

        let children = graph.get_children(&ctx, &[relations::BMS_DEVICE]).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "D1");
        assert_eq!(graph.created_count(), 1);
        assert!(graph.get_context("Network").await.unwrap().is_some());
        assert!(graph.get_context("Other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_attributes_are_upserted() {
        let graph = MemoryGraph::new();
        let node = graph.seed_context("ctx");
        graph
            .add_attributes(&node, vec![Attribute::new("Asset", "Name", "A")])
            .await
            .unwrap();
        graph
            .add_attributes(&node, vec![Attribute::new("Asset", "Name", "B")])
            .await
            .unwrap();
        assert_eq!(graph.get_attribute(&node, "Asset", "Name").await.unwrap().as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_workflow_moves_one_step_forward() {
        let wf = MemoryWorkflow::new();
        let ctx = NodeId::from("ctx");
        let process = wf.seed_process(&ctx, "Alarms");
        let raised = wf.seed_step(&process, "Raised", 0);
        let solved = wf.seed_step(&process, "Solved", 1);

        let info = TicketInfo {
            name: "alarm-9".into(),
            date: None,
            client_name: None,
            entity_class: None,
        };
        let ticket = wf.add_ticket(info, &process, &ctx, &ctx, "alarm").await.unwrap();
        assert_eq!(wf.ticket_names_in_step(&raised), vec!["alarm-9"]);

        wf.move_ticket_to_next_step(&ctx, &process, &ticket).await.unwrap();
        assert!(wf.ticket_names_in_step(&raised).is_empty());
        assert_eq!(wf.ticket_names_in_step(&solved), vec!["alarm-9"]);

        assert!(wf.move_ticket_to_next_step(&ctx, &process, &ticket).await.is_err());
    }
}
