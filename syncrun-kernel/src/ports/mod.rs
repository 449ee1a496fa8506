/**
 * PORTS COLLABORATEURS - Interfaces consommées par le moteur de synchronisation
 *
 * RÔLE :
 * Ce module définit les contrats des systèmes externes que le cœur appelle
 * sans les concevoir : graphe (nœuds, relations, attributs), séries temporelles,
 * workflow de tickets.
 *
 * FONCTIONNEMENT :
 * - GraphGateway = lookup/création de nœuds, arêtes parent-enfant, attributs
 * - TimeseriesStore = historique append-only par endpoint
 * - TicketWorkflow = process à étapes nommées, tickets assignés à une étape
 * - PortError = échec d'un appel collaborateur (traité en backoff au niveau cycle)
 *
 * UTILITÉ :
 * 🎯 Découplage : le réconciliateur et le pont ne connaissent que ces traits
 * 🎯 Tests : implémentations mémoire dans `memory`
 */

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Relations du graphe manipulées par le cœur
pub mod relations {
    pub const BMS_NETWORK: &str = "hasBmsNetwork";
    pub const BMS_DEVICE: &str = "hasBmsDevice";
    pub const BMS_ENDPOINT: &str = "hasBmsEndpoint";
    pub const CATEGORY: &str = "hasCategory";
    pub const GROUP: &str = "hasGroup";
    pub const GROUP_OBJECT: &str = "groupHasBIMObject";
    pub const TICKET_LINK: &str = "SpinalSystemServiceTicketHasTicket";
}

/// Types de nœuds créés par le cœur
pub mod node_types {
    pub const DEVICE: &str = "BmsDevice";
    pub const ENDPOINT: &str = "BmsEndpoint";
}

/// Erreurs possibles lors d'un appel à un collaborateur
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Node not found: {0}")]
    NotFound(String),
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// Référence transitoire vers un nœud du graphe (le graphe reste propriétaire)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRef {
    pub id: NodeId,
    pub name: String,
    pub node_type: String,
}

/// Description d'un nœud à créer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub name: String,
    pub node_type: String,
    pub value: Option<EndpointValue>,
    pub unit: Option<String>,
}

impl NodeDescriptor {
    pub fn device(name: &str) -> Self {
        Self {
            name: name.to_string(),
            node_type: node_types::DEVICE.to_string(),
            value: None,
            unit: None,
        }
    }

    pub fn endpoint(name: &str, value: EndpointValue, unit: Option<String>) -> Self {
        Self {
            name: name.to_string(),
            node_type: node_types::ENDPOINT.to_string(),
            value: Some(value),
            unit,
        }
    }
}

/// Valeur courante d'un endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndpointValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl fmt::Display for EndpointValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointValue::Number(n) => write!(f, "{n}"),
            EndpointValue::Bool(b) => write!(f, "{b}"),
            EndpointValue::Text(s) => f.write_str(s),
        }
    }
}

/// Attribut rangé par catégorie + nom
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub category: String,
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(category: &str, name: &str, value: impl Into<String>) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: NodeId,
    pub name: String,
    pub order: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRef {
    pub id: NodeId,
    pub name: String,
}

/// Métadonnées posées sur un ticket à sa création
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketInfo {
    pub name: String,
    pub date: Option<String>,
    pub client_name: Option<String>,
    pub entity_class: Option<String>,
}

#[async_trait]
pub trait GraphGateway: Send + Sync {
    /// Contexte racine par nom
    async fn get_context(&self, name: &str) -> Result<Option<NodeRef>, PortError>;

    /// Enfants directs via l'une des relations données
    async fn get_children(&self, parent: &NodeId, relations: &[&str]) -> Result<Vec<NodeRef>, PortError>;

    async fn create_node(&self, descriptor: NodeDescriptor) -> Result<NodeId, PortError>;

    async fn add_child(&self, parent: &NodeId, child: &NodeId, relation: &str) -> Result<(), PortError>;

    async fn get_real_node(&self, id: &NodeId) -> Result<NodeRef, PortError>;

    /// Écrit un lot d'attributs (création ou mise à jour)
    async fn add_attributes(&self, node: &NodeId, attributes: Vec<Attribute>) -> Result<(), PortError>;

    async fn get_attribute(&self, node: &NodeId, category: &str, name: &str) -> Result<Option<String>, PortError>;

    async fn set_endpoint_value(&self, endpoint: &NodeId, value: EndpointValue) -> Result<(), PortError>;
}

#[async_trait]
pub trait TimeseriesStore: Send + Sync {
    async fn push_from_endpoint(&self, endpoint: &NodeId, value: f64) -> Result<(), PortError>;
}

#[async_trait]
pub trait TicketWorkflow: Send + Sync {
    async fn get_processes(&self, context_id: &NodeId) -> Result<Vec<NodeRef>, PortError>;

    async fn get_steps_from_process(&self, process_id: &NodeId, context_id: &NodeId) -> Result<Vec<WorkflowStep>, PortError>;

    async fn get_tickets_from_step(&self, step_id: &NodeId) -> Result<Vec<TicketRef>, PortError>;

    /// Crée le ticket dans la première étape du process
    async fn add_ticket(
        &self,
        info: TicketInfo,
        process_id: &NodeId,
        context_id: &NodeId,
        template_id: &NodeId,
        kind: &str,
    ) -> Result<NodeId, PortError>;

    async fn move_ticket_to_next_step(&self, context_id: &NodeId, process_id: &NodeId, ticket_id: &NodeId) -> Result<(), PortError>;
}
