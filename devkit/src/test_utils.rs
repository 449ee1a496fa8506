/*!
Test Harness pour le moteur de synchronisation

Câble des collaborateurs mémoire sur une topologie semée (réseau virtuel,
process tickets Raised/Solved, groupe BIM) et expose:
- les composants du kernel prêts à l'emploi (réconciliateur, pont, orchestrateur)
- des assertions sur le graphe, les séries temporelles et les tickets
*/

use crate::fault_injection::FaultyGraph;
use crate::stub_source::StubSource;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use syncrun_kernel::config::{BimConf, SyncConfig, TicketConf};
use syncrun_kernel::ports::memory::{bootstrap_memory_backend, MemoryBackend, BIM_OBJECT_TYPE};
use syncrun_kernel::ports::{relations, Attribute, EndpointValue, GraphGateway, NodeId, NodeRef};
use syncrun_kernel::{AssetReconciler, NotificationTicketBridge, SyncContexts, SyncOrchestrator};

/// Harness de test complet pour le moteur de synchronisation
pub struct TestHarness {
    pub config: SyncConfig,
    pub backend: MemoryBackend,
    pub graph: Arc<FaultyGraph>,
    pub source: StubSource,
}

impl TestHarness {
    /// Topologie complète : réseau, tickets et BIM
    pub fn new() -> Self {
        Self::with_config(SyncConfig {
            tickets: Some(TicketConf::default()),
            bim: Some(BimConf::default()),
            ..SyncConfig::default()
        })
    }

    pub fn with_config(config: SyncConfig) -> Self {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("syncrun_kernel=debug"))
            .with_test_writer()
            .try_init()
            .ok();

        let backend = bootstrap_memory_backend(&config);
        let graph = Arc::new(FaultyGraph::wrap(backend.graph.clone()));
        Self {
            config,
            backend,
            graph,
            source: StubSource::new(),
        }
    }

    pub fn reconciler(&self) -> AssetReconciler {
        AssetReconciler::new(
            self.graph.clone(),
            self.backend.timeseries.clone(),
            &self.config.fan_out,
            self.config.retention_days,
        )
    }

    pub fn bridge(&self) -> NotificationTicketBridge {
        NotificationTicketBridge::new(self.graph.clone(), self.backend.workflow.clone())
    }

    pub fn orchestrator(&self) -> Arc<SyncOrchestrator> {
        Arc::new(SyncOrchestrator::new(
            self.config.clone(),
            Arc::new(self.source.clone()),
            self.graph.clone(),
            self.backend.timeseries.clone(),
            self.backend.workflow.clone(),
        ))
    }

    pub async fn contexts(&self) -> Result<SyncContexts> {
        Ok(SyncContexts::resolve(self.graph.as_ref(), self.backend.workflow.as_ref(), &self.config).await?)
    }

    /// Sème un objet BIM portant la référence donnée dans le groupe configuré
    pub fn seed_bim_object(&self, name: &str, reference: &str) -> Result<NodeId> {
        let group = self
            .backend
            .topology
            .bim_group
            .clone()
            .ok_or_else(|| anyhow!("no BIM group in this topology"))?;
        let bim = self.config.bim.as_ref().ok_or_else(|| anyhow!("no BIM config"))?;

        let graph = &self.backend.graph;
        let object = graph.seed_child(&group, name, BIM_OBJECT_TYPE, relations::GROUP_OBJECT);
        graph.seed_attribute(
            &object,
            Attribute::new(&bim.reference_category, &bim.reference_attribute, reference),
        );
        Ok(object)
    }

    pub fn device(&self, dev_id: &str) -> Option<NodeRef> {
        self.backend
            .graph
            .child_named(&self.backend.topology.virtual_network, relations::BMS_DEVICE, dev_id)
    }

    pub fn devices(&self) -> Vec<NodeRef> {
        self.backend
            .graph
            .children(&self.backend.topology.virtual_network, relations::BMS_DEVICE)
    }

    pub fn endpoint(&self, dev_id: &str, name: &str) -> Option<NodeRef> {
        let device = self.device(dev_id)?;
        self.backend
            .graph
            .child_named(&device.id, relations::BMS_ENDPOINT, name)
    }

    pub fn endpoints(&self, dev_id: &str) -> Vec<NodeRef> {
        self.device(dev_id)
            .map(|d| self.backend.graph.children(&d.id, relations::BMS_ENDPOINT))
            .unwrap_or_default()
    }

    pub fn endpoint_value(&self, dev_id: &str, name: &str) -> Option<EndpointValue> {
        self.endpoint(dev_id, name)
            .and_then(|e| self.backend.graph.value_of(&e.id))
    }

    pub fn series(&self, dev_id: &str, name: &str) -> Vec<f64> {
        self.endpoint(dev_id, name)
            .map(|e| self.backend.timeseries.series(&e.id))
            .unwrap_or_default()
    }

    pub fn attribute(&self, node: &NodeId, category: &str, name: &str) -> Option<String> {
        self.backend.graph.attribute(node, category, name)
    }

    pub fn raised_tickets(&self) -> Vec<String> {
        self.backend
            .topology
            .raised_step
            .as_ref()
            .map(|step| self.backend.workflow.ticket_names_in_step(step))
            .unwrap_or_default()
    }

    pub fn solved_tickets(&self) -> Vec<String> {
        self.backend
            .topology
            .solved_step
            .as_ref()
            .map(|step| self.backend.workflow.ticket_names_in_step(step))
            .unwrap_or_default()
    }

    /// Objets BIM rattachés à un ticket
    pub async fn ticket_links(&self, ticket_name: &str) -> Result<Vec<NodeRef>> {
        let step = self
            .backend
            .topology
            .raised_step
            .clone()
            .ok_or_else(|| anyhow!("no ticket process in this topology"))?;
        let tickets = syncrun_kernel::ports::TicketWorkflow::get_tickets_from_step(
            self.backend.workflow.as_ref(),
            &step,
        )
        .await?;
        let ticket = tickets
            .into_iter()
            .find(|t| t.name == ticket_name)
            .ok_or_else(|| anyhow!("ticket {ticket_name} not raised"))?;
        Ok(self
            .backend
            .graph
            .get_children(&ticket.id, &[relations::TICKET_LINK])
            .await?)
    }

    pub fn assert_single_device(&self, dev_id: &str) -> Result<()> {
        let count = self.devices().iter().filter(|d| d.name == dev_id).count();
        if count != 1 {
            anyhow::bail!("expected exactly one device '{dev_id}', found {count}");
        }
        Ok(())
    }

    pub fn get_stats(&self) -> TestStats {
        TestStats {
            devices: self.devices().len(),
            nodes_created: self.backend.graph.created_count(),
            series_pushes: self.backend.timeseries.total_pushes(),
            tickets: self.backend.workflow.ticket_count(),
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestStats {
    pub devices: usize,
    pub nodes_created: usize,
    pub series_pushes: usize,
    pub tickets: usize,
}

impl TestStats {
    pub fn print(&self) {
        tracing::info!(
            "[devkit] devices {}, nodes created {}, series pushes {}, tickets {}",
            self.devices,
            self.nodes_created,
            self.series_pushes,
            self.tickets
        );
    }
}
