/*!
Injection de pannes côté graphe

Enveloppe un `GraphGateway` et fait échouer les créations de nœuds aux noms
choisis, les écritures d'attributs, ou tout l'appareil (`set_unavailable`)
pour simuler une coupure.

Une latence optionnelle sur `create_node` permet de mesurer le nombre de
créations simultanées (`peak_concurrent_creates`).
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use syncrun_kernel::ports::{
    Attribute, EndpointValue, GraphGateway, NodeDescriptor, NodeId, NodeRef, PortError,
};

pub struct FaultyGraph {
    inner: Arc<dyn GraphGateway>,
    failing_names: Mutex<HashSet<String>>,
    failing_attributes: AtomicBool,
    unavailable: AtomicBool,
    create_latency: Mutex<Option<Duration>>,
    creates_in_flight: AtomicUsize,
    creates_peak: AtomicUsize,
}

impl FaultyGraph {
    pub fn wrap(inner: Arc<dyn GraphGateway>) -> Self {
        Self {
            inner,
            failing_names: Mutex::new(HashSet::new()),
            failing_attributes: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
            create_latency: Mutex::new(None),
            creates_in_flight: AtomicUsize::new(0),
            creates_peak: AtomicUsize::new(0),
        }
    }

    /// `create_node` échouera pour ce nom
    pub fn fail_create(&self, name: &str) {
        self.failing_names.lock().insert(name.to_string());
    }

    /// `add_attributes` échouera tant que le drapeau est levé
    pub fn fail_attribute_writes(&self, failing: bool) {
        self.failing_attributes.store(failing, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.failing_names.lock().clear();
        self.failing_attributes.store(false, Ordering::SeqCst);
        self.unavailable.store(false, Ordering::SeqCst);
    }

    /// Chaque `create_node` attend `latency` (horloge tokio) avant de déléguer
    pub fn set_create_latency(&self, latency: Duration) {
        *self.create_latency.lock() = Some(latency);
    }

    /// Nombre maximal de `create_node` observés en même temps
    pub fn peak_concurrent_creates(&self) -> usize {
        self.creates_peak.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), PortError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("injected outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphGateway for FaultyGraph {
    async fn get_context(&self, name: &str) -> Result<Option<NodeRef>, PortError> {
        self.check()?;
        self.inner.get_context(name).await
    }

    async fn get_children(&self, parent: &NodeId, relations: &[&str]) -> Result<Vec<NodeRef>, PortError> {
        self.check()?;
        self.inner.get_children(parent, relations).await
    }

    async fn create_node(&self, descriptor: NodeDescriptor) -> Result<NodeId, PortError> {
        self.check()?;
        let rejected = self.failing_names.lock().contains(&descriptor.name);
        if rejected {
            return Err(PortError::Rejected(format!("injected failure for {}", descriptor.name)));
        }

        let in_flight = self.creates_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.creates_peak.fetch_max(in_flight, Ordering::SeqCst);
        let latency = *self.create_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let result = self.inner.create_node(descriptor).await;
        self.creates_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn add_child(&self, parent: &NodeId, child: &NodeId, relation: &str) -> Result<(), PortError> {
        self.check()?;
        self.inner.add_child(parent, child, relation).await
    }

    async fn get_real_node(&self, id: &NodeId) -> Result<NodeRef, PortError> {
        self.check()?;
        self.inner.get_real_node(id).await
    }

    async fn add_attributes(&self, node: &NodeId, attributes: Vec<Attribute>) -> Result<(), PortError> {
        self.check()?;
        if self.failing_attributes.load(Ordering::SeqCst) {
            return Err(PortError::Rejected(format!("injected attribute failure on {node}")));
        }
        self.inner.add_attributes(node, attributes).await
    }

    async fn get_attribute(&self, node: &NodeId, category: &str, name: &str) -> Result<Option<String>, PortError> {
        self.check()?;
        self.inner.get_attribute(node, category, name).await
    }

    async fn set_endpoint_value(&self, endpoint: &NodeId, value: EndpointValue) -> Result<(), PortError> {
        self.check()?;
        self.inner.set_endpoint_value(endpoint, value).await
    }
}
