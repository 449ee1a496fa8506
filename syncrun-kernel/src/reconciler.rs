/**
 * ASSET RECONCILER - Upsert idempotent des devices et endpoints dans le graphe
 *
 * RÔLE :
 * Projette un batch d'assets externes sur le réseau virtuel : crée les DeviceNode et
 * EndpointNode manquants, met à jour les valeurs courantes, pousse la première valeur
 * de chaque endpoint de télémétrie dans les séries temporelles.
 *
 * FONCTIONNEMENT :
 * - Snapshot des devices du réseau virtuel pris une fois avant la fan-out
 * - Fan-out bornée par asset (`fan_out.assets`), devices d'un asset en séquence
 * - Un verrou par dev_id le temps d'un passage : deux assets du batch qui citent le
 *   même device le traitent l'un après l'autre, sur le même DeviceNode
 * - Fan-out bornée par entrée de télémétrie (`fan_out.endpoints`)
 * - Échec d'un asset / device / endpoint = entrée dans le rapport, jamais propagé aux voisins
 * - Seul l'échec du snapshot initial fait échouer le cycle
 *
 * CRÉATION EN PLUSIEURS ÉTAPES :
 * Un nœud créé reçoit ensuite sa première valeur de série et ses attributs. Si l'une
 * de ces étapes échoue, le reste est gardé en attente et retenté au prochain passage
 * qui retrouve ce nœud ; la valeur déjà poussée ne l'est jamais deux fois.
 *
 * IDEMPOTENCE :
 * Un second passage sur le même batch ne crée aucun nœud et ne pousse aucune valeur :
 * les endpoints existants reçoivent seulement leur valeur courante.
 */

use crate::config::{FanOutConf, RetentionDays};
use crate::contexts::NetworkScope;
use crate::error::{Result, SyncError};
use crate::matcher;
use crate::models::{ExternalAsset, ExternalDevice, Telemetry};
use crate::naming::{self, SubDeviceNames};
use crate::ports::{relations, Attribute, EndpointValue, GraphGateway, NodeDescriptor, NodeId, NodeRef, TimeseriesStore};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const RETENTION_CATEGORY: &str = "default";
const RETENTION_ATTRIBUTE: &str = "timeSeries maxDay";
const DEVICE_NAME_ATTRIBUTE: &str = "device_name";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetFailure {
    pub asset_id: String,
    pub device: Option<String>,
    pub endpoint: Option<String>,
    pub error: String,
}

impl AssetFailure {
    fn new(asset: &ExternalAsset, device: &ExternalDevice, endpoint: Option<String>, error: &SyncError) -> Self {
        Self {
            asset_id: asset.id.to_string(),
            device: Some(device.dev_id.clone()),
            endpoint,
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub assets: usize,
    pub devices_seen: usize,
    pub devices_created: usize,
    pub endpoints_created: usize,
    pub endpoints_updated: usize,
    pub telemetry_skipped: usize,
    pub series_pushes: usize,
    /// Nœuds dont l'initialisation restée en attente vient d'aboutir
    pub setups_resumed: usize,
    pub failures: Vec<AssetFailure>,
}

impl ReconcileReport {
    fn absorb(&mut self, other: ReconcileReport) {
        self.assets += other.assets;
        self.devices_seen += other.devices_seen;
        self.devices_created += other.devices_created;
        self.endpoints_created += other.endpoints_created;
        self.endpoints_updated += other.endpoints_updated;
        self.telemetry_skipped += other.telemetry_skipped;
        self.series_pushes += other.series_pushes;
        self.setups_resumed += other.setups_resumed;
        self.failures.extend(other.failures);
    }

    fn resumed(&mut self, resumed: Option<bool>) {
        if let Some(pushed) = resumed {
            self.setups_resumed += 1;
            self.series_pushes += usize::from(pushed);
        }
    }
}

/// Étapes restantes après un `create_node` réussi
#[derive(Debug, Clone, Default)]
struct PendingSetup {
    push: Option<f64>,
    attributes: Vec<Attribute>,
}

/// Résultat d'une entrée (flag de notification ou télémétrie)
enum EndpointOutcome {
    Created { pushed: bool, deferred: Option<SyncError> },
    Updated { resumed: Option<bool> },
    Skipped,
}

/// Verrous par dev_id, valables le temps d'un passage
type DeviceSlots = Mutex<HashMap<String, Arc<tokio::sync::Mutex<Option<NodeRef>>>>>;

pub struct AssetReconciler {
    graph: Arc<dyn GraphGateway>,
    timeseries: Arc<dyn TimeseriesStore>,
    asset_width: usize,
    endpoint_width: usize,
    retention_days: RetentionDays,
    pending: Mutex<HashMap<NodeId, PendingSetup>>,
}

impl AssetReconciler {
    pub fn new(
        graph: Arc<dyn GraphGateway>,
        timeseries: Arc<dyn TimeseriesStore>,
        fan_out: &FanOutConf,
        retention_days: RetentionDays,
    ) -> Self {
        let (asset_width, endpoint_width) = fan_out.widths();
        Self {
            graph,
            timeseries,
            asset_width,
            endpoint_width,
            retention_days,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub async fn reconcile(&self, scope: &NetworkScope, assets: &[ExternalAsset]) -> Result<ReconcileReport> {
        let snapshot = self
            .graph
            .get_children(&scope.virtual_network.id, &[relations::BMS_DEVICE])
            .await?;
        let slots = DeviceSlots::default();

        let jobs: Vec<BoxFuture<'_, ReconcileReport>> = assets
            .iter()
            .map(|asset| self.reconcile_asset(scope, &snapshot, &slots, asset).boxed())
            .collect();
        let partials: Vec<ReconcileReport> = stream::iter(jobs)
            .buffer_unordered(self.asset_width)
            .collect()
            .await;

        let mut report = ReconcileReport::default();
        for partial in partials {
            report.absorb(partial);
        }

        for failure in &report.failures {
            tracing::warn!(
                "[reconciler] asset {} device {:?} endpoint {:?}: {}",
                failure.asset_id,
                failure.device,
                failure.endpoint,
                failure.error
            );
        }
        Ok(report)
    }

    async fn reconcile_asset(
        &self,
        scope: &NetworkScope,
        snapshot: &[NodeRef],
        slots: &DeviceSlots,
        asset: &ExternalAsset,
    ) -> ReconcileReport {
        let mut report = ReconcileReport {
            assets: 1,
            ..ReconcileReport::default()
        };
        let fragments = naming::asset_name_fragments(&asset.name);

        for device in &asset.devices {
            let slot = {
                let mut slots = slots.lock();
                slots.entry(device.dev_id.clone()).or_default().clone()
            };
            let mut known = slot.lock().await;

            let existing = known
                .clone()
                .or_else(|| matcher::find(&device.dev_id, snapshot).cloned());
            let node = match existing {
                Some(node) => {
                    match self.resume_setup(&node.id).await {
                        Ok(resumed) => report.resumed(resumed),
                        Err(e) => report.failures.push(AssetFailure::new(asset, device, None, &e)),
                    }
                    node
                }
                None => match self.create_device(scope, device).await {
                    Ok(node) => {
                        report.devices_created += 1;
                        let setup = PendingSetup {
                            push: None,
                            attributes: device_attributes(asset, device),
                        };
                        if let (_, Some(e)) = self.finish_setup(&node.id, setup).await {
                            report.failures.push(AssetFailure::new(asset, device, None, &e));
                        }
                        node
                    }
                    Err(e) => {
                        report.failures.push(AssetFailure::new(asset, device, None, &e));
                        continue;
                    }
                },
            };
            *known = Some(node.clone());
            report.devices_seen += 1;

            let endpoints = match self.graph.get_children(&node.id, &[relations::BMS_ENDPOINT]).await {
                Ok(endpoints) => endpoints,
                Err(e) => {
                    report
                        .failures
                        .push(AssetFailure::new(asset, device, None, &SyncError::from(e)));
                    continue;
                }
            };

            let sub_names = naming::derive_sub_device_names(&device.sensors, &fragments);
            self.reconcile_endpoints(&mut report, asset, device, &node, &endpoints, sub_names.as_ref())
                .await;
        }

        report
    }

    async fn create_device(&self, scope: &NetworkScope, device: &ExternalDevice) -> Result<NodeRef> {
        let id = self.graph.create_node(NodeDescriptor::device(&device.dev_id)).await?;
        self.graph
            .add_child(&scope.virtual_network.id, &id, relations::BMS_DEVICE)
            .await?;
        tracing::info!("[reconciler] created device {}", device.dev_id);
        Ok(self.graph.get_real_node(&id).await?)
    }

    async fn reconcile_endpoints(
        &self,
        report: &mut ReconcileReport,
        asset: &ExternalAsset,
        device: &ExternalDevice,
        node: &NodeRef,
        endpoints: &[NodeRef],
        sub_names: Option<&SubDeviceNames>,
    ) {
        let mut outcomes: Vec<(String, Result<EndpointOutcome>)> = Vec::new();

        for (key, raw) in &device.notifications {
            let outcome = self.upsert_notification(&node.id, endpoints, key, raw).await;
            outcomes.push((key.clone(), outcome));
        }

        let mut seen = HashSet::new();
        let jobs: Vec<BoxFuture<'_, (String, Result<EndpointOutcome>)>> = device
            .last_telemetry
            .iter()
            .filter(|t| seen.insert(t.endpoint_name()))
            .map(|t| {
                async move {
                    let outcome = self.upsert_telemetry(&node.id, endpoints, t, sub_names).await;
                    (t.endpoint_name(), outcome)
                }
                .boxed()
            })
            .collect();
        let telemetry_outcomes: Vec<(String, Result<EndpointOutcome>)> = stream::iter(jobs)
            .buffer_unordered(self.endpoint_width)
            .collect()
            .await;
        outcomes.extend(telemetry_outcomes);

        for (endpoint, outcome) in outcomes {
            match outcome {
                Ok(EndpointOutcome::Created { pushed, deferred }) => {
                    report.endpoints_created += 1;
                    report.series_pushes += usize::from(pushed);
                    if let Some(e) = deferred {
                        report.failures.push(AssetFailure::new(asset, device, Some(endpoint), &e));
                    }
                }
                Ok(EndpointOutcome::Updated { resumed }) => {
                    report.endpoints_updated += 1;
                    report.resumed(resumed);
                }
                Ok(EndpointOutcome::Skipped) => report.telemetry_skipped += 1,
                Err(e) => report.failures.push(AssetFailure::new(asset, device, Some(endpoint), &e)),
            }
        }
    }

    async fn upsert_notification(
        &self,
        device: &NodeId,
        endpoints: &[NodeRef],
        key: &str,
        raw: &serde_json::Value,
    ) -> Result<EndpointOutcome> {
        let Some(value) = naming::notification_value(key, raw) else {
            return Ok(EndpointOutcome::Skipped);
        };

        match matcher::find(key, endpoints) {
            Some(existing) => {
                self.graph.set_endpoint_value(&existing.id, value).await?;
                Ok(EndpointOutcome::Updated { resumed: None })
            }
            None => {
                self.create_endpoint(device, key, value, None).await?;
                Ok(EndpointOutcome::Created {
                    pushed: false,
                    deferred: None,
                })
            }
        }
    }

    async fn upsert_telemetry(
        &self,
        device: &NodeId,
        endpoints: &[NodeRef],
        telemetry: &Telemetry,
        sub_names: Option<&SubDeviceNames>,
    ) -> Result<EndpointOutcome> {
        let Some(value) = telemetry.value else {
            return Ok(EndpointOutcome::Skipped);
        };
        let name = telemetry.endpoint_name();

        if let Some(existing) = matcher::find(&name, endpoints) {
            self.graph
                .set_endpoint_value(&existing.id, EndpointValue::Number(value))
                .await?;
            let resumed = self.resume_setup(&existing.id).await?;
            return Ok(EndpointOutcome::Updated { resumed });
        }

        let id = self
            .create_endpoint(device, &name, EndpointValue::Number(value), telemetry.unit.clone())
            .await?;

        let mut attributes = vec![Attribute::new(
            RETENTION_CATEGORY,
            RETENTION_ATTRIBUTE,
            self.retention_days.0.to_string(),
        )];
        let device_name = sub_names.zip(telemetry.sensor_address).and_then(|(names, addr)| names.for_address(addr));
        if let Some(device_name) = device_name {
            attributes.push(Attribute::new(RETENTION_CATEGORY, DEVICE_NAME_ATTRIBUTE, device_name));
        }
        let setup = PendingSetup {
            push: Some(value),
            attributes,
        };
        let (pushed, deferred) = self.finish_setup(&id, setup).await;

        Ok(EndpointOutcome::Created { pushed, deferred })
    }

    async fn create_endpoint(&self, device: &NodeId, name: &str, value: EndpointValue, unit: Option<String>) -> Result<NodeId> {
        let id = self
            .graph
            .create_node(NodeDescriptor::endpoint(name, value, unit))
            .await?;
        self.graph.add_child(device, &id, relations::BMS_ENDPOINT).await?;
        tracing::debug!("[reconciler] created endpoint {name}");
        Ok(id)
    }

    /// Exécute les étapes restantes ; `setup` ne garde que celles qui n'ont pas abouti
    async fn apply_setup(&self, node: &NodeId, setup: &mut PendingSetup) -> Result<()> {
        if let Some(value) = setup.push {
            self.timeseries.push_from_endpoint(node, value).await?;
            setup.push = None;
        }
        if !setup.attributes.is_empty() {
            self.graph.add_attributes(node, setup.attributes.clone()).await?;
            setup.attributes.clear();
        }
        Ok(())
    }

    /// Initialise un nœud neuf. Renvoie (valeur poussée, erreur de l'étape mise en attente).
    async fn finish_setup(&self, node: &NodeId, mut setup: PendingSetup) -> (bool, Option<SyncError>) {
        let wants_push = setup.push.is_some();
        let result = self.apply_setup(node, &mut setup).await;
        let pushed = wants_push && setup.push.is_none();

        match result {
            Ok(()) => (pushed, None),
            Err(e) => {
                tracing::warn!("[reconciler] node {node} created incomplete, setup deferred: {e}");
                self.pending.lock().insert(node.clone(), setup);
                (pushed, Some(e))
            }
        }
    }

    /// Reprend l'initialisation en attente d'un nœud retrouvé.
    /// `Some(pushed)` si elle vient d'aboutir, `None` si rien n'était en attente.
    async fn resume_setup(&self, node: &NodeId) -> Result<Option<bool>> {
        let pending = self.pending.lock().remove(node);
        let Some(mut setup) = pending else {
            return Ok(None);
        };

        let wants_push = setup.push.is_some();
        match self.apply_setup(node, &mut setup).await {
            Ok(()) => {
                tracing::info!("[reconciler] deferred setup of node {node} completed");
                Ok(Some(wants_push))
            }
            Err(e) => {
                self.pending.lock().insert(node.clone(), setup);
                Err(e)
            }
        }
    }
}

/// Lot d'attributs descriptifs écrit à la création d'un device
fn device_attributes(asset: &ExternalAsset, device: &ExternalDevice) -> Vec<Attribute> {
    let number = |v: Option<f64>| v.map(|n| n.to_string()).unwrap_or_default();
    vec![
        Attribute::new("Asset", "Name", asset.name.clone()),
        Attribute::new("Asset", "Id", asset.id.to_string()),
        Attribute::new("Asset", "Type", asset.asset_type.clone().unwrap_or_default()),
        Attribute::new("Asset", "Space", asset.space.clone().unwrap_or_default()),
        Attribute::new("Device", "Description", device.description.clone().unwrap_or_default()),
        Attribute::new("Device", "Sample rate", number(device.sample_rate)),
        Attribute::new("Device", "Sample rate extra", number(device.sample_rate_extra)),
        Attribute::new("Device", "Min rest between cycles", number(device.min_rest_between_cycles)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_attributes_batch() {
        let asset: ExternalAsset = serde_json::from_value(serde_json::json!({
            "id": 4, "name": "Bloc", "type": "toilet",
            "devices": [{"dev_id": "D1", "sample_rate": 60}]
        }))
        .unwrap();
        let attrs = device_attributes(&asset, &asset.devices[0]);

        assert_eq!(attrs.len(), 8);
        assert_eq!(attrs[1], Attribute::new("Asset", "Id", "4"));
        assert_eq!(attrs[2], Attribute::new("Asset", "Type", "toilet"));
        assert_eq!(attrs[3].value, "");
        assert_eq!(attrs[5], Attribute::new("Device", "Sample rate", "60"));
    }

    #[test]
    fn test_report_absorb() {
        let mut total = ReconcileReport::default();
        total.absorb(ReconcileReport {
            assets: 1,
            devices_created: 2,
            series_pushes: 3,
            ..ReconcileReport::default()
        });
        total.absorb(ReconcileReport {
            assets: 1,
            endpoints_updated: 4,
            ..ReconcileReport::default()
        });
        assert_eq!(total.assets, 2);
        assert_eq!(total.devices_created, 2);
        assert_eq!(total.endpoints_updated, 4);
        assert_eq!(total.series_pushes, 3);
    }
}
