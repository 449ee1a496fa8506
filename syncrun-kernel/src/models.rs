/**
 * MODÈLES EXTERNES - Enregistrements reçus de la source à chaque poll
 *
 * RÔLE : Structures typées pour assets, devices, télémétrie et notifications.
 * Validées à la frontière du fetch : un enregistrement mal formé est écarté
 * avant d'atteindre le réconciliateur ou le pont tickets.
 */

use crate::error::SyncError;
use crate::naming;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifiant externe : l'API renvoie tantôt un nombre, tantôt une chaîne
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ExternalId(pub String);

impl<'de> Deserialize<'de> for ExternalId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Float(f64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(n) => ExternalId(n.to_string()),
            Raw::Float(f) => ExternalId(f.to_string()),
            Raw::Text(s) => ExternalId(s),
        })
    }
}

impl fmt::Display for ExternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ExternalId {
    fn from(s: &str) -> Self {
        ExternalId(s.to_string())
    }
}

impl From<i64> for ExternalId {
    fn from(n: i64) -> Self {
        ExternalId(n.to_string())
    }
}

/// Enveloppe `{data: [...]}` des réponses de la source. Les enregistrements restent
/// bruts pour être décodés un par un.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordBatch {
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalAsset {
    pub id: ExternalId,
    pub name: String,
    #[serde(rename = "type", default)]
    pub asset_type: Option<String>,
    #[serde(default)]
    pub space: Option<String>,
    #[serde(default)]
    pub devices: Vec<ExternalDevice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalDevice {
    /// Clé d'identité du DeviceNode
    pub dev_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sample_rate: Option<f64>,
    #[serde(default)]
    pub sample_rate_extra: Option<f64>,
    #[serde(default)]
    pub min_rest_between_cycles: Option<f64>,
    #[serde(default)]
    pub sensors: Vec<Sensor>,
    /// Flags nommés (booléens, scalaires, horodatages `*_checked`)
    #[serde(default)]
    pub notifications: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub last_telemetry: Vec<Telemetry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor {
    pub address: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    pub id: ExternalId,
    pub data_type: String,
    /// `null` côté API : l'entrée est ignorée par le réconciliateur
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub sensor_address: Option<u32>,
}

impl Telemetry {
    /// Nom de l'endpoint : `data_type-id`
    pub fn endpoint_name(&self) -> String {
        format!("{}-{}", self.data_type, self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalNotification {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub client_name: Option<String>,
    pub entity: NotificationEntity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEntity {
    #[serde(default)]
    pub class: Option<String>,
    pub asset: AssetReference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetReference {
    pub id: ExternalId,
    #[serde(default)]
    pub name: String,
}

impl ExternalNotification {
    /// Identité du ticket associé : `type-asset.id`
    pub fn ticket_identity(&self) -> String {
        naming::ticket_identity(&self.kind, &self.entity.asset.id)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        if self.kind.trim().is_empty() {
            return Err(SyncError::DataShape(format!(
                "notification on asset {} has an empty type",
                self.entity.asset.id
            )));
        }
        if self.entity.asset.id.0.trim().is_empty() {
            return Err(SyncError::DataShape(format!(
                "notification '{}' has an empty asset id",
                self.kind
            )));
        }
        Ok(())
    }
}

impl ExternalAsset {
    /// Retire les devices sans `dev_id` et les entrées de télémétrie sans `data_type`.
    /// Le reste de l'asset est conservé. Renvoie le nombre d'éléments écartés.
    pub fn sanitize(&mut self) -> usize {
        let mut dropped = 0;
        let asset_name = &self.name;
        self.devices.retain(|device| {
            let keep = !device.dev_id.trim().is_empty();
            if !keep {
                tracing::warn!("[source] asset '{asset_name}': dropping device with an empty dev_id");
                dropped += 1;
            }
            keep
        });

        for device in &mut self.devices {
            let dev_id = &device.dev_id;
            device.last_telemetry.retain(|t| {
                let keep = !t.data_type.trim().is_empty();
                if !keep {
                    tracing::warn!("[source] device '{dev_id}': dropping telemetry {} without data_type", t.id);
                    dropped += 1;
                }
                keep
            });
        }
        dropped
    }
}

/// Décode un enregistrement brut ; `None` (journalisé) s'il est inexploitable
fn decode_record<T: DeserializeOwned>(kind: &str, raw: serde_json::Value) -> Option<T> {
    match serde_json::from_value(raw) {
        Ok(record) => Some(record),
        Err(e) => {
            let err = SyncError::DataShape(e.to_string());
            tracing::warn!("[source] dropping {kind}: {err}");
            None
        }
    }
}

/// Décode les assets un par un : un enregistrement mal formé est écarté, pas le batch
pub fn decode_assets(records: Vec<serde_json::Value>) -> Vec<ExternalAsset> {
    records
        .into_iter()
        .filter_map(|raw| decode_record::<ExternalAsset>("asset", raw))
        .map(|mut asset| {
            asset.sanitize();
            asset
        })
        .collect()
}

/// Même traitement pour les notifications, suivi de leur validation
pub fn decode_notifications(records: Vec<serde_json::Value>) -> Vec<ExternalNotification> {
    records
        .into_iter()
        .filter_map(|raw| decode_record::<ExternalNotification>("notification", raw))
        .filter(|n| match n.validate() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("[source] dropping notification: {}", e);
                false
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_id_accepts_numbers_and_strings() {
        let ids: Vec<ExternalId> = serde_json::from_str(r#"[9, "abc", 12.5]"#).unwrap();
        assert_eq!(ids[0].0, "9");
        assert_eq!(ids[1].0, "abc");
        assert_eq!(ids[2].0, "12.5");
    }

    #[test]
    fn test_asset_payload_parsing() {
        let payload = serde_json::json!({
            "data": [{
                "id": 42,
                "name": "Sanitaires SACD-E01 / SACD-E02",
                "type": "toilet",
                "devices": [{
                    "dev_id": "D1",
                    "sensors": [{"address": 3}, {"address": 7}],
                    "notifications": {"door_open": true, "last_checked": 1700000000},
                    "last_telemetry": [
                        {"id": 1, "data_type": "T", "value": 5.0, "unit": "C", "sensor_address": 3},
                        {"id": 2, "data_type": "H", "value": null, "unit": "%"}
                    ]
                }]
            }]
        });

        let batch: RecordBatch = serde_json::from_value(payload).unwrap();
        let assets = decode_assets(batch.data);
        let device = &assets[0].devices[0];
        assert_eq!(assets[0].id.0, "42");
        assert_eq!(device.sensors.len(), 2);
        assert_eq!(device.last_telemetry[0].endpoint_name(), "T-1");
        assert!(device.last_telemetry[1].value.is_none());
        assert_eq!(device.notifications.len(), 2);
    }

    #[test]
    fn test_notification_identity() {
        let n: ExternalNotification = serde_json::from_value(serde_json::json!({
            "type": "alarm",
            "date": "2024-01-01T00:00:00Z",
            "entity": {"asset": {"id": 9, "name": "Bloc SACD-E01"}}
        }))
        .unwrap();
        assert_eq!(n.ticket_identity(), "alarm-9");
        assert!(n.validate().is_ok());
    }

    #[test]
    fn test_sanitize_keeps_valid_devices_and_telemetry() {
        let mut asset: ExternalAsset = serde_json::from_value(serde_json::json!({
            "id": 1, "name": "A",
            "devices": [
                {"dev_id": "D1", "last_telemetry": [{"id": 1, "data_type": "T", "value": 1.0}]},
                {"dev_id": "D2", "last_telemetry": [
                    {"id": 2, "data_type": "", "value": 2.0},
                    {"id": 3, "data_type": "H", "value": 3.0}
                ]},
                {"dev_id": "  "}
            ]
        }))
        .unwrap();

        assert_eq!(asset.sanitize(), 2);
        assert_eq!(asset.devices.len(), 2);
        assert_eq!(asset.devices[0].last_telemetry.len(), 1);
        assert_eq!(asset.devices[1].dev_id, "D2");
        assert_eq!(asset.devices[1].last_telemetry[0].endpoint_name(), "H-3");
    }

    #[test]
    fn test_decode_drops_only_bad_records() {
        let records = vec![
            serde_json::json!({"id": 1, "name": "A", "devices": [{"dev_id": "D1"}]}),
            serde_json::json!({"id": 2, "name": "B", "devices": [{
                "dev_id": "D2",
                "last_telemetry": [{"id": 1, "data_type": "T", "value": "open"}]
            }]}),
            serde_json::json!({"id": 3, "name": "C", "devices": [{"dev_id": "D3", "sensors": [{}]}]}),
        ];
        let assets = decode_assets(records);
        assert_eq!(assets.len(), 1);
        assert_eq!(assets[0].name, "A");

        let notifications = decode_notifications(vec![
            serde_json::json!({"type": "alarm", "entity": {"asset": {"id": 9}}}),
            serde_json::json!({"type": "alarm"}),
            serde_json::json!({"type": " ", "entity": {"asset": {"id": 9}}}),
        ]);
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].ticket_identity(), "alarm-9");
    }
}
