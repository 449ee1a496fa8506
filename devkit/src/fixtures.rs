/*!
Fixtures pour le moteur de synchronisation

Construit les enregistrements externes tels que la source les renvoie
(mêmes clés JSON), puis les désérialise dans les types du kernel.
*/

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use syncrun_kernel::models::{ExternalAsset, ExternalNotification};

/// Builder d'asset externe
#[derive(Debug, Clone)]
pub struct AssetBuilder {
    id: Value,
    name: String,
    asset_type: Option<String>,
    space: Option<String>,
    devices: Vec<Value>,
}

impl AssetBuilder {
    pub fn new(id: impl Into<Value>, name: &str) -> Self {
        Self {
            id: id.into(),
            name: name.to_string(),
            asset_type: None,
            space: None,
            devices: Vec::new(),
        }
    }

    pub fn asset_type(mut self, asset_type: &str) -> Self {
        self.asset_type = Some(asset_type.to_string());
        self
    }

    pub fn space(mut self, space: &str) -> Self {
        self.space = Some(space.to_string());
        self
    }

    pub fn device(mut self, device: DeviceBuilder) -> Self {
        self.devices.push(device.to_json());
        self
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "type": self.asset_type,
            "space": self.space,
            "devices": self.devices,
        })
    }

    pub fn build(&self) -> ExternalAsset {
        serde_json::from_value(self.to_json()).expect("asset fixture must deserialize")
    }
}

/// Builder de device externe
#[derive(Debug, Clone)]
pub struct DeviceBuilder {
    dev_id: String,
    description: Option<String>,
    sample_rate: Option<f64>,
    sensors: Vec<u32>,
    notifications: Map<String, Value>,
    telemetry: Vec<Value>,
}

impl DeviceBuilder {
    pub fn new(dev_id: &str) -> Self {
        Self {
            dev_id: dev_id.to_string(),
            description: None,
            sample_rate: None,
            sensors: Vec::new(),
            notifications: Map::new(),
            telemetry: Vec::new(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn sample_rate(mut self, rate: f64) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    pub fn sensors(mut self, addresses: &[u32]) -> Self {
        self.sensors = addresses.to_vec();
        self
    }

    pub fn flag(mut self, key: &str, value: Value) -> Self {
        self.notifications.insert(key.to_string(), value);
        self
    }

    /// Entrée de télémétrie ; `value = None` produit un `null` côté JSON
    pub fn telemetry(mut self, id: i64, data_type: &str, value: Option<f64>, unit: &str) -> Self {
        self.telemetry.push(json!({
            "id": id,
            "data_type": data_type,
            "value": value,
            "unit": unit,
        }));
        self
    }

    pub fn telemetry_at(mut self, id: i64, data_type: &str, value: f64, sensor_address: u32) -> Self {
        self.telemetry.push(json!({
            "id": id,
            "data_type": data_type,
            "value": value,
            "sensor_address": sensor_address,
        }));
        self
    }

    pub fn to_json(&self) -> Value {
        json!({
            "dev_id": self.dev_id,
            "description": self.description,
            "sample_rate": self.sample_rate,
            "sensors": self.sensors.iter().map(|a| json!({ "address": a })).collect::<Vec<_>>(),
            "notifications": self.notifications,
            "last_telemetry": self.telemetry,
        })
    }
}

/// Notification externe telle que renvoyée par la source
pub fn notification(kind: &str, asset_id: impl Into<Value>, asset_name: &str) -> ExternalNotification {
    notification_at(kind, asset_id, asset_name, Utc::now())
}

pub fn notification_at(kind: &str, asset_id: impl Into<Value>, asset_name: &str, date: DateTime<Utc>) -> ExternalNotification {
    serde_json::from_value(json!({
        "type": kind,
        "date": date.to_rfc3339(),
        "client_name": "devkit",
        "entity": {
            "class": "toilet",
            "asset": { "id": asset_id.into(), "name": asset_name },
        },
    }))
    .expect("notification fixture must deserialize")
}

/// Corps JSON `{data: [...]}` pour simuler la réponse HTTP
pub fn assets_payload(assets: &[AssetBuilder]) -> Value {
    json!({ "data": assets.iter().map(AssetBuilder::to_json).collect::<Vec<_>>() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_builder_roundtrip_fields() {
        let asset = AssetBuilder::new(42, "Sanitaires SACD-E01 / SACD-E02")
            .asset_type("toilet")
            .device(
                DeviceBuilder::new("D1")
                    .sensors(&[3, 7])
                    .flag("door_open", json!(true))
                    .telemetry(1, "T", Some(5.0), "C")
                    .telemetry(2, "H", None, "%"),
            )
            .build();

        assert_eq!(asset.id.0, "42");
        let device = &asset.devices[0];
        assert_eq!(device.sensors.len(), 2);
        assert_eq!(device.last_telemetry[0].endpoint_name(), "T-1");
        assert!(device.last_telemetry[1].value.is_none());
    }

    #[test]
    fn test_notification_identity() {
        assert_eq!(notification("alarm", 9, "Bloc SACD-E01").ticket_identity(), "alarm-9");
    }
}
