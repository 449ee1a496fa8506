use serde_json::json;
use syncrun_devkit::fixtures::assets_payload;
use syncrun_devkit::{AssetBuilder, DeviceBuilder};
use syncrun_kernel::models::{decode_assets, RecordBatch};

#[test]
fn test_bad_record_does_not_sink_the_batch() {
    let mut payload = assets_payload(&[
        AssetBuilder::new(1, "Bloc SACD-E01").device(DeviceBuilder::new("D1").telemetry(1, "T", Some(5.0), "C")),
        AssetBuilder::new(3, "Bloc SACD-E03").device(DeviceBuilder::new("D3")),
    ]);
    if let Some(data) = payload["data"].as_array_mut() {
        data.insert(
            1,
            json!({"id": 2, "name": "Bloc SACD-E02", "devices": [{
                "dev_id": "D2",
                "last_telemetry": [{"id": 1, "data_type": "T", "value": "open"}]
            }]}),
        );
    }

    let batch: RecordBatch = serde_json::from_value(payload).unwrap();
    assert_eq!(batch.data.len(), 3);

    let assets = decode_assets(batch.data);
    let names: Vec<&str> = assets.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Bloc SACD-E01", "Bloc SACD-E03"]);
}

#[test]
fn test_invalid_device_is_dropped_but_siblings_kept() {
    let payload = assets_payload(&[AssetBuilder::new(1, "Bloc")
        .device(DeviceBuilder::new("D1").telemetry(1, "T", Some(5.0), "C"))
        .device(DeviceBuilder::new("D2").telemetry(2, "", Some(1.0), "C"))
        .device(DeviceBuilder::new(""))]);

    let batch: RecordBatch = serde_json::from_value(payload).unwrap();
    let assets = decode_assets(batch.data);

    assert_eq!(assets.len(), 1);
    let devices: Vec<&str> = assets[0].devices.iter().map(|d| d.dev_id.as_str()).collect();
    assert_eq!(devices, vec!["D1", "D2"]);
    assert_eq!(assets[0].devices[0].last_telemetry.len(), 1);
    assert!(assets[0].devices[1].last_telemetry.is_empty());
}
