//! Règles de nommage et d'identité : tickets, fragments de nom d'asset,
//! noms de sous-devices dérivés des adresses capteurs, valeurs des flags.

use crate::models::{ExternalId, Sensor};
use crate::ports::EndpointValue;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Suffixe des flags à formater en horodatage
pub const CHECKED_SUFFIX: &str = "_checked";

/// Au-delà, une valeur numérique `*_checked` est en millisecondes
const MILLIS_THRESHOLD: f64 = 1e11;

pub fn ticket_identity(kind: &str, asset_id: &ExternalId) -> String {
    format!("{kind}-{asset_id}")
}

/// Découpe un nom de ticket en (type, asset id) sur le dernier `-`
pub fn split_ticket_identity(name: &str) -> Option<(&str, &str)> {
    let (kind, asset_id) = name.rsplit_once('-')?;
    if kind.is_empty() || asset_id.is_empty() {
        return None;
    }
    Some((kind, asset_id))
}

/// Extrait les fragments `PREFIX-alphanum` d'un nom d'asset, dans l'ordre, sans doublon.
/// Ex: "Sanitaires SACD-E01 / SACD-E02" -> ["SACD-E01", "SACD-E02"]
pub fn asset_name_fragments(name: &str) -> Vec<String> {
    let mut fragments: Vec<String> = Vec::new();

    for token in name.split(|c: char| !(c.is_ascii_alphanumeric() || c == '-')) {
        let token = token.trim_matches('-');
        if is_fragment(token) && !fragments.iter().any(|f| f == token) {
            fragments.push(token.to_string());
        }
    }

    fragments
}

fn is_fragment(token: &str) -> bool {
    let Some((prefix, suffix)) = token.split_once('-') else {
        return false;
    };

    let prefix_ok = prefix.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && prefix.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit());
    let suffix_ok = !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_alphanumeric());

    prefix_ok && suffix_ok
}

/// Noms des deux sous-devices physiques, ordonnés par adresse capteur croissante
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubDeviceNames {
    low: (u32, String),
    high: (u32, String),
}

impl SubDeviceNames {
    /// Nom attribué à un endpoint selon son adresse capteur ; `0` = les deux sous-devices
    pub fn for_address(&self, address: u32) -> Option<String> {
        match address {
            0 => Some(format!("{} + {}", self.low.1, self.high.1)),
            a if a == self.low.0 => Some(self.low.1.clone()),
            a if a == self.high.0 => Some(self.high.1.clone()),
            _ => None,
        }
    }
}

/// Dérivation possible seulement avec exactement deux adresses non nulles distinctes
/// et au moins deux fragments de nom.
pub fn derive_sub_device_names(sensors: &[Sensor], fragments: &[String]) -> Option<SubDeviceNames> {
    let mut addresses: Vec<u32> = sensors.iter().map(|s| s.address).filter(|a| *a != 0).collect();
    addresses.sort_unstable();
    addresses.dedup();

    match (addresses.as_slice(), fragments) {
        ([low, high], [first, second, ..]) => Some(SubDeviceNames {
            low: (*low, first.clone()),
            high: (*high, second.clone()),
        }),
        _ => None,
    }
}

/// Valeur courante d'un endpoint de notification. `None` pour un `null`.
pub fn notification_value(key: &str, value: &serde_json::Value) -> Option<EndpointValue> {
    if value.is_null() {
        return None;
    }

    if key.ends_with(CHECKED_SUFFIX) {
        if let Some(ts) = checked_timestamp(value) {
            return Some(EndpointValue::Text(ts));
        }
    }

    let text = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    Some(EndpointValue::Text(text))
}

fn checked_timestamp(value: &serde_json::Value) -> Option<String> {
    let datetime = match value {
        serde_json::Value::Number(n) => {
            let raw = n.as_f64()?;
            let seconds = if raw.abs() > MILLIS_THRESHOLD { raw / 1000.0 } else { raw };
            OffsetDateTime::from_unix_timestamp(seconds.trunc() as i64).ok()?
        }
        serde_json::Value::String(s) => OffsetDateTime::parse(s, &Rfc3339).ok()?,
        _ => return None,
    };
    datetime.format(&Rfc3339).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_identity_roundtrip() {
        let id = ticket_identity("alarm", &ExternalId::from(9));
        assert_eq!(id, "alarm-9");
        assert_eq!(split_ticket_identity(&id), Some(("alarm", "9")));
    }

    #[test]
    fn test_split_uses_last_separator() {
        assert_eq!(split_ticket_identity("door-open-12"), Some(("door-open", "12")));
        assert_eq!(split_ticket_identity("nodash"), None);
        assert_eq!(split_ticket_identity("trailing-"), None);
    }

    #[test]
    fn test_asset_name_fragments() {
        assert_eq!(
            asset_name_fragments("Sanitaires SACD-E01 / SACD-E02 (RDC)"),
            vec!["SACD-E01", "SACD-E02"]
        );
        assert_eq!(asset_name_fragments("Bloc SACD-E01, SACD-E01"), vec!["SACD-E01"]);
        assert!(asset_name_fragments("salle de réunion").is_empty());
        assert!(asset_name_fragments("lower-case").is_empty());
        assert!(asset_name_fragments("").is_empty());
    }

    #[test]
    fn test_sub_device_names_by_address_order() {
        let sensors = [Sensor { address: 7 }, Sensor { address: 3 }];
        let fragments = vec!["A".to_string(), "B".to_string()];
        let names = derive_sub_device_names(&sensors, &fragments).unwrap();

        assert_eq!(names.for_address(3).as_deref(), Some("A"));
        assert_eq!(names.for_address(7).as_deref(), Some("B"));
        assert_eq!(names.for_address(0).as_deref(), Some("A + B"));
        assert_eq!(names.for_address(5), None);
    }

    #[test]
    fn test_sub_device_names_need_two_addresses() {
        let fragments = vec!["A".to_string(), "B".to_string()];
        assert!(derive_sub_device_names(&[Sensor { address: 3 }], &fragments).is_none());
        assert!(derive_sub_device_names(
            &[Sensor { address: 3 }, Sensor { address: 3 }, Sensor { address: 0 }],
            &fragments
        )
        .is_none());
        assert!(derive_sub_device_names(
            &[Sensor { address: 3 }, Sensor { address: 7 }],
            &["A".to_string()]
        )
        .is_none());
    }

    #[test]
    fn test_notification_values() {
        assert_eq!(
            notification_value("last_checked", &serde_json::json!(1_700_000_000)),
            Some(EndpointValue::Text("2023-11-14T22:13:20Z".into()))
        );
        assert_eq!(
            notification_value("last_checked", &serde_json::json!(1_700_000_000_000i64)),
            Some(EndpointValue::Text("2023-11-14T22:13:20Z".into()))
        );
        assert_eq!(
            notification_value("door_open", &serde_json::json!(true)),
            Some(EndpointValue::Text("true".into()))
        );
        assert_eq!(
            notification_value("mode", &serde_json::json!("eco")),
            Some(EndpointValue::Text("eco".into()))
        );
        assert_eq!(notification_value("door_open", &serde_json::Value::Null), None);
    }
}
