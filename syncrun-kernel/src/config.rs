use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct SyncConfig {
    pub source: SourceConf,
    pub graph: GraphConf,
    pub tickets: Option<TicketConf>,
    pub bim: Option<BimConf>,
    pub schedule: ScheduleConf,
    pub fan_out: FanOutConf,
    pub retention_days: RetentionDays,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SourceConf {
    pub base_url: String,
    pub assets_path: String,
    pub notifications_path: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GraphConf {
    pub network_context: String,
    pub virtual_network: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TicketConf {
    pub context: String,
    pub process: String,
    pub raised_step: String,
    pub solved_step: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BimConf {
    pub context: String,
    pub category: String,
    pub group: String,
    /// Attribut portant la référence comparée aux fragments de nom d'asset
    pub reference_category: String,
    pub reference_attribute: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ScheduleConf {
    pub pull_interval_ms: u64,
    pub startup_delay_ms: u64,
    pub failure_backoff_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FanOutConf {
    pub assets: usize,
    pub endpoints: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(transparent)]
pub struct RetentionDays(pub u32);

impl Default for RetentionDays {
    fn default() -> Self {
        RetentionDays(366)
    }
}

impl Default for SourceConf {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            assets_path: "/api/assets".into(),
            notifications_path: "/api/notifications".into(),
            timeout_ms: 30_000,
        }
    }
}

impl Default for GraphConf {
    fn default() -> Self {
        Self {
            network_context: "Network".into(),
            virtual_network: "SyncRun".into(),
        }
    }
}

impl Default for TicketConf {
    fn default() -> Self {
        Self {
            context: "Tickets".into(),
            process: "SyncRun Alarms".into(),
            raised_step: "Raised".into(),
            solved_step: "Solved".into(),
        }
    }
}

impl Default for BimConf {
    fn default() -> Self {
        Self {
            context: "BIM".into(),
            category: "Equipements".into(),
            group: "Sanitaires".into(),
            reference_category: "default".into(),
            reference_attribute: "reference".into(),
        }
    }
}

impl Default for ScheduleConf {
    fn default() -> Self {
        Self {
            pull_interval_ms: 300_000,
            startup_delay_ms: 0,
            failure_backoff_ms: 60_000,
        }
    }
}

impl Default for FanOutConf {
    fn default() -> Self {
        Self { assets: 8, endpoints: 16 }
    }
}

impl ScheduleConf {
    pub fn pull_interval(&self) -> Duration {
        Duration::from_millis(self.pull_interval_ms)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }
}

impl FanOutConf {
    /// Largeurs effectives (0 ramené à 1)
    pub fn widths(&self) -> (usize, usize) {
        (self.assets.max(1), self.endpoints.max(1))
    }
}

impl SyncConfig {
    /// Applique les surcharges d'environnement. `lookup` abstrait `std::env::var` pour les tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("PULL_INTERVAL") {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.schedule.pull_interval_ms = ms,
                Err(e) => tracing::warn!("[config] PULL_INTERVAL ignoré ({raw:?}): {e}"),
            }
        }
        if let Some(v) = lookup("NETWORK_CONTEXT_NAME") {
            self.graph.network_context = v;
        }
        if let Some(v) = lookup("VIRTUAL_NETWORK_NAME") {
            self.graph.virtual_network = v;
        }
        if let Some(v) = lookup("SOURCE_BASE_URL") {
            self.source.base_url = v;
        }
        if let Some(v) = lookup("TICKET_CONTEXT_NAME") {
            self.tickets.get_or_insert_with(TicketConf::default).context = v;
        }
        if let Some(v) = lookup("TICKET_PROCESS_NAME") {
            self.tickets.get_or_insert_with(TicketConf::default).process = v;
        }
        if let Some(v) = lookup("BIM_CONTEXT_NAME") {
            self.bim.get_or_insert_with(BimConf::default).context = v;
        }
    }
}

/// Lit le YAML pointé par `SYNCRUN_CONFIG` (défaut `syncrun.yaml`) sans surcharges
pub async fn read_config_file(path: &str) -> SyncConfig {
    if Path::new(path).exists() {
        let txt = fs::read_to_string(path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return SyncConfig::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            tracing::warn!("[config] config invalide: {e}");
            SyncConfig::default()
        })
    } else {
        tracing::warn!("[config] pas de {path}, usage config par défaut");
        SyncConfig::default()
    }
}

pub async fn load_config() -> SyncConfig {
    let path = std::env::var("SYNCRUN_CONFIG").unwrap_or_else(|_| "syncrun.yaml".into());
    let mut cfg = read_config_file(&path).await;
    cfg.apply_env_overrides(|key| std::env::var(key).ok());
    cfg
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.schedule.pull_interval_ms, 300_000);
        assert_eq!(cfg.schedule.failure_backoff_ms, 60_000);
        assert_eq!(cfg.retention_days, RetentionDays(366));
        assert_eq!(cfg.fan_out.widths(), (8, 16));
        assert!(cfg.tickets.is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg: SyncConfig = serde_yaml::from_str(
            "schedule:\n  pull_interval_ms: 1000\ntickets:\n  process: Alarms\nfan_out:\n  assets: 0\n",
        )
        .unwrap();
        assert_eq!(cfg.schedule.pull_interval_ms, 1000);
        assert_eq!(cfg.schedule.failure_backoff_ms, 60_000);
        let tickets = cfg.tickets.unwrap();
        assert_eq!(tickets.process, "Alarms");
        assert_eq!(tickets.raised_step, "Raised");
        assert_eq!(cfg.fan_out.widths(), (1, 16));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PULL_INTERVAL", "5000"),
            ("VIRTUAL_NETWORK_NAME", "Site A"),
            ("TICKET_PROCESS_NAME", "Alarms"),
        ]
        .into_iter()
        .collect();

        let mut cfg = SyncConfig::default();
        cfg.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.schedule.pull_interval_ms, 5000);
        assert_eq!(cfg.graph.virtual_network, "Site A");
        assert_eq!(cfg.tickets.unwrap().process, "Alarms");
        assert!(cfg.bim.is_none());
    }

    #[test]
    fn test_bad_interval_is_ignored() {
        let mut cfg = SyncConfig::default();
        cfg.apply_env_overrides(|k| (k == "PULL_INTERVAL").then(|| "soon".to_string()));
        assert_eq!(cfg.schedule.pull_interval_ms, 300_000);
    }

    #[tokio::test]
    async fn test_read_missing_and_invalid_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.yaml");
        assert_eq!(read_config_file(missing.to_str().unwrap()).await.schedule.pull_interval_ms, 300_000);

        let invalid = dir.path().join("bad.yaml");
        std::fs::write(&invalid, "schedule: [not, a, map]").unwrap();
        assert_eq!(read_config_file(invalid.to_str().unwrap()).await.fan_out.assets, 8);

        let valid = dir.path().join("ok.yaml");
        std::fs::write(&valid, "retention_days: 30\n").unwrap();
        assert_eq!(read_config_file(valid.to_str().unwrap()).await.retention_days, RetentionDays(30));
    }
}
