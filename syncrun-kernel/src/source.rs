/**
 * SOURCE EXTERNE - Récupération des assets et notifications à chaque poll
 *
 * RÔLE : Trait `AssetSource` consommé par l'orchestrateur + client HTTP JSON.
 * Les enregistrements sont décodés un par un : un enregistrement mal formé est
 * écarté ici, avant le réconciliateur, sans faire échouer le fetch.
 * L'authentification n'est pas gérée : l'URL de base est supposée accessible.
 */

use crate::config::SourceConf;
use crate::error::Result;
use crate::models::{decode_assets, decode_notifications, ExternalAsset, ExternalNotification, RecordBatch};
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn get_assets(&self) -> Result<Vec<ExternalAsset>>;
    async fn get_notifications(&self) -> Result<Vec<ExternalNotification>>;
}

pub struct HttpAssetSource {
    client: reqwest::Client,
    assets_url: String,
    notifications_url: String,
}

impl HttpAssetSource {
    pub fn new(conf: &SourceConf) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(conf.timeout_ms))
            .build()?;
        let base = conf.base_url.trim_end_matches('/');
        Ok(Self {
            client,
            assets_url: format!("{base}{}", conf.assets_path),
            notifications_url: format!("{base}{}", conf.notifications_path),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.json::<T>().await?)
    }
}

#[async_trait]
impl AssetSource for HttpAssetSource {
    async fn get_assets(&self) -> Result<Vec<ExternalAsset>> {
        let batch: RecordBatch = self.get_json(&self.assets_url).await?;
        Ok(decode_assets(batch.data))
    }

    async fn get_notifications(&self) -> Result<Vec<ExternalNotification>> {
        let batch: RecordBatch = self.get_json(&self.notifications_url).await?;
        Ok(decode_notifications(batch.data))
    }
}
