/*!
Source externe scriptée pour tester l'orchestrateur sans API HTTP

Chaque appel consomme la prochaine réponse programmée ; une fois la file vide,
la dernière réponse réussie est rejouée. Tous les appels sont enregistrés.
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use syncrun_kernel::models::{ExternalAsset, ExternalNotification};
use syncrun_kernel::{AssetSource, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCall {
    Assets,
    Notifications,
}

#[derive(Debug, Clone)]
enum Scripted<T> {
    Ok(T),
    Fail(String),
}

#[derive(Default)]
struct Script {
    assets: VecDeque<Scripted<Vec<ExternalAsset>>>,
    notifications: VecDeque<Scripted<Vec<ExternalNotification>>>,
    last_assets: Vec<ExternalAsset>,
    last_notifications: Vec<ExternalNotification>,
    calls: Vec<(SourceCall, tokio::time::Instant)>,
}

#[derive(Clone, Default)]
pub struct StubSource {
    script: Arc<Mutex<Script>>,
}

impl StubSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_assets(&self, assets: Vec<ExternalAsset>) -> &Self {
        self.script.lock().assets.push_back(Scripted::Ok(assets));
        self
    }

    pub fn push_assets_failure(&self, message: &str) -> &Self {
        self.script.lock().assets.push_back(Scripted::Fail(message.to_string()));
        self
    }

    pub fn push_notifications(&self, notifications: Vec<ExternalNotification>) -> &Self {
        self.script.lock().notifications.push_back(Scripted::Ok(notifications));
        self
    }

    /// Appels reçus, avec l'instant (horloge tokio) de chacun
    pub fn calls(&self) -> Vec<(SourceCall, tokio::time::Instant)> {
        self.script.lock().calls.clone()
    }

    pub fn asset_call_times(&self) -> Vec<tokio::time::Instant> {
        self.calls()
            .into_iter()
            .filter(|(call, _)| *call == SourceCall::Assets)
            .map(|(_, at)| at)
            .collect()
    }
}

#[async_trait]
impl AssetSource for StubSource {
    async fn get_assets(&self) -> Result<Vec<ExternalAsset>, SyncError> {
        let mut script = self.script.lock();
        script.calls.push((SourceCall::Assets, tokio::time::Instant::now()));
        match script.assets.pop_front() {
            Some(Scripted::Ok(assets)) => {
                script.last_assets = assets.clone();
                Ok(assets)
            }
            Some(Scripted::Fail(message)) => Err(SyncError::Source(message)),
            None => Ok(script.last_assets.clone()),
        }
    }

    async fn get_notifications(&self) -> Result<Vec<ExternalNotification>, SyncError> {
        let mut script = self.script.lock();
        script.calls.push((SourceCall::Notifications, tokio::time::Instant::now()));
        match script.notifications.pop_front() {
            Some(Scripted::Ok(notifications)) => {
                script.last_notifications = notifications.clone();
                Ok(notifications)
            }
            Some(Scripted::Fail(message)) => Err(SyncError::Source(message)),
            None => Ok(script.last_notifications.clone()),
        }
    }
}
