/**
 * ERREURS DU MOTEUR DE SYNCHRONISATION
 *
 * RÔLE : Taxonomie des échecs d'un cycle (lookup, collaborateur, source, forme des données).
 * Aucune de ces erreurs ne remonte à l'appelant : l'orchestrateur les journalise
 * et applique le backoff.
 */

use crate::ports::PortError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Contexte / scope / étape nommé introuvable : le cycle courant est abandonné
    #[error("Lookup failure: {0}")]
    LookupFailure(String),
    /// Appel graphe / workflow / séries temporelles en échec
    #[error("Collaborator failure: {0}")]
    Collaborator(#[from] PortError),
    /// Récupération des assets ou notifications en échec
    #[error("External source error: {0}")]
    Source(String),
    /// Enregistrement externe inexploitable
    #[error("Malformed record: {0}")]
    DataShape(String),
    #[error("Orchestrator already running")]
    AlreadyRunning,
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Source(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
