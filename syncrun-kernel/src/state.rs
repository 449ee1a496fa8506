use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Drapeau "running" observable : `stop()` le baisse et réveille les attentes en cours
#[derive(Debug, Clone)]
pub struct RunFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl RunFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Passe à `true` ; renvoie `false` si le drapeau était déjà levé
    pub fn raise(&self) -> bool {
        self.tx.send_if_modified(|running| {
            if *running {
                false
            } else {
                *running = true;
                true
            }
        })
    }

    pub fn lower(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_raised(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for RunFlag {
    fn default() -> Self {
        Self::new()
    }
}
