use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::resolver::ResolverState;

/// Notifications pushed to the UI collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UiEvent {
    CursorChanged(usize),
    ResolverState(ResolverState),
    CommandBookLoaded(String),
    RoutineReplaced { len: usize },
}

/// Best-effort, non-blocking publisher. A full or closed channel drops the
/// event; the control loop never waits on the UI.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::Sender<UiEvent>>,
}

impl Notifier {
    pub fn new(tx: mpsc::Sender<UiEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A notifier with no listener attached.
    pub fn detached() -> Self {
        Self { tx: None }
    }

    pub fn publish(&self, event: UiEvent) {
        let Some(tx) = &self.tx else { return };
        if let Err(e) = tx.try_send(event) {
            debug!("UI notification dropped: {}", e);
        }
    }
}
