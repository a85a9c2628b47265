use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::config::ConfigStore;
use crate::events::{EventBus, SystemEvent};
use crate::gadget::UsbGadgetService;

/// Application-wide state shared across handlers
pub struct AppState {
    /// Configuration store
    pub config: ConfigStore,
    /// Gadget service (owns the controller)
    pub gadget: UsbGadgetService,
    /// Event bus for real-time notifications
    pub events: Arc<EventBus>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
    started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        config: ConfigStore,
        gadget: UsbGadgetService,
        events: Arc<EventBus>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            gadget,
            events,
            shutdown_tx,
            started_at: Utc::now(),
        })
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Subscribe to shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Current gadget state as an event, sent to WebSocket clients on subscribe
    pub fn gadget_snapshot(&self) -> SystemEvent {
        let state = self.gadget.controller().current_functions();
        SystemEvent::FunctionsApplied {
            functions: state.current_functions,
            applied: state.functions_applied,
        }
    }
}
