use std::sync::{Arc, Mutex};
use std::thread;
use tokio::sync::mpsc;
use shared::protocol::CastEvent;
use crate::error::{CastError, Result};

/// Receives inbound cast events. Every method defaults to a no-op so
/// observers implement only what they care about.
pub trait CastObserver: Send + Sync {
    fn on_launch_request(&self, _app_name: &str, _parameter: &str) {}

    fn on_launch_request_with_params(
        &self,
        _app_name: &str,
        _payload: &str,
        _query: &str,
        _additional_data_url: &str,
    ) {
    }

    fn on_stop_request(&self, _app_name: &str, _app_id: &str) {}

    fn on_hide_request(&self, _app_name: &str, _app_id: &str) {}

    fn on_resume_request(&self, _app_name: &str, _app_id: &str) {}

    fn on_state_request(&self, _app_name: &str, _app_id: &str) {}

    fn on_power_state_request(&self, _power_state: &str) {}
}

type Observers = Arc<Mutex<Vec<Arc<dyn CastObserver>>>>;

fn same_observer(a: &Arc<dyn CastObserver>, b: &Arc<dyn CastObserver>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

fn deliver(observer: &dyn CastObserver, event: &CastEvent) {
    match event {
        CastEvent::LaunchRequest { app_name, parameter } => {
            observer.on_launch_request(app_name, parameter)
        }
        CastEvent::LaunchRequestWithParams { app_name, payload, query, additional_data_url } => {
            observer.on_launch_request_with_params(app_name, payload, query, additional_data_url)
        }
        CastEvent::StopRequest { app_name, app_id } => observer.on_stop_request(app_name, app_id),
        CastEvent::HideRequest { app_name, app_id } => observer.on_hide_request(app_name, app_id),
        CastEvent::ResumeRequest { app_name, app_id } => observer.on_resume_request(app_name, app_id),
        CastEvent::StateRequest { app_name, app_id } => observer.on_state_request(app_name, app_id),
        CastEvent::PowerStateRequest { power_state } => observer.on_power_state_request(power_state),
    }
}

/// FIFO event queue drained by a single dedicated thread. Each event reaches
/// every observer registered at delivery time before the next one is taken.
#[derive(Clone)]
pub struct EventDispatcher {
    tx: mpsc::Sender<CastEvent>,
    observers: Observers,
}

impl EventDispatcher {
    /// Spawn the delivery thread. It exits once every dispatcher clone is dropped.
    pub fn spawn(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<CastEvent>(capacity.max(1));
        let observers: Observers = Arc::new(Mutex::new(Vec::new()));
        let worker_observers = observers.clone();

        thread::spawn(move || {
            while let Some(event) = rx.blocking_recv() {
                let current: Vec<Arc<dyn CastObserver>> = worker_observers
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone();
                tracing::debug!("Delivering {} event to {} observer(s)", event.kind(), current.len());
                for observer in &current {
                    deliver(observer.as_ref(), &event);
                }
            }
            tracing::info!("Event dispatcher thread shutting down");
        });

        Self { tx, observers }
    }

    /// Registering the same observer twice is a logged no-op.
    pub fn register(&self, observer: Arc<dyn CastObserver>) {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        if observers.iter().any(|o| same_observer(o, &observer)) {
            tracing::warn!("Observer already registered, ignoring");
            return;
        }
        observers.push(observer);
    }

    pub fn unregister(&self, observer: &Arc<dyn CastObserver>) -> Result<()> {
        let mut observers = self.observers.lock().unwrap_or_else(|e| e.into_inner());
        let before = observers.len();
        observers.retain(|o| !same_observer(o, observer));
        if observers.len() == before {
            return Err(CastError::NotFound("observer is not registered".to_string()));
        }
        Ok(())
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Enqueue an event; waits while the queue is full.
    pub async fn dispatch(&self, event: CastEvent) -> Result<()> {
        self.tx
            .send(event)
            .await
            .map_err(|_| CastError::Internal("event dispatcher stopped".to_string()))
    }
}

/// Logs every inbound request.
pub struct LoggingObserver;

impl CastObserver for LoggingObserver {
    fn on_launch_request(&self, app_name: &str, parameter: &str) {
        tracing::info!("Launch request: app={} parameter={}", app_name, parameter);
    }

    fn on_launch_request_with_params(
        &self,
        app_name: &str,
        payload: &str,
        query: &str,
        additional_data_url: &str,
    ) {
        tracing::info!(
            "Launch request: app={} payload={} query={} additional_data_url={}",
            app_name,
            payload,
            query,
            additional_data_url
        );
    }

    fn on_stop_request(&self, app_name: &str, app_id: &str) {
        tracing::info!("Stop request: app={} id={}", app_name, app_id);
    }

    fn on_hide_request(&self, app_name: &str, app_id: &str) {
        tracing::info!("Hide request: app={} id={}", app_name, app_id);
    }

    fn on_resume_request(&self, app_name: &str, app_id: &str) {
        tracing::info!("Resume request: app={} id={}", app_name, app_id);
    }

    fn on_state_request(&self, app_name: &str, app_id: &str) {
        tracing::info!("State request: app={} id={}", app_name, app_id);
    }

    fn on_power_state_request(&self, power_state: &str) {
        tracing::info!("Power state request: {}", power_state);
    }
}
