use std::sync::Arc;

use tokio::sync::mpsc;

use crate::backend::memory::InMemoryBackend;
use crate::backend::{Clock, RouteProvider};
use crate::engine::session::{DriverSession, SessionEvent, SessionSettings};
use crate::observability::metrics::Metrics;

pub struct AppState {
    pub session: Arc<DriverSession>,
    pub backend: Arc<InMemoryBackend>,
    pub router: Arc<dyn RouteProvider>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(
        driver_id: uuid::Uuid,
        backend: Arc<InMemoryBackend>,
        router: Arc<dyn RouteProvider>,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
        event_buffer_size: usize,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let metrics = Metrics::new();
        let (session, events_rx) = DriverSession::new(
            driver_id,
            backend.clone(),
            clock.clone(),
            settings,
            metrics.clone(),
            event_buffer_size,
        );

        (
            Self {
                session: Arc::new(session),
                backend,
                router,
                clock,
                metrics,
            },
            events_rx,
        )
    }
}
