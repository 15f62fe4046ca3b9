use metrics_exporter_prometheus::PrometheusHandle;
use sonance_engine::groups::EngineHandle;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the running group engine.
    pub engine: EngineHandle,
    /// Prometheus handle for rendering `/metrics`. `None` when no recorder
    /// was installed (tests, embedding).
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(engine: EngineHandle) -> Self {
        Self {
            engine,
            prometheus: None,
        }
    }

    /// Attach a Prometheus metrics handle.
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
