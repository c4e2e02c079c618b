//! Shared application state for the HTTP layer.

use std::sync::Arc;

use arena::events::EventBus;
use arena::io::store::JobRepository;
use arena::spawn::JobSpawner;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobRepository>,
    pub spawner: Arc<JobSpawner>,
    pub events: EventBus,
    /// Base address of the UI, used to build job links.
    pub public_url: String,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobRepository>,
        spawner: JobSpawner,
        events: EventBus,
        public_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            spawner: Arc::new(spawner),
            events,
            public_url: public_url.into(),
        }
    }

    pub fn job_url(&self, job_id: &str) -> String {
        format!("{}/jobs/{job_id}", self.public_url.trim_end_matches('/'))
    }
}
