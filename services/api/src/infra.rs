use halal_finance::config::StorageConfig;
use halal_finance::workflows::financing::{
    FinancingApi, InMemoryActivityLog, InMemoryBlobStore, InMemoryFinancingStore, UploadPolicy,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

pub(crate) type MemoryFinancingApi =
    FinancingApi<InMemoryFinancingStore, InMemoryBlobStore, InMemoryActivityLog>;

/// Process-local backends wired the same way the hosted database and bucket would be.
pub(crate) struct InMemoryBackends {
    pub(crate) store: Arc<InMemoryFinancingStore>,
    pub(crate) blobs: Arc<InMemoryBlobStore>,
    pub(crate) activity: Arc<InMemoryActivityLog>,
}

impl InMemoryBackends {
    pub(crate) fn new(storage: &StorageConfig) -> Self {
        Self {
            store: Arc::new(InMemoryFinancingStore::default()),
            blobs: Arc::new(InMemoryBlobStore::new(
                storage.bucket.clone(),
                storage.public_base_url.clone(),
            )),
            activity: Arc::new(InMemoryActivityLog::default()),
        }
    }

    pub(crate) fn api(&self, storage: &StorageConfig) -> MemoryFinancingApi {
        FinancingApi::new(
            self.store.clone(),
            self.blobs.clone(),
            self.activity.clone(),
            UploadPolicy::from_config(storage),
        )
    }
}
