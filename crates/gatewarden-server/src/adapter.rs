use std::sync::Arc;

use gatewarden_core::label::Label;
use gatewarden_core::retrieve::{FragmentSource, RetrieveError};
use gatewarden_core::types::{FragmentCandidate, TenantId};
use gatewarden_storage::FragmentStore;

/// Bridges a storage backend into the retriever's narrow pre-filter trait.
pub struct StoreFragmentSource<S: FragmentStore> {
    store: Arc<S>,
}

impl<S: FragmentStore> StoreFragmentSource<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: FragmentStore> FragmentSource for StoreFragmentSource<S> {
    async fn pre_filter(
        &self,
        tenant: &TenantId,
        allowed_labels: &[Label],
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<FragmentCandidate>, RetrieveError> {
        self.store
            .pre_filter(tenant, allowed_labels, query_vec, limit)
            .await
            .map_err(|e| RetrieveError::Store(e.to_string()))
    }
}
