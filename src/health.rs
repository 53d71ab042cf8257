use crate::signer::{SignerPool, SignerPoolHealth};
use crate::store::StatusStore;
use serde::Serialize;
use std::sync::Arc;

/// Aggregated health of one responder path: store readiness plus a live
/// sign/verify probe of its signer pool.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub store_initialized: bool,
    pub store_degraded: bool,
    pub signers: Vec<SignerPoolHealth>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.store_initialized
            && !self.store_degraded
            && self.signers.iter().all(|s| s.healthy)
    }
}

pub async fn check(store: &Arc<dyn StatusStore>, pools: &[Arc<SignerPool>]) -> HealthReport {
    let mut signers = Vec::with_capacity(pools.len());
    for pool in pools {
        signers.push(pool.health_check().await);
    }
    HealthReport {
        store_initialized: store.is_initialized(),
        store_degraded: store.is_degraded(),
        signers,
    }
}
