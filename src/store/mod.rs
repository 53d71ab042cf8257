pub mod snapshot;

pub use snapshot::{IssuerIdent, RevocationSnapshot};

use crate::types::{CertStatus, CertificateKey};
use crate::{error::OcspError, Result};
use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Read side of a certificate-status backend. The CRL-backed
/// [`RevocationStore`] is the canonical implementation; database-backed
/// variants plug in behind the same trait.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Point lookup against the current snapshot. Never blocks on a
    /// concurrent refresh. Fails with [`OcspError::StoreNotReady`] before the
    /// first successful publish.
    async fn lookup(&self, key: &CertificateKey) -> Result<CertStatus>;

    /// thisUpdate/nextUpdate of the current snapshot, echoed into responses
    /// and cache metadata.
    fn validity_window(&self) -> Result<(DateTime<Utc>, Option<DateTime<Utc>>)>;

    /// True once at least one snapshot has been published.
    fn is_initialized(&self) -> bool;

    /// True when the most recent refresh attempt failed; the stale snapshot
    /// keeps serving.
    fn is_degraded(&self) -> bool;
}

/// Holds the current immutable [`RevocationSnapshot`] behind an atomically
/// replaceable pointer. Readers load the pointer once per operation and never
/// observe a partially built snapshot; a superseded snapshot stays alive for
/// lookups already holding it.
pub struct RevocationStore {
    name: String,
    current: ArcSwapOption<RevocationSnapshot>,
    degraded: AtomicBool,
}

impl RevocationStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current: ArcSwapOption::const_empty(),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Installs `snapshot` as current with a single pointer swap and clears
    /// the degraded flag.
    pub fn publish(&self, snapshot: RevocationSnapshot) {
        let entries = snapshot.entry_count();
        self.current.store(Some(Arc::new(snapshot)));
        self.degraded.store(false, Ordering::Release);
        info!(store = %self.name, entries, "published new revocation snapshot");
    }

    pub fn current(&self) -> Option<Arc<RevocationSnapshot>> {
        self.current.load_full()
    }

    pub fn set_degraded(&self, degraded: bool) {
        self.degraded.store(degraded, Ordering::Release);
    }
}

#[async_trait]
impl StatusStore for RevocationStore {
    async fn lookup(&self, key: &CertificateKey) -> Result<CertStatus> {
        match self.current.load_full() {
            Some(snapshot) => Ok(snapshot.status_of(key)),
            None => Err(OcspError::StoreNotReady),
        }
    }

    fn validity_window(&self) -> Result<(DateTime<Utc>, Option<DateTime<Utc>>)> {
        match self.current.load_full() {
            Some(snapshot) => Ok((snapshot.this_update(), snapshot.next_update())),
            None => Err(OcspError::StoreNotReady),
        }
    }

    fn is_initialized(&self) -> bool {
        self.current.load().is_some()
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }
}
