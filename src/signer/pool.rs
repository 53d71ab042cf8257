use crate::config::{SignatureAlgorithm, SignerPoolConfig};
use crate::signer::SignerHandle;
use crate::{error::OcspError, Result};
use parking_lot::Mutex;
use ring::digest;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Fixed payload signed by the health probe.
const PROBE_PAYLOAD: &[u8] = &[0x01, 0x02, 0x03, 0x04];

static NEXT_POOL_TAG: AtomicU64 = AtomicU64::new(1);

/// Fixed-size pool of interchangeable signing engines.
///
/// Every handle is at all times either idle or busy; both partitions live
/// under one mutex so a borrow or return is a single atomic transition. The
/// total handle count never changes after construction.
pub struct SignerPool {
    name: String,
    tag: u64,
    algorithm: SignatureAlgorithm,
    capacity: usize,
    default_timeout: Duration,
    state: Mutex<PoolState>,
    returned: Notify,
    responder_key_hash: Vec<u8>,
    cert_chain: Arc<Vec<Vec<u8>>>,
}

struct PoolState {
    idle: VecDeque<SignerHandle>,
    busy: HashSet<usize>,
}

/// A signer lent out by the pool. Must be handed back via
/// [`SignerPool::give_back`]; dropping it instead loses the engine.
pub struct BorrowedSigner {
    handle: Option<SignerHandle>,
}

impl std::fmt::Debug for BorrowedSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BorrowedSigner")
            .field("returned", &self.handle.is_none())
            .finish()
    }
}

impl Deref for BorrowedSigner {
    type Target = SignerHandle;

    fn deref(&self) -> &SignerHandle {
        self.handle.as_ref().expect("borrowed signer already returned")
    }
}

impl Drop for BorrowedSigner {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            warn!(
                engine = handle.id(),
                "signer handle dropped without being returned; engine is lost to its pool"
            );
        }
    }
}

/// Health probe outcome for one pool, for monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct SignerPoolHealth {
    pub pool: String,
    pub healthy: bool,
    pub idle: usize,
    pub capacity: usize,
}

impl SignerPool {
    /// Builds a pool of `engine_count` engines from PKCS#8 key material.
    pub fn from_pkcs8(
        name: impl Into<String>,
        algorithm: SignatureAlgorithm,
        pkcs8: &[u8],
        engine_count: usize,
        cert_chain: Vec<Vec<u8>>,
        default_timeout: Duration,
    ) -> Result<Self> {
        if engine_count == 0 {
            return Err(OcspError::Config(
                "signer pool needs at least one engine".to_string(),
            ));
        }

        let name = name.into();
        let tag = NEXT_POOL_TAG.fetch_add(1, Ordering::Relaxed);
        let cert_chain = Arc::new(cert_chain);

        let mut idle = VecDeque::with_capacity(engine_count);
        for id in 0..engine_count {
            idle.push_back(SignerHandle::from_pkcs8(
                id,
                tag,
                algorithm,
                pkcs8,
                Arc::clone(&cert_chain),
            )?);
        }

        let responder_key_hash = responder_key_hash(&cert_chain, &idle[0]);
        info!(pool = %name, engines = engine_count, "signer pool initialized");

        Ok(Self {
            name,
            tag,
            algorithm,
            capacity: engine_count,
            default_timeout,
            state: Mutex::new(PoolState {
                idle,
                busy: HashSet::with_capacity(engine_count),
            }),
            returned: Notify::new(),
            responder_key_hash,
            cert_chain,
        })
    }

    /// Builds a pool from configuration, loading key material and the
    /// certificate chain from disk.
    pub fn from_config(
        name: impl Into<String>,
        config: &SignerPoolConfig,
        default_timeout: Duration,
    ) -> Result<Self> {
        let pkcs8 = std::fs::read(&config.key_file)?;
        let mut chain = Vec::with_capacity(config.certificate_chain_files.len());
        for path in &config.certificate_chain_files {
            chain.push(std::fs::read(path)?);
        }
        Self::from_pkcs8(
            name,
            config.algorithm,
            &pkcs8,
            config.engine_count,
            chain,
            default_timeout,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// SHA-1 of the responder certificate's public key, used as the byKey
    /// responder identity in responses.
    pub fn responder_key_hash(&self) -> &[u8] {
        &self.responder_key_hash
    }

    /// DER certificates appended to signed responses.
    pub fn certificate_chain(&self) -> &[Vec<u8>] {
        &self.cert_chain
    }

    /// Waits until an idle engine exists or `timeout` elapses. A zero timeout
    /// means wait indefinitely. A timed-out borrow leaves the pool unchanged.
    pub async fn borrow(&self, timeout: Duration) -> Result<BorrowedSigner> {
        let deadline = if timeout.is_zero() {
            None
        } else {
            Some(Instant::now() + timeout)
        };

        loop {
            if let Some(borrowed) = self.try_borrow() {
                return Ok(borrowed);
            }

            // Register for the wakeup before the re-check so a return between
            // the two cannot be missed.
            let returned = self.returned.notified();

            if let Some(borrowed) = self.try_borrow() {
                return Ok(borrowed);
            }

            match deadline {
                None => returned.await,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(OcspError::NoIdleSigner);
                    }
                    if tokio::time::timeout(deadline - now, returned).await.is_err() {
                        return Err(OcspError::NoIdleSigner);
                    }
                }
            }
        }
    }

    /// Borrows with the pool's configured default timeout.
    pub async fn borrow_default(&self) -> Result<BorrowedSigner> {
        self.borrow(self.default_timeout).await
    }

    fn try_borrow(&self) -> Option<BorrowedSigner> {
        let mut state = self.state.lock();
        let handle = state.idle.pop_front()?;
        state.busy.insert(handle.id());
        Some(BorrowedSigner {
            handle: Some(handle),
        })
    }

    /// Moves a borrowed engine back to the idle partition.
    ///
    /// Handing back a signer that does not belong to this pool, or one that is
    /// not currently busy, is a caller bug: it is logged loudly and rejected,
    /// and the pool's partitions stay unchanged.
    pub fn give_back(&self, mut borrowed: BorrowedSigner) -> Result<()> {
        let handle = borrowed.handle.take().ok_or_else(|| {
            OcspError::SignerContract("signer handle already returned".to_string())
        })?;

        let mut state = self.state.lock();
        if handle.pool_tag() != self.tag || !state.busy.remove(&handle.id()) {
            error!(
                pool = %self.name,
                engine = handle.id(),
                "signer returned that was not borrowed from this pool"
            );
            return Err(OcspError::SignerContract(format!(
                "engine-{} was not borrowed from pool {}",
                handle.id(),
                self.name
            )));
        }

        state.idle.push_back(handle);
        drop(state);
        self.returned.notify_one();
        Ok(())
    }

    /// Borrows one engine, signs a fixed probe and verifies the signature
    /// against the engine's own public key. Failure (including a borrow
    /// timeout) reports unhealthy without removing anything from the pool.
    pub async fn health_check(&self) -> SignerPoolHealth {
        let healthy = self.probe().await;
        SignerPoolHealth {
            pool: self.name.clone(),
            healthy,
            idle: self.idle_count(),
            capacity: self.capacity,
        }
    }

    async fn probe(&self) -> bool {
        let borrowed = match self.borrow(self.default_timeout).await {
            Ok(borrowed) => borrowed,
            Err(e) => {
                error!(pool = %self.name, "health check could not borrow a signer: {}", e);
                return false;
            }
        };

        let result = borrowed
            .sign(PROBE_PAYLOAD)
            .and_then(|sig| borrowed.verify(PROBE_PAYLOAD, &sig));
        let engine = borrowed.id();

        if let Err(e) = self.give_back(borrowed) {
            error!(pool = %self.name, engine, "health check failed to return signer: {}", e);
            return false;
        }

        match result {
            Ok(()) => true,
            Err(e) => {
                error!(pool = %self.name, engine, "health check probe failed: {}", e);
                false
            }
        }
    }
}

fn responder_key_hash(cert_chain: &[Vec<u8>], handle: &SignerHandle) -> Vec<u8> {
    // byKey identity hashes the SPKI bit string of the responder certificate
    // when one is configured, otherwise the raw public key.
    let key_bytes = cert_chain
        .first()
        .and_then(|der| {
            x509_parser::parse_x509_certificate(der)
                .ok()
                .map(|(_, cert)| cert.public_key().subject_public_key.data.to_vec())
        })
        .unwrap_or_else(|| handle.public_key().to_vec());
    digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &key_bytes)
        .as_ref()
        .to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;
    use ring::signature::Ed25519KeyPair;

    fn pool(engines: usize, timeout: Duration) -> SignerPool {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        SignerPool::from_pkcs8(
            "test-pool",
            SignatureAlgorithm::Ed25519,
            pkcs8.as_ref(),
            engines,
            Vec::new(),
            timeout,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn borrow_and_return_cycles() {
        let pool = pool(2, Duration::from_millis(100));
        assert_eq!(pool.idle_count(), 2);

        let a = pool.borrow(Duration::from_millis(100)).await.unwrap();
        let b = pool.borrow(Duration::from_millis(100)).await.unwrap();
        assert_eq!(pool.idle_count(), 0);

        pool.give_back(a).unwrap();
        assert_eq!(pool.idle_count(), 1);
        pool.give_back(b).unwrap();
        assert_eq!(pool.idle_count(), 2);
    }

    #[tokio::test]
    async fn extra_borrow_times_out() {
        let pool = pool(1, Duration::from_millis(50));
        let held = pool.borrow(Duration::from_millis(50)).await.unwrap();

        let err = pool.borrow(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, OcspError::NoIdleSigner));
        // a timed-out borrow leaves the pool unchanged
        assert_eq!(pool.idle_count(), 0);

        pool.give_back(held).unwrap();
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn waiting_borrow_wakes_on_return() {
        let pool = Arc::new(pool(1, Duration::from_secs(1)));
        let held = pool.borrow(Duration::from_secs(1)).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                let borrowed = pool.borrow(Duration::from_secs(5)).await.unwrap();
                pool.give_back(borrowed).unwrap();
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.give_back(held).unwrap();
        waiter.await.unwrap();
        assert_eq!(pool.idle_count(), 1);
    }

    #[tokio::test]
    async fn foreign_handle_is_rejected() {
        let pool_a = pool(1, Duration::from_millis(100));
        let pool_b = pool(1, Duration::from_millis(100));

        let from_a = pool_a.borrow(Duration::from_millis(100)).await.unwrap();
        let err = pool_b.give_back(from_a).unwrap_err();
        assert!(matches!(err, OcspError::SignerContract(_)));
        // pool B's partitions are untouched by the bad return
        assert_eq!(pool_b.idle_count(), 1);
        assert_eq!(pool_a.idle_count(), 0);
    }

    #[tokio::test]
    async fn zero_timeout_blocks_until_return() {
        let pool = Arc::new(pool(1, Duration::from_millis(100)));
        let held = pool.borrow(Duration::ZERO).await.unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move { pool.borrow(Duration::ZERO).await.unwrap() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        pool.give_back(held).unwrap();
        let borrowed = waiter.await.unwrap();
        pool.give_back(borrowed).unwrap();
    }

    #[tokio::test]
    async fn health_check_signs_and_verifies() {
        let pool = pool(1, Duration::from_millis(200));
        let health = pool.health_check().await;
        assert!(health.healthy);
        assert_eq!(health.idle, 1);
        assert_eq!(health.capacity, 1);
    }
}
