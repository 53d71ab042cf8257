use crate::config::CrlSourceConfig;
use crate::store::{IssuerIdent, RevocationSnapshot, RevocationStore};
use crate::types::{CaRevocationInfo, CertStatus, CrlReason, RevocationInfo, SerialNumber};
use crate::{error::OcspError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use x509_parser::extensions::ParsedExtension;

/// Properties-file keys describing a revoked issuing CA.
pub const KEY_CA_REVOCATION_TIME: &str = "ca.revocation.time";
pub const KEY_CA_INVALIDITY_TIME: &str = "ca.invalidity.time";

/// Suffix of the marker file whose presence gates a refresh.
const UPDATEME_SUFFIX: &str = ".UPDATEME";
/// Suffix of the optional CA revocation properties file.
const REVOCATION_SUFFIX: &str = ".revocation";

/// Outcome of one refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Another refresh was in flight; this trigger collapsed into a no-op.
    AlreadyRunning,
    /// No trigger marker was present; nothing changed.
    NotTriggered,
    /// A new snapshot was built and published.
    Published,
}

/// Background task that rebuilds a [`RevocationSnapshot`] from the CRL file
/// set and publishes it. At most one refresh runs at a time; a failed attempt
/// leaves the prior snapshot serving and marks the store degraded.
pub struct CrlIngestionJob {
    config: CrlSourceConfig,
    store: Arc<RevocationStore>,
    running: AtomicBool,
}

impl CrlIngestionJob {
    pub fn new(config: CrlSourceConfig, store: Arc<RevocationStore>) -> Self {
        Self {
            config,
            store,
            running: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<RevocationStore> {
        &self.store
    }

    /// Runs one refresh attempt under the single-flight guard. Any failure is
    /// reflected in the store's degraded flag as well as the returned error;
    /// the trigger marker is removed once the attempt completes either way.
    pub async fn run_once(&self) -> Result<RefreshOutcome> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(RefreshOutcome::AlreadyRunning);
        }

        let result = self.refresh().await;
        self.running.store(false, Ordering::Release);

        if let Err(e) = &result {
            error!(store = %self.store.name(), "CRL refresh failed: {}", e);
            self.store.set_degraded(true);
        }
        result
    }

    /// Spawns the periodic refresh loop on the configured cadence.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let period = Duration::from_secs(self.config.refresh_interval_secs.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                // errors are already logged and reflected in the store flags
                let _ = self.run_once().await;
            }
        })
    }

    async fn refresh(&self) -> Result<RefreshOutcome> {
        let marker = self.marker_path();
        if !marker.exists() {
            info!(
                store = %self.store.name(),
                "CRL will not be updated; create {} to force the update",
                marker.display()
            );
            return Ok(RefreshOutcome::NotTriggered);
        }

        info!(store = %self.store.name(), "a newer CRL is available, rebuilding snapshot");
        let result = self.load_and_publish().await;

        // the marker is consumed by the attempt, success or failure, so a
        // failed attempt does not suppress future retries
        if let Err(e) = tokio::fs::remove_file(&marker).await {
            warn!(
                store = %self.store.name(),
                "could not remove trigger marker {}: {}",
                marker.display(),
                e
            );
        }

        result.map(|_| RefreshOutcome::Published)
    }

    async fn load_and_publish(&self) -> Result<()> {
        let crl_der = read_crl_der(&self.config.crl_file).await?;
        let ca_der = read_cert_der(&self.config.ca_cert_file).await?;
        let issuer_der = match &self.config.issuer_cert_file {
            Some(path) => Some(read_cert_der(path).await?),
            None => None,
        };
        let ca_revocation = load_ca_revocation(&self.revocation_path()).await?;

        let snapshot = build_snapshot(
            &crl_der,
            &ca_der,
            issuer_der.as_deref(),
            ca_revocation,
            &self.config,
            Utc::now(),
        )?;
        self.store.publish(snapshot);
        Ok(())
    }

    fn marker_path(&self) -> PathBuf {
        suffixed(&self.config.crl_file, UPDATEME_SUFFIX)
    }

    fn revocation_path(&self) -> PathBuf {
        suffixed(&self.config.crl_file, REVOCATION_SUFFIX)
    }
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Builds a complete snapshot from parsed source material. Pure with respect
/// to the store; publication is the caller's single atomic step.
pub(crate) fn build_snapshot(
    crl_der: &[u8],
    ca_der: &[u8],
    issuer_der: Option<&[u8]>,
    ca_revocation: Option<CaRevocationInfo>,
    config: &CrlSourceConfig,
    generated_at: DateTime<Utc>,
) -> Result<RevocationSnapshot> {
    let (_, crl) = x509_parser::parse_x509_crl(crl_der)
        .map_err(|e| OcspError::CrlParse(e.to_string()))?;
    let (_, ca_cert) = x509_parser::parse_x509_certificate(ca_der)
        .map_err(|e| OcspError::CertParse(e.to_string()))?;

    // the CRL must come from the configured CA, or from the cross issuer
    // when one is configured
    let crl_issuer = crl.issuer().as_raw();
    let mut issuer_ok = crl_issuer == ca_cert.subject().as_raw();
    if !issuer_ok {
        if let Some(der) = issuer_der {
            let (_, issuer_cert) = x509_parser::parse_x509_certificate(der)
                .map_err(|e| OcspError::CertParse(e.to_string()))?;
            issuer_ok = crl_issuer == issuer_cert.subject().as_raw();
        }
    }
    if !issuer_ok {
        return Err(OcspError::IssuerMismatch(format!(
            "CRL issuer {}",
            crl.issuer()
        )));
    }

    let (this_update, next_update) = if config.use_update_dates_from_crl {
        let this_update = asn1_time_to_utc(crl.last_update().timestamp())?;
        let next_update = match crl.next_update() {
            Some(t) => Some(asn1_time_to_utc(t.timestamp())?),
            None => None,
        };
        (this_update, next_update)
    } else {
        (generated_at, None)
    };

    let issuer = IssuerIdent::from_raw(
        ca_cert.subject().as_raw(),
        &ca_cert.public_key().subject_public_key.data,
    );
    let mut snapshot = RevocationSnapshot::new(issuer, this_update, next_update);
    snapshot.set_crl_url(config.crl_url.clone());
    snapshot.set_ca_revocation(ca_revocation);

    for ext in crl.extensions() {
        if let ParsedExtension::CRLNumber(number) = ext.parsed_extension() {
            snapshot.set_crl_number(Some(number.to_bytes_be()));
        }
    }

    let mut entries = 0usize;
    for revoked in crl.iter_revoked_certificates() {
        let serial = SerialNumber::new(revoked.raw_serial());
        let revocation_time = asn1_time_to_utc(revoked.revocation_date.timestamp())?;

        let mut reason = CrlReason::Unspecified;
        let mut invalidity_time = None;
        for ext in revoked.extensions() {
            match ext.parsed_extension() {
                ParsedExtension::ReasonCode(code) => reason = CrlReason::from_code(code.0),
                ParsedExtension::InvalidityDate(time) => {
                    invalidity_time = Some(asn1_time_to_utc(time.timestamp())?);
                }
                _ => {}
            }
        }

        // an entry removed from the CRL is no longer revoked
        if reason == CrlReason::RemoveFromCrl {
            snapshot.remove_status(&serial);
            continue;
        }

        snapshot.insert_status(
            serial,
            CertStatus::Revoked(RevocationInfo {
                reason,
                revocation_time,
                invalidity_time,
            }),
        );
        entries += 1;
    }

    info!(entries, "built revocation snapshot from CRL");
    Ok(snapshot)
}

async fn read_crl_der(path: &Path) -> Result<Vec<u8>> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| OcspError::Ingestion(format!("could not read {}: {}", path.display(), e)))?;
    maybe_unwrap_pem(bytes)
}

async fn read_cert_der(path: &Path) -> Result<Vec<u8>> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| OcspError::Ingestion(format!("could not read {}: {}", path.display(), e)))?;
    maybe_unwrap_pem(bytes)
}

/// Accepts both PEM and DER input files, the way the original store loader
/// does.
fn maybe_unwrap_pem(bytes: Vec<u8>) -> Result<Vec<u8>> {
    if bytes.starts_with(b"-----") {
        let (_, pem) = x509_parser::pem::parse_x509_pem(&bytes)
            .map_err(|e| OcspError::CertParse(format!("bad PEM: {}", e)))?;
        Ok(pem.contents)
    } else {
        Ok(bytes)
    }
}

/// Reads the optional `<crl>.revocation` properties file describing a revoked
/// issuing CA. Returns `None` when the file is absent or carries no
/// revocation time.
async fn load_ca_revocation(path: &Path) -> Result<Option<CaRevocationInfo>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = tokio::fs::read_to_string(path).await?;
    let props = parse_properties(&content);

    let Some(revocation) = props.get(KEY_CA_REVOCATION_TIME).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let revocation_time = parse_utc_timestamp(revocation)?;
    let invalidity_time = match props.get(KEY_CA_INVALIDITY_TIME).filter(|v| !v.is_empty()) {
        Some(value) => Some(parse_utc_timestamp(value)?),
        None => None,
    };

    Ok(Some(CaRevocationInfo {
        reason: CrlReason::Unspecified,
        revocation_time,
        invalidity_time,
    }))
}

/// Java-properties style `key=value` lines; `#` and `!` start comments.
pub(crate) fn parse_properties(content: &str) -> HashMap<String, String> {
    let mut props = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
            continue;
        }
        if let Some((key, value)) = line.split_once(['=', ':']) {
            props.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    props
}

/// Timestamps in the fixed `yyyyMMddHHmmss` UTC pattern.
pub(crate) fn parse_utc_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%d%H%M%S")
        .map_err(|e| OcspError::InvalidTimestamp(format!("{}: {}", value, e)))?;
    Ok(naive.and_utc())
}

fn asn1_time_to_utc(timestamp: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .ok_or_else(|| OcspError::InvalidTimestamp(format!("unix {}", timestamp)))
}
