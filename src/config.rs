use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Bounds for the configurable signing-service timeout, in milliseconds.
const MAX_SIGN_TIMEOUT_MS: u64 = 60_000;
const DFLT_SIGN_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub responders: Vec<ResponderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponderConfig {
    /// Servable path this responder is bound to, e.g. "/ocsp".
    pub path: String,
    pub max_request_size: usize,
    pub supports_get: bool,
    /// Override of the RFC 5019 cache max-age in seconds. `None` means the
    /// default of 60 seconds.
    pub cache_max_age_secs: Option<u64>,
    #[serde(default)]
    pub nonce_policy: NoncePolicy,
    /// How long a request waits for an idle signing engine, in milliseconds.
    /// Zero means wait indefinitely.
    #[serde(default = "default_sign_timeout_ms")]
    pub sign_timeout_ms: u64,
    pub signer: SignerPoolConfig,
    pub crl: CrlSourceConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NoncePolicy {
    /// Never echo a request nonce.
    Ignore,
    /// Echo the nonce when the request carries one.
    #[default]
    Echo,
    /// Reject requests without a nonce as malformed.
    Require,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerPoolConfig {
    /// Number of interchangeable signing engines in the pool.
    pub engine_count: usize,
    /// PKCS#8 DER key material, one engine instantiated per slot from it.
    pub key_file: PathBuf,
    pub algorithm: SignatureAlgorithm,
    /// DER certificates, responder certificate first.
    pub certificate_chain_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    Ed25519,
    EcdsaP256Sha256,
    RsaPkcs1Sha256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrlSourceConfig {
    /// The CRL file. The trigger marker is `<crl_file>.UPDATEME` and the
    /// optional CA revocation properties file is `<crl_file>.revocation`.
    pub crl_file: PathBuf,
    pub ca_cert_file: PathBuf,
    /// Optional cross-issuer certificate; when set the CRL may be issued by
    /// this certificate's subject instead of the CA's.
    pub issuer_cert_file: Option<PathBuf>,
    /// Recorded in snapshot metadata only.
    pub crl_url: Option<String>,
    /// Copy thisUpdate/nextUpdate from the CRL (true) or stamp the snapshot
    /// with the ingestion time and no nextUpdate (false).
    #[serde(default = "default_true")]
    pub use_update_dates_from_crl: bool,
    /// Cadence of the background refresh task, in seconds.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval_secs() -> u64 {
    60
}

fn default_sign_timeout_ms() -> u64 {
    DFLT_SIGN_TIMEOUT_MS
}

impl Config {
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::error::OcspError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        for responder in &self.responders {
            responder.validate()?;
        }
        Ok(())
    }
}

impl ResponderConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.path.is_empty() {
            return Err(crate::error::OcspError::Config(
                "responder.path cannot be empty".to_string(),
            ));
        }

        if self.max_request_size == 0 {
            return Err(crate::error::OcspError::Config(
                "responder.max_request_size must be greater than 0".to_string(),
            ));
        }

        if self.sign_timeout_ms > MAX_SIGN_TIMEOUT_MS {
            return Err(crate::error::OcspError::Config(format!(
                "responder.sign_timeout_ms must not exceed {}",
                MAX_SIGN_TIMEOUT_MS
            )));
        }

        if self.signer.engine_count == 0 {
            return Err(crate::error::OcspError::Config(
                "signer.engine_count must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn sign_timeout(&self) -> Duration {
        Duration::from_millis(self.sign_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResponderConfig {
        ResponderConfig {
            path: "/ocsp".to_string(),
            max_request_size: 4096,
            supports_get: true,
            cache_max_age_secs: None,
            nonce_policy: NoncePolicy::Echo,
            sign_timeout_ms: DFLT_SIGN_TIMEOUT_MS,
            signer: SignerPoolConfig {
                engine_count: 2,
                key_file: PathBuf::from("key.p8"),
                algorithm: SignatureAlgorithm::Ed25519,
                certificate_chain_files: vec![PathBuf::from("responder.der")],
            },
            crl: CrlSourceConfig {
                crl_file: PathBuf::from("ca.crl"),
                ca_cert_file: PathBuf::from("ca.der"),
                issuer_cert_file: None,
                crl_url: None,
                use_update_dates_from_crl: true,
                refresh_interval_secs: 60,
            },
        }
    }

    #[test]
    fn validates_sample_config() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn rejects_zero_engine_count() {
        let mut config = sample();
        config.signer.engine_count = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_sign_timeout() {
        let mut config = sample();
        config.sign_timeout_ms = MAX_SIGN_TIMEOUT_MS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_toml() {
        let raw = r#"
            [[responders]]
            path = "/ocsp"
            max_request_size = 4096
            supports_get = true

            [responders.signer]
            engine_count = 2
            key_file = "key.p8"
            algorithm = "Ed25519"
            certificate_chain_files = ["responder.der"]

            [responders.crl]
            crl_file = "ca.crl"
            ca_cert_file = "ca.der"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.responders.len(), 1);
        assert_eq!(config.responders[0].sign_timeout_ms, DFLT_SIGN_TIMEOUT_MS);
        assert_eq!(config.responders[0].nonce_policy, NoncePolicy::Echo);
        assert!(config.responders[0].crl.use_update_dates_from_crl);
    }
}
