use crate::types::{
    CaRevocationInfo, CertStatus, CertificateKey, HashAlgorithm, RevocationInfo, SerialNumber,
};
use crate::{error::OcspError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Precomputed issuer hash pairs, one per supported hash algorithm. A
/// certificate key belongs to this issuer when both of its hashes match one
/// pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerIdent {
    name_hashes: Vec<Vec<u8>>,
    key_hashes: Vec<Vec<u8>>,
}

impl IssuerIdent {
    /// Hashes the issuer's DN encoding and subject public key bits with every
    /// supported algorithm.
    pub fn from_raw(name_der: &[u8], public_key_bits: &[u8]) -> Self {
        let mut name_hashes = Vec::with_capacity(HashAlgorithm::ALL.len());
        let mut key_hashes = Vec::with_capacity(HashAlgorithm::ALL.len());
        for algorithm in HashAlgorithm::ALL {
            name_hashes.push(algorithm.digest(name_der));
            key_hashes.push(algorithm.digest(public_key_bits));
        }
        Self {
            name_hashes,
            key_hashes,
        }
    }

    pub fn from_ca_cert_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = x509_parser::parse_x509_certificate(der)
            .map_err(|e| OcspError::CertParse(e.to_string()))?;
        Ok(Self::from_raw(
            cert.subject().as_raw(),
            &cert.public_key().subject_public_key.data,
        ))
    }

    pub fn matches(&self, key: &CertificateKey) -> bool {
        self.name_hashes
            .iter()
            .zip(&self.key_hashes)
            .any(|(name, spk)| {
                name == &key.issuer_name_hash && spk == &key.issuer_key_hash
            })
    }

    pub fn name_hash(&self, algorithm: HashAlgorithm) -> &[u8] {
        let index = HashAlgorithm::ALL
            .iter()
            .position(|a| *a == algorithm)
            .expect("algorithm in supported set");
        &self.name_hashes[index]
    }

    pub fn key_hash(&self, algorithm: HashAlgorithm) -> &[u8] {
        let index = HashAlgorithm::ALL
            .iter()
            .position(|a| *a == algorithm)
            .expect("algorithm in supported set");
        &self.key_hashes[index]
    }

    /// Certificate key for one of this issuer's serials, as a requester using
    /// `algorithm` would present it.
    pub fn key_for(&self, algorithm: HashAlgorithm, serial: SerialNumber) -> CertificateKey {
        CertificateKey {
            issuer_name_hash: self.name_hash(algorithm).to_vec(),
            issuer_key_hash: self.key_hash(algorithm).to_vec(),
            serial_number: serial,
        }
    }
}

/// An immutable, fully built view of one issuer's revocation data. Created
/// wholesale by ingestion and published by a single pointer swap; never
/// mutated afterwards.
#[derive(Debug, Clone)]
pub struct RevocationSnapshot {
    issuer: IssuerIdent,
    statuses: HashMap<SerialNumber, CertStatus>,
    this_update: DateTime<Utc>,
    next_update: Option<DateTime<Utc>>,
    crl_number: Option<Vec<u8>>,
    crl_url: Option<String>,
    ca_revocation: Option<CaRevocationInfo>,
}

impl RevocationSnapshot {
    pub fn new(
        issuer: IssuerIdent,
        this_update: DateTime<Utc>,
        next_update: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            issuer,
            statuses: HashMap::new(),
            this_update,
            next_update,
            crl_number: None,
            crl_url: None,
            ca_revocation: None,
        }
    }

    pub fn insert_status(&mut self, serial: SerialNumber, status: CertStatus) {
        self.statuses.insert(serial, status);
    }

    pub fn remove_status(&mut self, serial: &SerialNumber) {
        self.statuses.remove(serial);
    }

    pub fn set_crl_number(&mut self, number: Option<Vec<u8>>) {
        self.crl_number = number;
    }

    pub fn set_crl_url(&mut self, url: Option<String>) {
        self.crl_url = url;
    }

    pub fn set_ca_revocation(&mut self, info: Option<CaRevocationInfo>) {
        self.ca_revocation = info;
    }

    pub fn issuer(&self) -> &IssuerIdent {
        &self.issuer
    }

    pub fn this_update(&self) -> DateTime<Utc> {
        self.this_update
    }

    pub fn next_update(&self) -> Option<DateTime<Utc>> {
        self.next_update
    }

    pub fn crl_number(&self) -> Option<&[u8]> {
        self.crl_number.as_deref()
    }

    pub fn crl_url(&self) -> Option<&str> {
        self.crl_url.as_deref()
    }

    pub fn ca_revocation(&self) -> Option<&CaRevocationInfo> {
        self.ca_revocation.as_ref()
    }

    pub fn entry_count(&self) -> usize {
        self.statuses.len()
    }

    /// Point status lookup. A key for a foreign issuer or an absent serial is
    /// `Unknown`, except that a revoked CA dominates: every certificate whose
    /// own revocation (if any) is not earlier than the CA's reports revoked
    /// at the CA's revocation event.
    pub fn status_of(&self, key: &CertificateKey) -> CertStatus {
        if !self.issuer.matches(key) {
            return CertStatus::Unknown;
        }

        let own = self.statuses.get(&key.serial_number);

        if let Some(ca) = &self.ca_revocation {
            let own_wins = matches!(
                own,
                Some(CertStatus::Revoked(info)) if info.revocation_time < ca.revocation_time
            );
            if !own_wins {
                return CertStatus::Revoked(RevocationInfo {
                    reason: ca.reason,
                    revocation_time: ca.revocation_time,
                    invalidity_time: ca.invalidity_time,
                });
            }
        }

        own.cloned().unwrap_or(CertStatus::Unknown)
    }
}
