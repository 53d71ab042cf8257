use crate::config::SignatureAlgorithm;
use crate::types::{CrlReason, HashAlgorithm, SerialNumber};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One certificate identifier from a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertId {
    pub hash_algorithm: HashAlgorithm,
    pub issuer_name_hash: Vec<u8>,
    pub issuer_key_hash: Vec<u8>,
    pub serial_number: SerialNumber,
}

/// A decoded OCSP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcspRequest {
    pub cert_ids: Vec<CertId>,
    pub nonce: Option<Vec<u8>>,
}

/// Protocol-level response status (RFC 6960 OCSPResponseStatus).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OcspResponseStatus {
    Successful,
    MalformedRequest,
    InternalError,
    TryLater,
    SigRequired,
    Unauthorized,
}

impl OcspResponseStatus {
    pub fn code(&self) -> u8 {
        match self {
            OcspResponseStatus::Successful => 0,
            OcspResponseStatus::MalformedRequest => 1,
            OcspResponseStatus::InternalError => 2,
            OcspResponseStatus::TryLater => 3,
            OcspResponseStatus::SigRequired => 5,
            OcspResponseStatus::Unauthorized => 6,
        }
    }
}

/// Status of one certificate in a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SingleStatus {
    Good,
    Revoked {
        revocation_time: DateTime<Utc>,
        reason: CrlReason,
        invalidity_time: Option<DateTime<Utc>>,
    },
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleResponse {
    pub cert_id: CertId,
    pub status: SingleStatus,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
}

/// The responder's identity in a signed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponderId {
    /// SHA-1 of the responder certificate's public key.
    ByKeyHash(Vec<u8>),
    /// DER-encoded responder subject name.
    ByName(Vec<u8>),
}

/// Everything a signed response carries apart from the signature itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseData {
    pub responder_id: ResponderId,
    pub produced_at: DateTime<Utc>,
    pub responses: Vec<SingleResponse>,
    pub nonce: Option<Vec<u8>>,
}

/// Seam to the ASN.1 encoding collaborator. The core builds and signs
/// response structures; how they map to DER is the codec's concern.
pub trait OcspCodec: Send + Sync {
    /// Decodes raw request bytes. Malformed input fails with
    /// [`crate::error::OcspError::MalformedRequest`]; a certificate
    /// identifier using a hash algorithm outside the supported set fails
    /// with [`crate::error::OcspError::UnsupportedAlgorithm`].
    fn decode_request(&self, raw: &[u8]) -> Result<OcspRequest>;

    /// Encodes the to-be-signed portion of a response.
    fn encode_tbs(&self, data: &ResponseData) -> Result<Vec<u8>>;

    /// Encodes a complete successful response with its signature and the
    /// signer's certificate chain.
    fn encode_response(
        &self,
        data: &ResponseData,
        algorithm: SignatureAlgorithm,
        signature: &[u8],
        certificate_chain: &[Vec<u8>],
    ) -> Result<Vec<u8>>;

    /// Encodes an unsigned error response carrying only a status.
    fn encode_status(&self, status: OcspResponseStatus) -> Result<Vec<u8>>;
}
