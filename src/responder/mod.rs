pub mod cache;
pub mod codec;

pub use cache::CacheHeaders;
pub use codec::{
    CertId, OcspCodec, OcspRequest, OcspResponseStatus, ResponderId, ResponseData,
    SingleResponse, SingleStatus,
};

use crate::config::ResponderConfig;
use crate::signer::SignerPool;
use crate::store::StatusStore;
use crate::types::{CertStatus, CertificateKey};
use crate::{config::NoncePolicy, error::OcspError, Result};
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Transport-level classification of one answered request. The embedding
/// server maps this to an HTTP status; protocol-level failures still carry a
/// response body (an unsigned OCSPResponse status), transport-level ones do
/// not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    Success,
    MalformedRequest,
    RequestTooLarge,
    TryLater,
    InternalError,
}

/// Response bytes plus optional RFC 5019 cache metadata.
#[derive(Debug)]
pub struct OcspAnswer {
    pub outcome: AnswerOutcome,
    pub body: Option<Bytes>,
    pub cache: Option<CacheHeaders>,
}

/// Answers OCSP requests for one configured path. Holds no per-request
/// state: each call to [`OcspResponder::answer`] runs the full
/// decode → resolve → sign → cache-metadata pipeline.
pub struct OcspResponder {
    config: ResponderConfig,
    store: Arc<dyn StatusStore>,
    pool: Arc<SignerPool>,
    codec: Arc<dyn OcspCodec>,
}

impl OcspResponder {
    pub fn new(
        config: ResponderConfig,
        store: Arc<dyn StatusStore>,
        pool: Arc<SignerPool>,
        codec: Arc<dyn OcspCodec>,
    ) -> Self {
        Self {
            config,
            store,
            pool,
            codec,
        }
    }

    pub fn config(&self) -> &ResponderConfig {
        &self.config
    }

    pub fn supports_get(&self) -> bool {
        self.config.supports_get
    }

    pub fn max_request_size(&self) -> usize {
        self.config.max_request_size
    }

    /// Answers one request. `via_get` marks GET-style delivery, which is the
    /// only transport eligible for cache metadata.
    pub async fn answer(&self, raw: &[u8], via_get: bool) -> OcspAnswer {
        // size is checked before anything else touches the store or the pool
        if raw.len() > self.config.max_request_size {
            warn!(
                path = %self.config.path,
                size = raw.len(),
                limit = self.config.max_request_size,
                "rejecting oversized request"
            );
            return OcspAnswer {
                outcome: AnswerOutcome::RequestTooLarge,
                body: None,
                cache: None,
            };
        }

        let request = match self.codec.decode_request(raw) {
            Ok(request) => request,
            Err(e) => {
                debug!(path = %self.config.path, "undecodable request: {}", e);
                return self.status_answer(
                    OcspResponseStatus::MalformedRequest,
                    AnswerOutcome::MalformedRequest,
                );
            }
        };

        if request.cert_ids.is_empty() {
            return self.status_answer(
                OcspResponseStatus::MalformedRequest,
                AnswerOutcome::MalformedRequest,
            );
        }

        if self.config.nonce_policy == NoncePolicy::Require && request.nonce.is_none() {
            return self.status_answer(
                OcspResponseStatus::MalformedRequest,
                AnswerOutcome::MalformedRequest,
            );
        }

        let (this_update, next_update) = match self.store.validity_window() {
            Ok(window) => window,
            Err(OcspError::StoreNotReady) => {
                return self.status_answer(OcspResponseStatus::TryLater, AnswerOutcome::TryLater)
            }
            Err(e) => {
                error!(path = %self.config.path, "status store failure: {}", e);
                return self.status_answer(
                    OcspResponseStatus::InternalError,
                    AnswerOutcome::InternalError,
                );
            }
        };

        let mut responses = Vec::with_capacity(request.cert_ids.len());
        for cert_id in &request.cert_ids {
            let key = CertificateKey {
                issuer_name_hash: cert_id.issuer_name_hash.clone(),
                issuer_key_hash: cert_id.issuer_key_hash.clone(),
                serial_number: cert_id.serial_number.clone(),
            };
            let status = match self.store.lookup(&key).await {
                Ok(status) => status,
                Err(OcspError::StoreNotReady) => {
                    return self
                        .status_answer(OcspResponseStatus::TryLater, AnswerOutcome::TryLater)
                }
                Err(e) => {
                    error!(path = %self.config.path, "status lookup failure: {}", e);
                    return self.status_answer(
                        OcspResponseStatus::InternalError,
                        AnswerOutcome::InternalError,
                    );
                }
            };
            responses.push(SingleResponse {
                cert_id: cert_id.clone(),
                status: to_single_status(status),
                this_update,
                next_update,
            });
        }

        let nonce = match self.config.nonce_policy {
            NoncePolicy::Ignore => None,
            NoncePolicy::Echo | NoncePolicy::Require => request.nonce.clone(),
        };

        let data = ResponseData {
            responder_id: ResponderId::ByKeyHash(self.pool.responder_key_hash().to_vec()),
            produced_at: Utc::now(),
            responses,
            nonce,
        };

        let encoded = match self.sign_response(&data).await {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(path = %self.config.path, "could not sign response: {}", e);
                return self.status_answer(
                    OcspResponseStatus::InternalError,
                    AnswerOutcome::InternalError,
                );
            }
        };

        // RFC 5019 6.2: only a GET-delivered, single, definitive answer with
        // no nonce may be cache-annotated
        let cache = if via_get && request.cert_ids.len() == 1 && request.nonce.is_none() {
            Some(CacheHeaders::derive(
                &encoded,
                this_update,
                next_update,
                self.config.cache_max_age_secs,
                Utc::now(),
            ))
        } else {
            None
        };

        OcspAnswer {
            outcome: AnswerOutcome::Success,
            body: Some(Bytes::from(encoded)),
            cache,
        }
    }

    async fn sign_response(&self, data: &ResponseData) -> Result<Vec<u8>> {
        let tbs = self.codec.encode_tbs(data)?;

        let signer = self.pool.borrow(self.config.sign_timeout()).await?;
        let engine = signer.id();
        let signed = signer.sign(&tbs);
        if let Err(e) = self.pool.give_back(signer) {
            error!(path = %self.config.path, engine, "signer return failed: {}", e);
        }
        let signature = signed?;

        self.codec.encode_response(
            data,
            self.pool.algorithm(),
            &signature,
            self.pool.certificate_chain(),
        )
    }

    fn status_answer(&self, status: OcspResponseStatus, outcome: AnswerOutcome) -> OcspAnswer {
        let body = match self.codec.encode_status(status) {
            Ok(bytes) => Some(Bytes::from(bytes)),
            Err(e) => {
                error!(path = %self.config.path, "could not encode status response: {}", e);
                None
            }
        };
        OcspAnswer {
            outcome,
            body,
            cache: None,
        }
    }
}

fn to_single_status(status: CertStatus) -> SingleStatus {
    match status {
        CertStatus::Good => SingleStatus::Good,
        CertStatus::Unknown => SingleStatus::Unknown,
        CertStatus::Revoked(info) => SingleStatus::Revoked {
            revocation_time: info.revocation_time,
            reason: info.reason,
            invalidity_time: info.invalidity_time,
        },
    }
}

/// Maps servable paths to responders, longest configured prefix first, the
/// way the original server resolves its servlet paths.
pub struct ResponderRegistry {
    responders: RwLock<Vec<(String, Arc<OcspResponder>)>>,
}

impl Default for ResponderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponderRegistry {
    pub fn new() -> Self {
        Self {
            responders: RwLock::new(Vec::new()),
        }
    }

    pub fn register(&self, responder: Arc<OcspResponder>) {
        let mut responders = self.responders.write();
        responders.push((responder.config().path.clone(), responder));
        responders.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    }

    /// Longest-prefix match; returns the responder and the path remainder
    /// (the base64 request segment on GET, empty on POST).
    pub fn responder_for_path(&self, path: &str) -> Option<(Arc<OcspResponder>, String)> {
        let responders = self.responders.read();
        for (prefix, responder) in responders.iter() {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                let rest = rest.strip_prefix('/').unwrap_or(rest);
                return Some((Arc::clone(responder), rest.to_string()));
            }
        }
        None
    }
}

/// Decodes the base64 request segment of a GET path. URL-safe alphabet per
/// the transport contract, with a fallback to the standard alphabet.
pub fn decode_get_segment(segment: &str) -> Result<Vec<u8>> {
    URL_SAFE
        .decode(segment)
        .or_else(|_| STANDARD.decode(segment))
        .map_err(|e| OcspError::MalformedRequest(format!("bad base64 request segment: {}", e)))
}
