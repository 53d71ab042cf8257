//! Shared helpers for the integration suites: a bincode-backed stand-in for
//! the DER codec collaborator, fixture paths, and pool construction.
#![allow(dead_code)]

use ocspd::config::SignatureAlgorithm;
use ocspd::responder::{OcspCodec, OcspRequest, OcspResponseStatus, ResponseData};
use ocspd::signer::SignerPool;
use ocspd::{OcspError, Result};
use ring::rand::SystemRandom;
use ring::signature::Ed25519KeyPair;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub struct BincodeCodec;

#[derive(Serialize, Deserialize)]
pub struct Envelope {
    pub data: ResponseData,
    pub signature: Vec<u8>,
    pub chain: Vec<Vec<u8>>,
}

impl OcspCodec for BincodeCodec {
    fn decode_request(&self, raw: &[u8]) -> Result<OcspRequest> {
        bincode::deserialize(raw).map_err(|e| OcspError::MalformedRequest(e.to_string()))
    }

    fn encode_tbs(&self, data: &ResponseData) -> Result<Vec<u8>> {
        bincode::serialize(data).map_err(|e| OcspError::Codec(e.to_string()))
    }

    fn encode_response(
        &self,
        data: &ResponseData,
        _algorithm: SignatureAlgorithm,
        signature: &[u8],
        certificate_chain: &[Vec<u8>],
    ) -> Result<Vec<u8>> {
        bincode::serialize(&Envelope {
            data: data.clone(),
            signature: signature.to_vec(),
            chain: certificate_chain.to_vec(),
        })
        .map_err(|e| OcspError::Codec(e.to_string()))
    }

    fn encode_status(&self, status: OcspResponseStatus) -> Result<Vec<u8>> {
        Ok(vec![0xFF, status.code()])
    }
}

pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

pub fn ed25519_pool(name: &str, engines: usize) -> Arc<SignerPool> {
    let rng = SystemRandom::new();
    let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
    Arc::new(
        SignerPool::from_pkcs8(
            name,
            SignatureAlgorithm::Ed25519,
            pkcs8.as_ref(),
            engines,
            Vec::new(),
            Duration::from_millis(500),
        )
        .unwrap(),
    )
}
