pub mod pool;

pub use pool::{BorrowedSigner, SignerPool, SignerPoolHealth};

use crate::config::SignatureAlgorithm;
use crate::{error::OcspError, Result};
use ring::rand::SystemRandom;
use ring::signature::{self, EcdsaKeyPair, Ed25519KeyPair, KeyPair, RsaKeyPair};
use std::sync::Arc;

/// One signing engine. Owned by a [`SignerPool`]; callers only ever see it
/// through a [`BorrowedSigner`] lent out by the pool.
pub struct SignerHandle {
    id: usize,
    pool_tag: u64,
    algorithm: SignatureAlgorithm,
    key: EngineKey,
    public_key: Vec<u8>,
    cert_chain: Arc<Vec<Vec<u8>>>,
    rng: SystemRandom,
}

enum EngineKey {
    Ed25519(Ed25519KeyPair),
    EcdsaP256(EcdsaKeyPair),
    Rsa(RsaKeyPair),
}

impl SignerHandle {
    pub(crate) fn from_pkcs8(
        id: usize,
        pool_tag: u64,
        algorithm: SignatureAlgorithm,
        pkcs8: &[u8],
        cert_chain: Arc<Vec<Vec<u8>>>,
    ) -> Result<Self> {
        let rng = SystemRandom::new();
        let key = match algorithm {
            SignatureAlgorithm::Ed25519 => {
                let kp = Ed25519KeyPair::from_pkcs8(pkcs8)
                    .map_err(|e| signer_error(id, e.to_string()))?;
                EngineKey::Ed25519(kp)
            }
            SignatureAlgorithm::EcdsaP256Sha256 => {
                let kp = EcdsaKeyPair::from_pkcs8(
                    &signature::ECDSA_P256_SHA256_ASN1_SIGNING,
                    pkcs8,
                    &rng,
                )
                .map_err(|e| signer_error(id, e.to_string()))?;
                EngineKey::EcdsaP256(kp)
            }
            SignatureAlgorithm::RsaPkcs1Sha256 => {
                let kp = RsaKeyPair::from_pkcs8(pkcs8)
                    .map_err(|e| signer_error(id, e.to_string()))?;
                EngineKey::Rsa(kp)
            }
        };

        let public_key = match &key {
            EngineKey::Ed25519(kp) => kp.public_key().as_ref().to_vec(),
            EngineKey::EcdsaP256(kp) => kp.public_key().as_ref().to_vec(),
            EngineKey::Rsa(kp) => kp.public_key().as_ref().to_vec(),
        };

        Ok(Self {
            id,
            pool_tag,
            algorithm,
            key,
            public_key,
            cert_chain,
            rng,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub(crate) fn pool_tag(&self) -> u64 {
        self.pool_tag
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// DER certificates bound to this engine, responder certificate first.
    pub fn certificate_chain(&self) -> &[Vec<u8>] {
        &self.cert_chain
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        match &self.key {
            EngineKey::Ed25519(kp) => Ok(kp.sign(message).as_ref().to_vec()),
            EngineKey::EcdsaP256(kp) => {
                let sig = kp
                    .sign(&self.rng, message)
                    .map_err(|e| signer_error(self.id, e.to_string()))?;
                Ok(sig.as_ref().to_vec())
            }
            EngineKey::Rsa(kp) => {
                let mut sig = vec![0u8; kp.public().modulus_len()];
                kp.sign(&signature::RSA_PKCS1_SHA256, &self.rng, message, &mut sig)
                    .map_err(|e| signer_error(self.id, e.to_string()))?;
                Ok(sig)
            }
        }
    }

    /// Verifies a signature against this engine's own public key. Used by the
    /// pool health probe.
    pub fn verify(&self, message: &[u8], sig: &[u8]) -> Result<()> {
        let algorithm: &dyn signature::VerificationAlgorithm = match self.algorithm {
            SignatureAlgorithm::Ed25519 => &signature::ED25519,
            SignatureAlgorithm::EcdsaP256Sha256 => &signature::ECDSA_P256_SHA256_ASN1,
            SignatureAlgorithm::RsaPkcs1Sha256 => &signature::RSA_PKCS1_2048_8192_SHA256,
        };
        signature::UnparsedPublicKey::new(algorithm, &self.public_key)
            .verify(message, sig)
            .map_err(|_| signer_error(self.id, "signature verification failed".to_string()))
    }
}

fn signer_error(id: usize, message: String) -> OcspError {
    OcspError::Signer {
        engine: format!("engine-{}", id),
        message,
    }
}
