use thiserror::Error;

pub type Result<T> = std::result::Result<T, OcspError>;

#[derive(Error, Debug)]
pub enum OcspError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Request too large: {size} bytes exceeds limit of {limit}")]
    RequestTooLarge { size: usize, limit: usize },

    #[error("Unsupported hash algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Status store not yet initialized")]
    StoreNotReady,

    #[error("No idle signer available")]
    NoIdleSigner,

    #[error("Signing error on engine {engine}: {message}")]
    Signer { engine: String, message: String },

    #[error("Signer pool contract violation: {0}")]
    SignerContract(String),

    #[error("Ingestion error: {0}")]
    Ingestion(String),

    #[error("CRL parse error: {0}")]
    CrlParse(String),

    #[error("Certificate parse error: {0}")]
    CertParse(String),

    #[error("CRL issuer does not match configured CA: {0}")]
    IssuerMismatch(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}
