pub mod config;
pub mod error;
pub mod health;
pub mod ingest;
pub mod responder;
pub mod signer;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::{OcspError, Result};
