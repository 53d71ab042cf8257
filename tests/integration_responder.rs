//! End-to-end answering path: CRL fixtures ingested into a store, a real
//! signer pool, and the bincode codec standing in for the DER collaborator.

mod common;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use common::{ed25519_pool, fixture, BincodeCodec, Envelope};
use ocspd::config::{
    CrlSourceConfig, NoncePolicy, ResponderConfig, SignatureAlgorithm, SignerPoolConfig,
};
use ocspd::ingest::CrlIngestionJob;
use ocspd::responder::{
    decode_get_segment, AnswerOutcome, CertId, OcspRequest, OcspResponder, ResponderRegistry,
    SingleStatus,
};
use ocspd::store::{IssuerIdent, RevocationStore, StatusStore};
use ocspd::types::{CrlReason, HashAlgorithm, SerialNumber};
use pretty_assertions::assert_eq;
use ring::digest;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

fn responder_config(path: &str) -> ResponderConfig {
    ResponderConfig {
        path: path.to_string(),
        max_request_size: 4096,
        supports_get: true,
        cache_max_age_secs: Some(60),
        nonce_policy: NoncePolicy::Echo,
        sign_timeout_ms: 500,
        signer: SignerPoolConfig {
            engine_count: 2,
            key_file: PathBuf::new(),
            algorithm: SignatureAlgorithm::Ed25519,
            certificate_chain_files: Vec::new(),
        },
        crl: CrlSourceConfig {
            crl_file: PathBuf::new(),
            ca_cert_file: PathBuf::new(),
            issuer_cert_file: None,
            crl_url: None,
            use_update_dates_from_crl: true,
            refresh_interval_secs: 60,
        },
    }
}

async fn ingested_store(dir: &TempDir) -> Arc<RevocationStore> {
    let crl_file = dir.path().join("ca.crl");
    let ca_cert_file = dir.path().join("ca.crt");
    std::fs::copy(fixture("crl.der"), &crl_file).unwrap();
    std::fs::copy(fixture("ca.der"), &ca_cert_file).unwrap();
    let mut marker = crl_file.clone().into_os_string();
    marker.push(".UPDATEME");
    std::fs::write(marker, b"").unwrap();

    let store = Arc::new(RevocationStore::new("e2e"));
    let job = CrlIngestionJob::new(
        CrlSourceConfig {
            crl_file,
            ca_cert_file,
            issuer_cert_file: None,
            crl_url: None,
            use_update_dates_from_crl: true,
            refresh_interval_secs: 60,
        },
        Arc::clone(&store),
    );
    job.run_once().await.unwrap();
    store
}

fn request_bytes(issuer: &IssuerIdent, serial: u64, nonce: Option<Vec<u8>>) -> Vec<u8> {
    let key = issuer.key_for(HashAlgorithm::Sha1, SerialNumber::from_u64(serial));
    bincode::serialize(&OcspRequest {
        cert_ids: vec![CertId {
            hash_algorithm: HashAlgorithm::Sha1,
            issuer_name_hash: key.issuer_name_hash,
            issuer_key_hash: key.issuer_key_hash,
            serial_number: key.serial_number,
        }],
        nonce,
    })
    .unwrap()
}

fn ca_issuer() -> IssuerIdent {
    IssuerIdent::from_ca_cert_der(&std::fs::read(fixture("ca.der")).unwrap()).unwrap()
}

#[tokio::test]
async fn answers_ingested_crl_over_get_with_cache_headers() {
    let dir = TempDir::new().unwrap();
    let store = ingested_store(&dir).await;
    let (this_update, next_update) = store.validity_window().unwrap();

    let pool = ed25519_pool("e2e-pool", 2);
    let responder = OcspResponder::new(
        responder_config("/status/ca1"),
        Arc::clone(&store) as Arc<dyn StatusStore>,
        Arc::clone(&pool),
        Arc::new(BincodeCodec),
    );

    // the GET transport delivers the request as a base64 path segment
    let segment = URL_SAFE.encode(request_bytes(&ca_issuer(), 5, None));
    let raw = decode_get_segment(&segment).unwrap();
    let answer = responder.answer(&raw, true).await;

    assert_eq!(answer.outcome, AnswerOutcome::Success);
    let body = answer.body.unwrap();
    let envelope: Envelope = bincode::deserialize(&body).unwrap();
    assert!(matches!(
        envelope.data.responses[0].status,
        SingleStatus::Revoked {
            reason: CrlReason::KeyCompromise,
            ..
        }
    ));
    assert_eq!(envelope.data.responses[0].this_update, this_update);
    assert_eq!(envelope.data.responses[0].next_update, next_update);

    // the signature verifies against the pool's own engines
    let tbs = bincode::serialize(&envelope.data).unwrap();
    let signer = pool.borrow(std::time::Duration::from_millis(100)).await.unwrap();
    signer.verify(&tbs, &envelope.signature).unwrap();
    pool.give_back(signer).unwrap();

    // RFC 5019 cache metadata
    let cache = answer.cache.unwrap();
    assert_eq!(cache.last_modified, this_update);
    assert_eq!(cache.expires, next_update);
    let sha1 = digest::digest(&digest::SHA1_FOR_LEGACY_USE_ONLY, &body);
    assert_eq!(cache.etag, format!("\"{}\"", hex::encode(sha1.as_ref())));
    assert_eq!(
        cache.cache_control,
        "max-age=60,public,no-transform,must-revalidate"
    );
    let names: Vec<&str> = cache.to_header_pairs().iter().map(|(n, _)| *n).collect();
    assert_eq!(
        names,
        ["Date", "Last-Modified", "Expires", "ETag", "Cache-Control"]
    );
}

#[tokio::test]
async fn many_concurrent_requests_share_the_pool() {
    let dir = TempDir::new().unwrap();
    let store = ingested_store(&dir).await;
    let pool = ed25519_pool("shared-pool", 2);
    let responder = Arc::new(OcspResponder::new(
        responder_config("/status/ca1"),
        store as Arc<dyn StatusStore>,
        Arc::clone(&pool),
        Arc::new(BincodeCodec),
    ));

    let issuer = ca_issuer();
    let mut tasks = Vec::new();
    for serial in [5u64, 7, 9, 5, 7, 9, 5, 9] {
        let responder = Arc::clone(&responder);
        let raw = request_bytes(&issuer, serial, None);
        tasks.push(tokio::spawn(async move {
            responder.answer(&raw, false).await
        }));
    }

    for task in tasks {
        let answer = task.await.unwrap();
        assert_eq!(answer.outcome, AnswerOutcome::Success);
    }
    // every engine made it back to the idle partition
    assert_eq!(pool.idle_count(), pool.capacity());
}

#[tokio::test]
async fn registry_routes_and_rejects_unknown_paths() {
    let dir = TempDir::new().unwrap();
    let store = ingested_store(&dir).await;
    let pool = ed25519_pool("routed-pool", 1);

    let registry = ResponderRegistry::new();
    registry.register(Arc::new(OcspResponder::new(
        responder_config("/status/ca1"),
        store as Arc<dyn StatusStore>,
        pool,
        Arc::new(BincodeCodec),
    )));

    let segment = URL_SAFE.encode(request_bytes(&ca_issuer(), 7, None));
    let (responder, rest) = registry
        .responder_for_path(&format!("/status/ca1/{}", segment))
        .unwrap();
    assert_eq!(rest, segment);

    let raw = decode_get_segment(&rest).unwrap();
    let answer = responder.answer(&raw, true).await;
    assert_eq!(answer.outcome, AnswerOutcome::Success);

    assert!(registry.responder_for_path("/status/ca2/AAAA").is_none());
}

#[tokio::test]
async fn refresh_between_answers_swaps_results_atomically() {
    let dir = TempDir::new().unwrap();
    let crl_file = dir.path().join("ca.crl");
    let ca_cert_file = dir.path().join("ca.crt");
    std::fs::copy(fixture("crl.der"), &crl_file).unwrap();
    std::fs::copy(fixture("ca.der"), &ca_cert_file).unwrap();

    let store = Arc::new(RevocationStore::new("swap"));
    let job = Arc::new(CrlIngestionJob::new(
        CrlSourceConfig {
            crl_file: crl_file.clone(),
            ca_cert_file,
            issuer_cert_file: None,
            crl_url: None,
            use_update_dates_from_crl: true,
            refresh_interval_secs: 60,
        },
        Arc::clone(&store),
    ));

    let pool = ed25519_pool("swap-pool", 1);
    let responder = OcspResponder::new(
        responder_config("/status/ca1"),
        Arc::clone(&store) as Arc<dyn StatusStore>,
        pool,
        Arc::new(BincodeCodec),
    );

    // before any publish the responder answers tryLater
    let raw = request_bytes(&ca_issuer(), 5, None);
    let answer = responder.answer(&raw, false).await;
    assert_eq!(answer.outcome, AnswerOutcome::TryLater);

    // first ingestion flips it to definitive answers
    let mut marker = crl_file.into_os_string();
    marker.push(".UPDATEME");
    std::fs::write(&marker, b"").unwrap();
    job.run_once().await.unwrap();

    let answer = responder.answer(&raw, false).await;
    assert_eq!(answer.outcome, AnswerOutcome::Success);
}
