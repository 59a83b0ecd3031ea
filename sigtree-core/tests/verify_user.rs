//! End-to-end verification against a mock server.
//!
//! Each test builds a real signed chain with `LinkBuilder`, publishes a
//! matching two-level Merkle tree through `MockApi`, and drives the full
//! `VerifyEngine::verify_user` pass over it.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use sigtree_core::keyfamily::KeyStatus;
use sigtree_core::merkle::{MerkleError, MerkleTriple};
use sigtree_core::sig_chain::ChainError;
use sigtree_core::store::LocalStore;
use sigtree_core::transport::{FetchError, MockApi, WirePathStep, WireRoot, WireSig};
use sigtree_core::{
    KeyPair, LinkBuilder, ServerKeyRecord, TrustedKeyring, VerifyContext, VerifyEngine,
    VerifyError,
};
use sigtree_model::{Fokid, LinkId, Seqno, SigId, Uid};

const UID: Uid = Uid([0xaa; 16]);
const USERNAME: &str = "alice";

fn engine(api: Arc<MockApi>, db_path: &Path, root_signer: &KeyPair) -> VerifyEngine {
    let store = LocalStore::open(db_path).expect("open store");
    let ctx = VerifyContext::new(
        api,
        Arc::new(store),
        TrustedKeyring::new().pin(root_signer.verifying_key()),
    );
    VerifyEngine::new(ctx)
}

fn tail_triple(wires: &[WireSig]) -> MerkleTriple {
    let tail = wires.last().expect("nonempty chain");
    MerkleTriple {
        seqno: Seqno(wires.len() as u64),
        link_id: LinkId::hash_of(tail.payload_json.as_bytes()),
        sig_id: SigId::hash_of(tail.sig.as_bytes()),
    }
}

/// Publish a tree whose single leaf holds `leaf_value` for UID (no entry at
/// all for `None`), with the root statement signed by `root_signer` at
/// `root_seqno`.
fn serve_tree(api: &MockApi, root_signer: &KeyPair, root_seqno: u64, leaf_value: Option<Value>) {
    let uid_hex = UID.to_string();
    let prefix = uid_hex[..1].to_string();

    let mut leaf_tab = serde_json::Map::new();
    if let Some(value) = leaf_value {
        leaf_tab.insert(uid_hex.clone(), value);
    }
    let leaf_json = json!({ "type": 2, "tab": leaf_tab }).to_string();
    let leaf_hash = sigtree_model::NodeHash::of_sha256(leaf_json.as_bytes());

    let mut root_tab = serde_json::Map::new();
    root_tab.insert(prefix.clone(), Value::String(leaf_hash.to_string()));
    let root_json = json!({ "type": 1, "tab": root_tab }).to_string();
    let root_hash = sigtree_model::NodeHash::of_sha256(root_json.as_bytes());

    let payload = json!({
        "seqno": root_seqno,
        "ctime": 5000,
        "key": { "fingerprint": root_signer.fingerprint().to_string() },
        "root": root_hash.to_string(),
    })
    .to_string();
    let root = WireRoot {
        sig: root_signer.sign_payload(&payload),
        payload_json: payload,
    };

    api.respond(
        "merkle/path",
        json!({
            "root": root,
            "path": [
                WirePathStep { prefix, node: root_json },
                WirePathStep { prefix: uid_hex, node: leaf_json },
            ],
            "uid": UID,
            "id_version": 1,
        }),
    );
}

fn serve_user(api: &MockApi, root_signer: &KeyPair, root_seqno: u64, wires: &[WireSig]) {
    let triple = tail_triple(wires);
    serve_tree(api, root_signer, root_seqno, Some(json!([2, triple, null])));
    api.respond("sig/get", json!({ "sigs": wires }));
}

/// Eldest link plus one sibkey delegation, both signed correctly.
fn two_link_chain(eldest: &KeyPair, sibkey: &KeyPair) -> Vec<WireSig> {
    let wire1 = LinkBuilder::new(Seqno(1), UID, USERNAME)
        .ctime(1000)
        .eldest_kid(eldest.kid())
        .eldest()
        .sign(eldest);
    let wire2 = LinkBuilder::new(Seqno(2), UID, USERNAME)
        .ctime(1100)
        .prev(LinkId::hash_of(wire1.payload_json.as_bytes()))
        .eldest_kid(eldest.kid())
        .sibkey(sibkey.kid())
        .sign(eldest);
    vec![wire1, wire2]
}

#[test]
fn test_full_verification_of_a_simple_chain() {
    let root_signer = KeyPair::generate();
    let eldest = KeyPair::generate();
    let sibkey = KeyPair::generate();
    let api = Arc::new(MockApi::new());
    let dir = tempfile::tempdir().unwrap();

    serve_user(&api, &root_signer, 1, &two_link_chain(&eldest, &sibkey));
    let engine = engine(api, &dir.path().join("cache.redb"), &root_signer);

    let user = engine.verify_user(UID, USERNAME, None).unwrap();
    assert_eq!(user.chain.len(), 2);
    assert!(user.has_active_key());
    assert_eq!(user.ckf.eldest_kid(), Some(&eldest.kid()));
    assert_eq!(
        user.ckf
            .find_active_sibkey(&Fokid::from_kid(sibkey.kid()), 1200)
            .unwrap(),
        sibkey.kid()
    );
}

#[test]
fn test_empty_leaf_verifies_to_an_empty_user() {
    let root_signer = KeyPair::generate();
    let api = Arc::new(MockApi::new());
    let dir = tempfile::tempdir().unwrap();

    // Leaf tab holds no entry at all for this uid.
    serve_tree(&api, &root_signer, 1, None);
    let engine = engine(api, &dir.path().join("cache.redb"), &root_signer);

    let user = engine.verify_user(UID, USERNAME, None).unwrap();
    assert!(user.chain.is_empty());
    assert!(!user.has_active_key());
}

#[test]
fn test_revoked_key_refuses_later_signatures() {
    let root_signer = KeyPair::generate();
    let eldest = KeyPair::generate();
    let sibkey = KeyPair::generate();
    let api = Arc::new(MockApi::new());
    let dir = tempfile::tempdir().unwrap();

    let mut wires = two_link_chain(&eldest, &sibkey);
    let wire3 = LinkBuilder::new(Seqno(3), UID, USERNAME)
        .ctime(1200)
        .prev(LinkId::hash_of(wires[1].payload_json.as_bytes()))
        .eldest_kid(eldest.kid())
        .revoke_kids(vec![sibkey.kid()])
        .sign(&eldest);
    wires.push(wire3);
    serve_user(&api, &root_signer, 1, &wires);
    let engine = engine(api, &dir.path().join("cache.redb"), &root_signer);

    let user = engine.verify_user(UID, USERNAME, None).unwrap();
    assert_eq!(user.chain.len(), 3);
    // Once delegation has happened the eldest no longer stands in, so
    // revoking the only sibkey leaves the user without a usable key.
    assert!(!user.has_active_key());
    let info = user.ckf.info(&sibkey.kid()).unwrap();
    assert_eq!(info.status, KeyStatus::Revoked);
    assert!(user
        .ckf
        .find_active_sibkey(&Fokid::from_kid(sibkey.kid()), 1300)
        .is_err());
}

#[test]
fn test_server_withholding_the_endorsed_tail_is_rejected() {
    let root_signer = KeyPair::generate();
    let eldest = KeyPair::generate();
    let sibkey = KeyPair::generate();
    let api = Arc::new(MockApi::new());
    let dir = tempfile::tempdir().unwrap();

    let wires = two_link_chain(&eldest, &sibkey);
    // Tree endorses the full chain, sig/get serves only the genesis link.
    let triple = tail_triple(&wires);
    serve_tree(&api, &root_signer, 1, Some(json!([2, triple, null])));
    api.respond("sig/get", json!({ "sigs": [wires[0].clone()] }));
    let engine = engine(api, &dir.path().join("cache.redb"), &root_signer);

    let err = engine.verify_user(UID, USERNAME, None).unwrap_err();
    assert!(matches!(
        err,
        VerifyError::Chain(ChainError::ServerChain(_))
    ));
}

#[test]
fn test_tampered_link_payload_is_rejected() {
    let root_signer = KeyPair::generate();
    let eldest = KeyPair::generate();
    let sibkey = KeyPair::generate();
    let api = Arc::new(MockApi::new());
    let dir = tempfile::tempdir().unwrap();

    let mut wires = two_link_chain(&eldest, &sibkey);
    // Flip the seqno digit in the served payload. The link id in the tree
    // still names the original bytes, so corroboration fails first.
    let original_triple = tail_triple(&wires);
    let mut bytes = wires[1].payload_json.clone().into_bytes();
    let pos = wires[1].payload_json.find("\"seqno\":2").unwrap() + 8;
    bytes[pos] = b'3';
    wires[1].payload_json = String::from_utf8(bytes).unwrap();
    serve_tree(&api, &root_signer, 1, Some(json!([2, original_triple, null])));
    api.respond("sig/get", json!({ "sigs": wires }));
    let engine = engine(api, &dir.path().join("cache.redb"), &root_signer);

    assert!(engine.verify_user(UID, USERNAME, None).is_err());
}

#[test]
fn test_root_rollback_rejected_across_restart() {
    let root_signer = KeyPair::generate();
    let eldest = KeyPair::generate();
    let sibkey = KeyPair::generate();
    let api = Arc::new(MockApi::new());
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("cache.redb");

    let wires = two_link_chain(&eldest, &sibkey);
    serve_user(&api, &root_signer, 10, &wires);
    {
        let engine = engine(api.clone(), &db, &root_signer);
        engine.verify_user(UID, USERNAME, None).unwrap();
    }

    // New process: fresh engine over the same store. The server regresses
    // to an older (still correctly signed) root.
    serve_user(&api, &root_signer, 5, &wires);
    let engine = engine(api, &db, &root_signer);
    let err = engine.verify_user(UID, USERNAME, None).unwrap_err();
    assert!(matches!(
        err,
        VerifyError::Merkle(MerkleError::Rollback {
            last: Seqno(10),
            got: Seqno(5)
        })
    ));
}

#[test]
fn test_second_verification_reuses_the_link_cache() {
    let root_signer = KeyPair::generate();
    let eldest = KeyPair::generate();
    let sibkey = KeyPair::generate();
    let api = Arc::new(MockApi::new());
    let dir = tempfile::tempdir().unwrap();

    serve_user(&api, &root_signer, 1, &two_link_chain(&eldest, &sibkey));
    let engine = engine(api, &dir.path().join("cache.redb"), &root_signer);

    engine.verify_user(UID, USERNAME, None).unwrap();
    let user = engine.verify_user(UID, USERNAME, None).unwrap();
    assert_eq!(user.chain.len(), 2);
    assert!(user.has_active_key());
}

#[test]
fn test_timeout_surfaces_as_a_fetch_error() {
    let root_signer = KeyPair::generate();
    let api = Arc::new(MockApi::new());
    let dir = tempfile::tempdir().unwrap();

    api.start_timing_out();
    let engine = engine(api, &dir.path().join("cache.redb"), &root_signer);

    let err = engine.verify_user(UID, USERNAME, None).unwrap_err();
    assert!(matches!(
        err,
        VerifyError::Merkle(MerkleError::Fetch(FetchError::TimedOut(_)))
    ));
}

#[test]
fn test_server_key_records_cross_checked_against_chain() {
    let root_signer = KeyPair::generate();
    let eldest = KeyPair::generate();
    let sibkey = KeyPair::generate();
    let api = Arc::new(MockApi::new());
    let dir = tempfile::tempdir().unwrap();

    serve_user(&api, &root_signer, 1, &two_link_chain(&eldest, &sibkey));
    let engine = engine(api, &dir.path().join("cache.redb"), &root_signer);

    let records = vec![
        ServerKeyRecord {
            kid: eldest.kid(),
            bundle: eldest.kid().to_string(),
            sibkey: true,
            eldest_kid: Some(eldest.kid()),
        },
        ServerKeyRecord {
            kid: sibkey.kid(),
            bundle: sibkey.kid().to_string(),
            sibkey: true,
            eldest_kid: Some(eldest.kid()),
        },
    ];
    let user = engine.verify_user(UID, USERNAME, Some(&records)).unwrap();
    assert!(user.has_active_key());

    // A record whose bundle decodes to a different kid is rejected.
    let mut forged = records.clone();
    forged[1].bundle = eldest.kid().to_string();
    let err = engine
        .verify_user(UID, USERNAME, Some(&forged))
        .unwrap_err();
    assert!(matches!(err, VerifyError::KeyFamily(_)));
}
