//! Sigtree Core
//!
//! Verification engine for signed identity chains endorsed by a Merkle tree:
//! - **ChainLink**: One signed statement, staged verification with memo flags
//! - **SigChain**: Hash-linked chain loading, verification, and caching
//! - **MerkleClient**: Root acceptance (pinned signers, anti-rollback) and proofs
//! - **KeyFamily / ComputedKeyFamily**: Key inventory and delegation replay
//! - **VerifyEngine**: End-to-end per-user verification driver
//! - **LocalStore**: redb-backed link and root cache
//! - **ApiClient**: Server transport seam with an in-memory test double

pub mod chain_link;
pub mod context;
pub mod crypto;
pub mod keyfamily;
pub mod keyring;
pub mod merkle;
pub mod sig_chain;
pub mod store;
pub mod transport;
pub mod verify;

pub use chain_link::{ChainLink, LinkBuilder, LinkDetail, LinkError, LinkPayload};
pub use context::{VerifyContext, DEFAULT_FETCH_TIMEOUT};
pub use crypto::{CryptoError, KeyPair, SigEnvelope};
pub use keyfamily::{
    ComputedKeyFamily, KeyFamily, KeyFamilyError, KeyStatus, ServerKeyRecord,
};
pub use keyring::TrustedKeyring;
pub use merkle::{
    MerkleClient, MerkleError, MerkleLookup, MerkleRoot, MerkleTriple, MerkleUserLeaf,
};
pub use sig_chain::{ChainError, SigChain};
pub use store::{LocalStore, StoreError};
pub use transport::{ApiClient, ApiArgs, FetchError, MockApi};
pub use verify::{VerifiedUser, VerifyEngine, VerifyError};
