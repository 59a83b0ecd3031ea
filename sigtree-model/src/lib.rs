//! sigtree-model: primitive types for the sigtree verification engine
//!
//! Dependency-light newtypes shared by every layer: content-addressed
//! identifiers, key identifiers, tagged Merkle node hashes, and chain time.

pub mod kid;
pub mod node_hash;
pub mod time;
pub mod types;

pub use kid::{Fokid, KeyAlgo, Kid, KidError};
pub use node_hash::{NodeHash, NodeHashError};
pub use time::ChainTime;
pub use types::{DeviceId, Fingerprint, LinkId, Seqno, SigId, Uid};
