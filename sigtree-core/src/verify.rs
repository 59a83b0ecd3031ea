//! Top-level verification driver
//!
//! Ties the stages together: tree lookup endorses a chain tail, the chain
//! loader fetches and verifies links up to that tail, and the key family
//! replay turns the verified links into the user's computed key state.

use std::sync::Arc;

use sigtree_model::Uid;
use thiserror::Error;

use crate::context::VerifyContext;
use crate::keyfamily::{ComputedKeyFamily, KeyFamily, KeyFamilyError, ServerKeyRecord};
use crate::merkle::{MerkleClient, MerkleError, MerkleRoot};
use crate::sig_chain::{ChainError, SigChain};
use crate::store::StoreError;
use crate::transport::FetchError;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error(transparent)]
    Merkle(#[from] MerkleError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    KeyFamily(#[from] KeyFamilyError),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Outcome of a full verification pass over one user.
#[derive(Debug)]
pub struct VerifiedUser {
    pub uid: Uid,
    pub username: String,
    pub root: MerkleRoot,
    pub chain: SigChain,
    pub ckf: ComputedKeyFamily,
    pub id_version: u64,
}

impl VerifiedUser {
    /// Whether the user holds any usable signing key right now.
    pub fn has_active_key(&self) -> bool {
        self.ckf.has_active_key()
    }
}

/// A verification engine over one trust configuration. Cheap to clone
/// handles are not needed; share one engine across sessions so the root
/// cache and rollback floor are common.
pub struct VerifyEngine {
    ctx: VerifyContext,
    merkle: Arc<MerkleClient>,
}

impl VerifyEngine {
    pub fn new(ctx: VerifyContext) -> Self {
        Self {
            ctx,
            merkle: Arc::new(MerkleClient::new()),
        }
    }

    pub fn context(&self) -> &VerifyContext {
        &self.ctx
    }

    /// Verify one user end to end.
    ///
    /// `key_records` is the server's key inventory when it supplies one;
    /// without it the eldest key is bootstrapped from the chain's first
    /// link. A user whose leaf is empty verifies successfully to an empty
    /// chain and an empty key family.
    pub fn verify_user(
        &self,
        uid: Uid,
        username: &str,
        key_records: Option<&[ServerKeyRecord]>,
    ) -> Result<VerifiedUser, VerifyError> {
        let lookup = self.merkle.lookup_user(&self.ctx, uid)?;

        let Some(tail) = lookup.leaf.public else {
            tracing::info!(%uid, %username, "empty leaf, user has no chain");
            return Ok(VerifiedUser {
                uid,
                username: username.to_string(),
                root: lookup.root,
                chain: SigChain::new(uid, username),
                ckf: ComputedKeyFamily::new(KeyFamily::default()),
                id_version: lookup.leaf.id_version,
            });
        };

        // Rehydrate what the link cache already holds so already-verified
        // links short-circuit, then fetch the rest up to the endorsed tail.
        let mut chain = match SigChain::from_cache(&self.ctx.store, uid, username, &tail.link_id) {
            Ok(chain) => chain,
            Err(err) => {
                tracing::warn!(%uid, %err, "link cache rehydration failed, full reload");
                SigChain::new(uid, username)
            }
        };
        chain.load_from_server(&self.ctx, Some(&tail))?;
        chain.verify_chain()?;
        chain.persist(&self.ctx.store)?;

        let kf = match key_records {
            Some(records) => KeyFamily::import(records)?,
            None => KeyFamily::default(),
        };
        let ckf = ComputedKeyFamily::replay(kf, chain.links())?;

        tracing::info!(
            %uid,
            %username,
            links = chain.len(),
            active = ckf.has_active_key(),
            "user verified"
        );
        Ok(VerifiedUser {
            uid,
            username: username.to_string(),
            root: lookup.root,
            chain,
            ckf,
            id_version: lookup.leaf.id_version,
        })
    }
}
