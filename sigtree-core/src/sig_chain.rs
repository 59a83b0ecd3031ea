//! Sigchain loading and verification
//!
//! An ordered sequence of chain links for one user. Links are fetched from
//! the transport above the locally-known watermark, corroborated against the
//! Merkle-endorsed tail when one is supplied, then verified tail-to-head:
//! hash, payload, signature, linkage, and identity claim per link. Already
//! chain-verified links short-circuit the walk, which amortizes repeated
//! verification across sessions.

use sigtree_model::{LinkId, Seqno, Uid};
use thiserror::Error;

use crate::chain_link::{ChainLink, LinkError};
use crate::context::VerifyContext;
use crate::crypto::{verifying_key_from_kid, CryptoError};
use crate::merkle::MerkleTriple;
use crate::store::{LocalStore, StoreError};
use crate::transport::{fetch_sig_chain, FetchError};

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("broken linkage at seqno {seqno}: prev {claimed_prev:?} does not match {expected}")]
    Linkage {
        seqno: Seqno,
        expected: LinkId,
        claimed_prev: Option<LinkId>,
    },

    #[error("wrong seqno: expected {expected}, got {got}")]
    WrongSeqno { expected: Seqno, got: Seqno },

    #[error("genesis link must have no prev and seqno 1")]
    BadGenesis,

    #[error("server chain error: {0}")]
    ServerChain(String),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("chain is empty")]
    Empty,
}

/// The ordered chain for one user. Links are held head-to-tail; verification
/// walks them tail-to-head.
#[derive(Clone, Debug)]
pub struct SigChain {
    uid: Uid,
    username: String,
    links: Vec<ChainLink>,
}

impl SigChain {
    pub fn new(uid: Uid, username: impl Into<String>) -> Self {
        Self {
            uid,
            username: username.into(),
            links: Vec::new(),
        }
    }

    /// Rebuild a chain from the local link cache by walking prev pointers
    /// backwards from a known tail id. Links whose recomputed hash does not
    /// match their cache key come back unverified.
    pub fn from_cache(
        store: &LocalStore,
        uid: Uid,
        username: impl Into<String>,
        tail_id: &LinkId,
    ) -> Result<Self, ChainError> {
        let mut chain = Self::new(uid, username);
        let mut cursor = Some(*tail_id);
        let mut reversed = Vec::new();

        while let Some(id) = cursor {
            let Some(bytes) = store.get_link(&id)? else {
                break;
            };
            let link = ChainLink::from_cache_bytes(&id, &bytes)?;
            cursor = link.prev();
            reversed.push(link);
        }
        reversed.reverse();
        chain.links = reversed;
        Ok(chain)
    }

    pub fn uid(&self) -> &Uid {
        &self.uid
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    pub fn tail(&self) -> Option<&ChainLink> {
        self.links.last()
    }

    fn max_seqno(&self) -> Seqno {
        self.tail().map(|l| l.seqno()).unwrap_or(Seqno::ZERO)
    }

    /// Fetch links above the local watermark. When `merkle_tail` is given,
    /// one of the stored links must corroborate it, else the server is
    /// holding back (or rewriting) chain history and the load fails.
    ///
    /// With no tail supplied (first bootstrap load) the corroboration check
    /// does not run; callers doing real verification should pass the tail.
    pub fn load_from_server(
        &mut self,
        ctx: &VerifyContext,
        merkle_tail: Option<&MerkleTriple>,
    ) -> Result<usize, ChainError> {
        let low = self.max_seqno();
        let resp = fetch_sig_chain(ctx.api.as_ref(), self.uid, low, ctx.fetch_timeout)?;

        let mut fetched = 0usize;
        for wire in &resp.sigs {
            let link = ChainLink::unpack(wire)?;
            if link.seqno() <= self.max_seqno() {
                continue;
            }
            self.links.push(link);
            fetched += 1;
        }
        tracing::debug!(uid = %self.uid, fetched, low = %low, "loaded chain links");

        if let Some(tail) = merkle_tail {
            self.check_against_merkle_tree(tail)?;
        }
        Ok(fetched)
    }

    /// The Merkle-endorsed tail must name a link we actually hold: matching
    /// seqno implies matching link id.
    pub fn check_against_merkle_tree(&self, tail: &MerkleTriple) -> Result<(), ChainError> {
        let Some(link) = self.links.iter().find(|l| l.seqno() == tail.seqno) else {
            return Err(ChainError::ServerChain(format!(
                "tail not reachable: no link at seqno {}",
                tail.seqno
            )));
        };
        if link.id() != tail.link_id {
            return Err(ChainError::ServerChain(format!(
                "tail mismatch at seqno {}: chain has {}, tree endorses {}",
                tail.seqno,
                link.id(),
                tail.link_id
            )));
        }
        Ok(())
    }

    /// Verify hash linkage, signatures, and identity claims of every link,
    /// newest to oldest, stopping early at the first already-verified link.
    pub fn verify_chain(&mut self) -> Result<(), ChainError> {
        let uid = self.uid;
        let username = self.username.clone();

        for i in (0..self.links.len()).rev() {
            let (head, rest) = self.links.split_at_mut(i);
            let link = &mut rest[0];

            if link.is_chain_verified() {
                break;
            }

            link.verify_hash()?;
            link.verify_payload()?;
            let signer_key = verifying_key_from_kid(&link.signer().kid)?;
            link.verify_sig(&signer_key)?;
            link.check_name_and_uid(&username, &uid)?;

            match head.last() {
                Some(prev_link) => {
                    let expected_seqno = prev_link.seqno().next();
                    if link.seqno() != expected_seqno {
                        return Err(ChainError::WrongSeqno {
                            expected: expected_seqno,
                            got: link.seqno(),
                        });
                    }
                    if link.prev() != Some(prev_link.id()) {
                        return Err(ChainError::Linkage {
                            seqno: link.seqno(),
                            expected: prev_link.id(),
                            claimed_prev: link.prev(),
                        });
                    }
                }
                None => {
                    if link.prev().is_some() || link.seqno() != Seqno(1) {
                        return Err(ChainError::BadGenesis);
                    }
                }
            }

            link.mark_chain_verified();
        }

        tracing::debug!(uid = %self.uid, links = self.links.len(), "chain verified");
        Ok(())
    }

    /// Additionally confirm the chain belongs to `key`: the genesis signer
    /// must be that key, and the tail's signature must verify under it.
    pub fn verify_with_key(&mut self, key: &ed25519_dalek::VerifyingKey) -> Result<(), ChainError> {
        let username = self.username.clone();
        let uid = self.uid;
        let first = self.links.first().ok_or(ChainError::Empty)?;
        first.check_name_and_uid(&username, &uid)?;

        let expected_kid = sigtree_model::Kid::from_eddsa(key.as_bytes());
        if first.signer().kid != expected_kid {
            return Err(ChainError::Link(LinkError::FingerprintMismatch {
                claimed: first.signer().fokid(),
            }));
        }

        let tail = self.links.last_mut().ok_or(ChainError::Empty)?;
        tail.verify_sig(key)?;
        Ok(())
    }

    /// Persist verified links into the local cache.
    pub fn persist(&self, store: &LocalStore) -> Result<(), ChainError> {
        for link in &self.links {
            if link.is_chain_verified() {
                store.put_link(&link.id(), &link.to_cache_bytes())?;
            }
        }
        Ok(())
    }
}
