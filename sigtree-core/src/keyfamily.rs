//! Key family replay
//!
//! `KeyFamily` is the server-reported, untrusted key inventory. Replaying a
//! verified chain over it produces `ComputedKeyInfos`: the trusted,
//! time-aware view of which keys are active, their roles, and their device
//! bindings. `ComputedKeyFamily` bundles both and is the only trustworthy
//! source of "is this key active".
//!
//! The computed view is a derived artifact: it is rebuilt by full replay each
//! time a chain is (re)validated and never hand-edited.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use sigtree_model::{ChainTime, DeviceId, Fokid, Kid, KidError, SigId};
use thiserror::Error;

use crate::chain_link::{ChainLink, DeviceSection, LinkDetail, DEVICE_TYPE_WEB};
use crate::crypto::{fingerprint_of_kid, CryptoError};

#[derive(Error, Debug)]
pub enum KeyFamilyError {
    #[error("server claimed kid {claimed}, bundle decodes to {computed}")]
    WrongKid { claimed: Kid, computed: Kid },

    #[error("sibkeys disagree on eldest: {a} vs {b}")]
    EldestMismatch { a: Kid, b: Kid },

    #[error("no eldest key in family")]
    NoEldest,

    #[error("key {0} is revoked")]
    KeyRevoked(Kid),

    #[error("key {0} is expired at the queried time")]
    KeyExpired(Kid),

    #[error("no such key: {0}")]
    NoSuchKey(String),

    #[error("revocation references unknown delegation {0}")]
    BadRevocation(SigId),

    #[error("bad key bundle: {0}")]
    BadBundle(String),

    #[error("kid error: {0}")]
    Kid(#[from] KidError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

// --- Untrusted inventory ---

/// One server-reported key record: a claimed kid plus the hex bundle of the
/// actual key identifier bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerKeyRecord {
    pub kid: Kid,
    pub bundle: String,
    #[serde(default)]
    pub sibkey: bool,
    #[serde(default)]
    pub eldest_kid: Option<Kid>,
}

/// The server's key inventory after import validation. Purely descriptive;
/// never consulted for "active" without the computed view.
#[derive(Clone, Debug, Default)]
pub struct KeyFamily {
    pub eldest: Fokid,
    keys: HashSet<Kid>,
    sibkeys: HashSet<Kid>,
}

impl KeyFamily {
    /// Validate the server inventory: every bundle must decode to the kid it
    /// was claimed under, and all sibkeys must agree on one eldest.
    pub fn import(records: &[ServerKeyRecord]) -> Result<Self, KeyFamilyError> {
        let mut family = KeyFamily::default();

        for record in records {
            let bytes = hex::decode(&record.bundle)
                .map_err(|e| KeyFamilyError::BadBundle(e.to_string()))?;
            let computed = Kid::from_bytes(&bytes)?;
            if computed != record.kid {
                return Err(KeyFamilyError::WrongKid {
                    claimed: record.kid.clone(),
                    computed,
                });
            }
            family.keys.insert(record.kid.clone());
            if record.sibkey {
                family.sibkeys.insert(record.kid.clone());
            }
        }

        family.eldest = Fokid::from_kid(Self::find_eldest(records)?);
        Ok(family)
    }

    /// All sibkey records must name the same eldest kid.
    fn find_eldest(records: &[ServerKeyRecord]) -> Result<Kid, KeyFamilyError> {
        let mut eldest: Option<Kid> = None;
        for record in records.iter().filter(|r| r.sibkey) {
            let Some(claimed) = &record.eldest_kid else {
                continue;
            };
            match &eldest {
                None => eldest = Some(claimed.clone()),
                Some(existing) if existing != claimed => {
                    return Err(KeyFamilyError::EldestMismatch {
                        a: existing.clone(),
                        b: claimed.clone(),
                    });
                }
                Some(_) => {}
            }
        }
        eldest.ok_or(KeyFamilyError::NoEldest)
    }

    pub fn contains(&self, kid: &Kid) -> bool {
        self.keys.contains(kid)
    }
}

// --- Computed view ---

/// Status of one key as derived from replay. Transitions Uncancelled →
/// Revoked only; nothing reverses it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyStatus {
    Uncancelled,
    Revoked,
}

/// Replay-derived facts about one key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComputedKeyInfo {
    pub status: KeyStatus,
    pub eldest: bool,
    pub sibkey: bool,
    /// Start of the key's validity window, seconds since epoch.
    pub ctime: u64,
    /// End of the validity window; 0 means unbounded.
    pub etime: u64,
    /// For subkeys: the sibkey that issued this key.
    pub parent: Option<Kid>,
    /// For sibkeys: keys issued subordinate to this one.
    pub subkeys: Vec<Kid>,
    /// Delegations naming this key: sig id → signing kid.
    pub delegations: HashMap<SigId, Kid>,
    pub delegated_at: Option<ChainTime>,
    pub revoked_at: Option<ChainTime>,
}

impl ComputedKeyInfo {
    fn new_uncancelled(ctime: u64, etime: u64) -> Self {
        Self {
            status: KeyStatus::Uncancelled,
            eldest: false,
            sibkey: false,
            ctime,
            etime,
            parent: None,
            subkeys: Vec::new(),
            delegations: HashMap::new(),
            delegated_at: None,
            revoked_at: None,
        }
    }

    fn revoked_tombstone(at: ChainTime) -> Self {
        let mut info = Self::new_uncancelled(0, 0);
        info.status = KeyStatus::Revoked;
        info.revoked_at = Some(at);
        info
    }

    /// Is the key usable at `at`? `etime == 0` means unbounded.
    pub fn active_at(&self, at: u64) -> bool {
        self.status == KeyStatus::Uncancelled
            && at >= self.ctime
            && (self.etime == 0 || at < self.etime)
    }
}

/// The full computed view after replay.
#[derive(Clone, Debug, Default)]
pub struct ComputedKeyInfos {
    infos: HashMap<Kid, ComputedKeyInfo>,
    /// Which kid each delegation sig granted authority to.
    sig_id_to_kid: HashMap<SigId, Kid>,
    devices: HashMap<DeviceId, DeviceSection>,
    kid_to_device: HashMap<Kid, DeviceId>,
    /// Most recently delegated "web" device, anchoring the
    /// deterministically-derived key set.
    web_device: Option<DeviceId>,
    eldest_kid: Option<Kid>,
    /// Whether the chain has delegated any sibkey. Once it has, usable
    /// signing authority rests with the delegated sibkeys and the eldest
    /// key no longer stands in for them.
    sibkey_delegated: bool,
}

/// KeyFamily plus its computed infos: the queryable trusted view.
#[derive(Clone, Debug, Default)]
pub struct ComputedKeyFamily {
    pub kf: KeyFamily,
    cki: ComputedKeyInfos,
}

impl ComputedKeyFamily {
    pub fn new(kf: KeyFamily) -> Self {
        Self {
            kf,
            cki: ComputedKeyInfos::default(),
        }
    }

    /// Replay verified links chronologically into a fresh computed view.
    /// Every delegation must be signed by a key active at its sign time.
    pub fn replay(kf: KeyFamily, links: &[ChainLink]) -> Result<Self, KeyFamilyError> {
        let mut ckf = Self::new(kf);
        for link in links {
            match link.detail() {
                LinkDetail::Eldest => ckf.insert_eldest_link(link)?,
                LinkDetail::Sibkey(_) | LinkDetail::Subkey(_) => {
                    // The signer must hold active signing authority at the
                    // moment it made this statement.
                    ckf.find_active_sibkey(&link.signer().fokid(), link.ctime())?;
                    ckf.delegate(link)?;
                }
                LinkDetail::Revoke(_) => {
                    ckf.find_active_sibkey(&link.signer().fokid(), link.ctime())?;
                    ckf.revoke(link)?;
                }
                LinkDetail::Device { .. } => {
                    ckf.find_active_sibkey(&link.signer().fokid(), link.ctime())?;
                    ckf.update_devices(link);
                }
            }
        }
        Ok(ckf)
    }

    // --- Bootstrap paths (exactly one applies per user) ---

    /// Proper genesis: the chain's first link declares its signer eldest.
    pub fn insert_eldest_link(&mut self, link: &ChainLink) -> Result<(), KeyFamilyError> {
        let kid = link.signer().kid.clone();
        let info = self
            .cki
            .infos
            .entry(kid.clone())
            .or_insert_with(|| ComputedKeyInfo::new_uncancelled(link.ctime(), link.etime()));
        if info.status == KeyStatus::Revoked {
            tracing::warn!(kid = %kid, "eldest link names a revoked kid; not resurrecting");
            return Ok(());
        }
        info.eldest = true;
        info.sibkey = true;
        info.ctime = link.ctime();
        info.etime = link.etime();
        info.delegations.insert(link.sig_id(), kid.clone());
        info.delegated_at = Some(link.chain_time());
        self.cki.sig_id_to_kid.insert(link.sig_id(), kid.clone());
        self.cki.eldest_kid = Some(kid);
        Ok(())
    }

    /// No chain at all, but the server vouches for an identity match on the
    /// inventory's eldest key. The family's imported eldest must agree.
    pub fn insert_server_eldest_key(&mut self, fokid: &Fokid) -> Result<(), KeyFamilyError> {
        let Some(kid) = self.kf.eldest.kid.clone() else {
            return Err(KeyFamilyError::NoEldest);
        };
        if !self.kf.eldest.matches(fokid) {
            return Err(KeyFamilyError::EldestMismatch {
                a: kid,
                b: fokid.kid.clone().unwrap_or(kid_placeholder()),
            });
        }
        self.bootstrap_eldest(kid);
        Ok(())
    }

    /// Brand-new local-only key: nothing served, nothing signed yet.
    pub fn insert_local_eldest_key(&mut self, kid: Kid) {
        self.bootstrap_eldest(kid);
    }

    fn bootstrap_eldest(&mut self, kid: Kid) {
        let info = self
            .cki
            .infos
            .entry(kid.clone())
            .or_insert_with(|| ComputedKeyInfo::new_uncancelled(0, 0));
        info.eldest = true;
        info.sibkey = true;
        self.cki.eldest_kid = Some(kid);
    }

    // --- Replay operations ---

    /// Record a delegation link. Never resurrects a revoked kid; a key must
    /// be re-delegated under a new kid to become active again.
    pub fn delegate(&mut self, link: &ChainLink) -> Result<(), KeyFamilyError> {
        let (delegated, parent, is_sibkey) = match link.detail() {
            LinkDetail::Sibkey(d) => (d.kid.clone(), d.parent_kid.clone(), true),
            LinkDetail::Subkey(d) => (d.kid.clone(), d.parent_kid.clone(), false),
            _ => return Ok(()),
        };
        let signing_kid = link.signer().kid.clone();
        let sig_id = link.sig_id();

        let info = self
            .cki
            .infos
            .entry(delegated.clone())
            .or_insert_with(|| ComputedKeyInfo::new_uncancelled(link.ctime(), link.etime()));

        info.delegations.insert(sig_id, signing_kid);
        self.cki.sig_id_to_kid.insert(sig_id, delegated.clone());
        if is_sibkey {
            self.cki.sibkey_delegated = true;
        }

        if info.status == KeyStatus::Revoked {
            tracing::warn!(kid = %delegated, "delegation for revoked kid ignored");
            return Ok(());
        }

        info.sibkey = is_sibkey;
        info.ctime = link.ctime();
        info.etime = link.etime();
        info.delegated_at = Some(link.chain_time());

        if let Some(parent_kid) = parent {
            info.parent = Some(parent_kid.clone());
            let parent_info = self
                .cki
                .infos
                .entry(parent_kid)
                .or_insert_with(|| ComputedKeyInfo::new_uncancelled(link.ctime(), link.etime()));
            if !parent_info.subkeys.contains(&delegated) {
                parent_info.subkeys.push(delegated.clone());
            }
        }

        if let LinkDetail::Subkey(d) | LinkDetail::Sibkey(d) = link.detail() {
            if let Some(device) = &d.device {
                self.bind_device_kid(device, &delegated);
            }
        }

        tracing::debug!(kid = %delegated, seqno = %link.seqno(), "delegated");
        Ok(())
    }

    /// Record a revocation link. Referencing a delegation by sig id requires
    /// that delegation to exist; referencing a kid directly does not.
    pub fn revoke(&mut self, link: &ChainLink) -> Result<(), KeyFamilyError> {
        let LinkDetail::Revoke(revocation) = link.detail() else {
            return Ok(());
        };
        let at = link.chain_time();

        for sig_id in &revocation.sig_ids {
            let Some(kid) = self.cki.sig_id_to_kid.get(sig_id).cloned() else {
                return Err(KeyFamilyError::BadRevocation(*sig_id));
            };
            self.revoke_kid(&kid, at);
        }
        for kid in &revocation.kids {
            self.revoke_kid(kid, at);
        }
        Ok(())
    }

    fn revoke_kid(&mut self, kid: &Kid, at: ChainTime) {
        match self.cki.infos.get_mut(kid) {
            Some(info) => {
                if info.status == KeyStatus::Uncancelled {
                    info.status = KeyStatus::Revoked;
                    info.revoked_at = Some(at);
                    tracing::info!(kid = %kid, seqno = %at.seqno, "key revoked");
                }
            }
            None => {
                // Tombstone: a kid revoked before any delegation stays dead.
                self.cki
                    .infos
                    .insert(kid.clone(), ComputedKeyInfo::revoked_tombstone(at));
            }
        }
    }

    // --- Devices ---

    /// Merge device metadata from a link and track the web device marker.
    pub fn update_devices(&mut self, link: &ChainLink) {
        match link.detail() {
            LinkDetail::Device { device } => self.merge_device(device.clone()),
            LinkDetail::Sibkey(d) | LinkDetail::Subkey(d) => {
                if let Some(device) = &d.device {
                    self.merge_device(device.clone());
                }
            }
            _ => {}
        }
    }

    fn merge_device(&mut self, device: DeviceSection) {
        if let Some(kid) = &device.kid {
            self.cki.kid_to_device.insert(kid.clone(), device.id);
        }
        if device.device_type == DEVICE_TYPE_WEB {
            self.cki.web_device = Some(device.id);
        }
        match self.cki.devices.get_mut(&device.id) {
            Some(existing) => {
                if device.name.is_some() {
                    existing.name = device.name;
                }
                if device.kid.is_some() {
                    existing.kid = device.kid;
                }
                existing.device_type = device.device_type;
            }
            None => {
                self.cki.devices.insert(device.id, device);
            }
        }
    }

    fn bind_device_kid(&mut self, device: &DeviceSection, kid: &Kid) {
        self.cki.kid_to_device.insert(kid.clone(), device.id);
        let mut bound = device.clone();
        bound.kid = Some(kid.clone());
        self.merge_device(bound);
    }

    /// Whether a key, or its issuing sibkey if the key is a subkey, is bound
    /// to the tracked web-device marker.
    pub fn is_det_key(&self, kid: &Kid) -> bool {
        let Some(web) = self.cki.web_device else {
            return false;
        };
        if self.cki.kid_to_device.get(kid) == Some(&web) {
            return true;
        }
        self.cki
            .infos
            .get(kid)
            .and_then(|info| info.parent.as_ref())
            .and_then(|parent| self.cki.kid_to_device.get(parent))
            == Some(&web)
    }

    pub fn device_for_kid(&self, kid: &Kid) -> Option<&DeviceSection> {
        let id = self.cki.kid_to_device.get(kid)?;
        self.cki.devices.get(id)
    }

    // --- Queries ---

    /// Resolve a sibkey by fokid and require it to be active at `at`.
    pub fn find_active_sibkey(&self, fokid: &Fokid, at: u64) -> Result<Kid, KeyFamilyError> {
        let kid = self.resolve_fokid(fokid)?;
        let info = self
            .cki
            .infos
            .get(&kid)
            .ok_or_else(|| KeyFamilyError::NoSuchKey(kid.to_string()))?;
        if !info.sibkey {
            return Err(KeyFamilyError::NoSuchKey(kid.to_string()));
        }
        self.require_active(&kid, info, at)?;
        Ok(kid)
    }

    /// Require an encryption subkey to be active at `at`.
    pub fn find_active_encryption_subkey(&self, kid: &Kid, at: u64) -> Result<Kid, KeyFamilyError> {
        let info = self
            .cki
            .infos
            .get(kid)
            .ok_or_else(|| KeyFamilyError::NoSuchKey(kid.to_string()))?;
        if info.sibkey {
            return Err(KeyFamilyError::NoSuchKey(kid.to_string()));
        }
        self.require_active(kid, info, at)?;
        Ok(kid.clone())
    }

    fn require_active(
        &self,
        kid: &Kid,
        info: &ComputedKeyInfo,
        at: u64,
    ) -> Result<(), KeyFamilyError> {
        if info.status == KeyStatus::Revoked {
            return Err(KeyFamilyError::KeyRevoked(kid.clone()));
        }
        if !info.active_at(at) {
            return Err(KeyFamilyError::KeyExpired(kid.clone()));
        }
        Ok(())
    }

    fn resolve_fokid(&self, fokid: &Fokid) -> Result<Kid, KeyFamilyError> {
        if let Some(kid) = &fokid.kid {
            return Ok(kid.clone());
        }
        if let Some(fp) = &fokid.fingerprint {
            for kid in self.cki.infos.keys() {
                if fingerprint_of_kid(kid) == *fp {
                    return Ok(kid.clone());
                }
            }
        }
        Err(KeyFamilyError::NoSuchKey(fokid.to_string()))
    }

    pub fn info(&self, kid: &Kid) -> Option<&ComputedKeyInfo> {
        self.cki.infos.get(kid)
    }

    pub fn eldest_kid(&self) -> Option<&Kid> {
        self.cki.eldest_kid.as_ref()
    }

    /// Any usable signing key at `at`? The eldest key stands in only while
    /// the chain has delegated no sibkey; after the first delegation, the
    /// delegated sibkeys are what count.
    pub fn has_active_key_at(&self, at: u64) -> bool {
        self.cki.infos.values().any(|info| {
            info.sibkey
                && info.active_at(at)
                && !(info.eldest && self.cki.sibkey_delegated)
        })
    }

    /// Any sibkey active right now?
    pub fn has_active_key(&self) -> bool {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.has_active_key_at(now)
    }
}

fn kid_placeholder() -> Kid {
    Kid::from_eddsa(&[0u8; 32])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_link::LinkBuilder;
    use crate::crypto::KeyPair;
    use sigtree_model::{Seqno, Uid};

    fn uid() -> Uid {
        Uid([5u8; 16])
    }

    fn record_for(pair: &KeyPair, eldest: &KeyPair) -> ServerKeyRecord {
        ServerKeyRecord {
            kid: pair.kid(),
            bundle: hex::encode(pair.kid().as_bytes()),
            sibkey: true,
            eldest_kid: Some(eldest.kid()),
        }
    }

    fn link(builder: LinkBuilder, signer: &KeyPair) -> ChainLink {
        let wire = builder.sign(signer);
        let mut link = ChainLink::unpack(&wire).unwrap();
        link.verify(&signer.verifying_key()).unwrap();
        link
    }

    #[test]
    fn test_import_rejects_wrong_kid() {
        let eldest = KeyPair::generate();
        let impostor = KeyPair::generate();
        let mut record = record_for(&eldest, &eldest);
        // Server claims one kid but ships another key's bundle.
        record.bundle = hex::encode(impostor.kid().as_bytes());

        assert!(matches!(
            KeyFamily::import(&[record]),
            Err(KeyFamilyError::WrongKid { .. })
        ));
    }

    #[test]
    fn test_import_rejects_eldest_disagreement() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let records = [record_for(&a, &a), record_for(&b, &b)];
        assert!(matches!(
            KeyFamily::import(&records),
            Err(KeyFamilyError::EldestMismatch { .. })
        ));
    }

    #[test]
    fn test_replay_eldest_then_sibkey() {
        let eldest = KeyPair::generate();
        let sib = KeyPair::generate();

        let genesis = link(
            LinkBuilder::new(Seqno(1), uid(), "alice")
                .ctime(100)
                .eldest_kid(eldest.kid())
                .eldest(),
            &eldest,
        );
        let delegation = link(
            LinkBuilder::new(Seqno(2), uid(), "alice")
                .prev(genesis.id())
                .ctime(200)
                .eldest_kid(eldest.kid())
                .sibkey(sib.kid()),
            &eldest,
        );

        let kf = KeyFamily::import(&[record_for(&eldest, &eldest), record_for(&sib, &eldest)])
            .unwrap();
        let ckf = ComputedKeyFamily::replay(kf, &[genesis, delegation]).unwrap();

        assert_eq!(ckf.eldest_kid(), Some(&eldest.kid()));
        assert!(ckf.has_active_key_at(300));
        ckf.find_active_sibkey(&Fokid::from_kid(sib.kid()), 250).unwrap();

        // Before its delegation time, the sibkey is not active.
        assert!(matches!(
            ckf.find_active_sibkey(&Fokid::from_kid(sib.kid()), 150),
            Err(KeyFamilyError::KeyExpired(_))
        ));
    }

    #[test]
    fn test_three_link_chain_ends_inactive() {
        // Eldest genesis, sibkey delegation, then revoke both by kid.
        let eldest = KeyPair::generate();
        let sib = KeyPair::generate();

        let genesis = link(
            LinkBuilder::new(Seqno(1), uid(), "alice")
                .ctime(100)
                .eldest_kid(eldest.kid())
                .eldest(),
            &eldest,
        );
        let delegation = link(
            LinkBuilder::new(Seqno(2), uid(), "alice")
                .prev(genesis.id())
                .ctime(200)
                .eldest_kid(eldest.kid())
                .sibkey(sib.kid()),
            &eldest,
        );
        let revocation = link(
            LinkBuilder::new(Seqno(3), uid(), "alice")
                .prev(delegation.id())
                .ctime(300)
                .eldest_kid(eldest.kid())
                .revoke_kids(vec![sib.kid(), eldest.kid()]),
            &eldest,
        );

        let kf = KeyFamily::import(&[record_for(&eldest, &eldest)]).unwrap();
        let ckf = ComputedKeyFamily::replay(kf, &[genesis, delegation, revocation]).unwrap();

        assert!(!ckf.has_active_key_at(400));
    }

    #[test]
    fn test_revoking_the_only_sibkey_leaves_no_active_key() {
        // Genesis, one sibkey delegation, then that sibkey revoked by kid.
        // The eldest key still signs revocations, but it no longer stands
        // in as a usable key once delegation has happened.
        let eldest = KeyPair::generate();
        let sib = KeyPair::generate();

        let genesis = link(
            LinkBuilder::new(Seqno(1), uid(), "alice")
                .ctime(100)
                .eldest_kid(eldest.kid())
                .eldest(),
            &eldest,
        );
        let delegation = link(
            LinkBuilder::new(Seqno(2), uid(), "alice")
                .prev(genesis.id())
                .ctime(200)
                .eldest_kid(eldest.kid())
                .sibkey(sib.kid()),
            &eldest,
        );
        let revocation = link(
            LinkBuilder::new(Seqno(3), uid(), "alice")
                .prev(delegation.id())
                .ctime(300)
                .eldest_kid(eldest.kid())
                .revoke_kids(vec![sib.kid()]),
            &eldest,
        );

        let kf = KeyFamily::import(&[record_for(&eldest, &eldest)]).unwrap();
        let ckf = ComputedKeyFamily::replay(kf, &[genesis, delegation, revocation]).unwrap();

        assert!(!ckf.has_active_key_at(400));
        // Replay authority is a different question: the eldest still
        // resolves as an active signer.
        ckf.find_active_sibkey(&Fokid::from_kid(eldest.kid()), 400)
            .unwrap();
    }

    #[test]
    fn test_revoke_by_sig_id_leaves_sibling_active() {
        let eldest = KeyPair::generate();
        let sib_a = KeyPair::generate();
        let sib_b = KeyPair::generate();

        let genesis = link(
            LinkBuilder::new(Seqno(1), uid(), "alice")
                .ctime(100)
                .eldest_kid(eldest.kid())
                .eldest(),
            &eldest,
        );
        let del_a = link(
            LinkBuilder::new(Seqno(2), uid(), "alice")
                .prev(genesis.id())
                .ctime(200)
                .eldest_kid(eldest.kid())
                .sibkey(sib_a.kid()),
            &eldest,
        );
        let del_b = link(
            LinkBuilder::new(Seqno(3), uid(), "alice")
                .prev(del_a.id())
                .ctime(300)
                .eldest_kid(eldest.kid())
                .sibkey(sib_b.kid()),
            &eldest,
        );
        let revoke_a = link(
            LinkBuilder::new(Seqno(4), uid(), "alice")
                .prev(del_b.id())
                .ctime(400)
                .eldest_kid(eldest.kid())
                .revoke_sig_ids(vec![del_a.sig_id()]),
            &eldest,
        );

        let kf = KeyFamily::import(&[record_for(&eldest, &eldest)]).unwrap();
        let ckf =
            ComputedKeyFamily::replay(kf, &[genesis, del_a, del_b, revoke_a]).unwrap();

        ckf.find_active_sibkey(&Fokid::from_kid(sib_b.kid()), 500).unwrap();
        assert!(matches!(
            ckf.find_active_sibkey(&Fokid::from_kid(sib_a.kid()), 500),
            Err(KeyFamilyError::KeyRevoked(_))
        ));
    }

    #[test]
    fn test_revocation_of_unknown_sig_id_is_rejected() {
        let eldest = KeyPair::generate();
        let genesis = link(
            LinkBuilder::new(Seqno(1), uid(), "alice")
                .ctime(100)
                .eldest_kid(eldest.kid())
                .eldest(),
            &eldest,
        );
        let bogus = link(
            LinkBuilder::new(Seqno(2), uid(), "alice")
                .prev(genesis.id())
                .ctime(200)
                .eldest_kid(eldest.kid())
                .revoke_sig_ids(vec![SigId([0xaa; 32])]),
            &eldest,
        );

        let kf = KeyFamily::import(&[record_for(&eldest, &eldest)]).unwrap();
        assert!(matches!(
            ComputedKeyFamily::replay(kf, &[genesis, bogus]),
            Err(KeyFamilyError::BadRevocation(_))
        ));
    }

    #[test]
    fn test_delegate_never_resurrects_revoked_kid() {
        let eldest = KeyPair::generate();
        let sib = KeyPair::generate();

        let genesis = link(
            LinkBuilder::new(Seqno(1), uid(), "alice")
                .ctime(100)
                .eldest_kid(eldest.kid())
                .eldest(),
            &eldest,
        );
        let delegation = link(
            LinkBuilder::new(Seqno(2), uid(), "alice")
                .prev(genesis.id())
                .ctime(200)
                .eldest_kid(eldest.kid())
                .sibkey(sib.kid()),
            &eldest,
        );
        let revocation = link(
            LinkBuilder::new(Seqno(3), uid(), "alice")
                .prev(delegation.id())
                .ctime(300)
                .eldest_kid(eldest.kid())
                .revoke_kids(vec![sib.kid()]),
            &eldest,
        );
        let redelegation = link(
            LinkBuilder::new(Seqno(4), uid(), "alice")
                .prev(revocation.id())
                .ctime(400)
                .eldest_kid(eldest.kid())
                .sibkey(sib.kid()),
            &eldest,
        );

        let kf = KeyFamily::import(&[record_for(&eldest, &eldest)]).unwrap();
        let ckf = ComputedKeyFamily::replay(
            kf,
            &[genesis, delegation, revocation, redelegation],
        )
        .unwrap();

        assert_eq!(ckf.info(&sib.kid()).unwrap().status, KeyStatus::Revoked);
        assert!(matches!(
            ckf.find_active_sibkey(&Fokid::from_kid(sib.kid()), 500),
            Err(KeyFamilyError::KeyRevoked(_))
        ));
    }

    #[test]
    fn test_subkey_wiring_and_queries() {
        let eldest = KeyPair::generate();
        let enc = Kid::from_dh(&[8u8; 32]);

        let genesis = link(
            LinkBuilder::new(Seqno(1), uid(), "alice")
                .ctime(100)
                .eldest_kid(eldest.kid())
                .eldest(),
            &eldest,
        );
        let delegation = link(
            LinkBuilder::new(Seqno(2), uid(), "alice")
                .prev(genesis.id())
                .ctime(200)
                .eldest_kid(eldest.kid())
                .subkey(enc.clone(), eldest.kid()),
            &eldest,
        );

        let kf = KeyFamily::import(&[record_for(&eldest, &eldest)]).unwrap();
        let ckf = ComputedKeyFamily::replay(kf, &[genesis, delegation]).unwrap();

        let info = ckf.info(&enc).unwrap();
        assert_eq!(info.parent.as_ref(), Some(&eldest.kid()));
        assert!(ckf
            .info(&eldest.kid())
            .unwrap()
            .subkeys
            .contains(&enc));

        ckf.find_active_encryption_subkey(&enc, 250).unwrap();
        // A sibkey is not an encryption subkey.
        assert!(matches!(
            ckf.find_active_encryption_subkey(&eldest.kid(), 250),
            Err(KeyFamilyError::NoSuchKey(_))
        ));
    }

    #[test]
    fn test_web_device_marks_det_keys() {
        let eldest = KeyPair::generate();
        let sib = KeyPair::generate();
        let enc = Kid::from_dh(&[9u8; 32]);
        let device_id = sigtree_model::DeviceId([7u8; 16]);

        let genesis = link(
            LinkBuilder::new(Seqno(1), uid(), "alice")
                .ctime(100)
                .eldest_kid(eldest.kid())
                .eldest(),
            &eldest,
        );
        let sib_link = link(
            LinkBuilder::new(Seqno(2), uid(), "alice")
                .prev(genesis.id())
                .ctime(200)
                .eldest_kid(eldest.kid())
                .sibkey(sib.kid())
                .device(DeviceSection {
                    id: device_id,
                    kid: None,
                    name: Some("webby".into()),
                    device_type: DEVICE_TYPE_WEB.into(),
                }),
            &eldest,
        );
        let enc_link = link(
            LinkBuilder::new(Seqno(3), uid(), "alice")
                .prev(sib_link.id())
                .ctime(300)
                .eldest_kid(eldest.kid())
                .subkey(enc.clone(), sib.kid()),
            &eldest,
        );

        let kf = KeyFamily::import(&[record_for(&eldest, &eldest)]).unwrap();
        let ckf = ComputedKeyFamily::replay(kf, &[genesis, sib_link, enc_link]).unwrap();

        assert!(ckf.is_det_key(&sib.kid()));
        // The subkey inherits the marker through its issuing sibkey.
        assert!(ckf.is_det_key(&enc));
        assert!(!ckf.is_det_key(&eldest.kid()));
        assert_eq!(
            ckf.device_for_kid(&sib.kid()).unwrap().name.as_deref(),
            Some("webby")
        );
    }

    #[test]
    fn test_device_link_merges_metadata() {
        let eldest = KeyPair::generate();
        let sib = KeyPair::generate();
        let device_id = sigtree_model::DeviceId([4u8; 16]);

        let genesis = link(
            LinkBuilder::new(Seqno(1), uid(), "alice")
                .ctime(100)
                .eldest_kid(eldest.kid())
                .eldest(),
            &eldest,
        );
        let sib_link = link(
            LinkBuilder::new(Seqno(2), uid(), "alice")
                .prev(genesis.id())
                .ctime(200)
                .eldest_kid(eldest.kid())
                .sibkey(sib.kid())
                .device(DeviceSection {
                    id: device_id,
                    kid: None,
                    name: None,
                    device_type: "desktop".into(),
                }),
            &eldest,
        );
        // A standalone device link later names the device.
        let rename = link(
            LinkBuilder::new(Seqno(3), uid(), "alice")
                .prev(sib_link.id())
                .ctime(300)
                .eldest_kid(eldest.kid())
                .device(DeviceSection {
                    id: device_id,
                    kid: None,
                    name: Some("work laptop".into()),
                    device_type: "desktop".into(),
                }),
            &eldest,
        );

        let kf = KeyFamily::import(&[record_for(&eldest, &eldest)]).unwrap();
        let ckf = ComputedKeyFamily::replay(kf, &[genesis, sib_link, rename]).unwrap();

        assert_eq!(
            ckf.device_for_kid(&sib.kid()).unwrap().name.as_deref(),
            Some("work laptop")
        );
    }

    #[test]
    fn test_server_eldest_bootstrap_requires_match() {
        let eldest = KeyPair::generate();
        let other = KeyPair::generate();
        let kf = KeyFamily::import(&[record_for(&eldest, &eldest)]).unwrap();

        let mut ckf = ComputedKeyFamily::new(kf.clone());
        ckf.insert_server_eldest_key(&Fokid::from_kid(eldest.kid())).unwrap();
        assert_eq!(ckf.eldest_kid(), Some(&eldest.kid()));

        let mut ckf = ComputedKeyFamily::new(kf);
        assert!(matches!(
            ckf.insert_server_eldest_key(&Fokid::from_kid(other.kid())),
            Err(KeyFamilyError::EldestMismatch { .. })
        ));
    }

    #[test]
    fn test_local_eldest_bootstrap() {
        let local = KeyPair::generate();
        let mut ckf = ComputedKeyFamily::default();
        ckf.insert_local_eldest_key(local.kid());
        assert!(ckf.has_active_key_at(0));
    }
}
