//! Root-to-leaf proof walking
//!
//! Each proof step carries the raw JSON of one tree node plus the hex path
//! position of the child being descended into. The walk checks, per level:
//! the node's bytes hash to the value committed by its parent, the prefix
//! extends the accumulated path and stays a prefix of the uid, and the node's
//! table actually points where the step claims.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use sigtree_model::{NodeHash, Uid};

use super::{MerkleError, MerkleRoot, MerkleTriple, MerkleUserLeaf};
use crate::transport::WirePathStep;

const NODE_TYPE_INTERIOR: u8 = 1;
const NODE_TYPE_LEAF: u8 = 2;

/// Raw shape of one tree node. Interior tables map child prefixes to hash
/// hex; leaf tables map uids to version-tagged leaf values.
#[derive(Deserialize)]
struct RawNode {
    #[serde(rename = "type")]
    node_type: u8,
    #[serde(default)]
    tab: HashMap<String, Value>,
}

/// An unverified root-to-leaf proof for one uid.
pub struct VerificationPath {
    pub uid: Uid,
    pub root: MerkleRoot,
    pub steps: Vec<WirePathStep>,
    pub id_version: u64,
}

impl VerificationPath {
    /// Walk the proof. Returns the user's leaf, which may be empty ("no
    /// chain yet") without that being an integrity failure.
    pub fn verify(&self) -> Result<MerkleUserLeaf, MerkleError> {
        let uid_hex = self.uid.to_string();
        let mut expected = self.root.root_hash;
        let mut consumed = String::new();

        for (level, step) in self.steps.iter().enumerate() {
            if !expected.check(step.node.as_bytes()) {
                return Err(MerkleError::HashMismatchAtLevel { level });
            }
            if !step.prefix.starts_with(&consumed) || !uid_hex.starts_with(&step.prefix) {
                return Err(MerkleError::PathMismatch {
                    level,
                    prefix: step.prefix.clone(),
                });
            }
            consumed = step.prefix.clone();

            let node: RawNode = serde_json::from_str(&step.node)?;
            match node.node_type {
                NODE_TYPE_INTERIOR => {
                    let Some(child) = node.tab.get(&step.prefix) else {
                        return Err(MerkleError::PathMismatch {
                            level,
                            prefix: step.prefix.clone(),
                        });
                    };
                    let child_hex = child.as_str().ok_or(MerkleError::PathMismatch {
                        level,
                        prefix: step.prefix.clone(),
                    })?;
                    expected = NodeHash::from_hex(child_hex)
                        .map_err(|e| MerkleError::BadIdentifier(e.to_string()))?;
                }
                NODE_TYPE_LEAF => {
                    return match node.tab.get(&uid_hex) {
                        Some(value) => parse_leaf_value(value, self.id_version),
                        // Absent uid in a verified leaf node: no chain yet.
                        None => Ok(MerkleUserLeaf {
                            public: None,
                            private: None,
                            id_version: self.id_version,
                        }),
                    };
                }
                other => {
                    return Err(MerkleError::BadIdentifier(format!(
                        "unknown node type {}",
                        other
                    )));
                }
            }
        }

        Err(MerkleError::NoLeafFound)
    }
}

/// Leaf values are version-tagged arrays: `[1, triple]` or
/// `[2, public, private?]`.
fn parse_leaf_value(value: &Value, id_version: u64) -> Result<MerkleUserLeaf, MerkleError> {
    let arr = value
        .as_array()
        .ok_or_else(|| MerkleError::BadIdentifier("leaf value is not an array".into()))?;
    let version = arr
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| MerkleError::BadIdentifier("leaf value missing version".into()))?;

    match version {
        1 => {
            let public = triple_at(arr, 1)?;
            Ok(MerkleUserLeaf {
                public: Some(public),
                private: None,
                id_version,
            })
        }
        2 => {
            let public = triple_at(arr, 1)?;
            let private = match arr.get(2) {
                None | Some(Value::Null) => None,
                Some(v) => Some(serde_json::from_value(v.clone())?),
            };
            Ok(MerkleUserLeaf {
                public: Some(public),
                private,
                id_version,
            })
        }
        other => Err(MerkleError::UnsupportedLeafVersion(other)),
    }
}

fn triple_at(arr: &[Value], idx: usize) -> Result<MerkleTriple, MerkleError> {
    let v = arr
        .get(idx)
        .ok_or_else(|| MerkleError::BadIdentifier("leaf value missing triple".into()))?;
    Ok(serde_json::from_value(v.clone())?)
}
