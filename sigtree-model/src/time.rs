//! Chain time
//!
//! Events on a chain carry both a wall clock reading and the chain position
//! they were observed at. The two do not define a total order when seqnos are
//! equal but wall clocks differ; both fields are surfaced and ordering policy
//! is left to the caller.

use serde::{Deserialize, Serialize};

use crate::types::Seqno;

/// A (wall clock, chain position) pair stamped on replay-derived facts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTime {
    /// Seconds since the Unix epoch as claimed by the signer.
    pub unix_seconds: u64,
    /// Chain seqno of the link that carried the statement.
    pub seqno: Seqno,
}

impl ChainTime {
    pub fn new(unix_seconds: u64, seqno: Seqno) -> Self {
        Self {
            unix_seconds,
            seqno,
        }
    }
}
