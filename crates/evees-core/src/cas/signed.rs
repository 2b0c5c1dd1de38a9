//! Signed-payload wrapper.
//!
//! Signing itself is an abstract contract: a [`Signer`] produces and checks
//! proofs, and stores configured with one reject entities whose proof does
//! not verify. Unsigned payloads carry an empty `ECDSA` proof.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Default proof type for payloads created by this crate.
pub const DEFAULT_PROOF_TYPE: &str = "ECDSA";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proof {
    pub signature: String,
    #[serde(rename = "type")]
    pub proof_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signed<T> {
    pub payload: T,
    pub proof: Proof,
}

/// Wrap `payload` with an empty proof.
pub fn sign_object<T>(payload: T) -> Signed<T> {
    Signed {
        payload,
        proof: Proof {
            signature: String::new(),
            proof_type: DEFAULT_PROOF_TYPE.to_owned(),
        },
    }
}

/// Produces and verifies proofs over canonical payloads.
pub trait Signer: Send + Sync {
    fn sign(&self, payload: &Value) -> Result<Proof>;

    fn verify(&self, signed: &Signed<Value>) -> Result<bool>;
}

/// Parse `object` as a signed payload, if it has that shape.
#[must_use]
pub fn as_signed(object: &Value) -> Option<Signed<Value>> {
    let map = object.as_object()?;
    if map.len() != 2 || !map.contains_key("payload") || !map.contains_key("proof") {
        return None;
    }
    serde_json::from_value(object.clone()).ok()
}
