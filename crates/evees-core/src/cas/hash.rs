//! Content identifiers for entities.
//!
//! An entity id is a CID computed over the canonical JSON bytes of the entity
//! object (see [`super::canonical`]). The [`CidConfig`] picks the CID version,
//! the digest, the multicodec and the multibase used for the string form, so
//! each CAS remote can keep its own id scheme.
//!
//! Because a CID is self-describing, validation does not need to know which
//! remote produced an entity: the config is recovered from the claimed id and
//! the object is hashed again under it.

use cid::Cid;
use cid::multibase::{self, Base};
use cid::multihash::Multihash;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::canonical::canonicalize_json;
use super::Entity;
use crate::error::{EveesError, Result};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Digest applied to the canonical bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    Sha2_256,
    Blake3,
}

impl HashAlgorithm {
    /// Multihash code from the multiformats table.
    #[must_use]
    pub const fn code(self) -> u64 {
        match self {
            Self::Sha2_256 => 0x12,
            Self::Blake3 => 0x1e,
        }
    }

    fn from_code(code: u64) -> Result<Self> {
        match code {
            0x12 => Ok(Self::Sha2_256),
            0x1e => Ok(Self::Blake3),
            other => Err(EveesError::Cid(format!("unsupported multihash 0x{other:x}"))),
        }
    }

    fn digest(self, bytes: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha2_256 => Sha256::digest(bytes).to_vec(),
            Self::Blake3 => blake3::hash(bytes).as_bytes().to_vec(),
        }
    }
}

/// Multicodec describing how the hashed bytes are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Codec {
    Raw,
    DagPb,
    DagJson,
    Json,
}

impl Codec {
    #[must_use]
    pub const fn code(self) -> u64 {
        match self {
            Self::Raw => 0x55,
            Self::DagPb => 0x70,
            Self::DagJson => 0x0129,
            Self::Json => 0x0200,
        }
    }

    fn from_code(code: u64) -> Result<Self> {
        match code {
            0x55 => Ok(Self::Raw),
            0x70 => Ok(Self::DagPb),
            0x0129 => Ok(Self::DagJson),
            0x0200 => Ok(Self::Json),
            other => Err(EveesError::Cid(format!("unsupported codec 0x{other:x}"))),
        }
    }
}

/// Multibase used for the textual id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdBase {
    Base58Btc,
    Base32Lower,
    Base16Lower,
}

impl IdBase {
    const fn multibase(self) -> Base {
        match self {
            Self::Base58Btc => Base::Base58Btc,
            Self::Base32Lower => Base::Base32Lower,
            Self::Base16Lower => Base::Base16Lower,
        }
    }

    fn from_multibase(base: Base) -> Result<Self> {
        match base {
            Base::Base58Btc => Ok(Self::Base58Btc),
            Base::Base32Lower => Ok(Self::Base32Lower),
            Base::Base16Lower => Ok(Self::Base16Lower),
            other => Err(EveesError::Cid(format!("unsupported multibase {other:?}"))),
        }
    }
}

/// The id scheme of a CAS remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CidConfig {
    pub version: u8,
    pub hash: HashAlgorithm,
    pub codec: Codec,
    pub base: IdBase,
}

impl Default for CidConfig {
    /// CIDv1, sha2-256, raw codec, base58btc.
    fn default() -> Self {
        Self {
            version: 1,
            hash: HashAlgorithm::Sha2_256,
            codec: Codec::Raw,
            base: IdBase::Base58Btc,
        }
    }
}

impl CidConfig {
    /// CIDv1 with a blake3 digest, dag-json codec and base32.
    #[must_use]
    pub const fn blake3() -> Self {
        Self {
            version: 1,
            hash: HashAlgorithm::Blake3,
            codec: Codec::DagJson,
            base: IdBase::Base32Lower,
        }
    }

    /// Legacy CIDv0: sha2-256, dag-pb, base58btc (`Qm...`).
    #[must_use]
    pub const fn v0() -> Self {
        Self {
            version: 0,
            hash: HashAlgorithm::Sha2_256,
            codec: Codec::DagPb,
            base: IdBase::Base58Btc,
        }
    }

    /// Recover the config an id was produced with.
    pub fn from_id(id: &str) -> Result<Self> {
        if id.len() == 46 && id.starts_with("Qm") {
            let cid = Cid::try_from(id).map_err(cid_err)?;
            HashAlgorithm::from_code(cid.hash().code())?;
            return Ok(Self::v0());
        }

        let (base, bytes) = multibase::decode(id).map_err(cid_err)?;
        let cid = Cid::try_from(bytes.as_slice()).map_err(cid_err)?;
        Ok(Self {
            version: 1,
            hash: HashAlgorithm::from_code(cid.hash().code())?,
            codec: Codec::from_code(cid.codec())?,
            base: IdBase::from_multibase(base)?,
        })
    }
}

fn cid_err(err: impl std::fmt::Display) -> EveesError {
    EveesError::Cid(err.to_string())
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Compute the id of `object` under `config`.
///
/// Pure function of the canonical JSON bytes and the config.
pub fn hash_object(object: &Value, config: &CidConfig) -> Result<String> {
    let bytes = canonicalize_json(object);
    let digest = config.hash.digest(bytes.as_bytes());
    let multihash = Multihash::<64>::wrap(config.hash.code(), &digest).map_err(cid_err)?;

    match config.version {
        0 => {
            if config.hash != HashAlgorithm::Sha2_256 {
                return Err(EveesError::Cid("cid v0 requires sha2-256".into()));
            }
            Ok(Cid::new_v0(multihash).map_err(cid_err)?.to_string())
        }
        1 => Cid::new_v1(config.codec.code(), multihash)
            .to_string_of_base(config.base.multibase())
            .map_err(cid_err),
        other => Err(EveesError::Cid(format!("unsupported cid version {other}"))),
    }
}

/// Check that an entity's claimed id is the id of its object.
pub fn verify_entity_hash(entity: &Entity) -> Result<bool> {
    let config = CidConfig::from_id(&entity.id)?;
    Ok(hash_object(&entity.object, &config)? == entity.id)
}

/// Recompute the id of every entity, failing on the first disagreement.
///
/// Ids that cannot even be parsed as CIDs are reported as mismatches.
pub fn validate_entities(entities: &[Entity]) -> Result<()> {
    for entity in entities {
        let computed = match CidConfig::from_id(&entity.id) {
            Ok(config) => hash_object(&entity.object, &config)?,
            Err(_) => hash_object(&entity.object, &CidConfig::default())?,
        };
        if computed != entity.id {
            return Err(EveesError::HashMismatch {
                claimed: entity.id.clone(),
                computed,
            });
        }
    }
    Ok(())
}
