/* Coinjoin Coordinator
 * Written by the Coinjoin Coordinator developers
 *
 * To the extent possible under law, the author(s) have dedicated all
 * copyright and related and neighboring rights to this software to
 * the public domain worldwide. This software is distributed without
 * any warranty.
 *
 * You should have received a copy of the CC0 Public Domain Dedication
 * along with this software.
 * If not, see <http://creativecommons.org/publicdomain/zero/1.0/>.
 */

//! # Ownership Proofs
//!
//! Detachable proofs that the presenter controls a scriptPubKey, in the
//! style of SLIP-19. A proof is a body (flags and ownership identifiers)
//! plus a witness signing
//!
//!   SHA256(body || len(scriptPubKey) || scriptPubKey || len(data) || data)
//!
//! where `data` is caller-supplied commitment data. For coinjoin inputs the
//! commitment data binds the proof to one round of one coordinator, so a
//! proof cannot be replayed elsewhere.
//!

use std::fmt;

use bitcoin::consensus::encode::{deserialize, serialize};
use bitcoin::hashes::{sha256, Hash};
use bitcoin::hex::{DisplayHex, FromHex};
use bitcoin::secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use bitcoin::sighash::EcdsaSighashType;
use bitcoin::{ecdsa, Script, ScriptBuf, WPubkeyHash, Witness};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::coinjoin::round::RoundId;
use crate::coinjoin::script::{verify_p2wpkh_witness, ScriptType};

/// Magic bytes starting every proof body
pub const PROOF_VERSION_MAGIC: [u8; 4] = [b'S', b'L', 0x00, 0x19];

/// Flag set when the owner confirmed the proof interactively
pub const FLAG_USER_CONFIRMATION: u8 = 0x01;

/// Ownership proof failure which is not simply "the signature is wrong"
#[derive(Clone, PartialEq, Eq, Debug, thiserror::Error)]
pub enum ProofError {
  /// Proof bytes ended early
  #[error("ownership proof truncated")]
  Truncated,
  /// Proof bytes did not start with the version magic
  #[error("ownership proof has unknown version magic")]
  BadMagic,
  /// The trailing witness did not decode
  #[error("ownership proof witness: {0}")]
  Witness(String),
  /// Proofs for this script type are not implemented
  #[error("ownership proofs are not implemented for {0:?} scripts")]
  UnsupportedScriptType(ScriptType),
}

/// A 32-byte identifier of the owner, opaque to the coordinator
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct OwnershipIdentifier(pub [u8; 32]);

/// The signed part of a proof
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ProofBody {
  flags: u8,
  identifiers: Vec<OwnershipIdentifier>,
}

impl ProofBody {
  /// Constructs a body with a single identifier
  pub fn new(user_confirmation: bool, identifier: OwnershipIdentifier) -> ProofBody {
    ProofBody {
      flags: if user_confirmation { FLAG_USER_CONFIRMATION } else { 0 },
      identifiers: vec![identifier],
    }
  }

  /// Whether the user-confirmation flag is set
  pub fn user_confirmed(&self) -> bool {
    self.flags & FLAG_USER_CONFIRMATION != 0
  }

  /// Identifiers carried by this body
  pub fn identifiers(&self) -> &[OwnershipIdentifier] {
    &self.identifiers
  }

  fn encode(&self, out: &mut Vec<u8>) {
    out.extend_from_slice(&PROOF_VERSION_MAGIC);
    out.push(self.flags);
    // Bodies never carry 253+ identifiers so the compact size is one byte
    out.push(self.identifiers.len() as u8);
    for id in &self.identifiers {
      out.extend_from_slice(&id.0);
    }
  }

  /// The hash the proof signature commits to
  pub fn signature_hash(&self, script_pubkey: &Script, commitment_data: &[u8]) -> sha256::Hash {
    let mut data = vec![];
    self.encode(&mut data);
    data.extend(serialize(&script_pubkey.to_owned()));
    data.extend(serialize(&commitment_data.to_vec()));
    sha256::Hash::hash(&data)
  }
}

/// A proof of ownership of a scriptPubKey
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OwnershipProof {
  body: ProofBody,
  signature: Witness,
}

impl OwnershipProof {
  /// Constructs a proof from parts
  pub fn from_parts(body: ProofBody, signature: Witness) -> OwnershipProof {
    OwnershipProof { body, signature }
  }

  /// Generates a proof for the P2WPKH script of `key`
  pub fn generate_p2wpkh(key: &SecretKey,
                         identifier: OwnershipIdentifier,
                         commitment_data: &[u8],
                         user_confirmation: bool)
                         -> OwnershipProof {
    let secp = Secp256k1::new();
    let pubkey = PublicKey::from_secret_key(&secp, key);
    let script_pubkey = p2wpkh_script(&pubkey);
    let body = ProofBody::new(user_confirmation, identifier);
    let hash = body.signature_hash(&script_pubkey, commitment_data);
    let signature = secp.sign_ecdsa(&Message::from_digest(hash.to_byte_array()), key);
    let sig = ecdsa::Signature { signature, sighash_type: EcdsaSighashType::All };
    OwnershipProof { body, signature: Witness::p2wpkh(&sig, &pubkey) }
  }

  /// Generates the proof a coinjoin client attaches to an input
  pub fn generate_coinjoin_input_proof(key: &SecretKey,
                                       commitment_data: &CoinJoinInputCommitmentData)
                                       -> OwnershipProof {
    OwnershipProof::generate_p2wpkh(key, OwnershipIdentifier::default(),
                                    &commitment_data.to_bytes(), true)
  }

  /// The proof body
  pub fn body(&self) -> &ProofBody {
    &self.body
  }

  /// Verifies the proof against a script and commitment data. Returns
  /// `Ok(false)` on a bad proof and an error if proofs are not
  /// implemented for the script's type.
  pub fn verify_ownership(&self,
                          script_pubkey: &Script,
                          commitment_data: &[u8],
                          require_user_confirmation: bool)
                          -> Result<bool, ProofError> {
    match ScriptType::classify(script_pubkey) {
      ScriptType::P2wpkh(key_hash) => Ok(self.verify_p2wpkh(&key_hash, script_pubkey,
                                                            commitment_data,
                                                            require_user_confirmation)),
      other => Err(ProofError::UnsupportedScriptType(other)),
    }
  }

  fn verify_p2wpkh(&self,
                   key_hash: &WPubkeyHash,
                   script_pubkey: &Script,
                   commitment_data: &[u8],
                   require_user_confirmation: bool)
                   -> bool {
    if require_user_confirmation && !self.body.user_confirmed() {
      return false;
    }
    let hash = self.body.signature_hash(script_pubkey, commitment_data);
    verify_p2wpkh_witness(&self.signature, key_hash, hash.to_byte_array())
  }

  /// Verifies a coinjoin input proof, which must be user-confirmed
  pub fn verify_coinjoin_input_proof(&self,
                                     script_pubkey: &Script,
                                     commitment_data: &CoinJoinInputCommitmentData)
                                     -> Result<bool, ProofError> {
    self.verify_ownership(script_pubkey, &commitment_data.to_bytes(), true)
  }

  /// Serializes the proof
  pub fn to_bytes(&self) -> Vec<u8> {
    let mut ret = vec![];
    self.body.encode(&mut ret);
    ret.extend(serialize(&self.signature));
    ret
  }

  /// Deserializes a proof
  pub fn from_bytes(data: &[u8]) -> Result<OwnershipProof, ProofError> {
    if data.len() < 6 {
      return Err(ProofError::Truncated);
    }
    if data[..4] != PROOF_VERSION_MAGIC {
      return Err(ProofError::BadMagic);
    }
    let flags = data[4];
    let count = data[5] as usize;
    let ids_end = 6 + 32 * count;
    if data.len() < ids_end {
      return Err(ProofError::Truncated);
    }
    let identifiers = data[6..ids_end].chunks(32).map(|chunk| {
      let mut id = [0; 32];
      id.copy_from_slice(chunk);
      OwnershipIdentifier(id)
    }).collect();
    let signature: Witness = deserialize(&data[ids_end..])
      .map_err(|e| ProofError::Witness(e.to_string()))?;
    Ok(OwnershipProof { body: ProofBody { flags, identifiers }, signature })
  }
}

impl Serialize for OwnershipProof {
  fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&self.to_bytes().to_lower_hex_string())
  }
}

impl<'de> Deserialize<'de> for OwnershipProof {
  fn deserialize<D: Deserializer<'de>>(d: D) -> Result<OwnershipProof, D::Error> {
    let st = String::deserialize(d)?;
    let bytes = Vec::<u8>::from_hex(&st).map_err(de::Error::custom)?;
    OwnershipProof::from_bytes(&bytes).map_err(de::Error::custom)
  }
}

/// Data a coinjoin input proof is bound to
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CoinJoinInputCommitmentData {
  coordinator_identifier: String,
  round_id: RoundId,
}

impl CoinJoinInputCommitmentData {
  /// Constructs commitment data for one round of one coordinator
  pub fn new<S: Into<String>>(coordinator_identifier: S, round_id: RoundId) -> CoinJoinInputCommitmentData {
    CoinJoinInputCommitmentData { coordinator_identifier: coordinator_identifier.into(), round_id }
  }

  /// Serialized form, as signed over
  pub fn to_bytes(&self) -> Vec<u8> {
    let mut ret = serialize(&self.coordinator_identifier.as_bytes().to_vec());
    ret.extend_from_slice(&self.round_id.to_bytes());
    ret
  }
}

impl fmt::Display for CoinJoinInputCommitmentData {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    write!(f, "{}/{}", self.coordinator_identifier, self.round_id)
  }
}

/// The P2WPKH scriptPubKey paying to `key`
pub fn p2wpkh_script(key: &PublicKey) -> ScriptBuf {
  ScriptBuf::new_p2wpkh(&bitcoin::CompressedPublicKey(*key).wpubkey_hash())
}
